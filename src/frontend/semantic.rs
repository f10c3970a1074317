//! Semantic analysis of annotations.
//!
//! Turns a parsed tuning block into a [`TuningSpec`]: evaluates literal
//! domains and constants, checks names, infers parameter roles from the
//! directives that reference them, and lowers transform arguments into
//! typed [`Directive`]s.

use crate::autotuning::search::SearchAlgorithm;
use crate::frontend::ast::{Expr, ExprKind, Item, Section, TransformArg, TuningBlock};
use crate::frontend::{
    ArrayDecl, BuildSettings, CounterSettings, Fill, InputParam, InputSpec, ScalarDecl, SearchSettings,
    TuningSpec, ValidationSettings,
};
use crate::ir::directive::{DeviceSpec, Directive, Operand, TileLevel, UnrollSpec};
use crate::ir::nest::{Stmt, TransformBlock};
use crate::space::{evaluate, Constraint, ParamRole, Parameter, ParameterSpace, Value};
use crate::utils::errors::AnnotationError;
use crate::utils::location::Span;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

type Result<T> = std::result::Result<T, AnnotationError>;

const SECTIONS: &[&str] = &[
    "build",
    "performance_counter",
    "performance_params",
    "search",
    "input_params",
    "input_vars",
    "validation",
];

/// Keys accepted inside `transform Composite(...)`.
pub const COMPOSITE_KEYS: &[&str] = &["tile", "unrolljam", "regtile", "scalarreplace", "vector", "openmp"];

/// Semantic analyzer for one annotated file.
pub struct SemanticAnalyzer {
    /// `let` constants and input parameters (first values)
    constants: BTreeMap<String, Value>,
    /// Performance parameters in declaration order
    params: Vec<(String, Vec<Value>, Span)>,
    constraints: Vec<Constraint>,
    inputs: InputSpec,
    build: BuildSettings,
    counter: CounterSettings,
    search: SearchSettings,
    validation: Option<ValidationSettings>,
}

impl SemanticAnalyzer {
    /// Create an analyzer with default settings.
    pub fn new() -> Self {
        Self {
            constants: BTreeMap::new(),
            params: Vec::new(),
            constraints: Vec::new(),
            inputs: InputSpec::default(),
            build: BuildSettings::default(),
            counter: CounterSettings::default(),
            search: SearchSettings::default(),
            validation: None,
        }
    }

    /// Analyze a tuning block (if any) together with the loop regions.
    ///
    /// Directive operands naming constants are replaced by their values;
    /// operands naming anything other than a performance parameter are
    /// rejected.
    pub fn analyze(
        mut self,
        block: Option<&TuningBlock>,
        regions: &mut [Vec<Stmt>],
    ) -> Result<TuningSpec> {
        let declared = block.is_some();
        if let Some(block) = block {
            // input_params first: performance parameters may use their values
            let mut seen = BTreeSet::new();
            for section in &block.sections {
                if !SECTIONS.contains(&section.name.as_str()) {
                    return Err(AnnotationError::malformed(
                        format!("unknown section '{}'", section.name),
                        section.span,
                    ));
                }
                if !seen.insert(section.name.as_str()) {
                    return Err(AnnotationError::malformed(
                        format!("section '{}' is defined twice", section.name),
                        section.span,
                    ));
                }
            }
            let ordered = ["input_params", "performance_params", "input_vars", "build", "performance_counter", "search", "validation"];
            for name in ordered {
                if let Some(section) = block.sections.iter().find(|s| s.name == name) {
                    self.analyze_section(section)?;
                }
            }
        }

        let names: BTreeSet<String> = self.params.iter().map(|(n, _, _)| n.clone()).collect();
        let mut roles: BTreeMap<String, ParamRole> = BTreeMap::new();
        for stmts in regions.iter_mut() {
            for stmt in stmts.iter_mut() {
                self.bind_operands(stmt, &names, &mut roles)?;
            }
        }
        if let Some(cmd) = &self.build.command {
            for name in build_flag_names(cmd) {
                if names.contains(&name) {
                    roles.entry(name).or_insert(ParamRole::BuildFlag);
                }
            }
        }

        let params = self
            .params
            .into_iter()
            .map(|(name, domain, _)| {
                let role = roles.get(&name).copied().unwrap_or(ParamRole::Free);
                Parameter::new(name, domain, role)
            })
            .collect();
        let space = ParameterSpace::new(params, self.constraints, self.constants)
            .map_err(|e| AnnotationError::malformed(e.to_string(), block.map(|b| b.span).unwrap_or_default()))?;

        Ok(TuningSpec {
            declared,
            space,
            inputs: self.inputs,
            build: self.build,
            counter: self.counter,
            search: self.search,
            validation: self.validation,
        })
    }

    fn analyze_section(&mut self, section: &Section) -> Result<()> {
        for item in &section.items {
            match (section.name.as_str(), item) {
                ("performance_params", Item::Param { name, is_list, value, span }) => {
                    self.declare_param(name, *is_list, value, *span)?
                }
                ("performance_params", Item::Constraint { name, expr, span }) => {
                    for used in expr.names() {
                        let known = self.params.iter().any(|(n, _, _)| *n == used) || self.constants.contains_key(&used);
                        if !known {
                            return Err(AnnotationError::malformed(
                                format!("constraint '{}' references undeclared name '{}'", name, used),
                                *span,
                            ));
                        }
                    }
                    self.constraints.push(Constraint::new(name.clone(), expr.clone()));
                }
                ("performance_params" | "input_params", Item::Let { name, value, span }) => {
                    let v = self.constant(value, *span)?;
                    self.constants.insert(name.clone(), v);
                }
                ("input_params", Item::Param { name, value, span, .. }) => {
                    let values = self.domain(value, *span)?;
                    if self.inputs.params.iter().any(|p| p.name == *name) {
                        return Err(AnnotationError::malformed(format!("input parameter '{}' is declared twice", name), *span));
                    }
                    self.constants.insert(name.clone(), values[0].clone());
                    self.inputs.params.push(InputParam { name: name.clone(), values });
                }
                ("input_vars", Item::Decl { is_static, ty, name, dims, init, span }) => {
                    self.declare_input_var(*is_static, ty, name, dims, init, *span)?
                }
                (_, Item::Arg { name, value, span }) => self.apply_arg(&section.name, name, value, *span)?,
                (section_name, other) => {
                    let what = match other {
                        Item::Param { .. } => "param",
                        Item::Constraint { .. } => "constraint",
                        Item::Let { .. } => "let",
                        Item::Arg { .. } => "arg",
                        Item::Decl { .. } => "decl",
                    };
                    return Err(AnnotationError::malformed(
                        format!("'{}' is not allowed in section '{}'", what, section_name),
                        other.span(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn declare_param(&mut self, name: &str, is_list: bool, value: &Expr, span: Span) -> Result<()> {
        if self.params.iter().any(|(n, _, _)| n == name) {
            return Err(AnnotationError::malformed(format!("parameter '{}' is declared twice", name), span));
        }
        if self.constants.contains_key(name) {
            return Err(AnnotationError::malformed(
                format!("parameter '{}' shadows a constant of the same name", name),
                span,
            ));
        }
        let domain = if is_list {
            if !is_domain_syntax(value) {
                return Err(AnnotationError::malformed(
                    format!("domain of '{}' must be a literal list or range, found '{}'", name, value),
                    value.span,
                ));
            }
            self.domain(value, span)?
        } else {
            vec![self.constant(value, span)?]
        };
        if domain.is_empty() {
            return Err(AnnotationError::malformed(format!("parameter '{}' has an empty domain", name), span));
        }
        debug!("parameter {} with {} values", name, domain.len());
        self.params.push((name.to_string(), domain, span));
        Ok(())
    }

    fn declare_input_var(&mut self, is_static: bool, ty: &str, name: &str, dims: &[Expr], init: &Expr, span: Span) -> Result<()> {
        let fill = match &init.kind {
            ExprKind::Name(n) if n == "random" => Fill::Random,
            _ => match self.constant(init, span)?.as_f64() {
                Some(v) if v == 0.0 => Fill::Zero,
                Some(v) => Fill::Constant(v),
                None => {
                    return Err(AnnotationError::malformed(
                        format!("initializer of '{}' must be 'random' or a number", name),
                        init.span,
                    ))
                }
            },
        };
        if dims.is_empty() {
            self.inputs.scalars.push(ScalarDecl { name: name.to_string(), elem_type: ty.to_string(), fill });
            return Ok(());
        }
        let mut extents = Vec::with_capacity(dims.len());
        for d in dims {
            match self.constant(d, span)?.as_int() {
                Some(n) if n > 0 => extents.push(n as usize),
                _ => {
                    return Err(AnnotationError::malformed(
                        format!("extent '{}' of array '{}' is not a positive integer", d, name),
                        d.span,
                    ))
                }
            }
        }
        self.inputs.arrays.push(ArrayDecl {
            name: name.to_string(),
            elem_type: ty.to_string(),
            dims: extents,
            fill,
            is_static,
        });
        Ok(())
    }

    fn apply_arg(&mut self, section: &str, name: &str, value: &Expr, span: Span) -> Result<()> {
        let unknown = || AnnotationError::malformed(format!("unknown argument '{}' in section '{}'", name, section), span);
        match (section, name) {
            ("build", "build_command") => self.build.command = Some(self.string(value, span)?),
            ("build", "libs") => self.build.libs = Some(self.string(value, span)?),
            ("performance_counter", "method") => self.counter.method = self.string(value, span)?,
            ("performance_counter", "repetitions") => self.counter.repetitions = self.positive(value, span)? as u32,
            ("search", "algorithm") => {
                let text = self.string(value, span)?;
                let algorithm = SearchAlgorithm::from_name(&text).ok_or_else(|| {
                    AnnotationError::malformed(format!("unsupported search algorithm '{}'", text), span)
                })?;
                self.search.algorithm = Some(algorithm);
            }
            ("search", "total_runs") => self.search.total_runs = Some(self.positive(value, span)? as usize),
            ("search", "time_limit") => {
                let v = self.constant(value, span)?;
                self.search.time_limit = Some(v.as_f64().ok_or_else(unknown)?);
            }
            ("search", "seed") => self.search.seed = Some(self.positive(value, span)? as u64),
            ("input_vars", "decl_file") => self.inputs.decl_file = Some(self.string(value, span)?),
            ("input_vars", "init_file") => self.inputs.init_file = Some(self.string(value, span)?),
            ("validation", "validation_file") => {
                let file = self.string(value, span)?;
                self.validation.get_or_insert_with(Default::default).validation_file = Some(file);
            }
            ("validation", "expected_output") => {
                let text = self.string(value, span)?;
                self.validation.get_or_insert_with(Default::default).expected_output = Some(text);
            }
            _ => return Err(unknown()),
        }
        Ok(())
    }

    fn bind_operands(&self, stmt: &mut Stmt, names: &BTreeSet<String>, roles: &mut BTreeMap<String, ParamRole>) -> Result<()> {
        match stmt {
            Stmt::Transform(block) => {
                let TransformBlock { directives, body, span, .. } = block.as_mut();
                for directive in directives.iter_mut() {
                    let kind = directive.name();
                    for (name, role) in directive.operands().into_iter().filter_map(|(op, role)| op.param_name().map(|n| (n.to_string(), role))) {
                        if names.contains(&name) {
                            roles.entry(name).or_insert(role);
                        } else if !self.constants.contains_key(&name) {
                            return Err(AnnotationError::malformed(
                                format!("directive '{}' references undeclared parameter '{}'", kind, name),
                                *span,
                            ));
                        }
                    }
                    self.fold_constants(directive, names);
                }
                for s in body.iter_mut() {
                    self.bind_operands(s, names, roles)?;
                }
            }
            Stmt::Loop(l) => {
                for s in l.body.iter_mut() {
                    self.bind_operands(s, names, roles)?;
                }
            }
            Stmt::Block(b) => {
                for s in b.iter_mut() {
                    self.bind_operands(s, names, roles)?;
                }
            }
            Stmt::If { then_branch, else_branch, .. } => {
                for s in then_branch.iter_mut().chain(else_branch.iter_mut()) {
                    self.bind_operands(s, names, roles)?;
                }
            }
            Stmt::Assign(_) | Stmt::Decl(_) | Stmt::Launch(_) => {}
        }
        Ok(())
    }

    /// Replace operands naming constants (not parameters) by their values.
    fn fold_constants(&self, directive: &mut Directive, params: &BTreeSet<String>) {
        let fold = |op: &mut Operand| {
            if let Operand::Param(name) = op {
                if !params.contains(name.as_str()) {
                    if let Some(v) = self.constants.get(name.as_str()) {
                        *op = Operand::Const(v.clone());
                    }
                }
            }
        };
        match directive {
            Directive::Tile(levels) => levels.iter_mut().for_each(|l| fold(&mut l.size)),
            Directive::UnrollJam(specs) | Directive::RegTile(specs) => {
                specs.iter_mut().for_each(|s| fold(&mut s.factor))
            }
            Directive::ScalarReplace { enabled, .. }
            | Directive::Vectorize { enabled, .. }
            | Directive::Parallelize { enabled, .. } => fold(enabled),
            Directive::Unroll { factor, parallelize } => {
                fold(factor);
                fold(parallelize);
            }
            Directive::DeviceLower(spec) => {
                fold(&mut spec.thread_count);
                for op in [&mut spec.block_count, &mut spec.max_blocks, &mut spec.prefer_l1, &mut spec.unroll_inner, &mut spec.stream_count, &mut spec.cache_blocks]
                    .into_iter()
                    .flatten()
                {
                    fold(op);
                }
            }
        }
    }

    fn env(&self) -> impl Fn(&str) -> Option<Value> + '_ {
        move |name: &str| self.constants.get(name).cloned()
    }

    fn constant(&self, expr: &Expr, span: Span) -> Result<Value> {
        let span = if expr.span.is_dummy() { span } else { expr.span };
        evaluate(expr, &self.env()).map_err(|e| AnnotationError::malformed(format!("cannot evaluate '{}': {}", expr, e), span))
    }

    fn string(&self, expr: &Expr, span: Span) -> Result<String> {
        match self.constant(expr, span)? {
            Value::Str(s) => Ok(s),
            other => Err(AnnotationError::malformed(format!("expected a string, found '{}'", other), expr.span)),
        }
    }

    fn positive(&self, expr: &Expr, span: Span) -> Result<i64> {
        match self.constant(expr, span)?.as_int() {
            Some(v) if v > 0 => Ok(v),
            _ => Err(AnnotationError::malformed(format!("expected a positive integer, found '{}'", expr), expr.span)),
        }
    }

    /// Expand a domain: a list, a `range(...)` call, a sum of those, or a
    /// single constant.
    fn domain(&self, expr: &Expr, span: Span) -> Result<Vec<Value>> {
        match &expr.kind {
            ExprKind::List(items) => items.iter().map(|e| self.constant(e, span)).collect(),
            ExprKind::Call { func, args } if func == "range" => {
                let bounds = args
                    .iter()
                    .map(|a| {
                        self.constant(a, span)?.as_int().ok_or_else(|| {
                            AnnotationError::malformed(format!("range bound '{}' is not an integer", a), a.span)
                        })
                    })
                    .collect::<Result<Vec<i64>>>()?;
                let (start, stop, step) = match bounds.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => return Err(AnnotationError::malformed("range takes 1 to 3 arguments", expr.span)),
                };
                if step == 0 {
                    return Err(AnnotationError::malformed("range step must not be zero", expr.span));
                }
                let mut out = Vec::new();
                let mut v = start;
                while (step > 0 && v < stop) || (step < 0 && v > stop) {
                    out.push(Value::Int(v));
                    v += step;
                }
                Ok(out)
            }
            ExprKind::Binary { op: crate::frontend::ast::BinaryOp::Add, left, right }
                if is_domain_syntax(left) || is_domain_syntax(right) =>
            {
                let mut out = self.domain(left, span)?;
                out.extend(self.domain(right, span)?);
                Ok(out)
            }
            _ => Ok(vec![self.constant(expr, span)?]),
        }
    }
}

impl Default for SemanticAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn is_domain_syntax(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::List(_) => true,
        ExprKind::Call { func, .. } => func == "range",
        ExprKind::Binary { op: crate::frontend::ast::BinaryOp::Add, left, right } => {
            is_domain_syntax(left) && is_domain_syntax(right)
        }
        _ => false,
    }
}

/// Names written as `@NAME` in a build command.
pub fn build_flag_names(command: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = command;
    while let Some(at) = rest.find('@') {
        let tail = &rest[at + 1..];
        let len = tail.find(|c: char| !(c.is_alphanumeric() || c == '_')).unwrap_or(tail.len());
        if len > 0 {
            out.push(tail[..len].to_string());
        }
        rest = &tail[len..];
    }
    out
}

// ----- transform arguments -----

/// Lower the arguments of `transform NAME(...)` into directives.
pub fn lower_transform(name: &str, args: &[TransformArg], span: Span) -> Result<Vec<Directive>> {
    match name {
        "Composite" => {
            let mut seen = BTreeSet::new();
            let mut out = Vec::with_capacity(args.len());
            for arg in args {
                if !COMPOSITE_KEYS.contains(&arg.name.as_str()) {
                    return Err(AnnotationError::unknown_directive(
                        format!("'{}' is not a supported Composite transformation", arg.name),
                        arg.span,
                    ));
                }
                if !seen.insert(arg.name.as_str()) {
                    return Err(AnnotationError::malformed(
                        format!("'{}' appears twice in one Composite transform", arg.name),
                        arg.span,
                    ));
                }
                out.push(lower_composite_arg(arg)?);
            }
            Ok(out)
        }
        "Unroll" => {
            let mut factor = None;
            let mut parallelize = Operand::Const(Value::Bool(false));
            for arg in args {
                match arg.name.as_str() {
                    "ufactor" => factor = Some(operand(&arg.value)?),
                    "parallelize" => parallelize = operand(&arg.value)?,
                    other => return Err(unknown_arg("Unroll", other, arg.span)),
                }
            }
            let factor = factor.ok_or_else(|| AnnotationError::malformed("Unroll requires 'ufactor'", span))?;
            Ok(vec![Directive::Unroll { factor, parallelize }])
        }
        "CUDA" => {
            let mut thread_count = None;
            let mut spec = DeviceSpec {
                thread_count: Operand::int(32),
                block_count: None,
                max_blocks: None,
                prefer_l1: None,
                unroll_inner: None,
                stream_count: None,
                cache_blocks: None,
            };
            for arg in args {
                let op = operand(&arg.value)?;
                match arg.name.as_str() {
                    "threadCount" => thread_count = Some(op),
                    "blockCount" => spec.block_count = Some(op),
                    "maxBlocks" => spec.max_blocks = Some(op),
                    "preferL1Size" => spec.prefer_l1 = Some(op),
                    "unrollInner" => spec.unroll_inner = Some(op),
                    "streamCount" => spec.stream_count = Some(op),
                    "cacheBlocks" => spec.cache_blocks = Some(op),
                    other => return Err(unknown_arg("CUDA", other, arg.span)),
                }
            }
            spec.thread_count = thread_count.ok_or_else(|| AnnotationError::malformed("CUDA requires 'threadCount'", span))?;
            Ok(vec![Directive::DeviceLower(spec)])
        }
        other => Err(AnnotationError::unknown_directive(format!("unknown transformation '{}'", other), span)),
    }
}

fn unknown_arg(transform: &str, name: &str, span: Span) -> AnnotationError {
    AnnotationError::malformed(format!("unknown argument '{}' for transform {}", name, transform), span)
}

fn lower_composite_arg(arg: &TransformArg) -> Result<Directive> {
    let value = &arg.value;
    match arg.name.as_str() {
        "tile" => {
            let levels = list_items(value, "tile")?
                .iter()
                .map(|level| match tuple_items(level) {
                    Some([loops, size, tile_var]) => Ok(TileLevel {
                        loops: loop_names(loops)?,
                        size: operand(size)?,
                        tile_var: string_lit(tile_var)?,
                    }),
                    _ => Err(AnnotationError::malformed(
                        format!("tile level must be (loop, size, tile_index), found '{}'", level),
                        level.span,
                    )),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Directive::Tile(levels))
        }
        "unrolljam" => Ok(Directive::UnrollJam(unroll_specs(value, "unrolljam")?)),
        "regtile" => Ok(Directive::RegTile(unroll_specs(value, "regtile")?)),
        "scalarreplace" => match tuple_items(value) {
            Some([flag, ty]) => Ok(Directive::ScalarReplace {
                enabled: operand(flag)?,
                elem_type: string_lit(ty)?,
                prefix: "scv_".to_string(),
            }),
            Some([flag, ty, prefix]) => Ok(Directive::ScalarReplace {
                enabled: operand(flag)?,
                elem_type: string_lit(ty)?,
                prefix: string_lit(prefix)?,
            }),
            Some(_) => Err(AnnotationError::malformed("scalarreplace takes (flag, type[, prefix])", value.span)),
            None => Ok(Directive::ScalarReplace {
                enabled: operand(value)?,
                elem_type: "double".to_string(),
                prefix: "scv_".to_string(),
            }),
        },
        "vector" => match tuple_items(value) {
            Some([flag, pragmas]) => Ok(Directive::Vectorize {
                enabled: operand(flag)?,
                pragmas: list_items(pragmas, "vector")?.iter().map(string_lit).collect::<Result<_>>()?,
            }),
            Some(_) => Err(AnnotationError::malformed("vector takes (flag, [pragmas])", value.span)),
            None => Ok(Directive::Vectorize { enabled: operand(value)?, pragmas: vec!["ivdep".to_string()] }),
        },
        "openmp" => match tuple_items(value) {
            Some([flag, pragma]) => Ok(Directive::Parallelize { enabled: operand(flag)?, pragma: string_lit(pragma)? }),
            Some(_) => Err(AnnotationError::malformed("openmp takes (flag, pragma)", value.span)),
            None => Ok(Directive::Parallelize {
                enabled: operand(value)?,
                pragma: "omp parallel for".to_string(),
            }),
        },
        other => Err(AnnotationError::unknown_directive(
            format!("'{}' is not a supported Composite transformation", other),
            arg.span,
        )),
    }
}

/// `(['i','j'], [Ui,Uj])` or `[('i',Ui), ('j',Uj)]`.
fn unroll_specs(value: &Expr, what: &str) -> Result<Vec<UnrollSpec>> {
    match tuple_items(value) {
        Some([loops, factors]) => {
            let loops = list_items(loops, what)?;
            let factors = list_items(factors, what)?;
            if loops.len() != factors.len() {
                return Err(AnnotationError::malformed(format!("{} needs one factor per loop", what), value.span));
            }
            loops
                .iter()
                .zip(factors)
                .map(|(l, f)| Ok(UnrollSpec { var: string_lit(l)?, factor: operand(f)? }))
                .collect()
        }
        _ => list_items(value, what)?
            .iter()
            .map(|pair| match tuple_items(pair) {
                Some([l, f]) => Ok(UnrollSpec { var: string_lit(l)?, factor: operand(f)? }),
                _ => Err(AnnotationError::malformed(
                    format!("{} entry must be (loop, factor), found '{}'", what, pair),
                    pair.span,
                )),
            })
            .collect(),
    }
}

fn operand(expr: &Expr) -> Result<Operand> {
    match &expr.kind {
        ExprKind::Int(v) => Ok(Operand::Const(Value::Int(*v))),
        ExprKind::Float(v) => Ok(Operand::Const(Value::Float(*v))),
        ExprKind::Bool(b) => Ok(Operand::Const(Value::Bool(*b))),
        ExprKind::Str(s) => Ok(Operand::Const(Value::Str(s.clone()))),
        ExprKind::Name(n) => Ok(Operand::Param(n.clone())),
        _ => Err(AnnotationError::malformed(
            format!("directive operand must be a literal or a parameter name, found '{}'", expr),
            expr.span,
        )),
    }
}

fn tuple_items(expr: &Expr) -> Option<&[Expr]> {
    match &expr.kind {
        ExprKind::Tuple(items) => Some(items),
        _ => None,
    }
}

fn list_items<'e>(expr: &'e Expr, what: &str) -> Result<&'e [Expr]> {
    match &expr.kind {
        ExprKind::List(items) | ExprKind::Tuple(items) => Ok(items),
        _ => Err(AnnotationError::malformed(format!("{} expects a list, found '{}'", what, expr), expr.span)),
    }
}

fn string_lit(expr: &Expr) -> Result<String> {
    match &expr.kind {
        ExprKind::Str(s) => Ok(s.clone()),
        _ => Err(AnnotationError::malformed(format!("expected a quoted name, found '{}'", expr), expr.span)),
    }
}

fn loop_names(expr: &Expr) -> Result<Vec<String>> {
    match &expr.kind {
        ExprKind::Str(s) => Ok(vec![s.clone()]),
        ExprKind::Tuple(items) | ExprKind::List(items) if !items.is_empty() => items.iter().map(string_lit).collect(),
        _ => Err(AnnotationError::malformed(format!("expected a loop name or a tuple of names, found '{}'", expr), expr.span)),
    }
}
