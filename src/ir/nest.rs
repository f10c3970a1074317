//! Statements and loop nests.
//!
//! A [`LoopNest`] is an immutable value: transformations take a nest by
//! reference and build a new one. Loop bounds are inclusive and steps are
//! positive, matching the `for (i=lb; i<=ub; i+=s)` form of annotated code.

use crate::ir::directive::Directive;
use crate::ir::expr::{Access, BinaryOp, Expr};
use crate::utils::location::Span;
use std::collections::BTreeSet;
use std::fmt;

/// Assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOp {
    /// `=`
    Set,
    /// `+=`
    Add,
    /// `-=`
    Sub,
    /// `*=`
    Mul,
    /// `/=`
    Div,
}

impl AssignOp {
    /// Binary operator applied by a compound assignment.
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Set => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
        }
    }
}

impl fmt::Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignOp::Set => write!(f, "="),
            AssignOp::Add => write!(f, "+="),
            AssignOp::Sub => write!(f, "-="),
            AssignOp::Mul => write!(f, "*="),
            AssignOp::Div => write!(f, "/="),
        }
    }
}

/// Target of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum LValue {
    /// Scalar variable
    Scalar(String),
    /// Array element
    Element(Access),
}

impl LValue {
    /// Scalar or array name.
    pub fn name(&self) -> &str {
        match self {
            LValue::Scalar(name) => name,
            LValue::Element(a) => &a.array,
        }
    }

    /// The target read as an expression.
    pub fn to_expr(&self) -> Expr {
        match self {
            LValue::Scalar(name) => Expr::Var(name.clone()),
            LValue::Element(a) => Expr::Access(a.clone()),
        }
    }

    fn substitute(&self, var: &str, with: &Expr) -> LValue {
        match self {
            LValue::Scalar(name) => LValue::Scalar(name.clone()),
            LValue::Element(a) => LValue::Element(a.substitute(var, with)),
        }
    }
}

impl fmt::Display for LValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LValue::Scalar(name) => write!(f, "{}", name),
            LValue::Element(a) => write!(f, "{}", a),
        }
    }
}

/// `target op value;`
#[derive(Debug, Clone, PartialEq)]
pub struct Assign {
    /// Written location
    pub target: LValue,
    /// Assignment operator
    pub op: AssignOp,
    /// Right-hand side
    pub value: Expr,
}

/// `type name = init;`
#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    /// C type name
    pub ty: String,
    /// Declared scalar
    pub name: String,
    /// Initializer
    pub init: Option<Expr>,
}

/// Associative operators usable in reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    /// Sum
    Add,
    /// Product
    Mul,
}

impl ReduceOp {
    /// Neutral element.
    pub fn identity(self) -> f64 {
        match self {
            ReduceOp::Add => 0.0,
            ReduceOp::Mul => 1.0,
        }
    }

    /// OpenMP clause symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            ReduceOp::Add => "+",
            ReduceOp::Mul => "*",
        }
    }
}

/// A reduction variable with its combine operator.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    /// Scalar or array name
    pub var: String,
    /// Combine operator
    pub op: ReduceOp,
}

/// Parallel execution info attached to a loop.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParallelInfo {
    /// Pragma text without the `#pragma` prefix
    pub pragma: String,
    /// Scalars private to each iteration
    pub private: Vec<String>,
    /// Reductions combined after the loop
    pub reductions: Vec<Reduction>,
}

/// Attributes set by transformations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoopAttrs {
    /// SIMD pragmas, when marked for vectorization
    pub vector: Option<Vec<String>>,
    /// Parallel info, when marked parallel
    pub parallel: Option<ParallelInfo>,
    /// 0 for point loops, n for the n-th tiling level
    pub tile_level: u32,
    /// Index of the loop this block loop tiles
    pub tiles: Option<String>,
    /// Bounds of the values the index can take, if tighter than the header
    pub range: Option<(Expr, Expr)>,
}

/// `for (var=lower; var<=upper; var+=step) body`
#[derive(Debug, Clone, PartialEq)]
pub struct Loop {
    /// Index variable
    pub var: String,
    /// First value
    pub lower: Expr,
    /// Last value (inclusive)
    pub upper: Expr,
    /// Positive increment
    pub step: i64,
    /// Loop body
    pub body: Vec<Stmt>,
    /// Transformation attributes
    pub attrs: LoopAttrs,
}

impl Loop {
    /// Create a plain loop.
    pub fn new(var: impl Into<String>, lower: Expr, upper: Expr, step: i64, body: Vec<Stmt>) -> Self {
        Self {
            var: var.into(),
            lower,
            upper,
            step,
            body,
            attrs: LoopAttrs::default(),
        }
    }

    /// Bounds that every value of the index lies within.
    pub fn value_range(&self) -> (Expr, Expr) {
        match &self.attrs.range {
            Some((lo, hi)) => (lo.clone(), hi.clone()),
            None => (self.lower.clone(), self.upper.clone()),
        }
    }

    /// `max(0, (upper-lower+step)/step)` as an expression.
    pub fn trip_count(&self) -> Expr {
        let span = Expr::add(Expr::sub(self.upper.clone(), self.lower.clone()), Expr::Int(self.step)).simplify();
        Expr::max(Expr::Int(0), Expr::div(span, Expr::Int(self.step))).simplify()
    }

    /// Trip count when both bounds are literals.
    pub fn constant_trip_count(&self) -> Option<i64> {
        let lo = self.lower.simplify().as_int()?;
        let hi = self.upper.simplify().as_int()?;
        Some(if hi < lo { 0 } else { (hi - lo) / self.step + 1 })
    }

    /// Check whether no loop or launch occurs in the body.
    pub fn is_innermost(&self) -> bool {
        !self.body.iter().any(Stmt::contains_loop)
    }

    /// Check whether the header (bounds and step) mentions `var`.
    pub fn header_mentions(&self, var: &str) -> bool {
        self.lower.mentions(var) || self.upper.mentions(var)
    }

    /// Same header and no transformation attributes.
    pub fn same_header(&self, other: &Loop) -> bool {
        self.var == other.var && self.lower == other.lower && self.upper == other.upper && self.step == other.step
    }
}

/// A loop lowered onto a (block, thread) device grid.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelLaunch {
    /// Kernel function name
    pub name: String,
    /// Index of the lowered loop
    pub var: String,
    /// First index value
    pub lower: Expr,
    /// Last index value (inclusive)
    pub upper: Expr,
    /// Index increment
    pub step: i64,
    /// Per-index kernel body
    pub body: Vec<Stmt>,
    /// Threads per block
    pub threads: i64,
    /// Blocks in the grid, evaluated on the host
    pub blocks: Expr,
    /// Number of streams splitting the index range
    pub streams: i64,
    /// Preferred L1 cache size in KB
    pub prefer_l1: Option<i64>,
    /// Stage per-thread array elements in shared memory
    pub cache_blocks: bool,
    /// Scalar reduction combined across threads
    pub reduction: Option<Reduction>,
    /// Scalars private to each thread
    pub private: Vec<String>,
}

/// A transform statement and the code it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformBlock {
    /// Transform name as written (`Composite`, `Unroll`, `CUDA`)
    pub name: String,
    /// Directives in application order
    pub directives: Vec<Directive>,
    /// Statements the directives apply to
    pub body: Vec<Stmt>,
    /// Location of the transform statement
    pub span: Span,
}

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Assignment
    Assign(Assign),
    /// Scalar declaration
    Decl(Decl),
    /// Counted loop
    Loop(Loop),
    /// `{ ... }`
    Block(Vec<Stmt>),
    /// Conditional
    If {
        /// Condition
        cond: Expr,
        /// Taken when the condition is non-zero
        then_branch: Vec<Stmt>,
        /// Taken otherwise
        else_branch: Vec<Stmt>,
    },
    /// Device kernel launch
    Launch(Box<KernelLaunch>),
    /// Unrealized transform statement
    Transform(Box<TransformBlock>),
}

impl Stmt {
    /// Convenience constructor for assignments.
    pub fn assign(target: LValue, op: AssignOp, value: Expr) -> Stmt {
        Stmt::Assign(Assign { target, op, value })
    }

    /// Check whether a loop or launch occurs in this statement.
    pub fn contains_loop(&self) -> bool {
        match self {
            Stmt::Loop(_) | Stmt::Launch(_) => true,
            Stmt::Assign(_) | Stmt::Decl(_) => false,
            Stmt::Block(b) => b.iter().any(Stmt::contains_loop),
            Stmt::If { then_branch, else_branch, .. } => {
                then_branch.iter().chain(else_branch).any(Stmt::contains_loop)
            }
            Stmt::Transform(t) => t.body.iter().any(Stmt::contains_loop),
        }
    }

    /// Replace variable `var` with `with` everywhere.
    pub fn substitute(&self, var: &str, with: &Expr) -> Stmt {
        let sub = |e: &Expr| e.substitute(var, with).simplify();
        let sub_all = |b: &[Stmt]| b.iter().map(|s| s.substitute(var, with)).collect::<Vec<_>>();
        match self {
            Stmt::Assign(a) => Stmt::Assign(Assign {
                target: a.target.substitute(var, with),
                op: a.op,
                value: sub(&a.value),
            }),
            Stmt::Decl(d) => Stmt::Decl(Decl {
                ty: d.ty.clone(),
                name: d.name.clone(),
                init: d.init.as_ref().map(sub),
            }),
            Stmt::Loop(l) => Stmt::Loop(Loop {
                var: l.var.clone(),
                lower: sub(&l.lower),
                upper: sub(&l.upper),
                step: l.step,
                body: sub_all(&l.body),
                attrs: LoopAttrs {
                    range: l.attrs.range.as_ref().map(|(lo, hi)| (sub(lo), sub(hi))),
                    ..l.attrs.clone()
                },
            }),
            Stmt::Block(b) => Stmt::Block(sub_all(b)),
            Stmt::If { cond, then_branch, else_branch } => Stmt::If {
                cond: sub(cond),
                then_branch: sub_all(then_branch),
                else_branch: sub_all(else_branch),
            },
            Stmt::Launch(k) => Stmt::Launch(Box::new(KernelLaunch {
                lower: sub(&k.lower),
                upper: sub(&k.upper),
                blocks: sub(&k.blocks),
                body: sub_all(&k.body),
                ..(**k).clone()
            })),
            Stmt::Transform(t) => Stmt::Transform(Box::new(TransformBlock {
                body: sub_all(&t.body),
                ..(**t).clone()
            })),
        }
    }

    /// Visit this statement and every nested statement, outermost first.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Stmt)) {
        f(self);
        match self {
            Stmt::Assign(_) | Stmt::Decl(_) => {}
            Stmt::Loop(l) => l.body.iter().for_each(|s| s.walk(f)),
            Stmt::Block(b) => b.iter().for_each(|s| s.walk(f)),
            Stmt::If { then_branch, else_branch, .. } => {
                then_branch.iter().chain(else_branch).for_each(|s| s.walk(f))
            }
            Stmt::Launch(k) => k.body.iter().for_each(|s| s.walk(f)),
            Stmt::Transform(t) => t.body.iter().for_each(|s| s.walk(f)),
        }
    }
}

/// A sequence of statements forming one annotated region.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoopNest {
    /// Top-level statements
    pub stmts: Vec<Stmt>,
}

impl LoopNest {
    /// Create a nest from statements.
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }

    /// Visit every statement.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Stmt)) {
        self.stmts.iter().for_each(|s| s.walk(f));
    }

    /// All loops, outermost first.
    pub fn loops(&self) -> Vec<&Loop> {
        let mut out = Vec::new();
        self.walk(&mut |s| {
            if let Stmt::Loop(l) = s {
                out.push(l);
            }
        });
        out
    }

    /// Check whether some loop has index `var`.
    pub fn has_loop(&self, var: &str) -> bool {
        self.loops().iter().any(|l| l.var == var)
    }

    /// Check whether any transform statement remains.
    pub fn has_transforms(&self) -> bool {
        let mut found = false;
        self.walk(&mut |s| found |= matches!(s, Stmt::Transform(_)));
        found
    }

    /// Drop every transform statement, keeping the code it wraps.
    pub fn without_transforms(&self) -> LoopNest {
        LoopNest::new(strip_transforms(&self.stmts))
    }

    /// Scalars assigned or declared anywhere in the nest.
    pub fn assigned_scalars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.walk(&mut |s| match s {
            Stmt::Assign(Assign { target: LValue::Scalar(name), .. }) => {
                out.insert(name.clone());
            }
            Stmt::Decl(d) => {
                out.insert(d.name.clone());
            }
            _ => {}
        });
        out
    }

    /// Arrays referenced anywhere in the nest.
    pub fn arrays(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut visit = |e: &Expr| e.for_each_access(&mut |a| {
            out.insert(a.array.clone());
        });
        self.walk(&mut |s| match s {
            Stmt::Assign(a) => {
                if let LValue::Element(acc) = &a.target {
                    visit(&Expr::Access(acc.clone()));
                }
                visit(&a.value);
            }
            Stmt::Decl(Decl { init: Some(e), .. }) => visit(e),
            Stmt::If { cond, .. } => visit(cond),
            _ => {}
        });
        out
    }
}

/// Remove transform statements, splicing in their bodies.
pub fn strip_transforms(stmts: &[Stmt]) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        match stmt {
            Stmt::Transform(t) => out.extend(strip_transforms(&t.body)),
            Stmt::Loop(l) => out.push(Stmt::Loop(Loop { body: strip_transforms(&l.body), ..l.clone() })),
            Stmt::Block(b) => out.push(Stmt::Block(strip_transforms(b))),
            Stmt::If { cond, then_branch, else_branch } => out.push(Stmt::If {
                cond: cond.clone(),
                then_branch: strip_transforms(then_branch),
                else_branch: strip_transforms(else_branch),
            }),
            other => out.push(other.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(name: &str) -> Expr {
        Expr::var(name)
    }

    fn axpy() -> Loop {
        let body = vec![Stmt::assign(
            LValue::Element(Access::new("y", vec![v("i")])),
            AssignOp::Add,
            Expr::mul(v("a"), Expr::Access(Access::new("x", vec![v("i")]))),
        )];
        Loop::new("i", Expr::Int(0), Expr::sub(v("N"), Expr::Int(1)), 1, body)
    }

    #[test]
    fn test_trip_count() {
        let l = Loop::new("i", Expr::Int(0), Expr::Int(9), 4, vec![]);
        assert_eq!(l.constant_trip_count(), Some(3));
        let l = Loop::new("i", Expr::Int(5), Expr::Int(4), 1, vec![]);
        assert_eq!(l.constant_trip_count(), Some(0));
        assert_eq!(axpy().trip_count().to_string(), "max(0,N)");
    }

    #[test]
    fn test_substitute_shifts_subscripts() {
        let stmt = Stmt::Loop(axpy()).substitute("N", &Expr::Int(8));
        match stmt {
            Stmt::Loop(l) => assert_eq!(l.upper, Expr::Int(7)),
            other => panic!("expected loop, got {:?}", other),
        }
    }

    #[test]
    fn test_strip_transforms() {
        let block = TransformBlock {
            name: "Composite".to_string(),
            directives: vec![],
            body: vec![Stmt::Loop(axpy())],
            span: Span::dummy(),
        };
        let nest = LoopNest::new(vec![Stmt::Transform(Box::new(block))]);
        assert!(nest.has_transforms());
        let plain = nest.without_transforms();
        assert!(!plain.has_transforms());
        assert!(plain.has_loop("i"));
    }

    #[test]
    fn test_arrays_and_scalars() {
        let mut body = axpy().body;
        body.push(Stmt::Decl(Decl { ty: "double".into(), name: "t".into(), init: Some(Expr::Float(0.0)) }));
        let nest = LoopNest::new(vec![Stmt::Loop(Loop { body, ..axpy() })]);
        let arrays = nest.arrays();
        assert!(arrays.contains("x") && arrays.contains("y"));
        assert!(nest.assigned_scalars().contains("t"));
        assert!(nest.loops()[0].is_innermost());
    }
}
