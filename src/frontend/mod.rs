//! Frontend: scanner, lexer, parser and semantic analysis of annotated
//! source files.
//!
//! An annotated file is ordinary C with annotation comments:
//!
//! ```text
//! /*@ begin PerfTuning (
//!   def performance_params {
//!     param T1[] = [1,16,32,64];
//!     param U1[] = [1]+range(2,17,2);
//!     constraint tiles = (T1 == 1 or T1 % U1 == 0);
//!   }
//!   def input_params { param N[] = [1000]; }
//! ) @*/
//! int n = N;
//! /*@ begin Loop (
//!   transform Composite(tile=[('i',T1,'ii')], unrolljam=(['i'],[U1]))
//!   for (i=0; i<=n-1; i++)
//!     y[i] = y[i] + a*x[i];
//! ) @*/
//! /*@ end @*/
//! /*@ end @*/
//! ```
//!
//! [`parse`] turns such a file into an [`AnnotatedSource`]: the tuning
//! specification with its parameter space and one [`LoopRegion`] per `Loop`
//! block.

pub mod token;
pub mod lexer;
pub mod ast;
pub mod scanner;
pub mod parser;
pub mod semantic;

// Re-exports
pub use lexer::Lexer;
pub use parser::Parser;
pub use token::{Token, TokenKind};

use crate::autotuning::search::SearchAlgorithm;
use crate::ir::expr::Expr;
use crate::ir::nest::{LoopNest, Stmt};
use crate::space::{ParameterSpace, Value};
use crate::utils::errors::AnnotationError;
use crate::utils::location::{SourceMap, Span};
use log::{debug, warn};
use scanner::Region;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::ops::Range;

/// Initial contents of an input array or scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Fill {
    /// Seeded uniform values in `[0, 1)`
    Random,
    /// All zeros
    Zero,
    /// Every element set to the value
    Constant(f64),
}

/// An input array declared with `decl`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArrayDecl {
    /// Array name
    pub name: String,
    /// Element type as written (`double`, `float`, `int`)
    pub elem_type: String,
    /// Extents, outermost first
    pub dims: Vec<usize>,
    /// Initial contents
    pub fill: Fill,
    /// Declared `static`
    pub is_static: bool,
}

impl ArrayDecl {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    /// Check whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A scalar input declared with `decl`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalarDecl {
    /// Scalar name
    pub name: String,
    /// Type as written
    pub elem_type: String,
    /// Initial value
    pub fill: Fill,
}

/// An input parameter (problem size) and its values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputParam {
    /// Parameter name
    pub name: String,
    /// Declared values; the first is used
    pub values: Vec<Value>,
}

/// Problem sizes and input variables.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct InputSpec {
    /// `input_params` parameters
    pub params: Vec<InputParam>,
    /// Input arrays
    pub arrays: Vec<ArrayDecl>,
    /// Input scalars
    pub scalars: Vec<ScalarDecl>,
    /// External declaration file, if given
    pub decl_file: Option<String>,
    /// External initialization file, if given
    pub init_file: Option<String>,
}

impl InputSpec {
    /// Input parameters bound to their first value.
    pub fn constants(&self) -> BTreeMap<String, Value> {
        self.params
            .iter()
            .filter_map(|p| p.values.first().map(|v| (p.name.clone(), v.clone())))
            .collect()
    }

    /// Look up an array declaration.
    pub fn array(&self, name: &str) -> Option<&ArrayDecl> {
        self.arrays.iter().find(|a| a.name == name)
    }
}

/// `def build` settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BuildSettings {
    /// Compiler invocation with `@PARAM` placeholders
    pub command: Option<String>,
    /// Extra link arguments
    pub libs: Option<String>,
}

/// `def performance_counter` settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterSettings {
    /// Timing method as written
    pub method: String,
    /// Timed repetitions per trial
    pub repetitions: u32,
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self { method: "basic timer".to_string(), repetitions: 1 }
    }
}

/// `def search` settings; unset fields fall back to the tuning config.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SearchSettings {
    /// Strategy
    pub algorithm: Option<SearchAlgorithm>,
    /// Trial budget
    pub total_runs: Option<usize>,
    /// Wall-clock limit in minutes
    pub time_limit: Option<f64>,
    /// RNG seed
    pub seed: Option<u64>,
}

/// `def validation` settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ValidationSettings {
    /// Reference implementation file
    pub validation_file: Option<String>,
    /// Expected program output
    pub expected_output: Option<String>,
}

/// Everything the `PerfTuning` block declares.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningSpec {
    /// Whether the file has a `PerfTuning` block at all
    pub declared: bool,
    /// Performance parameters and constraints
    pub space: ParameterSpace,
    /// Problem sizes and input variables
    pub inputs: InputSpec,
    /// Build settings
    pub build: BuildSettings,
    /// Measurement settings
    pub counter: CounterSettings,
    /// Search settings
    pub search: SearchSettings,
    /// Validation settings, if the section is present
    pub validation: Option<ValidationSettings>,
}

/// A kernel-level name bound by a host declaration (`int n = N;`).
#[derive(Debug, Clone, PartialEq)]
pub struct HostBinding {
    /// Variable name
    pub name: String,
    /// Initializer
    pub value: Expr,
}

/// One `Loop` block.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopRegion {
    /// Position among the file's loop regions
    pub index: usize,
    /// Parsed loop code with transform statements
    pub nest: LoopNest,
    /// Location of the `begin Loop` marker
    pub span: Span,
    /// Byte range between the markers, replaced by generated code
    pub placeholder: Range<usize>,
    /// Byte range of the `begin Loop` marker
    pub header: Range<usize>,
}

/// A parsed annotated source file.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedSource {
    /// Tuning specification
    pub tuning: TuningSpec,
    /// Loop regions in source order
    pub regions: Vec<LoopRegion>,
    /// Host declarations outside the annotations
    pub host_bindings: Vec<HostBinding>,
    /// The original file
    pub source: String,
}

impl AnnotatedSource {
    /// Human-readable description of the tuning problem.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let space = &self.tuning.space;
        let _ = writeln!(out, "parameters ({} raw configurations):", space.size());
        for p in space.params() {
            let values: Vec<String> = p.domain.iter().map(Value::to_string).collect();
            let _ = writeln!(out, "  {:<12} {:<15} [{}]", p.name, p.role.to_string(), values.join(", "));
        }
        if !space.constraints().is_empty() {
            let _ = writeln!(out, "constraints:");
            for c in space.constraints() {
                let _ = writeln!(out, "  {} = {}", c.name, c.expr);
            }
        }
        let inputs = &self.tuning.inputs;
        if !inputs.params.is_empty() {
            let _ = writeln!(out, "inputs:");
            for p in &inputs.params {
                let values: Vec<String> = p.values.iter().map(Value::to_string).collect();
                let _ = writeln!(out, "  {} = [{}]", p.name, values.join(", "));
            }
        }
        for a in &inputs.arrays {
            let dims: Vec<String> = a.dims.iter().map(|d| format!("[{}]", d)).collect();
            let _ = writeln!(out, "  {} {}{} ({:?})", a.elem_type, a.name, dims.concat(), a.fill);
        }
        for b in &self.host_bindings {
            let _ = writeln!(out, "  host {} = {}", b.name, b.value);
        }
        if let Some(cmd) = &self.tuning.build.command {
            let _ = writeln!(out, "build: {}", cmd);
        }
        let search = &self.tuning.search;
        if let Some(alg) = search.algorithm {
            let _ = writeln!(out, "search: {} runs={:?}", alg, search.total_runs);
        }
        for region in &self.regions {
            let _ = writeln!(out, "region {} at line {}:", region.index, region.span.start_line);
            region.nest.walk(&mut |s| {
                if let Stmt::Transform(t) = s {
                    for d in &t.directives {
                        let _ = writeln!(out, "  {}: {}", t.name, d);
                    }
                }
            });
        }
        out
    }
}

/// Parse an annotated source file.
///
/// Fails with `MalformedAnnotation` or `UnknownDirective`; the error span
/// points into `source`.
pub fn parse(source: &str) -> Result<AnnotatedSource, AnnotationError> {
    let map = SourceMap::new(source);
    let top = scanner::scan(&map)?;

    let mut tuning_region: Option<&Region> = None;
    let mut loop_regions: Vec<&Region> = Vec::new();
    for region in &top {
        match region.name.as_str() {
            "PerfTuning" => {
                if tuning_region.is_some() {
                    return Err(AnnotationError::malformed(
                        "a file may contain only one PerfTuning block",
                        region.span,
                    ));
                }
                for child in &region.children {
                    check_loop_region(child)?;
                    loop_regions.push(child);
                }
                tuning_region = Some(region);
            }
            _ => {
                check_loop_region(region)?;
                loop_regions.push(region);
            }
        }
    }
    if loop_regions.is_empty() {
        let span = tuning_region.map(|r| r.span).unwrap_or_else(|| map.span(0, 0));
        return Err(AnnotationError::malformed("no Loop block found", span));
    }

    let block = tuning_region
        .map(|r| {
            let origin = map.offset_to_location(r.body.start);
            Parser::with_origin(&source[r.body.clone()], origin)?.parse_tuning_block()
        })
        .transpose()?;

    let mut codes = Vec::with_capacity(loop_regions.len());
    for region in &loop_regions {
        let origin = map.offset_to_location(region.body.start);
        let stmts = Parser::with_origin(&source[region.body.clone()], origin)?.parse_loop_code()?;
        if stmts.is_empty() {
            return Err(AnnotationError::malformed("Loop block has no code", region.span));
        }
        codes.push(stmts);
    }

    let tuning = semantic::SemanticAnalyzer::new().analyze(block.as_ref(), &mut codes)?;
    for p in tuning.inputs.params.iter().filter(|p| p.values.len() > 1) {
        warn!("input parameter '{}' has {} values; using {}", p.name, p.values.len(), p.values[0]);
    }

    let regions: Vec<LoopRegion> = loop_regions
        .iter()
        .zip(codes)
        .enumerate()
        .map(|(index, (region, stmts))| LoopRegion {
            index,
            nest: LoopNest::new(stmts),
            span: region.span,
            placeholder: region.content(),
            header: region.begin.clone(),
        })
        .collect();

    let host_bindings = host_bindings(source, &map, &top);
    debug!(
        "parsed {} loop region(s), {} parameter(s), {} host binding(s)",
        regions.len(),
        tuning.space.params().len(),
        host_bindings.len()
    );

    Ok(AnnotatedSource { tuning, regions, host_bindings, source: source.to_string() })
}

fn check_loop_region(region: &Region) -> Result<(), AnnotationError> {
    match region.name.as_str() {
        "Loop" => match region.children.first() {
            Some(child) => Err(AnnotationError::malformed("blocks cannot be nested inside a Loop block", child.span)),
            None => Ok(()),
        },
        "PerfTuning" => Err(AnnotationError::malformed("PerfTuning blocks cannot be nested", region.span)),
        other => Err(AnnotationError::unknown_directive(
            format!("unknown annotation block '{}'", other),
            region.span,
        )),
    }
}

/// Collect `int name = value` declarations outside the annotations.
/// Text that does not parse as such a declaration is skipped.
fn host_bindings(source: &str, map: &SourceMap, regions: &[Region]) -> Vec<HostBinding> {
    let mut out = Vec::new();
    for segment in scanner::host_segments(source.len(), regions) {
        let text = &source[segment.clone()];
        let ends = text
            .char_indices()
            .filter(|(_, c)| matches!(c, ';' | '{' | '}'))
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()));
        let mut start = 0;
        for end in ends {
            let piece = &text[start..end];
            let piece_start = start;
            start = end + 1;
            let trimmed = piece.trim();
            if !trimmed.starts_with("int ") {
                continue;
            }
            let lead = piece.len() - piece.trim_start().len();
            let origin = map.offset_to_location(segment.start + piece_start + lead);
            let parsed = Parser::with_origin(trimmed, origin).and_then(|mut p| p.parse_host_declaration());
            if let Ok(decls) = parsed {
                out.extend(decls.into_iter().map(|(name, value)| HostBinding { name, value }));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::AnnotationErrorKind;

    const AXPY: &str = r#"
void axpy(int n, double a, double *y, double *x) {
/*@ begin PerfTuning (
  def build { arg build_command = 'gcc -O3 @CFLAGS'; }
  def performance_counter { arg repetitions = 5; }
  def performance_params {
    param U[] = [1]+range(2,9,2);
    param VEC[] = [False,True];
    param CFLAGS[] = ['-O1','-O3'];
  }
  def input_params { param N[] = [1000, 2000]; }
  def input_vars {
    decl static double y[N] = 0;
    decl static double x[N] = random;
    decl double a = 1.5;
  }
  def search { arg algorithm = 'Randomlocal'; arg total_runs = 10; }
) @*/
int i;
int nn = N;
/*@ begin Loop (
  transform Composite(unrolljam=(['i'],[U]), vector=(VEC,['ivdep']))
  for (i=0; i<=nn-1; i++)
    y[i] = y[i] + a*x[i];
) @*/
for (i=0; i<=nn-1; i++) y[i] = y[i] + a*x[i];
/*@ end @*/
/*@ end @*/
}
"#;

    #[test]
    fn test_parse_axpy() {
        let parsed = parse(AXPY).unwrap();
        assert!(parsed.tuning.declared);
        assert_eq!(parsed.tuning.space.params().len(), 3);
        assert_eq!(parsed.tuning.space.size(), 5 * 2 * 2);
        assert_eq!(parsed.tuning.counter.repetitions, 5);
        assert_eq!(parsed.tuning.search.algorithm, Some(SearchAlgorithm::RandomLocal));
        assert_eq!(parsed.regions.len(), 1);
        assert_eq!(parsed.regions[0].span.start_line, 21);
        assert!(AXPY[parsed.regions[0].placeholder.clone()].contains("for (i=0"));
        assert_eq!(parsed.tuning.inputs.constants()["N"], Value::Int(1000));
        assert_eq!(parsed.tuning.inputs.arrays.len(), 2);
        assert_eq!(parsed.host_bindings.len(), 1);
        assert_eq!(parsed.host_bindings[0].name, "nn");
        assert_eq!(parsed.host_bindings[0].value.to_string(), "N");
    }

    #[test]
    fn test_parse_is_idempotent() {
        assert_eq!(parse(AXPY).unwrap(), parse(AXPY).unwrap());
    }

    #[test]
    fn test_loop_only_file() {
        let src = "/*@ begin Loop(transform Unroll(ufactor=4) for (i=0; i<=9; i++) s = s + a[i]; ) @*/\n/*@ end @*/\n";
        let parsed = parse(src).unwrap();
        assert!(!parsed.tuning.declared);
        assert_eq!(parsed.tuning.space.size(), 1);
        assert!(parsed.regions[0].nest.has_transforms());
    }

    #[test]
    fn test_unknown_block() {
        let err = parse("/*@ begin Tune ( ) @*/\n/*@ end @*/").unwrap_err();
        assert_eq!(err.kind, AnnotationErrorKind::UnknownDirective);
    }

    #[test]
    fn test_error_location_in_file() {
        let src = "int x;\n/*@ begin Loop (\n  for (i=0; i<=9; i++)\n    a[i] = ;\n) @*/\n/*@ end @*/\n";
        let err = parse(src).unwrap_err();
        assert_eq!(err.kind, AnnotationErrorKind::MalformedAnnotation);
        assert_eq!(err.span.start_line, 4);
    }

    #[test]
    fn test_no_loop_block() {
        let src = "/*@ begin PerfTuning ( def search { arg total_runs = 2; } ) @*/\n/*@ end @*/";
        assert!(parse(src).is_err());
    }
}
