//! Error types for the tuning engine.
//!
//! This module defines all error types used throughout the crate,
//! organized by the phase that produces them. Parse-time errors are fatal
//! to one file, space and tuning errors are fatal to one run, and
//! transform, build and measure errors only fail a single trial.

use thiserror::Error;
use crate::utils::location::{SourceMap, Span};
use std::fmt;
use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Error, Debug)]
pub enum LooptuneError {
    /// Error in an annotation block
    #[error("{0}")]
    Annotation(#[from] AnnotationError),

    /// Error in the parameter space
    #[error("Parameter space error: {0}")]
    Space(#[from] SpaceError),

    /// Error while transforming a loop nest
    #[error("Transformation error: {0}")]
    Transform(#[from] TransformError),

    /// Error while interpreting a loop nest
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Error during code generation
    #[error("Code generation error: {0}")]
    Codegen(#[from] CodegenError),

    /// Error from the search driver
    #[error("Tuning error: {0}")]
    Tuning(#[from] TuningError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error during lexical analysis.
#[derive(Error, Debug, Clone)]
pub struct LexerError {
    /// The error message
    pub message: String,
    /// Location in source
    pub span: Span,
    /// The kind of lexer error
    pub kind: LexerErrorKind,
}

impl fmt::Display for LexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

/// Kinds of lexer errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexerErrorKind {
    /// Unexpected character
    UnexpectedChar,
    /// Unterminated string literal
    UnterminatedString,
    /// Invalid number literal
    InvalidNumber,
}

/// Error in an annotation block.
#[derive(Error, Debug, Clone)]
pub struct AnnotationError {
    /// The error message
    pub message: String,
    /// Location in source
    pub span: Span,
    /// The kind of annotation error
    pub kind: AnnotationErrorKind,
}

impl AnnotationError {
    /// A structurally invalid annotation.
    pub fn malformed(message: impl Into<String>, span: Span) -> Self {
        Self { message: message.into(), span, kind: AnnotationErrorKind::MalformedAnnotation }
    }

    /// A transformation or block name outside the supported set.
    pub fn unknown_directive(message: impl Into<String>, span: Span) -> Self {
        Self { message: message.into(), span, kind: AnnotationErrorKind::UnknownDirective }
    }

    /// Render as a diagnostic against the file it came from.
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(format!("{}: {}", self.kind, self.message)).with_span(self.span)
    }
}

impl fmt::Display for AnnotationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} at {}", self.kind, self.message, self.span)
    }
}

impl From<LexerError> for AnnotationError {
    fn from(err: LexerError) -> Self {
        AnnotationError::malformed(err.message, err.span)
    }
}

/// Kinds of annotation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationErrorKind {
    /// Unterminated block, bad syntax or an undeclared name
    MalformedAnnotation,
    /// Transformation name not in the supported set
    UnknownDirective,
}

impl fmt::Display for AnnotationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationErrorKind::MalformedAnnotation => write!(f, "malformed annotation"),
            AnnotationErrorKind::UnknownDirective => write!(f, "unknown directive"),
        }
    }
}

/// Errors raised by the parameter space model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpaceError {
    /// A candidate binding fails a constraint
    #[error("constraint '{name}' violated by {config}")]
    ConstraintViolation {
        /// Name of the first failing constraint
        name: String,
        /// The rejected binding, as key=value pairs
        config: String,
    },

    /// Rejection sampling gave up
    #[error("no valid configuration found after {attempts} attempts")]
    SpaceExhausted {
        /// Number of candidates drawn
        attempts: usize,
    },

    /// Binding names a parameter that does not exist, or misses one
    #[error("parameter '{0}' is not part of the space")]
    UnknownParameter(String),

    /// Binding lacks a value for a parameter
    #[error("parameter '{0}' is unbound")]
    MissingParameter(String),

    /// Value is not a member of the parameter's domain
    #[error("value {value} is outside the domain of '{name}'")]
    OutOfDomain {
        /// Parameter name
        name: String,
        /// Offending value
        value: String,
    },

    /// Constraint expression could not be evaluated
    #[error("constraint '{name}' cannot be evaluated: {message}")]
    Evaluation {
        /// Constraint name
        name: String,
        /// Evaluation failure
        message: String,
    },

    /// Parameter declared with an empty domain
    #[error("parameter '{0}' has an empty domain")]
    EmptyDomain(String),

    /// Two parameters share a name
    #[error("parameter '{0}' is declared twice")]
    DuplicateParameter(String),
}

/// Error during transformation.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct TransformError {
    /// The error message
    pub message: String,
    /// The kind of transformation error
    pub kind: TransformErrorKind,
    /// The transformation that failed
    pub transform: String,
}

impl TransformError {
    /// Create a new transformation error.
    pub fn new(kind: TransformErrorKind, transform: &str, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind, transform: transform.to_string() }
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} in {}", self.kind, self.message, self.transform)
    }
}

/// Kinds of transformation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformErrorKind {
    /// A dependence is carried by a loop marked for SIMD
    UnsafeVectorization,
    /// A cross-iteration dependence on a loop marked parallel
    UnsafeParallelization,
    /// The new iteration order reverses a dependence
    IllegalTransform,
    /// Tile size incompatible with the loop step
    InvalidTileSize,
    /// Unroll factor or device geometry value out of range
    InvalidFactor,
    /// Directive names a loop absent from the nest
    LoopNotFound,
    /// Operand names a parameter missing from the configuration
    UnboundParameter,
    /// Loop shape the transformation cannot handle
    UnsupportedLoop,
}

impl fmt::Display for TransformErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransformErrorKind::UnsafeVectorization => "UnsafeVectorization",
            TransformErrorKind::UnsafeParallelization => "UnsafeParallelization",
            TransformErrorKind::IllegalTransform => "IllegalTransform",
            TransformErrorKind::InvalidTileSize => "InvalidTileSize",
            TransformErrorKind::InvalidFactor => "InvalidFactor",
            TransformErrorKind::LoopNotFound => "LoopNotFound",
            TransformErrorKind::UnboundParameter => "UnboundParameter",
            TransformErrorKind::UnsupportedLoop => "UnsupportedLoop",
        };
        write!(f, "{}", name)
    }
}

/// Error raised by the loop nest interpreter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecError {
    /// Read of a name with no value
    #[error("variable '{0}' is unbound")]
    UnboundVariable(String),

    /// Access to an array that was never allocated
    #[error("array '{0}' is not allocated")]
    UnknownArray(String),

    /// Subscript outside the array extent
    #[error("index {index:?} out of bounds for '{array}' with dims {dims:?}")]
    OutOfBounds {
        /// Array name
        array: String,
        /// Evaluated subscripts
        index: Vec<i64>,
        /// Array extents
        dims: Vec<usize>,
    },

    /// Subscript count differs from the array rank
    #[error("array '{array}' has rank {rank} but is indexed with {given} subscripts")]
    RankMismatch {
        /// Array name
        array: String,
        /// Declared rank
        rank: usize,
        /// Subscripts in the access
        given: usize,
    },

    /// Integer division or modulo by zero
    #[error("integer division by zero")]
    DivisionByZero,

    /// Loop bound or subscript evaluated to a non-integer
    #[error("expected an integer for {0}")]
    NotAnInteger(String),

    /// Construct the interpreter does not execute
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    /// The run executed more statements than allowed
    #[error("step limit of {0} statements exceeded")]
    StepLimit(u64),
}

/// Error during code generation.
#[derive(Error, Debug, Clone)]
pub struct CodegenError {
    /// The error message
    pub message: String,
    /// The kind of codegen error
    pub kind: CodegenErrorKind,
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Kinds of code generation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodegenErrorKind {
    /// Construct cannot be emitted for the chosen target
    UnsupportedTarget,
    /// Input declaration the harness cannot materialize
    UnsupportedInput,
}

/// Failure of the build collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    /// Source could not be produced for this configuration
    #[error("code generation failed: {0}")]
    Codegen(String),

    /// Compiler exited with failure
    #[error("compiler exited with {status}: {stderr}")]
    Compiler {
        /// Exit status description
        status: String,
        /// Captured standard error
        stderr: String,
    },

    /// Compilation exceeded the trial timeout
    #[error("build timed out after {0:?}")]
    Timeout(Duration),

    /// I/O failure writing sources or spawning the compiler
    #[error("build I/O failure: {0}")]
    Io(String),

    /// Any other build failure
    #[error("{0}")]
    Other(String),
}

/// Failure of the measurement collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeasureError {
    /// The binary crashed or returned non-zero
    #[error("execution failed: {0}")]
    Execution(String),

    /// No timing line in the output
    #[error("no timing found in program output")]
    NoTiming,

    /// Run exceeded the trial timeout
    #[error("measurement timed out after {0:?}")]
    Timeout(Duration),

    /// Outputs differ from the reference computation
    #[error("validation failed: {0}")]
    Validation(String),

    /// Binary kind not understood by this measurer
    #[error("unsupported binary: {0}")]
    Unsupported(String),
}

/// Errors surfaced by the search driver.
#[derive(Error, Debug)]
pub enum TuningError {
    /// Sampling failed; fatal to the run
    #[error(transparent)]
    Space(#[from] SpaceError),

    /// Every trial in the budget failed
    #[error("no viable configuration: all {trials} trials failed")]
    NoViableConfiguration {
        /// Trials attempted
        trials: usize,
    },

    /// Problem could not be prepared for tuning
    #[error("invalid tuning problem: {0}")]
    InvalidProblem(String),

    /// Trial log could not be written
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A diagnostic message with severity level.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level
    pub severity: DiagnosticSeverity,
    /// Message
    pub message: String,
    /// Primary span
    pub span: Option<Span>,
    /// Additional notes
    pub notes: Vec<String>,
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    /// Processing of the file stops
    Error,
    /// Processing continues
    Warning,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    /// Create a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    /// Add a span to the diagnostic.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Add a note to the diagnostic.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Render with the offending source line and a caret.
    pub fn render(&self, file: &str, map: &SourceMap) -> String {
        let label = match self.severity {
            DiagnosticSeverity::Error => "error",
            DiagnosticSeverity::Warning => "warning",
        };
        let mut out = format!("{}: {}\n", label, self.message);
        if let Some(span) = self.span.filter(|s| !s.is_dummy()) {
            out.push_str(&format!("  --> {}:{}:{}\n", file, span.start_line, span.start_column));
            if let Some(line) = map.line(span.start_line) {
                let gutter = span.start_line.to_string();
                out.push_str(&format!("{} | {}\n", gutter, line));
                let pad = " ".repeat(gutter.len() + 3 + span.start_column.saturating_sub(1));
                out.push_str(&format!("{}^\n", pad));
            }
        }
        for note in &self.notes {
            out.push_str(&format!("  = note: {}\n", note));
        }
        out
    }
}

/// Result type using LooptuneError.
pub type LooptuneResult<T> = Result<T, LooptuneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation_error_display() {
        let err = AnnotationError::malformed("unterminated block 'Loop'", Span::new(3, 1, 3, 9));
        let s = format!("{}", err);
        assert!(s.contains("malformed annotation"));
        assert!(s.contains("3:1-9"));
    }

    #[test]
    fn test_lexer_error_becomes_malformed() {
        let lex = LexerError {
            message: "Unterminated string".to_string(),
            span: Span::new(1, 1, 1, 4),
            kind: LexerErrorKind::UnterminatedString,
        };
        let err: AnnotationError = lex.into();
        assert_eq!(err.kind, AnnotationErrorKind::MalformedAnnotation);
    }

    #[test]
    fn test_transform_error_names_kind() {
        let err = TransformError::new(
            TransformErrorKind::UnsafeVectorization,
            "vector",
            "loop 'i' carries a dependence on 'x'",
        );
        assert!(err.to_string().starts_with("UnsafeVectorization"));
    }

    #[test]
    fn test_diagnostic_render() {
        let map = SourceMap::new("line one\n  transform Bogus()\n");
        let diag = Diagnostic::error("unknown directive 'Bogus'")
            .with_span(Span::from_locations(map.offset_to_location(21), map.offset_to_location(26)))
            .with_note("supported: Composite, Unroll, CUDA");
        let text = diag.render("k.c", &map);
        assert!(text.contains("k.c:2:13"));
        assert!(text.contains("transform Bogus()"));
        assert!(text.contains("note: supported"));
    }
}
