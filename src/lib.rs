//! # Looptune - Annotation-Driven Loop Transformation and Autotuning
//!
//! Reads C sources whose loop nests carry transformation annotations,
//! builds the space of tunable parameters they declare, and searches it
//! for the fastest variant:
//! - Annotation parsing (tuning specification and transform statements)
//! - Parameter space with constraints, enumeration and sampling
//! - Loop transformations (tiling, unroll-and-jam, scalar replacement,
//!   vectorization, parallelization, device lowering)
//! - Search driver with exhaustive, random and random-local strategies
//! - C, OpenMP and CUDA code generation with a timing harness
//!
//! ## Architecture
//!
//! ```text
//! Source → Frontend → Parameter Space ─┐
//!                   → Loop Nests ──────┴→ Transform → CodeGen / Interpreter → Search
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let source = looptune::frontend::parse(&text)?;
//! let config = source.tuning.space.configurations().next().unwrap();
//! let code = looptune::generate_code(&source, &config)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod autotuning;
pub mod codegen;
pub mod exec;
pub mod frontend;
pub mod ir;
pub mod space;
pub mod transform;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::autotuning::{
        AutoTuner, Builder, CommandBuilder, CommandMeasurer, InterpretedBackend, Measurer, SearchAlgorithm,
        Trial, TrialHistory, TuningConfig, TuningOutcome, TuningProblem,
    };
    pub use crate::codegen::Target;
    pub use crate::frontend::{parse, AnnotatedSource};
    pub use crate::ir::{Directive, LoopNest, Stmt};
    pub use crate::space::{Configuration, ParameterSpace, Value};
    pub use crate::transform::Transform;
    pub use crate::utils::errors::*;
}

use codegen::{SymbolTable, Target};
use frontend::AnnotatedSource;
use log::debug;
use space::Configuration;
use utils::errors::LooptuneError;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Realize every region of `source` for `config` and splice the
/// generated code back into the file.
pub fn generate_code(source: &AnnotatedSource, config: &Configuration) -> Result<String, LooptuneError> {
    let problem = autotuning::TuningProblem::from_source(source);
    let realized = problem.realize(config)?;
    let symbols = SymbolTable::from_inputs(&source.tuning.inputs, &source.host_bindings);

    let mut bodies = Vec::with_capacity(realized.len());
    let mut preludes = Vec::new();
    for (original, nest) in problem.originals().iter().zip(&realized) {
        let target = Target::for_nest(nest);
        debug!("region: generating {:?} code", target);
        let code = codegen::generate(nest, target, &symbols)?;
        bodies.push(codegen::region_body(original, nest, &code));
        preludes.push(code.prelude);
    }
    Ok(codegen::splice(source, &bodies, &preludes))
}
