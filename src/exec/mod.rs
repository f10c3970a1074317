//! Reference execution of loop nests.
//!
//! The interpreter runs a [`LoopNest`](crate::ir::LoopNest) over a
//! [`Workspace`] of scalars and arrays with C semantics for integer
//! arithmetic. It is used to check that transformed nests compute the same
//! values as the original and, in the interpreted backend, as a
//! measurement target that needs no compiler.

pub mod interpreter;
pub mod workspace;

pub use interpreter::Interpreter;
pub use workspace::{Array, Num, Workspace};
