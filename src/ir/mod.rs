//! Intermediate representation for annotated loop regions.
//!
//! This module defines:
//! - Expressions and array references (`expr`)
//! - Integer linear forms used for subscript analysis (`affine`)
//! - Statements, loops and device launches (`nest`)
//! - Typed transformation directives (`directive`)

pub mod affine;
pub mod directive;
pub mod expr;
pub mod nest;

pub use affine::LinearForm;
pub use directive::{DeviceSpec, Directive, Operand, TileLevel, UnrollSpec};
pub use expr::{Access, BinaryOp, Expr, UnaryOp};
pub use nest::{
    Assign, AssignOp, Decl, KernelLaunch, LValue, Loop, LoopAttrs, LoopNest, ParallelInfo,
    ReduceOp, Reduction, Stmt, TransformBlock,
};
