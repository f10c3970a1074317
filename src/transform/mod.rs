//! Loop transformations driven by directives.
//!
//! Every transformation is a pure function from statements to new
//! statements: [`apply`] runs one directive on a nest and [`realize`]
//! replaces every transform statement of a region by the code its
//! directives produce, innermost transform statements first.

pub mod device;
pub mod parallelize;
pub mod scalar_replace;
pub mod tiling;
pub mod unrolling;
pub mod vectorize;

pub use device::DeviceLowering;
pub use parallelize::Parallelization;
pub use scalar_replace::ScalarReplacement;
pub use tiling::Tiling;
pub use unrolling::{RegisterTiling, Unroll, UnrollJam};
pub use vectorize::Vectorization;

use crate::ir::directive::Directive;
use crate::ir::nest::{Loop, LoopNest, Stmt};
use crate::space::Configuration;
use crate::utils::errors::{TransformError, TransformErrorKind};
use log::debug;

/// Transformation pass trait.
pub trait Transform {
    /// Apply to the statements of one transform block, which sits inside
    /// the loops `outer` (outermost first).
    fn apply(&self, stmts: &[Stmt], outer: &[&Loop]) -> Result<Vec<Stmt>, TransformError>;

    /// Get transformation name.
    fn name(&self) -> &str;
}

/// Resolve a directive's operands and build the transformation.
pub fn build(directive: &Directive, config: &Configuration) -> Result<Box<dyn Transform>, TransformError> {
    let name = directive.name();
    Ok(match directive {
        Directive::Tile(levels) => Box::new(Tiling::resolve(levels, config)?),
        Directive::UnrollJam(specs) => Box::new(UnrollJam::resolve(specs, config)?),
        Directive::RegTile(specs) => Box::new(RegisterTiling(UnrollJam::resolve(specs, config)?)),
        Directive::ScalarReplace { enabled, elem_type, prefix } => Box::new(ScalarReplacement {
            enabled: enabled.resolve_flag(config, name)?,
            elem_type: elem_type.clone(),
            prefix: prefix.clone(),
        }),
        Directive::Vectorize { enabled, pragmas } => Box::new(Vectorization {
            enabled: enabled.resolve_flag(config, name)?,
            pragmas: pragmas.clone(),
        }),
        Directive::Parallelize { enabled, pragma } => Box::new(Parallelization {
            enabled: enabled.resolve_flag(config, name)?,
            pragma: pragma.clone(),
        }),
        Directive::Unroll { factor, parallelize } => Box::new(Unroll {
            factor: factor.resolve_int(config, name)?,
            parallelize: parallelize.resolve_flag(config, name)?,
        }),
        Directive::DeviceLower(spec) => Box::new(DeviceLowering::resolve(spec, config, "kernel")?),
    })
}

/// Apply one directive to a whole nest.
pub fn apply(nest: &LoopNest, directive: &Directive, config: &Configuration) -> Result<LoopNest, TransformError> {
    let transform = build(directive, config)?;
    Ok(LoopNest::new(transform.apply(&nest.stmts, &[])?))
}

/// Realize every transform statement of a nest.
pub fn realize(nest: &LoopNest, config: &Configuration) -> Result<LoopNest, TransformError> {
    Realizer::new(config).realize(nest)
}

/// Replaces transform statements by transformed code.
pub struct Realizer<'c> {
    config: &'c Configuration,
    kernel_prefix: String,
    kernels: usize,
}

impl<'c> Realizer<'c> {
    /// Create a realizer for one configuration.
    pub fn new(config: &'c Configuration) -> Self {
        Self { config, kernel_prefix: "kernel".to_string(), kernels: 0 }
    }

    /// Prefix of generated device kernel names.
    pub fn kernel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.kernel_prefix = prefix.into();
        self
    }

    /// Realize a nest.
    pub fn realize(&mut self, nest: &LoopNest) -> Result<LoopNest, TransformError> {
        Ok(LoopNest::new(self.realize_stmts(&nest.stmts, &[])?))
    }

    fn realize_stmts(&mut self, stmts: &[Stmt], outer: &[&Loop]) -> Result<Vec<Stmt>, TransformError> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            match stmt {
                Stmt::Transform(block) => {
                    let mut body = self.realize_stmts(&block.body, outer)?;
                    for directive in &block.directives {
                        let transform: Box<dyn Transform> = match directive {
                            Directive::DeviceLower(spec) => {
                                self.kernels += 1;
                                let name = format!("{}{}", self.kernel_prefix, self.kernels);
                                Box::new(DeviceLowering::resolve(spec, self.config, &name)?)
                            }
                            other => build(other, self.config)?,
                        };
                        debug!("applying {} at line {}", directive, block.span.start_line);
                        body = transform.apply(&body, outer)?;
                    }
                    out.extend(body);
                }
                Stmt::Loop(l) => {
                    let mut inner = outer.to_vec();
                    inner.push(l);
                    let body = self.realize_stmts(&l.body, &inner)?;
                    out.push(Stmt::Loop(Loop { body, ..l.clone() }));
                }
                Stmt::Block(b) => out.push(Stmt::Block(self.realize_stmts(b, outer)?)),
                Stmt::If { cond, then_branch, else_branch } => out.push(Stmt::If {
                    cond: cond.clone(),
                    then_branch: self.realize_stmts(then_branch, outer)?,
                    else_branch: self.realize_stmts(else_branch, outer)?,
                }),
                other => out.push(other.clone()),
            }
        }
        Ok(out)
    }
}

/// Shorthand for a transformation error.
pub(crate) fn error(kind: TransformErrorKind, transform: &str, message: impl Into<String>) -> TransformError {
    TransformError::new(kind, transform, message)
}

/// Rewrite loops bottom-up: `f` may replace a loop (and its subtree);
/// loops it leaves alone are descended into.
pub(crate) fn rewrite_loops<'a>(
    stmts: &'a [Stmt],
    outer: &[&'a Loop],
    f: &mut dyn FnMut(&'a Loop, &[&'a Loop]) -> Result<Option<Vec<Stmt>>, TransformError>,
) -> Result<Vec<Stmt>, TransformError> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        match stmt {
            Stmt::Loop(l) => match f(l, outer)? {
                Some(replacement) => out.extend(replacement),
                None => {
                    let mut inner = outer.to_vec();
                    inner.push(l);
                    let body = rewrite_loops(&l.body, &inner, f)?;
                    out.push(Stmt::Loop(Loop { body, ..l.clone() }));
                }
            },
            Stmt::Block(b) => out.push(Stmt::Block(rewrite_loops(b, outer, f)?)),
            Stmt::If { cond, then_branch, else_branch } => out.push(Stmt::If {
                cond: cond.clone(),
                then_branch: rewrite_loops(then_branch, outer, f)?,
                else_branch: rewrite_loops(else_branch, outer, f)?,
            }),
            other => out.push(other.clone()),
        }
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::frontend::{Lexer, Parser};
    use crate::ir::nest::{Loop, LoopNest, Stmt};

    /// Parse loop code into statements.
    pub fn stmts(src: &str) -> Vec<Stmt> {
        Parser::new(Lexer::new(src)).unwrap().parse_loop_code().unwrap()
    }

    /// Parse loop code into a nest.
    pub fn nest(src: &str) -> LoopNest {
        LoopNest::new(stmts(src))
    }

    /// Loop indices in walk order.
    pub fn loop_vars(stmts: &[Stmt]) -> Vec<String> {
        LoopNest::new(stmts.to_vec()).loops().iter().map(|l: &&Loop| l.var.clone()).collect()
    }

    /// Render statements as C.
    pub fn render(stmts: &[Stmt]) -> String {
        crate::codegen::c::render_stmts(stmts)
    }
}
