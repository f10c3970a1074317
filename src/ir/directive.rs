//! Typed transformation directives.
//!
//! Directive fields are [`Operand`]s: either literals fixed in the
//! annotation or names of tuning parameters resolved against a
//! [`Configuration`] when the transformation is applied.

use crate::space::{Configuration, ParamRole, Value};
use crate::utils::errors::{TransformError, TransformErrorKind};
use std::fmt;

/// A directive argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Literal value
    Const(Value),
    /// Tuning parameter name
    Param(String),
}

impl Operand {
    /// Integer literal operand.
    pub fn int(v: i64) -> Self {
        Operand::Const(Value::Int(v))
    }

    /// Parameter reference operand.
    pub fn param(name: impl Into<String>) -> Self {
        Operand::Param(name.into())
    }

    /// Look up the operand's value.
    pub fn resolve(&self, config: &Configuration, transform: &str) -> Result<Value, TransformError> {
        match self {
            Operand::Const(v) => Ok(v.clone()),
            Operand::Param(name) => config.get(name).cloned().ok_or_else(|| {
                TransformError::new(
                    TransformErrorKind::UnboundParameter,
                    transform,
                    format!("parameter '{}' is not bound by the configuration", name),
                )
            }),
        }
    }

    /// Resolve to an integer.
    pub fn resolve_int(&self, config: &Configuration, transform: &str) -> Result<i64, TransformError> {
        let value = self.resolve(config, transform)?;
        value.as_int().ok_or_else(|| {
            TransformError::new(
                TransformErrorKind::InvalidFactor,
                transform,
                format!("expected an integer for {}, found {} '{}'", self, value.type_name(), value),
            )
        })
    }

    /// Resolve to a truth value.
    pub fn resolve_flag(&self, config: &Configuration, transform: &str) -> Result<bool, TransformError> {
        Ok(self.resolve(config, transform)?.truthy())
    }

    /// Parameter name, if the operand is a reference.
    pub fn param_name(&self) -> Option<&str> {
        match self {
            Operand::Param(name) => Some(name),
            Operand::Const(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Const(v) => write!(f, "{}", v),
            Operand::Param(name) => write!(f, "{}", name),
        }
    }
}

/// One level of a tiling directive.
#[derive(Debug, Clone, PartialEq)]
pub struct TileLevel {
    /// Candidate loops; the first one present in the nest is tiled
    pub loops: Vec<String>,
    /// Tile size
    pub size: Operand,
    /// Name of the generated block loop index
    pub tile_var: String,
}

/// One loop of an unroll-and-jam directive.
#[derive(Debug, Clone, PartialEq)]
pub struct UnrollSpec {
    /// Loop index
    pub var: String,
    /// Unroll factor
    pub factor: Operand,
}

/// Device lowering geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSpec {
    /// Threads per block
    pub thread_count: Operand,
    /// Fixed number of blocks; derived from the trip count when absent
    pub block_count: Option<Operand>,
    /// Upper bound on derived block counts
    pub max_blocks: Option<Operand>,
    /// Preferred L1 cache size in KB
    pub prefer_l1: Option<Operand>,
    /// Unroll factor for innermost kernel loops
    pub unroll_inner: Option<Operand>,
    /// Number of streams
    pub stream_count: Option<Operand>,
    /// Shared-memory staging toggle
    pub cache_blocks: Option<Operand>,
}

/// A transformation request.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Multi-level tiling
    Tile(Vec<TileLevel>),
    /// Unroll-and-jam of named loops
    UnrollJam(Vec<UnrollSpec>),
    /// Register tiling: unroll-and-jam of named loops, none nested in a
    /// loop with the same index
    RegTile(Vec<UnrollSpec>),
    /// Replace repeated array references by scalar temporaries
    ScalarReplace {
        /// Toggle
        enabled: Operand,
        /// Element type of the temporaries
        elem_type: String,
        /// Prefix of temporary names
        prefix: String,
    },
    /// Mark innermost loops for SIMD execution
    Vectorize {
        /// Toggle
        enabled: Operand,
        /// Pragmas emitted before the loop
        pragmas: Vec<String>,
    },
    /// Mark outermost loops parallel
    Parallelize {
        /// Toggle
        enabled: Operand,
        /// Pragma emitted before the loop
        pragma: String,
    },
    /// Plain unrolling of the outermost loops
    Unroll {
        /// Unroll factor
        factor: Operand,
        /// Also mark the unrolled loop parallel
        parallelize: Operand,
    },
    /// Lower the outermost parallel loop onto a device grid
    DeviceLower(DeviceSpec),
}

impl Directive {
    /// Short name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Directive::Tile(_) => "tile",
            Directive::UnrollJam(_) => "unrolljam",
            Directive::RegTile(_) => "regtile",
            Directive::ScalarReplace { .. } => "scalarreplace",
            Directive::Vectorize { .. } => "vector",
            Directive::Parallelize { .. } => "openmp",
            Directive::Unroll { .. } => "unroll",
            Directive::DeviceLower(_) => "cuda",
        }
    }

    /// Every operand with the role it gives a parameter it names.
    pub fn operands(&self) -> Vec<(&Operand, ParamRole)> {
        match self {
            Directive::Tile(levels) => levels.iter().map(|l| (&l.size, ParamRole::TileSize)).collect(),
            Directive::UnrollJam(specs) | Directive::RegTile(specs) => {
                specs.iter().map(|s| (&s.factor, ParamRole::UnrollFactor)).collect()
            }
            Directive::ScalarReplace { enabled, .. }
            | Directive::Vectorize { enabled, .. }
            | Directive::Parallelize { enabled, .. } => vec![(enabled, ParamRole::Toggle)],
            Directive::Unroll { factor, parallelize } => {
                vec![(factor, ParamRole::UnrollFactor), (parallelize, ParamRole::Toggle)]
            }
            Directive::DeviceLower(spec) => {
                let mut out = vec![(&spec.thread_count, ParamRole::DeviceGeometry)];
                for op in [&spec.block_count, &spec.max_blocks, &spec.prefer_l1, &spec.stream_count]
                    .into_iter()
                    .flatten()
                {
                    out.push((op, ParamRole::DeviceGeometry));
                }
                if let Some(op) = &spec.unroll_inner {
                    out.push((op, ParamRole::UnrollFactor));
                }
                if let Some(op) = &spec.cache_blocks {
                    out.push((op, ParamRole::Toggle));
                }
                out
            }
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Tile(levels) => {
                write!(f, "tile=[")?;
                for (i, l) in levels.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "({},{},{})", l.loops.join("|"), l.size, l.tile_var)?;
                }
                write!(f, "]")
            }
            Directive::UnrollJam(specs) => {
                let parts: Vec<String> = specs.iter().map(|s| format!("{}:{}", s.var, s.factor)).collect();
                write!(f, "unrolljam=({})", parts.join(","))
            }
            Directive::RegTile(specs) => {
                let parts: Vec<String> = specs.iter().map(|s| format!("{}:{}", s.var, s.factor)).collect();
                write!(f, "regtile=({})", parts.join(","))
            }
            Directive::ScalarReplace { enabled, elem_type, prefix } => {
                write!(f, "scalarreplace=({},{},{})", enabled, elem_type, prefix)
            }
            Directive::Vectorize { enabled, pragmas } => write!(f, "vector=({},{:?})", enabled, pragmas),
            Directive::Parallelize { enabled, pragma } => write!(f, "openmp=({},{:?})", enabled, pragma),
            Directive::Unroll { factor, parallelize } => {
                write!(f, "unroll(ufactor={},parallelize={})", factor, parallelize)
            }
            Directive::DeviceLower(spec) => write!(f, "cuda(threadCount={})", spec.thread_count),
        }
    }
}
