//! Lowering parallel loops onto a device grid.
//!
//! The outermost loop whose iterations are independent (up to at most one
//! scalar reduction) becomes a kernel launch. Each device thread walks the
//! index range with a grid-sized stride; streams split the range into
//! contiguous chunks launched one after another.

use crate::analysis::loop_safety;
use crate::ir::directive::DeviceSpec;
use crate::ir::expr::Expr;
use crate::ir::nest::{KernelLaunch, Loop, Stmt};
use crate::space::Configuration;
use crate::transform::parallelize::parallel_info;
use crate::transform::unrolling::unroll_loop;
use crate::transform::{error, rewrite_loops, Transform};
use crate::utils::errors::{TransformError, TransformErrorKind};
use log::debug;

const NAME: &str = "cuda";

/// Upper bound on derived grid sizes.
pub const DEFAULT_MAX_BLOCKS: i64 = 65535;

/// Device lowering with resolved geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLowering {
    /// Threads per block
    pub threads: i64,
    /// Fixed grid size
    pub block_count: Option<i64>,
    /// Cap on derived grid sizes
    pub max_blocks: i64,
    /// Preferred L1 size in KB
    pub prefer_l1: Option<i64>,
    /// Unroll factor for innermost kernel loops
    pub unroll_inner: Option<i64>,
    /// Number of streams
    pub streams: i64,
    /// Stage array elements in shared memory
    pub cache_blocks: bool,
    /// Name of the first generated kernel
    pub kernel_name: String,
}

impl DeviceLowering {
    /// Lowering with `threads` threads per block and derived grid size.
    pub fn new(threads: i64, kernel_name: &str) -> Self {
        Self {
            threads,
            block_count: None,
            max_blocks: DEFAULT_MAX_BLOCKS,
            prefer_l1: None,
            unroll_inner: None,
            streams: 1,
            cache_blocks: false,
            kernel_name: kernel_name.to_string(),
        }
    }

    /// Resolve geometry operands against a configuration.
    pub fn resolve(spec: &DeviceSpec, config: &Configuration, kernel_name: &str) -> Result<Self, TransformError> {
        let opt = |op: &Option<crate::ir::directive::Operand>| -> Result<Option<i64>, TransformError> {
            op.as_ref().map(|o| o.resolve_int(config, NAME)).transpose()
        };
        Ok(Self {
            threads: spec.thread_count.resolve_int(config, NAME)?,
            block_count: opt(&spec.block_count)?,
            max_blocks: opt(&spec.max_blocks)?.unwrap_or(DEFAULT_MAX_BLOCKS),
            prefer_l1: opt(&spec.prefer_l1)?,
            unroll_inner: opt(&spec.unroll_inner)?,
            streams: opt(&spec.stream_count)?.unwrap_or(1),
            cache_blocks: match &spec.cache_blocks {
                Some(op) => op.resolve_flag(config, NAME)?,
                None => false,
            },
            kernel_name: kernel_name.to_string(),
        })
    }

    fn check_geometry(&self) -> Result<(), TransformError> {
        let checks = [
            ("threadCount", Some(self.threads)),
            ("blockCount", self.block_count),
            ("maxBlocks", Some(self.max_blocks)),
            ("streamCount", Some(self.streams)),
            ("unrollInner", self.unroll_inner),
        ];
        for (what, value) in checks {
            if let Some(v) = value.filter(|v| *v < 1) {
                return Err(error(
                    TransformErrorKind::InvalidFactor,
                    NAME,
                    format!("{} must be at least 1, got {}", what, v),
                ));
            }
        }
        Ok(())
    }

    fn lower(&self, stmts: &[Stmt], outer: &[&Loop], launches: &mut usize) -> Result<Vec<Stmt>, TransformError> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            let lp = match stmt {
                Stmt::Loop(l) => l,
                Stmt::Block(b) => {
                    out.push(Stmt::Block(self.lower(b, outer, launches)?));
                    continue;
                }
                other => {
                    out.push(other.clone());
                    continue;
                }
            };
            let safety = loop_safety(lp, outer);
            if safety.is_parallel() && safety.reductions.len() <= 1 {
                let name = match *launches {
                    0 => self.kernel_name.clone(),
                    n => format!("{}_m{}", self.kernel_name, n),
                };
                *launches += 1;
                debug!("lowering loop {} to kernel {}", lp.var, name);
                out.push(Stmt::Launch(Box::new(self.launch(lp, name, &safety)?)));
            } else {
                debug!("keeping loop {} on the host: {}", lp.var, safety.reason());
                let mut inner = outer.to_vec();
                inner.push(lp);
                let body = self.lower(&lp.body, &inner, launches)?;
                out.push(Stmt::Loop(Loop { body, ..lp.clone() }));
            }
        }
        Ok(out)
    }

    fn launch(&self, lp: &Loop, name: String, safety: &crate::analysis::LoopSafety) -> Result<KernelLaunch, TransformError> {
        let body = match self.unroll_inner {
            Some(u) if u > 1 => rewrite_loops(&lp.body, &[], &mut |l, _| {
                Ok(l.is_innermost().then(|| unroll_loop(l, u)))
            })?,
            _ => lp.body.clone(),
        };
        let blocks = match self.block_count {
            Some(b) => Expr::int(b),
            None => {
                let per_thread = Expr::div(
                    Expr::add(lp.trip_count(), Expr::int(self.threads - 1)).simplify(),
                    Expr::int(self.threads),
                );
                Expr::min(Expr::int(self.max_blocks), per_thread).simplify()
            }
        };
        let info = parallel_info("", safety, lp);
        Ok(KernelLaunch {
            name,
            var: lp.var.clone(),
            lower: lp.lower.clone(),
            upper: lp.upper.clone(),
            step: lp.step,
            body,
            threads: self.threads,
            blocks,
            streams: self.streams,
            prefer_l1: self.prefer_l1,
            cache_blocks: self.cache_blocks,
            reduction: info.reductions.first().cloned(),
            private: info.private,
        })
    }
}

impl Transform for DeviceLowering {
    fn apply(&self, stmts: &[Stmt], outer: &[&Loop]) -> Result<Vec<Stmt>, TransformError> {
        self.check_geometry()?;
        let mut launches = 0;
        let out = self.lower(stmts, outer, &mut launches)?;
        if launches == 0 {
            return Err(error(
                TransformErrorKind::UnsafeParallelization,
                NAME,
                "no loop has independent iterations to lower onto the device",
            ));
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{Interpreter, Workspace};
    use crate::ir::nest::{LoopNest, ReduceOp, Reduction};
    use crate::transform::test_util::stmts;

    fn launch_of(s: &Stmt) -> &KernelLaunch {
        match s {
            Stmt::Launch(k) => k,
            other => panic!("expected launch, got {:?}", other),
        }
    }

    #[test]
    fn test_axpy_launch() {
        let out = DeviceLowering::new(32, "axpy").apply(&stmts("for (i=0; i<=N-1; i++) y[i] = y[i] + a*x[i];"), &[]).unwrap();
        let k = launch_of(&out[0]);
        assert_eq!(k.name, "axpy");
        assert_eq!(k.threads, 32);
        assert_eq!(k.blocks.to_string(), "min(65535,(max(0,N)+31)/32)");
        assert_eq!(k.reduction, None);
    }

    #[test]
    fn test_reduction_kernel() {
        let out = DeviceLowering::new(64, "dot").apply(&stmts("for (i=0; i<=N-1; i++) s = s + x[i]*y[i];"), &[]).unwrap();
        assert_eq!(launch_of(&out[0]).reduction, Some(Reduction { var: "s".into(), op: ReduceOp::Add }));
    }

    #[test]
    fn test_sequential_outer_loop_stays_on_host() {
        let src = "for (t=0; t<=T-1; t++) for (i=0; i<=N-1; i++) a[i] = a[i] + t;";
        let out = DeviceLowering::new(16, "k").apply(&stmts(src), &[]).unwrap();
        let host = match &out[0] {
            Stmt::Loop(l) => l,
            other => panic!("expected host loop, got {:?}", other),
        };
        assert_eq!(host.var, "t");
        assert_eq!(launch_of(&host.body[0]).var, "i");
    }

    #[test]
    fn test_geometry_and_safety_errors() {
        let body = stmts("for (i=0; i<=N-1; i++) y[i] = x[i];");
        let err = DeviceLowering::new(0, "k").apply(&body, &[]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::InvalidFactor);
        let err = DeviceLowering::new(32, "k").apply(&stmts("for (i=1; i<=N-1; i++) a[i] = a[i-1];"), &[]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::UnsafeParallelization);
    }

    #[test]
    fn test_kernel_matches_host_loop() {
        let src = "for (i=0; i<=N-1; i++) { y[i] = y[i] + 2*x[i]; s = s + x[i]; }";
        let plain = LoopNest::new(stmts(src));
        let lowering = DeviceLowering { streams: 3, block_count: Some(2), unroll_inner: Some(2), ..DeviceLowering::new(4, "k") };
        let lowered = LoopNest::new(lowering.apply(&plain.stmts, &[]).unwrap());
        let mut ws = Workspace::new();
        ws.set_int("N", 37);
        ws.set_float("s", 0.0);
        ws.alloc_random("x", &[37], 11);
        ws.alloc_random("y", &[37], 12);
        let expected = Interpreter::new().run(&plain, ws.clone()).unwrap();
        let actual = Interpreter::new().run(&lowered, ws).unwrap();
        assert_eq!(expected.array("y"), actual.array("y"));
        let (a, b) = (expected.scalar("s").unwrap(), actual.scalar("s").unwrap());
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn test_oversized_grid_runs_only_live_threads() {
        let plain = LoopNest::new(stmts("for (i=0; i<=N-1; i++) s = s + x[i];"));
        let lowering = DeviceLowering { block_count: Some(1 << 40), ..DeviceLowering::new(1024, "k") };
        let lowered = LoopNest::new(lowering.apply(&plain.stmts, &[]).unwrap());
        let mut ws = Workspace::new();
        ws.set_int("N", 5);
        ws.set_float("s", 0.0);
        ws.alloc_random("x", &[5], 3);
        let expected = Interpreter::new().run(&plain, ws.clone()).unwrap();
        let actual = Interpreter::new().with_step_limit(1_000).run(&lowered, ws).unwrap();
        let (a, b) = (expected.scalar("s").unwrap(), actual.scalar("s").unwrap());
        assert!((a - b).abs() < 1e-12);
    }
}
