//! Marking loops for multi-threaded execution.

use crate::analysis::{loop_safety, LoopSafety};
use crate::ir::nest::{Loop, ParallelInfo, Stmt};
use crate::transform::{error, Transform};
use crate::utils::errors::{TransformError, TransformErrorKind};
use log::debug;

/// Mark the top-level loops of a block parallel.
#[derive(Debug, Clone, PartialEq)]
pub struct Parallelization {
    /// Toggle
    pub enabled: bool,
    /// Pragma text
    pub pragma: String,
}

impl Parallelization {
    /// Create an enabled parallelization with the default pragma.
    pub fn new() -> Self {
        Self { enabled: true, pragma: "omp parallel for".to_string() }
    }
}

impl Default for Parallelization {
    fn default() -> Self {
        Self::new()
    }
}

/// Parallel info for `lp`: private scalars include every inner loop index.
pub(crate) fn parallel_info(pragma: &str, safety: &LoopSafety, lp: &Loop) -> ParallelInfo {
    let mut private = safety.private.clone();
    for stmt in &lp.body {
        stmt.walk(&mut |s| {
            if let Stmt::Loop(inner) = s {
                if !private.contains(&inner.var) {
                    private.push(inner.var.clone());
                }
            }
        });
    }
    ParallelInfo { pragma: pragma.to_string(), private, reductions: safety.reductions.clone() }
}

impl Transform for Parallelization {
    fn apply(&self, stmts: &[Stmt], outer: &[&Loop]) -> Result<Vec<Stmt>, TransformError> {
        if !self.enabled {
            return Ok(stmts.to_vec());
        }
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            let lp = match stmt {
                Stmt::Loop(l) => l,
                Stmt::Block(b) => {
                    out.push(Stmt::Block(self.apply(b, outer)?));
                    continue;
                }
                other => {
                    out.push(other.clone());
                    continue;
                }
            };
            let safety = loop_safety(lp, outer);
            if !safety.is_parallel() {
                return Err(error(TransformErrorKind::UnsafeParallelization, self.name(), safety.reason()));
            }
            debug!("marking loop {} parallel", lp.var);
            let mut marked = lp.clone();
            marked.attrs.parallel = Some(parallel_info(&self.pragma, &safety, lp));
            out.push(Stmt::Loop(marked));
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "openmp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::nest::{ReduceOp, Reduction};
    use crate::transform::test_util::stmts;

    fn parallel_of(out: &[Stmt]) -> Option<ParallelInfo> {
        match &out[0] {
            Stmt::Loop(l) => l.attrs.parallel.clone(),
            _ => None,
        }
    }

    #[test]
    fn test_marks_outer_loop() {
        let src = "for (i=0; i<=N-1; i++) for (j=0; j<=N-1; j++) B[i][j] = A[j][i];";
        let out = Parallelization::new().apply(&stmts(src), &[]).unwrap();
        let info = parallel_of(&out).unwrap();
        assert_eq!(info.pragma, "omp parallel for");
        assert_eq!(info.private, ["j"]);
    }

    #[test]
    fn test_reduction_clause() {
        let out = Parallelization::new().apply(&stmts("for (i=0; i<=N-1; i++) s += x[i] * y[i];"), &[]).unwrap();
        let info = parallel_of(&out).unwrap();
        assert_eq!(info.reductions, [Reduction { var: "s".into(), op: ReduceOp::Add }]);
    }

    #[test]
    fn test_rejects_carried_dependence() {
        let src = "for (i=1; i<=N-1; i++) a[i] = a[i-1] + b[i];";
        let err = Parallelization::new().apply(&stmts(src), &[]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::UnsafeParallelization);
        assert!(err.message.contains("carries a dependence"));
    }

    #[test]
    fn test_disabled_is_identity() {
        let body = stmts("for (i=1; i<=N-1; i++) a[i] = a[i-1];");
        let off = Parallelization { enabled: false, ..Parallelization::new() };
        assert_eq!(off.apply(&body, &[]).unwrap(), body);
    }
}
