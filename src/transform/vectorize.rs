//! Marking innermost loops for SIMD execution.

use crate::analysis::loop_safety;
use crate::ir::nest::{Loop, Stmt};
use crate::transform::{error, rewrite_loops, Transform};
use crate::utils::errors::{TransformError, TransformErrorKind};

/// Attach SIMD pragmas to every innermost loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Vectorization {
    /// Toggle
    pub enabled: bool,
    /// Pragmas emitted before each loop
    pub pragmas: Vec<String>,
}

impl Transform for Vectorization {
    fn apply(&self, stmts: &[Stmt], outer: &[&Loop]) -> Result<Vec<Stmt>, TransformError> {
        if !self.enabled {
            return Ok(stmts.to_vec());
        }
        rewrite_loops(stmts, outer, &mut |lp, enclosing| {
            if !lp.is_innermost() {
                return Ok(None);
            }
            let safety = loop_safety(lp, enclosing);
            if !safety.is_vectorizable() {
                return Err(error(TransformErrorKind::UnsafeVectorization, "vector", safety.reason()));
            }
            let mut marked = lp.clone();
            marked.attrs.vector = Some(self.pragmas.clone());
            Ok(Some(vec![Stmt::Loop(marked)]))
        })
    }

    fn name(&self) -> &str {
        "vector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::nest::LoopNest;
    use crate::transform::test_util::stmts;

    fn ivdep() -> Vectorization {
        Vectorization { enabled: true, pragmas: vec!["ivdep".to_string()] }
    }

    #[test]
    fn test_marks_innermost_only() {
        let src = "for (i=0; i<=N-1; i++) for (j=0; j<=N-1; j++) B[i][j] = A[i][j] * 2;";
        let nest = LoopNest::new(ivdep().apply(&stmts(src), &[]).unwrap());
        let loops = nest.loops();
        assert_eq!(loops[0].attrs.vector, None);
        assert_eq!(loops[1].attrs.vector, Some(vec!["ivdep".to_string()]));
    }

    #[test]
    fn test_outer_carried_is_fine() {
        // the dependence is carried by i, not by the vectorized j
        let src = "for (i=1; i<=N-1; i++) for (j=0; j<=N-1; j++) A[i][j] = A[i-1][j] + 1;";
        assert!(ivdep().apply(&stmts(src), &[]).is_ok());
    }

    #[test]
    fn test_rejects_recurrence_and_reduction() {
        let err = ivdep().apply(&stmts("for (i=1; i<=N-1; i++) a[i] = a[i-1] * 2;"), &[]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::UnsafeVectorization);
        let err = ivdep().apply(&stmts("for (i=0; i<=N-1; i++) s = s + a[i];"), &[]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::UnsafeVectorization);
        assert!(err.message.contains("reduction"));
    }
}
