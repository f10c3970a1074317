//! Analysis passes for loop transformations.

pub mod access;
pub mod dependence;

pub use access::{classify_scalars, reduction_of, AccessMap, AccessSite, LoopBounds, ScalarClass};
pub use dependence::{Dependence, DependenceAnalysis, DependenceKind, Direction, Distance};

use crate::ir::nest::{Loop, Reduction, Stmt};

/// Whether the iterations of one loop may run concurrently.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSafety {
    /// Index whose distance was tested (the point loop for block loops)
    pub index: String,
    /// An array dependence carried by the loop
    pub carried: Option<Dependence>,
    /// Scalars whose values flow between iterations
    pub scalar_hazards: Vec<String>,
    /// Scalars each iteration writes before reading
    pub private: Vec<String>,
    /// Scalars combined with an associative operator
    pub reductions: Vec<Reduction>,
}

impl LoopSafety {
    /// Iterations are independent up to private copies and reductions.
    pub fn is_parallel(&self) -> bool {
        self.carried.is_none() && self.scalar_hazards.is_empty()
    }

    /// Iterations are independent without any combine step.
    pub fn is_vectorizable(&self) -> bool {
        self.is_parallel() && self.reductions.is_empty()
    }

    /// Explanation of the first hazard, for error messages.
    pub fn reason(&self) -> String {
        if let Some(dep) = &self.carried {
            format!("loop '{}' carries a dependence: {}", self.index, dep)
        } else if let Some(s) = self.scalar_hazards.first() {
            format!("scalar '{}' carries a value between iterations of '{}'", s, self.index)
        } else if let Some(r) = self.reductions.first() {
            format!("scalar '{}' is a {} reduction over '{}'", r.var, r.op.symbol(), self.index)
        } else {
            format!("loop '{}' has independent iterations", self.index)
        }
    }
}

/// Check the iterations of `lp`, which sits inside `outer`.
///
/// A block loop is judged by the point loop it tiles: two of its
/// iterations touch disjoint ranges of the point index.
pub fn loop_safety(lp: &Loop, outer: &[&Loop]) -> LoopSafety {
    let map = AccessMap::for_loop(lp, outer);
    let fixed: Vec<String> = outer.iter().map(|l| l.var.clone()).collect();
    let index = point_index(lp);
    let carried = DependenceAnalysis::new(&map).carried_by(&index, &fixed);

    let mut safety = LoopSafety {
        index,
        carried,
        scalar_hazards: Vec::new(),
        private: Vec::new(),
        reductions: Vec::new(),
    };
    for (name, class) in classify_scalars(&lp.body) {
        match class {
            ScalarClass::Private => safety.private.push(name),
            ScalarClass::Reduction(op) => safety.reductions.push(Reduction { var: name, op }),
            ScalarClass::Carried => safety.scalar_hazards.push(name),
        }
    }
    safety
}

/// Follow `tiles` links from a block loop down to the point loop.
pub fn point_index(lp: &Loop) -> String {
    let mut var = lp.var.clone();
    let mut next = lp.attrs.tiles.clone();
    let mut scope: &[Stmt] = &lp.body;
    while let Some(target) = next.take() {
        var = target.clone();
        if let Some(inner) = find_loop(scope, &target) {
            next = inner.attrs.tiles.clone();
            scope = &inner.body;
        }
    }
    var
}

/// Find a loop with index `var` among `stmts` and their descendants.
pub fn find_loop<'a>(stmts: &'a [Stmt], var: &str) -> Option<&'a Loop> {
    let mut found = None;
    for s in stmts {
        s.walk(&mut |st| {
            if let Stmt::Loop(l) = st {
                if found.is_none() && l.var == var {
                    found = Some(l);
                }
            }
        });
        if found.is_some() {
            break;
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{Lexer, Parser};
    use crate::ir::nest::ReduceOp;

    fn outer_loop(src: &str) -> Loop {
        match Parser::new(Lexer::new(src)).unwrap().parse_loop_code().unwrap().remove(0) {
            Stmt::Loop(l) => l,
            other => panic!("expected a loop, got {:?}", other),
        }
    }

    #[test]
    fn test_dot_product_is_reduction() {
        let safety = loop_safety(&outer_loop("for (i=0; i<=n-1; i++) s = s + x[i]*y[i];"), &[]);
        assert!(safety.is_parallel());
        assert!(!safety.is_vectorizable());
        assert_eq!(safety.reductions, vec![Reduction { var: "s".into(), op: ReduceOp::Add }]);
    }

    #[test]
    fn test_recurrence_is_unsafe() {
        let safety = loop_safety(&outer_loop("for (i=1; i<=n-1; i++) a[i] = a[i-1] + b[i];"), &[]);
        assert!(!safety.is_parallel());
        assert!(safety.reason().contains("carries a dependence"));
    }

    #[test]
    fn test_block_loop_uses_point_index() {
        let mut block = outer_loop("for (ii=0; ii<=n-1; ii+=4) for (i=ii; i<=min(n-1,ii+3); i++) a[i] = a[i] * 2;");
        block.attrs.tile_level = 1;
        block.attrs.tiles = Some("i".into());
        let safety = loop_safety(&block, &[]);
        assert_eq!(safety.index, "i");
        assert!(safety.is_parallel());
        assert_eq!(safety.private, vec!["i".to_string()]);
    }
}
