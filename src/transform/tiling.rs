//! Loop tiling transformation.
//!
//! Tiling (also called blocking) transforms a loop nest to improve cache locality
//! by processing data in smaller blocks that fit in cache.
//!
//! Example:
//! ```text
//! for (i=0; i<=N-1; i++)
//!   for (j=0; j<=M-1; j++)
//!     A[i][j] = ...
//! ```
//! with `tile=[('i',Ti,'ii'),('j',Tj,'jj')]` becomes:
//! ```text
//! for (ii=0; ii<=N-1; ii+=Ti)
//!   for (jj=0; jj<=M-1; jj+=Tj)
//!     for (i=ii; i<=min(N-1,ii+Ti-1); i++)
//!       for (j=jj; j<=min(M-1,jj+Tj-1); j++)
//!         A[i][j] = ...
//! ```
//! Block loops move outward past enclosing point loops as long as the
//! nest stays perfect and the swap preserves every dependence.

use crate::analysis::{point_index, AccessMap, DependenceAnalysis};
use crate::ir::directive::TileLevel;
use crate::ir::expr::Expr;
use crate::ir::nest::{Loop, LoopAttrs, Stmt};
use crate::space::Configuration;
use crate::transform::{error, Transform};
use crate::utils::errors::{TransformError, TransformErrorKind};
use log::debug;
use std::collections::BTreeSet;

const NAME: &str = "tile";

/// One resolved tiling level.
#[derive(Debug, Clone, PartialEq)]
pub struct TileStep {
    /// Candidate loops, first present one wins
    pub loops: Vec<String>,
    /// Tile size
    pub size: i64,
    /// Block loop index
    pub tile_var: String,
}

/// Multi-level loop tiling.
#[derive(Debug, Clone, PartialEq)]
pub struct Tiling {
    /// Levels in application order
    pub steps: Vec<TileStep>,
}

impl Tiling {
    /// Tile a single loop.
    pub fn new(var: &str, size: i64, tile_var: &str) -> Self {
        Self {
            steps: vec![TileStep { loops: vec![var.to_string()], size, tile_var: tile_var.to_string() }],
        }
    }

    /// Add another level.
    pub fn then(mut self, loops: &[&str], size: i64, tile_var: &str) -> Self {
        self.steps.push(TileStep {
            loops: loops.iter().map(|s| s.to_string()).collect(),
            size,
            tile_var: tile_var.to_string(),
        });
        self
    }

    /// Resolve tile sizes against a configuration.
    pub fn resolve(levels: &[TileLevel], config: &Configuration) -> Result<Self, TransformError> {
        let steps = levels
            .iter()
            .map(|l| {
                Ok(TileStep {
                    loops: l.loops.clone(),
                    size: l.size.resolve_int(config, NAME)?,
                    tile_var: l.tile_var.clone(),
                })
            })
            .collect::<Result<Vec<_>, TransformError>>()?;
        Ok(Self { steps })
    }

    fn tile_step(&self, step: &TileStep, stmts: &[Stmt], outer: &[&Loop]) -> Result<Vec<Stmt>, TransformError> {
        if step.size <= 1 {
            debug!("tile size {} for {} leaves the nest unchanged", step.size, step.tile_var);
            return Ok(stmts.to_vec());
        }
        let mut indices: BTreeSet<String> = outer.iter().map(|l| l.var.clone()).collect();
        for s in stmts {
            s.walk(&mut |st| {
                if let Stmt::Loop(l) = st {
                    indices.insert(l.var.clone());
                }
            });
        }
        let target = step.loops.iter().find(|v| indices.contains(*v)).ok_or_else(|| {
            error(
                TransformErrorKind::LoopNotFound,
                NAME,
                format!("none of the loops {:?} exists in the nest", step.loops),
            )
        })?;
        if indices.contains(&step.tile_var) {
            return Err(error(
                TransformErrorKind::IllegalTransform,
                NAME,
                format!("tile index '{}' is already a loop index", step.tile_var),
            ));
        }
        if outer.iter().any(|l| &l.var == target) {
            return Err(error(
                TransformErrorKind::UnsupportedLoop,
                NAME,
                format!("loop '{}' encloses the transform statement", target),
            ));
        }
        let mut done = false;
        self.tile_in(step, target, stmts, outer, &mut done)
    }

    fn tile_in(
        &self,
        step: &TileStep,
        target: &str,
        stmts: &[Stmt],
        outer: &[&Loop],
        done: &mut bool,
    ) -> Result<Vec<Stmt>, TransformError> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            let lp = match stmt {
                Stmt::Loop(l) if !*done => l,
                Stmt::Block(b) if !*done => {
                    out.push(Stmt::Block(self.tile_in(step, target, b, outer, done)?));
                    continue;
                }
                other => {
                    out.push(other.clone());
                    continue;
                }
            };
            if lp.var == target {
                *done = true;
                out.push(Stmt::Loop(strip_mine(lp, step)?));
                continue;
            }
            let mut inner = outer.to_vec();
            inner.push(lp);
            let body = self.tile_in(step, target, &lp.body, &inner, done)?;
            let enclosing = Loop { body, ..lp.clone() };
            out.push(Stmt::Loop(hoist(enclosing, &step.tile_var, outer)?));
        }
        Ok(out)
    }
}

/// Split `lp` into a block loop over tiles and a point loop within a tile.
fn strip_mine(lp: &Loop, step: &TileStep) -> Result<Loop, TransformError> {
    if step.size % lp.step != 0 {
        return Err(error(
            TransformErrorKind::InvalidTileSize,
            NAME,
            format!("tile size {} is not a multiple of the step {} of loop '{}'", step.size, lp.step, lp.var),
        ));
    }
    let tile = Expr::var(step.tile_var.clone());
    let point_upper = Expr::min(
        lp.upper.clone(),
        Expr::add(tile.clone(), Expr::int(step.size - lp.step)),
    )
    .simplify();
    let point = Loop {
        var: lp.var.clone(),
        lower: tile,
        upper: point_upper,
        step: lp.step,
        body: lp.body.clone(),
        attrs: LoopAttrs { range: Some(lp.value_range()), ..lp.attrs.clone() },
    };
    Ok(Loop {
        var: step.tile_var.clone(),
        lower: lp.lower.clone(),
        upper: lp.upper.clone(),
        step: step.size,
        body: vec![Stmt::Loop(point)],
        attrs: LoopAttrs {
            tile_level: lp.attrs.tile_level + 1,
            tiles: Some(lp.var.clone()),
            ..LoopAttrs::default()
        },
    })
}

/// Move the block loop `tile_var` above `enclosing` when it is the
/// enclosing loop's only statement.
fn hoist(enclosing: Loop, tile_var: &str, outer: &[&Loop]) -> Result<Loop, TransformError> {
    let block = match enclosing.body.as_slice() {
        [Stmt::Loop(b)] if b.var == tile_var => b,
        _ => return Ok(enclosing),
    };
    if enclosing.attrs.tile_level >= block.attrs.tile_level || block.header_mentions(&enclosing.var) {
        return Ok(enclosing);
    }
    let map = AccessMap::for_loop(&enclosing, outer);
    let fixed: Vec<String> = outer.iter().map(|l| l.var.clone()).collect();
    let band = [point_index(&enclosing), point_index(block)];
    if let Err(dep) = DependenceAnalysis::new(&map).band_permutable(&band, &fixed) {
        return Err(error(
            TransformErrorKind::IllegalTransform,
            NAME,
            format!("moving '{}' outside '{}' reverses {}", tile_var, enclosing.var, dep),
        ));
    }
    debug!("hoisting block loop {} above {}", tile_var, enclosing.var);
    let swapped = Loop { body: block.body.clone(), ..enclosing.clone() };
    Ok(Loop { body: vec![Stmt::Loop(swapped)], ..block.clone() })
}

impl Transform for Tiling {
    fn apply(&self, stmts: &[Stmt], outer: &[&Loop]) -> Result<Vec<Stmt>, TransformError> {
        let mut current = stmts.to_vec();
        for step in &self.steps {
            current = self.tile_step(step, &current, outer)?;
        }
        Ok(current)
    }

    fn name(&self) -> &str {
        NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{Interpreter, Workspace};
    use crate::ir::nest::LoopNest;
    use crate::transform::test_util::{loop_vars, stmts};

    const MATMUL: &str = "for (i=0; i<=N-1; i++) for (j=0; j<=N-1; j++) for (k=0; k<=N-1; k++)
        C[i][j] = C[i][j] + A[i][k] * B[k][j];";

    #[test]
    fn test_single_level() {
        let out = Tiling::new("i", 4, "ii").apply(&stmts("for (i=0; i<=N-1; i++) a[i] = 0;"), &[]).unwrap();
        let block = match &out[..] {
            [Stmt::Loop(l)] => l,
            other => panic!("expected one loop, got {:?}", other),
        };
        assert_eq!(block.var, "ii");
        assert_eq!(block.step, 4);
        assert_eq!(block.attrs.tile_level, 1);
        let point = match &block.body[..] {
            [Stmt::Loop(l)] => l,
            other => panic!("expected point loop, got {:?}", other),
        };
        assert_eq!(point.lower, Expr::var("ii"));
        assert_eq!(point.upper.to_string(), "min(N-1,ii+3)");
        let (lo, hi) = point.attrs.range.clone().unwrap();
        assert_eq!((lo.to_string(), hi.to_string()), ("0".to_string(), "N-1".to_string()));
    }

    #[test]
    fn test_block_loops_hoisted() {
        let tiling = Tiling::new("i", 8, "ii").then(&["j"], 8, "jj");
        let out = tiling.apply(&stmts(MATMUL), &[]).unwrap();
        assert_eq!(loop_vars(&out), ["ii", "jj", "i", "j", "k"]);
    }

    #[test]
    fn test_second_level_prefers_first_candidate() {
        let tiling = Tiling::new("i", 4, "ii").then(&["ii", "i"], 16, "iii");
        let out = tiling.apply(&stmts(MATMUL), &[]).unwrap();
        assert_eq!(loop_vars(&out), ["iii", "ii", "i", "j", "k"]);
        let outer = LoopNest::new(out).loops()[0].clone();
        assert_eq!(outer.attrs.tile_level, 2);
        assert_eq!(crate::analysis::point_index(&outer), "i");
    }

    #[test]
    fn test_invalid_tile_size() {
        let src = "for (i=0; i<=N-1; i+=2) a[i] = 0;";
        let err = Tiling::new("i", 3, "ii").apply(&stmts(src), &[]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::InvalidTileSize);
    }

    #[test]
    fn test_missing_loop() {
        let err = Tiling::new("q", 4, "qq").apply(&stmts(MATMUL), &[]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::LoopNotFound);
    }

    #[test]
    fn test_size_one_is_identity() {
        let body = stmts(MATMUL);
        assert_eq!(Tiling::new("i", 1, "ii").apply(&body, &[]).unwrap(), body);
    }

    #[test]
    fn test_reversing_hoist_rejected() {
        let src = "for (i=1; i<=N-1; i++) for (j=0; j<=N-2; j++) A[i][j] = A[i-1][j+1];";
        let err = Tiling::new("j", 4, "jj").apply(&stmts(src), &[]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::IllegalTransform);
    }

    #[test]
    fn test_tiled_matmul_matches() {
        let plain = LoopNest::new(stmts(MATMUL));
        let tiled = LoopNest::new(
            Tiling::new("i", 3, "ii").then(&["k"], 4, "kk").apply(&plain.stmts, &[]).unwrap(),
        );
        let mut ws = Workspace::new();
        ws.set_int("N", 10);
        for (name, seed) in [("A", 1), ("B", 2), ("C", 3)] {
            ws.alloc_random(name, &[10, 10], seed);
        }
        let expected = Interpreter::new().run(&plain, ws.clone()).unwrap();
        let actual = Interpreter::new().run(&tiled, ws).unwrap();
        assert_eq!(expected.array("C"), actual.array("C"));
    }
}
