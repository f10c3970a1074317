//! Loop unrolling and unroll-and-jam.
//!
//! Unrolling replicates the loop body `factor` times with the index
//! shifted by multiples of the step, leaving a remainder loop for the
//! last iterations:
//! ```text
//! for (i=lb; i<=ub; i++)  S(i)
//! ```
//! becomes with factor 2:
//! ```text
//! for (i=lb; i<=ub-1; i+=2) { S(i); S(i+1); }
//! for (i=lb+((max(ub-lb+1,0)/1)/2)*2; i<=ub; i++) S(i)
//! ```
//! Unroll-and-jam additionally fuses the replicated copies of inner loops
//! so the copies share one inner loop.

use crate::analysis::{classify_scalars, loop_safety, point_index, AccessMap, DependenceAnalysis, ScalarClass};
use crate::ir::directive::UnrollSpec;
use crate::ir::expr::Expr;
use crate::ir::nest::{LValue, Loop, LoopAttrs, Stmt};
use crate::space::Configuration;
use crate::transform::parallelize::parallel_info;
use crate::transform::{error, rewrite_loops, Transform};
use crate::utils::errors::{TransformError, TransformErrorKind};
use log::debug;

/// Unroll-and-jam of named loops.
#[derive(Debug, Clone, PartialEq)]
pub struct UnrollJam {
    /// `(loop index, factor)` in application order
    pub factors: Vec<(String, i64)>,
}

impl UnrollJam {
    /// Unroll-and-jam a single loop.
    pub fn new(var: &str, factor: i64) -> Self {
        Self { factors: vec![(var.to_string(), factor)] }
    }

    /// Resolve factors against a configuration.
    pub fn resolve(specs: &[UnrollSpec], config: &Configuration) -> Result<Self, TransformError> {
        let factors = specs
            .iter()
            .map(|s| Ok((s.var.clone(), s.factor.resolve_int(config, "unrolljam")?)))
            .collect::<Result<Vec<_>, TransformError>>()?;
        Ok(Self { factors })
    }
}

impl Transform for UnrollJam {
    fn apply(&self, stmts: &[Stmt], outer: &[&Loop]) -> Result<Vec<Stmt>, TransformError> {
        let mut current = stmts.to_vec();
        for (var, factor) in &self.factors {
            check_factor(*factor, self.name())?;
            if *factor == 1 {
                continue;
            }
            if crate::analysis::find_loop(&current, var).is_none() {
                return Err(error(
                    TransformErrorKind::LoopNotFound,
                    self.name(),
                    format!("loop '{}' does not exist in the nest", var),
                ));
            }
            current = rewrite_loops(&current, outer, &mut |lp, enclosing| {
                if lp.var != *var {
                    return Ok(None);
                }
                unroll_and_jam(lp, *factor, enclosing).map(Some)
            })?;
        }
        Ok(current)
    }

    fn name(&self) -> &str {
        "unrolljam"
    }
}

/// Register tiling: unroll-and-jam with remainder loops, refused when a
/// loop sits inside another loop with the same index.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterTiling(pub UnrollJam);

impl Transform for RegisterTiling {
    fn apply(&self, stmts: &[Stmt], outer: &[&Loop]) -> Result<Vec<Stmt>, TransformError> {
        let mut enclosing: Vec<&str> = outer.iter().map(|l| l.var.as_str()).collect();
        check_distinct_indices(stmts, &mut enclosing, self.name())?;
        self.0
            .apply(stmts, outer)
            .map_err(|e| TransformError { transform: self.name().to_string(), ..e })
    }

    fn name(&self) -> &str {
        "regtile"
    }
}

fn check_distinct_indices<'a>(
    stmts: &'a [Stmt],
    enclosing: &mut Vec<&'a str>,
    transform: &str,
) -> Result<(), TransformError> {
    let nested = |var: &'a str, body: &'a [Stmt], enclosing: &mut Vec<&'a str>| {
        if enclosing.contains(&var) {
            return Err(error(
                TransformErrorKind::UnsupportedLoop,
                transform,
                format!("loops with the same index '{}' cannot be nested", var),
            ));
        }
        enclosing.push(var);
        let checked = check_distinct_indices(body, enclosing, transform);
        enclosing.pop();
        checked
    };
    for stmt in stmts {
        match stmt {
            Stmt::Loop(l) => nested(&l.var, &l.body, enclosing)?,
            Stmt::Launch(k) => nested(&k.var, &k.body, enclosing)?,
            Stmt::Block(b) => check_distinct_indices(b, enclosing, transform)?,
            Stmt::Transform(t) => check_distinct_indices(&t.body, enclosing, transform)?,
            Stmt::If { then_branch, else_branch, .. } => {
                check_distinct_indices(then_branch, enclosing, transform)?;
                check_distinct_indices(else_branch, enclosing, transform)?;
            }
            Stmt::Assign(_) | Stmt::Decl(_) => {}
        }
    }
    Ok(())
}

/// Plain unrolling of the top-level loops, optionally marked parallel.
#[derive(Debug, Clone, PartialEq)]
pub struct Unroll {
    /// Unroll factor
    pub factor: i64,
    /// Mark the unrolled loop parallel
    pub parallelize: bool,
}

impl Transform for Unroll {
    fn apply(&self, stmts: &[Stmt], outer: &[&Loop]) -> Result<Vec<Stmt>, TransformError> {
        check_factor(self.factor, self.name())?;
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            let Stmt::Loop(lp) = stmt else {
                out.push(stmt.clone());
                continue;
            };
            let parallel = if self.parallelize {
                let safety = loop_safety(lp, outer);
                if !safety.is_parallel() {
                    return Err(error(TransformErrorKind::UnsafeParallelization, self.name(), safety.reason()));
                }
                Some(parallel_info("omp parallel for", &safety, lp))
            } else {
                None
            };
            let mut unrolled = unroll_loop(lp, self.factor);
            if let (Some(info), Some(Stmt::Loop(main))) = (parallel, unrolled.first_mut()) {
                main.attrs.parallel = Some(info);
            }
            out.extend(unrolled);
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "unroll"
    }
}

fn check_factor(factor: i64, transform: &str) -> Result<(), TransformError> {
    if factor < 1 {
        return Err(error(
            TransformErrorKind::InvalidFactor,
            transform,
            format!("unroll factor must be at least 1, got {}", factor),
        ));
    }
    Ok(())
}

/// Unroll `lp` by `factor` without jamming: the main loop followed by the
/// remainder loop, if any.
pub(crate) fn unroll_loop(lp: &Loop, factor: i64) -> Vec<Stmt> {
    if factor <= 1 {
        return vec![Stmt::Loop(lp.clone())];
    }
    let body = concat(&replicas(lp, factor));
    with_remainder(lp, factor, body)
}

fn unroll_and_jam(lp: &Loop, factor: i64, outer: &[&Loop]) -> Result<Vec<Stmt>, TransformError> {
    let copies = replicas(lp, factor);
    if lp.is_innermost() {
        return Ok(with_remainder(lp, factor, concat(&copies)));
    }
    let scalars_ok = classify_scalars(&lp.body)
        .values()
        .all(|c| *c == ScalarClass::Private);
    if !scalars_ok {
        debug!("scalars flow between iterations of {}, unrolling without jam", lp.var);
        return Ok(with_remainder(lp, factor, concat(&copies)));
    }

    let mut fused = Vec::new();
    let mut reordered = false;
    let body = jam(&copies, &mut fused, &mut reordered);
    if !fused.is_empty() {
        let map = AccessMap::for_loop(lp, outer);
        let deps = DependenceAnalysis::new(&map);
        let fixed: Vec<String> = outer.iter().map(|l| l.var.clone()).collect();
        let mut band = vec![point_index(lp)];
        band.extend(fused.iter().cloned());
        if let Err(dep) = deps.band_permutable(&band, &fixed) {
            return Err(error(
                TransformErrorKind::IllegalTransform,
                "unrolljam",
                format!("jamming '{}' reverses {}", lp.var, dep),
            ));
        }
        if reordered {
            if let Some(dep) = deps.carried_by(&band[0], &fixed) {
                return Err(error(
                    TransformErrorKind::IllegalTransform,
                    "unrolljam",
                    format!("jamming '{}' reorders statements across {}", lp.var, dep),
                ));
            }
        }
        debug!("jammed {} copies of {} into loops {:?}", factor, lp.var, fused);
    }
    Ok(with_remainder(lp, factor, body))
}

/// The body with the index shifted by `r*step` for each `r < factor`.
fn replicas(lp: &Loop, factor: i64) -> Vec<Vec<Stmt>> {
    (0..factor)
        .map(|r| {
            let shifted = Expr::add(Expr::var(lp.var.clone()), Expr::int(r * lp.step)).simplify();
            lp.body.iter().map(|s| s.substitute(&lp.var, &shifted)).collect()
        })
        .collect()
}

/// Sequence the copies; copies declaring scalars get their own scope.
fn concat(copies: &[Vec<Stmt>]) -> Vec<Stmt> {
    let mut out = Vec::new();
    for copy in copies {
        if copy.iter().any(|s| matches!(s, Stmt::Decl(_))) {
            out.push(Stmt::Block(copy.clone()));
        } else {
            out.extend(copy.iter().cloned());
        }
    }
    out
}

fn jam(copies: &[Vec<Stmt>], fused: &mut Vec<String>, reordered: &mut bool) -> Vec<Stmt> {
    let Some(first) = copies.first() else {
        return Vec::new();
    };
    let fusable = first.iter().any(|s| matches!(s, Stmt::Loop(_)))
        && copies.iter().all(|c| c.len() == first.len())
        && first.iter().enumerate().all(|(p, stmt)| match stmt {
            Stmt::Loop(l) => copies.iter().all(|c| matches!(&c[p], Stmt::Loop(m) if same_loop(l, m))),
            Stmt::Assign(a) => matches!(a.target, LValue::Element(_)),
            Stmt::Decl(_) => false,
            other => !other.contains_loop() && !writes_scalar(other),
        });
    if !fusable {
        return concat(copies);
    }
    if first.len() > 1 {
        *reordered = true;
    }

    let mut out = Vec::new();
    for (p, stmt) in first.iter().enumerate() {
        match stmt {
            Stmt::Loop(l) => {
                if !fused.contains(&l.var) {
                    fused.push(l.var.clone());
                }
                let bodies: Vec<Vec<Stmt>> = copies
                    .iter()
                    .map(|c| match &c[p] {
                        Stmt::Loop(m) => m.body.clone(),
                        _ => Vec::new(),
                    })
                    .collect();
                let body = jam(&bodies, fused, reordered);
                out.push(Stmt::Loop(Loop { body, ..l.clone() }));
            }
            _ => out.extend(copies.iter().map(|c| c[p].clone())),
        }
    }
    out
}

fn same_loop(a: &Loop, b: &Loop) -> bool {
    a.same_header(b) && a.attrs == b.attrs
}

fn writes_scalar(stmt: &Stmt) -> bool {
    let mut found = false;
    stmt.walk(&mut |s| {
        found |= matches!(s, Stmt::Decl(_) | Stmt::Assign(crate::ir::nest::Assign { target: LValue::Scalar(_), .. }))
    });
    found
}

/// Main loop running `body` every `factor` iterations plus the remainder.
fn with_remainder(lp: &Loop, factor: i64, body: Vec<Stmt>) -> Vec<Stmt> {
    let step = lp.step;
    let range = Some(lp.value_range());
    let main = Loop {
        var: lp.var.clone(),
        lower: lp.lower.clone(),
        upper: Expr::sub(lp.upper.clone(), Expr::int((factor - 1) * step)).simplify(),
        step: factor * step,
        body,
        attrs: LoopAttrs { range: range.clone(), ..lp.attrs.clone() },
    };
    let mut out = vec![Stmt::Loop(main)];

    let remainder_lower = match lp.constant_trip_count() {
        Some(trip) if trip % factor == 0 => return out,
        Some(trip) => {
            let lower = lp.lower.simplify().as_int().unwrap_or(0);
            Expr::int(lower + (trip / factor) * factor * step)
        }
        None => {
            let trip = Expr::div(
                Expr::max(
                    Expr::add(Expr::sub(lp.upper.clone(), lp.lower.clone()), Expr::int(step)).simplify(),
                    Expr::int(0),
                ),
                Expr::int(step),
            );
            let full = Expr::mul(Expr::div(trip, Expr::int(factor)), Expr::int(factor * step));
            Expr::add(lp.lower.clone(), full).simplify()
        }
    };
    out.push(Stmt::Loop(Loop {
        lower: remainder_lower,
        attrs: LoopAttrs { range, parallel: None, ..lp.attrs.clone() },
        ..lp.clone()
    }));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{Interpreter, Workspace};
    use crate::ir::nest::LoopNest;
    use crate::transform::test_util::{loop_vars, stmts};

    const MATMUL: &str = "for (i=0; i<=N-1; i++) for (j=0; j<=N-1; j++) for (k=0; k<=N-1; k++)
        C[i][j] = C[i][j] + A[i][k] * B[k][j];";

    fn as_loop(s: &Stmt) -> &Loop {
        match s {
            Stmt::Loop(l) => l,
            other => panic!("expected loop, got {:?}", other),
        }
    }

    #[test]
    fn test_unroll_innermost_with_remainder() {
        let out = UnrollJam::new("i", 4).apply(&stmts("for (i=0; i<=9; i++) a[i] = b[i] + 1;"), &[]).unwrap();
        assert_eq!(out.len(), 2);
        let main = as_loop(&out[0]);
        assert_eq!(main.upper, Expr::int(6));
        assert_eq!(main.step, 4);
        assert_eq!(main.body.len(), 4);
        assert_eq!(as_loop(&out[1]).lower, Expr::int(8));
    }

    #[test]
    fn test_no_remainder_when_divisible() {
        let out = UnrollJam::new("i", 5).apply(&stmts("for (i=0; i<=9; i++) a[i] = 0;"), &[]).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_jam_matmul() {
        let out = UnrollJam::new("i", 2).apply(&stmts(MATMUL), &[]).unwrap();
        assert_eq!(loop_vars(&out), ["i", "j", "k", "i", "j", "k"]);
        let nest = LoopNest::new(out);
        assert_eq!(nest.loops()[2].body.len(), 2);
    }

    #[test]
    fn test_invalid_factor_and_missing_loop() {
        let body = stmts(MATMUL);
        let err = UnrollJam::new("i", 0).apply(&body, &[]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::InvalidFactor);
        let err = UnrollJam::new("q", 2).apply(&body, &[]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::LoopNotFound);
        assert_eq!(UnrollJam::new("i", 1).apply(&body, &[]).unwrap(), body);
    }

    #[test]
    fn test_illegal_jam() {
        let src = "for (i=1; i<=N-1; i++) for (j=0; j<=N-2; j++) A[i][j] = A[i-1][j+1];";
        let err = UnrollJam::new("i", 2).apply(&stmts(src), &[]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::IllegalTransform);
    }

    #[test]
    fn test_reduction_blocks_jam() {
        let src = "for (i=0; i<=N-1; i++) for (j=0; j<=N-1; j++) s = s + A[i][j];";
        let out = UnrollJam::new("i", 2).apply(&stmts(src), &[]).unwrap();
        let main = as_loop(&out[0]);
        assert_eq!(main.body.len(), 2);
        assert!(main.body.iter().all(|s| matches!(s, Stmt::Loop(_))));
    }

    #[test]
    fn test_jammed_matmul_matches() {
        let plain = LoopNest::new(stmts(MATMUL));
        let tuned = UnrollJam { factors: vec![("i".into(), 3), ("j".into(), 2)] };
        let jammed = LoopNest::new(tuned.apply(&plain.stmts, &[]).unwrap());
        let mut ws = Workspace::new();
        ws.set_int("N", 7);
        for (name, seed) in [("A", 1), ("B", 2), ("C", 3)] {
            ws.alloc_random(name, &[7, 7], seed);
        }
        let expected = Interpreter::new().run(&plain, ws.clone()).unwrap();
        let actual = Interpreter::new().run(&jammed, ws).unwrap();
        assert_eq!(expected.array("C"), actual.array("C"));
    }

    #[test]
    fn test_register_tiling_matches_with_residues() {
        let plain = LoopNest::new(stmts(MATMUL));
        let tiling = RegisterTiling(UnrollJam { factors: vec![("i".into(), 4), ("j".into(), 3)] });
        let tiled = LoopNest::new(tiling.apply(&plain.stmts, &[]).unwrap());
        assert_eq!(loop_vars(&tiled.stmts).iter().filter(|v| *v == "i").count(), 2);
        let mut ws = Workspace::new();
        ws.set_int("N", 10);
        for (name, seed) in [("A", 4), ("B", 5), ("C", 6)] {
            ws.alloc_random(name, &[10, 10], seed);
        }
        let expected = Interpreter::new().run(&plain, ws.clone()).unwrap();
        let actual = Interpreter::new().run(&tiled, ws).unwrap();
        assert_eq!(expected.array("C"), actual.array("C"));
    }

    #[test]
    fn test_register_tiling_rejects_shadowed_index() {
        let src = "for (i=0; i<=N-1; i++) for (j=0; j<=N-1; j++) for (i=0; i<=3; i++) a[i] = b[j];";
        let err = RegisterTiling(UnrollJam::new("j", 2)).apply(&stmts(src), &[]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::UnsupportedLoop);
        assert_eq!(err.transform, "regtile");
        assert!(err.message.contains("'i'"));

        let inner = stmts("for (i=0; i<=3; i++) a[i] = 0;");
        let outer = Loop::new("i", Expr::int(0), Expr::int(9), 1, inner.clone());
        let err = RegisterTiling(UnrollJam::new("i", 2)).apply(&inner, &[&outer]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::UnsupportedLoop);

        let err = RegisterTiling(UnrollJam::new("q", 2)).apply(&stmts(MATMUL), &[]).unwrap_err();
        assert_eq!((err.kind, err.transform.as_str()), (TransformErrorKind::LoopNotFound, "regtile"));
    }

    #[test]
    fn test_unroll_parallelize() {
        let unroll = Unroll { factor: 2, parallelize: true };
        let out = unroll.apply(&stmts("for (i=0; i<=N-1; i++) { t = x[i]; y[i] = t * t; }"), &[]).unwrap();
        let info = as_loop(&out[0]).attrs.parallel.clone().unwrap();
        assert_eq!(info.pragma, "omp parallel for");
        assert_eq!(info.private, ["t"]);
        assert!(as_loop(&out[1]).attrs.parallel.is_none());

        let err = unroll.apply(&stmts("for (i=1; i<=N-1; i++) a[i] = a[i-1];"), &[]).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::UnsafeParallelization);
    }
}
