//! Scalar replacement of array references.
//!
//! Within an innermost loop, an element whose subscripts do not change
//! across iterations is loaded into a scalar before the loop and stored
//! back after it; elements of read-only arrays that are read several
//! times in one iteration are loaded once at the top of the body.

use crate::analysis::{AccessMap, DependenceAnalysis};
use crate::ir::expr::{Access, BinaryOp, Expr};
use crate::ir::nest::{Assign, AssignOp, Decl, LValue, Loop, LoopNest, Stmt};
use crate::transform::{rewrite_loops, Transform};
use crate::utils::errors::TransformError;
use log::debug;
use std::collections::BTreeSet;

/// Replace array references by scalar temporaries.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarReplacement {
    /// Toggle
    pub enabled: bool,
    /// C type of the temporaries
    pub elem_type: String,
    /// Prefix of temporary names
    pub prefix: String,
}

impl ScalarReplacement {
    /// Enabled replacement with `double` temporaries named `scv_<n>`.
    pub fn new() -> Self {
        Self { enabled: true, elem_type: "double".to_string(), prefix: "scv_".to_string() }
    }
}

impl Default for ScalarReplacement {
    fn default() -> Self {
        Self::new()
    }
}

struct Names {
    prefix: String,
    counter: usize,
    taken: BTreeSet<String>,
}

impl Names {
    fn fresh(&mut self) -> String {
        loop {
            self.counter += 1;
            let name = format!("{}{}", self.prefix, self.counter);
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }
}

impl Transform for ScalarReplacement {
    fn apply(&self, stmts: &[Stmt], outer: &[&Loop]) -> Result<Vec<Stmt>, TransformError> {
        if !self.enabled {
            return Ok(stmts.to_vec());
        }
        let mut names = Names { prefix: self.prefix.clone(), counter: 0, taken: used_names(stmts, outer) };
        rewrite_loops(stmts, outer, &mut |lp, enclosing| {
            if !lp.is_innermost() {
                return Ok(None);
            }
            Ok(Some(self.replace_in(lp, enclosing, &mut names)))
        })
    }

    fn name(&self) -> &str {
        "scalarreplace"
    }
}

impl ScalarReplacement {
    fn replace_in(&self, lp: &Loop, outer: &[&Loop], names: &mut Names) -> Vec<Stmt> {
        let map = AccessMap::for_loop(lp, outer);
        let deps = DependenceAnalysis::new(&map);
        let fixed: Vec<String> = outer.iter().map(|l| l.var.clone()).collect();
        let assigned = LoopNest::new(lp.body.clone()).assigned_scalars();
        let mut varying = assigned.clone();
        varying.insert(lp.var.clone());

        let mut invariant: Vec<(Access, bool)> = Vec::new();
        for site in &map.sites {
            let acc = &site.access;
            if let Some(entry) = invariant.iter_mut().find(|(a, _)| a == acc) {
                entry.1 |= site.is_write;
                continue;
            }
            let stable = acc.indices.iter().all(|e| !has_access(e) && varying.iter().all(|v| !e.mentions(v)));
            let alone = map
                .sites
                .iter()
                .filter(|o| o.access.array == acc.array && o.access != *acc)
                .all(|o| !deps.may_alias(acc, &o.access, &fixed));
            if stable && alone {
                invariant.push((acc.clone(), site.is_write));
            }
        }

        let mut body = lp.body.clone();
        let mut before = Vec::new();
        let mut after = Vec::new();
        for (acc, written) in &invariant {
            let scalar = names.fresh();
            debug!("holding {} in {} across loop {}", acc, scalar, lp.var);
            body = body.iter().map(|s| replace_in_stmt(s, acc, &scalar)).collect();
            before.push(Stmt::Decl(Decl {
                ty: self.elem_type.clone(),
                name: scalar.clone(),
                init: Some(Expr::Access(acc.clone())),
            }));
            if *written {
                after.push(Stmt::assign(LValue::Element(acc.clone()), AssignOp::Set, Expr::var(scalar)));
            }
        }

        let body = self.load_repeated_reads(body, &assigned, names);
        let new_loop = Stmt::Loop(Loop { body, ..lp.clone() });
        if before.is_empty() {
            return vec![new_loop];
        }
        let mut guarded = before;
        guarded.push(new_loop);
        guarded.extend(after);
        match lp.constant_trip_count() {
            Some(trip) if trip > 0 => vec![Stmt::Block(guarded)],
            _ => vec![Stmt::If {
                cond: Expr::binary(BinaryOp::Le, lp.lower.clone(), lp.upper.clone()),
                then_branch: guarded,
                else_branch: Vec::new(),
            }],
        }
    }

    /// Load elements of read-only arrays read more than once per iteration.
    fn load_repeated_reads(&self, body: Vec<Stmt>, assigned: &BTreeSet<String>, names: &mut Names) -> Vec<Stmt> {
        let written = AccessMap::collect(&body, &[]).written_arrays();
        let mut counts: Vec<(Access, usize)> = Vec::new();
        for stmt in &body {
            let mut visit = |e: &Expr| {
                e.for_each_access(&mut |a| {
                    if written.contains(&a.array) || a.indices.iter().any(has_access) {
                        return;
                    }
                    if a.indices.iter().any(|e| assigned.iter().any(|v| e.mentions(v))) {
                        return;
                    }
                    match counts.iter_mut().find(|(c, _)| c == a) {
                        Some(entry) => entry.1 += 1,
                        None => counts.push((a.clone(), 1)),
                    }
                })
            };
            match stmt {
                Stmt::Assign(a) => {
                    if let LValue::Element(acc) = &a.target {
                        acc.indices.iter().for_each(&mut visit);
                    }
                    visit(&a.value);
                }
                Stmt::Decl(Decl { init: Some(e), .. }) => visit(e),
                _ => {}
            }
        }

        let mut loads = Vec::new();
        let mut body = body;
        for (acc, count) in counts {
            if count < 2 {
                continue;
            }
            let scalar = names.fresh();
            body = body.iter().map(|s| replace_in_stmt(s, &acc, &scalar)).collect();
            loads.push(Stmt::Decl(Decl {
                ty: self.elem_type.clone(),
                name: scalar,
                init: Some(Expr::Access(acc)),
            }));
        }
        loads.extend(body);
        loads
    }
}

fn has_access(e: &Expr) -> bool {
    let mut found = false;
    e.for_each_access(&mut |_| found = true);
    found
}

/// Every name in use, so fresh temporaries cannot shadow anything.
fn used_names(stmts: &[Stmt], outer: &[&Loop]) -> BTreeSet<String> {
    let mut out: BTreeSet<String> = outer.iter().map(|l| l.var.clone()).collect();
    for stmt in stmts {
        stmt.walk(&mut |s| match s {
            Stmt::Assign(a) => {
                match &a.target {
                    LValue::Scalar(name) => {
                        out.insert(name.clone());
                    }
                    LValue::Element(acc) => acc.indices.iter().for_each(|e| e.free_vars(&mut out)),
                }
                a.value.free_vars(&mut out);
            }
            Stmt::Decl(d) => {
                out.insert(d.name.clone());
                if let Some(e) = &d.init {
                    e.free_vars(&mut out);
                }
            }
            Stmt::Loop(l) => {
                out.insert(l.var.clone());
                l.lower.free_vars(&mut out);
                l.upper.free_vars(&mut out);
            }
            Stmt::If { cond, .. } => cond.free_vars(&mut out),
            _ => {}
        });
    }
    out
}

fn replace_in_stmt(stmt: &Stmt, acc: &Access, scalar: &str) -> Stmt {
    let with = Expr::var(scalar);
    let rep = |e: &Expr| e.replace_access(acc, &with);
    let rep_all = |b: &[Stmt]| b.iter().map(|s| replace_in_stmt(s, acc, scalar)).collect::<Vec<_>>();
    match stmt {
        Stmt::Assign(a) => Stmt::Assign(Assign {
            target: match &a.target {
                LValue::Element(t) if t == acc => LValue::Scalar(scalar.to_string()),
                LValue::Element(t) => LValue::Element(Access::new(t.array.clone(), t.indices.iter().map(rep).collect())),
                other => other.clone(),
            },
            op: a.op,
            value: rep(&a.value),
        }),
        Stmt::Decl(d) => Stmt::Decl(Decl { init: d.init.as_ref().map(rep), ..d.clone() }),
        Stmt::Loop(l) => Stmt::Loop(Loop { body: rep_all(&l.body), ..l.clone() }),
        Stmt::Block(b) => Stmt::Block(rep_all(b)),
        Stmt::If { cond, then_branch, else_branch } => Stmt::If {
            cond: rep(cond),
            then_branch: rep_all(then_branch),
            else_branch: rep_all(else_branch),
        },
        other => other.clone(),
    }
}
