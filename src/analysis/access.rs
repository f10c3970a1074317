//! Array and scalar references of a loop nest.
//!
//! [`AccessMap`] lists every array reference with the loops enclosing it,
//! in execution order. [`classify_scalars`] decides for each scalar
//! written in a loop body whether iterations can own a private copy,
//! combine it as a reduction, or must see each other's values.

use crate::ir::expr::{Access, BinaryOp, Expr};
use crate::ir::nest::{Assign, AssignOp, LValue, Loop, ReduceOp, Stmt};
use std::collections::{BTreeMap, BTreeSet};

/// Value ranges of loop indices, keyed by index name.
pub type LoopBounds = BTreeMap<String, (Expr, Expr)>;

/// One array reference.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessSite {
    /// The referenced element
    pub access: Access,
    /// Written (true) or read (false)
    pub is_write: bool,
    /// Position in execution order within one iteration
    pub order: usize,
    /// Enclosing loop indices, outermost first
    pub loops: Vec<String>,
}

impl AccessSite {
    /// Check whether the reference is inside loop `var`.
    pub fn inside(&self, var: &str) -> bool {
        self.loops.iter().any(|l| l == var)
    }
}

/// All array references of a statement list.
#[derive(Debug, Clone, Default)]
pub struct AccessMap {
    /// References in execution order
    pub sites: Vec<AccessSite>,
    /// Value ranges of every loop seen, including the enclosing ones
    pub bounds: LoopBounds,
}

impl AccessMap {
    /// Collect the references of `stmts`, which sit inside `outer`.
    pub fn collect(stmts: &[Stmt], outer: &[&Loop]) -> Self {
        let mut map = AccessMap::default();
        let mut stack: Vec<String> = Vec::with_capacity(outer.len());
        for l in outer {
            map.bounds.insert(l.var.clone(), l.value_range());
            stack.push(l.var.clone());
        }
        map.visit_all(stmts, &mut stack);
        map
    }

    /// Collect the references of loop `lp` itself, which sits inside `outer`.
    pub fn for_loop(lp: &Loop, outer: &[&Loop]) -> Self {
        let mut map = AccessMap::default();
        let mut stack: Vec<String> = Vec::with_capacity(outer.len() + 1);
        for l in outer.iter().copied().chain(std::iter::once(lp)) {
            map.bounds.insert(l.var.clone(), l.value_range());
            stack.push(l.var.clone());
        }
        map.visit_all(&lp.body, &mut stack);
        map
    }

    /// References inside loop `var`.
    pub fn within<'a>(&'a self, var: &'a str) -> impl Iterator<Item = &'a AccessSite> + 'a {
        self.sites.iter().filter(move |s| s.inside(var))
    }

    /// Arrays written anywhere.
    pub fn written_arrays(&self) -> BTreeSet<String> {
        self.sites.iter().filter(|s| s.is_write).map(|s| s.access.array.clone()).collect()
    }

    fn visit_all(&mut self, stmts: &[Stmt], stack: &mut Vec<String>) {
        for s in stmts {
            self.visit(s, stack);
        }
    }

    fn visit(&mut self, stmt: &Stmt, stack: &mut Vec<String>) {
        match stmt {
            Stmt::Assign(a) => {
                if let LValue::Element(target) = &a.target {
                    for idx in &target.indices {
                        self.reads(idx, stack);
                    }
                }
                self.reads(&a.value, stack);
                if let LValue::Element(target) = &a.target {
                    if a.op != AssignOp::Set {
                        self.push(target.clone(), false, stack);
                    }
                    self.push(target.clone(), true, stack);
                }
            }
            Stmt::Decl(d) => {
                if let Some(init) = &d.init {
                    self.reads(init, stack);
                }
            }
            Stmt::Loop(l) => {
                self.reads(&l.lower, stack);
                self.reads(&l.upper, stack);
                self.bounds.insert(l.var.clone(), l.value_range());
                stack.push(l.var.clone());
                self.visit_all(&l.body, stack);
                stack.pop();
            }
            Stmt::Launch(k) => {
                self.bounds.insert(k.var.clone(), (k.lower.clone(), k.upper.clone()));
                stack.push(k.var.clone());
                self.visit_all(&k.body, stack);
                stack.pop();
            }
            Stmt::Block(b) => self.visit_all(b, stack),
            Stmt::If { cond, then_branch, else_branch } => {
                self.reads(cond, stack);
                self.visit_all(then_branch, stack);
                self.visit_all(else_branch, stack);
            }
            Stmt::Transform(t) => self.visit_all(&t.body, stack),
        }
    }

    fn reads(&mut self, expr: &Expr, stack: &[String]) {
        let mut found = Vec::new();
        expr.for_each_access(&mut |a| found.push(a.clone()));
        for a in found {
            self.push(a, false, stack);
        }
    }

    fn push(&mut self, access: Access, is_write: bool, stack: &[String]) {
        let order = self.sites.len();
        self.sites.push(AccessSite { access, is_write, order, loops: stack.to_vec() });
    }
}

/// How iterations of a loop share a scalar written in its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarClass {
    /// Every iteration writes it before reading it
    Private,
    /// Only updated by an associative operator and never read otherwise
    Reduction(ReduceOp),
    /// Values flow between iterations
    Carried,
}

/// Recognize `s += e`, `s -= e`, `s *= e`, `s = s + e`, `s = e + s`,
/// `s = s - e` and `s = s * e` with `e` free of `s`.
pub fn reduction_of(assign: &Assign) -> Option<(ReduceOp, &Expr)> {
    let LValue::Scalar(name) = &assign.target else {
        return None;
    };
    let (op, operand) = match (assign.op, &assign.value) {
        (AssignOp::Add | AssignOp::Sub, e) => (ReduceOp::Add, e),
        (AssignOp::Mul, e) => (ReduceOp::Mul, e),
        (AssignOp::Set, Expr::Binary(BinaryOp::Add, l, r)) => match (l.as_ref(), r.as_ref()) {
            (Expr::Var(v), e) if v == name => (ReduceOp::Add, e),
            (e, Expr::Var(v)) if v == name => (ReduceOp::Add, e),
            _ => return None,
        },
        (AssignOp::Set, Expr::Binary(BinaryOp::Sub, l, r)) => match l.as_ref() {
            Expr::Var(v) if v == name => (ReduceOp::Add, r.as_ref()),
            _ => return None,
        },
        (AssignOp::Set, Expr::Binary(BinaryOp::Mul, l, r)) => match (l.as_ref(), r.as_ref()) {
            (Expr::Var(v), e) if v == name => (ReduceOp::Mul, e),
            (e, Expr::Var(v)) if v == name => (ReduceOp::Mul, e),
            _ => return None,
        },
        _ => return None,
    };
    if operand.mentions(name) {
        return None;
    }
    Some((op, operand))
}

#[derive(Debug, Default)]
struct ScalarState {
    declared: bool,
    /// First event: true for a read, false for a write
    first_is_read: Option<bool>,
    first_write_conditional: bool,
    reduction: Option<ReduceOp>,
    plain_writes: bool,
    mixed_reductions: bool,
    other_reads: bool,
    written: bool,
}

/// Classify every scalar written in `body` (inner loop indices included).
pub fn classify_scalars(body: &[Stmt]) -> BTreeMap<String, ScalarClass> {
    let mut states: BTreeMap<String, ScalarState> = BTreeMap::new();
    scan_scalars(body, false, &mut states);
    states
        .into_iter()
        .filter(|(_, s)| s.written)
        .map(|(name, s)| {
            let class = if s.declared {
                ScalarClass::Private
            } else if let (Some(op), false, false, false) =
                (s.reduction, s.plain_writes, s.mixed_reductions, s.other_reads)
            {
                ScalarClass::Reduction(op)
            } else if s.first_is_read == Some(false) && !s.first_write_conditional && s.reduction.is_none() {
                ScalarClass::Private
            } else {
                ScalarClass::Carried
            };
            (name, class)
        })
        .collect()
}

fn note_reads(expr: &Expr, states: &mut BTreeMap<String, ScalarState>) {
    let mut names = BTreeSet::new();
    expr.free_vars(&mut names);
    for name in names {
        let st = states.entry(name).or_default();
        st.other_reads = true;
        st.first_is_read.get_or_insert(true);
    }
}

fn scan_scalars(stmts: &[Stmt], conditional: bool, states: &mut BTreeMap<String, ScalarState>) {
    for stmt in stmts {
        match stmt {
            Stmt::Assign(a) => match &a.target {
                LValue::Scalar(name) => {
                    if let Some((op, operand)) = reduction_of(a) {
                        note_reads(operand, states);
                        let st = states.entry(name.clone()).or_default();
                        st.written = true;
                        st.first_is_read.get_or_insert(true);
                        match st.reduction {
                            Some(prev) if prev != op => st.mixed_reductions = true,
                            _ => st.reduction = Some(op),
                        }
                    } else {
                        note_reads(&a.value, states);
                        if a.op != AssignOp::Set {
                            note_reads(&Expr::var(name.clone()), states);
                        }
                        let st = states.entry(name.clone()).or_default();
                        st.written = true;
                        st.plain_writes = true;
                        if st.first_is_read.is_none() {
                            st.first_is_read = Some(false);
                            st.first_write_conditional = conditional;
                        }
                    }
                }
                LValue::Element(acc) => {
                    for idx in &acc.indices {
                        note_reads(idx, states);
                    }
                    note_reads(&a.value, states);
                }
            },
            Stmt::Decl(d) => {
                if let Some(init) = &d.init {
                    note_reads(init, states);
                }
                let st = states.entry(d.name.clone()).or_default();
                st.declared = true;
                st.written = true;
            }
            Stmt::Loop(l) => {
                note_reads(&l.lower, states);
                note_reads(&l.upper, states);
                let st = states.entry(l.var.clone()).or_default();
                st.declared = true;
                st.written = true;
                scan_scalars(&l.body, conditional, states);
            }
            Stmt::Launch(k) => {
                let st = states.entry(k.var.clone()).or_default();
                st.declared = true;
                st.written = true;
                scan_scalars(&k.body, conditional, states);
            }
            Stmt::Block(b) => scan_scalars(b, conditional, states),
            Stmt::If { cond, then_branch, else_branch } => {
                note_reads(cond, states);
                scan_scalars(then_branch, true, states);
                scan_scalars(else_branch, true, states);
            }
            Stmt::Transform(t) => scan_scalars(&t.body, conditional, states),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{Lexer, Parser};

    fn code(src: &str) -> Vec<Stmt> {
        Parser::new(Lexer::new(src)).unwrap().parse_loop_code().unwrap()
    }

    fn body(src: &str) -> Vec<Stmt> {
        match code(src).remove(0) {
            Stmt::Loop(l) => l.body,
            other => panic!("expected a loop, got {:?}", other),
        }
    }

    #[test]
    fn test_access_order_and_loops() {
        let stmts = code("for (i=0; i<=9; i++) for (j=0; j<=9; j++) y[i] += A[i][j]*x[j];");
        let map = AccessMap::collect(&stmts, &[]);
        let summary: Vec<(String, bool)> =
            map.sites.iter().map(|s| (s.access.array.clone(), s.is_write)).collect();
        assert_eq!(
            summary,
            vec![
                ("A".to_string(), false),
                ("x".to_string(), false),
                ("y".to_string(), false),
                ("y".to_string(), true),
            ]
        );
        assert_eq!(map.sites[0].loops, vec!["i", "j"]);
        assert_eq!(map.bounds["j"].1, Expr::Int(9));
        assert_eq!(map.written_arrays().len(), 1);
    }

    #[test]
    fn test_reduction_patterns() {
        let classes = classify_scalars(&body("for (i=0; i<=9; i++) { s = s + a[i]; p *= a[i]; }"));
        assert_eq!(classes["s"], ScalarClass::Reduction(ReduceOp::Add));
        assert_eq!(classes["p"], ScalarClass::Reduction(ReduceOp::Mul));
    }

    #[test]
    fn test_private_and_carried() {
        let classes = classify_scalars(&body(
            "for (i=0; i<=9; i++) { t = a[i]*2; b[i] = t; b[i] = b[i] + prev; prev = a[i]; }",
        ));
        assert_eq!(classes["t"], ScalarClass::Private);
        assert_eq!(classes["prev"], ScalarClass::Carried);
    }

    #[test]
    fn test_reduction_read_elsewhere_is_carried() {
        let classes = classify_scalars(&body("for (i=0; i<=9; i++) { s += a[i]; b[i] = s; }"));
        assert_eq!(classes["s"], ScalarClass::Carried);
    }

    #[test]
    fn test_inner_index_is_private() {
        let classes = classify_scalars(&body("for (i=0; i<=9; i++) for (j=0; j<=9; j++) a[i][j] = 0;"));
        assert_eq!(classes["j"], ScalarClass::Private);
    }

    #[test]
    fn test_conditional_first_write_is_carried() {
        let classes = classify_scalars(&body("for (i=0; i<=9; i++) { if (a[i] > 0) m = a[i]; b[i] = m; }"));
        assert_eq!(classes["m"], ScalarClass::Carried);
    }
}
