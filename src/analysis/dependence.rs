//! Dependence testing between array references.
//!
//! Subscripts are compared dimension by dimension as integer linear forms:
//! - a non-zero constant difference or a failed GCD test proves independence
//! - `c*(v - v')` patterns give an exact distance along loop `v`
//! - a single remaining loop index with unit coefficient is checked against
//!   the index's value range
//!
//! Everything else leaves the distance unknown, which the legality checks
//! treat as "any value".

use crate::analysis::access::{AccessMap, AccessSite};
use crate::ir::affine::LinearForm;
use crate::ir::expr::Access;
use num_integer::Integer;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Kind of data dependence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependenceKind {
    /// Read-after-write
    Flow,
    /// Write-after-read
    Anti,
    /// Write-after-write
    Output,
}

impl DependenceKind {
    /// Get short name for the dependence kind.
    pub fn short_name(&self) -> &'static str {
        match self {
            DependenceKind::Flow => "RAW",
            DependenceKind::Anti => "WAR",
            DependenceKind::Output => "WAW",
        }
    }
}

/// Iteration distance along one loop, target minus source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    /// Known distance
    Exact(i64),
    /// Unconstrained
    Any,
}

impl Distance {
    fn can_be_zero(&self) -> bool {
        matches!(self, Distance::Exact(0) | Distance::Any)
    }

    fn can_be_positive(&self) -> bool {
        match self {
            Distance::Exact(d) => *d > 0,
            Distance::Any => true,
        }
    }

    fn can_be_negative(&self) -> bool {
        match self {
            Distance::Exact(d) => *d < 0,
            Distance::Any => true,
        }
    }

    fn can_be_nonzero(&self) -> bool {
        !matches!(self, Distance::Exact(0))
    }

    fn negate(self) -> Distance {
        match self {
            Distance::Exact(d) => Distance::Exact(-d),
            Distance::Any => Distance::Any,
        }
    }

    /// Direction of the distance.
    pub fn direction(&self) -> Direction {
        match self {
            Distance::Exact(d) => Direction::from_distance(*d),
            Distance::Any => Direction::Star,
        }
    }
}

/// Direction of a dependence in one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// < (forward dependence, positive distance)
    Lt,
    /// = (same iteration, zero distance)
    Eq,
    /// > (backward dependence, negative distance)
    Gt,
    /// * (unknown/any direction)
    Star,
}

impl Direction {
    /// Get the character representation.
    pub fn to_char(&self) -> char {
        match self {
            Direction::Lt => '<',
            Direction::Eq => '=',
            Direction::Gt => '>',
            Direction::Star => '*',
        }
    }

    /// Compute direction from a distance value.
    pub fn from_distance(dist: i64) -> Direction {
        match dist.cmp(&0) {
            std::cmp::Ordering::Less => Direction::Gt,
            std::cmp::Ordering::Equal => Direction::Eq,
            std::cmp::Ordering::Greater => Direction::Lt,
        }
    }
}

/// A possible dependence between two references.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependence {
    /// Array involved
    pub array: String,
    /// Kind, by the textual order of the two references
    pub kind: DependenceKind,
    /// Textual position of the earlier reference
    pub source: usize,
    /// Textual position of the later reference
    pub target: usize,
    /// Distances along the queried loops, outermost first
    pub distances: Vec<(String, Distance)>,
}

impl Dependence {
    /// Distance along loop `var`, if it was queried.
    pub fn distance(&self, var: &str) -> Option<Distance> {
        self.distances.iter().find(|(v, _)| v == var).map(|(_, d)| *d)
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        let dir: String = self.distances.iter().map(|(_, d)| d.direction().to_char()).collect();
        let loops: Vec<&str> = self.distances.iter().map(|(v, _)| v.as_str()).collect();
        format!(
            "{} on {} between references {} and {} dir({})=<{}>",
            self.kind.short_name(),
            self.array,
            self.source,
            self.target,
            loops.join(","),
            dir
        )
    }
}

impl fmt::Display for Dependence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Dependence analyzer over the references of one nest.
pub struct DependenceAnalysis<'m> {
    map: &'m AccessMap,
}

impl<'m> DependenceAnalysis<'m> {
    /// Create a new dependence analyzer.
    pub fn new(map: &'m AccessMap) -> Self {
        Self { map }
    }

    /// Possible dependences between references inside every loop of
    /// `loops`, assuming the loops in `fixed` take equal values at both
    /// ends.
    pub fn dependences(&self, loops: &[String], fixed: &[String]) -> Vec<Dependence> {
        let fixed: BTreeSet<&str> = fixed.iter().map(String::as_str).collect();
        let sites: Vec<&AccessSite> = self
            .map
            .sites
            .iter()
            .filter(|s| loops.iter().all(|l| s.inside(l)))
            .collect();

        let mut deps = Vec::new();
        for (i, a) in sites.iter().enumerate() {
            for b in &sites[i..] {
                if a.access.array != b.access.array || !(a.is_write || b.is_write) {
                    continue;
                }
                if a.order == b.order && !a.is_write {
                    continue;
                }
                let Some(known) = self.test_pair(&a.access, &b.access, &fixed) else {
                    continue;
                };
                let kind = match (a.is_write, b.is_write) {
                    (true, false) => DependenceKind::Flow,
                    (false, true) => DependenceKind::Anti,
                    _ => DependenceKind::Output,
                };
                let distances = loops
                    .iter()
                    .filter(|l| !fixed.contains(l.as_str()))
                    .map(|l| (l.clone(), known.get(l.as_str()).copied().unwrap_or(Distance::Any)))
                    .collect();
                deps.push(Dependence {
                    array: a.access.array.clone(),
                    kind,
                    source: a.order,
                    target: b.order,
                    distances,
                });
            }
        }
        deps
    }

    /// First dependence carried by loop `var` when the loops in `fixed`
    /// (those enclosing `var`) are held equal.
    pub fn carried_by(&self, var: &str, fixed: &[String]) -> Option<Dependence> {
        self.dependences(&[var.to_string()], fixed)
            .into_iter()
            .find(|d| d.distance(var).map_or(false, |x| x.can_be_nonzero()))
    }

    /// Check that any order of the loops in `band` respects every
    /// dependence among the references inside all of them; returns the
    /// first offending dependence.
    pub fn band_permutable(&self, band: &[String], fixed: &[String]) -> Result<(), Dependence> {
        for dep in self.dependences(band, fixed) {
            let comps: Vec<Distance> = dep.distances.iter().map(|(_, d)| *d).collect();
            let reversed: Vec<Distance> = comps.iter().map(|d| d.negate()).collect();
            if has_negative_component(&comps) || has_negative_component(&reversed) {
                return Err(dep);
            }
        }
        Ok(())
    }

    /// Check whether `a` and `b` may name the same element for some pair
    /// of iterations that agree on the loops in `fixed`.
    pub fn may_alias(&self, a: &Access, b: &Access, fixed: &[String]) -> bool {
        let fixed: BTreeSet<&str> = fixed.iter().map(String::as_str).collect();
        a.array == b.array && self.test_pair(a, b, &fixed).is_some()
    }

    /// Distances constrained by the subscripts of `a` and `b`, or `None`
    /// when they never overlap.
    fn test_pair(&self, a: &Access, b: &Access, fixed: &BTreeSet<&str>) -> Option<BTreeMap<String, Distance>> {
        let bounds = &self.map.bounds;
        let rename = |name: &str| -> String {
            if bounds.contains_key(name) && !fixed.contains(name) {
                format!("{}'", name)
            } else {
                name.to_string()
            }
        };
        // fixed loops act as symbolic constants
        let is_loop = |sym: &str| match sym.strip_suffix('\'') {
            Some(base) => bounds.contains_key(base),
            None => bounds.contains_key(sym) && !fixed.contains(sym),
        };

        let mut known: BTreeMap<String, Distance> = BTreeMap::new();
        for (ia, ib) in a.indices.iter().zip(&b.indices) {
            let (Some(fa), Some(fb)) = (LinearForm::from_expr(ia), LinearForm::from_expr_with(ib, &rename)) else {
                continue;
            };
            let diff = fa.sub(&fb);
            if let Some(c) = diff.as_constant() {
                if c != 0 {
                    return None;
                }
                continue;
            }
            if !gcd_test(&diff) {
                return None;
            }
            match dimension_test(&diff, &is_loop, &|x| self.value_range(x, &rename)) {
                DimResult::Independent => return None,
                DimResult::Unknown => {}
                DimResult::Distance(var, d) => match known.get(&var) {
                    Some(Distance::Exact(prev)) if *prev != d => return None,
                    _ => {
                        known.insert(var, Distance::Exact(d));
                    }
                },
            }
        }
        Some(known)
    }

    /// Value range of a plain or primed loop index as linear forms.
    fn value_range(&self, sym: &str, rename: &dyn Fn(&str) -> String) -> Option<(LinearForm, LinearForm)> {
        let primed = sym.ends_with('\'');
        let (lo, hi) = self.map.bounds.get(sym.trim_end_matches('\''))?;
        let keep = |name: &str| name.to_string();
        let f: &dyn Fn(&str) -> String = if primed { rename } else { &keep };
        Some((LinearForm::from_expr_with(lo, f)?, LinearForm::from_expr_with(hi, f)?))
    }
}

enum DimResult {
    Independent,
    Unknown,
    Distance(String, i64),
}

/// GCD test: the constant must be a multiple of the coefficients' GCD.
fn gcd_test(diff: &LinearForm) -> bool {
    let g = diff.coefficient_gcd();
    g == 0 || diff.constant.mod_floor(&g) == 0
}

fn dimension_test(
    diff: &LinearForm,
    is_loop: &dyn Fn(&str) -> bool,
    range: &dyn Fn(&str) -> Option<(LinearForm, LinearForm)>,
) -> DimResult {
    let mut atoms: Vec<(&str, i64)> = Vec::new();
    for (mono, coeff) in &diff.terms {
        if mono.iter().any(|s| is_loop(s)) {
            if mono.len() > 1 {
                return DimResult::Unknown;
            }
            atoms.push((mono[0].as_str(), *coeff));
        }
    }

    // c*(v - v') + r
    if let [(x, cx), (y, cy)] = atoms.as_slice() {
        let (plain, primed, c) = if y.strip_suffix('\'') == Some(*x) {
            (*x, *y, *cx)
        } else if x.strip_suffix('\'') == Some(*y) {
            (*y, *x, *cy)
        } else {
            return DimResult::Unknown;
        };
        if *cx + *cy != 0 {
            return DimResult::Unknown;
        }
        let rest = diff.without(plain).without(primed);
        return match rest.as_constant() {
            Some(r) if r % c != 0 => DimResult::Independent,
            Some(r) => DimResult::Distance(plain.to_string(), r / c),
            None => DimResult::Unknown,
        };
    }

    // single index with unit coefficient: check its value range
    if let [(x, c)] = atoms.as_slice() {
        if c.abs() != 1 {
            return DimResult::Unknown;
        }
        let Some((lb, ub)) = range(x) else {
            return DimResult::Unknown;
        };
        let rest = diff.without(x);
        let (lo, hi) = if *c == 1 {
            (lb.add(&rest), ub.add(&rest))
        } else {
            (rest.sub(&ub), rest.sub(&lb))
        };
        let excluded = lo.as_constant().map_or(false, |v| v > 0) || hi.as_constant().map_or(false, |v| v < 0);
        return if excluded { DimResult::Independent } else { DimResult::Unknown };
    }

    DimResult::Unknown
}

/// Some lexicographically positive vector in the set has a negative entry.
fn has_negative_component(comps: &[Distance]) -> bool {
    for p in 0..comps.len() {
        if !comps[..p].iter().all(Distance::can_be_zero) {
            break;
        }
        if comps[p].can_be_positive() && comps[p + 1..].iter().any(Distance::can_be_negative) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{Lexer, Parser};
    use crate::ir::expr::Expr;

    fn map(src: &str) -> AccessMap {
        let stmts = Parser::new(Lexer::new(src)).unwrap().parse_loop_code().unwrap();
        AccessMap::collect(&stmts, &[])
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_gcd_test() {
        let form = |s: &str| LinearForm::from_expr(&Parser::new(Lexer::new(s)).unwrap().parse_c_expr().unwrap()).unwrap();
        assert!(!gcd_test(&form("2*i - 2*j + 1")));
        assert!(gcd_test(&form("3*i - 6*j + 9")));
    }

    #[test]
    fn test_direction_from_distance() {
        assert_eq!(Direction::from_distance(1), Direction::Lt);
        assert_eq!(Direction::from_distance(0), Direction::Eq);
        assert_eq!(Direction::from_distance(-1), Direction::Gt);
    }

    #[test]
    fn test_matmul_band_is_permutable() {
        let m = map("for (i=0; i<=9; i++) for (j=0; j<=9; j++) for (k=0; k<=9; k++) C[i][j] = C[i][j] + A[i][k]*B[k][j];");
        let dep = DependenceAnalysis::new(&m);
        assert!(dep.band_permutable(&names(&["i", "j", "k"]), &[]).is_ok());
        assert!(dep.carried_by("i", &[]).is_none());
        let carried = dep.carried_by("k", &names(&["i", "j"])).unwrap();
        assert_eq!(carried.array, "C");
        assert_eq!(carried.distance("k"), Some(Distance::Any));
    }

    #[test]
    fn test_stencil_is_not_permutable() {
        // distance (1, -1)
        let m = map("for (i=1; i<=9; i++) for (j=0; j<=8; j++) A[i][j] = A[i-1][j+1] + 1;");
        let dep = DependenceAnalysis::new(&m);
        let err = dep.band_permutable(&names(&["i", "j"]), &[]).unwrap_err();
        assert_eq!(err.distances, vec![("i".to_string(), Distance::Exact(-1)), ("j".to_string(), Distance::Exact(1))]);
        assert!(dep.carried_by("j", &names(&["i"])).is_none());
    }

    #[test]
    fn test_gcd_independence() {
        let m = map("for (i=0; i<=9; i++) A[2*i] = A[2*i+1] + 1;");
        assert!(DependenceAnalysis::new(&m).carried_by("i", &[]).is_none());
    }

    #[test]
    fn test_range_exclusion() {
        // LU row update: the pivot A[k*N+k] is never written by the j loop
        let m = map("for (k=0; k<=N-1; k++) for (j=k+1; j<=N-1; j++) A[k*N+j] = A[k*N+j]/A[k*N+k];");
        let dep = DependenceAnalysis::new(&m);
        assert!(dep.carried_by("j", &names(&["k"])).is_none());
        // across k the linearized subscripts are not analyzable
        assert!(dep.carried_by("k", &[]).is_some());
    }

    #[test]
    fn test_scalar_subscript_overlap() {
        let m = map("for (i=0; i<=9; i++) { A[i] = A[0] + 1; }");
        assert!(DependenceAnalysis::new(&m).carried_by("i", &[]).is_some());
    }

    #[test]
    fn test_may_alias() {
        let m = map("for (i=0; i<=9; i++) for (j=0; j<=9; j++) y[i] = y[i] + A[i][j]*x[j];");
        let dep = DependenceAnalysis::new(&m);
        let yi = Access::new("y", vec![Expr::var("i")]);
        let yj = Access::new("y", vec![Expr::var("j")]);
        let xj = Access::new("x", vec![Expr::var("j")]);
        assert!(dep.may_alias(&yi, &yj, &names(&["i"])));
        assert!(!dep.may_alias(&yi, &xj, &names(&["i"])));
        let y_next = Access::new("y", vec![Expr::add(Expr::var("i"), Expr::Int(1))]);
        assert!(!dep.may_alias(&yi, &y_next, &names(&["i"])));
    }
}
