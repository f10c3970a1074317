//! Integer linear forms over monomials.
//!
//! A linear form is `c0 + c1*m1 + ... + cn*mn` where each monomial `mi` is a
//! product of symbol names. Linearized subscripts such as `i*N+j` stay
//! exact: `i*N` is the monomial `[N, i]`.

use crate::ir::expr::{BinaryOp, Expr, UnaryOp};
use num_integer::Integer;
use std::collections::BTreeMap;
use std::fmt;

/// A product of symbols, kept sorted.
pub type Monomial = Vec<String>;

/// An integer linear combination of monomials plus a constant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinearForm {
    /// Non-zero coefficients keyed by monomial
    pub terms: BTreeMap<Monomial, i64>,
    /// Constant term
    pub constant: i64,
}

impl LinearForm {
    /// Constant form.
    pub fn constant(value: i64) -> Self {
        Self { terms: BTreeMap::new(), constant: value }
    }

    /// Form for a single symbol.
    pub fn symbol(name: impl Into<String>) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(vec![name.into()], 1);
        Self { terms, constant: 0 }
    }

    /// Convert an integer expression; `None` for non-polynomial parts.
    pub fn from_expr(expr: &Expr) -> Option<Self> {
        Self::from_expr_with(expr, &|name: &str| name.to_string())
    }

    /// Convert with every symbol passed through `rename`.
    pub fn from_expr_with(expr: &Expr, rename: &dyn Fn(&str) -> String) -> Option<Self> {
        match expr {
            Expr::Int(v) => Some(Self::constant(*v)),
            Expr::Var(name) => Some(Self::symbol(rename(name))),
            Expr::Unary(UnaryOp::Neg, e) => Some(Self::from_expr_with(e, rename)?.scale(-1)),
            Expr::Binary(op, l, r) => {
                let l = Self::from_expr_with(l, rename)?;
                let r = Self::from_expr_with(r, rename)?;
                match op {
                    BinaryOp::Add => Some(l.add(&r)),
                    BinaryOp::Sub => Some(l.sub(&r)),
                    BinaryOp::Mul => Some(l.mul(&r)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Sum of two forms.
    pub fn add(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.constant += other.constant;
        for (m, c) in &other.terms {
            *out.terms.entry(m.clone()).or_insert(0) += c;
        }
        out.terms.retain(|_, c| *c != 0);
        out
    }

    /// Difference of two forms.
    pub fn sub(&self, other: &Self) -> Self {
        self.add(&other.scale(-1))
    }

    /// Multiply by an integer.
    pub fn scale(&self, factor: i64) -> Self {
        if factor == 0 {
            return Self::constant(0);
        }
        Self {
            terms: self.terms.iter().map(|(m, c)| (m.clone(), c * factor)).collect(),
            constant: self.constant * factor,
        }
    }

    /// Polynomial product.
    pub fn mul(&self, other: &Self) -> Self {
        let mut out = other.scale(self.constant);
        for (m, c) in &self.terms {
            if other.constant != 0 {
                *out.terms.entry(m.clone()).or_insert(0) += c * other.constant;
            }
            for (m2, c2) in &other.terms {
                let mut prod = m.clone();
                prod.extend(m2.iter().cloned());
                prod.sort();
                *out.terms.entry(prod).or_insert(0) += c * c2;
            }
        }
        out.terms.retain(|_, c| *c != 0);
        out
    }

    /// Check whether the form has no symbolic part.
    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    /// Constant value if the form has no symbols.
    pub fn as_constant(&self) -> Option<i64> {
        if self.is_constant() { Some(self.constant) } else { None }
    }

    /// Coefficient of the single-symbol monomial `name`.
    pub fn coefficient(&self, name: &str) -> i64 {
        self.terms.iter()
            .find(|(m, _)| m.len() == 1 && m[0] == name)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    /// Check whether `pred` holds for some symbol of some monomial.
    pub fn any_symbol(&self, pred: impl Fn(&str) -> bool) -> bool {
        self.terms.keys().any(|m| m.iter().any(|s| pred(s)))
    }

    /// Form without the single-symbol monomial `name`.
    pub fn without(&self, name: &str) -> Self {
        let mut out = self.clone();
        out.terms.retain(|m, _| !(m.len() == 1 && m[0] == name));
        out
    }

    /// GCD of all symbolic coefficients (0 when constant).
    pub fn coefficient_gcd(&self) -> i64 {
        self.terms.values().fold(0i64, |g, c| g.gcd(c))
    }

    /// Rebuild an expression in canonical order.
    pub fn to_expr(&self) -> Expr {
        let mut acc: Option<Expr> = None;
        for (mono, coeff) in &self.terms {
            let mut product = Expr::var(mono[0].clone());
            for sym in &mono[1..] {
                product = Expr::mul(product, Expr::var(sym.clone()));
            }
            let magnitude = coeff.abs();
            let term = if magnitude == 1 { product } else { Expr::mul(Expr::Int(magnitude), product) };
            acc = Some(match acc {
                None if *coeff < 0 => Expr::Unary(UnaryOp::Neg, Box::new(term)),
                None => term,
                Some(prev) if *coeff < 0 => Expr::sub(prev, term),
                Some(prev) => Expr::add(prev, term),
            });
        }
        match acc {
            None => Expr::Int(self.constant),
            Some(e) if self.constant > 0 => Expr::add(e, Expr::Int(self.constant)),
            Some(e) if self.constant < 0 => Expr::sub(e, Expr::Int(-self.constant)),
            Some(e) => e,
        }
    }
}

impl fmt::Display for LinearForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_expr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(name: &str) -> Expr {
        Expr::var(name)
    }

    #[test]
    fn test_linearized_subscript() {
        // i*N+j
        let e = Expr::add(Expr::mul(v("i"), v("N")), v("j"));
        let form = LinearForm::from_expr(&e).unwrap();
        assert_eq!(form.terms.get(&vec!["N".to_string(), "i".to_string()]), Some(&1));
        assert_eq!(form.coefficient("j"), 1);
        assert_eq!(form.coefficient("i"), 0);
    }

    #[test]
    fn test_difference_cancels() {
        let a = LinearForm::from_expr(&Expr::add(v("i"), Expr::Int(1))).unwrap();
        let b = LinearForm::from_expr(&v("i")).unwrap();
        assert_eq!(a.sub(&b).as_constant(), Some(1));
    }

    #[test]
    fn test_rename() {
        let e = Expr::sub(v("j"), Expr::Int(1));
        let form = LinearForm::from_expr_with(&e, &|s: &str| format!("{}'", s)).unwrap();
        assert_eq!(form.coefficient("j'"), 1);
        assert_eq!(form.constant, -1);
    }

    #[test]
    fn test_non_affine_rejected() {
        assert!(LinearForm::from_expr(&Expr::div(v("n"), Expr::Int(2))).is_none());
        assert!(LinearForm::from_expr(&Expr::min(v("a"), v("b"))).is_none());
    }

    #[test]
    fn test_gcd() {
        let e = Expr::add(Expr::mul(Expr::Int(4), v("i")), Expr::mul(Expr::Int(6), v("j")));
        assert_eq!(LinearForm::from_expr(&e).unwrap().coefficient_gcd(), 2);
    }

    #[test]
    fn test_to_expr_order() {
        let e = Expr::sub(Expr::add(v("N"), Expr::Int(0)), v("k"));
        assert_eq!(LinearForm::from_expr(&e).unwrap().to_expr().to_string(), "N-k");
        let e = Expr::sub(Expr::Int(3), Expr::mul(Expr::Int(2), v("t")));
        assert_eq!(LinearForm::from_expr(&e).unwrap().to_expr().to_string(), "-2*t+3");
    }
}
