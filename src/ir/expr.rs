//! Expressions of the loop-nest IR.
//!
//! Expressions cover loop bounds, array subscripts and statement right-hand
//! sides. They print as C so that generated code and debug output share one
//! rendering.

use crate::ir::affine::LinearForm;
use std::collections::BTreeSet;
use std::fmt;

/// An array element reference `A[i][k]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    /// Array name
    pub array: String,
    /// One subscript per dimension
    pub indices: Vec<Expr>,
}

impl Access {
    /// Create a new access.
    pub fn new(array: impl Into<String>, indices: Vec<Expr>) -> Self {
        Self { array: array.into(), indices }
    }

    /// Substitute `var` in every subscript.
    pub fn substitute(&self, var: &str, with: &Expr) -> Access {
        Access {
            array: self.array.clone(),
            indices: self.indices.iter().map(|e| e.substitute(var, with).simplify()).collect(),
        }
    }

    /// Check whether any subscript mentions `var`.
    pub fn mentions(&self, var: &str) -> bool {
        self.indices.iter().any(|e| e.mentions(var))
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.array)?;
        for idx in &self.indices {
            write!(f, "[{}]", idx)?;
        }
        Ok(())
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&&`
    And,
    /// `||`
    Or,
}

impl BinaryOp {
    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne => 3,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 6,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        write!(f, "{}", s)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `!`
    Not,
}

/// An IR expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Integer literal
    Int(i64),
    /// Floating-point literal
    Float(f64),
    /// Scalar or loop index
    Var(String),
    /// Array element
    Access(Access),
    /// Unary operation
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `min(a, b)`
    Min(Box<Expr>, Box<Expr>),
    /// `max(a, b)`
    Max(Box<Expr>, Box<Expr>),
    /// Call of a math function such as `sqrt`
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Integer literal.
    pub fn int(v: i64) -> Expr {
        Expr::Int(v)
    }

    /// Variable reference.
    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(name.into())
    }

    /// Binary node.
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    /// `lhs + rhs`
    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, lhs, rhs)
    }

    /// `lhs - rhs`
    pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Sub, lhs, rhs)
    }

    /// `lhs * rhs`
    pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Mul, lhs, rhs)
    }

    /// `lhs / rhs`
    pub fn div(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Div, lhs, rhs)
    }

    /// `min(lhs, rhs)`
    pub fn min(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Min(Box::new(lhs), Box::new(rhs))
    }

    /// `max(lhs, rhs)`
    pub fn max(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Max(Box::new(lhs), Box::new(rhs))
    }

    /// Get the value of an integer literal.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Replace every occurrence of variable `var`.
    pub fn substitute(&self, var: &str, with: &Expr) -> Expr {
        match self {
            Expr::Var(name) if name == var => with.clone(),
            Expr::Int(_) | Expr::Float(_) | Expr::Var(_) => self.clone(),
            Expr::Access(a) => Expr::Access(Access {
                array: a.array.clone(),
                indices: a.indices.iter().map(|e| e.substitute(var, with)).collect(),
            }),
            Expr::Unary(op, e) => Expr::Unary(*op, Box::new(e.substitute(var, with))),
            Expr::Binary(op, l, r) => Expr::binary(*op, l.substitute(var, with), r.substitute(var, with)),
            Expr::Min(l, r) => Expr::min(l.substitute(var, with), r.substitute(var, with)),
            Expr::Max(l, r) => Expr::max(l.substitute(var, with), r.substitute(var, with)),
            Expr::Call(name, args) => Expr::Call(
                name.clone(),
                args.iter().map(|e| e.substitute(var, with)).collect(),
            ),
        }
    }

    /// Replace every occurrence of the array element `target`.
    pub fn replace_access(&self, target: &Access, with: &Expr) -> Expr {
        match self {
            Expr::Access(a) if a == target => with.clone(),
            Expr::Access(a) => Expr::Access(Access {
                array: a.array.clone(),
                indices: a.indices.iter().map(|e| e.replace_access(target, with)).collect(),
            }),
            Expr::Int(_) | Expr::Float(_) | Expr::Var(_) => self.clone(),
            Expr::Unary(op, e) => Expr::Unary(*op, Box::new(e.replace_access(target, with))),
            Expr::Binary(op, l, r) => {
                Expr::binary(*op, l.replace_access(target, with), r.replace_access(target, with))
            }
            Expr::Min(l, r) => Expr::min(l.replace_access(target, with), r.replace_access(target, with)),
            Expr::Max(l, r) => Expr::max(l.replace_access(target, with), r.replace_access(target, with)),
            Expr::Call(name, args) => Expr::Call(
                name.clone(),
                args.iter().map(|e| e.replace_access(target, with)).collect(),
            ),
        }
    }

    /// Collect scalar and index names read by this expression.
    pub fn free_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Var(name) => {
                out.insert(name.clone());
            }
            Expr::Int(_) | Expr::Float(_) => {}
            Expr::Access(a) => a.indices.iter().for_each(|e| e.free_vars(out)),
            Expr::Unary(_, e) => e.free_vars(out),
            Expr::Binary(_, l, r) | Expr::Min(l, r) | Expr::Max(l, r) => {
                l.free_vars(out);
                r.free_vars(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|e| e.free_vars(out)),
        }
    }

    /// Check whether variable `var` occurs anywhere in the expression.
    pub fn mentions(&self, var: &str) -> bool {
        match self {
            Expr::Var(name) => name == var,
            Expr::Int(_) | Expr::Float(_) => false,
            Expr::Access(a) => a.mentions(var),
            Expr::Unary(_, e) => e.mentions(var),
            Expr::Binary(_, l, r) | Expr::Min(l, r) | Expr::Max(l, r) => l.mentions(var) || r.mentions(var),
            Expr::Call(_, args) => args.iter().any(|e| e.mentions(var)),
        }
    }

    /// Check whether array `name` is referenced.
    pub fn mentions_array(&self, name: &str) -> bool {
        match self {
            Expr::Access(a) => a.array == name || a.indices.iter().any(|e| e.mentions_array(name)),
            Expr::Int(_) | Expr::Float(_) | Expr::Var(_) => false,
            Expr::Unary(_, e) => e.mentions_array(name),
            Expr::Binary(_, l, r) | Expr::Min(l, r) | Expr::Max(l, r) => {
                l.mentions_array(name) || r.mentions_array(name)
            }
            Expr::Call(_, args) => args.iter().any(|e| e.mentions_array(name)),
        }
    }

    /// Visit array references in evaluation order (subscripts first).
    pub fn for_each_access<'a>(&'a self, f: &mut dyn FnMut(&'a Access)) {
        match self {
            Expr::Access(a) => {
                a.indices.iter().for_each(|e| e.for_each_access(f));
                f(a);
            }
            Expr::Int(_) | Expr::Float(_) | Expr::Var(_) => {}
            Expr::Unary(_, e) => e.for_each_access(f),
            Expr::Binary(_, l, r) | Expr::Min(l, r) | Expr::Max(l, r) => {
                l.for_each_access(f);
                r.for_each_access(f);
            }
            Expr::Call(_, args) => args.iter().for_each(|e| e.for_each_access(f)),
        }
    }

    /// Fold constants and normalize integer affine parts.
    pub fn simplify(&self) -> Expr {
        if let Some(form) = LinearForm::from_expr(self) {
            return form.to_expr();
        }
        match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Var(_) => self.clone(),
            Expr::Access(a) => Expr::Access(Access {
                array: a.array.clone(),
                indices: a.indices.iter().map(Expr::simplify).collect(),
            }),
            Expr::Unary(op, e) => match (op, e.simplify()) {
                (UnaryOp::Neg, Expr::Float(v)) => Expr::Float(-v),
                (op, e) => Expr::Unary(*op, Box::new(e)),
            },
            Expr::Binary(op, l, r) => {
                let (l, r) = (l.simplify(), r.simplify());
                match (op, l.as_int(), r.as_int()) {
                    (BinaryOp::Div, Some(a), Some(b)) if b != 0 => Expr::Int(a / b),
                    (BinaryOp::Mod, Some(a), Some(b)) if b != 0 => Expr::Int(a % b),
                    (BinaryOp::Div, _, Some(1)) => l,
                    _ => Expr::binary(*op, l, r),
                }
            }
            Expr::Min(l, r) => {
                let (l, r) = (l.simplify(), r.simplify());
                match (l.as_int(), r.as_int()) {
                    (Some(a), Some(b)) => Expr::Int(a.min(b)),
                    _ if l == r => l,
                    _ => Expr::min(l, r),
                }
            }
            Expr::Max(l, r) => {
                let (l, r) = (l.simplify(), r.simplify());
                match (l.as_int(), r.as_int()) {
                    (Some(a), Some(b)) => Expr::Int(a.max(b)),
                    _ if l == r => l,
                    _ => Expr::max(l, r),
                }
            }
            Expr::Call(name, args) => Expr::Call(name.clone(), args.iter().map(Expr::simplify).collect()),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Int(v) if *v < 0 => 0,
            Expr::Float(v) if *v < 0.0 => 0,
            Expr::Binary(op, _, _) => op.precedence(),
            Expr::Unary(_, _) => 7,
            _ => 8,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(v) => write!(f, "{}", v),
            Expr::Float(v) => write!(f, "{:?}", v),
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Access(a) => write!(f, "{}", a),
            Expr::Unary(op, e) => {
                let (sym, binds) = match op {
                    UnaryOp::Neg => ("-", 6),
                    UnaryOp::Not => ("!", 7),
                };
                if e.precedence() < binds {
                    write!(f, "{}({})", sym, e)
                } else {
                    write!(f, "{}{}", sym, e)
                }
            }
            Expr::Binary(op, l, r) => {
                let prec = op.precedence();
                if l.precedence() < prec {
                    write!(f, "({})", l)?;
                } else {
                    write!(f, "{}", l)?;
                }
                write!(f, "{}", op)?;
                if r.precedence() <= prec {
                    write!(f, "({})", r)
                } else {
                    write!(f, "{}", r)
                }
            }
            Expr::Min(l, r) => write!(f, "min({},{})", l, r),
            Expr::Max(l, r) => write!(f, "max({},{})", l, r),
            Expr::Call(name, args) => {
                write!(f, "{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(name: &str) -> Expr {
        Expr::var(name)
    }

    #[test]
    fn test_display_precedence() {
        let e = Expr::mul(Expr::add(v("a"), v("b")), v("c"));
        assert_eq!(e.to_string(), "(a+b)*c");
        let e = Expr::sub(v("a"), Expr::sub(v("b"), v("c")));
        assert_eq!(e.to_string(), "a-(b-c)");
        let e = Expr::add(Expr::add(v("a"), v("b")), v("c"));
        assert_eq!(e.to_string(), "a+b+c");
    }

    #[test]
    fn test_negative_literal_parenthesized() {
        let e = Expr::binary(BinaryOp::Sub, v("a"), Expr::Int(-3));
        assert_eq!(e.to_string(), "a-(-3)");
    }

    #[test]
    fn test_simplify_tile_bound() {
        // ii+64-1 folds to ii+63
        let e = Expr::sub(Expr::add(v("ii"), Expr::Int(64)), Expr::Int(1));
        assert_eq!(e.simplify().to_string(), "ii+63");
        let e = Expr::min(Expr::sub(v("N"), Expr::Int(1)), Expr::add(v("ii"), Expr::Int(63)));
        assert_eq!(e.simplify(), e);
        assert_eq!(Expr::min(Expr::Int(9), Expr::Int(4)).simplify(), Expr::Int(4));
    }

    #[test]
    fn test_substitute_into_access() {
        let a = Expr::Access(Access::new("A", vec![v("i"), v("k")]));
        let shifted = a.substitute("i", &Expr::add(v("i"), Expr::Int(1))).simplify();
        assert_eq!(shifted.to_string(), "A[i+1][k]");
    }

    #[test]
    fn test_replace_access() {
        let target = Access::new("A", vec![v("i"), v("k")]);
        let e = Expr::mul(Expr::Access(target.clone()), Expr::Access(Access::new("B", vec![v("k"), v("j")])));
        let replaced = e.replace_access(&target, &v("scv_1"));
        assert_eq!(replaced.to_string(), "scv_1*B[k][j]");
    }

    #[test]
    fn test_free_vars_and_mentions() {
        let e = Expr::Access(Access::new("A", vec![Expr::add(Expr::mul(v("i"), v("N")), v("j"))]));
        let mut vars = BTreeSet::new();
        e.free_vars(&mut vars);
        assert!(vars.contains("i") && vars.contains("N") && vars.contains("j"));
        assert!(!vars.contains("A"));
        assert!(e.mentions_array("A"));
        assert!(!e.mentions("k"));
    }
}
