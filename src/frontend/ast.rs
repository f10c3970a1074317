//! Abstract syntax of tuning specifications.
//!
//! The tuning block is written in a small Python-flavored language:
//! literals, lists, tuples, `range(...)` calls and arithmetic, boolean and
//! comparison operators. This module keeps that syntax as parsed; the
//! semantic pass turns it into a parameter space and settings.

use crate::utils::location::Span;
use std::collections::BTreeSet;
use std::fmt;

/// An expression in a tuning block.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// The kind of expression
    pub kind: ExprKind,
    /// Source location
    pub span: Span,
}

/// Kinds of tuning-block expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer literal
    Int(i64),
    /// Floating-point literal
    Float(f64),
    /// `True` / `False`
    Bool(bool),
    /// String literal
    Str(String),
    /// Name of a parameter or constant
    Name(String),
    /// `[a, b, c]`
    List(Vec<Expr>),
    /// `(a, b)`
    Tuple(Vec<Expr>),
    /// `f(args)`
    Call {
        /// Function name
        func: String,
        /// Arguments
        args: Vec<Expr>,
    },
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expr>,
    },
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `not`
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/` (floor division on integers)
    Div,
    /// `%` (sign of the divisor)
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
    /// `and`
    And,
    /// `or`
    Or,
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
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        };
        write!(f, "{}", s)
    }
}

impl Expr {
    /// Create a new expression.
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Create a name reference.
    pub fn name(name: impl Into<String>, span: Span) -> Self {
        Self::new(ExprKind::Name(name.into()), span)
    }

    /// Names referenced anywhere in the expression, excluding called functions.
    pub fn names(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names(&self, out: &mut BTreeSet<String>) {
        match &self.kind {
            ExprKind::Name(n) => {
                out.insert(n.clone());
            }
            ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Bool(_) | ExprKind::Str(_) => {}
            ExprKind::List(items) | ExprKind::Tuple(items) => items.iter().for_each(|e| e.collect_names(out)),
            ExprKind::Call { args, .. } => args.iter().for_each(|e| e.collect_names(out)),
            ExprKind::Unary { operand, .. } => operand.collect_names(out),
            ExprKind::Binary { left, right, .. } => {
                left.collect_names(out);
                right.collect_names(out);
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Int(v) => write!(f, "{}", v),
            ExprKind::Float(v) => write!(f, "{:?}", v),
            ExprKind::Bool(true) => write!(f, "True"),
            ExprKind::Bool(false) => write!(f, "False"),
            ExprKind::Str(s) => write!(f, "'{}'", s),
            ExprKind::Name(n) => write!(f, "{}", n),
            ExprKind::List(items) => write!(f, "[{}]", join(items)),
            ExprKind::Tuple(items) => write!(f, "({})", join(items)),
            ExprKind::Call { func, args } => write!(f, "{}({})", func, join(args)),
            ExprKind::Unary { op: UnaryOp::Neg, operand } => write!(f, "-{}", operand),
            ExprKind::Unary { op: UnaryOp::Not, operand } => write!(f, "not {}", operand),
            ExprKind::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
        }
    }
}

fn join(items: &[Expr]) -> String {
    items.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}

/// A `def name { ... }` section of the tuning block.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// Section name (`build`, `performance_params`, ...)
    pub name: String,
    /// Items in declaration order
    pub items: Vec<Item>,
    /// Source location of the header
    pub span: Span,
}

/// A declaration inside a section.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// `param NAME[] = domain;` or `param NAME = value;`
    Param {
        /// Parameter name
        name: String,
        /// Declared with `[]`
        is_list: bool,
        /// Domain or value expression
        value: Expr,
        /// Source location
        span: Span,
    },
    /// `constraint NAME = expr;`
    Constraint {
        /// Constraint name
        name: String,
        /// Predicate
        expr: Expr,
        /// Source location
        span: Span,
    },
    /// `let NAME = expr;`
    Let {
        /// Constant name
        name: String,
        /// Value
        value: Expr,
        /// Source location
        span: Span,
    },
    /// `arg NAME = expr;`
    Arg {
        /// Setting name
        name: String,
        /// Value
        value: Expr,
        /// Source location
        span: Span,
    },
    /// `decl [static] TYPE NAME[dims] = init;`
    Decl {
        /// Declared `static`
        is_static: bool,
        /// Element type
        ty: String,
        /// Variable name
        name: String,
        /// Array extents, empty for scalars
        dims: Vec<Expr>,
        /// Initializer (`random`, `0`, a literal)
        init: Expr,
        /// Source location
        span: Span,
    },
}

impl Item {
    /// Source location of the item.
    pub fn span(&self) -> Span {
        match self {
            Item::Param { span, .. }
            | Item::Constraint { span, .. }
            | Item::Let { span, .. }
            | Item::Arg { span, .. }
            | Item::Decl { span, .. } => *span,
        }
    }
}

/// A `key = value` argument of a transform statement.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformArg {
    /// Argument name (`tile`, `threadCount`, ...)
    pub name: String,
    /// Argument value
    pub value: Expr,
    /// Source location
    pub span: Span,
}

/// A parsed `PerfTuning` block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TuningBlock {
    /// Sections in declaration order
    pub sections: Vec<Section>,
    /// Source location
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let s = Span::dummy();
        let e = Expr::new(
            ExprKind::Binary {
                op: BinaryOp::Le,
                left: Box::new(Expr::name("T1_I", s)),
                right: Box::new(Expr::new(
                    ExprKind::Call { func: "max".into(), args: vec![Expr::name("T2_I", s)] },
                    s,
                )),
            },
            s,
        );
        let names = e.names();
        assert!(names.contains("T1_I") && names.contains("T2_I"));
        assert!(!names.contains("max"));
        assert_eq!(e.to_string(), "(T1_I <= max(T2_I))");
    }
}
