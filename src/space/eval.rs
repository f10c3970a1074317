//! Evaluation of tuning-block expressions.
//!
//! Integer arithmetic follows the annotation language: `/` on two integers
//! is floor division and `%` takes the sign of the divisor. Mixed
//! integer/float arithmetic promotes to float. `and`/`or` short-circuit.

use crate::frontend::ast::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::space::value::Value;
use num_integer::Integer;
use thiserror::Error;

/// Expression evaluation failure.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct EvalError {
    /// Description of the failure
    pub message: String,
}

impl EvalError {
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Evaluate `expr`, looking names up with `env`.
pub fn evaluate(expr: &Expr, env: &dyn Fn(&str) -> Option<Value>) -> Result<Value, EvalError> {
    match &expr.kind {
        ExprKind::Int(v) => Ok(Value::Int(*v)),
        ExprKind::Float(v) => Ok(Value::Float(*v)),
        ExprKind::Bool(b) => Ok(Value::Bool(*b)),
        ExprKind::Str(s) => Ok(Value::Str(s.clone())),
        ExprKind::Name(n) => env(n).ok_or_else(|| EvalError::new(format!("name '{}' is not defined", n))),
        ExprKind::List(_) | ExprKind::Tuple(_) => {
            Err(EvalError::new(format!("sequence '{}' used as a scalar", expr)))
        }
        ExprKind::Call { func, args } => call(func, args, env),
        ExprKind::Unary { op: UnaryOp::Not, operand } => Ok(Value::Bool(!evaluate(operand, env)?.truthy())),
        ExprKind::Unary { op: UnaryOp::Neg, operand } => match evaluate(operand, env)? {
            Value::Int(v) => v
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| EvalError::new(format!("integer overflow in -({})", v))),
            Value::Bool(b) => Ok(Value::Int(-(b as i64))),
            Value::Float(v) => Ok(Value::Float(-v)),
            Value::Str(s) => Err(EvalError::new(format!("cannot negate string '{}'", s))),
        },
        ExprKind::Binary { op: BinaryOp::And, left, right } => {
            let l = evaluate(left, env)?;
            if !l.truthy() { Ok(l) } else { evaluate(right, env) }
        }
        ExprKind::Binary { op: BinaryOp::Or, left, right } => {
            let l = evaluate(left, env)?;
            if l.truthy() { Ok(l) } else { evaluate(right, env) }
        }
        ExprKind::Binary { op, left, right } => binary(*op, evaluate(left, env)?, evaluate(right, env)?),
    }
}

/// Evaluate a predicate to a truth value.
pub fn evaluate_bool(expr: &Expr, env: &dyn Fn(&str) -> Option<Value>) -> Result<bool, EvalError> {
    Ok(evaluate(expr, env)?.truthy())
}

fn call(func: &str, args: &[Expr], env: &dyn Fn(&str) -> Option<Value>) -> Result<Value, EvalError> {
    let values = args.iter().map(|a| evaluate(a, env)).collect::<Result<Vec<_>, _>>()?;
    match (func, values.as_slice()) {
        ("min", [first, rest @ ..]) | ("max", [first, rest @ ..]) => {
            let mut best = first.clone();
            for v in rest {
                let less = compare(v, &best)? == std::cmp::Ordering::Less;
                if (func == "min") == less {
                    best = v.clone();
                }
            }
            Ok(best)
        }
        ("abs", [Value::Int(v)]) => Ok(Value::Int(v.abs())),
        ("abs", [Value::Float(v)]) => Ok(Value::Float(v.abs())),
        ("int", [v]) => v
            .as_f64()
            .map(|f| Value::Int(f.trunc() as i64))
            .ok_or_else(|| EvalError::new(format!("cannot convert '{}' to int", v))),
        _ => Err(EvalError::new(format!("unsupported call {}({} arguments)", func, values.len()))),
    }
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, EvalError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x
                .partial_cmp(&y)
                .ok_or_else(|| EvalError::new("comparison with NaN")),
            _ => Err(EvalError::new(format!(
                "cannot compare {} '{}' with {} '{}'",
                a.type_name(),
                a,
                b.type_name(),
                b
            ))),
        },
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, EvalError> {
    use std::cmp::Ordering::*;
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(equal(&l, &r))),
        BinaryOp::Ne => return Ok(Value::Bool(!equal(&l, &r))),
        BinaryOp::Lt => return Ok(Value::Bool(compare(&l, &r)? == Less)),
        BinaryOp::Le => return Ok(Value::Bool(compare(&l, &r)? != Greater)),
        BinaryOp::Gt => return Ok(Value::Bool(compare(&l, &r)? == Greater)),
        BinaryOp::Ge => return Ok(Value::Bool(compare(&l, &r)? != Less)),
        _ => {}
    }
    if let (Value::Str(a), Value::Str(b), BinaryOp::Add) = (&l, &r, op) {
        return Ok(Value::Str(format!("{}{}", a, b)));
    }
    let ints = match (&l, &r) {
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => l.as_int().zip(r.as_int()),
        _ => None,
    };
    if let Some((a, b)) = ints {
        return match op {
            BinaryOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(|| overflow("+", a, b)),
            BinaryOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(|| overflow("-", a, b)),
            BinaryOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(|| overflow("*", a, b)),
            BinaryOp::Div if b == 0 => Err(EvalError::new("integer division by zero")),
            BinaryOp::Mod if b == 0 => Err(EvalError::new("integer modulo by zero")),
            // i64::MIN / -1 is the only overflowing quotient
            BinaryOp::Div | BinaryOp::Mod if a.checked_div(b).is_none() => Err(overflow(&op.to_string(), a, b)),
            BinaryOp::Div => Ok(Value::Int(a.div_floor(&b))),
            BinaryOp::Mod => Ok(Value::Int(a.mod_floor(&b))),
            _ => unreachable!("comparison and logical operators handled above"),
        };
    }
    let (a, b) = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(EvalError::new(format!(
                "unsupported operand types for {}: {} and {}",
                op,
                l.type_name(),
                r.type_name()
            )))
        }
    };
    match op {
        BinaryOp::Add => Ok(Value::Float(a + b)),
        BinaryOp::Sub => Ok(Value::Float(a - b)),
        BinaryOp::Mul => Ok(Value::Float(a * b)),
        BinaryOp::Div if b == 0.0 => Err(EvalError::new("float division by zero")),
        BinaryOp::Div => Ok(Value::Float(a / b)),
        BinaryOp::Mod if b == 0.0 => Err(EvalError::new("float modulo by zero")),
        BinaryOp::Mod => Ok(Value::Float(a - (a / b).floor() * b)),
        _ => unreachable!("comparison and logical operators handled above"),
    }
}

fn overflow(op: &str, a: i64, b: i64) -> EvalError {
    EvalError::new(format!("integer overflow in {} {} {}", a, op, b))
}

fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Str(_), _) | (_, Value::Str(_)) => false,
        _ => a.as_f64() == b.as_f64(),
    }
}
