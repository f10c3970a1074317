//! Tree-walking interpreter for loop nests.

use crate::exec::workspace::{Num, Workspace};
use crate::ir::expr::{Access, BinaryOp, Expr, UnaryOp};
use crate::ir::nest::{AssignOp, KernelLaunch, LValue, LoopNest, Stmt};
use crate::utils::errors::ExecError;

type Result<T> = std::result::Result<T, ExecError>;

/// Executes loop nests statement by statement.
#[derive(Debug, Clone, Default)]
pub struct Interpreter {
    step_limit: Option<u64>,
}

struct Run {
    ws: Workspace,
    steps: u64,
    limit: Option<u64>,
}

impl Interpreter {
    /// Create an interpreter without a step limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop with [`ExecError::StepLimit`] after `limit` statements.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = Some(limit);
        self
    }

    /// Run `nest` over `ws` and return the final workspace.
    pub fn run(&self, nest: &LoopNest, ws: Workspace) -> Result<Workspace> {
        let mut run = Run { ws, steps: 0, limit: self.step_limit };
        run.scoped(&nest.stmts)?;
        Ok(run.ws)
    }

    /// Evaluate a single expression.
    pub fn eval(&self, expr: &Expr, ws: &Workspace) -> Result<Num> {
        let run = Run { ws: ws.clone(), steps: 0, limit: None };
        run.eval(expr)
    }
}

impl Run {
    /// Execute `stmts`, dropping their declarations afterwards.
    fn scoped(&mut self, stmts: &[Stmt]) -> Result<()> {
        let mut shadowed: Vec<(String, Option<Num>)> = Vec::new();
        let result = stmts.iter().try_for_each(|s| self.exec(s, &mut shadowed));
        for (name, old) in shadowed.into_iter().rev() {
            match old {
                Some(v) => self.ws.set(&name, v),
                None => {
                    self.ws.unset(&name);
                }
            }
        }
        result
    }

    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        match self.limit {
            Some(limit) if self.steps > limit => Err(ExecError::StepLimit(limit)),
            _ => Ok(()),
        }
    }

    fn exec(&mut self, stmt: &Stmt, shadowed: &mut Vec<(String, Option<Num>)>) -> Result<()> {
        self.tick()?;
        match stmt {
            Stmt::Assign(a) => {
                let rhs = self.eval(&a.value)?;
                match &a.target {
                    LValue::Scalar(name) => {
                        let value = match a.op {
                            AssignOp::Set => rhs,
                            op => {
                                let old = self.ws.get(name).ok_or_else(|| ExecError::UnboundVariable(name.clone()))?;
                                compound(op, old, rhs)?
                            }
                        };
                        self.ws.set(name, value);
                    }
                    LValue::Element(acc) => {
                        let (name, off) = self.locate(acc)?;
                        let array = self.ws.array_mut(&name).ok_or_else(|| ExecError::UnknownArray(name.clone()))?;
                        let value = match a.op {
                            AssignOp::Set => rhs,
                            op => compound(op, Num::Float(array.data[off]), rhs)?,
                        };
                        array.data[off] = value.as_f64();
                    }
                }
            }
            Stmt::Decl(d) => {
                let value = match &d.init {
                    Some(e) => self.eval(e)?,
                    None => Num::Int(0),
                };
                let value = match d.ty.as_str() {
                    "int" | "long" => Num::Int(value.as_f64() as i64),
                    _ => Num::Float(value.as_f64()),
                };
                shadowed.push((d.name.clone(), self.ws.get(&d.name)));
                self.ws.set(&d.name, value);
            }
            Stmt::Loop(l) => {
                let lower = self.eval_int(&l.lower, &l.var)?;
                let upper = self.eval_int(&l.upper, &l.var)?;
                let mut v = lower;
                while v <= upper {
                    self.ws.set_int(&l.var, v);
                    self.scoped(&l.body)?;
                    v += l.step;
                }
                self.ws.set_int(&l.var, v);
            }
            Stmt::Block(b) => self.scoped(b)?,
            Stmt::If { cond, then_branch, else_branch } => {
                if self.eval(cond)?.truthy() {
                    self.scoped(then_branch)?;
                } else {
                    self.scoped(else_branch)?;
                }
            }
            Stmt::Launch(k) => self.launch(k)?,
            Stmt::Transform(t) => self.scoped(&t.body)?,
        }
        Ok(())
    }

    /// Emulate a kernel launch: streams take contiguous chunks of the
    /// index range; within a chunk every thread walks its indices with a
    /// grid-sized stride. Reduction partials are combined in thread order.
    fn launch(&mut self, k: &KernelLaunch) -> Result<()> {
        let lower = self.eval_int(&k.lower, &k.var)?;
        let upper = self.eval_int(&k.upper, &k.var)?;
        let blocks = self.eval_int(&k.blocks, "blockCount")?.max(1);
        let trip = if upper < lower { 0 } else { (upper - lower) / k.step + 1 };
        let streams = k.streams.max(1);
        let chunk = (trip + streams - 1) / streams;
        let grid = blocks.saturating_mul(k.threads.max(1));

        let saved: Vec<(String, Option<Num>)> = k
            .private
            .iter()
            .chain(std::iter::once(&k.var))
            .map(|n| (n.clone(), self.ws.get(n)))
            .collect();
        let initial = match &k.reduction {
            Some(r) => Some(self.ws.get(&r.var).ok_or_else(|| ExecError::UnboundVariable(r.var.clone()))?),
            None => None,
        };
        let mut partials = Vec::new();

        for s in 0..streams {
            let (start, end) = (s * chunk, ((s + 1) * chunk).min(trip));
            // threads past the chunk length would see no index
            for tid in 0..grid.min(end - start) {
                if let Some(r) = &k.reduction {
                    self.ws.set_float(&r.var, r.op.identity());
                }
                let mut it = start + tid;
                while it < end {
                    self.ws.set_int(&k.var, lower + it * k.step);
                    self.scoped(&k.body)?;
                    it += grid;
                }
                if let Some(r) = &k.reduction {
                    partials.push(self.ws.get(&r.var).unwrap_or(Num::Float(r.op.identity())));
                }
            }
        }

        for (name, old) in saved {
            match old {
                Some(v) => self.ws.set(&name, v),
                None => {
                    self.ws.unset(&name);
                }
            }
        }
        if let (Some(r), Some(init)) = (&k.reduction, initial) {
            let op = match r.op {
                crate::ir::nest::ReduceOp::Add => AssignOp::Add,
                crate::ir::nest::ReduceOp::Mul => AssignOp::Mul,
            };
            let total = partials.into_iter().try_fold(init, |acc, p| compound(op, acc, p))?;
            self.ws.set(&r.var, total);
        }
        Ok(())
    }

    fn locate(&self, acc: &Access) -> Result<(String, usize)> {
        let index = acc
            .indices
            .iter()
            .map(|e| self.eval_int(e, &acc.to_string()))
            .collect::<Result<Vec<i64>>>()?;
        let array = self.ws.array_entry(&acc.array).ok_or_else(|| ExecError::UnknownArray(acc.array.clone()))?;
        if index.len() != array.dims.len() {
            return Err(ExecError::RankMismatch {
                array: acc.array.clone(),
                rank: array.dims.len(),
                given: index.len(),
            });
        }
        let off = array.offset(&index).ok_or_else(|| ExecError::OutOfBounds {
            array: acc.array.clone(),
            index: index.clone(),
            dims: array.dims.clone(),
        })?;
        Ok((acc.array.clone(), off))
    }

    fn eval_int(&self, expr: &Expr, what: &str) -> Result<i64> {
        self.eval(expr)?.as_int().ok_or_else(|| ExecError::NotAnInteger(what.to_string()))
    }

    fn eval(&self, expr: &Expr) -> Result<Num> {
        Ok(match expr {
            Expr::Int(v) => Num::Int(*v),
            Expr::Float(v) => Num::Float(*v),
            Expr::Var(name) => self.ws.get(name).ok_or_else(|| ExecError::UnboundVariable(name.clone()))?,
            Expr::Access(acc) => {
                let (name, off) = self.locate(acc)?;
                let array = self.ws.array(&name).ok_or(ExecError::UnknownArray(name))?;
                Num::Float(array[off])
            }
            Expr::Unary(UnaryOp::Neg, e) => match self.eval(e)? {
                Num::Int(v) => Num::Int(-v),
                Num::Float(v) => Num::Float(-v),
            },
            Expr::Unary(UnaryOp::Not, e) => Num::Int(!self.eval(e)?.truthy() as i64),
            Expr::Binary(BinaryOp::And, l, r) => {
                Num::Int((self.eval(l)?.truthy() && self.eval(r)?.truthy()) as i64)
            }
            Expr::Binary(BinaryOp::Or, l, r) => {
                Num::Int((self.eval(l)?.truthy() || self.eval(r)?.truthy()) as i64)
            }
            Expr::Binary(op, l, r) => binary(*op, self.eval(l)?, self.eval(r)?)?,
            Expr::Min(l, r) => match (self.eval(l)?, self.eval(r)?) {
                (Num::Int(a), Num::Int(b)) => Num::Int(a.min(b)),
                (a, b) => Num::Float(a.as_f64().min(b.as_f64())),
            },
            Expr::Max(l, r) => match (self.eval(l)?, self.eval(r)?) {
                (Num::Int(a), Num::Int(b)) => Num::Int(a.max(b)),
                (a, b) => Num::Float(a.as_f64().max(b.as_f64())),
            },
            Expr::Call(name, args) => {
                let vals = args.iter().map(|a| self.eval(a).map(Num::as_f64)).collect::<Result<Vec<f64>>>()?;
                call(name, &vals)?
            }
        })
    }
}

fn compound(op: AssignOp, old: Num, rhs: Num) -> Result<Num> {
    match op.binary() {
        Some(b) => binary(b, old, rhs),
        None => Ok(rhs),
    }
}

fn binary(op: BinaryOp, l: Num, r: Num) -> Result<Num> {
    use BinaryOp::*;
    let cmp = |b: bool| Num::Int(b as i64);
    Ok(match (l, r) {
        (Num::Int(a), Num::Int(b)) => match op {
            Add => Num::Int(a.wrapping_add(b)),
            Sub => Num::Int(a.wrapping_sub(b)),
            Mul => Num::Int(a.wrapping_mul(b)),
            // C truncates toward zero
            Div | Mod if b == 0 => return Err(ExecError::DivisionByZero),
            Div => Num::Int(a / b),
            Mod => Num::Int(a % b),
            Eq => cmp(a == b),
            Ne => cmp(a != b),
            Lt => cmp(a < b),
            Le => cmp(a <= b),
            Gt => cmp(a > b),
            Ge => cmp(a >= b),
            And => cmp(a != 0 && b != 0),
            Or => cmp(a != 0 || b != 0),
        },
        (l, r) => {
            let (a, b) = (l.as_f64(), r.as_f64());
            match op {
                Add => Num::Float(a + b),
                Sub => Num::Float(a - b),
                Mul => Num::Float(a * b),
                Div => Num::Float(a / b),
                Mod => Num::Float(a % b),
                Eq => cmp(a == b),
                Ne => cmp(a != b),
                Lt => cmp(a < b),
                Le => cmp(a <= b),
                Gt => cmp(a > b),
                Ge => cmp(a >= b),
                And => cmp(a != 0.0 && b != 0.0),
                Or => cmp(a != 0.0 || b != 0.0),
            }
        }
    })
}

fn call(name: &str, args: &[f64]) -> Result<Num> {
    let unary = |f: fn(f64) -> f64| match args {
        [x] => Ok(Num::Float(f(*x))),
        _ => Err(ExecError::Unsupported(format!("{} expects one argument", name))),
    };
    match name {
        "sqrt" => unary(f64::sqrt),
        "fabs" | "abs" => unary(f64::abs),
        "exp" => unary(f64::exp),
        "log" => unary(f64::ln),
        "sin" => unary(f64::sin),
        "cos" => unary(f64::cos),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        "pow" => match args {
            [x, y] => Ok(Num::Float(x.powf(*y))),
            _ => Err(ExecError::Unsupported("pow expects two arguments".to_string())),
        },
        other => Err(ExecError::Unsupported(format!("call to '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{Lexer, Parser};

    fn nest(src: &str) -> LoopNest {
        LoopNest::new(Parser::new(Lexer::new(src)).unwrap().parse_loop_code().unwrap())
    }

    #[test]
    fn test_axpy() {
        let mut ws = Workspace::new();
        ws.set_int("N", 4);
        ws.set_float("a", 2.0);
        ws.alloc_filled("x", &[4], 1.5);
        ws.alloc_filled("y", &[4], 1.0);
        let out = Interpreter::new().run(&nest("for (i=0; i<=N-1; i++) y[i] = y[i] + a*x[i];"), ws).unwrap();
        assert_eq!(out.array("y").unwrap(), &[4.0; 4]);
        assert_eq!(out.get("i"), Some(Num::Int(4)));
    }

    #[test]
    fn test_c_integer_division() {
        let mut ws = Workspace::new();
        ws.alloc_zero("r", &[2]);
        let out = Interpreter::new().run(&nest("{ q = -7; r[0] = q / 2; r[1] = q % 2; }"), ws).unwrap();
        assert_eq!(out.array("r").unwrap(), &[-3.0, -1.0]);
    }

    #[test]
    fn test_declarations_are_scoped() {
        let mut ws = Workspace::new();
        ws.alloc_zero("a", &[3]);
        let out = Interpreter::new()
            .run(&nest("for (i=0; i<=2; i++) { double t = i * 0.5; a[i] = t; }"), ws)
            .unwrap();
        assert_eq!(out.array("a").unwrap(), &[0.0, 0.5, 1.0]);
        assert_eq!(out.get("t"), None);
    }

    #[test]
    fn test_errors() {
        let mut ws = Workspace::new();
        ws.alloc_zero("a", &[3]);
        let err = Interpreter::new().run(&nest("for (i=0; i<=3; i++) a[i] = 1;"), ws.clone()).unwrap_err();
        assert!(matches!(err, ExecError::OutOfBounds { ref array, .. } if array == "a"));
        let err = Interpreter::new().run(&nest("a[0] = b[0];"), ws.clone()).unwrap_err();
        assert_eq!(err, ExecError::UnknownArray("b".into()));
        let err = Interpreter::new().run(&nest("a[0] = 1 / 0;"), ws.clone()).unwrap_err();
        assert_eq!(err, ExecError::DivisionByZero);
        let err = Interpreter::new().with_step_limit(5).run(&nest("for (i=0; i<=9; i++) a[0] = i;"), ws).unwrap_err();
        assert_eq!(err, ExecError::StepLimit(5));
    }

    #[test]
    fn test_min_bound_and_step() {
        let mut ws = Workspace::new();
        ws.alloc_zero("a", &[10]);
        let out = Interpreter::new()
            .run(&nest("for (ii=0; ii<=9; ii+=4) for (i=ii; i<=min(9,ii+3); i++) a[i] = ii;"), ws)
            .unwrap();
        assert_eq!(out.array("a").unwrap(), &[0.0, 0.0, 0.0, 0.0, 4.0, 4.0, 4.0, 4.0, 8.0, 8.0]);
    }

    #[test]
    fn test_math_calls() {
        let ws = Workspace::new();
        let e = Parser::new(Lexer::new("sqrt(16.0) + pow(2.0, 3.0)")).unwrap().parse_c_expr().unwrap();
        assert_eq!(Interpreter::new().eval(&e, &ws).unwrap(), Num::Float(12.0));
    }
}
