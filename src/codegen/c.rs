//! C code generation.

use crate::ir::nest::{KernelLaunch, Loop, Stmt};
use crate::utils::errors::{CodegenError, CodegenErrorKind};
use crate::utils::pretty::CodeFormatter;

/// How kernel launches are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStyle {
    /// Launches are an error (plain C target)
    Reject,
    /// Launches call the host wrapper generated for the kernel
    HostCall,
}

/// C code generator.
pub struct CCodeGen {
    /// Emit parallel pragmas
    openmp: bool,
    launches: LaunchStyle,
    indent: String,
}

impl CCodeGen {
    /// Create a C generator emitting OpenMP pragmas when `openmp` is set.
    pub fn new(openmp: bool) -> Self {
        Self { openmp, launches: LaunchStyle::Reject, indent: "  ".to_string() }
    }

    /// Choose how launches are emitted.
    pub fn with_launches(mut self, style: LaunchStyle) -> Self {
        self.launches = style;
        self
    }

    /// Generate C for a sequence of statements.
    pub fn generate(&self, stmts: &[Stmt]) -> Result<String, CodegenError> {
        let mut f = CodeFormatter::new(&self.indent);
        for stmt in stmts {
            self.generate_stmt(&mut f, stmt)?;
        }
        Ok(f.finish())
    }

    fn generate_stmt(&self, f: &mut CodeFormatter, stmt: &Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::Assign(a) => f.writeln(&format!("{}{}{};", a.target, a.op, a.value)),
            Stmt::Decl(d) => match &d.init {
                Some(init) => f.writeln(&format!("{} {}={};", d.ty, d.name, init)),
                None => f.writeln(&format!("{} {};", d.ty, d.name)),
            },
            Stmt::Loop(l) => self.generate_loop(f, l)?,
            Stmt::Block(b) => {
                f.writeln("{");
                f.indent();
                for s in b {
                    self.generate_stmt(f, s)?;
                }
                f.dedent();
                f.writeln("}");
            }
            Stmt::If { cond, then_branch, else_branch } => {
                f.writeln(&format!("if ({}) {{", cond));
                f.indent();
                for s in then_branch {
                    self.generate_stmt(f, s)?;
                }
                f.dedent();
                if else_branch.is_empty() {
                    f.writeln("}");
                } else {
                    f.writeln("} else {");
                    f.indent();
                    for s in else_branch {
                        self.generate_stmt(f, s)?;
                    }
                    f.dedent();
                    f.writeln("}");
                }
            }
            Stmt::Launch(k) => self.generate_launch(f, k)?,
            Stmt::Transform(t) => {
                return Err(CodegenError {
                    message: format!("transform statement at line {} was not realized", t.span.start_line),
                    kind: CodegenErrorKind::UnsupportedTarget,
                })
            }
        }
        Ok(())
    }

    fn generate_loop(&self, f: &mut CodeFormatter, l: &Loop) -> Result<(), CodegenError> {
        if let (true, Some(info)) = (self.openmp, &l.attrs.parallel) {
            let mut pragma = format!("#pragma {}", info.pragma);
            if !info.private.is_empty() {
                pragma.push_str(&format!(" private({})", info.private.join(",")));
            }
            for r in &info.reductions {
                pragma.push_str(&format!(" reduction({}:{})", r.op.symbol(), r.var));
            }
            f.directive(&pragma);
        }
        if let Some(pragmas) = &l.attrs.vector {
            for p in pragmas {
                f.directive(&format!("#pragma {}", p));
            }
        }
        f.writeln(&format!("{} {{", loop_header(l)));
        f.indent();
        for s in &l.body {
            self.generate_stmt(f, s)?;
        }
        f.dedent();
        f.writeln("}");
        Ok(())
    }

    fn generate_launch(&self, f: &mut CodeFormatter, k: &KernelLaunch) -> Result<(), CodegenError> {
        match self.launches {
            LaunchStyle::Reject => Err(CodegenError {
                message: format!("kernel '{}' needs the CUDA target", k.name),
                kind: CodegenErrorKind::UnsupportedTarget,
            }),
            LaunchStyle::HostCall => {
                f.writeln(&super::cuda::host_call(k));
                Ok(())
            }
        }
    }
}

/// `for (i=lb; i<=ub; i++)` with `i+=s` for larger steps.
pub fn loop_header(l: &Loop) -> String {
    let incr = if l.step == 1 { format!("{}++", l.var) } else { format!("{}+={}", l.var, l.step) };
    format!("for ({v}={}; {v}<={}; {})", l.lower, l.upper, incr, v = l.var)
}

/// Name of the host function launching kernel `name`.
pub fn host_wrapper_name(name: &str) -> String {
    format!("launch_{}", name)
}

/// Render statements as C with pragmas and host launch calls.
pub fn render_stmts(stmts: &[Stmt]) -> String {
    let gen = CCodeGen::new(true).with_launches(LaunchStyle::HostCall);
    let mut f = CodeFormatter::new("  ");
    for stmt in stmts {
        if let Err(e) = gen.generate_stmt(&mut f, stmt) {
            f.writeln(&format!("/* {} */", e.message));
        }
    }
    f.finish()
}
