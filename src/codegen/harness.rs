//! Standalone timing programs.
//!
//! The harness declares and fills the inputs, runs every generated region
//! a number of times and prints `Time: <seconds>` (mean per repetition)
//! followed by a checksum over the input arrays.

use super::GeneratedCode;
use crate::frontend::{ArrayDecl, Fill, HostBinding, InputSpec};
use crate::ir::nest::LoopNest;
use crate::space::Value;
use crate::utils::errors::{CodegenError, CodegenErrorKind};
use crate::utils::pretty::{indent, CodeFormatter};
use std::collections::BTreeSet;

const HEADERS: &str = "#include <stdio.h>
#include <stdlib.h>
#include <sys/time.h>
#include <math.h>
#include <string.h>
";

const GET_TIME: &str = "double get_time() {
  struct timeval tv;
  gettimeofday(&tv, NULL);
  return tv.tv_sec + tv.tv_usec * 1e-6;
}
";

/// Builds the timing program around generated regions.
#[derive(Debug, Clone)]
pub struct Harness<'a> {
    inputs: &'a InputSpec,
    host: &'a [HostBinding],
    repetitions: u32,
    seed: u64,
}

impl<'a> Harness<'a> {
    /// Harness for the given inputs and host bindings.
    pub fn new(inputs: &'a InputSpec, host: &'a [HostBinding]) -> Self {
        Self { inputs, host, repetitions: 5, seed: 0 }
    }

    /// Number of timed repetitions.
    pub fn repetitions(mut self, n: u32) -> Self {
        self.repetitions = n.max(1);
        self
    }

    /// Seed for random input values.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Produce the full program for realized regions and their code.
    pub fn wrap(&self, regions: &[(&LoopNest, &GeneratedCode)]) -> Result<String, CodegenError> {
        let mut out = String::from(HEADERS);
        if regions.iter().any(|(_, c)| c.prelude.contains("__global__")) {
            out.push_str("#include <cuda_runtime.h>\n");
        }
        if let Some(decl) = &self.inputs.decl_file {
            out.push_str(&format!("#include \"{}\"\n", decl));
        }
        if let Some(init) = &self.inputs.init_file {
            out.push_str(&format!("#include \"{}\"\n", init));
        }
        out.push('\n');
        out.push_str(GET_TIME);
        let mut seen = BTreeSet::new();
        for (_, code) in regions {
            if !code.prelude.is_empty() && seen.insert(code.prelude.as_str()) {
                out.push('\n');
                out.push_str(&code.prelude);
            }
        }
        out.push('\n');
        out.push_str(&self.main(regions)?);
        Ok(out)
    }

    fn main(&self, regions: &[(&LoopNest, &GeneratedCode)]) -> Result<String, CodegenError> {
        let mut f = CodeFormatter::new("  ");
        f.writeln("int main() {");
        f.indent();

        let mut known: BTreeSet<String> = BTreeSet::new();
        for p in &self.inputs.params {
            let line = match p.values.first() {
                Some(Value::Int(v)) => format!("int {}={};", p.name, v),
                Some(Value::Bool(b)) => format!("int {}={};", p.name, *b as i32),
                Some(Value::Float(v)) => format!("double {}={:?};", p.name, v),
                Some(Value::Str(s)) => {
                    return Err(unsupported(format!("input parameter '{}' has string value '{}'", p.name, s)))
                }
                None => return Err(unsupported(format!("input parameter '{}' has no value", p.name))),
            };
            f.writeln(&line);
            known.insert(p.name.clone());
        }
        if self.inputs.decl_file.is_none() {
            for a in &self.inputs.arrays {
                f.writeln(&array_decl(a)?);
                known.insert(a.name.clone());
            }
            for s in &self.inputs.scalars {
                f.writeln(&format!("{} {};", s.elem_type, s.name));
                known.insert(s.name.clone());
            }
        } else {
            known.extend(self.inputs.arrays.iter().map(|a| a.name.clone()));
            known.extend(self.inputs.scalars.iter().map(|s| s.name.clone()));
        }
        for b in self.host {
            if known.insert(b.name.clone()) {
                f.writeln(&format!("int {}={};", b.name, b.value));
            }
        }

        let mut indices: Vec<String> = Vec::new();
        let mut scalars: BTreeSet<String> = BTreeSet::new();
        for (nest, _) in regions {
            for l in nest.loops() {
                if !known.contains(&l.var) && !indices.contains(&l.var) {
                    indices.push(l.var.clone());
                }
            }
            scalars.extend(nest.assigned_scalars());
        }
        if !indices.is_empty() {
            f.writeln(&format!("int {};", indices.join(", ")));
        }
        for s in scalars.iter().filter(|s| !known.contains(*s) && !indices.contains(*s)) {
            f.writeln(&format!("double {}=0;", s));
        }
        f.writeln("double h_start, h_total=0, h_chk=0;");
        f.writeln("long h_p;");
        f.writeln("int h_rep;");
        f.writeln(&format!("srand({});", self.seed as u32));

        if self.inputs.init_file.is_some() {
            f.writeln("init_input_vars();");
        } else {
            for a in &self.inputs.arrays {
                f.writeln(&format!("for (h_p=0; h_p<{}; h_p++) {{", a.len()));
                f.indent();
                f.writeln(&format!("(({}*){})[h_p]={};", a.elem_type, a.name, fill_value(&a.elem_type, a.fill)));
                f.dedent();
                f.writeln("}");
            }
            for s in &self.inputs.scalars {
                f.writeln(&format!("{}={};", s.name, fill_value(&s.elem_type, s.fill)));
            }
        }

        f.writeln(&format!("for (h_rep=0; h_rep<{}; h_rep++) {{", self.repetitions));
        f.indent();
        f.writeln("h_start=get_time();");
        for (_, code) in regions {
            f.writeln("{");
            f.write(&indent(&code.body, "  "));
            f.newline();
            f.writeln("}");
        }
        f.writeln("h_total+=get_time()-h_start;");
        f.dedent();
        f.writeln("}");
        f.writeln(&format!("printf(\"Time: %.9f\\n\", h_total/{});", self.repetitions));

        for a in &self.inputs.arrays {
            f.writeln(&format!("for (h_p=0; h_p<{}; h_p++) {{", a.len()));
            f.indent();
            f.writeln(&format!("h_chk+=(double)(({}*){})[h_p];", a.elem_type, a.name));
            f.dedent();
            f.writeln("}");
        }
        f.writeln("printf(\"Checksum: %.9e\\n\", h_chk);");
        if self.inputs.decl_file.is_none() {
            for a in self.inputs.arrays.iter().filter(|a| !a.is_static) {
                f.writeln(&format!("free({});", a.name));
            }
        }
        f.writeln("return 0;");
        f.dedent();
        f.writeln("}");
        Ok(f.finish())
    }
}

fn unsupported(message: String) -> CodegenError {
    CodegenError { message, kind: CodegenErrorKind::UnsupportedInput }
}

fn array_decl(a: &ArrayDecl) -> Result<String, CodegenError> {
    if a.dims.is_empty() {
        return Err(unsupported(format!("array '{}' has no extents", a.name)));
    }
    let extents: String = a.dims.iter().map(|d| format!("[{}]", d)).collect();
    if a.is_static {
        return Ok(format!("static {} {}{};", a.elem_type, a.name, extents));
    }
    let inner: String = a.dims[1..].iter().map(|d| format!("[{}]", d)).collect();
    let ty = &a.elem_type;
    Ok(if inner.is_empty() {
        format!("{ty} *{n}=({ty}*)malloc(sizeof({ty})*{len});", ty = ty, n = a.name, len = a.len())
    } else {
        format!(
            "{ty} (*{n}){inner}=({ty} (*){inner})malloc(sizeof({ty})*{len});",
            ty = ty,
            n = a.name,
            inner = inner,
            len = a.len()
        )
    })
}

fn fill_value(elem_type: &str, fill: Fill) -> String {
    match fill {
        Fill::Random => format!("({})((double)rand()/RAND_MAX)", elem_type),
        Fill::Zero => "0".to_string(),
        Fill::Constant(v) => format!("{:?}", v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{generate, SymbolTable, Target};
    use crate::frontend::{InputParam, ScalarDecl};
    use crate::ir::expr::Expr;
    use crate::transform::test_util::nest;

    fn inputs() -> InputSpec {
        InputSpec {
            params: vec![InputParam { name: "N".into(), values: vec![Value::Int(100), Value::Int(200)] }],
            arrays: vec![
                ArrayDecl { name: "x".into(), elem_type: "double".into(), dims: vec![100], fill: Fill::Random, is_static: false },
                ArrayDecl { name: "A".into(), elem_type: "double".into(), dims: vec![100, 100], fill: Fill::Zero, is_static: true },
            ],
            scalars: vec![ScalarDecl { name: "a".into(), elem_type: "double".into(), fill: Fill::Constant(2.5) }],
            decl_file: None,
            init_file: None,
        }
    }

    #[test]
    fn test_axpy_program() {
        let inputs = inputs();
        let host = vec![HostBinding { name: "n".into(), value: Expr::var("N") }];
        let region = nest("for (i=0; i<=n-1; i++) { x[i] = a*x[i]; s = s + x[i]; }");
        let code = generate(&region, Target::C, &SymbolTable::default()).unwrap();
        let program = Harness::new(&inputs, &host).repetitions(3).seed(7).wrap(&[(&region, &code)]).unwrap();
        assert!(program.starts_with("#include <stdio.h>"));
        assert!(program.contains("#define min(x,y)"));
        assert!(program.contains("  int N=100;\n"));
        assert!(program.contains("  double *x=(double*)malloc(sizeof(double)*100);\n"));
        assert!(program.contains("  static double A[100][100];\n"));
        assert!(program.contains("  int n=N;\n"));
        assert!(program.contains("  int i;\n"));
        assert!(program.contains("  double s=0;\n"));
        assert!(program.contains("  a=2.5;\n"));
        assert!(program.contains("srand(7);"));
        assert!(program.contains("for (h_rep=0; h_rep<3; h_rep++) {"));
        assert!(program.contains("      x[i]=a*x[i];\n"));
        assert!(program.contains("printf(\"Time: %.9f\\n\", h_total/3);"));
        assert!(program.contains("free(x);"));
        assert!(!program.contains("free(A);"));
    }

    #[test]
    fn test_external_declarations() {
        let mut inputs = inputs();
        inputs.decl_file = Some("decl.h".into());
        inputs.init_file = Some("init.c".into());
        let region = nest("for (i=0; i<=N-1; i++) x[i] = 0;");
        let code = generate(&region, Target::C, &SymbolTable::default()).unwrap();
        let program = Harness::new(&inputs, &[]).wrap(&[(&region, &code)]).unwrap();
        assert!(program.contains("#include \"decl.h\"\n"));
        assert!(program.contains("init_input_vars();"));
        assert!(!program.contains("malloc"));
    }

    #[test]
    fn test_string_input_rejected() {
        let mut inputs = inputs();
        inputs.params[0].values = vec![Value::from("big")];
        let region = nest("for (i=0; i<=N-1; i++) x[i] = 0;");
        let code = generate(&region, Target::C, &SymbolTable::default()).unwrap();
        let err = Harness::new(&inputs, &[]).wrap(&[(&region, &code)]).unwrap_err();
        assert_eq!(err.kind, CodegenErrorKind::UnsupportedInput);
    }
}
