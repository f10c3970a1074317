//! Code generation from realized loop nests.
//!
//! Realized nests print as C (optionally with OpenMP pragmas) or as CUDA
//! host code plus kernels. [`splice`] writes generated regions back into
//! the annotated file; [`harness`] wraps them into a standalone timing
//! program for the command backend.

pub mod c;
pub mod cuda;
pub mod harness;

pub use c::CCodeGen;
pub use cuda::CudaCodeGen;
pub use harness::Harness;

use crate::frontend::{AnnotatedSource, HostBinding, InputSpec};
use crate::ir::nest::{LoopNest, Stmt};
use crate::utils::errors::CodegenError;
use std::collections::{BTreeMap, BTreeSet};

/// Target for code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Standard C
    C,
    /// C with OpenMP pragmas
    OpenMP,
    /// CUDA
    Cuda,
}

impl Target {
    /// The least capable target that can express `nest`.
    pub fn for_nest(nest: &LoopNest) -> Target {
        let mut target = Target::C;
        nest.walk(&mut |s| match s {
            Stmt::Launch(_) => target = Target::Cuda,
            Stmt::Loop(l) if l.attrs.parallel.is_some() && target == Target::C => target = Target::OpenMP,
            _ => {}
        });
        target
    }
}

/// Generated code for one region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedCode {
    /// File-scope definitions (kernels, helper macros)
    pub prelude: String,
    /// Statements replacing the region
    pub body: String,
}

/// Types of the names generated code refers to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolTable {
    arrays: BTreeMap<String, (String, Vec<usize>)>,
    scalars: BTreeMap<String, String>,
}

impl SymbolTable {
    /// Symbols declared by the inputs and host bindings.
    pub fn from_inputs(inputs: &InputSpec, host: &[HostBinding]) -> Self {
        let mut table = Self::default();
        for p in &inputs.params {
            let ty = match p.values.first() {
                Some(crate::space::Value::Float(_)) => "double",
                _ => "int",
            };
            table.scalars.insert(p.name.clone(), ty.to_string());
        }
        for a in &inputs.arrays {
            table.arrays.insert(a.name.clone(), (a.elem_type.clone(), a.dims.clone()));
        }
        for s in &inputs.scalars {
            table.scalars.insert(s.name.clone(), s.elem_type.clone());
        }
        for b in host {
            table.scalars.insert(b.name.clone(), "int".to_string());
        }
        table
    }

    /// Declare an array.
    pub fn add_array(&mut self, name: &str, elem_type: &str, dims: &[usize]) {
        self.arrays.insert(name.to_string(), (elem_type.to_string(), dims.to_vec()));
    }

    /// Declare a scalar.
    pub fn add_scalar(&mut self, name: &str, ty: &str) {
        self.scalars.insert(name.to_string(), ty.to_string());
    }

    /// Element type and extents of an array.
    pub fn array(&self, name: &str) -> Option<(&str, &[usize])> {
        self.arrays.get(name).map(|(t, d)| (t.as_str(), d.as_slice()))
    }

    /// Type of a scalar; undeclared scalars are doubles.
    pub fn scalar_type(&self, name: &str) -> &str {
        self.scalars.get(name).map(String::as_str).unwrap_or("double")
    }

    /// Check whether a scalar is declared.
    pub fn has_scalar(&self, name: &str) -> bool {
        self.scalars.contains_key(name)
    }
}

const MIN_MAX: &str = "#ifndef min\n#define min(x,y) ((x)<(y)?(x):(y))\n#endif\n#ifndef max\n#define max(x,y) ((x)>(y)?(x):(y))\n#endif\n";

/// Generate code for a realized nest.
pub fn generate(nest: &LoopNest, target: Target, symbols: &SymbolTable) -> Result<GeneratedCode, CodegenError> {
    match target {
        Target::C | Target::OpenMP => Ok(GeneratedCode {
            prelude: MIN_MAX.to_string(),
            body: CCodeGen::new(target == Target::OpenMP).generate(&nest.stmts)?,
        }),
        Target::Cuda => {
            let (kernels, body) = CudaCodeGen::new(symbols).generate(nest)?;
            Ok(GeneratedCode { prelude: format!("{}\n{}", MIN_MAX, kernels), body })
        }
    }
}

/// Loop indices of `realized` that `original` does not have.
pub fn new_indices(original: &LoopNest, realized: &LoopNest) -> Vec<String> {
    let old: BTreeSet<String> = original.loops().iter().map(|l| l.var.clone()).collect();
    let mut out: Vec<String> = Vec::new();
    for l in realized.loops() {
        if !old.contains(&l.var) && !out.contains(&l.var) {
            out.push(l.var.clone());
        }
    }
    out
}

/// Code for one region in place: new loop indices are declared in a
/// block of their own.
pub fn region_body(original: &LoopNest, realized: &LoopNest, code: &GeneratedCode) -> String {
    let fresh = new_indices(original, realized);
    if fresh.is_empty() {
        return code.body.clone();
    }
    let mut out = String::from("{\n");
    out.push_str(&format!("  int {};\n", fresh.join(", ")));
    out.push_str(&crate::utils::pretty::indent(&code.body, "  "));
    out.push_str("\n}\n");
    out
}

/// Replace every region's placeholder with generated code; preludes are
/// placed at the top of the file.
pub fn splice(source: &AnnotatedSource, bodies: &[String], preludes: &[String]) -> String {
    let mut out = String::new();
    let mut seen = BTreeSet::new();
    for p in preludes {
        if !p.is_empty() && seen.insert(p.as_str()) {
            out.push_str(p);
            out.push('\n');
        }
    }
    let mut pos = 0;
    for (region, body) in source.regions.iter().zip(bodies) {
        out.push_str(&source.source[pos..region.placeholder.start]);
        out.push('\n');
        out.push_str(body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
        pos = region.placeholder.end;
    }
    out.push_str(&source.source[pos..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{parse, Lexer, Parser};

    const FILE: &str = "void axpy(int N, double a, double *x, double *y) {
/*@ begin Loop (
  transform Composite(tile=[('i',4,'ii')])
  for (i=0; i<=N-1; i++) y[i] = y[i] + a*x[i];
) @*/
for (i=0; i<=N-1; i++) y[i] = y[i] + a*x[i];
/*@ end @*/
}
";

    #[test]
    fn test_target_for_nest() {
        let nest = LoopNest::new(Parser::new(Lexer::new("for (i=0; i<=9; i++) a[i] = 0;")).unwrap().parse_loop_code().unwrap());
        assert_eq!(Target::for_nest(&nest), Target::C);
    }

    #[test]
    fn test_splice_replaces_placeholder() {
        let source = parse(FILE).unwrap();
        let region = &source.regions[0];
        let realized = crate::transform::realize(&region.nest, &crate::space::Configuration::default()).unwrap();
        let code = generate(&realized, Target::C, &SymbolTable::default()).unwrap();
        let body = region_body(&region.nest.without_transforms(), &realized, &code);
        assert!(body.starts_with("{\n  int ii;\n"));
        let out = splice(&source, &[body], &[code.prelude]);
        assert!(out.starts_with("#ifndef min"));
        assert!(out.contains("for (ii=0; ii<=N-1; ii+=4) {"));
        assert!(out.contains("/*@ begin Loop ("));
        assert!(out.contains("/*@ end @*/\n}"));
        // the original code between the markers is gone
        assert_eq!(out.matches("for (i=0; i<=N-1; i++) y[i]").count(), 1);
    }
}
