//! CUDA code generation.
//!
//! Every [`KernelLaunch`] becomes a `__global__` kernel walking its share
//! of the index range with a grid-stride loop, plus a host wrapper that
//! moves arrays to the device, splits the range across streams and
//! combines per-thread reduction partials in thread order.

use super::c::{host_wrapper_name, CCodeGen, LaunchStyle};
use super::SymbolTable;
use crate::ir::expr::{Access, Expr};
use crate::ir::nest::{Assign, AssignOp, Decl, KernelLaunch, LValue, LoopNest, Stmt};
use crate::utils::errors::{CodegenError, CodegenErrorKind};
use crate::utils::pretty::CodeFormatter;
use std::collections::BTreeSet;

/// CUDA code generator.
pub struct CudaCodeGen<'s> {
    symbols: &'s SymbolTable,
}

/// Names a kernel reads from its enclosing host code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelArgs {
    /// Arrays, in name order
    pub arrays: Vec<String>,
    /// Scalars, in name order
    pub scalars: Vec<String>,
    /// Scalars and indices local to one thread
    pub locals: Vec<String>,
}

impl KernelArgs {
    /// Collect the names used by a launch.
    pub fn of(k: &KernelLaunch) -> Self {
        let mut reads = BTreeSet::new();
        let mut arrays = BTreeSet::new();
        let mut locals: BTreeSet<String> = k.private.iter().cloned().collect();
        locals.insert(k.var.clone());
        for s in &k.body {
            s.walk(&mut |s| match s {
                Stmt::Assign(Assign { target, value, .. }) => {
                    match target {
                        LValue::Element(acc) => {
                            arrays.insert(acc.array.clone());
                            acc.indices.iter().for_each(|e| collect(e, &mut reads, &mut arrays));
                        }
                        LValue::Scalar(name) => {
                            reads.insert(name.clone());
                        }
                    }
                    collect(value, &mut reads, &mut arrays);
                }
                Stmt::Decl(d) => {
                    locals.insert(d.name.clone());
                    if let Some(e) = &d.init {
                        collect(e, &mut reads, &mut arrays);
                    }
                }
                Stmt::Loop(l) => {
                    locals.insert(l.var.clone());
                    collect(&l.lower, &mut reads, &mut arrays);
                    collect(&l.upper, &mut reads, &mut arrays);
                }
                Stmt::If { cond, .. } => collect(cond, &mut reads, &mut arrays),
                _ => {}
            });
        }
        if let Some(r) = &k.reduction {
            locals.insert(r.var.clone());
        }
        Self {
            arrays: arrays.into_iter().collect(),
            scalars: reads.into_iter().filter(|n| !locals.contains(n)).collect(),
            locals: locals.into_iter().collect(),
        }
    }
}

fn collect(e: &Expr, reads: &mut BTreeSet<String>, arrays: &mut BTreeSet<String>) {
    e.free_vars(reads);
    e.for_each_access(&mut |a| {
        arrays.insert(a.array.clone());
    });
}

/// Host statement calling the wrapper of `k`.
pub fn host_call(k: &KernelLaunch) -> String {
    let args = KernelArgs::of(k);
    let mut parts = vec![k.lower.to_string(), k.upper.to_string(), k.blocks.to_string()];
    parts.extend(args.arrays.iter().cloned());
    parts.extend(args.scalars.iter().cloned());
    if let Some(r) = &k.reduction {
        parts.push(format!("&{}", r.var));
    }
    format!("{}({});", host_wrapper_name(&k.name), parts.join(", "))
}

fn float_literal(v: f64) -> String {
    format!("{:?}", v)
}

impl<'s> CudaCodeGen<'s> {
    /// Create a generator typing names with `symbols`.
    pub fn new(symbols: &'s SymbolTable) -> Self {
        Self { symbols }
    }

    /// Generate `(kernels and wrappers, host code)` for a realized nest.
    pub fn generate(&self, nest: &LoopNest) -> Result<(String, String), CodegenError> {
        let mut defs = String::new();
        let mut launches = Vec::new();
        nest.walk(&mut |s| {
            if let Stmt::Launch(k) = s {
                launches.push(k);
            }
        });
        for k in launches {
            defs.push_str(&self.kernel(k)?);
            defs.push('\n');
            defs.push_str(&self.wrapper(k)?);
            defs.push('\n');
        }
        let host = CCodeGen::new(true).with_launches(LaunchStyle::HostCall).generate(&nest.stmts)?;
        Ok((defs, host))
    }

    fn array_param(&self, name: &str) -> Result<String, CodegenError> {
        let (ty, dims) = self.symbols.array(name).ok_or_else(|| CodegenError {
            message: format!("array '{}' has no declared extent", name),
            kind: CodegenErrorKind::UnsupportedInput,
        })?;
        let extents: String = dims.iter().map(|d| format!("[{}]", d)).collect();
        Ok(format!("{} {}{}", ty, name, extents))
    }

    fn scalar_param(&self, name: &str) -> String {
        format!("{} {}", self.symbols.scalar_type(name), name)
    }

    fn kernel(&self, k: &KernelLaunch) -> Result<String, CodegenError> {
        let args = KernelArgs::of(k);
        let mut params = vec![
            format!("int {}_lb", k.name),
            format!("int {}_start", k.name),
            format!("int {}_end", k.name),
        ];
        if k.reduction.is_some() {
            params.push(format!("double *{}_partial", k.name));
        }
        for a in &args.arrays {
            params.push(self.array_param(a)?);
        }
        params.extend(args.scalars.iter().map(|s| self.scalar_param(s)));

        let mut f = CodeFormatter::new("  ");
        f.writeln(&format!("__global__ void {}({}) {{", k.name, params.join(", ")));
        f.indent();
        f.writeln("int tid=blockIdx.x*blockDim.x+threadIdx.x;");
        let mut ints = vec!["it".to_string()];
        let mut others = Vec::new();
        let declared: BTreeSet<String> = k
            .body
            .iter()
            .flat_map(|s| {
                let mut names = Vec::new();
                s.walk(&mut |s| {
                    if let Stmt::Decl(d) = s {
                        names.push(d.name.clone());
                    }
                });
                names
            })
            .collect();
        let indices = loop_indices(k);
        for name in &args.locals {
            if declared.contains(name) || k.reduction.as_ref().map_or(false, |r| &r.var == name) {
                continue;
            }
            if indices.contains(name) || self.symbols.scalar_type(name) == "int" {
                ints.push(name.clone());
            } else {
                others.push(self.scalar_param(name));
            }
        }
        f.writeln(&format!("int {};", ints.join(", ")));
        for decl in &others {
            f.writeln(&format!("{};", decl));
        }
        if let Some(r) = &k.reduction {
            f.writeln(&format!("double {}={};", r.var, float_literal(r.op.identity())));
        }
        let staged = if k.cache_blocks { staged_arrays(k) } else { Vec::new() };
        let mut body = k.body.clone();
        for st in &staged {
            let ty = self.symbols.array(&st.array).map_or("double", |(ty, _)| ty);
            f.writeln(&format!("__shared__ {} {}[{}];", ty, shared_name(k, &st.array), k.threads));
            let (elem, slot) = staging_pair(k, &st.array);
            body = body.iter().map(|s| stage_stmt(s, &elem, &slot)).collect();
        }
        f.writeln(&format!(
            "for (it={n}_start+tid; it<{n}_end; it+=gridDim.x*blockDim.x) {{",
            n = k.name
        ));
        f.indent();
        if k.step == 1 {
            f.writeln(&format!("{}={}_lb+it;", k.var, k.name));
        } else {
            f.writeln(&format!("{}={}_lb+it*{};", k.var, k.name, k.step));
        }
        for st in staged.iter().filter(|st| st.read) {
            let (elem, slot) = staging_pair(k, &st.array);
            f.writeln(&format!("{}={};", slot, elem));
        }
        f.write(&CCodeGen::new(false).generate(&body)?);
        for st in staged.iter().filter(|st| st.written) {
            let (elem, slot) = staging_pair(k, &st.array);
            f.writeln(&format!("{}={};", elem, slot));
        }
        f.dedent();
        f.writeln("}");
        if let Some(r) = &k.reduction {
            f.writeln(&format!("{}_partial[tid]={};", k.name, r.var));
        }
        f.dedent();
        f.writeln("}");
        Ok(f.finish())
    }

    fn wrapper(&self, k: &KernelLaunch) -> Result<String, CodegenError> {
        let args = KernelArgs::of(k);
        let mut params = vec!["int cu_lb".to_string(), "int cu_ub".to_string(), "int cu_blocks".to_string()];
        for a in &args.arrays {
            params.push(self.array_param(a)?);
        }
        params.extend(args.scalars.iter().map(|s| self.scalar_param(s)));
        if let Some(r) = &k.reduction {
            params.push(format!("double *{}", r.var));
        }
        let partials = "cu_nstreams*cu_blocks*cu_threads";

        let mut f = CodeFormatter::new("  ");
        f.writeln(&format!("void {}({}) {{", host_wrapper_name(&k.name), params.join(", ")));
        f.indent();
        f.writeln(&format!("int cu_trip=cu_ub<cu_lb ? 0 : (cu_ub-cu_lb)/{}+1;", k.step));
        f.writeln(&format!("int cu_nstreams={};", k.streams));
        f.writeln("int cu_chunk=(cu_trip+cu_nstreams-1)/cu_nstreams;");
        f.writeln(&format!("int cu_threads={};", k.threads));
        f.writeln("int cu_s;");
        let mut extents = Vec::with_capacity(args.arrays.len());
        for a in &args.arrays {
            let (ty, dims) = self.symbols.array(a).ok_or_else(|| CodegenError {
                message: format!("array '{}' has no declared extent", a),
                kind: CodegenErrorKind::UnsupportedInput,
            })?;
            let size = format!("sizeof({})*{}", ty, dims.iter().product::<usize>());
            f.writeln(&format!("{} *d_{};", ty, a));
            f.writeln(&format!("cudaMalloc((void**)&d_{}, {});", a, size));
            f.writeln(&format!("cudaMemcpy(d_{a}, {a}, {size}, cudaMemcpyHostToDevice);", a = a, size = size));
            extents.push((a, ty, dims, size));
        }
        if k.reduction.is_some() {
            f.writeln("double *cu_partial;");
            f.writeln(&format!("cudaMalloc((void**)&cu_partial, sizeof(double)*{});", partials));
        }
        if let Some(l1) = k.prefer_l1 {
            let pref = if l1 >= 48 { "cudaFuncCachePreferL1" } else { "cudaFuncCachePreferShared" };
            f.writeln(&format!("cudaFuncSetCacheConfig({}, {});", k.name, pref));
        }
        f.writeln(&format!("cudaStream_t cu_streams[{}];", k.streams));
        f.writeln("for (cu_s=0; cu_s<cu_nstreams; cu_s++) cudaStreamCreate(&cu_streams[cu_s]);");
        f.writeln("for (cu_s=0; cu_s<cu_nstreams; cu_s++) {");
        f.indent();
        f.writeln("int cu_start=cu_s*cu_chunk;");
        f.writeln("int cu_end=(cu_s+1)*cu_chunk<cu_trip ? (cu_s+1)*cu_chunk : cu_trip;");
        let mut call = vec!["cu_lb".to_string(), "cu_start".to_string(), "cu_end".to_string()];
        if k.reduction.is_some() {
            call.push("cu_partial+cu_s*cu_blocks*cu_threads".to_string());
        }
        for (a, ty, dims, _) in &extents {
            if dims.len() > 1 {
                let inner: String = dims[1..].iter().map(|d| format!("[{}]", d)).collect();
                call.push(format!("({} (*){})d_{}", ty, inner, a));
            } else {
                call.push(format!("d_{}", a));
            }
        }
        call.extend(args.scalars.iter().cloned());
        f.writeln(&format!("{}<<<cu_blocks, cu_threads, 0, cu_streams[cu_s]>>>({});", k.name, call.join(", ")));
        f.dedent();
        f.writeln("}");
        f.writeln("cudaDeviceSynchronize();");
        for (a, _, _, size) in &extents {
            f.writeln(&format!("cudaMemcpy({a}, d_{a}, {size}, cudaMemcpyDeviceToHost);", a = a, size = size));
            f.writeln(&format!("cudaFree(d_{});", a));
        }
        if let Some(r) = &k.reduction {
            f.writeln(&format!("double *cu_host_partial=(double*)malloc(sizeof(double)*{});", partials));
            f.writeln(&format!(
                "cudaMemcpy(cu_host_partial, cu_partial, sizeof(double)*{}, cudaMemcpyDeviceToHost);",
                partials
            ));
            f.writeln(&format!("for (cu_s=0; cu_s<{}; cu_s++) {{", partials));
            f.indent();
            f.writeln(&format!("*{r}=*{r}{op}cu_host_partial[cu_s];", r = r.var, op = r.op.symbol()));
            f.dedent();
            f.writeln("}");
            f.writeln("free(cu_host_partial);");
            f.writeln("cudaFree(cu_partial);");
        }
        f.writeln("for (cu_s=0; cu_s<cu_nstreams; cu_s++) cudaStreamDestroy(cu_streams[cu_s]);");
        f.dedent();
        f.writeln("}");
        Ok(f.finish())
    }
}

/// An array staged through shared memory by a kernel.
struct Staged {
    array: String,
    read: bool,
    written: bool,
}

/// Arrays of a straight-line kernel body touched only at the launch
/// index. Each thread owns one shared slot, so staging needs no barrier.
fn staged_arrays(k: &KernelLaunch) -> Vec<Staged> {
    if k.body.iter().any(|s| !matches!(s, Stmt::Assign(_) | Stmt::Decl(_))) {
        return Vec::new();
    }
    let index = [Expr::var(k.var.as_str())];
    let mut reads: Vec<&Access> = Vec::new();
    let mut stores: Vec<&Access> = Vec::new();
    for s in &k.body {
        match s {
            Stmt::Assign(Assign { target, op, value }) => {
                if let LValue::Element(acc) = target {
                    acc.indices.iter().for_each(|e| e.for_each_access(&mut |a| reads.push(a)));
                    if *op != AssignOp::Set {
                        reads.push(acc);
                    }
                    stores.push(acc);
                }
                value.for_each_access(&mut |a| reads.push(a));
            }
            Stmt::Decl(d) => {
                if let Some(e) = &d.init {
                    e.for_each_access(&mut |a| reads.push(a));
                }
            }
            _ => {}
        }
    }
    let rejected: BTreeSet<&str> =
        reads.iter().chain(&stores).filter(|a| a.indices != index).map(|a| a.array.as_str()).collect();
    let read: BTreeSet<&str> = reads.iter().map(|a| a.array.as_str()).collect();
    let written: BTreeSet<&str> = stores.iter().map(|a| a.array.as_str()).collect();
    read.union(&written)
        .filter(|a| !rejected.contains(*a))
        .map(|a| Staged { array: a.to_string(), read: read.contains(a), written: written.contains(a) })
        .collect()
}

fn shared_name(k: &KernelLaunch, array: &str) -> String {
    format!("{}_sh_{}", k.name, array)
}

/// The global element `a[var]` and its shared slot.
fn staging_pair(k: &KernelLaunch, array: &str) -> (Access, Access) {
    (
        Access::new(array, vec![Expr::var(k.var.as_str())]),
        Access::new(shared_name(k, array), vec![Expr::var("threadIdx.x")]),
    )
}

fn stage_stmt(stmt: &Stmt, elem: &Access, slot: &Access) -> Stmt {
    let with = Expr::Access(slot.clone());
    let rep = |e: &Expr| e.replace_access(elem, &with);
    match stmt {
        Stmt::Assign(a) => Stmt::Assign(Assign {
            target: match &a.target {
                LValue::Element(t) if t == elem => LValue::Element(slot.clone()),
                other => other.clone(),
            },
            op: a.op,
            value: rep(&a.value),
        }),
        Stmt::Decl(d) => Stmt::Decl(Decl { init: d.init.as_ref().map(rep), ..d.clone() }),
        other => other.clone(),
    }
}

fn loop_indices(k: &KernelLaunch) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    out.insert(k.var.clone());
    for s in &k.body {
        s.walk(&mut |s| {
            if let Stmt::Loop(l) = s {
                out.insert(l.var.clone());
            }
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{fixed_config, Value};
    use crate::transform::test_util::nest;
    use crate::transform::Realizer;

    fn lowered(src: &str, params: &[(&str, i64)]) -> LoopNest {
        let bindings: Vec<(&str, Value)> = params.iter().map(|(k, v)| (*k, Value::Int(*v))).collect();
        let config = fixed_config(&bindings);
        Realizer::new(&config).realize(&nest(src)).unwrap()
    }

    fn symbols() -> SymbolTable {
        let mut t = SymbolTable::default();
        t.add_array("x", "double", &[1000]);
        t.add_array("y", "double", &[1000]);
        t.add_scalar("N", "int");
        t
    }

    const AXPY: &str = "transform CUDA(threadCount=TC, blockCount=BC, streamCount=2, preferL1Size=48)
        for (i=0; i<=N-1; i++) y[i] = y[i] + a*x[i];";

    #[test]
    fn test_axpy_kernel() {
        let realized = lowered(AXPY, &[("TC", 32), ("BC", 4)]);
        let table = symbols();
        let (defs, host) = CudaCodeGen::new(&table).generate(&realized).unwrap();
        assert!(defs.contains(
            "__global__ void kernel1(int kernel1_lb, int kernel1_start, int kernel1_end, double x[1000], double y[1000], double a) {"
        ), "{}", defs);
        assert!(defs.contains("for (it=kernel1_start+tid; it<kernel1_end; it+=gridDim.x*blockDim.x) {"));
        assert!(defs.contains("    i=kernel1_lb+it;\n    y[i]=y[i]+a*x[i];\n"));
        assert!(defs.contains("cudaFuncSetCacheConfig(kernel1, cudaFuncCachePreferL1);"));
        assert!(defs.contains("kernel1<<<cu_blocks, cu_threads, 0, cu_streams[cu_s]>>>(cu_lb, cu_start, cu_end, d_x, d_y, a);"));
        assert_eq!(host, "launch_kernel1(0, N-1, 4, x, y, a);\n");
    }

    #[test]
    fn test_reduction_partials() {
        let realized = lowered(
            "transform CUDA(threadCount=64) for (i=0; i<=N-1; i++) s = s + x[i]*y[i];",
            &[],
        );
        let table = symbols();
        let (defs, host) = CudaCodeGen::new(&table).generate(&realized).unwrap();
        assert!(defs.contains("double *kernel1_partial"));
        assert!(defs.contains("  double s=0.0;\n"));
        assert!(defs.contains("kernel1_partial[tid]=s;"));
        assert!(defs.contains("*s=*s+cu_host_partial[cu_s];"));
        assert!(host.ends_with(", x, y, &s);\n"), "{}", host);
    }

    #[test]
    fn test_cache_blocks_stage_in_shared_memory() {
        let src = "transform CUDA(threadCount=64, cacheBlocks=CB)
            for (i=0; i<=N-1; i++) y[i] = y[i] + a*x[i];";
        let table = symbols();
        let (defs, _) = CudaCodeGen::new(&table).generate(&lowered(src, &[("CB", 1)])).unwrap();
        assert!(defs.contains("  __shared__ double kernel1_sh_x[64];\n  __shared__ double kernel1_sh_y[64];\n"), "{}", defs);
        assert!(defs.contains(
            "    kernel1_sh_x[threadIdx.x]=x[i];\n    kernel1_sh_y[threadIdx.x]=y[i];\n    \
             kernel1_sh_y[threadIdx.x]=kernel1_sh_y[threadIdx.x]+a*kernel1_sh_x[threadIdx.x];\n    \
             y[i]=kernel1_sh_y[threadIdx.x];\n"
        ), "{}", defs);
        assert!(!defs.contains("x[i]=kernel1_sh_x"));

        let (plain, _) = CudaCodeGen::new(&table).generate(&lowered(src, &[("CB", 0)])).unwrap();
        assert!(!plain.contains("__shared__"));
    }

    #[test]
    fn test_cache_blocks_skip_offset_accesses() {
        let src = "transform CUDA(threadCount=32, cacheBlocks=1)
            for (i=0; i<=N-2; i++) y[i] = x[i] + x[i+1];";
        let table = symbols();
        let (defs, _) = CudaCodeGen::new(&table).generate(&lowered(src, &[])).unwrap();
        assert!(defs.contains("__shared__ double kernel1_sh_y[32];"), "{}", defs);
        assert!(!defs.contains("kernel1_sh_x"));
        assert!(defs.contains("    kernel1_sh_y[threadIdx.x]=x[i]+x[i+1];\n    y[i]=kernel1_sh_y[threadIdx.x];\n"));
        assert!(!defs.contains("kernel1_sh_y[threadIdx.x]=y[i];"));
    }

    #[test]
    fn test_missing_extent() {
        let realized = lowered("transform CUDA(threadCount=32) for (i=0; i<=N-1; i++) z[i] = 0;", &[]);
        let table = symbols();
        let err = CudaCodeGen::new(&table).generate(&realized).unwrap_err();
        assert_eq!(err.kind, CodegenErrorKind::UnsupportedInput);
    }

    #[test]
    fn test_two_dimensional_cast() {
        let realized = lowered(
            "transform CUDA(threadCount=32) for (i=0; i<=N-1; i++) for (j=0; j<=N-1; j++) A[i][j] = 2*A[i][j];",
            &[],
        );
        let mut table = symbols();
        table.add_array("A", "double", &[10, 20]);
        let (defs, _) = CudaCodeGen::new(&table).generate(&realized).unwrap();
        assert!(defs.contains("double A[10][20]"));
        assert!(defs.contains("(double (*)[20])d_A"));
        assert!(defs.contains("int it, i, j;"));
    }
}
