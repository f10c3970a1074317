//! Benchmarks for the tuning engine.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use looptune::codegen::{generate, SymbolTable, Target};
use looptune::exec::{Interpreter, Workspace};
use looptune::space::Configuration;
use rand::rngs::StdRng;
use rand::SeedableRng;

const MATMUL: &str = r#"
/*@ begin PerfTuning (
  def performance_params {
    param T1[] = [1,16,32,64];
    param T2[] = [1,16,32,64];
    param U1[] = range(1,9);
    param U2[] = range(1,9);
    param SR[] = [False,True];
    param VEC[] = [False,True];
    constraint tiles = (T1 == 1 or T1 % U1 == 0);
    constraint reg = (U1 * U2 <= 16);
  }
  def input_params { param N[] = [64]; }
  def input_vars {
    decl static double A[N][N] = random;
    decl static double B[N][N] = random;
    decl static double C[N][N] = 0;
  }
) @*/
/*@ begin Loop (
  transform Composite(
    tile=[('i',T1,'ii'),('j',T2,'jj')],
    unrolljam=(['i','j'],[U1,U2]),
    scalarreplace=(SR,'double'),
    vector=(VEC,['ivdep','vector always']))
  for (i=0; i<=N-1; i++)
    for (j=0; j<=N-1; j++)
      for (k=0; k<=N-1; k++)
        C[i][j] = C[i][j] + A[i][k]*B[k][j];
) @*/
/*@ end @*/
/*@ end @*/
"#;

/// Benchmark annotation parsing.
fn bench_parsing(c: &mut Criterion) {
    c.bench_function("parse_matmul_annotations", |b| {
        b.iter(|| looptune::frontend::parse(black_box(MATMUL)).unwrap())
    });

    c.bench_function("lex_matmul", |b| {
        b.iter(|| looptune::frontend::Lexer::new(black_box(MATMUL)).tokenize().unwrap())
    });
}

/// Benchmark sampling and enumeration of the parameter space.
fn bench_space(c: &mut Criterion) {
    let source = looptune::frontend::parse(MATMUL).unwrap();
    let space = &source.tuning.space;

    c.bench_function("sample_constrained", |b| {
        let mut rng = StdRng::seed_from_u64(1);
        b.iter(|| space.sample(&mut rng, 1000).unwrap())
    });

    c.bench_function("enumerate_space", |b| b.iter(|| space.configurations().count()));
}

fn config(source: &looptune::frontend::AnnotatedSource, t: i64, u: i64) -> Configuration {
    let mut bindings = std::collections::BTreeMap::new();
    for (name, value) in [("T1", t), ("T2", t), ("U1", u), ("U2", u)] {
        bindings.insert(name.to_string(), looptune::space::Value::Int(value));
    }
    bindings.insert("SR".to_string(), looptune::space::Value::Bool(true));
    // the k loop carries the C[i][j] reduction
    bindings.insert("VEC".to_string(), looptune::space::Value::Bool(false));
    source.tuning.space.validate(&bindings).unwrap()
}

/// Benchmark realization and code generation.
fn bench_transform(c: &mut Criterion) {
    let source = looptune::frontend::parse(MATMUL).unwrap();
    let nest = &source.regions[0].nest;
    let mut group = c.benchmark_group("realize");
    for (t, u) in [(16, 2), (32, 4), (64, 4)] {
        let config = config(&source, t, u);
        group.bench_with_input(BenchmarkId::from_parameter(format!("T{}_U{}", t, u)), &config, |b, config| {
            b.iter(|| looptune::transform::realize(black_box(nest), config).unwrap())
        });
    }
    group.finish();

    let config = config(&source, 32, 4);
    let realized = looptune::transform::realize(nest, &config).unwrap();
    let symbols = SymbolTable::from_inputs(&source.tuning.inputs, &source.host_bindings);
    c.bench_function("generate_c", |b| {
        b.iter(|| generate(black_box(&realized), Target::C, &symbols).unwrap())
    });
}

/// Benchmark interpreting the original and a tuned nest.
fn bench_interpreter(c: &mut Criterion) {
    let source = looptune::frontend::parse(MATMUL).unwrap();
    let nest = &source.regions[0].nest;
    let ws = Workspace::from_inputs(&source.tuning.inputs, 0).unwrap();
    let original = nest.without_transforms();
    let tuned = looptune::transform::realize(nest, &config(&source, 16, 2)).unwrap();

    let mut group = c.benchmark_group("interpret_matmul_64");
    group.sample_size(10);
    group.bench_function("original", |b| b.iter(|| Interpreter::new().run(&original, ws.clone()).unwrap()));
    group.bench_function("tiled_unrolled", |b| b.iter(|| Interpreter::new().run(&tuned, ws.clone()).unwrap()));
    group.finish();
}

criterion_group!(benches, bench_parsing, bench_space, bench_transform, bench_interpreter);
criterion_main!(benches);
