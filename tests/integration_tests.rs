//! Integration tests for the tuning pipeline.

use looptune::autotuning::{
    AutoTuner, Binary, Builder, Candidate, FailureStage, InterpretedBackend, Measurer, Outcome,
    SearchAlgorithm, TuningConfig, TuningProblem,
};
use looptune::frontend::parse;
use looptune::prelude::*;
use looptune::space::evaluate_bool;
use std::sync::Arc;

fn matmul_source(n: usize, tiles: &str, unrolls: &str) -> String {
    format!(
        r#"
void matmul(double A[{n}][{n}], double B[{n}][{n}], double C[{n}][{n}]) {{
/*@ begin PerfTuning (
  def performance_params {{
    param T[] = {tiles};
    param U[] = {unrolls};
  }}
  def input_params {{ param N[] = [{n}]; }}
  def input_vars {{
    decl static double A[N][N] = random;
    decl static double B[N][N] = random;
    decl static double C[N][N] = 0;
  }}
  def search {{ arg algorithm = 'Exhaustive'; }}
) @*/
int i, j, k;
/*@ begin Loop (
  transform Composite(
    tile=[('i',T,'ii'),('j',T,'jj'),('k',T,'kk')],
    unrolljam=(['k'],[U]))
  for (i=0; i<=N-1; i++)
    for (j=0; j<=N-1; j++)
      for (k=0; k<=N-1; k++)
        C[i][j] = C[i][j] + A[i][k]*B[k][j];
) @*/
/*@ end @*/
/*@ end @*/
}}
"#
    )
}

fn tune_matmul(n: usize, tiles: &str, unrolls: &str) -> looptune::autotuning::TuningOutcome {
    let text = matmul_source(n, tiles, unrolls);
    let source = parse(&text).expect("Failed to parse");
    let problem = TuningProblem::from_source(&source);
    let backend = InterpretedBackend::from_inputs(&problem.inputs, &problem.host, &problem.originals(), 0)
        .expect("Failed to set up inputs")
        .with_reference(&problem.originals(), 1e-9)
        .expect("Reference run failed");
    let backend = Arc::new(backend);
    let config = TuningConfig::new()
        .with_annotation(&source.tuning.search, &source.tuning.counter)
        .expect("Invalid tuning settings")
        .repetitions(1)
        .validate(true);
    AutoTuner::new(&problem, config, backend.clone(), backend).tune().expect("Tuning failed")
}

#[test]
fn test_small_matmul_end_to_end() {
    let outcome = tune_matmul(24, "[4,8]", "[1,2]");
    assert_eq!(outcome.history.len(), 4);
    assert_eq!(outcome.history.failures(), 0);
    assert_eq!(outcome.report.algorithm, SearchAlgorithm::Exhaustive);
    let best = outcome.best();
    let best_cost = best.cost().unwrap();
    assert!(outcome.history.trials().iter().all(|t| t.cost().unwrap() >= best_cost));
}

/// Full-size matmul through the interpreter backend. Too slow for a debug
/// build, so run it explicitly:
/// `cargo test --release --test integration_tests -- --ignored`
#[test]
#[ignore = "slow; run with `cargo test --release --test integration_tests -- --ignored`"]
fn test_matmul_500_end_to_end() {
    let outcome = tune_matmul(500, "[64]", "[2]");
    assert_eq!(outcome.history.len(), 1);
    assert!(outcome.best().is_success());
    assert_eq!(outcome.best().config.get("T"), Some(&Value::Int(64)));
}

#[test]
fn test_generated_code_for_matmul() {
    let text = matmul_source(500, "[64]", "[2]");
    let source = parse(&text).unwrap();
    let config = source.tuning.space.configurations().next().unwrap();
    let code = looptune::generate_code(&source, &config).unwrap();
    assert!(code.contains("int ii, jj, kk"));
    assert!(code.contains("for (kk=0; kk<=N-1; kk+=64)"));
    assert!(code.contains("int i, j, k;"));
}

/// Cost derived from the configuration; trials whose index is in
/// `failing` fail to build.
struct Synthetic {
    failing: fn(usize) -> bool,
}

impl Builder for Synthetic {
    fn build(&self, candidate: &Candidate) -> Result<Binary, BuildError> {
        if (self.failing)(candidate.trial) {
            return Err(BuildError::Compiler { status: "exit status: 1".into(), stderr: "synthetic failure".into() });
        }
        let cost: i64 = candidate.config.iter().filter_map(|(_, v)| v.as_int()).map(|v| (v - 7).abs()).sum();
        Ok(Binary::Executable(format!("{}", cost + 1).into()))
    }
}

impl Measurer for Synthetic {
    fn measure(&self, binary: &Binary, _repetitions: u32) -> Result<f64, MeasureError> {
        match binary {
            Binary::Executable(p) => p.display().to_string().parse().map_err(|_| MeasureError::NoTiming),
            Binary::Nests(_) => Err(MeasureError::NoTiming),
        }
    }
}

const SPARSE_SPACE: &str = r#"
/*@ begin PerfTuning (
  def performance_params {
    param A[] = range(0,20);
    param B[] = range(0,20);
    param C[] = range(0,5);
    constraint tenth = ((A + B) % 10 == 0);
  }
) @*/
/*@ begin Loop (
  for (i=0; i<=9; i++) x[i] = x[i] + 1;
) @*/
/*@ end @*/
/*@ end @*/
"#;

#[test]
fn test_sparse_space_search_terminates() {
    let source = parse(SPARSE_SPACE).unwrap();
    let problem = TuningProblem::from_source(&source);
    assert_eq!(problem.space.size(), 2000);
    let constraint = &problem.space.constraints()[0];

    for algorithm in [SearchAlgorithm::Random, SearchAlgorithm::RandomLocal] {
        for seed in 0..4 {
            let synthetic = Arc::new(Synthetic { failing: |_| false });
            let config = TuningConfig::new().algorithm(algorithm).budget(50).max_attempts(200).seed(seed);
            let outcome = AutoTuner::new(&problem, config, synthetic.clone(), synthetic).tune().unwrap();
            assert!(outcome.history.len() <= 50);
            assert!(outcome.best().is_success());
            for trial in outcome.history.trials() {
                let bindings = trial.config.to_bindings();
                let env = |name: &str| bindings.get(name).cloned();
                assert!(evaluate_bool(&constraint.expr, &env).unwrap(), "{}", trial.config);
            }
        }
    }
}

#[test]
fn test_odd_build_failures_keep_best_success() {
    let source = parse(SPARSE_SPACE).unwrap();
    let problem = TuningProblem::from_source(&source);
    let synthetic = Arc::new(Synthetic { failing: |trial| trial % 2 == 1 });
    let config = TuningConfig::new().algorithm(SearchAlgorithm::Random).budget(10).seed(3);
    let outcome = AutoTuner::new(&problem, config, synthetic.clone(), synthetic).tune().unwrap();

    let trials = outcome.history.trials();
    assert_eq!(trials.len(), 10);
    assert_eq!(outcome.report.failed, 5);
    for trial in trials {
        match &trial.outcome {
            Outcome::Failed { stage, reason } => {
                assert_eq!(trial.index % 2, 1);
                assert_eq!(*stage, FailureStage::Build);
                assert!(reason.contains("synthetic failure"));
            }
            Outcome::Success { .. } => assert_eq!(trial.index % 2, 0),
        }
    }
    let best = trials.iter().filter_map(|t| t.cost()).fold(f64::INFINITY, f64::min);
    assert_eq!(outcome.best().cost(), Some(best));
    assert!(outcome.history.to_csv().lines().count() == 11);
}

const AXPY: &str = r#"
void axpy(int n, double a, double *y, double *x) {
/*@ begin PerfTuning (
  def performance_params {
    param U[] = [1,4];
    param PAR[] = [False,True];
  }
  def input_params { param N[] = [100]; }
  def input_vars {
    decl static double y[N] = 0;
    decl static double x[N] = random;
    decl double a = 1.5;
  }
) @*/
int i;
int nn = N;
/*@ begin Loop (
  transform Composite(unrolljam=(['i'],[U]), openmp=(PAR,'omp parallel for'))
  for (i=0; i<=nn-1; i++)
    y[i] = y[i] + a*x[i];
) @*/
for (i=0; i<=nn-1; i++) y[i] = y[i] + a*x[i];
/*@ end @*/
/*@ end @*/
}
"#;

#[test]
fn test_parse_transform_splice() {
    let source = parse(AXPY).unwrap();
    let mut bindings = std::collections::BTreeMap::new();
    bindings.insert("U".to_string(), Value::Int(4));
    bindings.insert("PAR".to_string(), Value::Bool(true));
    let config = source.tuning.space.validate(&bindings).unwrap();
    let code = looptune::generate_code(&source, &config).unwrap();

    assert!(code.contains("#pragma omp parallel for"));
    assert!(code.contains("int nn = N;"));
    assert!(code.contains("y[(i+3)]") || code.contains("y[i+3]"));
    assert!(code.trim_end().ends_with('}'));
}

#[test]
fn test_interpreted_axpy_validates() {
    let source = parse(AXPY).unwrap();
    let problem = TuningProblem::from_source(&source);
    let backend = InterpretedBackend::from_inputs(&problem.inputs, &problem.host, &problem.originals(), 9)
        .unwrap()
        .with_reference(&problem.originals(), 1e-12)
        .unwrap();
    let backend = Arc::new(backend);
    let config = TuningConfig::new().algorithm(SearchAlgorithm::Exhaustive).repetitions(2).jobs(2);
    let outcome = AutoTuner::new(&problem, config, backend.clone(), backend).tune().unwrap();
    assert_eq!(outcome.history.len(), 4);
    assert_eq!(outcome.history.failures(), 0);
}

#[test]
fn test_cli_batch_continues_past_failures() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("axpy.c");
    let bad = dir.path().join("broken.c");
    std::fs::write(&good, AXPY).unwrap();
    std::fs::write(&bad, "/*@ begin Loop ( for (i=0; i<=9; i++) a[i] = 0; ) @*/\n").unwrap();
    let out = dir.path().join("out");

    let status = std::process::Command::new(env!("CARGO_BIN_EXE_looptune"))
        .arg("--emit=code")
        .arg("--config=U=4,PAR=False")
        .arg("-q")
        .arg("-o")
        .arg(&out)
        .arg(&bad)
        .arg(&good)
        .status()
        .unwrap();
    assert!(!status.success());
    let generated = std::fs::read_to_string(out.join("axpy.c")).unwrap();
    assert!(generated.contains("int nn = N;"));
    assert!(!out.join("broken.c").exists());
}
