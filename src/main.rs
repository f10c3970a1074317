//! Looptune Command Line Interface
//!
//! Usage:
//!   looptune [OPTIONS] <FILES>...
//!   looptune --help
//!
//! Examples:
//!   looptune --emit=spec mm.c                   # Show the tuning problem
//!   looptune --emit=code --config=T=32,U=2 mm.c # Code for one configuration
//!   looptune --budget=50 --jobs=4 mm.c          # Tune on the interpreter
//!   looptune --backend=command --log=mm.log mm.c

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, error, info, warn};
use looptune::autotuning::{
    AutoTuner, Builder, CommandBuilder, CommandMeasurer, InterpretedBackend, Measurer, SearchAlgorithm,
    TuningConfig, TuningProblem,
};
use looptune::codegen::c::render_stmts;
use looptune::frontend::{self, AnnotatedSource, LoopRegion};
use looptune::ir::Stmt;
use looptune::space::{Configuration, Value};
use looptune::utils::SourceMap;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Looptune - annotation-driven loop transformation and autotuning
#[derive(Parser, Debug)]
#[command(name = "looptune")]
#[command(author = "Looptune Contributors")]
#[command(version)]
#[command(about = "Tunes annotated loop nests for speed", long_about = None)]
struct Cli {
    /// Annotated source files
    #[arg(value_name = "FILES", required = true)]
    inputs: Vec<PathBuf>,

    /// Output file (defaults to stdout; with several inputs, a directory)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// What to emit
    #[arg(long, default_value = "tune")]
    emit: EmitKind,

    /// Parameter values for --emit=code (NAME=VALUE, comma-separated)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    config: Vec<String>,

    /// Search algorithm (overrides the annotation)
    #[arg(long)]
    algorithm: Option<String>,

    /// Maximum number of trials (overrides the annotation)
    #[arg(long)]
    budget: Option<usize>,

    /// Seed for proposals and random inputs
    #[arg(long)]
    seed: Option<u64>,

    /// Concurrent trials
    #[arg(short, long, default_value = "1")]
    jobs: usize,

    /// Per-trial timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<f64>,

    /// Sampling attempts before the space counts as exhausted
    #[arg(long)]
    max_attempts: Option<usize>,

    /// How trials are built and measured
    #[arg(long, default_value = "interp")]
    backend: BackendKind,

    /// Compare every trial's outputs against the untransformed code
    #[arg(long)]
    validate: bool,

    /// Append per-trial log lines to this file
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Write a JSON report of the search to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Work directory for generated programs (command backend)
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitKind {
    /// Parameter space and search settings
    Spec,
    /// Parsed loop nests with their transform statements
    Nest,
    /// Generated code for the --config configuration
    Code,
    /// Generated code for the best configuration found by a search
    Tune,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendKind {
    /// Time the loop nests on the built-in interpreter
    Interp,
    /// Compile and run the generated program with the build command
    Command,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("Looptune v{}", looptune::VERSION);

    let mut failed = 0;
    for input in &cli.inputs {
        if let Err(e) = process_file(&cli, input) {
            error!("{}: {:#}", input.display(), e);
            eprintln!("error: {}: {:#}", input.display(), e);
            failed += 1;
        }
    }
    if cli.inputs.len() > 1 {
        info!("{} of {} file(s) processed", cli.inputs.len() - failed, cli.inputs.len());
    }
    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn process_file(cli: &Cli, input: &Path) -> Result<()> {
    debug!("Input file: {:?}", input);
    let text = fs::read_to_string(input).with_context(|| format!("Failed to read input file: {:?}", input))?;
    let source = frontend::parse(&text).map_err(|e| {
        let rendered = e.to_diagnostic().render(&input.display().to_string(), &SourceMap::new(&text));
        anyhow!(rendered.trim_end().to_string())
    })?;

    let output = match cli.emit {
        EmitKind::Spec => source.describe(),
        EmitKind::Nest => source.regions.iter().map(describe_region).collect(),
        EmitKind::Code => {
            let config = config_from_cli(&source, &cli.config)?;
            info!("configuration: {}", config);
            looptune::generate_code(&source, &config)?
        }
        EmitKind::Tune => tune(cli, input, &source)?,
    };
    write_output(cli, input, &output)
}

fn describe_region(region: &LoopRegion) -> String {
    let mut out = format!("// region {} (line {})\n", region.index, region.span.start_line);
    region.nest.walk(&mut |stmt: &Stmt| {
        if let Stmt::Transform(t) = stmt {
            let directives: Vec<String> = t.directives.iter().map(|d| d.to_string()).collect();
            out.push_str(&format!("// transform {} (line {}): {}\n", t.name, t.span.start_line, directives.join(" ")));
        }
    });
    out.push_str(&render_stmts(&region.nest.without_transforms().stmts));
    out
}

fn tune(cli: &Cli, input: &Path, source: &AnnotatedSource) -> Result<String> {
    let problem = TuningProblem::from_source(source);
    let config = tuning_config(cli, source)?;
    let (builder, measurer): (Arc<dyn Builder>, Arc<dyn Measurer>) = match cli.backend {
        BackendKind::Interp => {
            let mut backend = InterpretedBackend::from_inputs(&problem.inputs, &problem.host, &problem.originals(), config.seed)
                .context("Failed to prepare input data")?;
            if config.validate {
                backend = backend
                    .with_reference(&problem.originals(), config.tolerance)
                    .context("The untransformed code does not run")?;
            }
            let backend = Arc::new(backend);
            let builder: Arc<dyn Builder> = backend.clone();
            let measurer: Arc<dyn Measurer> = backend;
            (builder, measurer)
        }
        BackendKind::Command => {
            if config.validate {
                warn!("--validate is only supported by the interpreter backend");
            }
            let work_dir = match &config.work_dir {
                Some(dir) => dir.clone(),
                None => std::env::temp_dir().join(format!("looptune-{}", std::process::id())),
            };
            fs::create_dir_all(&work_dir).with_context(|| format!("Failed to create {:?}", work_dir))?;
            let builder = CommandBuilder::new(&problem.build, &problem.inputs, &problem.host, work_dir)
                .repetitions(config.repetitions)
                .seed(config.seed);
            let builder: Arc<dyn Builder> = Arc::new(builder);
            let measurer: Arc<dyn Measurer> = Arc::new(CommandMeasurer);
            (builder, measurer)
        }
    };

    info!("tuning {}", input.display());
    let outcome = AutoTuner::new(&problem, config, builder, measurer).tune()?;
    let best = outcome.best();
    eprintln!(
        "{}: best {} after {} trial(s) ({} failed)",
        input.display(),
        best.config,
        outcome.report.trials,
        outcome.report.failed
    );

    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&outcome.report)?;
        fs::write(path, json).with_context(|| format!("Failed to write report: {:?}", path))?;
    }
    Ok(looptune::generate_code(source, &best.config)?)
}

fn trial_timeout(secs: f64) -> Result<Duration> {
    let timeout = Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("invalid --timeout {}: {}", secs, e))?;
    if timeout.is_zero() {
        bail!("--timeout must be positive");
    }
    Ok(timeout)
}

fn tuning_config(cli: &Cli, source: &AnnotatedSource) -> Result<TuningConfig> {
    let mut config = TuningConfig::new().with_annotation(&source.tuning.search, &source.tuning.counter)?;
    if let Some(name) = &cli.algorithm {
        let algorithm = SearchAlgorithm::from_name(name).ok_or_else(|| anyhow!("unknown search algorithm '{}'", name))?;
        config = config.algorithm(algorithm);
    }
    if let Some(budget) = cli.budget {
        config = config.budget(budget);
    }
    if let Some(seed) = cli.seed {
        config = config.seed(seed);
    }
    if let Some(secs) = cli.timeout {
        config = config.trial_timeout(trial_timeout(secs)?);
    }
    if let Some(attempts) = cli.max_attempts {
        config = config.max_attempts(attempts);
    }
    if let Some(path) = &cli.log {
        config = config.log_path(path);
    }
    if let Some(dir) = &cli.work_dir {
        config = config.work_dir(dir);
    }
    config = config.jobs(cli.jobs).validate(cli.validate);
    debug!("Tuning config: {:?}", config);
    Ok(config)
}

/// Parse `NAME=VALUE` pairs and complete them into a configuration.
///
/// Parameters left out take the first value of their domain.
fn config_from_cli(source: &AnnotatedSource, pairs: &[String]) -> Result<Configuration> {
    let space = &source.tuning.space;
    let mut bindings = BTreeMap::new();
    for pair in pairs {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("expected NAME=VALUE, found '{}'", pair))?;
        let name = name.trim();
        if space.param(name).is_none() {
            bail!("unknown parameter '{}'", name);
        }
        bindings.insert(name.to_string(), Value::parse_literal(value));
    }
    for p in space.params() {
        if !bindings.contains_key(&p.name) {
            let first = p.domain.first().ok_or_else(|| anyhow!("parameter '{}' has an empty domain", p.name))?;
            bindings.insert(p.name.clone(), first.clone());
        }
    }
    Ok(space.validate(&bindings)?)
}

fn write_output(cli: &Cli, input: &Path, content: &str) -> Result<()> {
    match &cli.output {
        Some(p) if cli.inputs.len() > 1 => {
            fs::create_dir_all(p).with_context(|| format!("Failed to create output directory: {:?}", p))?;
            let name = input.file_name().ok_or_else(|| anyhow!("input path has no file name"))?;
            let target = p.join(name);
            fs::write(&target, content).with_context(|| format!("Failed to write output file: {:?}", target))?;
        }
        Some(p) => {
            fs::write(p, content).with_context(|| format!("Failed to write output file: {:?}", p))?;
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_timeout() {
        assert_eq!(trial_timeout(2.5).unwrap(), Duration::from_millis(2500));
        for secs in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e300] {
            assert!(trial_timeout(secs).is_err(), "{} accepted", secs);
        }
    }
}
