//! Build and measurement backends.
//!
//! A trial hands its realized regions to a [`Builder`], which produces a
//! [`Binary`], and then to a [`Measurer`], which reports a cost. The
//! command backends compile a standalone C or CUDA program and parse the
//! `Time:` line it prints; [`InterpretedBackend`] runs the nests on the
//! reference interpreter and can validate outputs.

use crate::codegen::{generate, GeneratedCode, Harness, SymbolTable, Target};
use crate::exec::{Interpreter, Workspace};
use crate::frontend::{BuildSettings, HostBinding, InputSpec};
use crate::ir::nest::LoopNest;
use crate::space::Configuration;
use crate::utils::errors::{BuildError, ExecError, MeasureError};
use log::debug;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;

/// Realized code of one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Trial index
    pub trial: usize,
    /// Configuration the regions were realized with
    pub config: Configuration,
    /// Realized regions in file order
    pub regions: Vec<LoopNest>,
}

/// Output of a build.
#[derive(Debug, Clone, PartialEq)]
pub enum Binary {
    /// Compiled program on disk
    Executable(PathBuf),
    /// Nests for the interpreter
    Nests(Vec<LoopNest>),
}

/// Turns a candidate into something measurable.
pub trait Builder: Send + Sync {
    /// Build a candidate.
    fn build(&self, candidate: &Candidate) -> Result<Binary, BuildError>;
}

/// Measures the cost of a binary; lower is better.
pub trait Measurer: Send + Sync {
    /// Cost of `binary` over `repetitions` runs.
    fn measure(&self, binary: &Binary, repetitions: u32) -> Result<f64, MeasureError>;
}

/// Median of a non-empty sample.
pub fn median(times: &mut [f64]) -> f64 {
    times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    times[times.len() / 2]
}

/// Extract the value of the first `Time:` line.
///
/// Only finite, non-negative times count.
pub fn parse_time(output: &str) -> Option<f64> {
    for line in output.lines() {
        if line.contains("Time:") {
            if let Some(time_str) = line.split(':').nth(1) {
                if let Ok(time) = time_str.trim().trim_end_matches('s').parse::<f64>() {
                    return (time.is_finite() && time >= 0.0).then_some(time);
                }
            }
        }
    }
    None
}

/// Replace `@NAME` placeholders with configuration values.
pub fn substitute_flags(command: &str, config: &Configuration) -> String {
    let mut names: Vec<(&String, String)> = config.iter().map(|(k, v)| (k, v.to_string())).collect();
    // longest first so @T1 does not eat the prefix of @T12
    names.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    let mut out = command.to_string();
    for (name, value) in names {
        out = out.replace(&format!("@{}", name), &value);
    }
    out
}

/// Detect an available C compiler.
fn detect_compiler() -> String {
    for compiler in ["gcc", "clang", "cc"] {
        if let Ok(output) = Command::new(compiler).arg("--version").output() {
            if output.status.success() {
                return compiler.to_string();
            }
        }
    }
    "cc".to_string()
}

/// Writes the timing program for a candidate and runs the build command.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    command: Option<String>,
    libs: String,
    inputs: InputSpec,
    host: Vec<HostBinding>,
    work_dir: PathBuf,
    repetitions: u32,
    seed: u64,
}

impl CommandBuilder {
    /// Builder using the annotation's build settings.
    pub fn new(build: &BuildSettings, inputs: &InputSpec, host: &[HostBinding], work_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: build.command.clone(),
            libs: build.libs.clone().unwrap_or_else(|| "-lm".to_string()),
            inputs: inputs.clone(),
            host: host.to_vec(),
            work_dir: work_dir.into(),
            repetitions: 5,
            seed: 0,
        }
    }

    /// Timed repetitions inside the generated program.
    pub fn repetitions(mut self, n: u32) -> Self {
        self.repetitions = n.max(1);
        self
    }

    /// Seed of the generated program's input fill.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The full program for a candidate.
    pub fn program(&self, candidate: &Candidate) -> Result<(String, Target), BuildError> {
        let symbols = SymbolTable::from_inputs(&self.inputs, &self.host);
        let mut target = Target::C;
        let mut codes: Vec<GeneratedCode> = Vec::with_capacity(candidate.regions.len());
        for nest in &candidate.regions {
            let t = Target::for_nest(nest);
            if t == Target::Cuda || (t == Target::OpenMP && target == Target::C) {
                target = t;
            }
            codes.push(generate(nest, t, &symbols).map_err(|e| BuildError::Codegen(e.to_string()))?);
        }
        let pairs: Vec<(&LoopNest, &GeneratedCode)> = candidate.regions.iter().zip(&codes).collect();
        let program = Harness::new(&self.inputs, &self.host)
            .repetitions(self.repetitions)
            .seed(self.seed)
            .wrap(&pairs)
            .map_err(|e| BuildError::Codegen(e.to_string()))?;
        Ok((program, target))
    }

    fn command_for(&self, target: Target) -> String {
        match (&self.command, target) {
            (Some(cmd), _) => cmd.clone(),
            (None, Target::Cuda) => "nvcc -O3".to_string(),
            (None, Target::OpenMP) => format!("{} -O3 -fopenmp", detect_compiler()),
            (None, Target::C) => format!("{} -O3", detect_compiler()),
        }
    }
}

impl Builder for CommandBuilder {
    fn build(&self, candidate: &Candidate) -> Result<Binary, BuildError> {
        let (program, target) = self.program(candidate)?;
        let io = |e: std::io::Error| BuildError::Io(e.to_string());
        fs::create_dir_all(&self.work_dir).map_err(io)?;
        let ext = if target == Target::Cuda { "cu" } else { "c" };
        let src = self.work_dir.join(format!("trial_{}.{}", candidate.trial, ext));
        let exe = self.work_dir.join(format!("trial_{}", candidate.trial));
        fs::write(&src, program).map_err(io)?;

        let command = substitute_flags(&self.command_for(target), &candidate.config);
        let line = format!("{} -o {} {} {}", command, exe.display(), src.display(), self.libs);
        debug!("trial {}: {}", candidate.trial, line);
        let output = Command::new("sh").arg("-c").arg(&line).output().map_err(io)?;
        if !output.status.success() {
            return Err(BuildError::Compiler {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(Binary::Executable(exe))
    }
}

/// Runs executables and parses their `Time:` line.
#[derive(Debug, Clone, Default)]
pub struct CommandMeasurer;

impl Measurer for CommandMeasurer {
    fn measure(&self, binary: &Binary, repetitions: u32) -> Result<f64, MeasureError> {
        let path = match binary {
            Binary::Executable(path) => path,
            Binary::Nests(_) => return Err(MeasureError::Unsupported("interpreter nests".to_string())),
        };
        let mut times = Vec::with_capacity(repetitions as usize);
        for _ in 0..repetitions.max(1) {
            let output = Command::new(path)
                .output()
                .map_err(|e| MeasureError::Execution(format!("{}: {}", path.display(), e)))?;
            if !output.status.success() {
                return Err(MeasureError::Execution(format!(
                    "{} exited with {}: {}",
                    path.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            times.push(parse_time(&stdout).ok_or(MeasureError::NoTiming)?);
        }
        Ok(median(&mut times))
    }
}

/// Builds and measures on the reference interpreter.
///
/// Inputs are materialized once and shared; each repetition runs on a
/// private copy.
#[derive(Debug, Clone)]
pub struct InterpretedBackend {
    workspace: Arc<Workspace>,
    interpreter: Interpreter,
    reference: Option<Arc<Workspace>>,
    tolerance: f64,
}

impl InterpretedBackend {
    /// Backend over a prepared workspace.
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace: Arc::new(workspace), interpreter: Interpreter::new(), reference: None, tolerance: 1e-9 }
    }

    /// Workspace holding the declared inputs, the host bindings and a
    /// zero for every scalar the regions assign.
    pub fn from_inputs(
        inputs: &InputSpec,
        host: &[HostBinding],
        regions: &[LoopNest],
        seed: u64,
    ) -> Result<Self, ExecError> {
        let mut ws = Workspace::from_inputs(inputs, seed)?;
        let interpreter = Interpreter::new();
        for b in host {
            let value = interpreter.eval(&b.value, &ws)?;
            ws.set(&b.name, value);
        }
        for nest in regions {
            for name in nest.assigned_scalars() {
                if ws.get(&name).is_none() {
                    ws.set_float(&name, 0.0);
                }
            }
        }
        Ok(Self::new(ws))
    }

    /// Stop runaway executions after `limit` statements.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.interpreter = Interpreter::new().with_step_limit(limit);
        self
    }

    /// Validate every measurement against the untransformed regions.
    pub fn with_reference(mut self, original: &[LoopNest], tolerance: f64) -> Result<Self, ExecError> {
        let ws = self.run_all(original)?;
        self.reference = Some(Arc::new(ws));
        self.tolerance = tolerance;
        Ok(self)
    }

    /// Shared input workspace.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    fn run_all(&self, nests: &[LoopNest]) -> Result<Workspace, ExecError> {
        let mut ws = (*self.workspace).clone();
        for nest in nests {
            ws = self.interpreter.run(nest, ws)?;
        }
        Ok(ws)
    }
}

impl Builder for InterpretedBackend {
    fn build(&self, candidate: &Candidate) -> Result<Binary, BuildError> {
        Ok(Binary::Nests(candidate.regions.clone()))
    }
}

impl Measurer for InterpretedBackend {
    fn measure(&self, binary: &Binary, repetitions: u32) -> Result<f64, MeasureError> {
        let nests = match binary {
            Binary::Nests(nests) => nests,
            Binary::Executable(path) => return Err(MeasureError::Unsupported(path.display().to_string())),
        };
        let mut times = Vec::with_capacity(repetitions as usize);
        for rep in 0..repetitions.max(1) {
            let start = Instant::now();
            let ws = self.run_all(nests).map_err(|e| MeasureError::Execution(e.to_string()))?;
            times.push(start.elapsed().as_secs_f64());
            if rep == 0 {
                if let Some(reference) = &self.reference {
                    reference.compare_arrays(&ws, self.tolerance).map_err(MeasureError::Validation)?;
                }
            }
        }
        Ok(median(&mut times))
    }
}
