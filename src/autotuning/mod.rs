//! Auto-Tuning Framework
//!
//! Searches the parameter space of an annotated file for the
//! configuration with the lowest measured cost.
//!
//! The driver thread owns the RNG, the trial history and the champion.
//! Proposals are handed to up to `jobs` scoped worker threads, which
//! realize the regions, build and measure, and send outcomes back. A
//! failed trial never stops the search; only an exhausted sampler or a
//! budget without a single success is an error.
//!
//! # Example
//!
//! ```ignore
//! use looptune::autotuning::{AutoTuner, InterpretedBackend, TuningConfig, TuningProblem};
//!
//! let source = looptune::frontend::parse(&text)?;
//! let problem = TuningProblem::from_source(&source);
//! let backend = std::sync::Arc::new(InterpretedBackend::from_inputs(
//!     &problem.inputs, &problem.host, &problem.originals(), 0)?);
//! let outcome = AutoTuner::new(&problem, TuningConfig::quick(), backend.clone(), backend).tune()?;
//! println!("best: {}", outcome.best().config);
//! ```

mod config;
mod results;
mod runner;
pub mod search;

pub use config::TuningConfig;
pub use results::{format_trial, FailureStage, Outcome, Trial, TrialHistory, TrialLog};
pub use runner::{
    median, parse_time, substitute_flags, Binary, Builder, Candidate, CommandBuilder, CommandMeasurer,
    InterpretedBackend, Measurer,
};
pub use search::{SearchAlgorithm, SearchStrategy};

use crate::frontend::{AnnotatedSource, BuildSettings, HostBinding, InputSpec};
use crate::ir::nest::LoopNest;
use crate::space::{Configuration, ParameterSpace};
use crate::transform::Realizer;
use crate::utils::errors::{TransformError, TuningError};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Result type of the search driver.
pub type TuningResult<T> = Result<T, TuningError>;

/// Everything a search needs from an annotated file.
#[derive(Debug, Clone)]
pub struct TuningProblem {
    /// Parameters and constraints
    pub space: ParameterSpace,
    /// Regions with their transform statements
    pub regions: Vec<LoopNest>,
    /// Problem sizes and input variables
    pub inputs: InputSpec,
    /// `int name = value;` declarations of the host code
    pub host: Vec<HostBinding>,
    /// Build command settings
    pub build: BuildSettings,
}

impl TuningProblem {
    /// Collect the problem of a parsed file.
    pub fn from_source(source: &AnnotatedSource) -> Self {
        Self {
            space: source.tuning.space.clone(),
            regions: source.regions.iter().map(|r| r.nest.clone()).collect(),
            inputs: source.tuning.inputs.clone(),
            host: source.host_bindings.clone(),
            build: source.tuning.build.clone(),
        }
    }

    /// Regions with every transform statement dropped.
    pub fn originals(&self) -> Vec<LoopNest> {
        self.regions.iter().map(LoopNest::without_transforms).collect()
    }

    /// Realize every region for a configuration.
    ///
    /// Kernel names are numbered across regions.
    pub fn realize(&self, config: &Configuration) -> Result<Vec<LoopNest>, TransformError> {
        let mut realizer = Realizer::new(config);
        self.regions.iter().map(|nest| realizer.realize(nest)).collect()
    }
}

/// Summary of a finished search.
#[derive(Debug, Clone, Serialize)]
pub struct TuningReport {
    /// Algorithm used
    pub algorithm: SearchAlgorithm,
    /// Seed of the proposal sequence
    pub seed: u64,
    /// Trials evaluated
    pub trials: usize,
    /// Trials that failed
    pub failed: usize,
    /// Wall-clock duration in seconds
    pub elapsed_secs: f64,
    /// The champion
    pub best: Trial,
}

/// History and report of a finished search.
#[derive(Debug, Clone)]
pub struct TuningOutcome {
    /// Every trial in recording order
    pub history: TrialHistory,
    /// Summary
    pub report: TuningReport,
}

impl TuningOutcome {
    /// The champion trial.
    pub fn best(&self) -> &Trial {
        &self.report.best
    }
}

struct Job {
    index: usize,
    config: Configuration,
}

/// The search driver.
pub struct AutoTuner<'p> {
    problem: &'p TuningProblem,
    config: TuningConfig,
    builder: Arc<dyn Builder>,
    measurer: Arc<dyn Measurer>,
}

impl<'p> AutoTuner<'p> {
    /// Create a tuner for `problem` with the given collaborators.
    pub fn new(
        problem: &'p TuningProblem,
        config: TuningConfig,
        builder: Arc<dyn Builder>,
        measurer: Arc<dyn Measurer>,
    ) -> Self {
        Self { problem, config, builder, measurer }
    }

    /// Run the search.
    pub fn tune(&self) -> TuningResult<TuningOutcome> {
        let start = Instant::now();
        let deadline = self.config.time_limit.map(|limit| start + limit);
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut strategy = search::strategy(
            self.config.algorithm,
            &self.problem.space,
            self.config.max_attempts,
            self.config.restart_probability,
        );
        let mut log = match &self.config.log_path {
            Some(path) => TrialLog::create(path)?,
            None => TrialLog::disabled(),
        };
        let mut history = TrialHistory::new();
        let jobs = self.config.jobs.max(1);

        info!(
            "search: {} over {} raw configurations, budget {}, seed {}, {} job(s)",
            self.config.algorithm,
            self.problem.space.size(),
            self.config.budget,
            self.config.seed,
            jobs
        );

        thread::scope(|scope| -> TuningResult<()> {
            let (job_tx, job_rx) = mpsc::channel::<Job>();
            let (result_tx, result_rx) = mpsc::channel::<Trial>();
            let job_rx = Arc::new(Mutex::new(job_rx));
            for _ in 0..jobs {
                let job_rx = Arc::clone(&job_rx);
                let result_tx = result_tx.clone();
                scope.spawn(move || loop {
                    let next = match job_rx.lock() {
                        Ok(rx) => rx.recv(),
                        Err(_) => return,
                    };
                    let Ok(job) = next else { return };
                    let outcome = self.evaluate(job.index, &job.config);
                    let trial = Trial { index: job.index, config: job.config, outcome };
                    if result_tx.send(trial).is_err() {
                        return;
                    }
                });
            }
            drop(result_tx);

            let mut seen: HashSet<String> = HashSet::new();
            let mut proposed = 0;
            let mut in_flight = 0;
            let mut stop = false;
            loop {
                while !stop && in_flight < jobs && proposed < self.config.budget {
                    if deadline.map_or(false, |d| Instant::now() >= d) {
                        info!("time limit reached after {} trial(s)", history.len());
                        stop = true;
                        break;
                    }
                    let best = history.best().map(|t| &t.config);
                    match self.propose(strategy.as_mut(), best, &mut seen, &mut rng)? {
                        Some(config) => {
                            proposed += 1;
                            in_flight += 1;
                            debug!("trial {}: proposing {}", proposed, config);
                            if job_tx.send(Job { index: proposed, config }).is_err() {
                                stop = true;
                            }
                        }
                        None => {
                            info!("{} search has no new configuration to propose", strategy.name());
                            stop = true;
                        }
                    }
                }
                if in_flight == 0 {
                    break;
                }
                let Ok(trial) = result_rx.recv() else { break };
                in_flight -= 1;
                match &trial.outcome {
                    Outcome::Success { cost } => info!("trial {} [{}] cost {:.9}", trial.index, trial.config, cost),
                    Outcome::Failed { stage, reason } => {
                        info!("trial {} [{}] failed at {}: {}", trial.index, trial.config, stage, reason)
                    }
                }
                log.record(&trial)?;
                if history.record(trial) {
                    if let Some(best) = history.best() {
                        info!("new best: trial {} [{}]", best.index, best.config);
                    }
                }
            }
            Ok(())
        })?;

        log.finish(history.best())?;
        let best = history
            .best()
            .cloned()
            .ok_or(TuningError::NoViableConfiguration { trials: history.len() })?;
        let report = TuningReport {
            algorithm: self.config.algorithm,
            seed: self.config.seed,
            trials: history.len(),
            failed: history.failures(),
            elapsed_secs: start.elapsed().as_secs_f64(),
            best,
        };
        info!(
            "search done: {} trial(s), {} failed, best trial {} [{}]",
            report.trials, report.failed, report.best.index, report.best.config
        );
        Ok(TuningOutcome { history, report })
    }

    /// Next configuration not evaluated before.
    fn propose(
        &self,
        strategy: &mut dyn SearchStrategy,
        best: Option<&Configuration>,
        seen: &mut HashSet<String>,
        rng: &mut StdRng,
    ) -> TuningResult<Option<Configuration>> {
        for _ in 0..self.config.max_attempts {
            match strategy.next(best, rng)? {
                Some(config) => {
                    if seen.insert(config.to_string()) {
                        return Ok(Some(config));
                    }
                }
                None => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Realize, build and measure one configuration.
    fn evaluate(&self, index: usize, config: &Configuration) -> Outcome {
        let regions = match self.problem.realize(config) {
            Ok(regions) => regions,
            Err(e) => return Outcome::Failed { stage: FailureStage::Transform, reason: e.to_string() },
        };
        let candidate = Candidate { trial: index, config: config.clone(), regions };
        match self.config.trial_timeout {
            Some(limit) => self.evaluate_with_timeout(candidate, limit),
            None => build_and_measure(&*self.builder, &*self.measurer, &candidate, self.config.repetitions),
        }
    }

    /// Run the trial on its own thread; a trial still running after
    /// `limit` is abandoned.
    fn evaluate_with_timeout(&self, candidate: Candidate, limit: Duration) -> Outcome {
        let (tx, rx) = mpsc::channel();
        let builder = Arc::clone(&self.builder);
        let measurer = Arc::clone(&self.measurer);
        let repetitions = self.config.repetitions;
        let index = candidate.trial;
        thread::spawn(move || {
            let _ = tx.send(build_and_measure(&*builder, &*measurer, &candidate, repetitions));
        });
        match rx.recv_timeout(limit) {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("trial {} exceeded {:?}", index, limit);
                Outcome::Failed { stage: FailureStage::Timeout, reason: format!("exceeded {:?}", limit) }
            }
        }
    }
}

fn build_and_measure(builder: &dyn Builder, measurer: &dyn Measurer, candidate: &Candidate, repetitions: u32) -> Outcome {
    let binary = match builder.build(candidate) {
        Ok(binary) => binary,
        Err(e) => return Outcome::Failed { stage: FailureStage::Build, reason: e.to_string() },
    };
    match measurer.measure(&binary, repetitions) {
        Ok(cost) if cost.is_finite() && cost >= 0.0 => Outcome::Success { cost },
        Ok(cost) => Outcome::Failed { stage: FailureStage::Measure, reason: format!("invalid cost {}", cost) },
        Err(e) => Outcome::Failed { stage: FailureStage::Measure, reason: e.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{Parameter, ParamRole, Value};
    use crate::utils::errors::{BuildError, MeasureError};

    /// Cost is the value of `T`; builds of odd trials fail.
    struct Scripted {
        fail_odd: bool,
        delay: Option<Duration>,
    }

    impl Builder for Scripted {
        fn build(&self, candidate: &Candidate) -> Result<Binary, BuildError> {
            if let Some(d) = self.delay {
                thread::sleep(d);
            }
            if self.fail_odd && candidate.trial % 2 == 1 {
                return Err(BuildError::Other("injected".into()));
            }
            let t = candidate.config.get("T").and_then(Value::as_int).unwrap_or(0);
            Ok(Binary::Executable(format!("{}", t).into()))
        }
    }

    impl Measurer for Scripted {
        fn measure(&self, binary: &Binary, _repetitions: u32) -> Result<f64, MeasureError> {
            match binary {
                Binary::Executable(p) => p.display().to_string().parse().map_err(|_| MeasureError::NoTiming),
                Binary::Nests(_) => Err(MeasureError::NoTiming),
            }
        }
    }

    fn problem() -> TuningProblem {
        let domain = (1..=20).map(Value::Int).collect();
        TuningProblem {
            space: ParameterSpace::new(vec![Parameter::new("T", domain, ParamRole::Free)], vec![], Default::default())
                .unwrap(),
            regions: vec![],
            inputs: InputSpec::default(),
            host: vec![],
            build: BuildSettings::default(),
        }
    }

    fn tuner<'p>(problem: &'p TuningProblem, config: TuningConfig, scripted: Scripted) -> AutoTuner<'p> {
        let s = Arc::new(scripted);
        AutoTuner::new(problem, config, s.clone(), s)
    }

    #[test]
    fn test_exhaustive_finds_minimum() {
        let problem = problem();
        let config = TuningConfig::new().algorithm(SearchAlgorithm::Exhaustive);
        let outcome = tuner(&problem, config, Scripted { fail_odd: false, delay: None }).tune().unwrap();
        assert_eq!(outcome.history.len(), 20);
        assert_eq!(outcome.best().cost(), Some(1.0));
    }

    #[test]
    fn test_odd_build_failures() {
        let problem = problem();
        let config = TuningConfig::new().algorithm(SearchAlgorithm::Random).budget(10).seed(5);
        let outcome = tuner(&problem, config, Scripted { fail_odd: true, delay: None }).tune().unwrap();
        let history = &outcome.history;
        assert_eq!(history.len(), 10);
        assert_eq!(history.failures(), 5);
        let best_success = history.trials().iter().filter_map(Trial::cost).fold(f64::INFINITY, f64::min);
        assert_eq!(outcome.best().cost(), Some(best_success));
        assert_eq!(outcome.best().index % 2, 0);
    }

    #[test]
    fn test_all_failures_is_an_error() {
        let problem = problem();
        let config = TuningConfig::new().budget(1);
        let err = tuner(&problem, config, Scripted { fail_odd: true, delay: None }).tune().unwrap_err();
        assert!(matches!(err, TuningError::NoViableConfiguration { trials: 1 }));
    }

    #[test]
    fn test_parallel_runs_are_deterministic() {
        let problem = problem();
        let run = |jobs| {
            let config = TuningConfig::new().algorithm(SearchAlgorithm::Random).budget(8).seed(11).jobs(jobs);
            let outcome = tuner(&problem, config, Scripted { fail_odd: false, delay: None }).tune().unwrap();
            let mut configs: Vec<String> = outcome.history.trials().iter().map(|t| t.config.to_string()).collect();
            configs.sort();
            configs
        };
        assert_eq!(run(1), run(4));
    }

    #[test]
    fn test_timeouts_become_failed_trials() {
        let problem = problem();
        let config = TuningConfig::new().budget(2).trial_timeout(Duration::from_millis(10));
        let scripted = Scripted { fail_odd: false, delay: Some(Duration::from_millis(500)) };
        let err = tuner(&problem, config, scripted).tune().unwrap_err();
        assert!(matches!(err, TuningError::NoViableConfiguration { trials: 2 }));
    }

    #[test]
    fn test_log_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let problem = problem();
        let config = TuningConfig::new().algorithm(SearchAlgorithm::Exhaustive).budget(3).log_path(&path);
        tuner(&problem, config, Scripted { fail_odd: false, delay: None }).tune().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("trial=1 status=ok cost=1.0"));
        assert!(lines[3].starts_with("best trial=1"));
    }

    /// Every trial costs the same; trial 1 builds slowest. A cost of
    /// `nan` is reported for `T = 3`.
    struct Flat;

    impl Builder for Flat {
        fn build(&self, candidate: &Candidate) -> Result<Binary, BuildError> {
            if candidate.trial == 1 {
                thread::sleep(Duration::from_millis(200));
            }
            let t = candidate.config.get("T").and_then(Value::as_int).unwrap_or(0);
            Ok(Binary::Executable(if t == 3 { "nan".into() } else { "2.0".into() }))
        }
    }

    impl Measurer for Flat {
        fn measure(&self, binary: &Binary, _repetitions: u32) -> Result<f64, MeasureError> {
            match binary {
                Binary::Executable(p) => p.display().to_string().parse().map_err(|_| MeasureError::NoTiming),
                Binary::Nests(_) => Err(MeasureError::NoTiming),
            }
        }
    }

    #[test]
    fn test_equal_costs_keep_first_proposed() {
        let problem = problem();
        let config = TuningConfig::new().algorithm(SearchAlgorithm::Exhaustive).budget(3).jobs(3);
        let flat = Arc::new(Flat);
        let outcome = AutoTuner::new(&problem, config, flat.clone(), flat).tune().unwrap();
        // trials 1 and 2 tie; trial 1 is recorded after trial 2
        let order: Vec<usize> = outcome.history.trials().iter().map(|t| t.index).collect();
        assert_eq!(order.last(), Some(&1));
        assert_eq!(outcome.history.failures(), 1);
        assert_eq!(outcome.best().index, 1);
        assert_eq!(outcome.best().cost(), Some(2.0));
    }

    #[test]
    fn test_nan_cost_is_a_failed_measurement() {
        let problem = problem();
        let config = TuningConfig::new().algorithm(SearchAlgorithm::Exhaustive).budget(3);
        let flat = Arc::new(Flat);
        let outcome = AutoTuner::new(&problem, config, flat.clone(), flat).tune().unwrap();
        match &outcome.history.trials()[2].outcome {
            Outcome::Failed { stage, reason } => {
                assert_eq!(*stage, FailureStage::Measure);
                assert!(reason.contains("NaN"), "{}", reason);
            }
            other => panic!("expected a failed trial, got {:?}", other),
        }
        assert_eq!(outcome.best().index, 1);
    }
}
