//! Auto-tuning configuration

use super::search::SearchAlgorithm;
use crate::frontend::{CounterSettings, SearchSettings};
use crate::utils::errors::TuningError;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the auto-tuner
#[derive(Clone, Debug, PartialEq)]
pub struct TuningConfig {
    /// Search algorithm
    pub algorithm: SearchAlgorithm,

    /// Maximum number of trials
    pub budget: usize,

    /// Wall-clock limit for the whole run
    pub time_limit: Option<Duration>,

    /// Random seed for reproducibility
    pub seed: u64,

    /// Trials evaluated concurrently
    pub jobs: usize,

    /// Limit on one trial's build and measurement
    pub trial_timeout: Option<Duration>,

    /// Rejection-sampling attempts per proposal
    pub max_attempts: usize,

    /// Timed repetitions per trial
    pub repetitions: u32,

    /// Chance that local search restarts from a fresh sample
    pub restart_probability: f64,

    /// Compare outputs against the untransformed nest
    pub validate: bool,

    /// Relative tolerance of output validation
    pub tolerance: f64,

    /// Trial log file
    pub log_path: Option<PathBuf>,

    /// Directory for generated sources and binaries
    pub work_dir: Option<PathBuf>,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            algorithm: SearchAlgorithm::RandomLocal,
            budget: 100,
            time_limit: None,
            seed: 42,
            jobs: 1,
            trial_timeout: None,
            max_attempts: 1000,
            repetitions: 3,
            restart_probability: 0.2,
            validate: false,
            tolerance: 1e-9,
            log_path: None,
            work_dir: None,
        }
    }
}

impl TuningConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set search algorithm
    pub fn algorithm(mut self, algorithm: SearchAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the trial budget
    pub fn budget(mut self, trials: usize) -> Self {
        self.budget = trials;
        self
    }

    /// Set the wall-clock limit
    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// Set the seed
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the number of concurrent trials
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Set the per-trial timeout
    pub fn trial_timeout(mut self, timeout: Duration) -> Self {
        self.trial_timeout = Some(timeout);
        self
    }

    /// Set rejection-sampling attempts per proposal
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set repetitions per trial
    pub fn repetitions(mut self, n: u32) -> Self {
        self.repetitions = n.max(1);
        self
    }

    /// Enable/disable output validation
    pub fn validate(mut self, v: bool) -> Self {
        self.validate = v;
        self
    }

    /// Write the trial log to `path`
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Place generated files in `dir`
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Apply the annotation's search and counter sections.
    pub fn with_annotation(mut self, search: &SearchSettings, counter: &CounterSettings) -> Result<Self, TuningError> {
        if let Some(alg) = search.algorithm {
            self.algorithm = alg;
        }
        if let Some(runs) = search.total_runs {
            self.budget = runs;
        }
        if let Some(minutes) = search.time_limit.filter(|m| *m > 0.0) {
            let limit = Duration::try_from_secs_f64(minutes * 60.0)
                .map_err(|e| TuningError::InvalidProblem(format!("time_limit {} minutes: {}", minutes, e)))?;
            self.time_limit = Some(limit);
        }
        if let Some(seed) = search.seed {
            self.seed = seed;
        }
        self.repetitions = counter.repetitions.max(1);
        Ok(self)
    }

    /// Quick tuning preset (fast but less thorough)
    pub fn quick() -> Self {
        Self { budget: 20, max_attempts: 200, repetitions: 1, ..Default::default() }
    }

    /// Thorough tuning preset (slow but comprehensive)
    pub fn thorough() -> Self {
        Self { budget: 500, max_attempts: 5000, repetitions: 5, restart_probability: 0.1, ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert!(TuningConfig::quick().budget < TuningConfig::default().budget);
        assert!(TuningConfig::thorough().budget > TuningConfig::default().budget);
        assert_eq!(TuningConfig::new().jobs(0).jobs, 1);
    }

    #[test]
    fn test_annotation_overrides() {
        let search = SearchSettings {
            algorithm: Some(SearchAlgorithm::Exhaustive),
            total_runs: Some(7),
            time_limit: Some(0.5),
            seed: None,
        };
        let counter = CounterSettings { method: "basic timer".into(), repetitions: 4 };
        let config = TuningConfig::quick().seed(9).with_annotation(&search, &counter).unwrap();
        assert_eq!(config.algorithm, SearchAlgorithm::Exhaustive);
        assert_eq!(config.budget, 7);
        assert_eq!(config.time_limit, Some(Duration::from_secs(30)));
        assert_eq!(config.seed, 9);
        assert_eq!(config.repetitions, 4);
    }

    #[test]
    fn test_unrepresentable_time_limit() {
        let counter = CounterSettings { method: "basic timer".into(), repetitions: 1 };
        for minutes in [1e300, f64::INFINITY] {
            let search = SearchSettings { algorithm: None, total_runs: None, time_limit: Some(minutes), seed: None };
            let err = TuningConfig::new().with_annotation(&search, &counter).unwrap_err();
            assert!(matches!(err, TuningError::InvalidProblem(_)));
        }
    }
}
