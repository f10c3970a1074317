//! Trial history and the append-only trial log.

use crate::space::Configuration;
use serde::Serialize;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Stage at which a trial failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// The transformation engine rejected the configuration
    Transform,
    /// The build collaborator failed
    Build,
    /// The measurement collaborator failed
    Measure,
    /// Build and measurement exceeded the trial timeout
    Timeout,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureStage::Transform => "transform",
            FailureStage::Build => "build",
            FailureStage::Measure => "measure",
            FailureStage::Timeout => "timeout",
        };
        write!(f, "{}", s)
    }
}

/// Result of evaluating one configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    /// Measured cost, lower is better
    Success {
        /// Cost in seconds
        cost: f64,
    },
    /// The trial failed; its cost counts as infinite
    Failed {
        /// Failing stage
        stage: FailureStage,
        /// Error message
        reason: String,
    },
}

/// One evaluated configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trial {
    /// Position in proposal order, from 1
    pub index: usize,
    /// Evaluated configuration
    pub config: Configuration,
    /// Cost or failure
    pub outcome: Outcome,
}

impl Trial {
    /// Cost of a successful trial.
    pub fn cost(&self) -> Option<f64> {
        match self.outcome {
            Outcome::Success { cost } => Some(cost),
            Outcome::Failed { .. } => None,
        }
    }

    /// Check whether the trial succeeded.
    pub fn is_success(&self) -> bool {
        self.cost().is_some()
    }
}

/// Append-only record of every trial and the current champion.
#[derive(Debug, Clone, Default)]
pub struct TrialHistory {
    trials: Vec<Trial>,
    best: Option<usize>,
}

impl TrialHistory {
    /// Create empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a trial; returns `true` if it became the champion.
    ///
    /// The champion has the lowest finite cost; ties go to the lower
    /// trial index, whatever order results arrive in.
    pub fn record(&mut self, trial: Trial) -> bool {
        let improved = match (trial.cost().filter(|c| c.is_finite()), self.best()) {
            (Some(cost), Some(best)) => match best.cost() {
                Some(b) => cost < b || (cost == b && trial.index < best.index),
                None => true,
            },
            (Some(_), None) => true,
            (None, _) => false,
        };
        self.trials.push(trial);
        if improved {
            self.best = Some(self.trials.len() - 1);
        }
        improved
    }

    /// The champion.
    pub fn best(&self) -> Option<&Trial> {
        self.best.map(|i| &self.trials[i])
    }

    /// Trials in recording order.
    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    /// Number of trials recorded.
    pub fn len(&self) -> usize {
        self.trials.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// Number of failed trials.
    pub fn failures(&self) -> usize {
        self.trials.iter().filter(|t| !t.is_success()).count()
    }

    /// Successful trials, cheapest first; ties keep recording order.
    pub fn sorted(&self) -> Vec<&Trial> {
        let mut ok: Vec<&Trial> = self.trials.iter().filter(|t| t.is_success()).collect();
        ok.sort_by(|a, b| a.cost().partial_cmp(&b.cost()).unwrap_or(std::cmp::Ordering::Equal));
        ok
    }

    /// Export the history in CSV format.
    pub fn to_csv(&self) -> String {
        let names: Vec<&String> = self.trials.first().map(|t| t.config.iter().map(|(k, _)| k).collect()).unwrap_or_default();
        let mut csv = String::from("trial,status,cost");
        for n in &names {
            csv.push(',');
            csv.push_str(n);
        }
        csv.push_str(",stage,reason\n");
        for t in &self.trials {
            let (status, cost, stage, reason) = match &t.outcome {
                Outcome::Success { cost } => ("ok", format!("{:.9}", cost), String::new(), String::new()),
                Outcome::Failed { stage, reason } => ("failed", String::new(), stage.to_string(), csv_quote(reason)),
            };
            csv.push_str(&format!("{},{},{}", t.index, status, cost));
            for n in &names {
                csv.push(',');
                csv.push_str(&t.config.get(n).map(|v| csv_quote(&v.to_string())).unwrap_or_default());
            }
            csv.push_str(&format!(",{},{}\n", stage, reason));
        }
        csv
    }
}

fn csv_quote(s: &str) -> String {
    if s.contains(|c| matches!(c, ',' | '"' | '\n')) {
        format!("\"{}\"", s.replace('"', "\"\"").replace('\n', " "))
    } else {
        s.to_string()
    }
}

/// One log line for a trial: `trial=3 status=ok cost=0.012300000 T=16 U=2`.
pub fn format_trial(trial: &Trial) -> String {
    let mut line = format!("trial={}", trial.index);
    match &trial.outcome {
        Outcome::Success { cost } => line.push_str(&format!(" status=ok cost={:.9}", cost)),
        Outcome::Failed { stage, .. } => line.push_str(&format!(" status=failed stage={}", stage)),
    }
    if !trial.config.is_empty() {
        line.push(' ');
        line.push_str(&trial.config.to_string());
    }
    if let Outcome::Failed { reason, .. } = &trial.outcome {
        line.push_str(&format!(" reason={:?}", reason));
    }
    line
}

/// Append-only key=value log of a search run.
pub struct TrialLog {
    out: Option<BufWriter<File>>,
}

impl TrialLog {
    /// Log appending to `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { out: Some(BufWriter::new(file)) })
    }

    /// Log that writes nothing.
    pub fn disabled() -> Self {
        Self { out: None }
    }

    /// Append one trial and flush.
    pub fn record(&mut self, trial: &Trial) -> io::Result<()> {
        if let Some(out) = &mut self.out {
            writeln!(out, "{}", format_trial(trial))?;
            out.flush()?;
        }
        Ok(())
    }

    /// Append the final `best` line.
    pub fn finish(&mut self, best: Option<&Trial>) -> io::Result<()> {
        if let Some(out) = &mut self.out {
            match best {
                Some(t) => writeln!(out, "best trial={} cost={:.9} {}", t.index, t.cost().unwrap_or(f64::INFINITY), t.config)?,
                None => writeln!(out, "best none")?,
            }
            out.flush()?;
        }
        Ok(())
    }
}
