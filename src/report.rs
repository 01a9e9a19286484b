//! Run Report - what one simulation run did and how well it recovered the truth
//!
//! ## Lifecycle
//!
//! ```text
//! Pending --start()--> Running --complete()--> Success
//!                        |
//!                        +----fail()------> Failed
//! ```
//!
//! The report is an in-memory artifact. [`SimulationReport::to_json`] renders
//! it; storing the text is up to the caller.

use crate::config::SimulationConfig;
use crate::stats::{ComponentRecovery, RankSummary};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Created but not yet started.
    Pending,
    /// Stages are executing.
    Running,
    /// All stages completed.
    Success,
    /// A stage returned an error.
    Failed,
}

/// Table sizes observed during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Comparisons enumerated
    pub comparisons: usize,
    /// Studies generated
    pub studies: usize,
    /// Participant records generated
    pub participants: usize,
    /// Studies selected for analysis
    pub sampled_studies: usize,
    /// Participant records kept after truncation
    pub sampled_participants: usize,
    /// Studies with a per-study estimate
    pub fitted_studies: usize,
    /// Studies skipped as degenerate
    pub skipped_studies: usize,
}

/// Record of one simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    run_id: String,
    config: SimulationConfig,
    status: RunStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    counts: RunCounts,
    tau2: Option<f64>,
    recovery: Vec<ComponentRecovery>,
    ranks: Vec<RankSummary>,
    error: Option<String>,
}

impl SimulationReport {
    /// Create a pending report for `config`.
    #[must_use]
    pub fn new(run_id: impl Into<String>, config: SimulationConfig) -> Self {
        Self {
            run_id: run_id.into(),
            config,
            status: RunStatus::Pending,
            started_at: None,
            ended_at: None,
            counts: RunCounts::default(),
            tau2: None,
            recovery: Vec::new(),
            ranks: Vec::new(),
            error: None,
        }
    }

    /// Mark the run as started now.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Record the results and mark the run as finished now.
    pub fn complete(
        &mut self,
        counts: RunCounts,
        tau2: f64,
        recovery: Vec<ComponentRecovery>,
        ranks: Vec<RankSummary>,
    ) {
        self.counts = counts;
        self.tau2 = Some(tau2);
        self.recovery = recovery;
        self.ranks = ranks;
        self.status = RunStatus::Success;
        self.ended_at = Some(Utc::now());
    }

    /// Record the error that stopped the run.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.status = RunStatus::Failed;
        self.ended_at = Some(Utc::now());
    }

    /// Run identifier.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Parameters of the run.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Seed of the run.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.config.seed
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Start timestamp, once started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// End timestamp, once completed.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Table sizes.
    #[must_use]
    pub const fn counts(&self) -> &RunCounts {
        &self.counts
    }

    /// Residual between-study variance of the meta-regression.
    #[must_use]
    pub const fn tau2(&self) -> Option<f64> {
        self.tau2
    }

    /// Component recovery against ground truth.
    #[must_use]
    pub fn recovery(&self) -> &[ComponentRecovery] {
        &self.recovery
    }

    /// Rank summaries of the treatment arms.
    #[must_use]
    pub fn ranks(&self) -> &[RankSummary] {
        &self.ranks
    }

    /// Error message of a failed run.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_lifecycle() {
        let mut report = SimulationReport::new("run-1", SimulationConfig::default());
        assert_eq!(report.status(), RunStatus::Pending);
        assert!(report.started_at().is_none());

        report.start();
        assert_eq!(report.status(), RunStatus::Running);

        report.complete(RunCounts::default(), 0.0, Vec::new(), Vec::new());
        assert_eq!(report.status(), RunStatus::Success);
        assert!(report.ended_at().unwrap() >= report.started_at().unwrap());
    }

    #[test]
    fn test_report_json_contains_config() {
        let report = SimulationReport::new("run-2", SimulationConfig::default());
        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["run_id"], "run-2");
        assert_eq!(value["status"], "Pending");
        assert_eq!(value["config"]["seed"], 42);
    }

    #[test]
    fn test_failed_run_keeps_message() {
        let mut report = SimulationReport::new("run-3", SimulationConfig::default());
        report.start();
        report.fail("Singular design: 3 studies for 4 component coefficients");
        assert_eq!(report.status(), RunStatus::Failed);
        assert!(report.error().unwrap().starts_with("Singular design"));
        assert!(report.tau2().is_none());
        assert_eq!(report.seed(), 42);
    }
}
