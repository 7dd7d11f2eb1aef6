//! Run metadata - written once, after every task completed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the serialized metadata in the run directory
pub const EXPERIMENT_INFO_FILE: &str = "experiment_info.json";

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Experiment constructed, tasks not finished
    Running,
    /// Every task finished and the metadata was written
    Completed,
}

/// Metadata of one experiment run, read by the reporting layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentInfo {
    name: String,
    engine_url: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    build: String,
    status: RunStatus,
    walltime: Option<String>,
    n_workers: usize,
    outcomes: Vec<String>,
    tasks: Vec<String>,
    phen_correlation: Option<String>,
    phenotype_correlation_for_exclusion: Option<f64>,
    configuration: Option<PathBuf>,
}

impl ExperimentInfo {
    /// Metadata of a run starting now
    #[must_use]
    pub fn new(name: impl Into<String>, engine_url: impl Into<String>, build: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine_url: engine_url.into(),
            start_time: Utc::now(),
            end_time: None,
            build: build.into(),
            status: RunStatus::Running,
            walltime: None,
            n_workers: 1,
            outcomes: Vec::new(),
            tasks: Vec::new(),
            phen_correlation: None,
            phenotype_correlation_for_exclusion: None,
            configuration: None,
        }
    }

    /// Load the metadata of a finished run
    ///
    /// # Errors
    /// Returns error if the file is missing or malformed
    pub fn load<P: AsRef<Path>>(run_dir: P) -> crate::Result<Self> {
        crate::storage::read_json(run_dir.as_ref().join(EXPERIMENT_INFO_FILE))
    }

    /// Experiment name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage engine handle
    #[must_use]
    pub fn engine_url(&self) -> &str {
        &self.engine_url
    }

    /// Start of the run
    #[must_use]
    pub const fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// End of the run, once completed
    #[must_use]
    pub const fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Genome build
    #[must_use]
    pub fn build(&self) -> &str {
        &self.build
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Total run time as `HH:MM:SS`, once completed
    #[must_use]
    pub fn walltime(&self) -> Option<&str> {
        self.walltime.as_deref()
    }

    /// Worker count used for every task
    #[must_use]
    pub const fn n_workers(&self) -> usize {
        self.n_workers
    }

    /// Tested outcomes
    #[must_use]
    pub fn outcomes(&self) -> &[String] {
        &self.outcomes
    }

    /// Task names in execution order
    #[must_use]
    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    /// File name of the phenotype correlation matrix
    #[must_use]
    pub fn phen_correlation(&self) -> Option<&str> {
        self.phen_correlation.as_deref()
    }

    /// Threshold of the related-phenotype exclusion, if requested
    #[must_use]
    pub const fn phenotype_correlation_for_exclusion(&self) -> Option<f64> {
        self.phenotype_correlation_for_exclusion
    }

    /// Configuration artifact the run was built from
    #[must_use]
    pub fn configuration(&self) -> Option<&Path> {
        self.configuration.as_deref()
    }

    pub(crate) fn set_n_workers(&mut self, n: usize) {
        self.n_workers = n;
    }

    pub(crate) fn set_outcomes(&mut self, outcomes: Vec<String>) {
        self.outcomes = outcomes;
    }

    pub(crate) fn add_task(&mut self, task_name: impl Into<String>) {
        self.tasks.push(task_name.into());
    }

    pub(crate) fn set_phen_correlation(&mut self, file_name: impl Into<String>) {
        self.phen_correlation = Some(file_name.into());
    }

    pub(crate) fn set_exclusion_threshold(&mut self, threshold: f64) {
        self.phenotype_correlation_for_exclusion = Some(threshold);
    }

    pub(crate) fn set_configuration(&mut self, path: PathBuf) {
        self.configuration = Some(path);
    }

    /// Running → Completed, computing the walltime
    pub fn complete(&mut self) {
        let end = Utc::now();
        let seconds = (end - self.start_time).num_seconds();
        self.walltime = Some(format_time_delta(seconds));
        self.end_time = Some(end);
        self.status = RunStatus::Completed;
    }
}

/// Format a duration in seconds as `HH:MM:SS`
///
/// Hours are not wrapped at 24; negative durations are clamped to zero.
///
/// ```
/// use phewas_engine::experiment::format_time_delta;
///
/// assert_eq!(format_time_delta(3725), "01:02:05");
/// assert_eq!(format_time_delta(90_000), "25:00:00");
/// ```
#[must_use]
pub fn format_time_delta(seconds: i64) -> String {
    let s = seconds.max(0);
    format!("{:02}:{:02}:{:02}", s / 3600, (s % 3600) / 60, s % 60)
}
