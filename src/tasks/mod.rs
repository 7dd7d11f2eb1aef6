//! Statistical tasks
//!
//! A task turns a scope (outcomes × covariates × variants) into work-queue
//! jobs and the job outputs into result rows. Every task goes through the
//! same lifecycle, tracked by [`TaskCore`]:
//!
//! ```text
//! Configured ──run_task──▶ Scoped ──▶ Running ──done──▶ Done
//! ```
//!
//! Scope resolution happens once: resolving an already scoped task keeps
//! the lists computed the first time.

mod design;
mod linear;
mod logistic;
mod regression;
mod skat;

pub use design::{
    combine_mask, complete_rows, missing_mask, null_design, set_design, standardize_design,
    variant_design, Design, GENETIC_COLUMN, INTERCEPT_COLUMN,
};
pub use linear::{LinearTest, NULL_MODEL_META_KEY};
pub use logistic::LogisticTest;
pub use regression::{regression_runner_factory, FitSummary, RegressionJob, RegressionOutcome};
pub use skat::{parse_set_file, SetTest, VariantSets};

use crate::experiment::ExperimentContext;
use crate::phenotype::{VariableCatalog, VariableType};
use crate::stats::{Correction, CorrectionSummary};
use crate::{Error, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File written in the task work directory by [`Task::done`]
pub const TASK_META_FILE: &str = "task_info.json";

/// Default nominal significance level
pub const DEFAULT_ALPHA: f64 = 0.05;

const fn default_alpha() -> f64 {
    DEFAULT_ALPHA
}

/// `"all"` or an explicit list of names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ScopeRepr", into = "ScopeRepr")]
pub enum Scope {
    /// Everything eligible in the catalog
    #[default]
    All,
    /// Explicit names, in this order
    Names(Vec<String>),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ScopeRepr {
    Keyword(String),
    Names(Vec<String>),
}

impl TryFrom<ScopeRepr> for Scope {
    type Error = Error;

    fn try_from(repr: ScopeRepr) -> Result<Self> {
        match repr {
            ScopeRepr::Keyword(k) if k == "all" => Ok(Self::All),
            ScopeRepr::Keyword(k) => Err(Error::Configuration(format!(
                "Invalid scope '{k}' (expected \"all\" or a list of names)"
            ))),
            ScopeRepr::Names(names) => Ok(Self::Names(names)),
        }
    }
}

impl From<Scope> for ScopeRepr {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::All => Self::Keyword("all".to_string()),
            Scope::Names(names) => Self::Names(names),
        }
    }
}

/// Scope and multiple-testing settings shared by every task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Tested phenotypes
    #[serde(default)]
    pub outcomes: Scope,
    /// Adjustment variables
    #[serde(default)]
    pub covariates: Scope,
    /// Tested variants (only `"all"` is supported)
    #[serde(default)]
    pub variants: Scope,
    /// Multiple-testing correction reported at the end of the task
    #[serde(default)]
    pub correction: Option<Correction>,
    /// Nominal significance level
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            outcomes: Scope::All,
            covariates: Scope::All,
            variants: Scope::All,
            correction: None,
            alpha: DEFAULT_ALPHA,
        }
    }
}

impl TaskConfig {
    /// Fail fast on unsupported settings
    ///
    /// # Errors
    /// Returns [`Error::NotImplemented`] for an explicit variant list and a
    /// configuration error for `alpha` outside `(0, 1)`
    pub fn validate(&self) -> Result<()> {
        if self.variants != Scope::All {
            return Err(Error::NotImplemented(
                "task-level variant subsetting; use \"all\" and filter the genotype source instead"
                    .to_string(),
            ));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(Error::Configuration(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        Ok(())
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Built from its configuration
    Configured,
    /// Scope resolved against the variable catalog
    Scoped,
    /// Jobs being pushed and drained
    Running,
    /// Metadata written
    Done,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configured => "configured",
            Self::Scoped => "scoped",
            Self::Running => "running",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// State shared by every task implementation
#[derive(Debug, Clone)]
pub struct TaskCore {
    config: TaskConfig,
    state: TaskState,
    task_name: Option<String>,
    work_dir: Option<PathBuf>,
    outcomes: Vec<String>,
    covariates: Vec<String>,
    meta: Map<String, Value>,
    meta_path: Option<PathBuf>,
}

impl TaskCore {
    /// Validate the configuration and start in [`TaskState::Configured`]
    ///
    /// # Errors
    /// See [`TaskConfig::validate`]
    pub fn new(config: TaskConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: TaskState::Configured,
            task_name: None,
            work_dir: None,
            outcomes: Vec::new(),
            covariates: Vec::new(),
            meta: Map::new(),
            meta_path: None,
        })
    }

    /// Task configuration
    #[must_use]
    pub const fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> TaskState {
        self.state
    }

    /// Name given by the experiment (set when scoped)
    #[must_use]
    pub fn task_name(&self) -> Option<&str> {
        self.task_name.as_deref()
    }

    /// Work directory given by the experiment (set when scoped)
    #[must_use]
    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    /// Resolved outcomes
    #[must_use]
    pub fn outcomes(&self) -> &[String] {
        &self.outcomes
    }

    /// Resolved covariates
    #[must_use]
    pub fn covariates(&self) -> &[String] {
        &self.covariates
    }

    /// Run metadata collected so far
    #[must_use]
    pub const fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    /// Store a metadata entry
    pub fn set_meta(&mut self, key: impl Into<String>, value: Value) {
        self.meta.insert(key.into(), value);
    }

    /// Read a metadata entry
    #[must_use]
    pub fn get_meta(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    /// Location of the serialized metadata once done
    #[must_use]
    pub fn meta_path(&self) -> Option<&Path> {
        self.meta_path.as_deref()
    }

    fn invalid(&self, action: &'static str) -> Error {
        Error::InvalidTaskState {
            task: self.task_name.clone().unwrap_or_else(|| "<unnamed>".to_string()),
            action,
            state: self.state.to_string(),
        }
    }

    /// Configured → Scoped
    ///
    /// Outcomes keep only variables of `outcome_type` (when given); a
    /// variable listed as covariate is never an outcome. Calling this on an
    /// already scoped task is a no-op.
    ///
    /// # Errors
    /// Lookup errors for unknown names, [`Error::InvalidTaskState`] once
    /// running or done
    pub fn resolve_scope(
        &mut self,
        catalog: &VariableCatalog,
        outcome_type: Option<VariableType>,
        task_name: &str,
        work_dir: &Path,
    ) -> Result<()> {
        match self.state {
            TaskState::Configured => {}
            TaskState::Scoped => return Ok(()),
            TaskState::Running | TaskState::Done => return Err(self.invalid("resolve its scope")),
        }

        let covariates: Vec<String> = match &self.config.covariates {
            Scope::All => catalog.covariates().map(|v| v.name.clone()).collect(),
            Scope::Names(names) => {
                for n in names {
                    catalog.get(n)?;
                }
                names.clone()
            }
        };

        let candidates: Vec<String> = match &self.config.outcomes {
            Scope::All => catalog.outcome_names(),
            Scope::Names(names) => names.clone(),
        };
        let mut outcomes = Vec::with_capacity(candidates.len());
        for name in candidates {
            let variable = catalog.get(&name)?;
            if covariates.contains(&name) {
                warn!(task = task_name, variable = %name, "covariate listed as outcome, ignoring it");
                continue;
            }
            if outcome_type.is_some_and(|t| t != variable.variable_type()) {
                if matches!(self.config.outcomes, Scope::Names(_)) {
                    warn!(
                        task = task_name,
                        variable = %name,
                        "outcome does not have the type analysed by this task, ignoring it"
                    );
                }
                continue;
            }
            outcomes.push(name);
        }

        self.set_meta("outcomes", Value::from(outcomes.clone()));
        self.set_meta("covariates", Value::from(covariates.clone()));
        self.set_meta("variants", Value::from("all"));
        self.set_meta("alpha", Value::from(self.config.alpha));
        self.outcomes = outcomes;
        self.covariates = covariates;
        self.task_name = Some(task_name.to_string());
        self.work_dir = Some(work_dir.to_path_buf());
        self.state = TaskState::Scoped;
        info!(
            task = task_name,
            outcomes = self.outcomes.len(),
            covariates = self.covariates.len(),
            "task scope resolved"
        );
        Ok(())
    }

    /// Scoped → Running
    ///
    /// # Errors
    /// [`Error::InvalidTaskState`] from any other state
    pub fn start(&mut self) -> Result<()> {
        if self.state != TaskState::Scoped {
            return Err(self.invalid("start running"));
        }
        self.state = TaskState::Running;
        Ok(())
    }

    /// Record the number of tests and the corrected threshold
    ///
    /// `entities` builds the correlation matrix of the tested entities and
    /// is only called for the effective-number correction.
    ///
    /// # Errors
    /// Propagates failures from `entities` or the outcome correlation
    pub fn record_correction(
        &mut self,
        ctx: &ExperimentContext,
        n_tests: usize,
        entities: impl FnOnce(&ExperimentContext) -> Result<DMatrix<f64>>,
    ) -> Result<Option<CorrectionSummary>> {
        self.set_meta("n_tests", Value::from(n_tests));
        let summary = match self.config.correction {
            None => None,
            Some(Correction::Bonferroni) => Some(CorrectionSummary::bonferroni(self.config.alpha, n_tests)),
            Some(Correction::EffectiveTests) => {
                let entity_corr = entities(ctx)?;
                let outcome_corr = ctx.phenotypes().correlation_matrix(&self.outcomes)?;
                Some(CorrectionSummary::effective(
                    self.config.alpha,
                    n_tests,
                    &entity_corr,
                    &outcome_corr,
                ))
            }
        };
        if let Some(s) = &summary {
            self.set_meta("multiple_testing", serde_json::to_value(s)?);
        }
        Ok(summary)
    }

    /// Running → Done, writing the metadata to the work directory
    ///
    /// # Errors
    /// [`Error::InvalidTaskState`] unless running, IO errors while writing
    pub fn done(&mut self) -> Result<PathBuf> {
        if self.state != TaskState::Running {
            return Err(self.invalid("finish"));
        }
        let dir = self.work_dir.clone().ok_or_else(|| self.invalid("finish"))?;
        let path = dir.join(TASK_META_FILE);
        crate::storage::write_json(&path, &self.meta)?;
        self.meta_path = Some(path.clone());
        self.state = TaskState::Done;
        info!(task = self.task_name.as_deref().unwrap_or(""), "task done");
        Ok(path)
    }
}

/// A statistical test run by the experiment
pub trait Task {
    /// Short type name used in the task directory (`task{i}_{type}`)
    fn task_type(&self) -> &'static str;

    /// Shared lifecycle state
    fn core(&self) -> &TaskCore;

    /// Shared lifecycle state
    fn core_mut(&mut self) -> &mut TaskCore;

    /// Resolve the scope, push every job and store the results
    ///
    /// # Errors
    /// Configuration, lookup and state errors; per-job fit failures become
    /// null rows instead
    fn run_task(&mut self, ctx: &mut ExperimentContext, task_name: &str, work_dir: &Path) -> Result<()>;

    /// Serialize the run metadata into the work directory
    ///
    /// # Errors
    /// See [`TaskCore::done`]
    fn done(&mut self) -> Result<PathBuf> {
        self.core_mut().done()
    }

    /// Task configuration
    fn config(&self) -> &TaskConfig {
        self.core().config()
    }

    /// Store a metadata entry
    fn set_meta(&mut self, key: &str, value: Value) {
        self.core_mut().set_meta(key, value);
    }

    /// Read a metadata entry
    fn get_meta(&self, key: &str) -> Option<&Value> {
        self.core().get_meta(key)
    }

    /// Metadata file written by [`Task::done`]
    fn task_meta_path(&self) -> Option<&Path> {
        self.core().meta_path()
    }
}
