//! Experiment orchestration
//!
//! An [`Experiment`] owns one genotype source, one phenotype source, the
//! variable catalog, an ordered list of tasks and the result store. Building
//! it creates the run directory, reconciles sample orders, freezes the
//! genotypes and computes variable statistics; [`Experiment::run_tasks`]
//! runs every task in order and writes the run metadata last.
//!
//! ## Run directory
//!
//! ```text
//! <output_dir>/<name>/
//! ├── variants.parquet
//! ├── variables.parquet
//! ├── phenotypes.parquet
//! ├── phen_correlation_matrix.json
//! ├── results.parquet
//! ├── related_phenotypes_exclusions.parquet   (only with exclusions)
//! ├── task0_logistic/task_info.json
//! └── experiment_info.json                    (written last)
//! ```

mod context;
mod info;
mod result_record;
mod store;

pub use crate::phenotype::RelatedPhenotypesExclusion;
pub use context::ExperimentContext;
pub use info::{format_time_delta, ExperimentInfo, RunStatus, EXPERIMENT_INFO_FILE};
pub use result_record::{ExperimentResult, ResultHeader, ResultPayload, TestedEntity};
pub use store::{ResultStore, RESULTS_TABLE};

use crate::genotype::{GenotypeDatabase, VariantCatalog, VARIANTS_TABLE};
use crate::phenotype::{
    PhenotypeSource, Variable, VariableCatalog, EXCLUSIONS_TABLE, VARIABLES_TABLE,
};
use crate::storage::{StorageEngine, Table};
use crate::tasks::Task;
use crate::{Error, Result};
use arrow::array::{ArrayRef, Float64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// File name of the phenotype correlation matrix
pub const PHEN_CORRELATION_FILE: &str = "phen_correlation_matrix.json";

/// Table of analysed outcome vectors, one column per outcome
pub const PHENOTYPES_TABLE: &str = "phenotypes";

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_build() -> String {
    "GRCh37".to_string()
}

const fn default_n_workers() -> usize {
    1
}

/// Experiment-level settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Run name, also the run directory name
    pub name: String,
    /// Parent of the run directory
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Genome build of the variant positions
    #[serde(default = "default_build")]
    pub build: String,
    /// Worker count of every task queue (at least 1)
    #[serde(default = "default_n_workers")]
    pub n_workers: usize,
    /// Configuration artifact copied into the run directory
    #[serde(default)]
    pub configuration: Option<PathBuf>,
}

impl ExperimentConfig {
    /// Defaults for everything but the name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_dir: default_output_dir(),
            build: default_build(),
            n_workers: default_n_workers(),
            configuration: None,
        }
    }

    /// Set the parent of the run directory
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the worker count
    #[must_use]
    pub const fn with_n_workers(mut self, n: usize) -> Self {
        self.n_workers = n;
        self
    }

    /// Set the genome build
    #[must_use]
    pub fn with_build(mut self, build: impl Into<String>) -> Self {
        self.build = build.into();
        self
    }

    /// Set the configuration artifact
    #[must_use]
    pub fn with_configuration(mut self, path: impl Into<PathBuf>) -> Self {
        self.configuration = Some(path.into());
        self
    }

    /// Path of the run directory
    #[must_use]
    pub fn run_dir(&self) -> PathBuf {
        self.output_dir.join(&self.name)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration("Experiment name must not be empty".to_string()));
        }
        if self.name.contains(['/', '\\']) {
            return Err(Error::Configuration(format!(
                "Experiment name '{}' must not contain path separators",
                self.name
            )));
        }
        Ok(())
    }
}

/// Top-level orchestrator of one run
pub struct Experiment {
    config: ExperimentConfig,
    engine: StorageEngine,
    info: ExperimentInfo,
    context: ExperimentContext,
    tasks: Vec<Box<dyn Task>>,
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("name", &self.config.name)
            .field("root", &self.engine.root())
            .field("tasks", &self.tasks.len())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Experiment {
    /// Create the run directory and prepare every data source
    ///
    /// Steps, in order: create `<output_dir>/<name>`, reindex the phenotypes
    /// on the genotype sample order (subset allowed), freeze the genotypes
    /// into the variant catalog, compute variable statistics and the outcome
    /// correlation matrix, then apply related-phenotype exclusions when the
    /// phenotype source carries a threshold.
    ///
    /// # Errors
    /// Returns [`Error::RunDirectoryExists`] if the run directory is already
    /// there, sample reconciliation errors, and any configuration or lookup
    /// error raised while freezing or initializing variables
    pub fn new(
        mut config: ExperimentConfig,
        mut phenotypes: Box<dyn PhenotypeSource>,
        genotypes: GenotypeDatabase,
        variables: Vec<Variable>,
        tasks: Vec<Box<dyn Task>>,
    ) -> Result<Self> {
        config.validate()?;
        config.n_workers = config.n_workers.max(1);

        let engine = StorageEngine::create(config.run_dir())?;
        info!(name = %config.name, root = %engine.root().display(), "experiment created");

        phenotypes.set_sample_order(&genotypes.sample_order(), true)?;

        let mut variants = VariantCatalog::new();
        let frozen = genotypes.experiment_init(&mut variants)?;
        engine.write_table(VARIANTS_TABLE, variants.table())?;

        let mut info = ExperimentInfo::new(&config.name, engine.url(), &config.build);
        info.set_n_workers(config.n_workers);

        let mut catalog = VariableCatalog::initialize(variables, phenotypes.as_ref())?;
        let correlation = catalog.compute_correlation(phenotypes.as_ref())?;
        engine.write_json(PHEN_CORRELATION_FILE, &correlation)?;
        info.set_phen_correlation(PHEN_CORRELATION_FILE);

        if let Some(threshold) = phenotypes.correlation_threshold() {
            catalog.apply_related_exclusions(phenotypes.as_mut(), &correlation, threshold)?;
            info.set_exclusion_threshold(threshold);
        }
        info.set_outcomes(catalog.outcome_names());

        engine.write_table(VARIABLES_TABLE, &catalog.to_table()?)?;
        engine.write_table(
            PHENOTYPES_TABLE,
            &phenotype_table(phenotypes.as_ref(), &catalog)?,
        )?;

        let context = ExperimentContext::new(
            phenotypes,
            frozen,
            variants,
            catalog,
            ResultStore::new(engine.clone()),
            config.n_workers,
        );

        info!(
            variants = context.genotypes().len(),
            samples = context.genotypes().sample_order().len(),
            variables = context.variables().len(),
            tasks = tasks.len(),
            "experiment initialized"
        );

        Ok(Self {
            config,
            engine,
            info,
            context,
            tasks,
        })
    }

    /// Settings this run was built with
    #[must_use]
    pub const fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Storage handle bound to the run directory
    #[must_use]
    pub const fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    /// Run directory
    #[must_use]
    pub fn root(&self) -> &Path {
        self.engine.root()
    }

    /// Run metadata (completed once [`Self::run_tasks`] returned)
    #[must_use]
    pub const fn info(&self) -> &ExperimentInfo {
        &self.info
    }

    /// Shared task context
    #[must_use]
    pub const fn context(&self) -> &ExperimentContext {
        &self.context
    }

    /// Configured tasks in execution order
    #[must_use]
    pub fn tasks(&self) -> &[Box<dyn Task>] {
        &self.tasks
    }

    /// Stage a result row outside of any task
    ///
    /// # Errors
    /// Returns [`Error::DuplicateResult`] on a repeated triple
    pub fn add_result(&mut self, header: ResultHeader, payload: ResultPayload) -> Result<u64> {
        self.context.add_result(header, payload)
    }

    /// Run every task in order, then write the run metadata
    ///
    /// Each task gets its own `task<i>_<type>` directory and the result
    /// store is committed after each task. Task errors abort the run before
    /// any metadata is written.
    ///
    /// # Errors
    /// Returns the first task or storage error
    pub fn run_tasks(&mut self) -> Result<&ExperimentInfo> {
        if self.info.status() == RunStatus::Completed {
            return Err(Error::Configuration(format!(
                "Experiment '{}' already ran its tasks",
                self.config.name
            )));
        }

        for (i, task) in self.tasks.iter_mut().enumerate() {
            let task_name = format!("task{i}_{}", task.task_type());
            let work_dir = self.engine.root().join(&task_name);
            std::fs::create_dir_all(&work_dir)?;

            info!(task = %task_name, "task started");
            task.run_task(&mut self.context, &task_name, &work_dir)?;
            task.done()?;
            let committed = self.context.commit()?;
            self.info.add_task(&task_name);
            info!(task = %task_name, results = committed, "task completed");
        }

        if let Some(exclusions) = self.context.variables().exclusions() {
            if !exclusions.is_empty() {
                let table = RelatedPhenotypesExclusion::to_table(exclusions)?;
                self.engine.write_table(EXCLUSIONS_TABLE, &table)?;
            }
        }

        if let Some(source) = self.config.configuration.clone() {
            self.copy_configuration(&source);
        }

        self.info.complete();
        self.engine.write_json(EXPERIMENT_INFO_FILE, &self.info)?;
        info!(
            name = %self.config.name,
            walltime = self.info.walltime().unwrap_or_default(),
            results = self.context.results().len(),
            "experiment completed"
        );
        Ok(&self.info)
    }

    /// Best effort: a missing artifact only warns
    fn copy_configuration(&mut self, source: &Path) {
        let Some(file_name) = source.file_name() else {
            warn!(path = %source.display(), "configuration path has no file name, not copied");
            return;
        };
        let target = self.engine.root().join(file_name);
        match std::fs::copy(source, &target) {
            Ok(_) => self.info.set_configuration(target),
            Err(e) => warn!(
                path = %source.display(),
                error = %e,
                "could not copy the configuration file into the run directory"
            ),
        }
    }

    /// Consume the run, keeping what the reporting side reads
    #[must_use]
    pub fn into_results(self) -> (ExperimentInfo, VariableCatalog, ResultStore) {
        let (variables, results) = self.context.into_parts();
        (self.info, variables, results)
    }
}

/// Sample column plus the analysed vector of every outcome
fn phenotype_table(source: &dyn PhenotypeSource, catalog: &VariableCatalog) -> Result<Table> {
    let mut fields = vec![Field::new("sample", DataType::Utf8, false)];
    let mut columns: Vec<ArrayRef> = vec![Arc::new(StringArray::from_iter_values(
        source.sample_order().iter().map(String::as_str),
    ))];
    for variable in catalog.outcomes() {
        let values = source.phenotype_vector(variable, false)?;
        fields.push(Field::new(&variable.name, DataType::Float64, true));
        columns.push(Arc::new(
            values
                .into_iter()
                .map(|v| v.is_finite().then_some(v))
                .collect::<Float64Array>(),
        ));
    }
    let schema = Arc::new(Schema::new(fields));
    let mut table = Table::new(schema.clone());
    table.append_batch(RecordBatch::try_new(schema, columns)?)?;
    Ok(table)
}
