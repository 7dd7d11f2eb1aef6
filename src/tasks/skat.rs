//! Set-based (SKAT-style) aggregate test
//!
//! Variants are grouped by an external set file. Each (set, phenotype) pair
//! is one job: the worker fits the covariates-only null model on the
//! complete cases of the pair, then hands the joint genotype matrix to the
//! set-test provider. Rows only carry significance and the test statistic;
//! an omnibus test has no single coefficient.

use super::design::{missing_mask, set_design, Design};
use super::regression::load_vectors;
use super::{Task, TaskConfig, TaskCore};
use crate::experiment::{ExperimentContext, ResultHeader, ResultPayload, TestedEntity};
use crate::queue::{build_queue, JobRunner, RunnerFactory};
use crate::stats::{Family, SetTestOutcome, SetTestProvider, SetTestProviderFactory};
use crate::{Error, Result};
use nalgebra::DMatrix;
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Variant names grouped by set, sets in name order
pub type VariantSets = BTreeMap<String, Vec<String>>;

/// Parse a whitespace-delimited set file with `variant` and `set` columns
///
/// Extra columns are ignored. Column names are matched case-insensitively.
///
/// # Errors
/// Returns [`Error::MalformedSetFile`] for a missing header column, a short
/// line or an empty file, and IO errors if the file cannot be read
pub fn parse_set_file<P: AsRef<Path>>(path: P) -> Result<VariantSets> {
    let path = path.as_ref();
    let malformed = |reason: String| Error::MalformedSetFile {
        path: path.display().to_string(),
        reason,
    };
    let content = std::fs::read_to_string(path)?;
    let mut lines = content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| malformed("file is empty".to_string()))?;
    let header: Vec<String> = header.split_whitespace().map(str::to_lowercase).collect();
    let column = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| malformed(format!("missing required column '{name}'")))
    };
    let variant_col = column("variant")?;
    let set_col = column("set")?;

    let mut sets = VariantSets::new();
    for (i, line) in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != header.len() {
            return Err(malformed(format!(
                "line {}: expected {} fields, found {}",
                i + 1,
                header.len(),
                fields.len()
            )));
        }
        sets.entry(fields[set_col].to_string())
            .or_default()
            .push(fields[variant_col].to_string());
    }
    if sets.is_empty() {
        return Err(malformed("no variant was assigned to a set".to_string()));
    }
    Ok(sets)
}

/// One (set, phenotype) test
#[derive(Debug, Clone)]
struct SetJob {
    set: String,
    phenotype: String,
    null: Design,
    genotypes: DMatrix<f64>,
    family: Family,
    is_dosage: bool,
}

/// Output of a set job
#[derive(Debug, Clone)]
struct SetJobOutcome {
    set: String,
    phenotype: String,
    n_rows: usize,
    result: std::result::Result<SetTestOutcome, String>,
}

struct SetRunner {
    provider: Box<dyn SetTestProvider>,
}

impl SetRunner {
    fn test(&mut self, job: &SetJob) -> Result<SetTestOutcome> {
        if job.null.n_rows() == 0 {
            return Err(Error::FitFailed("no complete cases".to_string()));
        }
        let provider = &mut self.provider;
        catch_unwind(AssertUnwindSafe(|| -> anyhow::Result<SetTestOutcome> {
            let null = provider.fit_null(&job.null.y, &job.null.x, job.family)?;
            provider.test(&null, &job.genotypes, job.is_dosage)
        }))
        .map_err(|_| Error::FitFailed("set-test provider panicked".to_string()))?
        .map_err(|e| Error::FitFailed(format!("{e:#}")))
    }
}

impl JobRunner<SetJob, SetJobOutcome> for SetRunner {
    fn run(&mut self, job: SetJob) -> SetJobOutcome {
        let result = self.test(&job).map_err(|e| e.to_string());
        SetJobOutcome {
            n_rows: job.null.n_rows(),
            set: job.set,
            phenotype: job.phenotype,
            result,
        }
    }
}

fn set_runner_factory(providers: SetTestProviderFactory) -> RunnerFactory<SetJob, SetJobOutcome> {
    Arc::new(move || -> Box<dyn JobRunner<SetJob, SetJobOutcome>> {
        Box::new(SetRunner {
            provider: providers(),
        })
    })
}

/// Aggregate test of variant sets against every outcome
///
/// Discrete outcomes use the binomial null model, continuous ones the
/// Gaussian one.
pub struct SetTest {
    core: TaskCore,
    set_file: PathBuf,
    sets: VariantSets,
    providers: SetTestProviderFactory,
}

impl SetTest {
    /// Build the task, parsing the set file right away
    ///
    /// # Errors
    /// Configuration errors, including [`Error::MalformedSetFile`]
    pub fn new<P: AsRef<Path>>(
        config: TaskConfig,
        set_file: P,
        providers: SetTestProviderFactory,
    ) -> Result<Self> {
        let core = TaskCore::new(config)?;
        let sets = parse_set_file(&set_file)?;
        debug!(sets = sets.len(), "set file parsed");
        Ok(Self {
            core,
            set_file: set_file.as_ref().to_path_buf(),
            sets,
            providers,
        })
    }

    /// Parsed sets
    #[must_use]
    pub const fn sets(&self) -> &VariantSets {
        &self.sets
    }

    /// Sets restricted to variants of the frozen source, empty sets dropped
    fn resolve_sets(&self, ctx: &ExperimentContext, task_name: &str) -> VariantSets {
        let mut resolved = VariantSets::new();
        for (set, variants) in &self.sets {
            let (present, absent): (Vec<String>, Vec<String>) = variants
                .iter()
                .cloned()
                .partition(|v| ctx.genotypes().contains(v));
            if !absent.is_empty() {
                warn!(
                    task = task_name,
                    set = %set,
                    missing = absent.len(),
                    "variants of the set are not in the genotype database"
                );
            }
            if present.is_empty() {
                warn!(task = task_name, set = %set, "no variant left, set skipped");
            } else {
                resolved.insert(set.clone(), present);
            }
        }
        resolved
    }
}

impl Task for SetTest {
    fn task_type(&self) -> &'static str {
        "skat"
    }

    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn run_task(&mut self, ctx: &mut ExperimentContext, task_name: &str, work_dir: &Path) -> Result<()> {
        self.core
            .resolve_scope(ctx.variables(), None, task_name, work_dir)?;
        self.core.start()?;

        let sets = self.resolve_sets(ctx, task_name);
        self.core.set_meta("set_file", Value::from(self.set_file.display().to_string()));
        self.core.set_meta("n_sets", Value::from(sets.len()));

        let covariates = load_vectors(ctx, self.core.covariates())?;
        let mut queue = build_queue(ctx.n_workers(), set_runner_factory(self.providers.clone()));
        let is_dosage = ctx.genotypes().is_dosage();

        let mut n_jobs = 0usize;
        for phenotype in self.core.outcomes() {
            let variable = ctx.variables().get(phenotype)?;
            let family = if variable.is_discrete() {
                Family::Binomial
            } else {
                Family::Gaussian
            };
            let y = ctx.phenotypes().phenotype_vector(variable, true)?;
            let mut columns: Vec<&[f64]> = vec![&y];
            columns.extend(covariates.iter().map(Vec::as_slice));
            let base_mask = missing_mask(&columns);

            for (set, variants) in &sets {
                let genotypes = variants
                    .iter()
                    .map(|v| ctx.genotypes().get_genotypes(v))
                    .collect::<Result<Vec<&[f64]>>>()?;
                let (null, genotypes) = set_design(&y, &genotypes, &covariates, &base_mask);
                queue.push_work(SetJob {
                    set: set.clone(),
                    phenotype: phenotype.clone(),
                    null,
                    genotypes,
                    family,
                    is_dosage,
                })?;
                n_jobs += 1;
            }
        }
        queue.done_pushing();

        while let Some(outcome) = queue.get_result() {
            let mut header = ResultHeader::new(TestedEntity::SnpSet, task_name, &outcome.set, &outcome.phenotype);
            match &outcome.result {
                Ok(test) => {
                    header.significance = Some(test.p_value);
                    header.test_statistic = Some(test.statistic);
                }
                Err(reason) => warn!(
                    task = task_name,
                    set = %outcome.set,
                    phenotype = %outcome.phenotype,
                    n = outcome.n_rows,
                    %reason,
                    "set test failed, storing null result"
                ),
            }
            ctx.add_result(header, ResultPayload::SetBased)?;
        }
        queue.ensure_complete(task_name)?;

        let n_sets = sets.len();
        self.core
            .record_correction(ctx, n_jobs, |_| Ok(DMatrix::identity(n_sets, n_sets)))?;
        info!(task = task_name, sets = n_sets, tests = n_jobs, "set tests completed");
        Ok(())
    }
}
