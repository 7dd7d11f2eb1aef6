//! Per-(variant, phenotype) regression jobs
//!
//! Jobs carry complete-case arrays only. The runner owns one provider per
//! worker; every provider error or panic is turned into a failed outcome so
//! nothing escapes into the worker loop.

use super::design::{standardize_design, Design, GENETIC_COLUMN};
use super::TaskCore;
use crate::experiment::{ExperimentContext, ResultHeader, ResultPayload, TestedEntity};
use crate::phenotype::Variable;
use crate::queue::{build_queue, JobRunner, RunnerFactory};
use crate::stats::{correlation_of, Family, RegressionProvider, RegressionProviderFactory, Term};
use crate::{Error, Result};
use nalgebra::DMatrix;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// One model to fit
#[derive(Debug, Clone)]
pub struct RegressionJob {
    /// Tested variant
    pub variant: String,
    /// Outcome phenotype
    pub phenotype: String,
    /// Complete-case response and design
    pub design: Design,
    /// Link family
    pub family: Family,
    /// Refit on the standardized design for a standardized beta
    pub standardized: bool,
}

/// Statistics extracted from a successful fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSummary {
    /// Genetic term
    pub term: Term,
    /// Adjusted R² of the full model (Gaussian fits)
    pub adjusted_r_squared: Option<f64>,
    /// Genetic term of the standardized refit
    pub standardized: Option<Term>,
}

/// What came back from a worker
#[derive(Debug, Clone)]
pub struct RegressionOutcome {
    /// Tested variant
    pub variant: String,
    /// Outcome phenotype
    pub phenotype: String,
    /// Number of complete cases in the fit
    pub n_rows: usize,
    /// Fit statistics or the failure reason
    pub fit: std::result::Result<FitSummary, String>,
}

fn fit_genetic_term(
    provider: &mut dyn RegressionProvider,
    y: &[f64],
    x: &DMatrix<f64>,
    family: Family,
) -> Result<(Term, Option<f64>)> {
    let fit = catch_unwind(AssertUnwindSafe(|| provider.fit(y, x, family)))
        .map_err(|_| Error::FitFailed("statistics provider panicked".to_string()))?
        .map_err(|e| Error::FitFailed(format!("{e:#}")))?;
    fit.validate(x.ncols())
        .map_err(|e| Error::FitFailed(format!("{e:#}")))?;
    let term = fit
        .term(GENETIC_COLUMN)
        .ok_or_else(|| Error::FitFailed("design has no genetic column".to_string()))?;
    Ok((term, fit.adjusted_r_squared))
}

struct RegressionRunner {
    provider: Box<dyn RegressionProvider>,
}

impl RegressionRunner {
    fn fit(&mut self, job: &RegressionJob) -> Result<FitSummary> {
        if job.design.n_rows() == 0 {
            return Err(Error::FitFailed("no complete cases".to_string()));
        }
        let (term, adjusted_r_squared) =
            fit_genetic_term(self.provider.as_mut(), &job.design.y, &job.design.x, job.family)?;
        let standardized = if job.standardized {
            let z = standardize_design(&job.design.x);
            Some(fit_genetic_term(self.provider.as_mut(), &job.design.y, &z, job.family)?.0)
        } else {
            None
        };
        Ok(FitSummary {
            term,
            adjusted_r_squared,
            standardized,
        })
    }
}

impl JobRunner<RegressionJob, RegressionOutcome> for RegressionRunner {
    fn run(&mut self, job: RegressionJob) -> RegressionOutcome {
        let fit = self.fit(&job).map_err(|e| e.to_string());
        RegressionOutcome {
            n_rows: job.design.n_rows(),
            variant: job.variant,
            phenotype: job.phenotype,
            fit,
        }
    }
}

/// Runner factory building one provider per worker
#[must_use]
pub fn regression_runner_factory(
    providers: RegressionProviderFactory,
) -> RunnerFactory<RegressionJob, RegressionOutcome> {
    Arc::new(move || -> Box<dyn JobRunner<RegressionJob, RegressionOutcome>> {
        Box::new(RegressionRunner {
            provider: providers(),
        })
    })
}

/// Maps a drained outcome to a result row
pub(super) type RowBuilder = dyn Fn(&str, &RegressionOutcome) -> (ResultHeader, ResultPayload);

/// Header for a variant-level outcome (null statistics on failure)
pub(super) fn variant_header(task_name: &str, outcome: &RegressionOutcome) -> ResultHeader {
    let header = ResultHeader::new(
        TestedEntity::Variant,
        task_name,
        &outcome.variant,
        &outcome.phenotype,
    );
    match &outcome.fit {
        Ok(fit) => header.with_term(&fit.term),
        Err(_) => header,
    }
}

/// Shared driver of the logistic and linear tasks
///
/// Outcomes are the outer loop, variants the inner one. Returns the number
/// of jobs pushed.
pub(super) fn run_variant_regressions(
    core: &TaskCore,
    ctx: &mut ExperimentContext,
    task_name: &str,
    family: Family,
    providers: &RegressionProviderFactory,
    standardized: bool,
    row: &RowBuilder,
) -> Result<usize> {
    let covariates = load_vectors(ctx, core.covariates())?;
    let mut queue = build_queue(ctx.n_workers(), regression_runner_factory(providers.clone()));

    let mut n_jobs = 0;
    for phenotype in core.outcomes() {
        let variable = ctx.variables().get(phenotype)?.clone();
        let y = ctx.phenotypes().phenotype_vector(&variable, true)?;
        let mut columns: Vec<&[f64]> = vec![&y];
        columns.extend(covariates.iter().map(Vec::as_slice));
        let base_mask = super::design::missing_mask(&columns);

        for variant in ctx.genotypes().variant_names() {
            let genotypes = ctx.genotypes().get_genotypes(variant)?;
            let design = super::design::variant_design(&y, genotypes, &covariates, &base_mask);
            queue.push_work(RegressionJob {
                variant: variant.clone(),
                phenotype: phenotype.clone(),
                design,
                family,
                standardized,
            })?;
            n_jobs += 1;
        }
        debug!(task = task_name, phenotype = %phenotype, jobs = n_jobs, "jobs pushed");
    }
    queue.done_pushing();

    let mut n_failed = 0usize;
    while let Some(outcome) = queue.get_result() {
        if let Err(reason) = &outcome.fit {
            n_failed += 1;
            warn!(
                task = task_name,
                variant = %outcome.variant,
                phenotype = %outcome.phenotype,
                n = outcome.n_rows,
                %reason,
                "fit failed, storing null result"
            );
        }
        let (header, payload) = row(task_name, &outcome);
        ctx.add_result(header, payload)?;
    }
    queue.ensure_complete(task_name)?;
    debug!(task = task_name, jobs = n_jobs, failed = n_failed, "results drained");
    Ok(n_jobs)
}

/// Analysed vectors of the named variables, in order
pub(super) fn load_vectors(ctx: &ExperimentContext, names: &[String]) -> Result<Vec<Vec<f64>>> {
    names
        .iter()
        .map(|name| {
            let variable: &Variable = ctx.variables().get(name)?;
            ctx.phenotypes().phenotype_vector(variable, true)
        })
        .collect()
}

/// Genotype correlation of every variant in the frozen source
pub(super) fn variant_correlation(ctx: &ExperimentContext) -> Result<DMatrix<f64>> {
    let columns = ctx
        .genotypes()
        .variant_names()
        .iter()
        .map(|name| ctx.genotypes().get_genotypes(name))
        .collect::<Result<Vec<&[f64]>>>()?;
    Ok(correlation_of(&columns))
}
