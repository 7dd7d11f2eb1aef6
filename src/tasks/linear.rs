//! Continuous-outcome association test

use super::design::null_design;
use super::regression::{
    load_vectors, run_variant_regressions, variant_correlation, variant_header, RegressionOutcome,
};
use super::{Task, TaskConfig, TaskCore};
use crate::experiment::{ExperimentContext, ResultPayload};
use crate::phenotype::VariableType;
use crate::stats::{Family, RegressionProviderFactory};
use crate::Result;
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use tracing::{info, warn};

/// Meta key holding the covariates-only adjusted R² per outcome
pub const NULL_MODEL_META_KEY: &str = "null_model_adjusted_r_squared";

/// Ordinary least squares of every continuous outcome on every variant
///
/// Besides the genetic term, rows carry the adjusted R² of the full model
/// and, when enabled, the standardized effect size.
pub struct LinearTest {
    core: TaskCore,
    providers: RegressionProviderFactory,
    standardized_beta: bool,
}

impl LinearTest {
    /// Build the task (standardized betas disabled)
    ///
    /// # Errors
    /// Fails on unsupported configuration (see [`TaskConfig::validate`])
    pub fn new(config: TaskConfig, providers: RegressionProviderFactory) -> Result<Self> {
        Ok(Self {
            core: TaskCore::new(config)?,
            providers,
            standardized_beta: false,
        })
    }

    /// Also report the coefficient of the z-scored design
    #[must_use]
    pub const fn with_standardized_beta(mut self, enabled: bool) -> Self {
        self.standardized_beta = enabled;
        self
    }

    /// Adjusted R² of the covariates-only model, once per outcome
    fn fit_null_models(&mut self, ctx: &ExperimentContext) -> Result<()> {
        let covariates = load_vectors(ctx, self.core.covariates())?;
        let mut provider = (self.providers)();
        let mut r_squared = Map::new();

        for phenotype in self.core.outcomes() {
            let variable = ctx.variables().get(phenotype)?;
            let y = ctx.phenotypes().phenotype_vector(variable, true)?;
            let design = null_design(&y, &covariates, &vec![false; y.len()]);
            let fitted = catch_unwind(AssertUnwindSafe(|| {
                provider.fit(&design.y, &design.x, Family::Gaussian)
            }));
            let value = match fitted {
                Ok(Ok(fit)) => fit.adjusted_r_squared,
                Ok(Err(e)) => {
                    warn!(phenotype = %phenotype, error = %format!("{e:#}"), "null model fit failed");
                    None
                }
                Err(_) => {
                    warn!(phenotype = %phenotype, "null model fit panicked");
                    None
                }
            };
            r_squared.insert(phenotype.clone(), value.map_or(Value::Null, Value::from));
        }

        self.core.set_meta(NULL_MODEL_META_KEY, Value::Object(r_squared));
        Ok(())
    }
}

fn linear_payload(outcome: &RegressionOutcome) -> ResultPayload {
    match &outcome.fit {
        Ok(fit) => ResultPayload::Linear {
            adjusted_r_squared: fit.adjusted_r_squared,
            std_beta: fit.standardized.map(|t| t.coefficient),
            std_beta_min: fit.standardized.map(|t| t.ci_min),
            std_beta_max: fit.standardized.map(|t| t.ci_max),
        },
        Err(_) => ResultPayload::Linear {
            adjusted_r_squared: None,
            std_beta: None,
            std_beta_min: None,
            std_beta_max: None,
        },
    }
}

impl Task for LinearTest {
    fn task_type(&self) -> &'static str {
        "linear"
    }

    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn run_task(&mut self, ctx: &mut ExperimentContext, task_name: &str, work_dir: &Path) -> Result<()> {
        self.core
            .resolve_scope(ctx.variables(), Some(VariableType::Continuous), task_name, work_dir)?;
        self.core.start()?;
        self.core
            .set_meta("standardized_beta", Value::Bool(self.standardized_beta));
        self.fit_null_models(ctx)?;

        let n_tests = run_variant_regressions(
            &self.core,
            ctx,
            task_name,
            Family::Gaussian,
            &self.providers,
            self.standardized_beta,
            &|name, outcome| (variant_header(name, outcome), linear_payload(outcome)),
        )?;

        self.core.record_correction(ctx, n_tests, variant_correlation)?;
        info!(task = task_name, tests = n_tests, "linear regressions completed");
        Ok(())
    }
}
