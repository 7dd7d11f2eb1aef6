//! Binary-outcome association test

use super::regression::{run_variant_regressions, variant_correlation, variant_header};
use super::{Task, TaskConfig, TaskCore};
use crate::experiment::{ExperimentContext, ResultPayload};
use crate::phenotype::VariableType;
use crate::stats::{Family, RegressionProviderFactory};
use crate::Result;
use std::path::Path;
use tracing::info;

/// Logistic regression of every discrete outcome on every variant
pub struct LogisticTest {
    core: TaskCore,
    providers: RegressionProviderFactory,
}

impl LogisticTest {
    /// Build the task
    ///
    /// # Errors
    /// Fails on unsupported configuration (see [`TaskConfig::validate`])
    pub fn new(config: TaskConfig, providers: RegressionProviderFactory) -> Result<Self> {
        Ok(Self {
            core: TaskCore::new(config)?,
            providers,
        })
    }
}

impl Task for LogisticTest {
    fn task_type(&self) -> &'static str {
        "logistic"
    }

    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn run_task(&mut self, ctx: &mut ExperimentContext, task_name: &str, work_dir: &Path) -> Result<()> {
        self.core
            .resolve_scope(ctx.variables(), Some(VariableType::Discrete), task_name, work_dir)?;
        self.core.start()?;

        let n_tests = run_variant_regressions(
            &self.core,
            ctx,
            task_name,
            Family::Binomial,
            &self.providers,
            false,
            &|name, outcome| (variant_header(name, outcome), ResultPayload::Logistic),
        )?;

        self.core.record_correction(ctx, n_tests, variant_correlation)?;
        info!(task = task_name, tests = n_tests, "logistic regressions completed");
        Ok(())
    }
}
