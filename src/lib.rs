//! # phewas-engine: Experiment Orchestration for Phenome-Wide Association Studies
//!
//! Tests the association between genetic variants (or variant sets) and many
//! phenotypes over one cohort, and keeps every run reproducible: the frozen
//! variant catalog, the variable statistics, the related-phenotype
//! exclusions, every result row and the run metadata are persisted in one
//! run directory.
//!
//! ## Pipeline
//!
//! ```text
//! PhenotypeSource ─┐
//!                  ├─ sample order ─▶ VariableCatalog ─▶ Task 0..n ─▶ WorkQueue ─▶ ResultStore
//! GenotypeDatabase ┴─ freeze ───────▶ FrozenGenotypes ─┘
//! ```
//!
//! The crate ships no regression code. Model fits come from a
//! [`stats::RegressionProvider`] (or a [`stats::SetTestProvider`]) supplied
//! by the caller, one instance per worker.
//!
//! ## Example
//!
//! ```rust,no_run
//! use phewas_engine::experiment::{Experiment, ExperimentConfig};
//! use phewas_engine::genotype::{GenotypeDatabase, PlinkReader};
//! use phewas_engine::phenotype::{PhenotypeTable, Variable};
//! use phewas_engine::stats::{regression_factory, Family, ModelFit, RegressionProvider};
//! use phewas_engine::tasks::{LogisticTest, Task, TaskConfig};
//! use nalgebra::DMatrix;
//!
//! struct Glm;
//!
//! impl RegressionProvider for Glm {
//!     fn fit(&mut self, y: &[f64], x: &DMatrix<f64>, family: Family) -> anyhow::Result<ModelFit> {
//!         // call into the statistics backend of your choice
//! #       anyhow::bail!("no backend")
//!     }
//! }
//!
//! # fn main() -> phewas_engine::Result<()> {
//! let phenotypes = PhenotypeTable::from_delimited("phenotypes.csv", "sample", &["NA"])?;
//! let mut genotypes = GenotypeDatabase::new(Box::new(PlinkReader::open("cohort")?));
//! genotypes.filter_by_maf(0.01)?;
//!
//! let variables = vec![
//!     Variable::discrete("asthma"),
//!     Variable::continuous("age").covariate(),
//! ];
//! let tasks: Vec<Box<dyn Task>> = vec![Box::new(LogisticTest::new(
//!     TaskConfig::default(),
//!     regression_factory(|| Glm),
//! )?)];
//!
//! let config = ExperimentConfig::new("asthma_run").with_n_workers(4);
//! let mut experiment = Experiment::new(config, Box::new(phenotypes), genotypes, variables, tasks)?;
//! experiment.run_tasks()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;
pub mod experiment;
pub mod genotype;
pub mod logging;
pub mod phenotype;
pub mod queue;
pub mod sample_order;
pub mod stats;
pub mod storage;
pub mod tasks;
pub mod topk;

pub use error::{Error, ErrorKind, Result};
