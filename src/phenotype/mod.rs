//! Phenotype sources and the variable catalog
//!
//! A [`PhenotypeSource`] is a sample-by-variable table. The experiment
//! reorders it onto the genotype sample order, then builds a
//! [`VariableCatalog`] from it and, when requested, nulls controls that are
//! cases for a correlated phenotype.

mod exclusion;
mod table;
mod transform;
mod variables;

pub use exclusion::{
    summarize_exclusions, ExclusionSummary, RelatedPhenotypesExclusion, EXCLUSIONS_TABLE,
};
pub use table::PhenotypeTable;
pub use transform::{average_ranks, inverse_normal_transformation, Transformation, INT_OFFSET};
pub use variables::{
    CorrelationMatrix, Variable, VariableCatalog, VariableKind, VariableType, VARIABLES_TABLE,
};

use crate::stats::pearson;
use crate::Result;
use nalgebra::DMatrix;
use tracing::warn;

/// Sample-by-variable data provider
pub trait PhenotypeSource: Send + Sync {
    /// Column names
    fn phenotypes(&self) -> Vec<String>;

    /// Current sample order
    fn sample_order(&self) -> &[String];

    /// True once [`Self::set_sample_order`] succeeded
    fn is_sample_order_set(&self) -> bool;

    /// Reindex rows onto `sequence`
    ///
    /// # Errors
    /// Fails on extra samples, and on missing samples unless `allow_subset`
    fn set_sample_order(&mut self, sequence: &[String], allow_subset: bool) -> Result<()>;

    /// Untransformed values of a column
    ///
    /// # Errors
    /// Returns a lookup error naming unknown phenotypes
    fn raw_vector(&self, name: &str) -> Result<Vec<f64>>;

    /// Set the values at the given row positions to missing
    ///
    /// # Errors
    /// Returns a lookup error naming unknown phenotypes
    fn set_missing(&mut self, name: &str, rows: &[usize]) -> Result<()>;

    /// Record the correlation threshold for related-phenotype exclusion
    ///
    /// The exclusion itself runs once the variable catalog is known.
    ///
    /// # Errors
    /// Returns a configuration error for thresholds outside `[0, 1]`
    fn exclude_correlated(&mut self, threshold: f64) -> Result<()>;

    /// Threshold recorded by [`Self::exclude_correlated`]
    fn correlation_threshold(&self) -> Option<f64>;

    /// Vector for a variable with its transformation applied
    ///
    /// # Errors
    /// Returns a lookup error naming unknown phenotypes
    fn phenotype_vector(&self, variable: &Variable, warn: bool) -> Result<Vec<f64>> {
        if warn && !self.is_sample_order_set() {
            warn!(
                phenotype = %variable.name,
                "The order of samples for the phenotype database has not been set. \
                 Make sure that it is consistent with the genetic database."
            );
        }
        let raw = self.raw_vector(&variable.name)?;
        Ok(match variable.transformation() {
            Some(t) => t.apply(&raw),
            None => raw,
        })
    }

    /// Pairwise-complete Pearson correlation of the named columns
    ///
    /// # Errors
    /// Returns a lookup error naming unknown phenotypes
    fn correlation_matrix(&self, names: &[String]) -> Result<DMatrix<f64>> {
        let vectors = names
            .iter()
            .map(|n| self.raw_vector(n))
            .collect::<Result<Vec<_>>>()?;
        let n = vectors.len();
        let mut m = DMatrix::<f64>::identity(n, n);
        for i in 0..n {
            for j in (i + 1)..n {
                let r = pearson(&vectors[i], &vectors[j]);
                m[(i, j)] = r;
                m[(j, i)] = r;
            }
        }
        Ok(m)
    }
}
