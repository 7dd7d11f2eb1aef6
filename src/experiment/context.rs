//! Everything a task sees while it runs

use super::result_record::{ResultHeader, ResultPayload};
use super::store::ResultStore;
use crate::genotype::{FrozenGenotypes, VariantCatalog};
use crate::phenotype::{PhenotypeSource, VariableCatalog};
use crate::Result;

/// Shared, read-mostly state handed to [`crate::tasks::Task::run_task`]
///
/// Phenotype and genotype sources are aligned on the same sample order
/// before a context is built; the result store is the only mutable part.
pub struct ExperimentContext {
    phenotypes: Box<dyn PhenotypeSource>,
    genotypes: FrozenGenotypes,
    variants: VariantCatalog,
    variables: VariableCatalog,
    results: ResultStore,
    n_workers: usize,
}

impl std::fmt::Debug for ExperimentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentContext")
            .field("samples", &self.genotypes.sample_order().len())
            .field("variants", &self.genotypes.len())
            .field("variables", &self.variables.len())
            .field("results", &self.results.len())
            .field("n_workers", &self.n_workers)
            .finish_non_exhaustive()
    }
}

impl ExperimentContext {
    /// Assemble a context from already aligned parts
    ///
    /// `n_workers` is clamped to at least one.
    #[must_use]
    pub fn new(
        phenotypes: Box<dyn PhenotypeSource>,
        genotypes: FrozenGenotypes,
        variants: VariantCatalog,
        variables: VariableCatalog,
        results: ResultStore,
        n_workers: usize,
    ) -> Self {
        Self {
            phenotypes,
            genotypes,
            variants,
            variables,
            results,
            n_workers: n_workers.max(1),
        }
    }

    /// Phenotype data source
    #[must_use]
    pub fn phenotypes(&self) -> &dyn PhenotypeSource {
        self.phenotypes.as_ref()
    }

    /// Frozen genotype source
    #[must_use]
    pub const fn genotypes(&self) -> &FrozenGenotypes {
        &self.genotypes
    }

    /// Metadata of the variants in [`Self::genotypes`]
    #[must_use]
    pub const fn variant_catalog(&self) -> &VariantCatalog {
        &self.variants
    }

    /// Variables under analysis
    #[must_use]
    pub const fn variables(&self) -> &VariableCatalog {
        &self.variables
    }

    /// Result rows
    #[must_use]
    pub const fn results(&self) -> &ResultStore {
        &self.results
    }

    /// Mutable result rows
    pub fn results_mut(&mut self) -> &mut ResultStore {
        &mut self.results
    }

    /// Worker count for task queues
    #[must_use]
    pub const fn n_workers(&self) -> usize {
        self.n_workers
    }

    /// Stage one result row
    ///
    /// # Errors
    /// Returns [`crate::Error::DuplicateResult`] on a repeated
    /// (task, entity, phenotype) triple
    pub fn add_result(&mut self, header: ResultHeader, payload: ResultPayload) -> Result<u64> {
        self.results.add(header, payload)
    }

    /// Make staged rows durable
    ///
    /// # Errors
    /// Returns error if the results file cannot be written
    pub fn commit(&mut self) -> Result<usize> {
        self.results.commit()
    }

    pub(crate) fn into_parts(self) -> (VariableCatalog, ResultStore) {
        (self.variables, self.results)
    }
}
