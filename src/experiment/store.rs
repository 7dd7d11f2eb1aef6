//! Result store - append-only storage for result rows
//!
//! The experiment process is the single writer. Rows are staged by
//! [`ResultStore::add`] and become visible to queries after
//! [`ResultStore::commit`], which appends them as one batch and rewrites the
//! Parquet file when the store is bound to a run directory.

use super::result_record::{ExperimentResult, ResultHeader, ResultPayload};
use crate::storage::{like_match, StorageEngine, Table};
use crate::topk::{SortOrder, TopKSelection};
use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use tracing::debug;

/// Table name of the results in the run directory
pub const RESULTS_TABLE: &str = "results";

/// Append-only result rows with uniqueness on (task, entity, phenotype)
#[derive(Debug)]
pub struct ResultStore {
    engine: Option<StorageEngine>,
    table: Table,
    pending: Vec<ExperimentResult>,
    keys: FxHashSet<(String, String, String)>,
    next_pk: u64,
}

impl ResultStore {
    /// Store that never touches the filesystem
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            engine: None,
            table: Table::new(ExperimentResult::schema()),
            pending: Vec::new(),
            keys: FxHashSet::default(),
            next_pk: 1,
        }
    }

    /// Empty store persisting into a run directory
    #[must_use]
    pub fn new(engine: StorageEngine) -> Self {
        Self {
            engine: Some(engine),
            ..Self::in_memory()
        }
    }

    /// Reopen the results of a finished run (read side)
    ///
    /// A run without any committed row yields an empty store.
    ///
    /// # Errors
    /// Returns error if the results file exists but cannot be decoded
    pub fn open(engine: StorageEngine) -> Result<Self> {
        if !engine.has_table(RESULTS_TABLE) {
            return Ok(Self::new(engine));
        }
        let rows = ExperimentResult::from_table(&engine.read_table(RESULTS_TABLE)?)?;
        let mut table = Table::new(ExperimentResult::schema());
        table.append_batch(ExperimentResult::to_batch(&rows)?)?;
        let keys = rows.iter().map(|r| key(&r.header)).collect();
        let next_pk = rows.iter().map(|r| r.pk).max().unwrap_or(0) + 1;
        Ok(Self {
            engine: Some(engine),
            table,
            pending: Vec::new(),
            keys,
            next_pk,
        })
    }

    /// Stage one row, returning its primary key
    ///
    /// # Errors
    /// Returns [`Error::DuplicateResult`] if the triple was already written
    pub fn add(&mut self, header: ResultHeader, payload: ResultPayload) -> Result<u64> {
        if !self.keys.insert(key(&header)) {
            return Err(Error::DuplicateResult {
                task: header.task_name,
                entity: header.entity_name,
                phenotype: header.phenotype,
            });
        }
        let pk = self.next_pk;
        self.next_pk += 1;
        self.pending.push(ExperimentResult { pk, header, payload });
        Ok(pk)
    }

    /// Make staged rows durable, returning how many were committed
    ///
    /// # Errors
    /// Returns error if the batch cannot be built or written
    pub fn commit(&mut self) -> Result<usize> {
        let n = self.pending.len();
        if n > 0 {
            let batch = ExperimentResult::to_batch(&self.pending)?;
            self.table.append_batch(batch)?;
            self.pending.clear();
        }
        if let Some(engine) = &self.engine {
            engine.write_table(RESULTS_TABLE, &self.table)?;
        }
        debug!(rows = n, total = self.table.num_rows(), "results committed");
        Ok(n)
    }

    /// Committed rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.num_rows()
    }

    /// True when nothing was committed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Rows staged since the last commit
    #[must_use]
    pub fn pending(&self) -> &[ExperimentResult] {
        &self.pending
    }

    /// Committed rows as Arrow data
    #[must_use]
    pub const fn table(&self) -> &Table {
        &self.table
    }

    /// Every committed row in insertion order
    ///
    /// # Errors
    /// Returns error if a batch cannot be decoded
    pub fn results(&self) -> Result<Vec<ExperimentResult>> {
        ExperimentResult::from_table(&self.table)
    }

    /// Rows whose task name matches a `LIKE` pattern
    ///
    /// With `max_significance`, only rows with `significance <= max` are
    /// kept (null significance never matches).
    ///
    /// # Errors
    /// Returns error if a batch cannot be decoded
    pub fn query(&self, task_pattern: &str, max_significance: Option<f64>) -> Result<Vec<ExperimentResult>> {
        Ok(self
            .results()?
            .into_iter()
            .filter(|r| like_match(task_pattern, &r.header.task_name))
            .filter(|r| match max_significance {
                None => true,
                Some(max) => r.header.significance.is_some_and(|p| p <= max),
            })
            .collect())
    }

    /// Distinct task names, sorted
    ///
    /// # Errors
    /// Returns error if a batch cannot be decoded
    pub fn task_names(&self) -> Result<Vec<String>> {
        let names: BTreeSet<String> = self
            .results()?
            .into_iter()
            .map(|r| r.header.task_name)
            .collect();
        Ok(names.into_iter().collect())
    }

    /// The `k` rows with the smallest p-values
    ///
    /// # Errors
    /// Returns error if `k` is zero or nothing was committed
    pub fn top_hits(&self, k: usize) -> Result<RecordBatch> {
        let batch = self.table.concat()?;
        let index = batch.schema().index_of("significance")?;
        batch.top_k(index, k, SortOrder::Ascending)
    }
}

fn key(header: &ResultHeader) -> (String, String, String) {
    (
        header.task_name.clone(),
        header.entity_name.clone(),
        header.phenotype.clone(),
    )
}
