//! Related-phenotype exclusion records

use crate::storage::{column, Table};
use crate::Result;
use arrow::array::{ArrayRef, Float64Array, RecordBatch, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Table name inside the run directory
pub const EXCLUSIONS_TABLE: &str = "related_phenotypes_exclusions";

/// Controls of `phen1` nulled because they are cases of the correlated `phen2`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedPhenotypesExclusion {
    /// Phenotype whose controls were nulled
    pub phen1: String,
    /// Correlated phenotype providing the cases
    pub phen2: String,
    /// Pearson correlation between the two
    pub correlation: f64,
    /// Number of samples set to missing for `phen1`
    pub n_excluded: u64,
}

impl RelatedPhenotypesExclusion {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("phen1", DataType::Utf8, false),
            Field::new("phen2", DataType::Utf8, false),
            Field::new("correlation", DataType::Float64, false),
            Field::new("n_excluded", DataType::UInt64, false),
        ]))
    }

    /// Build a persistable table
    ///
    /// # Errors
    /// Returns error if Arrow rejects the batch
    pub fn to_table(records: &[Self]) -> Result<Table> {
        let mut table = Table::new(Self::schema());
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.phen1.as_str()))),
            Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.phen2.as_str()))),
            Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.correlation))),
            Arc::new(UInt64Array::from_iter_values(records.iter().map(|r| r.n_excluded))),
        ];
        table.append_batch(RecordBatch::try_new(table.schema(), columns)?)?;
        Ok(table)
    }

    /// Decode a persisted table
    ///
    /// # Errors
    /// Returns error if the columns do not match
    pub fn from_table(table: &Table) -> Result<Vec<Self>> {
        let mut out = Vec::with_capacity(table.num_rows());
        for batch in table.batches() {
            let phen1 = column::<StringArray>(batch, "phen1")?;
            let phen2 = column::<StringArray>(batch, "phen2")?;
            let corr = column::<Float64Array>(batch, "correlation")?;
            let n = column::<UInt64Array>(batch, "n_excluded")?;
            for i in 0..batch.num_rows() {
                out.push(Self {
                    phen1: phen1.value(i).to_string(),
                    phen2: phen2.value(i).to_string(),
                    correlation: corr.value(i),
                    n_excluded: n.value(i),
                });
            }
        }
        Ok(out)
    }
}

/// Exclusions grouped by the phenotype losing controls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionSummary {
    /// Correlated phenotypes
    pub related: Vec<String>,
    /// Total samples set to missing
    pub excluded: u64,
}

/// Group exclusion records by `phen1`
#[must_use]
pub fn summarize_exclusions(records: &[RelatedPhenotypesExclusion]) -> BTreeMap<String, ExclusionSummary> {
    let mut out: BTreeMap<String, ExclusionSummary> = BTreeMap::new();
    for r in records {
        let entry = out.entry(r.phen1.clone()).or_default();
        entry.related.push(r.phen2.clone());
        entry.excluded += r.n_excluded;
    }
    out
}
