//! Result rows
//!
//! Every row shares a [`ResultHeader`]; test-specific columns live in the
//! [`ResultPayload`] variant. Persisted as one wide table whose extension
//! columns are null for payloads that do not use them.

use crate::stats::Term;
use crate::storage::{column, Table};
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float64Array, RecordBatch, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a row was computed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestedEntity {
    /// A single variant
    Variant,
    /// A group of variants
    SnpSet,
}

impl TestedEntity {
    /// Stored name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Variant => "variant",
            Self::SnpSet => "snp-set",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "variant" => Ok(Self::Variant),
            "snp-set" => Ok(Self::SnpSet),
            other => Err(Error::StorageError(format!("Unknown tested entity '{other}'"))),
        }
    }
}

/// Columns shared by every result row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultHeader {
    /// Variant or set
    pub tested_entity: TestedEntity,
    /// Name of the producing task (`task{i}_{type}`)
    pub task_name: String,
    /// Variant or set name
    pub entity_name: String,
    /// Outcome phenotype
    pub phenotype: String,
    /// p-value
    pub significance: Option<f64>,
    /// Effect size
    pub coefficient: Option<f64>,
    /// Test statistic
    pub test_statistic: Option<f64>,
    /// Standard error of the coefficient
    pub standard_error: Option<f64>,
    /// Lower 95% bound
    pub confidence_interval_min: Option<f64>,
    /// Upper 95% bound
    pub confidence_interval_max: Option<f64>,
}

impl ResultHeader {
    /// Header with every statistic missing
    pub fn new(
        tested_entity: TestedEntity,
        task_name: impl Into<String>,
        entity_name: impl Into<String>,
        phenotype: impl Into<String>,
    ) -> Self {
        Self {
            tested_entity,
            task_name: task_name.into(),
            entity_name: entity_name.into(),
            phenotype: phenotype.into(),
            significance: None,
            coefficient: None,
            test_statistic: None,
            standard_error: None,
            confidence_interval_min: None,
            confidence_interval_max: None,
        }
    }

    /// Fill the statistics from a model term
    #[must_use]
    pub fn with_term(mut self, term: &Term) -> Self {
        self.significance = Some(term.p_value);
        self.coefficient = Some(term.coefficient);
        self.test_statistic = Some(term.test_statistic);
        self.standard_error = Some(term.standard_error);
        self.confidence_interval_min = Some(term.ci_min);
        self.confidence_interval_max = Some(term.ci_max);
        self
    }

    /// True when the fit failed and nothing was recorded
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.significance.is_none() && self.coefficient.is_none() && self.test_statistic.is_none()
    }
}

/// Test-specific extension of a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "results_type")]
pub enum ResultPayload {
    /// Binary outcome regression
    #[serde(rename = "LogisticTest")]
    Logistic,
    /// Continuous outcome regression
    #[serde(rename = "LinearTest")]
    Linear {
        /// Adjusted R² of the full model
        adjusted_r_squared: Option<f64>,
        /// Coefficient of the standardized design
        std_beta: Option<f64>,
        /// Lower bound of the standardized coefficient
        std_beta_min: Option<f64>,
        /// Upper bound of the standardized coefficient
        std_beta_max: Option<f64>,
    },
    /// Set-based aggregate test
    #[serde(rename = "SKATTest")]
    SetBased,
}

impl ResultPayload {
    /// Discriminator stored in the `results_type` column
    #[must_use]
    pub const fn results_type(&self) -> &'static str {
        match self {
            Self::Logistic => "LogisticTest",
            Self::Linear { .. } => "LinearTest",
            Self::SetBased => "SKATTest",
        }
    }
}

/// A persisted result row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    /// Surrogate key, monotonic within a run
    pub pk: u64,
    /// Shared columns
    #[serde(flatten)]
    pub header: ResultHeader,
    /// Extension columns
    #[serde(flatten)]
    pub payload: ResultPayload,
}

impl ExperimentResult {
    /// Discriminator of the payload
    #[must_use]
    pub const fn results_type(&self) -> &'static str {
        self.payload.results_type()
    }

    /// Wide-table schema
    #[must_use]
    pub fn schema() -> SchemaRef {
        let float = |name: &str| Field::new(name, DataType::Float64, true);
        Arc::new(Schema::new(vec![
            Field::new("pk", DataType::UInt64, false),
            Field::new("tested_entity", DataType::Utf8, false),
            Field::new("results_type", DataType::Utf8, false),
            Field::new("task_name", DataType::Utf8, false),
            Field::new("entity_name", DataType::Utf8, false),
            Field::new("phenotype", DataType::Utf8, false),
            float("significance"),
            float("coefficient"),
            float("test_statistic"),
            float("standard_error"),
            float("confidence_interval_min"),
            float("confidence_interval_max"),
            float("adjusted_r_squared"),
            float("std_beta"),
            float("std_beta_min"),
            float("std_beta_max"),
        ]))
    }

    /// Rows as one record batch
    ///
    /// # Errors
    /// Returns error if Arrow rejects the batch
    pub fn to_batch(rows: &[Self]) -> Result<RecordBatch> {
        let text = |f: fn(&Self) -> &str| -> ArrayRef {
            Arc::new(StringArray::from_iter_values(rows.iter().map(f)))
        };
        let float = |f: fn(&Self) -> Option<f64>| -> ArrayRef {
            Arc::new(rows.iter().map(f).collect::<Float64Array>())
        };
        let linear = |pick: fn(&ResultPayload) -> Option<f64>| -> ArrayRef {
            Arc::new(rows.iter().map(|r| pick(&r.payload)).collect::<Float64Array>())
        };

        let columns: Vec<ArrayRef> = vec![
            Arc::new(UInt64Array::from_iter_values(rows.iter().map(|r| r.pk))),
            text(|r| r.header.tested_entity.as_str()),
            text(|r| r.results_type()),
            text(|r| r.header.task_name.as_str()),
            text(|r| r.header.entity_name.as_str()),
            text(|r| r.header.phenotype.as_str()),
            float(|r| r.header.significance),
            float(|r| r.header.coefficient),
            float(|r| r.header.test_statistic),
            float(|r| r.header.standard_error),
            float(|r| r.header.confidence_interval_min),
            float(|r| r.header.confidence_interval_max),
            linear(|p| match p {
                ResultPayload::Linear { adjusted_r_squared, .. } => *adjusted_r_squared,
                _ => None,
            }),
            linear(|p| match p {
                ResultPayload::Linear { std_beta, .. } => *std_beta,
                _ => None,
            }),
            linear(|p| match p {
                ResultPayload::Linear { std_beta_min, .. } => *std_beta_min,
                _ => None,
            }),
            linear(|p| match p {
                ResultPayload::Linear { std_beta_max, .. } => *std_beta_max,
                _ => None,
            }),
        ];
        Ok(RecordBatch::try_new(Self::schema(), columns)?)
    }

    /// Decode every row of a batch
    ///
    /// # Errors
    /// Returns error on a schema mismatch or an unknown discriminator
    pub fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let pk = column::<UInt64Array>(batch, "pk")?;
        let entity = column::<StringArray>(batch, "tested_entity")?;
        let kind = column::<StringArray>(batch, "results_type")?;
        let task = column::<StringArray>(batch, "task_name")?;
        let name = column::<StringArray>(batch, "entity_name")?;
        let phenotype = column::<StringArray>(batch, "phenotype")?;
        let floats = [
            "significance",
            "coefficient",
            "test_statistic",
            "standard_error",
            "confidence_interval_min",
            "confidence_interval_max",
            "adjusted_r_squared",
            "std_beta",
            "std_beta_min",
            "std_beta_max",
        ]
        .iter()
        .map(|c| column::<Float64Array>(batch, c))
        .collect::<Result<Vec<_>>>()?;
        let value = |c: usize, i: usize| (!floats[c].is_null(i)).then(|| floats[c].value(i));

        (0..batch.num_rows())
            .map(|i| {
                let payload = match kind.value(i) {
                    "LogisticTest" => ResultPayload::Logistic,
                    "LinearTest" => ResultPayload::Linear {
                        adjusted_r_squared: value(6, i),
                        std_beta: value(7, i),
                        std_beta_min: value(8, i),
                        std_beta_max: value(9, i),
                    },
                    "SKATTest" => ResultPayload::SetBased,
                    other => {
                        return Err(Error::StorageError(format!("Unknown results_type '{other}'")))
                    }
                };
                Ok(Self {
                    pk: pk.value(i),
                    header: ResultHeader {
                        tested_entity: TestedEntity::parse(entity.value(i))?,
                        task_name: task.value(i).to_string(),
                        entity_name: name.value(i).to_string(),
                        phenotype: phenotype.value(i).to_string(),
                        significance: value(0, i),
                        coefficient: value(1, i),
                        test_statistic: value(2, i),
                        standard_error: value(3, i),
                        confidence_interval_min: value(4, i),
                        confidence_interval_max: value(5, i),
                    },
                    payload,
                })
            })
            .collect()
    }

    /// Decode every row of a table
    ///
    /// # Errors
    /// See [`Self::from_batch`]
    pub fn from_table(table: &Table) -> Result<Vec<Self>> {
        let mut rows = Vec::with_capacity(table.num_rows());
        for batch in table.batches() {
            rows.extend(Self::from_batch(batch)?);
        }
        Ok(rows)
    }
}
