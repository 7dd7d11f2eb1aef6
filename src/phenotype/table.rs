//! In-memory phenotype table

use super::PhenotypeSource;
use crate::sample_order::{self, validate_sample_sequences};
use crate::{Error, Result};
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Column-oriented phenotype table
#[derive(Debug, Clone, Default)]
pub struct PhenotypeTable {
    samples: Vec<String>,
    columns: Vec<String>,
    data: FxHashMap<String, Vec<f64>>,
    order_is_set: bool,
    correlation_threshold: Option<f64>,
}

impl PhenotypeTable {
    /// Build from named columns aligned on `samples`
    ///
    /// # Errors
    /// Returns error on duplicated samples or columns, or on length mismatch
    pub fn new(samples: Vec<String>, columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        sample_order::ensure_unique(&samples)?;
        let mut names = Vec::with_capacity(columns.len());
        let mut data = FxHashMap::default();
        for (name, values) in columns {
            if values.len() != samples.len() {
                return Err(Error::InvalidInput(format!(
                    "Column '{name}' has {} values for {} samples",
                    values.len(),
                    samples.len()
                )));
            }
            if data.insert(name.clone(), values).is_some() {
                return Err(Error::Configuration(format!("Duplicate phenotype column '{name}'")));
            }
            names.push(name);
        }
        Ok(Self {
            samples,
            columns: names,
            data,
            order_is_set: false,
            correlation_threshold: None,
        })
    }

    /// Read a delimited file (tab, comma or space, detected from the header)
    ///
    /// Empty cells and any token in `missing_values` are missing.
    ///
    /// # Errors
    /// Returns error if the file cannot be parsed, the sample column is absent
    /// or a cell is neither numeric nor a missing token
    pub fn from_delimited<P: AsRef<Path>>(
        path: P,
        sample_column: &str,
        missing_values: &[&str],
    ) -> Result<Self> {
        let delimiter = detect_delimiter(path.as_ref())?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_path(path.as_ref())?;

        let headers = reader.headers()?.clone();
        let sample_idx = headers
            .iter()
            .position(|h| h == sample_column)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "Sample column '{sample_column}' not found in {}",
                    path.as_ref().display()
                ))
            })?;

        let names: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != sample_idx)
            .map(|(i, h)| (i, h.to_string()))
            .collect();

        let mut samples = Vec::new();
        let mut values: Vec<Vec<f64>> = vec![Vec::new(); names.len()];
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            samples.push(record.get(sample_idx).unwrap_or("").to_string());
            for ((col, name), out) in names.iter().zip(values.iter_mut()) {
                let cell = record.get(*col).unwrap_or("");
                out.push(parse_cell(cell, missing_values).ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "Row {}, column '{name}': '{cell}' is not numeric",
                        row + 2
                    ))
                })?);
            }
        }

        debug!(
            samples = samples.len(),
            phenotypes = names.len(),
            path = %path.as_ref().display(),
            "phenotype table loaded"
        );
        Self::new(
            samples,
            names.into_iter().map(|(_, n)| n).zip(values).collect(),
        )
    }
}

fn detect_delimiter(path: &Path) -> Result<u8> {
    let content = std::fs::read_to_string(path)?;
    let first_line = content.lines().next().unwrap_or("");
    Ok(if first_line.contains('\t') {
        b'\t'
    } else if first_line.contains(',') {
        b','
    } else {
        b' '
    })
}

fn parse_cell(cell: &str, missing_values: &[&str]) -> Option<f64> {
    if cell.is_empty() || missing_values.contains(&cell) {
        return Some(f64::NAN);
    }
    cell.parse::<f64>().ok()
}

impl PhenotypeSource for PhenotypeTable {
    fn phenotypes(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn sample_order(&self) -> &[String] {
        &self.samples
    }

    fn is_sample_order_set(&self) -> bool {
        self.order_is_set
    }

    fn set_sample_order(&mut self, sequence: &[String], allow_subset: bool) -> Result<()> {
        validate_sample_sequences(&self.samples, sequence, allow_subset)?;
        let index = sample_order::reindex(&self.samples, sequence)?;
        for values in self.data.values_mut() {
            *values = sample_order::take(values, &index);
        }
        self.samples = sequence.to_vec();
        self.order_is_set = true;
        Ok(())
    }

    fn raw_vector(&self, name: &str) -> Result<Vec<f64>> {
        self.data
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_phenotype(name))
    }

    fn set_missing(&mut self, name: &str, rows: &[usize]) -> Result<()> {
        let values = self
            .data
            .get_mut(name)
            .ok_or_else(|| Error::unknown_phenotype(name))?;
        for &row in rows {
            if let Some(v) = values.get_mut(row) {
                *v = f64::NAN;
            } else {
                warn!(phenotype = name, row, "row outside the table ignored");
            }
        }
        Ok(())
    }

    fn exclude_correlated(&mut self, threshold: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Configuration(format!(
                "Correlation threshold must be in [0, 1], got {threshold}"
            )));
        }
        self.correlation_threshold = Some(threshold);
        Ok(())
    }

    fn correlation_threshold(&self) -> Option<f64> {
        self.correlation_threshold
    }
}
