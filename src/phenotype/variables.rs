//! Analysis variables and their catalog

use super::exclusion::RelatedPhenotypesExclusion;
use super::{PhenotypeSource, Transformation};
use crate::storage::Table;
use crate::{Error, Result};
use arrow::array::{ArrayRef, BooleanArray, Float64Array, RecordBatch, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use nalgebra::DMatrix;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Table name inside the run directory
pub const VARIABLES_TABLE: &str = "variables";

/// Discriminator of [`VariableKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    /// Binary outcome (0 control, 1 case)
    Discrete,
    /// Quantitative outcome
    Continuous,
}

impl VariableType {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discrete => "discrete",
            Self::Continuous => "continuous",
        }
    }
}

/// Kind-specific fields and statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variable_type", rename_all = "lowercase")]
pub enum VariableKind {
    /// Binary variable
    Discrete {
        /// Samples equal to 1
        n_cases: Option<u64>,
        /// Samples equal to 0
        n_controls: Option<u64>,
    },
    /// Quantitative variable
    Continuous {
        /// Mean over non-missing values
        mean: Option<f64>,
        /// Population standard deviation over non-missing values
        std: Option<f64>,
        /// Transformation applied before analysis
        transformation: Option<Transformation>,
    },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct VariableSpec {
    name: String,
    #[serde(default, alias = "covariate")]
    is_covariate: bool,
    variable_type: VariableType,
    #[serde(default)]
    transformation: Option<Transformation>,
}

impl TryFrom<VariableSpec> for Variable {
    type Error = Error;

    fn try_from(spec: VariableSpec) -> Result<Self> {
        let variable = match spec.variable_type {
            VariableType::Discrete => {
                if spec.transformation.is_some() {
                    return Err(Error::Configuration(format!(
                        "Discrete variable '{}' cannot have a transformation",
                        spec.name
                    )));
                }
                Self::discrete(spec.name)
            }
            VariableType::Continuous => {
                let mut v = Self::continuous(spec.name);
                if let Some(t) = spec.transformation {
                    v = v.with_transformation(t);
                }
                v
            }
        };
        Ok(if spec.is_covariate {
            variable.covariate()
        } else {
            variable
        })
    }
}

/// A phenotype or covariate included in the experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VariableSpec")]
pub struct Variable {
    /// Column name in the phenotype source
    pub name: String,
    /// Adjusted for, never tested
    pub is_covariate: bool,
    /// Missing values, filled by the catalog
    pub n_missing: Option<u64>,
    /// Kind-specific data
    #[serde(flatten)]
    pub kind: VariableKind,
}

impl Variable {
    /// New discrete outcome
    pub fn discrete(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_covariate: false,
            n_missing: None,
            kind: VariableKind::Discrete {
                n_cases: None,
                n_controls: None,
            },
        }
    }

    /// New continuous outcome
    pub fn continuous(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_covariate: false,
            n_missing: None,
            kind: VariableKind::Continuous {
                mean: None,
                std: None,
                transformation: None,
            },
        }
    }

    /// Mark as covariate
    #[must_use]
    pub const fn covariate(mut self) -> Self {
        self.is_covariate = true;
        self
    }

    /// Attach a transformation (continuous variables only)
    #[must_use]
    pub fn with_transformation(mut self, t: Transformation) -> Self {
        if let VariableKind::Continuous { transformation, .. } = &mut self.kind {
            *transformation = Some(t);
        }
        self
    }

    /// Discriminator
    #[must_use]
    pub const fn variable_type(&self) -> VariableType {
        match self.kind {
            VariableKind::Discrete { .. } => VariableType::Discrete,
            VariableKind::Continuous { .. } => VariableType::Continuous,
        }
    }

    /// True for discrete variables
    #[must_use]
    pub const fn is_discrete(&self) -> bool {
        matches!(self.kind, VariableKind::Discrete { .. })
    }

    /// Registered transformation, if any
    #[must_use]
    pub const fn transformation(&self) -> Option<Transformation> {
        match self.kind {
            VariableKind::Continuous { transformation, .. } => transformation,
            VariableKind::Discrete { .. } => None,
        }
    }

    /// `n_cases / (n_cases + n_controls)` for computed discrete variables
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn prevalence(&self) -> Option<f64> {
        match self.kind {
            VariableKind::Discrete {
                n_cases: Some(cases),
                n_controls: Some(controls),
            } if cases + controls > 0 => Some(cases as f64 / (cases + controls) as f64),
            _ => None,
        }
    }

    /// Fill the derived statistics from the analysed vector
    #[allow(clippy::cast_precision_loss)]
    pub fn compute_statistics(&mut self, values: &[f64]) {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        self.n_missing = Some((values.len() - finite.len()) as u64);
        match &mut self.kind {
            VariableKind::Discrete { n_cases, n_controls } => {
                *n_cases = Some(finite.iter().filter(|&&v| v == 1.0).count() as u64);
                *n_controls = Some(finite.iter().filter(|&&v| v == 0.0).count() as u64);
            }
            VariableKind::Continuous { mean, std, .. } => {
                if finite.is_empty() {
                    *mean = Some(f64::NAN);
                    *std = Some(f64::NAN);
                } else {
                    let n = finite.len() as f64;
                    let m = finite.iter().sum::<f64>() / n;
                    let var = finite.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
                    *mean = Some(m);
                    *std = Some(var.sqrt());
                }
            }
        }
    }
}

/// Square correlation matrix with its labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    /// Row and column labels
    pub names: Vec<String>,
    /// Row-major values (NaN is stored as `null`)
    #[serde(with = "nan_as_null")]
    pub matrix: Vec<Vec<f64>>,
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(m: &[Vec<f64>], s: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<Vec<Option<f64>>> = m
            .iter()
            .map(|row| row.iter().map(|v| v.is_finite().then_some(*v)).collect())
            .collect();
        rows.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<f64>>, D::Error> {
        let rows = Vec::<Vec<Option<f64>>>::deserialize(d)?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
            .collect())
    }
}

impl CorrelationMatrix {
    /// Wrap a nalgebra matrix
    #[must_use]
    pub fn new(names: Vec<String>, m: &DMatrix<f64>) -> Self {
        let matrix = (0..m.nrows())
            .map(|i| (0..m.ncols()).map(|j| m[(i, j)]).collect())
            .collect();
        Self { names, matrix }
    }

    /// Back to nalgebra
    #[must_use]
    pub fn to_dmatrix(&self) -> DMatrix<f64> {
        let n = self.names.len();
        DMatrix::from_fn(n, n, |i, j| self.matrix[i][j])
    }

    /// Correlation between two labelled entries
    #[must_use]
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.names.iter().position(|n| n == a)?;
        let j = self.names.iter().position(|n| n == b)?;
        Some(self.matrix[i][j])
    }
}

/// Variables of one experiment with their statistics
#[derive(Debug, Clone)]
pub struct VariableCatalog {
    variables: Vec<Variable>,
    index: FxHashMap<String, usize>,
    exclusions: Option<Vec<RelatedPhenotypesExclusion>>,
}

impl VariableCatalog {
    /// Compute the statistics of every variable against a source
    ///
    /// The variable list is fixed from here on.
    ///
    /// # Errors
    /// Returns a configuration error for duplicated names and a lookup error
    /// for variables absent from the source
    pub fn initialize(mut variables: Vec<Variable>, source: &dyn PhenotypeSource) -> Result<Self> {
        let mut index = FxHashMap::default();
        for (i, v) in variables.iter().enumerate() {
            if index.insert(v.name.clone(), i).is_some() {
                return Err(Error::Configuration(format!("Variable '{}' is defined twice", v.name)));
            }
        }

        variables.par_iter_mut().try_for_each(|v| -> Result<()> {
            let values = source.phenotype_vector(v, false)?;
            v.compute_statistics(&values);
            Ok(())
        })?;

        info!(
            variables = variables.len(),
            covariates = variables.iter().filter(|v| v.is_covariate).count(),
            "variable catalog initialized"
        );

        Ok(Self {
            variables,
            index,
            exclusions: None,
        })
    }

    /// Wrap already-computed variables (read side)
    ///
    /// # Errors
    /// Returns a configuration error for duplicated names
    pub fn from_variables(variables: Vec<Variable>) -> Result<Self> {
        let mut index = FxHashMap::default();
        for (i, v) in variables.iter().enumerate() {
            if index.insert(v.name.clone(), i).is_some() {
                return Err(Error::Configuration(format!("Variable '{}' is defined twice", v.name)));
            }
        }
        Ok(Self {
            variables,
            index,
            exclusions: None,
        })
    }

    /// All variables in configuration order
    #[must_use]
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Variable by name
    ///
    /// # Errors
    /// Returns a lookup error for unknown names
    pub fn get(&self, name: &str) -> Result<&Variable> {
        self.index
            .get(name)
            .map(|&i| &self.variables[i])
            .ok_or_else(|| Error::Lookup {
                what: "variable catalog",
                name: name.to_string(),
            })
    }

    /// Non-covariate variables
    pub fn outcomes(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter().filter(|v| !v.is_covariate)
    }

    /// Covariates
    pub fn covariates(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter().filter(|v| v.is_covariate)
    }

    /// Names of the non-covariate variables
    #[must_use]
    pub fn outcome_names(&self) -> Vec<String> {
        self.outcomes().map(|v| v.name.clone()).collect()
    }

    /// Number of variables
    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// True when there is no variable
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Correlation matrix over every variable, covariates included (raw values)
    ///
    /// # Errors
    /// Propagates source lookup errors
    pub fn compute_correlation(&self, source: &dyn PhenotypeSource) -> Result<CorrelationMatrix> {
        let names: Vec<String> = self.variables.iter().map(|v| v.name.clone()).collect();
        let m = source.correlation_matrix(&names)?;
        Ok(CorrelationMatrix::new(names, &m))
    }

    /// Null controls of A that are cases of a correlated B
    ///
    /// Considers every ordered pair of discrete outcomes with
    /// `|corr| >= threshold`; covariates never take part even though the
    /// matrix has rows for them. Runs once per catalog.
    ///
    /// # Errors
    /// Returns [`Error::ExclusionsAlreadyComputed`] on a second call
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn apply_related_exclusions(
        &mut self,
        source: &mut dyn PhenotypeSource,
        correlation: &CorrelationMatrix,
        threshold: f64,
    ) -> Result<&[RelatedPhenotypesExclusion]> {
        if self.exclusions.is_some() {
            return Err(Error::ExclusionsAlreadyComputed);
        }

        let discrete: Vec<String> = self
            .outcomes()
            .filter(|v| v.is_discrete())
            .map(|v| v.name.clone())
            .collect();

        let mut records = Vec::new();
        for a in &discrete {
            for b in discrete.iter().filter(|b| *b != a) {
                let Some(corr) = correlation.get(a, b) else {
                    continue;
                };
                if !(corr.abs() >= threshold) {
                    continue;
                }
                let va = source.raw_vector(a)?;
                let vb = source.raw_vector(b)?;
                let rows: Vec<usize> = va
                    .iter()
                    .zip(&vb)
                    .enumerate()
                    .filter(|(_, (&x, &y))| x == 0.0 && y == 1.0)
                    .map(|(i, _)| i)
                    .collect();
                source.set_missing(a, &rows)?;
                debug!(phen1 = %a, phen2 = %b, corr, n_excluded = rows.len(), "related phenotype exclusion");
                records.push(RelatedPhenotypesExclusion {
                    phen1: a.clone(),
                    phen2: b.clone(),
                    correlation: corr,
                    n_excluded: rows.len() as u64,
                });
            }
        }

        info!(
            threshold,
            pairs = records.len(),
            excluded = records.iter().map(|r| r.n_excluded).sum::<u64>(),
            "related phenotype exclusions applied"
        );
        let stored = self.exclusions.insert(records);
        Ok(stored.as_slice())
    }

    /// Exclusions computed so far (`None` if never triggered)
    #[must_use]
    pub fn exclusions(&self) -> Option<&[RelatedPhenotypesExclusion]> {
        self.exclusions.as_deref()
    }

    /// Persistable table of variables with their statistics
    ///
    /// # Errors
    /// Returns error if Arrow rejects the batch
    pub fn to_table(&self) -> Result<Table> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("name", DataType::Utf8, false),
            Field::new("is_covariate", DataType::Boolean, false),
            Field::new("variable_type", DataType::Utf8, false),
            Field::new("n_missing", DataType::UInt64, true),
            Field::new("n_cases", DataType::UInt64, true),
            Field::new("n_controls", DataType::UInt64, true),
            Field::new("prevalence", DataType::Float64, true),
            Field::new("mean", DataType::Float64, true),
            Field::new("std", DataType::Float64, true),
            Field::new("transformation", DataType::Utf8, true),
        ]));

        let vars = &self.variables;
        let pick_u64 = |f: fn(&Variable) -> Option<u64>| -> ArrayRef {
            Arc::new(vars.iter().map(f).collect::<UInt64Array>())
        };
        let pick_f64 = |f: fn(&Variable) -> Option<f64>| -> ArrayRef {
            Arc::new(vars.iter().map(f).collect::<Float64Array>())
        };

        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(vars.iter().map(|v| v.name.as_str()))),
            Arc::new(BooleanArray::from(vars.iter().map(|v| v.is_covariate).collect::<Vec<_>>())),
            Arc::new(StringArray::from_iter_values(vars.iter().map(|v| v.variable_type().as_str()))),
            pick_u64(|v| v.n_missing),
            pick_u64(|v| match v.kind {
                VariableKind::Discrete { n_cases, .. } => n_cases,
                VariableKind::Continuous { .. } => None,
            }),
            pick_u64(|v| match v.kind {
                VariableKind::Discrete { n_controls, .. } => n_controls,
                VariableKind::Continuous { .. } => None,
            }),
            pick_f64(Variable::prevalence),
            pick_f64(|v| match v.kind {
                VariableKind::Continuous { mean, .. } => mean,
                VariableKind::Discrete { .. } => None,
            }),
            pick_f64(|v| match v.kind {
                VariableKind::Continuous { std, .. } => std,
                VariableKind::Discrete { .. } => None,
            }),
            Arc::new(
                vars.iter()
                    .map(|v| v.transformation().map(Transformation::name))
                    .collect::<StringArray>(),
            ),
        ];

        let mut table = Table::new(schema);
        table.append_batch(RecordBatch::try_new(table.schema(), columns)?)?;
        Ok(table)
    }
}
