//! Multiple-testing correction
//!
//! Bonferroni divides `alpha` by the number of tests. The effective-number
//! variant (Gao et al.) divides by the product of the effective numbers of
//! tested entities and outcomes, each derived from the eigen decomposition
//! of a correlation matrix: the number of components needed to retain
//! [`EFFECTIVE_VARIANCE`] of the total variance.

use super::pearson;
use crate::{Error, Result};
use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

/// Fraction of variance retained by the effective-number computation
pub const EFFECTIVE_VARIANCE: f64 = 0.995;

/// Correction applied to a task's significance threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Correction {
    /// `alpha / n_tests`
    Bonferroni,
    /// `alpha / (effective entities × effective outcomes)`
    #[serde(alias = "gao")]
    EffectiveTests,
}

impl FromStr for Correction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bonferroni" => Ok(Self::Bonferroni),
            "effective-tests" | "gao" => Ok(Self::EffectiveTests),
            other => Err(Error::Configuration(format!(
                "Unknown correction '{other}' (expected bonferroni or effective-tests)"
            ))),
        }
    }
}

/// Threshold summary stored in task metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionSummary {
    /// Applied correction
    pub correction: Correction,
    /// Nominal level
    pub alpha: f64,
    /// Number of tests actually run
    pub n_tests: usize,
    /// Effective number of tested entities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_entities: Option<usize>,
    /// Effective number of outcomes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_outcomes: Option<usize>,
    /// Corrected significance threshold
    pub threshold: f64,
}

impl CorrectionSummary {
    /// Bonferroni threshold
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bonferroni(alpha: f64, n_tests: usize) -> Self {
        Self {
            correction: Correction::Bonferroni,
            alpha,
            n_tests,
            effective_entities: None,
            effective_outcomes: None,
            threshold: alpha / n_tests.max(1) as f64,
        }
    }

    /// Effective-number threshold from entity and outcome correlation matrices
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn effective(alpha: f64, n_tests: usize, entities: &DMatrix<f64>, outcomes: &DMatrix<f64>) -> Self {
        let m_entities = effective_number(entities, EFFECTIVE_VARIANCE);
        let m_outcomes = effective_number(outcomes, EFFECTIVE_VARIANCE);
        Self {
            correction: Correction::EffectiveTests,
            alpha,
            n_tests,
            effective_entities: Some(m_entities),
            effective_outcomes: Some(m_outcomes),
            threshold: alpha / (m_entities * m_outcomes).max(1) as f64,
        }
    }
}

/// Effective number of variables behind a correlation matrix
///
/// Non-finite entries count as uncorrelated. Returns the smallest `k` such
/// that the `k` largest eigenvalues explain more than `variance` of the
/// total, capped by the matrix dimension.
#[must_use]
pub fn effective_number(corr: &DMatrix<f64>, variance: f64) -> usize {
    let n = corr.nrows();
    if n == 0 {
        return 0;
    }
    let clean = DMatrix::from_fn(n, n, |i, j| {
        let v = corr[(i, j)];
        if v.is_finite() {
            v
        } else if i == j {
            1.0
        } else {
            0.0
        }
    });

    let mut eigenvalues: Vec<f64> = SymmetricEigen::new(clean)
        .eigenvalues
        .iter()
        .map(|&v| v.max(0.0))
        .collect();
    eigenvalues.sort_by(|a, b| b.total_cmp(a));

    let total: f64 = eigenvalues.iter().sum();
    if total <= 0.0 {
        return n;
    }

    let mut cumulative = 0.0;
    let mut retained = 0;
    for v in &eigenvalues {
        cumulative += v / total;
        if cumulative > variance {
            break;
        }
        retained += 1;
    }
    let k = (retained + 1).min(n);
    debug!(variables = n, effective = k, "effective number of variables");
    k
}

/// Pairwise-complete correlation matrix of columns
#[must_use]
pub fn correlation_of(columns: &[&[f64]]) -> DMatrix<f64> {
    let n = columns.len();
    DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            1.0
        } else {
            pearson(columns[i], columns[j])
        }
    })
}
