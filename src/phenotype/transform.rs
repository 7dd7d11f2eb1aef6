//! Continuous-variable transformations
//!
//! The registry is fixed: `log` and `inverse-normal-transform`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::fmt;
use std::str::FromStr;

/// Blom offset used by the rank-based inverse normal transformation
pub const INT_OFFSET: f64 = 3.0 / 8.0;

/// Registered transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Transformation {
    /// Natural logarithm (non-positive values become missing)
    Log,
    /// Rank-based inverse normal transformation
    InverseNormal,
}

impl Transformation {
    /// Registered names
    pub const NAMES: [&'static str; 2] = ["log", "inverse-normal-transform"];

    /// Registry name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::InverseNormal => "inverse-normal-transform",
        }
    }

    /// Transform a vector; missing values stay missing
    #[must_use]
    pub fn apply(self, values: &[f64]) -> Vec<f64> {
        match self {
            Self::Log => values
                .iter()
                .map(|&v| if v > 0.0 { v.ln() } else { f64::NAN })
                .collect(),
            Self::InverseNormal => inverse_normal_transformation(values, INT_OFFSET),
        }
    }
}

impl FromStr for Transformation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "log" => Ok(Self::Log),
            "inverse-normal-transform" => Ok(Self::InverseNormal),
            other => Err(Error::UnknownTransformation(other.to_string())),
        }
    }
}

impl TryFrom<String> for Transformation {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Transformation> for String {
    fn from(t: Transformation) -> Self {
        t.name().to_string()
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Average ranks (1-based) of the finite values, NaN elsewhere
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_finite()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![f64::NAN; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // Positions start..end share the average of ranks start+1..=end
        let rank = (start + 1 + end) as f64 / 2.0;
        for &i in &order[start..end] {
            ranks[i] = rank;
        }
        start = end;
    }
    ranks
}

/// Inverse normal transformation `Φ⁻¹((r - c) / (n - 2c + 1))` over finite values
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn inverse_normal_transformation(values: &[f64], c: f64) -> Vec<f64> {
    let ranks = average_ranks(values);
    let n = ranks.iter().filter(|r| r.is_finite()).count() as f64;
    let Ok(normal) = Normal::new(0.0, 1.0) else {
        return vec![f64::NAN; values.len()];
    };
    ranks
        .into_iter()
        .map(|r| {
            if r.is_finite() {
                normal.inverse_cdf((r - c) / (n - 2.0 * c + 1.0))
            } else {
                f64::NAN
            }
        })
        .collect()
}
