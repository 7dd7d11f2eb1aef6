//! Statistical provider seams
//!
//! The engine never fits models itself. Tasks hand a response vector and a
//! design matrix to a [`RegressionProvider`] (or a genotype matrix to a
//! [`SetTestProvider`]) and only read back the indexed statistics.
//!
//! Providers may hold state that is not thread-safe, so workers build their
//! own instance from a factory instead of sharing one.

mod correction;

pub use correction::{
    correlation_of, effective_number, Correction, CorrectionSummary, EFFECTIVE_VARIANCE,
};

use anyhow::ensure;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Link family passed to the regression provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Logistic regression for binary outcomes
    Binomial,
    /// Ordinary least squares
    Gaussian,
}

/// Output of one regression fit, indexed by design-matrix column
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFit {
    /// Coefficient per column
    pub coefficients: Vec<f64>,
    /// Two-sided p-value per column
    pub p_values: Vec<f64>,
    /// Standard error per column
    pub standard_errors: Vec<f64>,
    /// Wald (z or t) statistic per column
    pub test_statistics: Vec<f64>,
    /// 95% confidence interval per column
    pub confidence_intervals: Vec<(f64, f64)>,
    /// Adjusted R² (Gaussian fits only)
    pub adjusted_r_squared: Option<f64>,
}

impl ModelFit {
    /// Confidence interval of column `i`
    #[must_use]
    pub fn conf_int(&self, i: usize) -> Option<(f64, f64)> {
        self.confidence_intervals.get(i).copied()
    }

    /// Statistics of column `i`
    #[must_use]
    pub fn term(&self, i: usize) -> Option<Term> {
        let (ci_min, ci_max) = self.conf_int(i)?;
        Some(Term {
            coefficient: *self.coefficients.get(i)?,
            p_value: *self.p_values.get(i)?,
            standard_error: *self.standard_errors.get(i)?,
            test_statistic: *self.test_statistics.get(i)?,
            ci_min,
            ci_max,
        })
    }

    /// Check that every vector has one entry per design column
    ///
    /// # Errors
    /// Returns an error describing the first inconsistent vector
    pub fn validate(&self, n_columns: usize) -> anyhow::Result<()> {
        ensure!(
            self.coefficients.len() == n_columns,
            "provider returned {} coefficients for {n_columns} columns",
            self.coefficients.len()
        );
        ensure!(self.p_values.len() == n_columns, "p-value count mismatch");
        ensure!(self.standard_errors.len() == n_columns, "standard error count mismatch");
        ensure!(self.test_statistics.len() == n_columns, "test statistic count mismatch");
        ensure!(
            self.confidence_intervals.len() == n_columns,
            "confidence interval count mismatch"
        );
        Ok(())
    }
}

/// Statistics of one model term
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Term {
    /// Coefficient
    pub coefficient: f64,
    /// p-value
    pub p_value: f64,
    /// Standard error
    pub standard_error: f64,
    /// Test statistic
    pub test_statistic: f64,
    /// Lower 95% bound
    pub ci_min: f64,
    /// Upper 95% bound
    pub ci_max: f64,
}

/// External regression fitting
pub trait RegressionProvider {
    /// Fit `y ~ x` with the given family
    ///
    /// # Errors
    /// Any failure (non-convergence, singular design); the caller turns it
    /// into a null result row
    fn fit(&mut self, y: &[f64], x: &DMatrix<f64>, family: Family) -> anyhow::Result<ModelFit>;
}

/// Builds one provider per worker
pub type RegressionProviderFactory = Arc<dyn Fn() -> Box<dyn RegressionProvider> + Send + Sync>;

/// Wrap a provider constructor into a [`RegressionProviderFactory`]
pub fn regression_factory<P, F>(make: F) -> RegressionProviderFactory
where
    P: RegressionProvider + 'static,
    F: Fn() -> P + Send + Sync + 'static,
{
    Arc::new(move || Box::new(make()) as Box<dyn RegressionProvider>)
}

/// Opaque fitted null model owned by a set-test provider
pub struct NullModel(pub Box<dyn Any + Send>);

impl fmt::Debug for NullModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NullModel(..)")
    }
}

/// Result of an omnibus set test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetTestOutcome {
    /// Test statistic
    pub statistic: f64,
    /// p-value
    pub p_value: f64,
}

/// External aggregate (set-based) test
pub trait SetTestProvider {
    /// Fit the covariates-only null model
    ///
    /// # Errors
    /// Any provider failure
    fn fit_null(&mut self, y: &[f64], covariates: &DMatrix<f64>, family: Family) -> anyhow::Result<NullModel>;

    /// Test a genotype matrix (samples × variants) against the null model
    ///
    /// # Errors
    /// Any provider failure
    fn test(&mut self, null: &NullModel, genotypes: &DMatrix<f64>, is_dosage: bool) -> anyhow::Result<SetTestOutcome>;
}

/// Builds one set-test provider per worker
pub type SetTestProviderFactory = Arc<dyn Fn() -> Box<dyn SetTestProvider> + Send + Sync>;

/// Wrap a provider constructor into a [`SetTestProviderFactory`]
pub fn set_test_factory<P, F>(make: F) -> SetTestProviderFactory
where
    P: SetTestProvider + 'static,
    F: Fn() -> P + Send + Sync + 'static,
{
    Arc::new(move || Box::new(make()) as Box<dyn SetTestProvider>)
}

/// Pearson correlation over the rows where both values are finite
///
/// NaN when fewer than two complete rows remain or a side is constant.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(&x, &y)| (x, y))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let (mx, my) = pairs
        .iter()
        .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
    let (mx, my) = (mx / n, my / n);
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    sxy / (sxx * syy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fit(n: usize) -> ModelFit {
        ModelFit {
            coefficients: vec![0.5; n],
            p_values: vec![0.01; n],
            standard_errors: vec![0.1; n],
            test_statistics: vec![5.0; n],
            confidence_intervals: vec![(0.3, 0.7); n],
            adjusted_r_squared: None,
        }
    }

    #[test]
    fn test_term_extraction() {
        let t = fit(3).term(1).unwrap();
        assert_eq!(t.coefficient, 0.5);
        assert_eq!((t.ci_min, t.ci_max), (0.3, 0.7));
        assert!(fit(3).term(3).is_none());
    }

    #[test]
    fn test_validate_column_count() {
        assert!(fit(3).validate(3).is_ok());
        let err = fit(2).validate(3).unwrap_err();
        assert!(err.to_string().contains("2 coefficients for 3 columns"));
    }

    #[test]
    fn test_pearson_pairwise_complete() {
        let r = pearson(&[1.0, 2.0, f64::NAN, 4.0], &[2.0, 4.0, 100.0, 8.0]);
        assert!((r - 1.0).abs() < 1e-12);
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_nan());
        assert!(pearson(&[1.0], &[1.0]).is_nan());
    }
}
