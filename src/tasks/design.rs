//! Missing-value masks and design matrices
//!
//! Column layout is fixed: intercept at [`INTERCEPT_COLUMN`], the genetic
//! term at [`GENETIC_COLUMN`], covariates after that. Every matrix handed to
//! a provider only holds complete cases.

use nalgebra::DMatrix;

/// Position of the constant term
pub const INTERCEPT_COLUMN: usize = 0;

/// Position of the genetic term
pub const GENETIC_COLUMN: usize = 1;

/// Response vector with its design matrix
#[derive(Debug, Clone, PartialEq)]
pub struct Design {
    /// Response, complete cases only
    pub y: Vec<f64>,
    /// Predictors, one row per element of `y`
    pub x: DMatrix<f64>,
}

impl Design {
    /// Number of complete cases
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.y.len()
    }
}

/// Per-sample missingness over several columns (`true` = missing)
///
/// A sample is missing as soon as one column holds a non-finite value.
#[must_use]
pub fn missing_mask(columns: &[&[f64]]) -> Vec<bool> {
    let n = columns.first().map_or(0, |c| c.len());
    let mut mask = vec![false; n];
    for column in columns {
        mask = combine_mask(&mask, column);
    }
    mask
}

/// `mask` OR non-finite entries of `column`
#[must_use]
pub fn combine_mask(mask: &[bool], column: &[f64]) -> Vec<bool> {
    mask.iter()
        .zip(column)
        .map(|(&m, v)| m || !v.is_finite())
        .collect()
}

/// Row positions of the complete cases
#[must_use]
pub fn complete_rows(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter(|(_, &m)| !m)
        .map(|(i, _)| i)
        .collect()
}

fn matrix(rows: &[usize], columns: &[&[f64]], intercept: bool) -> DMatrix<f64> {
    let offset = usize::from(intercept);
    DMatrix::from_fn(rows.len(), columns.len() + offset, |i, j| {
        if intercept && j == INTERCEPT_COLUMN {
            1.0
        } else {
            columns[j - offset][rows[i]]
        }
    })
}

/// `[intercept, genotype, covariates…]` restricted to complete cases
///
/// The mask is combined with the missingness of every input, so callers may
/// pass a mask that does not cover the genotype yet.
#[must_use]
pub fn variant_design(outcome: &[f64], genotype: &[f64], covariates: &[Vec<f64>], mask: &[bool]) -> Design {
    let mut mask = combine_mask(mask, outcome);
    mask = combine_mask(&mask, genotype);
    for c in covariates {
        mask = combine_mask(&mask, c);
    }
    let rows = complete_rows(&mask);

    let mut columns: Vec<&[f64]> = Vec::with_capacity(covariates.len() + 1);
    columns.push(genotype);
    columns.extend(covariates.iter().map(Vec::as_slice));

    Design {
        y: rows.iter().map(|&i| outcome[i]).collect(),
        x: matrix(&rows, &columns, true),
    }
}

/// Covariates-only design `[intercept, covariates…]`
#[must_use]
pub fn null_design(outcome: &[f64], covariates: &[Vec<f64>], mask: &[bool]) -> Design {
    let mut mask = combine_mask(mask, outcome);
    for c in covariates {
        mask = combine_mask(&mask, c);
    }
    let rows = complete_rows(&mask);
    let columns: Vec<&[f64]> = covariates.iter().map(Vec::as_slice).collect();
    Design {
        y: rows.iter().map(|&i| outcome[i]).collect(),
        x: matrix(&rows, &columns, true),
    }
}

/// Null design plus the joint genotype matrix (samples × variants) of a set
///
/// A sample missing any genotype of the set is dropped.
#[must_use]
pub fn set_design(
    outcome: &[f64],
    genotypes: &[&[f64]],
    covariates: &[Vec<f64>],
    mask: &[bool],
) -> (Design, DMatrix<f64>) {
    let mut mask = combine_mask(mask, outcome);
    for g in genotypes {
        mask = combine_mask(&mask, g);
    }
    for c in covariates {
        mask = combine_mask(&mask, c);
    }
    let rows = complete_rows(&mask);
    let columns: Vec<&[f64]> = covariates.iter().map(Vec::as_slice).collect();
    let design = Design {
        y: rows.iter().map(|&i| outcome[i]).collect(),
        x: matrix(&rows, &columns, true),
    };
    (design, matrix(&rows, genotypes, false))
}

/// Z-score every column (population std), then restore the intercept
///
/// Constant columns other than the intercept become zeros.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn standardize_design(x: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = x.clone();
    let n = x.nrows() as f64;
    if x.nrows() == 0 {
        return out;
    }
    for (j, mut column) in out.column_iter_mut().enumerate() {
        if j == INTERCEPT_COLUMN {
            column.fill(1.0);
            continue;
        }
        let mean = column.sum() / n;
        let std = (column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        if std > 0.0 {
            column.apply(|v| *v = (*v - mean) / std);
        } else {
            column.fill(0.0);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const NA: f64 = f64::NAN;

    #[test]
    fn test_missing_mask_is_union() {
        let a = [1.0, NA, 3.0, 4.0];
        let b = [1.0, 2.0, f64::INFINITY, 4.0];
        assert_eq!(missing_mask(&[&a, &b]), vec![false, true, true, false]);
        assert!(missing_mask(&[]).is_empty());
    }

    #[test]
    fn test_variant_design_layout() {
        let y = [0.0, 1.0, 1.0, 0.0];
        let g = [0.0, 1.0, 2.0, 1.0];
        let cov = vec![vec![10.0, 20.0, 30.0, 40.0]];
        let d = variant_design(&y, &g, &cov, &[false; 4]);
        assert_eq!(d.n_rows(), 4);
        assert_eq!(d.x.ncols(), 3);
        assert_eq!(d.x[(2, INTERCEPT_COLUMN)], 1.0);
        assert_eq!(d.x[(2, GENETIC_COLUMN)], 2.0);
        assert_eq!(d.x[(2, 2)], 30.0);
    }

    #[test]
    fn test_variant_design_drops_union_of_missing() {
        let y = [0.0, NA, 1.0, 0.0, 1.0, 1.0];
        let g = [NA, 1.0, 2.0, NA, 0.0, 1.0];
        let cov = vec![vec![1.0; 6]];
        let d = variant_design(&y, &g, &cov, &[false; 6]);
        assert_eq!(d.n_rows(), 3);
        assert_eq!(d.y, vec![1.0, 1.0, 1.0]);
        assert_eq!(d.x.column(GENETIC_COLUMN).iter().copied().collect::<Vec<_>>(), vec![2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_set_design_requires_every_genotype() {
        let y = [1.0, 0.0, 1.0];
        let g1 = [0.0, 1.0, NA];
        let g2 = [NA, 1.0, 2.0];
        let (d, g) = set_design(&y, &[&g1, &g2], &[], &[false; 3]);
        assert_eq!(d.n_rows(), 1);
        assert_eq!(d.x.ncols(), 1);
        assert_eq!((g.nrows(), g.ncols()), (1, 2));
        assert_eq!(g[(0, 1)], 1.0);
    }

    #[test]
    fn test_standardize_restores_intercept() {
        let x = DMatrix::from_row_slice(4, 3, &[
            1.0, 0.0, 5.0,
            1.0, 1.0, 5.0,
            1.0, 2.0, 5.0,
            1.0, 1.0, 5.0,
        ]);
        let z = standardize_design(&x);
        assert!(z.column(INTERCEPT_COLUMN).iter().all(|&v| v == 1.0));
        let g: f64 = z.column(GENETIC_COLUMN).sum();
        assert!(g.abs() < 1e-12);
        let var = z.column(GENETIC_COLUMN).iter().map(|v| v * v).sum::<f64>() / 4.0;
        assert!((var - 1.0).abs() < 1e-12);
        assert!(z.column(2).iter().all(|&v| v == 0.0));
    }
}
