//! Shared fixtures: fake statistics providers and synthetic cohorts
#![allow(dead_code)]

use nalgebra::DMatrix;
use phewas_engine::genotype::{MemoryGenotypes, RawVariant};
use phewas_engine::phenotype::PhenotypeTable;
use phewas_engine::stats::{Family, ModelFit, NullModel, RegressionProvider, SetTestOutcome, SetTestProvider};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Reports the number of rows it was given as every coefficient
///
/// The genetic term p-value is `1 / (n_rows + 1)` so rows can be ordered.
#[derive(Debug, Default)]
pub struct RowCountProvider;

#[allow(clippy::cast_precision_loss)]
impl RegressionProvider for RowCountProvider {
    fn fit(&mut self, y: &[f64], x: &DMatrix<f64>, family: Family) -> anyhow::Result<ModelFit> {
        anyhow::ensure!(y.len() == x.nrows(), "response and design disagree");
        let k = x.ncols();
        let n = y.len() as f64;
        Ok(ModelFit {
            coefficients: vec![n; k],
            p_values: vec![1.0 / (n + 1.0); k],
            standard_errors: vec![1.0; k],
            test_statistics: vec![n; k],
            confidence_intervals: vec![(n - 1.0, n + 1.0); k],
            adjusted_r_squared: (family == Family::Gaussian).then_some(0.5),
        })
    }
}

/// Fails whenever the design has fewer rows than `min_rows`
#[derive(Debug)]
pub struct FailsBelow {
    pub min_rows: usize,
}

impl RegressionProvider for FailsBelow {
    fn fit(&mut self, y: &[f64], x: &DMatrix<f64>, family: Family) -> anyhow::Result<ModelFit> {
        anyhow::ensure!(y.len() >= self.min_rows, "singular design ({} rows)", y.len());
        RowCountProvider.fit(y, x, family)
    }
}

/// Always returns an error
#[derive(Debug, Default)]
pub struct AlwaysFails;

impl RegressionProvider for AlwaysFails {
    fn fit(&mut self, _y: &[f64], _x: &DMatrix<f64>, _family: Family) -> anyhow::Result<ModelFit> {
        anyhow::bail!("did not converge")
    }
}

/// Null model remembers its row count; the statistic is the set width
#[derive(Debug, Default)]
pub struct WidthSetTest;

#[allow(clippy::cast_precision_loss)]
impl SetTestProvider for WidthSetTest {
    fn fit_null(&mut self, y: &[f64], covariates: &DMatrix<f64>, _family: Family) -> anyhow::Result<NullModel> {
        anyhow::ensure!(y.len() == covariates.nrows(), "null design mismatch");
        Ok(NullModel(Box::new(y.len())))
    }

    fn test(&mut self, null: &NullModel, genotypes: &DMatrix<f64>, _is_dosage: bool) -> anyhow::Result<SetTestOutcome> {
        let n = null
            .0
            .downcast_ref::<usize>()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("foreign null model"))?;
        anyhow::ensure!(n == genotypes.nrows(), "genotype rows do not match the null model");
        Ok(SetTestOutcome {
            statistic: genotypes.ncols() as f64,
            p_value: 0.01,
        })
    }
}

/// `s0 .. s{n-1}`
pub fn samples(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("s{i}")).collect()
}

/// Variant on chromosome 1 counting allele `T`
pub fn raw(name: &str, values: Vec<f64>) -> RawVariant {
    RawVariant {
        name: name.to_string(),
        chrom: "1".to_string(),
        pos: 1000,
        coded_allele: "T".to_string(),
        other_allele: "C".to_string(),
        values,
    }
}

/// Dosage variant whose frequency is exactly `maf` (no missing calls)
#[allow(clippy::cast_precision_loss)]
pub fn raw_with_maf(name: &str, n_samples: usize, maf: f64) -> RawVariant {
    raw(name, vec![2.0 * maf; n_samples])
}

/// Seeded cohort: hard-call genotypes, two discrete outcomes, one continuous
/// outcome and two covariates
pub struct Cohort {
    pub samples: Vec<String>,
    pub genotypes: MemoryGenotypes,
    pub phenotypes: PhenotypeTable,
}

#[allow(clippy::cast_precision_loss)]
pub fn cohort(seed: u64, n_samples: usize, n_variants: usize) -> Cohort {
    let mut rng = StdRng::seed_from_u64(seed);
    let ids = samples(n_samples);

    let mut genotypes = MemoryGenotypes::new(ids.clone(), false);
    for v in 0..n_variants {
        let p: f64 = rng.gen_range(0.1..0.4);
        let values = (0..n_samples)
            .map(|_| f64::from(u8::from(rng.gen_bool(p))) + f64::from(u8::from(rng.gen_bool(p))))
            .collect();
        genotypes.push(raw(&format!("rs{v}"), values)).unwrap();
    }

    let binary = |rng: &mut StdRng, p: f64| -> Vec<f64> {
        (0..n_samples).map(|_| f64::from(u8::from(rng.gen_bool(p)))).collect()
    };
    let asthma = binary(&mut rng, 0.3);
    let copd = binary(&mut rng, 0.2);
    let sex = binary(&mut rng, 0.5);
    let height: Vec<f64> = (0..n_samples).map(|_| rng.gen_range(150.0..200.0)).collect();
    let age: Vec<f64> = (0..n_samples).map(|_| rng.gen_range(20.0..80.0)).collect();

    let phenotypes = PhenotypeTable::new(
        ids.clone(),
        vec![
            ("asthma".to_string(), asthma),
            ("copd".to_string(), copd),
            ("height".to_string(), height),
            ("age".to_string(), age),
            ("sex".to_string(), sex),
        ],
    )
    .unwrap();

    Cohort {
        samples: ids,
        genotypes,
        phenotypes,
    }
}
