//! Genotype sources
//!
//! A [`GenotypeDatabase`] wraps a [`GenotypeReader`] backend and collects
//! filter configuration. [`GenotypeDatabase::experiment_init`] consumes the
//! builder, streams the backend once, applies the filters and returns a
//! [`FrozenGenotypes`] together with a populated [`VariantCatalog`]. Only the
//! frozen type can serve genotype vectors, and it has no filter methods:
//!
//! ```compile_fail
//! use phewas_engine::genotype::{GenotypeDatabase, MemoryGenotypes, VariantCatalog};
//!
//! let db = GenotypeDatabase::new(Box::new(MemoryGenotypes::new(vec![], false)));
//! let mut catalog = VariantCatalog::new();
//! let frozen = db.experiment_init(&mut catalog).unwrap();
//! frozen.filter_by_maf(0.05);
//! ```

mod catalog;
mod impute2;
mod memory;
mod plink;

pub use catalog::{Variant, VariantCatalog, VARIANTS_TABLE, VARIANT_FIELDS};
pub use impute2::{Impute2Config, Impute2Reader};
pub use memory::MemoryGenotypes;
pub use plink::PlinkReader;

use crate::sample_order::{self, SampleOrder};
use crate::{Error, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default number of variants per catalog insert
pub const DEFAULT_BATCH_INSERT_N: usize = 100_000;

/// One variant as streamed from a backend
#[derive(Debug, Clone, PartialEq)]
pub struct RawVariant {
    /// Identifier
    pub name: String,
    /// Chromosome
    pub chrom: String,
    /// Position
    pub pos: u64,
    /// Allele whose copies are counted in `values`
    pub coded_allele: String,
    /// The other allele
    pub other_allele: String,
    /// Coded allele count or dosage per sample, non-finite when missing
    pub values: Vec<f64>,
}

/// Boxed stream of variants
pub type VariantStream<'a> = Box<dyn Iterator<Item = Result<RawVariant>> + 'a>;

/// Backend providing variant-by-sample data
pub trait GenotypeReader: Send {
    /// Samples in the order of each variant's `values`
    fn samples(&self) -> &[String];

    /// True when values are dosages rather than hard calls
    fn is_dosage(&self) -> bool;

    /// Stream every variant once
    ///
    /// # Errors
    /// Returns error if the underlying data cannot be opened
    fn variants(&mut self) -> Result<VariantStream<'_>>;
}

/// Variant name filter source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NameFilter {
    /// Explicit names
    List(Vec<String>),
    /// File with one name per line
    File(PathBuf),
}

impl NameFilter {
    fn resolve(&self) -> Result<FxHashSet<String>> {
        match self {
            Self::List(names) => Ok(names.iter().map(|n| n.trim().to_string()).collect()),
            Self::File(path) => Ok(load_samples(path)?.into_iter().collect()),
        }
    }
}

/// Declarative genotype filter configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenotypeConfig {
    /// Keep only these variants
    #[serde(default)]
    pub filter_name: Option<NameFilter>,
    /// Minimum minor allele frequency
    #[serde(default)]
    pub filter_maf: Option<f64>,
    /// Minimum completion rate
    #[serde(default)]
    pub filter_completion: Option<f64>,
    /// Samples removed before reconciliation
    #[serde(default)]
    pub exclude_samples: Vec<String>,
    /// Catalog insert batch size
    #[serde(default)]
    pub batch_insert_n: Option<usize>,
}

/// Read a list of identifiers, one per line (blank lines ignored)
///
/// # Errors
/// Returns error if the file cannot be read
pub fn load_samples<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path.as_ref())?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Genotype source in its configurable state
pub struct GenotypeDatabase {
    reader: Box<dyn GenotypeReader>,
    names: Option<FxHashSet<String>>,
    maf: Option<f64>,
    completion: Option<f64>,
    excluded: FxHashSet<String>,
    batch_insert_n: usize,
}

impl std::fmt::Debug for GenotypeDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenotypeDatabase")
            .field("n_samples", &self.reader.samples().len())
            .field("names", &self.names.as_ref().map(FxHashSet::len))
            .field("maf", &self.maf)
            .field("completion", &self.completion)
            .field("excluded", &self.excluded.len())
            .finish_non_exhaustive()
    }
}

impl GenotypeDatabase {
    /// Wrap a backend with no filters
    #[must_use]
    pub fn new(reader: Box<dyn GenotypeReader>) -> Self {
        Self {
            reader,
            names: None,
            maf: None,
            completion: None,
            excluded: FxHashSet::default(),
            batch_insert_n: DEFAULT_BATCH_INSERT_N,
        }
    }

    /// Apply every field of a configuration struct
    ///
    /// # Errors
    /// Returns the first filter validation error
    pub fn with_config(&mut self, config: &GenotypeConfig) -> Result<&mut Self> {
        if let Some(names) = &config.filter_name {
            self.filter_by_name(names)?;
        }
        if let Some(maf) = config.filter_maf {
            self.filter_by_maf(maf)?;
        }
        if let Some(rate) = config.filter_completion {
            self.filter_by_completion(rate)?;
        }
        if !config.exclude_samples.is_empty() {
            self.exclude_samples(&config.exclude_samples)?;
        }
        if let Some(n) = config.batch_insert_n {
            self.batch_insert_n(n)?;
        }
        Ok(self)
    }

    /// Keep only the named variants (repeated calls intersect)
    ///
    /// # Errors
    /// Returns error if a name file cannot be read
    pub fn filter_by_name(&mut self, filter: &NameFilter) -> Result<&mut Self> {
        let names = filter.resolve()?;
        self.names = Some(match self.names.take() {
            Some(previous) => previous.intersection(&names).cloned().collect(),
            None => names,
        });
        Ok(self)
    }

    /// Keep variants with `maf >= threshold`
    ///
    /// # Errors
    /// Returns a configuration error if the threshold is outside `[0, 0.5]`
    pub fn filter_by_maf(&mut self, threshold: f64) -> Result<&mut Self> {
        if !(0.0..=0.5).contains(&threshold) {
            return Err(Error::Configuration(format!(
                "MAF threshold must be in [0, 0.5], got {threshold}"
            )));
        }
        self.maf = Some(self.maf.map_or(threshold, |m| m.max(threshold)));
        Ok(self)
    }

    /// Keep variants with `completion_rate >= rate`
    ///
    /// # Errors
    /// Returns a configuration error if the rate is outside `[0, 1]`
    pub fn filter_by_completion(&mut self, rate: f64) -> Result<&mut Self> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(Error::Configuration(format!(
                "Completion rate must be in [0, 1], got {rate}"
            )));
        }
        self.completion = Some(self.completion.map_or(rate, |c| c.max(rate)));
        Ok(self)
    }

    /// Drop samples column-wise
    ///
    /// # Errors
    /// Returns a lookup error for unknown samples and
    /// [`Error::DuplicateSamples`] when a sample is ambiguous in the backend
    pub fn exclude_samples(&mut self, samples: &[String]) -> Result<&mut Self> {
        let known = self.reader.samples();
        for sample in samples {
            match known.iter().filter(|s| *s == sample).count() {
                0 => {
                    return Err(Error::Lookup {
                        what: "genotype sample list",
                        name: sample.clone(),
                    })
                }
                1 => {}
                _ => return Err(Error::DuplicateSamples(sample.clone())),
            }
        }
        self.excluded.extend(samples.iter().cloned());
        Ok(self)
    }

    /// Catalog insert batch size
    ///
    /// # Errors
    /// Returns a configuration error for a zero batch size
    pub fn batch_insert_n(&mut self, n: usize) -> Result<&mut Self> {
        if n == 0 {
            return Err(Error::Configuration("batch_insert_n must be positive".to_string()));
        }
        self.batch_insert_n = n;
        Ok(self)
    }

    /// Sample order after exclusions
    #[must_use]
    pub fn sample_order(&self) -> SampleOrder {
        self.reader
            .samples()
            .iter()
            .filter(|s| !self.excluded.contains(*s))
            .cloned()
            .collect()
    }

    /// Freeze: stream the backend, filter, and populate the catalog
    ///
    /// Filters run in order name, completion, allele frequency, on the
    /// vector restricted to non-excluded samples. Alleles are flipped so the
    /// counted allele is the minor one.
    ///
    /// # Errors
    /// Returns [`Error::CatalogAlreadyPopulated`] if the catalog has rows,
    /// [`Error::InvalidInput`] for a variant without one value per sample,
    /// or any backend error
    pub fn experiment_init(mut self, catalog: &mut VariantCatalog) -> Result<FrozenGenotypes> {
        if !catalog.is_empty() {
            return Err(Error::CatalogAlreadyPopulated(catalog.len()));
        }
        if catalog.is_sealed() {
            return Err(Error::FrozenDatabase);
        }

        let samples = self.sample_order();
        sample_order::ensure_unique(&samples)?;
        let keep = sample_order::reindex(self.reader.samples(), &samples)?;
        let is_dosage = self.reader.is_dosage();
        let filters = Filters {
            names: self.names.take(),
            maf: self.maf,
            completion: self.completion,
        };
        let batch_n = self.batch_insert_n;
        let n_reader_samples = self.reader.samples().len();

        let mut index: FxHashMap<String, usize> = FxHashMap::default();
        let mut genotypes: Vec<Vec<f64>> = Vec::new();
        let mut pending: Vec<Variant> = Vec::with_capacity(batch_n.min(DEFAULT_BATCH_INSERT_N));
        let mut n_seen = 0usize;

        for raw in self.reader.variants()? {
            let raw = raw?;
            n_seen += 1;
            if raw.values.len() != n_reader_samples {
                return Err(Error::InvalidInput(format!(
                    "Variant '{}' has {} values for {n_reader_samples} samples",
                    raw.name,
                    raw.values.len()
                )));
            }
            let Some((variant, values)) = filters.apply(raw, &keep) else {
                continue;
            };
            if index.contains_key(&variant.name) {
                return Err(Error::InvalidInput(format!(
                    "Variant '{}' appears more than once in the genotype data",
                    variant.name
                )));
            }
            index.insert(variant.name.clone(), genotypes.len());
            genotypes.push(values);
            pending.push(variant);

            if pending.len() >= batch_n {
                catalog.insert_batch(&pending)?;
                debug!(inserted = pending.len(), total = catalog.len(), "variant batch inserted");
                pending.clear();
            }
        }
        catalog.insert_batch(&pending)?;
        catalog.seal();

        info!(
            read = n_seen,
            kept = genotypes.len(),
            samples = samples.len(),
            "genotype database frozen"
        );

        let names = {
            let mut names = vec![String::new(); index.len()];
            for (name, &i) in &index {
                names[i].clone_from(name);
            }
            names
        };

        Ok(FrozenGenotypes {
            samples,
            is_dosage,
            index,
            names,
            genotypes,
        })
    }
}

struct Filters {
    names: Option<FxHashSet<String>>,
    maf: Option<f64>,
    completion: Option<f64>,
}

impl Filters {
    // Negated comparisons drop NaN statistics (all calls missing)
    #[allow(clippy::cast_precision_loss, clippy::neg_cmp_op_on_partial_ord)]
    fn apply(&self, raw: RawVariant, keep: &[usize]) -> Option<(Variant, Vec<f64>)> {
        if let Some(names) = &self.names {
            if !names.contains(&raw.name) {
                return None;
            }
        }

        let mut values = sample_order::take(&raw.values, keep);
        let (n_non_missing, sum) = values
            .iter()
            .filter(|v| v.is_finite())
            .fold((0u64, 0.0), |(n, s), v| (n + 1, s + v));
        let n_missing = values.len() as u64 - n_non_missing;

        let mut variant = Variant {
            name: raw.name,
            chrom: raw.chrom,
            pos: raw.pos,
            minor_allele_count: sum,
            minor: raw.coded_allele,
            major: raw.other_allele,
            n_missing,
            n_non_missing,
        };

        if let Some(rate) = self.completion {
            if !(variant.completion_rate() >= rate) {
                return None;
            }
        }

        if variant.maf() > 0.5 {
            for v in values.iter_mut().filter(|v| v.is_finite()) {
                *v = 2.0 - *v;
            }
            variant.minor_allele_count = 2.0 * n_non_missing as f64 - sum;
            std::mem::swap(&mut variant.minor, &mut variant.major);
        }

        if let Some(maf) = self.maf {
            if !(variant.maf() >= maf) {
                return None;
            }
        }

        Some((variant, values))
    }
}

/// Genotype source after freezing: read-only random access
#[derive(Debug, Clone)]
pub struct FrozenGenotypes {
    samples: SampleOrder,
    is_dosage: bool,
    index: FxHashMap<String, usize>,
    names: Vec<String>,
    genotypes: Vec<Vec<f64>>,
}

impl FrozenGenotypes {
    /// Sample order of every genotype vector
    #[must_use]
    pub fn sample_order(&self) -> &[String] {
        &self.samples
    }

    /// True when vectors hold dosages
    #[must_use]
    pub const fn is_dosage(&self) -> bool {
        self.is_dosage
    }

    /// Retained variant names in catalog order
    #[must_use]
    pub fn variant_names(&self) -> &[String] {
        &self.names
    }

    /// Number of retained variants
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when no variant survived the filters
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// True if the variant survived the filters
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Genotype vector of a variant, aligned on [`Self::sample_order`]
    ///
    /// # Errors
    /// Returns a lookup error for unknown names
    pub fn get_genotypes(&self, name: &str) -> Result<&[f64]> {
        self.index
            .get(name)
            .map(|&i| self.genotypes[i].as_slice())
            .ok_or_else(|| Error::unknown_variant(name))
    }

    /// Projection query on the catalog populated at freeze time
    ///
    /// # Errors
    /// Returns [`Error::UnknownField`] for unknown fields
    pub fn query_variants(
        &self,
        catalog: &VariantCatalog,
        fields: Option<&[&str]>,
    ) -> Result<arrow::array::RecordBatch> {
        catalog.query(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, values: Vec<f64>) -> RawVariant {
        RawVariant {
            name: name.to_string(),
            chrom: "1".to_string(),
            pos: 1,
            coded_allele: "A".to_string(),
            other_allele: "G".to_string(),
            values,
        }
    }

    fn samples(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("s{i}")).collect()
    }

    fn database(variants: Vec<RawVariant>, n: usize) -> GenotypeDatabase {
        GenotypeDatabase::new(Box::new(MemoryGenotypes::new(samples(n), false).with_variants(variants).unwrap()))
    }

    #[test]
    fn test_freeze_populates_catalog() {
        let db = database(vec![raw("rs1", vec![0.0, 1.0, 2.0]), raw("rs2", vec![0.0, 0.0, 1.0])], 3);
        let mut catalog = VariantCatalog::new();
        let frozen = db.experiment_init(&mut catalog).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.is_sealed());
        assert_eq!(frozen.get_genotypes("rs2").unwrap(), &[0.0, 0.0, 1.0]);
        assert_eq!(frozen.variant_names(), &["rs1".to_string(), "rs2".to_string()]);
    }

    #[test]
    fn test_second_init_against_populated_catalog_fails() {
        let mut catalog = VariantCatalog::new();
        database(vec![raw("rs1", vec![0.0, 1.0])], 2)
            .experiment_init(&mut catalog)
            .unwrap();
        let err = database(vec![raw("rs1", vec![0.0, 1.0])], 2)
            .experiment_init(&mut catalog)
            .unwrap_err();
        assert!(matches!(err, Error::CatalogAlreadyPopulated(1)));
        assert!(err.is_state_error());
    }

    #[test]
    fn test_minor_allele_flip() {
        let db = database(vec![raw("rs1", vec![2.0, 2.0, 1.0, f64::NAN])], 4);
        let mut catalog = VariantCatalog::new();
        let frozen = db.experiment_init(&mut catalog).unwrap();
        let v = catalog.get("rs1").unwrap();
        assert_eq!(v.minor, "G");
        assert_eq!(v.major, "A");
        assert!((v.minor_allele_count - 1.0).abs() < 1e-12);
        let g = frozen.get_genotypes("rs1").unwrap();
        assert_eq!(&g[..3], &[0.0, 0.0, 1.0]);
        assert!(g[3].is_nan());
    }

    #[test]
    fn test_threshold_validation() {
        let mut db = database(vec![], 1);
        assert!(db.filter_by_maf(0.6).is_err());
        assert!(db.filter_by_completion(-0.1).is_err());
        assert!(db.batch_insert_n(0).is_err());
        assert!(db.filter_by_maf(0.5).is_ok());
    }

    #[test]
    fn test_exclude_samples_rules() {
        let mut db = database(vec![raw("rs1", vec![0.0, 1.0, 2.0])], 3);
        assert!(matches!(
            db.exclude_samples(&["nobody".to_string()]).unwrap_err(),
            Error::Lookup { .. }
        ));
        db.exclude_samples(&["s1".to_string()]).unwrap();
        assert_eq!(db.sample_order(), vec!["s0".to_string(), "s2".to_string()]);

        let mut catalog = VariantCatalog::new();
        let frozen = db.experiment_init(&mut catalog).unwrap();
        assert_eq!(frozen.get_genotypes("rs1").unwrap(), &[0.0, 2.0]);
    }

    #[test]
    fn test_exclude_ambiguous_sample() {
        let reader = MemoryGenotypes::new(
            vec!["a".to_string(), "a".to_string(), "b".to_string()],
            false,
        );
        let mut db = GenotypeDatabase::new(Box::new(reader));
        let err = db.exclude_samples(&["a".to_string()]).unwrap_err();
        assert!(matches!(err, Error::DuplicateSamples(_)));
    }

    struct Ragged {
        samples: Vec<String>,
        variants: Vec<RawVariant>,
    }

    impl GenotypeReader for Ragged {
        fn samples(&self) -> &[String] {
            &self.samples
        }

        fn is_dosage(&self) -> bool {
            false
        }

        fn variants(&mut self) -> Result<VariantStream<'_>> {
            Ok(Box::new(self.variants.iter().cloned().map(Ok)))
        }
    }

    #[test]
    fn test_freeze_rejects_vectors_not_matching_samples() {
        let reader = Ragged {
            samples: samples(3),
            variants: vec![raw("rs1", vec![0.0, 1.0, 2.0]), raw("rs2", vec![1.0, 1.0])],
        };
        let mut catalog = VariantCatalog::new();
        let err = GenotypeDatabase::new(Box::new(reader))
            .experiment_init(&mut catalog)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(ref msg) if msg.contains("rs2")));
    }

    #[test]
    fn test_small_batches_insert_everything() {
        let variants = (0..7).map(|i| raw(&format!("rs{i}"), vec![0.0, 1.0])).collect();
        let mut db = database(variants, 2);
        db.batch_insert_n(2).unwrap();
        let mut catalog = VariantCatalog::new();
        db.experiment_init(&mut catalog).unwrap();
        assert_eq!(catalog.len(), 7);
        assert_eq!(catalog.table().batches().len(), 4);
    }

    #[test]
    fn test_name_filters_intersect_and_trim() {
        let variants = vec![raw("rs1", vec![1.0]), raw("rs2", vec![1.0]), raw("rs3", vec![1.0])];
        let mut db = database(variants, 1);
        db.filter_by_name(&NameFilter::List(vec![" rs1 ".into(), "rs2".into()]))
            .unwrap()
            .filter_by_name(&NameFilter::List(vec!["rs2".into(), "rs3".into()]))
            .unwrap();
        let mut catalog = VariantCatalog::new();
        let frozen = db.experiment_init(&mut catalog).unwrap();
        assert_eq!(frozen.variant_names(), &["rs2".to_string()]);
    }

    #[test]
    fn test_unknown_variant_lookup() {
        let mut catalog = VariantCatalog::new();
        let frozen = database(vec![], 2).experiment_init(&mut catalog).unwrap();
        let err = frozen.get_genotypes("rs404").unwrap_err();
        assert!(err.to_string().contains("rs404"));
        assert!(frozen.is_empty());
    }

    #[test]
    fn test_config_rejects_unknown_keys() {
        let ok: GenotypeConfig =
            serde_json::from_str(r#"{"filter_maf": 0.05, "filter_name": ["rs1"]}"#).unwrap();
        assert_eq!(ok.filter_maf, Some(0.05));
        assert_eq!(ok.filter_name, Some(NameFilter::List(vec!["rs1".into()])));

        let file: GenotypeConfig = serde_json::from_str(r#"{"filter_name": "names.txt"}"#).unwrap();
        assert_eq!(file.filter_name, Some(NameFilter::File(PathBuf::from("names.txt"))));

        assert!(serde_json::from_str::<GenotypeConfig>(r#"{"test": 0.05}"#).is_err());
    }
}
