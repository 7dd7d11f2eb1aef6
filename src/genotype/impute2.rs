//! IMPUTE2 dosage backend
//!
//! Each line is `chrom name pos a1 a2` followed by one probability triplet
//! `P(a1/a1) P(a1/a2) P(a2/a2)` per sample. Dosages count `a2`. A triplet of
//! zeros is a missing call. With a probability filter, calls whose best
//! genotype probability is below the threshold become missing.

use super::{load_samples, GenotypeReader, RawVariant, VariantStream};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// IMPUTE2 backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Impute2Config {
    /// `.impute2` genotype file
    pub path: PathBuf,
    /// Sample file, one identifier per line, in column order
    pub samples: PathBuf,
    /// Minimum best-guess probability for a call to be kept
    #[serde(default)]
    pub filter_probability: Option<f64>,
}

/// Streaming IMPUTE2 reader
#[derive(Debug, Clone)]
pub struct Impute2Reader {
    path: PathBuf,
    samples: Vec<String>,
    filter_probability: Option<f64>,
}

impl Impute2Reader {
    /// Open from configuration
    ///
    /// # Errors
    /// Returns error if the sample file cannot be read or the probability
    /// threshold is outside `[0, 1]`
    pub fn from_config(config: &Impute2Config) -> Result<Self> {
        let samples = load_samples(&config.samples)?;
        let mut reader = Self::new(config.path.clone(), samples);
        if let Some(p) = config.filter_probability {
            reader = reader.with_probability_filter(p)?;
        }
        Ok(reader)
    }

    /// Reader over a file with known samples
    #[must_use]
    pub const fn new(path: PathBuf, samples: Vec<String>) -> Self {
        Self {
            path,
            samples,
            filter_probability: None,
        }
    }

    /// Set calls with a best probability below `p` to missing
    ///
    /// # Errors
    /// Returns a configuration error if `p` is outside `[0, 1]`
    pub fn with_probability_filter(mut self, p: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&p) {
            return Err(Error::Configuration(format!(
                "filter_probability must be in [0, 1], got {p}"
            )));
        }
        self.filter_probability = Some(p);
        Ok(self)
    }

    fn parse_line(&self, line_no: usize, line: &str) -> Result<RawVariant> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let expected = 5 + 3 * self.samples.len();
        if fields.len() != expected {
            return Err(Error::InvalidInput(format!(
                "{}:{line_no}: expected {expected} fields, found {}",
                self.path.display(),
                fields.len()
            )));
        }

        let pos = fields[2].parse::<u64>().map_err(|e| {
            Error::InvalidInput(format!("{}:{line_no}: bad position: {e}", self.path.display()))
        })?;

        let mut values = Vec::with_capacity(self.samples.len());
        for triplet in fields[5..].chunks_exact(3) {
            let mut probs = [0.0f64; 3];
            for (p, raw) in probs.iter_mut().zip(triplet) {
                *p = raw.parse::<f64>().map_err(|e| {
                    Error::InvalidInput(format!(
                        "{}:{line_no}: bad probability '{raw}': {e}",
                        self.path.display()
                    ))
                })?;
            }
            values.push(self.dosage(probs));
        }

        Ok(RawVariant {
            name: fields[1].to_string(),
            chrom: fields[0].to_string(),
            pos,
            coded_allele: fields[4].to_string(),
            other_allele: fields[3].to_string(),
            values,
        })
    }

    fn dosage(&self, [p_aa, p_ab, p_bb]: [f64; 3]) -> f64 {
        let best = p_aa.max(p_ab).max(p_bb);
        if best <= 0.0 {
            return f64::NAN;
        }
        if let Some(threshold) = self.filter_probability {
            if best < threshold {
                return f64::NAN;
            }
        }
        p_ab + 2.0 * p_bb
    }
}

impl GenotypeReader for Impute2Reader {
    fn samples(&self) -> &[String] {
        &self.samples
    }

    fn is_dosage(&self) -> bool {
        true
    }

    fn variants(&mut self) -> Result<VariantStream<'_>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let this = &*self;
        Ok(Box::new(
            reader
                .lines()
                .enumerate()
                .filter(|(_, line)| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
                .map(move |(i, line)| this.parse_line(i + 1, &line?)),
        ))
    }
}
