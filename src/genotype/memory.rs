//! In-memory genotype backend

use super::{GenotypeReader, RawVariant, VariantStream};
use crate::{Error, Result};

/// Variants held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryGenotypes {
    samples: Vec<String>,
    is_dosage: bool,
    variants: Vec<RawVariant>,
}

impl MemoryGenotypes {
    /// Empty backend over a sample list
    #[must_use]
    pub const fn new(samples: Vec<String>, is_dosage: bool) -> Self {
        Self {
            samples,
            is_dosage,
            variants: Vec::new(),
        }
    }

    /// Add variants (builder style)
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if a variant does not hold exactly one
    /// value per sample
    pub fn with_variants(mut self, variants: Vec<RawVariant>) -> Result<Self> {
        for variant in variants {
            self.push(variant)?;
        }
        Ok(self)
    }

    /// Add one variant
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if the variant does not hold exactly
    /// one value per sample
    pub fn push(&mut self, variant: RawVariant) -> Result<()> {
        if variant.values.len() != self.samples.len() {
            return Err(Error::InvalidInput(format!(
                "Variant '{}' has {} values for {} samples",
                variant.name,
                variant.values.len(),
                self.samples.len()
            )));
        }
        self.variants.push(variant);
        Ok(())
    }
}

impl GenotypeReader for MemoryGenotypes {
    fn samples(&self) -> &[String] {
        &self.samples
    }

    fn is_dosage(&self) -> bool {
        self.is_dosage
    }

    fn variants(&mut self) -> Result<VariantStream<'_>> {
        Ok(Box::new(self.variants.iter().cloned().map(Ok)))
    }
}
