//! PLINK binary backend (`.bed` / `.bim` / `.fam`, SNP-major)

use super::{GenotypeReader, RawVariant, VariantStream};
use crate::{Error, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

const BED_MAGIC: [u8; 3] = [0x6c, 0x1b, 0x01];

#[derive(Debug, Clone)]
struct BimRecord {
    chrom: String,
    name: String,
    pos: u64,
    allele1: String,
    allele2: String,
}

/// Hard-call reader over a PLINK fileset prefix
#[derive(Debug, Clone)]
pub struct PlinkReader {
    bed: PathBuf,
    samples: Vec<String>,
    bim: Vec<BimRecord>,
}

impl PlinkReader {
    /// Open `<prefix>.bed`, `<prefix>.bim` and `<prefix>.fam`
    ///
    /// # Errors
    /// Returns error if a file is missing or malformed
    pub fn open<P: AsRef<Path>>(prefix: P) -> Result<Self> {
        let prefix = prefix.as_ref();
        let with_ext = |ext: &str| {
            let mut p = prefix.as_os_str().to_owned();
            p.push(ext);
            PathBuf::from(p)
        };

        let samples = std::fs::read_to_string(with_ext(".fam"))?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                line.split_whitespace().nth(1).map(str::to_string).ok_or_else(|| {
                    Error::InvalidInput(format!("fam line {}: missing individual id", i + 1))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let bim = std::fs::read_to_string(with_ext(".bim"))?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .enumerate()
            .map(|(i, line)| parse_bim(i + 1, line))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            bed: with_ext(".bed"),
            samples,
            bim,
        })
    }

    /// Bytes per variant in the bed file
    fn stride(&self) -> usize {
        self.samples.len().div_ceil(4)
    }
}

fn parse_bim(line_no: usize, line: &str) -> Result<BimRecord> {
    let f: Vec<&str> = line.split_whitespace().collect();
    if f.len() != 6 {
        return Err(Error::InvalidInput(format!(
            "bim line {line_no}: expected 6 fields, found {}",
            f.len()
        )));
    }
    let pos = f[3]
        .parse::<u64>()
        .map_err(|e| Error::InvalidInput(format!("bim line {line_no}: bad position: {e}")))?;
    Ok(BimRecord {
        chrom: f[0].to_string(),
        name: f[1].to_string(),
        pos,
        allele1: f[4].to_string(),
        allele2: f[5].to_string(),
    })
}

/// Decode one SNP-major block into allele1 counts
fn decode(block: &[u8], n_samples: usize) -> Vec<f64> {
    (0..n_samples)
        .map(|i| match (block[i / 4] >> (2 * (i % 4))) & 0b11 {
            0b00 => 2.0,
            0b10 => 1.0,
            0b11 => 0.0,
            _ => f64::NAN,
        })
        .collect()
}

impl GenotypeReader for PlinkReader {
    fn samples(&self) -> &[String] {
        &self.samples
    }

    fn is_dosage(&self) -> bool {
        false
    }

    fn variants(&mut self) -> Result<VariantStream<'_>> {
        let mut reader = BufReader::new(File::open(&self.bed)?);
        let mut magic = [0u8; 3];
        reader.read_exact(&mut magic)?;
        if magic != BED_MAGIC {
            return Err(Error::InvalidInput(format!(
                "{} is not a SNP-major PLINK bed file",
                self.bed.display()
            )));
        }

        let n_samples = self.samples.len();
        let mut block = vec![0u8; self.stride()];
        Ok(Box::new(self.bim.iter().map(move |record| {
            reader.read_exact(&mut block).map_err(|e| {
                Error::InvalidInput(format!("bed file truncated at variant {}: {e}", record.name))
            })?;
            Ok(RawVariant {
                name: record.name.clone(),
                chrom: record.chrom.clone(),
                pos: record.pos,
                coded_allele: record.allele1.clone(),
                other_allele: record.allele2.clone(),
                values: decode(&block, n_samples),
            })
        })))
    }
}
