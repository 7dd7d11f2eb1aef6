//! Sample sequence reconciliation
//!
//! Both data sources index samples positionally. Before any task runs the
//! phenotype side is reindexed onto the genotype sample order; this module
//! holds the validation rules shared by every backend.

use crate::{Error, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

/// Ordered sample identifiers shared by both sources
pub type SampleOrder = Vec<String>;

/// Validate a requested sample sequence against the current one
///
/// Samples in `new` but not in `current` are always rejected. Samples in
/// `current` but not in `new` are rejected unless `allow_subset` is set, in
/// which case a warning is logged and the data is narrowed.
///
/// # Errors
/// Returns [`Error::DuplicateSamples`], [`Error::ExtraSamples`] or
/// [`Error::MissingSamples`]
pub fn validate_sample_sequences(current: &[String], new: &[String], allow_subset: bool) -> Result<()> {
    ensure_unique(new)?;

    let known: FxHashSet<&str> = current.iter().map(String::as_str).collect();
    let requested: FxHashSet<&str> = new.iter().map(String::as_str).collect();

    let mut extra: Vec<&str> = requested.difference(&known).copied().collect();
    if !extra.is_empty() {
        extra.sort_unstable();
        return Err(Error::ExtraSamples(summarize(&extra)));
    }

    let missing = known.difference(&requested).count();
    if missing > 0 {
        if !allow_subset {
            return Err(Error::MissingSamples(missing));
        }
        warn!(
            missing,
            "{missing} samples will be dropped to match the requested sample order"
        );
    }

    Ok(())
}

/// Reject duplicated identifiers
///
/// # Errors
/// Returns [`Error::DuplicateSamples`] naming the first repeated sample
pub fn ensure_unique(samples: &[String]) -> Result<()> {
    let mut seen = FxHashSet::default();
    for sample in samples {
        if !seen.insert(sample.as_str()) {
            return Err(Error::DuplicateSamples(sample.clone()));
        }
    }
    Ok(())
}

/// Positions of `new` samples within `current`
///
/// Callers validate first; unknown samples map to a lookup error.
///
/// # Errors
/// Returns [`Error::Lookup`] if a sample is not in `current`
pub fn reindex(current: &[String], new: &[String]) -> Result<Vec<usize>> {
    let position: FxHashMap<&str, usize> = current
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();
    new.iter()
        .map(|s| {
            position.get(s.as_str()).copied().ok_or_else(|| Error::Lookup {
                what: "sample order",
                name: s.clone(),
            })
        })
        .collect()
}

/// Gather values of `data` at `index`
#[must_use]
pub fn take<T: Copy>(data: &[T], index: &[usize]) -> Vec<T> {
    index.iter().map(|&i| data[i]).collect()
}

fn summarize(samples: &[&str]) -> String {
    const SHOWN: usize = 5;
    if samples.len() <= SHOWN {
        samples.join(", ")
    } else {
        format!("{}, ... {} more", samples[..SHOWN].join(", "), samples.len() - SHOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_permutation_is_valid() {
        let current = order(&["a", "b", "c"]);
        assert!(validate_sample_sequences(&current, &order(&["c", "a", "b"]), false).is_ok());
    }

    #[test]
    fn test_extra_samples_always_fail() {
        let current = order(&["a", "b"]);
        let new = order(&["a", "b", "z"]);
        for allow in [false, true] {
            let err = validate_sample_sequences(&current, &new, allow).unwrap_err();
            assert!(matches!(err, Error::ExtraSamples(ref s) if s == "z"));
        }
    }

    #[test]
    fn test_missing_samples_depend_on_subset_flag() {
        let current = order(&["a", "b", "c"]);
        let new = order(&["b"]);
        let err = validate_sample_sequences(&current, &new, false).unwrap_err();
        assert!(matches!(err, Error::MissingSamples(2)));
        assert!(validate_sample_sequences(&current, &new, true).is_ok());
    }

    #[test]
    fn test_duplicates_rejected() {
        let current = order(&["a", "b"]);
        let err = validate_sample_sequences(&current, &order(&["a", "a"]), true).unwrap_err();
        assert!(matches!(err, Error::DuplicateSamples(ref s) if s == "a"));
    }

    #[test]
    fn test_reindex_and_take() {
        let current = order(&["a", "b", "c"]);
        let index = reindex(&current, &order(&["c", "a"])).unwrap();
        assert_eq!(index, vec![2, 0]);
        assert_eq!(take(&[1.0, 2.0, 3.0], &index), vec![3.0, 1.0]);
        assert!(reindex(&current, &order(&["q"])).is_err());
    }

    #[test]
    fn test_extra_sample_message_is_truncated() {
        let current = order(&["a"]);
        let new = order(&["a", "b", "c", "d", "e", "f", "g", "h"]);
        let err = validate_sample_sequences(&current, &new, true).unwrap_err();
        assert!(err.to_string().contains("... 2 more"));
    }
}
