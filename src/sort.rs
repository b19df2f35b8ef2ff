//! Sorting/comparison functions for intermediate data.
//!
//! Map output shards are written in input order; before a reduce partition can run, each shard
//! is sorted by key so that its pairs form runs. The merge step then keeps that order across
//! shards.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{InputFault, PipelineError, Result};
use crate::formats::lines::{self, LinesWriter};
use crate::formats::util::PairReader;
use crate::record_types::EmittedPair;
use crate::skips::SkipCounter;

/// Function type to be used as custom compare function.
pub type Comparer<T> = fn(a: &T, b: &T) -> Ordering;

/// Comparer<T: Ord>
#[inline]
pub fn default_generic_compare<T: Ord>(a: &T, b: &T) -> Ordering {
    a.cmp(b)
}

/// Orders pairs by key, then indicator.
#[inline]
pub fn pair_compare(a: &EmittedPair, b: &EmittedPair) -> Ordering {
    a.key.cmp(&b.key).then(a.indicator.cmp(&b.indicator))
}

/// Orders items of a pair stream: faults first (so they are reported as soon as they are
/// seen), then pairs by `pair_compare`.
#[inline]
pub fn faults_first(a: &std::result::Result<EmittedPair, InputFault>, b: &std::result::Result<EmittedPair, InputFault>) -> Ordering {
    match (a, b) {
        (Ok(a), Ok(b)) => pair_compare(a, b),
        (Err(_), Ok(_)) => Ordering::Less,
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Err(_)) => Ordering::Equal,
    }
}

/// Sorts the pairs of one intermediate shard file in place. Lines that do not parse are
/// dropped and counted in `skips`; a read or write failure aborts.
/// Returns the number of pairs written back.
pub fn sort_shard_file(path: &Path, skips: &mut SkipCounter) -> Result<u64> {
    let origin = path.display().to_string();
    let reader = lines::new_from_file(path).map_err(|e| PipelineError::Filesystem {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut pairs = Vec::new();
    for item in PairReader::new(reader, origin.clone()) {
        match item {
            Ok(p) => pairs.push(p),
            Err(InputFault::Malformed { line, source, .. }) => skips.record(&origin, line, &source),
            Err(f) => return Err(PipelineError::from(f)),
        }
    }
    pairs.sort_by(pair_compare);

    let mut out = LinesWriter::new_to_file(path).map_err(|e| PipelineError::write(origin.clone(), e))?;
    for p in &pairs {
        out.write_line(p).map_err(|e| PipelineError::write(origin.clone(), e))?;
    }
    out.flush().map_err(|e| PipelineError::write(origin.clone(), e))?;

    debug!("sorted {} ({} pairs)", origin, pairs.len());
    Ok(pairs.len() as u64)
}

/// Removes a file, ignoring a file that does not exist.
pub fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
