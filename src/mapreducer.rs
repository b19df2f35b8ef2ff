//! The Mapper, Reducer and Sharder traits.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::{ContiguityViolation, LineError};
use crate::record_types::{AggregateResult, BucketKey, EmittedPair, Record};

/// Default sharding function.
pub fn std_shard(n: usize, key: &BucketKey) -> usize {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    (h.finish() % n as u64) as usize
}

/// What a mapper made of one input line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mapped {
    Pair(EmittedPair),
    /// The column header line.
    Header,
    /// An empty (or whitespace-only) line.
    Blank,
}

pub trait Mapper: Send + Clone {
    /// Turns one input line into at most one pair.
    ///
    /// Note that this method takes a &mut self; you can use this to cache expensive objects
    /// between lines (but not between shards!)
    fn map(&mut self, record: &Record) -> Result<Mapped, LineError>;
}

/// A streaming fold over pairs that arrive grouped by key.
pub trait Reducer: Send {
    /// Consumes one pair. Returns the aggregate of the previous run if this pair started a
    /// new one.
    fn push(&mut self, pair: EmittedPair) -> Result<Option<AggregateResult>, ContiguityViolation>;

    /// Flushes the run in progress, if any. Must be called once the input is exhausted.
    fn finish(&mut self) -> Option<AggregateResult>;
}

pub trait Sharder: Send + Clone {
    /// Determines how to map keys to (reduce) shards.
    /// Returns a number in [0; n) determining the shard the key belongs in.
    /// The default implementation uses the std hasher and modulo.
    fn shard(&self, n: usize, key: &BucketKey) -> usize {
        std_shard(n, key)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSharder;

impl Sharder for DefaultSharder {}
