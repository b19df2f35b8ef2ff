//! Buckets patient records by age and cholesterol range and computes, per bucket, how many
//! records show heart disease.
//!
//! The computation is a mapreduce process bounded to one machine: `map` turns CSV lines into
//! `(bucket key, indicator)` pairs, the controller shards and sorts them, and `reduce` runs a
//! streaming group-by over each sorted shard.
//!

pub mod buckets;
pub mod controller;
pub mod error;
pub mod formats;
pub mod input_cache;
pub mod map;
pub mod mapreducer;
pub mod parameters;
pub mod record_types;
pub mod reduce;
pub mod shard_merge;
pub mod skips;
pub mod sort;
