//! Implements the Reduce phase.
//!
//! Reduction is a single pass over pairs that arrive grouped by key: only the statistics of the
//! current run are held, and a run is flushed as soon as a different key shows up (and once more
//! when the input ends). The order of the input is the caller's responsibility; it is normally
//! produced by sorting and merging map output shards.

use std::collections::HashSet;
use std::io::Write;
use std::mem;

use log::{info, warn};
use serde::Serialize;

use crate::error::{ContiguityViolation, InputFault, PipelineError, Result};
use crate::formats::lines::LinesWriter;
use crate::mapreducer::Reducer;
use crate::parameters::InputOrder;
use crate::record_types::{AggregateResult, BucketKey, EmittedPair};
use crate::skips::SkipCounter;

/// Accumulator state of the grouped aggregation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RunState {
    /// No run in progress.
    #[default]
    Idle,
    InRun {
        key: BucketKey,
        total: u64,
        positive: u64,
    },
}

impl RunState {
    /// Applies one pair. Returns the flushed aggregate if the pair closed the previous run.
    pub fn step(&mut self, pair: EmittedPair) -> Option<AggregateResult> {
        let v = pair.indicator.value();
        match self {
            RunState::InRun { key, total, positive } if *key == pair.key => {
                *total += 1;
                *positive += v;
                None
            }
            _ => {
                let next = RunState::InRun {
                    key: pair.key,
                    total: 1,
                    positive: v,
                };
                mem::replace(self, next).into_result()
            }
        }
    }

    /// Ends the run in progress and returns its aggregate.
    pub fn flush(&mut self) -> Option<AggregateResult> {
        mem::take(self).into_result()
    }

    pub fn current_key(&self) -> Option<&BucketKey> {
        match self {
            RunState::Idle => None,
            RunState::InRun { key, .. } => Some(key),
        }
    }

    fn into_result(self) -> Option<AggregateResult> {
        match self {
            RunState::Idle => None,
            RunState::InRun { key, total, positive } => Some(AggregateResult { key, total, positive }),
        }
    }
}

/// Streaming group-by over pairs.
///
/// Precondition: all pairs sharing a key are adjacent in the input. Memory use is constant; if
/// the precondition does not hold, a key is reported once per run it appears in. Use
/// `VerifiedAggregator` to detect that instead.
#[derive(Clone, Debug, Default)]
pub struct GroupedAggregator {
    state: RunState,
}

impl GroupedAggregator {
    pub fn new() -> GroupedAggregator {
        GroupedAggregator::default()
    }
}

impl Reducer for GroupedAggregator {
    fn push(&mut self, pair: EmittedPair) -> std::result::Result<Option<AggregateResult>, ContiguityViolation> {
        Ok(self.state.step(pair))
    }

    fn finish(&mut self) -> Option<AggregateResult> {
        self.state.flush()
    }
}

/// A `GroupedAggregator` that remembers every closed key and fails when one of them shows up
/// again. Memory grows with the number of distinct keys.
#[derive(Clone, Debug, Default)]
pub struct VerifiedAggregator {
    inner: GroupedAggregator,
    closed: HashSet<BucketKey>,
}

impl VerifiedAggregator {
    pub fn new() -> VerifiedAggregator {
        VerifiedAggregator::default()
    }
}

impl Reducer for VerifiedAggregator {
    fn push(&mut self, pair: EmittedPair) -> std::result::Result<Option<AggregateResult>, ContiguityViolation> {
        if self.closed.contains(&pair.key) {
            return Err(ContiguityViolation { key: pair.key });
        }
        let flushed = self.inner.push(pair)?;
        if let Some(r) = &flushed {
            self.closed.insert(r.key.clone());
        }
        Ok(flushed)
    }

    fn finish(&mut self) -> Option<AggregateResult> {
        let flushed = self.inner.finish();
        if let Some(r) = &flushed {
            self.closed.insert(r.key.clone());
        }
        flushed
    }
}

/// The aggregator selected by `InputOrder`.
#[derive(Clone, Debug)]
pub enum Aggregator {
    Grouped(GroupedAggregator),
    Verified(VerifiedAggregator),
}

impl Aggregator {
    pub fn for_order(order: InputOrder) -> Aggregator {
        match order {
            InputOrder::Grouped => Aggregator::Grouped(GroupedAggregator::new()),
            InputOrder::Verified => Aggregator::Verified(VerifiedAggregator::new()),
        }
    }
}

impl Reducer for Aggregator {
    fn push(&mut self, pair: EmittedPair) -> std::result::Result<Option<AggregateResult>, ContiguityViolation> {
        match self {
            Aggregator::Grouped(a) => a.push(pair),
            Aggregator::Verified(a) => a.push(pair),
        }
    }

    fn finish(&mut self) -> Option<AggregateResult> {
        match self {
            Aggregator::Grouped(a) => a.finish(),
            Aggregator::Verified(a) => a.finish(),
        }
    }
}

/// Counters of one reduce partition (or, merged, of a whole reduce phase).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReduceStats {
    pub pairs_read: u64,
    pub groups_emitted: u64,
    pub records_aggregated: u64,
    pub skipped: SkipCounter,
}

impl ReduceStats {
    pub fn merge(&mut self, other: &ReduceStats) {
        self.pairs_read += other.pairs_read;
        self.groups_emitted += other.groups_emitted;
        self.records_aggregated += other.records_aggregated;
        self.skipped.merge(&other.skipped);
    }
}

/// One reduce partition: feeds a stream of pairs through a reducer and writes one output line
/// per aggregate.
pub struct ReducePartition<R: Reducer, In, W: Write>
where
    In: Iterator<Item = std::result::Result<EmittedPair, InputFault>>,
{
    reducer: R,
    input: In,
    output: LinesWriter<W>,
    output_name: String,
    stats: ReduceStats,
}

impl<R: Reducer, In, W: Write> ReducePartition<R, In, W>
where
    In: Iterator<Item = std::result::Result<EmittedPair, InputFault>>,
{
    /// Create a new Reduce partition reading pairs from `input` and writing aggregates to
    /// `output`. `output_name` is used in error messages.
    pub fn new(reducer: R, input: In, output: LinesWriter<W>, output_name: impl Into<String>) -> ReducePartition<R, In, W> {
        ReducePartition {
            reducer,
            input,
            output,
            output_name: output_name.into(),
            stats: ReduceStats::default(),
        }
    }

    /// Run the Reduce partition. Malformed lines are skipped without touching the run in
    /// progress; read errors, write errors and order violations abort.
    pub fn run(mut self, origin: &str) -> Result<(ReduceStats, W)> {
        while let Some(next) = self.input.next() {
            let pair = match next {
                Ok(p) => p,
                Err(InputFault::Malformed { origin, line, source }) => {
                    self.stats.skipped.record(&origin, line, &source);
                    continue;
                }
                Err(f) => return Err(PipelineError::from(f)),
            };
            self.stats.pairs_read += 1;

            match self.reducer.push(pair) {
                Ok(Some(result)) => self.emit(result)?,
                Ok(None) => (),
                Err(ContiguityViolation { key }) => {
                    return Err(PipelineError::Ungrouped {
                        key,
                        position: self.stats.pairs_read,
                    })
                }
            }
        }
        if let Some(result) = self.reducer.finish() {
            self.emit(result)?;
        }

        let out = self
            .output
            .into_inner()
            .map_err(|e| PipelineError::write(self.output_name.clone(), e))?;

        info!(
            "reduce {}: {} pairs, {} groups, {} skipped",
            origin, self.stats.pairs_read, self.stats.groups_emitted, self.stats.skipped.total
        );
        if !self.stats.skipped.is_empty() {
            warn!("reduce {}: skipped lines by kind: {:?}", origin, self.stats.skipped.by_kind);
        }
        Ok((self.stats, out))
    }

    fn emit(&mut self, result: AggregateResult) -> Result<()> {
        self.output
            .write_line(&result)
            .map_err(|e| PipelineError::write(self.output_name.clone(), e))?;
        self.stats.groups_emitted += 1;
        self.stats.records_aggregated += result.total;
        Ok(())
    }
}
