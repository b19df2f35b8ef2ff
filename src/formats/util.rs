//! Various iterators/adapters used for input/output formats.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::{InputFault, LineError};
use crate::formats::lines::{is_not_utf8, LinesWriter};
use crate::record_types::{EmittedPair, Record};

/// Transforms an iterator over lines into an iterator over Records numbered by their position
/// in the source, starting with 1. A read error is reported with the number of the last line
/// that was read successfully; a line that is not UTF-8 is a malformed record at its own number.
pub struct PosRecordIterator<I: Iterator<Item = io::Result<String>>> {
    i: I,
    origin: String,
    counter: u64,
}

impl<I: Iterator<Item = io::Result<String>>> PosRecordIterator<I> {
    pub fn new(it: I, origin: impl Into<String>) -> PosRecordIterator<I> {
        PosRecordIterator {
            i: it,
            origin: origin.into(),
            counter: 0,
        }
    }
}

impl<I: Iterator<Item = io::Result<String>>> Iterator for PosRecordIterator<I> {
    type Item = Result<Record, InputFault>;
    fn next(&mut self) -> Option<Self::Item> {
        match self.i.next()? {
            Err(e) if is_not_utf8(&e) => {
                self.counter += 1;
                Some(Err(InputFault::Malformed {
                    origin: self.origin.clone(),
                    line: self.counter,
                    source: LineError::Encoding,
                }))
            }
            Err(e) => Some(Err(InputFault::Io {
                origin: self.origin.clone(),
                line: self.counter,
                source: e,
            })),
            Ok(val) => {
                self.counter += 1;
                Some(Ok(Record::new(self.counter, val)))
            }
        }
    }
}

/// Parses intermediate `key<TAB>indicator` lines. Blank lines are passed over silently;
/// lines that do not parse are yielded as `InputFault::Malformed` so the consumer can count them.
pub struct PairReader<I: Iterator<Item = io::Result<String>>> {
    records: PosRecordIterator<I>,
}

impl<I: Iterator<Item = io::Result<String>>> PairReader<I> {
    pub fn new(it: I, origin: impl Into<String>) -> PairReader<I> {
        PairReader {
            records: PosRecordIterator::new(it, origin),
        }
    }
}

impl<I: Iterator<Item = io::Result<String>>> Iterator for PairReader<I> {
    type Item = Result<EmittedPair, InputFault>;
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.records.next()? {
                Err(f) => return Some(Err(f)),
                Ok(r) => r,
            };
            if record.value.trim().is_empty() {
                continue;
            }
            return Some(record.value.parse().map_err(|e| InputFault::Malformed {
                origin: self.records.origin.clone(),
                line: record.line,
                source: e,
            }));
        }
    }
}

/// A type implementing SinkGenerator is used to create the outputs of both phases. Given a
/// path, new_output() returns a writer for one map output shard or one reduce partition.
pub trait SinkGenerator: Send + Sync + Clone {
    type Sink: io::Write;

    /// Return a new intermediary file handle destined for reduce shard `shard` and requested by
    /// map shard `mapper`.
    fn new_map_output(&self, location: &Path, mapper: usize, shard: usize) -> io::Result<LinesWriter<Self::Sink>> {
        self.new_output(&map_output_name(location, mapper, shard))
    }

    /// Return a new file handle for `location`.
    fn new_output(&self, location: &Path) -> io::Result<LinesWriter<Self::Sink>>;
}

pub fn map_output_name(location: &Path, mapper: usize, shard: usize) -> PathBuf {
    location.join(format!("mapout_{}.{}", mapper, shard))
}

/// Calculates the name of a reduce output shard.
pub fn reduce_output_name(prefix: &str, shard: usize) -> PathBuf {
    PathBuf::from(format!("{}{}", prefix, shard))
}

/// The name a reduce output is written under until the shard completed.
pub fn pending_output_name(final_name: &Path) -> PathBuf {
    let mut name = final_name.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
