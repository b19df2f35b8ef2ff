use std::vec;

use crate::error::InputFault;
use crate::record_types::Record;

/// Holds inputs to the Map phase in memory.
/// Specialty: Holding large amounts in memory in a way that is both efficient to store and
/// efficient to iterate. Records are kept in chunks of `chunk_length` so that growing the cache
/// never copies what was already read.
pub struct InputCache {
    chunks_iter: vec::IntoIter<Vec<Result<Record, InputFault>>>,
    chunk_iter: vec::IntoIter<Result<Record, InputFault>>,
    len: usize,
}

impl InputCache {
    /// Reads records from `it` until it is exhausted or at least `max_bytes` of line data were
    /// read. A fatal fault stops reading and is returned; malformed lines are kept in place so
    /// the map partition counts them.
    pub fn from_iter<It>(chunk_length: usize, max_bytes: usize, it: &mut It) -> Result<Self, InputFault>
    where
        It: Iterator<Item = Result<Record, InputFault>>,
    {
        let mut chunklist = Vec::new();
        let mut chunk = Vec::with_capacity(chunk_length);

        let mut complete_length: usize = 0;
        let mut bytes_read: usize = 0;

        for v in it.by_ref() {
            match v {
                Err(f) if f.is_fatal() => return Err(f),
                Err(f) => {
                    bytes_read += 1;
                    chunk.push(Err(f));
                }
                Ok(r) => {
                    bytes_read += r.value.len() + 1;
                    chunk.push(Ok(r));
                }
            }
            complete_length += 1;

            if chunk.len() >= chunk_length {
                chunklist.push(chunk);
                chunk = Vec::with_capacity(chunk_length);
            }
            if bytes_read >= max_bytes {
                break;
            }
        }

        if !chunk.is_empty() {
            chunklist.push(chunk);
        }

        let mut chunks_iter = chunklist.into_iter();
        let chunk_iter = chunks_iter.next().unwrap_or_default().into_iter();
        Ok(InputCache {
            len: complete_length,
            chunks_iter,
            chunk_iter,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Yields the cached records and malformed lines in input order.
impl Iterator for InputCache {
    type Item = Result<Record, InputFault>;
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(v) = self.chunk_iter.next() {
                return Some(v);
            }
            self.chunk_iter = self.chunks_iter.next()?.into_iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LineError;
    use std::io;

    fn records(n: u64) -> impl Iterator<Item = Result<Record, InputFault>> {
        (1..=n).map(|i| Ok(Record::new(i, format!("line {:04}", i))))
    }

    #[test]
    fn test_partitions_by_size() {
        let mut src = records(100);
        let mut sizes = Vec::new();
        let mut first_lines = Vec::new();
        loop {
            let cache = InputCache::from_iter(8, 100, &mut src).unwrap();
            if cache.is_empty() {
                break;
            }
            sizes.push(cache.len());
            let recs: Vec<Record> = cache.map(|r| r.unwrap()).collect();
            first_lines.push(recs[0].line);
        }
        // Each record counts 10 bytes.
        assert_eq!(sizes, vec![10; 10]);
        assert_eq!(first_lines, (0..10).map(|i| i * 10 + 1).collect::<Vec<u64>>());
    }

    #[test]
    fn test_empty_input() {
        let cache = InputCache::from_iter(8, 100, &mut records(0)).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.count(), 0);
    }

    #[test]
    fn test_read_fault_is_returned() {
        let mut src = records(3).chain(std::iter::once(Err(InputFault::Io {
            origin: "t".into(),
            line: 3,
            source: io::Error::new(io::ErrorKind::Other, "gone"),
        })));
        assert!(InputCache::from_iter(8, 1 << 20, &mut src).is_err());
    }

    #[test]
    fn test_malformed_lines_are_kept() {
        let bad = Err(InputFault::Malformed {
            origin: "t".into(),
            line: 2,
            source: LineError::Encoding,
        });
        let mut src = records(1).chain(std::iter::once(bad)).chain(records(1));
        let cache = InputCache::from_iter(8, 1 << 20, &mut src).unwrap();
        assert_eq!(cache.len(), 3);

        let items: Vec<_> = cache.collect();
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(InputFault::Malformed { line: 2, .. })));
        assert!(items[2].is_ok());
    }
}
