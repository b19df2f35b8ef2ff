//! Counts lines that were skipped because they could not be used.

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use crate::error::LineError;

/// Tally of rejected lines, by `LineError::kind()`. Shared by the map and reduce phases so both
/// report rejections the same way.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounter {
    pub total: u64,
    pub by_kind: BTreeMap<String, u64>,
}

impl SkipCounter {
    pub fn new() -> SkipCounter {
        SkipCounter::default()
    }

    /// Records one rejected line. `origin` and `line` only go to the debug log.
    pub fn record(&mut self, origin: &str, line: u64, err: &LineError) {
        debug!("skipping {}:{}: {}", origin, line, err);
        self.total += 1;
        *self.by_kind.entry(err.kind().to_string()).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &SkipCounter) {
        self.total += other.total;
        for (kind, n) in &other.by_kind {
            *self.by_kind.entry(kind.clone()).or_insert(0) += n;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn count(&self, kind: &str) -> u64 {
        self.by_kind.get(kind).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_merge() {
        let mut a = SkipCounter::new();
        a.record("x", 1, &LineError::FieldCount { fields: 1 });
        a.record("x", 4, &LineError::BadIndicator("7".into()));

        let mut b = SkipCounter::new();
        b.record("y", 2, &LineError::FieldCount { fields: 3 });

        a.merge(&b);
        assert_eq!(a.total, 3);
        assert_eq!(a.count("field_count"), 2);
        assert_eq!(a.count("bad_indicator"), 1);
        assert_eq!(a.count("bad_key"), 0);
        assert!(!a.is_empty());
        assert!(SkipCounter::new().is_empty());
    }
}
