use std::fmt;
use std::str::FromStr;

use crate::error::LineError;

/// One line of map input together with its (1-based) position in the source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub line: u64,
    pub value: String,
}

impl Record {
    pub fn new(line: u64, value: impl Into<String>) -> Record {
        Record {
            line,
            value: value.into(),
        }
    }
}

/// The grouping key: an (age bucket, cholesterol bucket) pair, serialized as `age,chol`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    age: String,
    chol: String,
}

impl BucketKey {
    /// Builds a key from two labels. Labels must be non-empty and free of `,`, tab and newline
    /// characters, otherwise the serialized form could not be split back.
    pub fn new(age: impl Into<String>, chol: impl Into<String>) -> Result<BucketKey, LineError> {
        let (age, chol) = (age.into(), chol.into());
        if !valid_label(&age) || !valid_label(&chol) {
            return Err(LineError::BadKey(format!("{},{}", age, chol)));
        }
        Ok(BucketKey { age, chol })
    }

    pub fn age(&self) -> &str {
        &self.age
    }

    pub fn chol(&self) -> &str {
        &self.chol
    }
}

pub(crate) fn valid_label(l: &str) -> bool {
    !l.is_empty() && !l.contains([',', '\t', '\n', '\r'])
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{},{}", self.age, self.chol)
    }
}

impl FromStr for BucketKey {
    type Err = LineError;
    fn from_str(s: &str) -> Result<BucketKey, LineError> {
        match s.split_once(',') {
            Some((age, chol)) if valid_label(age) && valid_label(chol) => Ok(BucketKey {
                age: age.to_string(),
                chol: chol.to_string(),
            }),
            _ => Err(LineError::BadKey(s.to_string())),
        }
    }
}

/// Heart disease presence for one record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Indicator {
    Absent,
    Present,
}

impl Indicator {
    /// Diagnosis severities above zero count as present.
    pub fn from_severity(severity: i64) -> Indicator {
        if severity > 0 {
            Indicator::Present
        } else {
            Indicator::Absent
        }
    }

    pub fn value(self) -> u64 {
        match self {
            Indicator::Absent => 0,
            Indicator::Present => 1,
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl FromStr for Indicator {
    type Err = LineError;
    fn from_str(s: &str) -> Result<Indicator, LineError> {
        match s.trim() {
            "0" => Ok(Indicator::Absent),
            "1" => Ok(Indicator::Present),
            _ => Err(LineError::BadIndicator(s.to_string())),
        }
    }
}

/// A (key, indicator) pair, produced by the map phase and consumed by the reduce phase.
/// Ordered by key first, which is what the sort and merge steps rely on.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EmittedPair {
    pub key: BucketKey,
    pub indicator: Indicator,
}

impl EmittedPair {
    pub fn new(key: BucketKey, indicator: Indicator) -> EmittedPair {
        EmittedPair { key, indicator }
    }
}

/// Intermediate line format: `{key}\t{indicator}`.
impl fmt::Display for EmittedPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}\t{}", self.key, self.indicator)
    }
}

impl FromStr for EmittedPair {
    type Err = LineError;
    fn from_str(s: &str) -> Result<EmittedPair, LineError> {
        let fields: Vec<&str> = s.trim().split('\t').collect();
        if fields.len() != 2 {
            return Err(LineError::FieldCount {
                fields: fields.len(),
            });
        }
        Ok(EmittedPair {
            key: fields[0].parse()?,
            indicator: fields[1].parse()?,
        })
    }
}

/// Statistics of one completed run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateResult {
    pub key: BucketKey,
    pub total: u64,
    pub positive: u64,
}

impl AggregateResult {
    /// Share of positive records, in percent.
    pub fn percentage(&self) -> f64 {
        self.positive as f64 / self.total as f64 * 100.0
    }

    /// `percentage()` rounded to two decimal digits.
    pub fn rounded_percentage(&self) -> f64 {
        (self.percentage() * 100.0).round() / 100.0
    }
}
