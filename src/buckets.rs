//! Maps ages and cholesterol values to bucket labels.
//!
//! A bucket table is an ordered list of lower bounds; every bucket covers `[lo, next_lo)` and the
//! last one is unbounded above. A value exactly on a boundary therefore belongs to the bucket
//! starting there. Values below the first lower bound are outside the table's domain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BucketError;

/// An ordered range table: `(lower bound, label)` pairs sorted by lower bound.
#[derive(Debug)]
pub struct RangeTable {
    attribute: &'static str,
    bounds: &'static [(i64, &'static str)],
}

impl RangeTable {
    /// Returns the label of the bucket containing `value`.
    pub fn label(&self, value: i64) -> Result<&'static str, BucketError> {
        let idx = self.bounds.partition_point(|&(lo, _)| lo <= value);
        if idx == 0 {
            return Err(BucketError::BelowDomain {
                attribute: self.attribute,
                value,
                min: self.min(),
            });
        }
        Ok(self.bounds[idx - 1].1)
    }

    /// Smallest value covered by the table.
    pub fn min(&self) -> i64 {
        self.bounds[0].0
    }

    /// All labels, in ascending range order.
    pub fn labels(&self) -> impl Iterator<Item = &'static str> {
        self.bounds.iter().map(|&(_, l)| l)
    }

    /// The lower bounds of all buckets.
    pub fn lower_bounds(&self) -> impl Iterator<Item = i64> {
        self.bounds.iter().map(|&(lo, _)| lo)
    }
}

static DECADE_AGE: RangeTable = RangeTable {
    attribute: "age",
    bounds: &[
        (20, "20-29"),
        (30, "30-39"),
        (40, "40-49"),
        (50, "50-59"),
        (60, "60-69"),
        (70, "70+"),
    ],
};

static DECADE_CHOL: RangeTable = RangeTable {
    attribute: "cholesterol",
    bounds: &[(0, "0-199"), (200, "200-239"), (240, "240+")],
};

static BANDED_AGE: RangeTable = RangeTable {
    attribute: "age",
    bounds: &[
        (20, "20-30"),
        (31, "31-40"),
        (41, "41-50"),
        (51, "51-60"),
        (61, "61-70"),
        (71, "71+"),
    ],
};

static BANDED_CHOL: RangeTable = RangeTable {
    attribute: "cholesterol",
    bounds: &[(0, "0-199"), (200, "200-239"), (240, "240-279"), (280, "280+")],
};

/// Selects which pair of range tables is used. The two schemes are never mixed within a job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketScheme {
    /// Ten-year age bands from 20, cholesterol split at 200 and 240.
    #[default]
    Decade,
    /// Inclusive-upper age bands (20-30, 31-40, ...), cholesterol in 40-unit bands from 200.
    Banded,
}

impl BucketScheme {
    pub fn age_table(self) -> &'static RangeTable {
        match self {
            BucketScheme::Decade => &DECADE_AGE,
            BucketScheme::Banded => &BANDED_AGE,
        }
    }

    pub fn chol_table(self) -> &'static RangeTable {
        match self {
            BucketScheme::Decade => &DECADE_CHOL,
            BucketScheme::Banded => &BANDED_CHOL,
        }
    }

    pub fn age_bucket(self, age: i64) -> Result<&'static str, BucketError> {
        self.age_table().label(age)
    }

    pub fn chol_bucket(self, chol: i64) -> Result<&'static str, BucketError> {
        self.chol_table().label(chol)
    }
}

impl FromStr for BucketScheme {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decade" => Ok(BucketScheme::Decade),
            "banded" => Ok(BucketScheme::Banded),
            other => Err(format!("unknown bucket scheme {:?} (expected decade or banded)", other)),
        }
    }
}

impl fmt::Display for BucketScheme {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BucketScheme::Decade => f.write_str("decade"),
            BucketScheme::Banded => f.write_str("banded"),
        }
    }
}

/// Age bucket under the default scheme.
pub fn age_bucket(age: i64) -> Result<&'static str, BucketError> {
    BucketScheme::default().age_bucket(age)
}

/// Cholesterol bucket under the default scheme.
pub fn chol_bucket(chol: i64) -> Result<&'static str, BucketError> {
    BucketScheme::default().chol_bucket(chol)
}
