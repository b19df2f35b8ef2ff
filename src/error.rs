//! Error types.
//!
//! Per-line problems (`LineError`) are recoverable: the line is skipped and counted. Everything
//! that ends up in a `PipelineError` aborts the phase it happened in.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::record_types::BucketKey;

/// A value outside the declared domain of a bucket table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BucketError {
    #[error("{attribute} {value} is below the smallest bucket (starting at {min})")]
    BelowDomain {
        attribute: &'static str,
        value: i64,
        min: i64,
    },
}

/// Why a single input line was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    #[error("missing column {index}")]
    MissingColumn { index: usize },

    #[error("column {index} is not an integer: {value:?}")]
    NotAnInteger { index: usize, value: String },

    #[error(transparent)]
    OutOfDomain(#[from] BucketError),

    #[error("bucket label {label:?} in column {index} is empty or contains a delimiter")]
    BadLabel { index: usize, label: String },

    #[error("unparseable CSV: {0}")]
    Csv(String),

    #[error("line is not valid UTF-8")]
    Encoding,

    #[error("expected `key<TAB>indicator`, found {fields} field(s)")]
    FieldCount { fields: usize },

    #[error("bucket key {0:?} is not of the form `age,cholesterol`")]
    BadKey(String),

    #[error("indicator {0:?} is neither 0 nor 1")]
    BadIndicator(String),

    #[error("output line does not match `key<TAB>Total: n, Heart Disease: n, Percentage: p%`: {0:?}")]
    BadSummary(String),
}

impl LineError {
    /// Short, stable name used as the key of skip counters.
    pub fn kind(&self) -> &'static str {
        match self {
            LineError::MissingColumn { .. } => "missing_column",
            LineError::NotAnInteger { .. } => "not_an_integer",
            LineError::OutOfDomain(_) => "out_of_domain",
            LineError::BadLabel { .. } => "bad_label",
            LineError::Csv(_) => "csv",
            LineError::Encoding => "encoding",
            LineError::FieldCount { .. } => "field_count",
            LineError::BadKey(_) => "bad_key",
            LineError::BadIndicator(_) => "bad_indicator",
            LineError::BadSummary(_) => "bad_summary",
        }
    }
}

/// One unreadable unit of a line-oriented input stream.
#[derive(Error, Debug)]
pub enum InputFault {
    #[error("{origin}:{line}: {source}")]
    Malformed {
        origin: String,
        line: u64,
        source: LineError,
    },
    #[error("reading {origin} failed after line {line}: {source}")]
    Io {
        origin: String,
        line: u64,
        source: io::Error,
    },
}

impl InputFault {
    pub fn is_fatal(&self) -> bool {
        matches!(self, InputFault::Io { .. })
    }
}

/// A closed run's key showed up again; the input was not grouped by key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("bucket key {key} reappeared after its run was closed")]
pub struct ContiguityViolation {
    pub key: BucketKey,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("reading {origin} failed after line {line}: {source}")]
    Read {
        origin: String,
        line: u64,
        source: io::Error,
    },

    #[error("writing {target} failed: {source}")]
    Write { target: String, source: io::Error },

    #[error("input is not grouped by key: {key} reappeared at pair {position}")]
    Ungrouped { key: BucketKey, position: u64 },

    #[error("could not prepare {path}: {source}")]
    Filesystem { path: PathBuf, source: io::Error },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("worker failed: {0}")]
    Worker(String),
}

impl PipelineError {
    pub fn write(target: impl Into<String>, source: io::Error) -> PipelineError {
        PipelineError::Write {
            target: target.into(),
            source,
        }
    }
}

impl From<InputFault> for PipelineError {
    /// Only fatal faults are expected to be converted; a malformed line is reported as an I/O
    /// style read failure so the origin and line number are kept.
    fn from(f: InputFault) -> PipelineError {
        match f {
            InputFault::Io {
                origin,
                line,
                source,
            } => PipelineError::Read {
                origin,
                line,
                source,
            },
            InputFault::Malformed {
                origin,
                line,
                source,
            } => PipelineError::Read {
                origin,
                line,
                source: io::Error::new(io::ErrorKind::InvalidData, source),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
