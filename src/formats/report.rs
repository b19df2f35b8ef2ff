//! The reduce output format and its reading side.
//!
//! Every aggregate is written as
//! `{age},{chol}\tTotal: {total}, Heart Disease: {positive}, Percentage: {pct:.2}%`.
//! The dashboard consumes this layout byte for byte and turns each line into a `DashboardRow`.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

use crate::error::{InputFault, LineError};
use crate::formats::lines::is_not_utf8;
use crate::record_types::{valid_label, AggregateResult};
use crate::skips::SkipCounter;

impl fmt::Display for AggregateResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}\tTotal: {}, Heart Disease: {}, Percentage: {:.2}%",
            self.key,
            self.total,
            self.positive,
            self.percentage()
        )
    }
}

/// One entry of the dashboard's data feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashboardRow {
    pub age_bucket: String,
    pub chol_bucket: String,
    pub total: u64,
    pub heart_disease: u64,
    pub percentage: f64,
}

impl From<&AggregateResult> for DashboardRow {
    fn from(r: &AggregateResult) -> DashboardRow {
        DashboardRow {
            age_bucket: r.key.age().to_string(),
            chol_bucket: r.key.chol().to_string(),
            total: r.total,
            heart_disease: r.positive,
            percentage: r.rounded_percentage(),
        }
    }
}

/// Parses one reduce output line.
pub fn parse_output_line(line: &str) -> Result<DashboardRow, LineError> {
    let bad = || LineError::BadSummary(line.to_string());

    let (key, summary) = line.trim_end().split_once('\t').ok_or_else(bad)?;
    let (age, chol) = key.split_once(',').ok_or_else(bad)?;
    if !valid_label(age) || !valid_label(chol) {
        return Err(bad());
    }

    let mut fields = summary.split(", ");
    let total: u64 = summary_field(fields.next(), "Total")
        .ok_or_else(bad)?
        .parse()
        .map_err(|_| bad())?;
    let heart_disease: u64 = summary_field(fields.next(), "Heart Disease")
        .ok_or_else(bad)?
        .parse()
        .map_err(|_| bad())?;
    let percentage: f64 = summary_field(fields.next(), "Percentage")
        .and_then(|p| p.strip_suffix('%'))
        .ok_or_else(bad)?
        .parse()
        .map_err(|_| bad())?;
    if fields.next().is_some() || total == 0 || heart_disease > total {
        return Err(bad());
    }

    Ok(DashboardRow {
        age_bucket: age.to_string(),
        chol_bucket: chol.to_string(),
        total,
        heart_disease,
        percentage,
    })
}

fn summary_field<'a>(field: Option<&'a str>, name: &str) -> Option<&'a str> {
    field?.strip_prefix(name)?.strip_prefix(": ")
}

/// Reads all rows from reduce output lines, skipping (and counting) lines that do not parse.
/// Only read errors are fatal; a line that is not UTF-8 is skipped like any other bad line.
pub fn read_rows<I>(lines: I, origin: &str, skips: &mut SkipCounter) -> Result<Vec<DashboardRow>, InputFault>
where
    I: Iterator<Item = io::Result<String>>,
{
    let mut rows = Vec::new();
    let mut n = 0;
    for line in lines {
        let line = match line {
            Ok(line) => line,
            Err(e) if is_not_utf8(&e) => {
                n += 1;
                skips.record(origin, n, &LineError::Encoding);
                continue;
            }
            Err(e) => {
                return Err(InputFault::Io {
                    origin: origin.to_string(),
                    line: n,
                    source: e,
                })
            }
        };
        n += 1;
        if line.trim().is_empty() {
            continue;
        }
        match parse_output_line(&line) {
            Ok(row) => rows.push(row),
            Err(e) => skips.record(origin, n, &e),
        }
    }
    Ok(rows)
}
