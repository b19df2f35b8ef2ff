//! Input and output formats: text lines in, intermediate pairs, and the aggregate report.

pub mod lines;
pub mod report;
pub mod util;
