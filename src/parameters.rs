//! Parameters for a mapreduce process.
//!

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::buckets::BucketScheme;
use crate::error::{PipelineError, Result};

/// Where the mapper finds its fields. Indices are 0-based column positions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "lowercase")]
pub enum ColumnLayout {
    /// Raw attributes; buckets are computed by the bucket scheme.
    Raw {
        age: usize,
        cholesterol: usize,
        severity: usize,
    },
    /// Bucket labels were computed beforehand and are read verbatim.
    Labeled {
        age_bucket: usize,
        chol_bucket: usize,
        severity: usize,
    },
}

impl ColumnLayout {
    /// `id,age,sex,dataset,cp,trestbps,chol,...,num`
    pub fn raw() -> ColumnLayout {
        ColumnLayout::Raw {
            age: 1,
            cholesterol: 6,
            severity: 15,
        }
    }

    /// `id,age,age_bucket,chol,chol_bucket,num,...`
    pub fn labeled() -> ColumnLayout {
        ColumnLayout::Labeled {
            age_bucket: 2,
            chol_bucket: 4,
            severity: 5,
        }
    }
}

impl Default for ColumnLayout {
    fn default() -> ColumnLayout {
        ColumnLayout::raw()
    }
}

/// What the reduce phase may assume about the order of its input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputOrder {
    /// The caller guarantees that all pairs sharing a key are adjacent.
    #[default]
    Grouped,
    /// Like `Grouped`, but a key reappearing after its run was closed fails the reduce.
    Verified,
}

impl FromStr for InputOrder {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "grouped" => Ok(InputOrder::Grouped),
            "verified" => Ok(InputOrder::Verified),
            other => Err(format!("unknown input order {:?} (expected grouped or verified)", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MRParameters {
    pub mappers: usize,
    pub reducers: usize,

    pub map_partition_size: usize,
    pub map_output_location: PathBuf,
    pub keep_temp_files: bool,

    pub reduce_output_shard_prefix: String,

    pub scheme: BucketScheme,
    pub layout: ColumnLayout,
    pub header_label: String,
    pub delimiter: u8,
    pub input_order: InputOrder,

    // Internal parameters
    pub shard_id: usize,
}

impl Default for MRParameters {
    fn default() -> MRParameters {
        MRParameters::new()
    }
}

impl MRParameters {
    pub fn new() -> MRParameters {
        MRParameters {
            mappers: 4,
            reducers: 4,
            map_partition_size: 100 * 1024 * 1024,
            map_output_location: std::env::temp_dir().join(format!("heartmr-{}", std::process::id())),
            keep_temp_files: false,
            reduce_output_shard_prefix: String::from("output_"),
            scheme: BucketScheme::default(),
            layout: ColumnLayout::default(),
            header_label: String::from("id"),
            delimiter: b',',
            input_order: InputOrder::default(),
            shard_id: 0,
        }
    }

    /// Determines how many parallel processes will be run. Mappers and reducers do in general
    /// not run at the same time (as the reducers need to wait for the map output). The number of
    /// reducers also determines the sharding of the map output data.
    ///
    /// Default 4/4
    pub fn set_concurrency(mut self, mappers: usize, reducers: usize) -> MRParameters {
        self.mappers = mappers;
        self.reducers = reducers;
        self
    }

    /// This parameter determines the size of the chunks that the input is partitioned in
    /// before being processed by map shards. Entire chunks are held in memory at once.
    ///
    /// Default 100 MiB
    pub fn set_partition_size(mut self, size: usize) -> MRParameters {
        self.map_partition_size = size;
        self
    }

    /// Directory for intermediate map output files. It is created if missing.
    /// Default: a process-specific directory below the system temp dir.
    pub fn set_map_output_location(mut self, dir: PathBuf) -> MRParameters {
        self.map_output_location = dir;
        self
    }

    /// Keep intermediate files after the job finished. Default: false.
    pub fn keep_temp_files(mut self, keep: bool) -> MRParameters {
        self.keep_temp_files = keep;
        self
    }

    /// Prefix for output files produced by the reduce phase.
    /// Default: output_ (the id of the reduce shard will be appended to that string)
    pub fn set_out_name(mut self, prefix: String) -> MRParameters {
        self.reduce_output_shard_prefix = prefix;
        self
    }

    pub fn set_scheme(mut self, scheme: BucketScheme) -> MRParameters {
        self.scheme = scheme;
        self
    }

    pub fn set_layout(mut self, layout: ColumnLayout) -> MRParameters {
        self.layout = layout;
        self
    }

    /// First-column value identifying the header line. Default: id
    pub fn set_header_label(mut self, label: String) -> MRParameters {
        self.header_label = label;
        self
    }

    /// Field delimiter of the map input. Default: ','
    pub fn set_delimiter(mut self, delimiter: u8) -> MRParameters {
        self.delimiter = delimiter;
        self
    }

    pub fn set_input_order(mut self, order: InputOrder) -> MRParameters {
        self.input_order = order;
        self
    }

    /// For internal use: Sets the ID of the executing data chunk (for file naming etc.)
    ///
    pub fn set_shard_id(mut self, n: usize) -> MRParameters {
        self.shard_id = n;
        self
    }

    /// Rejects settings no job can run with.
    pub fn validate(&self) -> Result<()> {
        if self.mappers == 0 || self.reducers == 0 {
            return Err(PipelineError::Config(
                "mappers and reducers must both be at least 1".to_string(),
            ));
        }
        if self.map_partition_size == 0 {
            return Err(PipelineError::Config("partition size must be positive".to_string()));
        }
        if self.delimiter == b'\t' || self.delimiter == b'\n' || self.delimiter == b'"' {
            return Err(PipelineError::Config(format!(
                "{:?} cannot be used as field delimiter",
                self.delimiter as char
            )));
        }
        Ok(())
    }
}

/// Optional settings read from a TOML file; present fields override the defaults.
///
/// ```toml
/// scheme = "banded"
/// reducers = 2
///
/// [columns]
/// layout = "labeled"
/// age_bucket = 2
/// chol_bucket = 4
/// severity = 5
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub mappers: Option<usize>,
    pub reducers: Option<usize>,
    pub partition_size: Option<usize>,
    pub temp_dir: Option<PathBuf>,
    pub keep_temp_files: Option<bool>,
    pub output_prefix: Option<String>,
    pub scheme: Option<BucketScheme>,
    pub columns: Option<ColumnLayout>,
    pub header_label: Option<String>,
    pub delimiter: Option<char>,
    pub input_order: Option<InputOrder>,
}

impl JobConfig {
    pub fn from_toml(s: &str) -> Result<JobConfig> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<JobConfig> {
        let text = fs::read_to_string(path).map_err(|e| PipelineError::Filesystem {
            path: path.to_path_buf(),
            source: e,
        })?;
        JobConfig::from_toml(&text)
    }

    pub fn apply(self, mut params: MRParameters) -> Result<MRParameters> {
        if let Some(n) = self.mappers {
            params.mappers = n;
        }
        if let Some(n) = self.reducers {
            params.reducers = n;
        }
        if let Some(n) = self.partition_size {
            params.map_partition_size = n;
        }
        if let Some(dir) = self.temp_dir {
            params.map_output_location = dir;
        }
        if let Some(keep) = self.keep_temp_files {
            params.keep_temp_files = keep;
        }
        if let Some(prefix) = self.output_prefix {
            params.reduce_output_shard_prefix = prefix;
        }
        if let Some(scheme) = self.scheme {
            params.scheme = scheme;
        }
        if let Some(layout) = self.columns {
            params.layout = layout;
        }
        if let Some(label) = self.header_label {
            params.header_label = label;
        }
        if let Some(d) = self.delimiter {
            params.delimiter = delimiter_byte(d)?;
        }
        if let Some(order) = self.input_order {
            params.input_order = order;
        }
        Ok(params)
    }
}

/// Converts a delimiter character to the single byte the CSV reader expects.
pub fn delimiter_byte(d: char) -> Result<u8> {
    if d.is_ascii() {
        Ok(d as u8)
    } else {
        Err(PipelineError::Config(format!("delimiter {:?} is not a single ASCII character", d)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = MRParameters::new();
        assert_eq!(p.mappers, 4);
        assert_eq!(p.reducers, 4);
        assert_eq!(p.scheme, BucketScheme::Decade);
        assert_eq!(p.layout, ColumnLayout::raw());
        assert_eq!(p.header_label, "id");
        assert_eq!(p.input_order, InputOrder::Grouped);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert!(MRParameters::new().set_concurrency(0, 1).validate().is_err());
        assert!(MRParameters::new().set_partition_size(0).validate().is_err());
        assert!(MRParameters::new().set_delimiter(b'\t').validate().is_err());
        assert!(MRParameters::new().set_delimiter(b';').validate().is_ok());
    }

    #[test]
    fn test_config_file() {
        let cfg = JobConfig::from_toml(
            r#"
            scheme = "banded"
            reducers = 2
            delimiter = ";"
            input_order = "verified"

            [columns]
            layout = "labeled"
            age_bucket = 3
            chol_bucket = 5
            severity = 6
            "#,
        )
        .unwrap();

        let p = cfg.apply(MRParameters::new()).unwrap();
        assert_eq!(p.scheme, BucketScheme::Banded);
        assert_eq!(p.reducers, 2);
        assert_eq!(p.mappers, 4);
        assert_eq!(p.delimiter, b';');
        assert_eq!(p.input_order, InputOrder::Verified);
        assert_eq!(
            p.layout,
            ColumnLayout::Labeled {
                age_bucket: 3,
                chol_bucket: 5,
                severity: 6
            }
        );
    }

    #[test]
    fn test_config_rejects_unknown_fields() {
        assert!(JobConfig::from_toml("bucket_width = 5").is_err());
        assert!(JobConfig::from_toml("scheme = \"hourly\"").is_err());
    }

    #[test]
    fn test_config_rejects_non_ascii_delimiter() {
        let cfg = JobConfig::from_toml("delimiter = \"§\"").unwrap();
        assert!(cfg.apply(MRParameters::new()).is_err());
    }
}
