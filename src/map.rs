//! Implements the Map phase.
//!

use std::io::Write;

use csv::StringRecord;
use log::{info, warn};
use serde::Serialize;

use crate::buckets::BucketScheme;
use crate::error::{InputFault, LineError, PipelineError, Result};
use crate::formats::lines::LinesWriter;
use crate::mapreducer::{Mapped, Mapper, Sharder};
use crate::parameters::{ColumnLayout, MRParameters};
use crate::record_types::{valid_label, BucketKey, EmittedPair, Indicator, Record};
use crate::skips::SkipCounter;

/// Maps one CSV line of patient data to a (bucket key, indicator) pair.
#[derive(Clone, Debug)]
pub struct RecordMapper {
    layout: ColumnLayout,
    scheme: BucketScheme,
    header_label: String,
    delimiter: u8,
    fields: StringRecord,
}

impl RecordMapper {
    pub fn new(params: &MRParameters) -> RecordMapper {
        RecordMapper {
            layout: params.layout.clone(),
            scheme: params.scheme,
            header_label: params.header_label.clone(),
            delimiter: params.delimiter,
            fields: StringRecord::new(),
        }
    }

    fn split(&mut self, line: &str) -> std::result::Result<(), LineError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(line.as_bytes());
        match rdr.read_record(&mut self.fields) {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.fields.clear();
                Ok(())
            }
            Err(e) => Err(LineError::Csv(e.to_string())),
        }
    }

    fn column(&self, index: usize) -> std::result::Result<&str, LineError> {
        self.fields
            .get(index)
            .map(str::trim)
            .ok_or(LineError::MissingColumn { index })
    }

    fn integer(&self, index: usize) -> std::result::Result<i64, LineError> {
        let v = self.column(index)?;
        v.parse().map_err(|_| LineError::NotAnInteger {
            index,
            value: v.to_string(),
        })
    }

    fn label(&self, index: usize) -> std::result::Result<&str, LineError> {
        let l = self.column(index)?;
        if !valid_label(l) {
            return Err(LineError::BadLabel {
                index,
                label: l.to_string(),
            });
        }
        Ok(l)
    }
}

impl Mapper for RecordMapper {
    fn map(&mut self, record: &Record) -> std::result::Result<Mapped, LineError> {
        let line = record.value.trim();
        if line.is_empty() {
            return Ok(Mapped::Blank);
        }
        self.split(line)?;
        if self.fields.get(0).map(str::trim) == Some(self.header_label.as_str()) {
            return Ok(Mapped::Header);
        }

        let (key, severity) = match self.layout {
            ColumnLayout::Raw {
                age,
                cholesterol,
                severity,
            } => {
                let age = self.scheme.age_bucket(self.integer(age)?)?;
                let chol = self.scheme.chol_bucket(self.integer(cholesterol)?)?;
                (BucketKey::new(age, chol)?, self.integer(severity)?)
            }
            ColumnLayout::Labeled {
                age_bucket,
                chol_bucket,
                severity,
            } => {
                let key = BucketKey::new(self.label(age_bucket)?, self.label(chol_bucket)?)?;
                (key, self.integer(severity)?)
            }
        };
        Ok(Mapped::Pair(EmittedPair::new(key, Indicator::from_severity(severity))))
    }
}

/// Counters of one map partition (or, merged, of a whole map phase).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MapStats {
    pub lines_read: u64,
    pub header_lines: u64,
    pub blank_lines: u64,
    pub pairs_emitted: u64,
    pub skipped: SkipCounter,
}

impl MapStats {
    pub fn merge(&mut self, other: &MapStats) {
        self.lines_read += other.lines_read;
        self.header_lines += other.header_lines;
        self.blank_lines += other.blank_lines;
        self.pairs_emitted += other.pairs_emitted;
        self.skipped.merge(&other.skipped);
    }
}

/// This is the base of the mapping phase: it streams input records through a mapper and
/// writes every pair, in input order, to the output shard chosen by the sharder.
/// Mapper threads run on this. Every mapper thread has one MapPartition
/// instance per input chunk.
pub struct MapPartition<M: Mapper, S: Sharder, In, W: Write>
where
    In: Iterator<Item = std::result::Result<Record, InputFault>>,
{
    mapper: M,
    sharder: S,
    input: In,
    outputs: Vec<LinesWriter<W>>,
    output_names: Vec<String>,
    stats: MapStats,
}

impl<M: Mapper, S: Sharder, In, W: Write> MapPartition<M, S, In, W>
where
    In: Iterator<Item = std::result::Result<Record, InputFault>>,
{
    /// `outputs` are the shard writers, `output_names` their names for error messages.
    pub fn new(
        mapper: M,
        sharder: S,
        input: In,
        outputs: Vec<LinesWriter<W>>,
        output_names: Vec<String>,
    ) -> MapPartition<M, S, In, W> {
        assert_eq!(outputs.len(), output_names.len());
        assert!(!outputs.is_empty());
        MapPartition {
            mapper,
            sharder,
            input,
            outputs,
            output_names,
            stats: MapStats::default(),
        }
    }

    /// Runs the partition to the end of its input and flushes all outputs.
    /// Malformed lines are skipped; read and write failures abort.
    pub fn run(mut self, origin: &str) -> Result<MapStats> {
        let n = self.outputs.len();

        while let Some(next) = self.input.next() {
            let record = match next {
                Ok(r) => r,
                Err(InputFault::Malformed { line, source, .. }) => {
                    self.stats.skipped.record(origin, line, &source);
                    continue;
                }
                Err(f) => return Err(PipelineError::from(f)),
            };
            self.stats.lines_read += 1;

            match self.mapper.map(&record) {
                Ok(Mapped::Pair(pair)) => {
                    let shard = if n == 1 { 0 } else { self.sharder.shard(n, &pair.key) };
                    self.outputs[shard]
                        .write_line(&pair)
                        .map_err(|e| PipelineError::write(self.output_names[shard].clone(), e))?;
                    self.stats.pairs_emitted += 1;
                }
                Ok(Mapped::Header) => self.stats.header_lines += 1,
                Ok(Mapped::Blank) => self.stats.blank_lines += 1,
                Err(e) => self.stats.skipped.record(origin, record.line, &e),
            }
        }

        for (out, name) in self.outputs.iter_mut().zip(&self.output_names) {
            out.flush().map_err(|e| PipelineError::write(name.clone(), e))?;
        }

        info!(
            "map {}: {} lines, {} pairs emitted, {} skipped",
            origin, self.stats.lines_read, self.stats.pairs_emitted, self.stats.skipped.total
        );
        if !self.stats.skipped.is_empty() {
            warn!("map {}: skipped lines by kind: {:?}", origin, self.stats.skipped.by_kind);
        }
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::util::PosRecordIterator;
    use crate::mapreducer::DefaultSharder;
    use std::io;

    const HEADER: &str = "id,age,sex,dataset,cp,trestbps,chol,fbs,restecg,thalch,exang,oldpeak,slope,ca,thal,num";

    fn raw_line(id: u32, age: &str, chol: &str, num: &str) -> String {
        format!(
            "{},{},Male,Cleveland,typical angina,145,{},TRUE,lv hypertrophy,150,FALSE,2.3,downsloping,0,fixed defect,{}",
            id, age, chol, num
        )
    }

    fn mapper() -> RecordMapper {
        RecordMapper::new(&MRParameters::new())
    }

    fn pair(s: &str) -> Mapped {
        Mapped::Pair(s.parse().unwrap())
    }

    #[test]
    fn test_raw_layout() {
        let mut m = mapper();
        assert_eq!(m.map(&Record::new(1, HEADER)), Ok(Mapped::Header));
        assert_eq!(m.map(&Record::new(2, "   ")), Ok(Mapped::Blank));
        assert_eq!(m.map(&Record::new(3, raw_line(1, "63", "233", "0"))), Ok(pair("60-69,200-239\t0")));
        assert_eq!(m.map(&Record::new(4, raw_line(2, "30", "199", "2"))), Ok(pair("30-39,0-199\t1")));
        assert_eq!(m.map(&Record::new(5, raw_line(3, "70", "240", "1"))), Ok(pair("70+,240+\t1")));
    }

    #[test]
    fn test_malformed_lines() {
        let mut m = mapper();
        assert_eq!(
            m.map(&Record::new(1, raw_line(1, "sixty", "233", "0"))),
            Err(LineError::NotAnInteger {
                index: 1,
                value: "sixty".to_string()
            })
        );
        assert_eq!(
            m.map(&Record::new(2, raw_line(1, "63", "", "0"))),
            Err(LineError::NotAnInteger {
                index: 6,
                value: String::new()
            })
        );
        assert_eq!(
            m.map(&Record::new(3, "7,63,Male")),
            Err(LineError::MissingColumn { index: 6 })
        );
        assert!(matches!(
            m.map(&Record::new(4, raw_line(1, "12", "233", "0"))),
            Err(LineError::OutOfDomain(_))
        ));
    }

    #[test]
    fn test_labeled_layout() {
        let params = MRParameters::new().set_layout(ColumnLayout::labeled());
        let mut m = RecordMapper::new(&params);
        assert_eq!(
            m.map(&Record::new(1, "id,age,age_bucket,chol,chol_bucket,num,heart_disease")),
            Ok(Mapped::Header)
        );
        assert_eq!(
            m.map(&Record::new(2, "1,63,61-70,233,200-239,0,0")),
            Ok(pair("61-70,200-239\t0"))
        );
        assert_eq!(
            m.map(&Record::new(3, "2,67,61-70,286,280+,2,1")),
            Ok(pair("61-70,280+\t1"))
        );
        assert_eq!(
            m.map(&Record::new(4, "3,67,\"61,70\",286,280+,2,1")),
            Err(LineError::BadLabel {
                index: 2,
                label: "61,70".to_string()
            })
        );
    }

    #[test]
    fn test_custom_delimiter_and_header() {
        let params = MRParameters::new()
            .set_delimiter(b';')
            .set_header_label("patient".to_string())
            .set_layout(ColumnLayout::Raw {
                age: 1,
                cholesterol: 2,
                severity: 3,
            });
        let mut m = RecordMapper::new(&params);
        assert_eq!(m.map(&Record::new(1, "patient;age;chol;num")), Ok(Mapped::Header));
        assert_eq!(m.map(&Record::new(2, "9;45;250;3")), Ok(pair("40-49,240+\t1")));
    }

    fn run_partition(input: &[String], shards: usize) -> (MapStats, Vec<String>) {
        let src: Vec<io::Result<String>> = input.iter().cloned().map(Ok).collect();
        let records = PosRecordIterator::new(src.into_iter(), "test");

        let mut bufs: Vec<Vec<u8>> = vec![Vec::new(); shards];
        let stats = {
            let outputs = bufs.iter_mut().map(LinesWriter::new_to_write).collect();
            let names = (0..shards).map(|i| format!("shard {}", i)).collect();
            MapPartition::new(mapper(), DefaultSharder, records, outputs, names)
                .run("test")
                .unwrap()
        };
        let shards = bufs.into_iter().map(|b| String::from_utf8(b).unwrap()).collect();
        (stats, shards)
    }

    #[test]
    fn test_map_partition_stats() {
        let input = vec![
            HEADER.to_string(),
            raw_line(1, "63", "233", "0"),
            String::new(),
            raw_line(2, "bad", "233", "0"),
            raw_line(3, "41", "204", "1"),
        ];
        let (stats, shards) = run_partition(&input, 3);
        assert_eq!(stats.lines_read, 5);
        assert_eq!(stats.header_lines, 1);
        assert_eq!(stats.blank_lines, 1);
        assert_eq!(stats.pairs_emitted, 2);
        assert_eq!(stats.skipped.total, 1);
        assert_eq!(stats.skipped.count("not_an_integer"), 1);
        assert_eq!(shards.iter().map(|s| s.lines().count()).sum::<usize>(), 2);
    }

    #[test]
    fn test_map_partition_shards_by_key() {
        let input: Vec<String> = (0..60)
            .map(|i| raw_line(i, &(20 + i % 55).to_string(), &(150 + 3 * i).to_string(), "1"))
            .collect();
        let (stats, shards) = run_partition(&input, 4);
        assert_eq!(stats.pairs_emitted, 60);

        for (i, shard) in shards.iter().enumerate() {
            for line in shard.lines() {
                let p: EmittedPair = line.parse().unwrap();
                assert_eq!(DefaultSharder.shard(4, &p.key), i);
            }
        }
    }

    #[test]
    fn test_map_partition_preserves_order() {
        let input = vec![
            raw_line(1, "63", "233", "0"),
            raw_line(2, "25", "180", "1"),
            raw_line(3, "63", "233", "1"),
        ];

        let (_, shards) = run_partition(&input, 1);
        assert_eq!(shards[0], "60-69,200-239\t0\n20-29,0-199\t1\n60-69,200-239\t1\n");
    }

    #[test]
    fn test_latin1_row_is_skipped() {
        let mut text = format!("{}\n{}\n", HEADER, raw_line(1, "63", "233", "0")).into_bytes();
        text.extend_from_slice(b"2,41,Female,Cl\xe9veland,atypical angina,130,204,FALSE,normal,172,FALSE,1.4,upsloping,0,normal,0\n");
        text.extend_from_slice(format!("{}\n", raw_line(3, "41", "204", "1")).as_bytes());

        let reader = crate::formats::lines::LinesReader::new(text.as_slice(), "latin1");
        let records = PosRecordIterator::new(reader, "latin1");
        let mut buf = Vec::new();
        let stats = MapPartition::new(
            mapper(),
            DefaultSharder,
            records,
            vec![LinesWriter::new_to_write(&mut buf)],
            vec!["shard 0".to_string()],
        )
        .run("latin1")
        .unwrap();

        assert_eq!(stats.pairs_emitted, 2);
        assert_eq!(stats.skipped.total, 1);
        assert_eq!(stats.skipped.count("encoding"), 1);
        assert_eq!(String::from_utf8(buf).unwrap(), "60-69,200-239\t0\n40-49,200-239\t1\n");
    }
}
