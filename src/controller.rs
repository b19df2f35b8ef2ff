//! Controls the execution of a mapreduce instance.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, sync_channel};

use log::{info, warn};
use scoped_threadpool::Pool;
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::{InputFault, PipelineError, Result};
use crate::formats::util::{map_output_name, pending_output_name, reduce_output_name, PairReader, SinkGenerator};
use crate::formats::{lines, lines::LinesSinkGenerator};
use crate::input_cache::InputCache;
use crate::map::{MapPartition, MapStats};
use crate::mapreducer::{Mapper, Sharder};
use crate::parameters::MRParameters;
use crate::record_types::Record;
use crate::reduce::{Aggregator, ReducePartition, ReduceStats};
use crate::shard_merge::ShardMergeIterator;
use crate::sort::{self, faults_first};
use crate::skips::SkipCounter;

/// Records per InputCache chunk.
const INPUT_CHUNK_LENGTH: usize = 8192;

/// Summary of a completed job.
#[derive(Clone, Debug, Serialize)]
pub struct JobReport {
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub elapsed_ms: i64,
    pub map_partitions: usize,
    pub map: MapStats,
    /// Intermediate lines dropped while sorting map output.
    pub sort_skipped: SkipCounter,
    pub reduce: ReduceStats,
    pub outputs: Vec<PathBuf>,
}

pub struct MRController<M: Mapper, S: Sharder> {
    params: MRParameters,
    mapper: M,
    sharder: S,

    // How many map partitions have been run?
    map_partitions_run: usize,
}

impl<M: Mapper, S: Sharder> MRController<M, S> {
    /// Create a new mapreduce instance and execute it immediately.
    /// `input` yields the numbered lines of the job input; `origin` names it in messages.
    pub fn run<In>(mapper: M, sharder: S, params: MRParameters, input: In, origin: &str) -> Result<JobReport>
    where
        In: Iterator<Item = std::result::Result<Record, InputFault>>,
    {
        params.validate()?;
        let started_at = OffsetDateTime::now_utc();

        fs::create_dir_all(&params.map_output_location).map_err(|e| PipelineError::Filesystem {
            path: params.map_output_location.clone(),
            source: e,
        })?;

        let mut controller = MRController {
            params,
            mapper,
            sharder,
            map_partitions_run: 0,
        };

        let result = controller
            .run_map(input, origin)
            .and_then(|map| controller.run_reduce().map(|r| (map, r)));
        controller.clean_up();
        let (map, (sort_skipped, reduce, outputs)) = result?;

        let elapsed = OffsetDateTime::now_utc() - started_at;
        let report = JobReport {
            started_at,
            elapsed_ms: elapsed.whole_milliseconds() as i64,
            map_partitions: controller.map_partitions_run,
            map,
            sort_skipped,
            reduce,
            outputs,
        };
        info!(
            "job done in {} ms: {} partitions, {} pairs, {} groups in {} outputs",
            report.elapsed_ms,
            report.map_partitions,
            report.map.pairs_emitted,
            report.reduce.groups_emitted,
            report.outputs.len()
        );
        Ok(report)
    }

    fn map_runner(mapper: M, sharder: S, params: &MRParameters, inp: InputCache) -> Result<MapStats> {
        let gen = LinesSinkGenerator::new_to_files();
        let mut outputs = Vec::with_capacity(params.reducers);
        let mut names = Vec::with_capacity(params.reducers);

        for shard in 0..params.reducers {
            let name = map_output_name(&params.map_output_location, params.shard_id, shard);
            let out = gen
                .new_map_output(&params.map_output_location, params.shard_id, shard)
                .map_err(|e| PipelineError::write(name.display().to_string(), e))?;
            outputs.push(out);
            names.push(name.display().to_string());
        }

        let map_part = MapPartition::new(mapper, sharder, inp, outputs, names);
        map_part.run(&format!("partition {}", params.shard_id))
    }

    fn run_map<In>(&mut self, mut input: In, origin: &str) -> Result<MapStats>
    where
        In: Iterator<Item = std::result::Result<Record, InputFault>>,
    {
        let mut pool = Pool::new(self.params.mappers as u32);
        // At most `mappers` partitions are held in memory at any time.
        let (send, recv) = sync_channel(self.params.mappers);
        let (results_send, results) = channel();

        for _ in 0..self.params.mappers {
            let _ = send.send(());
        }

        let mut read_error = None;
        let params = &self.params;
        let mapper = &self.mapper;
        let sharder = &self.sharder;
        let partitions = &mut self.map_partitions_run;

        pool.scoped(|scope| {
            loop {
                let _ = recv.recv();

                let inp = match InputCache::from_iter(INPUT_CHUNK_LENGTH, params.map_partition_size, &mut input) {
                    Ok(inp) => inp,
                    Err(e) => {
                        read_error = Some(PipelineError::from(e));
                        break;
                    }
                };
                if inp.is_empty() {
                    break;
                }

                let params = params.clone().set_shard_id(*partitions);
                let mapper = mapper.clone();
                let sharder = sharder.clone();
                let done = send.clone();
                let results = results_send.clone();

                scope.execute(move || {
                    let _ = results.send(MRController::<M, S>::map_runner(mapper, sharder, &params, inp));
                    let _ = done.send(());
                });
                *partitions += 1;
            }

            scope.join_all();
        });
        drop(results_send);

        if let Some(e) = read_error {
            return Err(e);
        }

        let mut stats = MapStats::default();
        for r in results.iter() {
            stats.merge(&r?);
        }
        info!(
            "map phase ({}): {} partitions, {} lines, {} pairs, {} skipped",
            origin, self.map_partitions_run, stats.lines_read, stats.pairs_emitted, stats.skipped.total
        );
        if !stats.skipped.is_empty() {
            warn!("map phase skipped {} lines of {}", stats.skipped.total, origin);
        }
        Ok(stats)
    }

    fn reduce_runner(params: &MRParameters, partitions: usize, shard: usize, final_name: &Path) -> Result<(SkipCounter, ReduceStats)> {
        let mut sort_skipped = SkipCounter::new();
        let mut inputs = Vec::with_capacity(partitions);

        for part in 0..partitions {
            let name = map_output_name(&params.map_output_location, part, shard);
            sort::sort_shard_file(&name, &mut sort_skipped)?;
            let reader = lines::new_from_file(&name).map_err(|e| PipelineError::Filesystem {
                path: name.clone(),
                source: e,
            })?;
            inputs.push(PairReader::new(reader, name.display().to_string()));
        }
        let merged = ShardMergeIterator::build(inputs, faults_first);

        let pending = pending_output_name(final_name);
        let output = LinesSinkGenerator::new_to_files()
            .new_output(&pending)
            .map_err(|e| PipelineError::write(pending.display().to_string(), e))?;
        let reduce_part = ReducePartition::new(
            Aggregator::for_order(params.input_order),
            merged,
            output,
            pending.display().to_string(),
        );

        match reduce_part.run(&format!("shard {}", shard)) {
            Ok((stats, file)) => {
                drop(file);
                fs::rename(&pending, final_name).map_err(|e| PipelineError::Filesystem {
                    path: final_name.to_path_buf(),
                    source: e,
                })?;
                Ok((sort_skipped, stats))
            }
            Err(e) => {
                if let Err(rm) = sort::remove_if_present(&pending) {
                    warn!("could not remove {}: {}", pending.display(), rm);
                }
                Err(e)
            }
        }
    }

    fn run_reduce(&self) -> Result<(SkipCounter, ReduceStats, Vec<PathBuf>)> {
        let mut pool = Pool::new(self.params.reducers as u32);
        let (results_send, results) = channel();

        pool.scoped(|scope| {
            for i in 0..self.params.reducers {
                let params = self.params.clone().set_shard_id(i);
                let map_partitions = self.map_partitions_run;
                let results = results_send.clone();

                scope.execute(move || {
                    let name = reduce_output_name(&params.reduce_output_shard_prefix, i);
                    let r = MRController::<M, S>::reduce_runner(&params, map_partitions, i, &name);
                    let _ = results.send((i, name, r));
                });
            }
        });
        drop(results_send);

        let mut done: Vec<_> = results.iter().collect();
        done.sort_by_key(|(i, _, _)| *i);

        let mut sort_skipped = SkipCounter::new();
        let mut stats = ReduceStats::default();
        let mut outputs = Vec::with_capacity(done.len());
        let mut first_error = None;

        for (_, name, r) in done {
            match r {
                Ok((s, rs)) => {
                    sort_skipped.merge(&s);
                    stats.merge(&rs);
                    outputs.push(name);
                }
                Err(e) => {
                    warn!("reduce output {} failed: {}", name.display(), e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        if outputs.len() != self.params.reducers {
            return Err(PipelineError::Worker(format!(
                "{} of {} reduce shards reported back",
                outputs.len(),
                self.params.reducers
            )));
        }
        Ok((sort_skipped, stats, outputs))
    }

    fn clean_up(&self) {
        if self.params.keep_temp_files {
            return;
        }
        for mpart in 0..self.map_partitions_run {
            for rshard in 0..self.params.reducers {
                let name = map_output_name(&self.params.map_output_location, mpart, rshard);
                if let Err(e) = sort::remove_if_present(&name) {
                    warn!("could not remove {}: {}", name.display(), e);
                }
            }
        }
        // Only succeeds if nothing else lives in the directory.
        let _ = fs::remove_dir(&self.params.map_output_location);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::report::parse_output_line;
    use crate::formats::util::PosRecordIterator;
    use crate::map::RecordMapper;
    use crate::mapreducer::DefaultSharder;
    use crate::parameters::InputOrder;
    use std::io;

    fn input(lines: &[String]) -> impl Iterator<Item = std::result::Result<Record, InputFault>> {
        let src: Vec<io::Result<String>> = lines.iter().cloned().map(Ok).collect();
        PosRecordIterator::new(src.into_iter(), "test")
    }

    fn patients(n: u32) -> Vec<String> {
        let mut v = vec!["id,age,sex,dataset,cp,trestbps,chol,fbs,restecg,thalch,exang,oldpeak,slope,ca,thal,num".to_string()];
        for i in 0..n {
            let age = 20 + (i * 7) % 60;
            let chol = 120 + (i * 37) % 250;
            let num = i % 5;
            v.push(format!("{},{},M,X,cp,140,{},F,n,150,F,1.0,flat,0,normal,{}", i, age, chol, num));
        }
        v
    }

    fn params(dir: &Path, mappers: usize, reducers: usize) -> MRParameters {
        MRParameters::new()
            .set_concurrency(mappers, reducers)
            .set_partition_size(2000)
            .set_map_output_location(dir.join("tmp"))
            .set_out_name(dir.join("output_").display().to_string())
            .set_input_order(InputOrder::Verified)
    }

    #[test]
    fn test_job_conserves_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut lines = patients(400);
        lines.insert(50, "broken,line".to_string());
        lines.insert(90, String::new());

        let p = params(dir.path(), 3, 2);
        let report = MRController::run(RecordMapper::new(&p), DefaultSharder, p, input(&lines), "test").unwrap();

        assert!(report.map_partitions > 1);
        assert_eq!(report.map.pairs_emitted, 400);
        assert_eq!(report.map.header_lines, 1);
        assert_eq!(report.map.blank_lines, 1);
        assert_eq!(report.map.skipped.total, 1);
        assert_eq!(report.reduce.records_aggregated, 400);
        assert_eq!(report.outputs.len(), 2);

        let mut total = 0;
        let mut keys = Vec::new();
        for out in &report.outputs {
            for line in fs::read_to_string(out).unwrap().lines() {
                let row = parse_output_line(line).unwrap();
                total += row.total;
                keys.push(format!("{},{}", row.age_bucket, row.chol_bucket));
            }
        }
        assert_eq!(total, 400);
        let n = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), n, "a key was reported by more than one run");

        // Intermediate files are gone.
        assert!(!dir.path().join("tmp").exists());
    }

    #[test]
    fn test_keep_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let p = params(dir.path(), 1, 2).keep_temp_files(true);
        let report = MRController::run(RecordMapper::new(&p), DefaultSharder, p, input(&patients(20)), "test").unwrap();

        assert_eq!(report.map_partitions, 1);
        assert!(dir.path().join("tmp").join("mapout_0.0").exists());
        assert!(dir.path().join("tmp").join("mapout_0.1").exists());
    }

    #[test]
    fn test_read_error_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let p = params(dir.path(), 2, 1);
        let mut src: Vec<io::Result<String>> = patients(10).into_iter().map(Ok).collect();
        src.push(Err(io::Error::new(io::ErrorKind::Other, "disk gone")));

        let r = MRController::run(
            RecordMapper::new(&p),
            DefaultSharder,
            p,
            PosRecordIterator::new(src.into_iter(), "flaky"),
            "flaky",
        );
        assert!(matches!(r, Err(PipelineError::Read { line: 11, .. })));
        assert!(!dir.path().join("output_0").exists());
    }

    #[test]
    fn test_invalid_params() {
        let dir = tempfile::tempdir().unwrap();
        let p = params(dir.path(), 0, 1);
        let r = MRController::run(RecordMapper::new(&p), DefaultSharder, p, input(&patients(3)), "test");
        assert!(matches!(r, Err(PipelineError::Config(_))));
    }
}
