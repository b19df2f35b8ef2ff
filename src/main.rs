use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use env_logger::{Builder, Env};
use log::{info, warn};
use serde::Serialize;

use heartmr::buckets::BucketScheme;
use heartmr::controller::MRController;
use heartmr::formats::lines::{self, LinesWriter};
use heartmr::formats::report::{self, DashboardRow};
use heartmr::formats::util::{pending_output_name, PairReader, PosRecordIterator};
use heartmr::map::{MapPartition, RecordMapper};
use heartmr::mapreducer::DefaultSharder;
use heartmr::parameters::{delimiter_byte, ColumnLayout, InputOrder, JobConfig, MRParameters};
use heartmr::reduce::{Aggregator, ReducePartition};
use heartmr::skips::SkipCounter;
use heartmr::sort;

type LineSource = Box<dyn Iterator<Item = io::Result<String>> + Send>;

/// Buckets heart-disease patient records by age and cholesterol.
#[derive(Parser, Debug)]
#[command(name = "heartmr", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Map CSV records to `key<TAB>indicator` lines on stdout (streaming mapper).
    Map {
        /// Input file; stdin if omitted.
        input: Option<PathBuf>,

        #[command(flatten)]
        job: JobArgs,
    },
    /// Aggregate sorted `key<TAB>indicator` lines into one summary line per key (streaming reducer).
    Reduce {
        /// Input file; stdin if omitted.
        input: Option<PathBuf>,

        /// Write to this file instead of stdout. It only appears once the input was reduced completely.
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        job: JobArgs,
    },
    /// Run the whole job locally: parallel map, sort, parallel reduce.
    Run {
        /// Input file, or a directory whose files are read in name order.
        input: PathBuf,

        /// Number of map threads.
        #[arg(long)]
        mappers: Option<usize>,

        /// Number of reduce shards (and output files).
        #[arg(long)]
        reducers: Option<usize>,

        /// Size of one map partition in MiB.
        #[arg(long)]
        partition_mb: Option<usize>,

        /// Directory for intermediate files.
        #[arg(long)]
        temp_dir: Option<PathBuf>,

        /// Keep intermediate files after the job.
        #[arg(long)]
        keep_temp: bool,

        /// Prefix of the output files; the shard number is appended.
        #[arg(long)]
        output_prefix: Option<String>,

        #[command(flatten)]
        job: JobArgs,
    },
    /// Print reduce output files as a JSON array of dashboard rows.
    Report {
        /// Reduce output files.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Write statistics as JSON to this file.
        #[arg(long)]
        stats: Option<PathBuf>,
    },
}

/// Options shared by the map, reduce and run commands. Flags override the config file.
#[derive(Args, Debug)]
struct JobArgs {
    /// TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bucket scheme: decade or banded.
    #[arg(long)]
    scheme: Option<BucketScheme>,

    /// Input columns hold bucket labels instead of raw values.
    #[arg(long)]
    labeled: bool,

    /// Column index of age (or age bucket).
    #[arg(long)]
    age_column: Option<usize>,

    /// Column index of cholesterol (or cholesterol bucket).
    #[arg(long)]
    chol_column: Option<usize>,

    /// Column index of the diagnosis severity.
    #[arg(long)]
    severity_column: Option<usize>,

    /// First-column value of the header line.
    #[arg(long)]
    header_label: Option<String>,

    /// Field delimiter.
    #[arg(long)]
    delimiter: Option<char>,

    /// Reducer input order: grouped (trusted) or verified.
    #[arg(long)]
    input_order: Option<InputOrder>,

    /// Write statistics as JSON to this file.
    #[arg(long)]
    stats: Option<PathBuf>,
}

impl JobArgs {
    fn params(&self) -> anyhow::Result<MRParameters> {
        let mut params = MRParameters::new();
        if let Some(path) = &self.config {
            params = JobConfig::from_file(path)
                .and_then(|c| c.apply(params))
                .with_context(|| format!("loading config {}", path.display()))?;
        }

        if let Some(scheme) = self.scheme {
            params = params.set_scheme(scheme);
        }
        let layout = self.layout(if self.labeled {
            ColumnLayout::labeled()
        } else {
            params.layout.clone()
        });
        params = params.set_layout(layout);
        if let Some(label) = &self.header_label {
            params = params.set_header_label(label.clone());
        }
        if let Some(d) = self.delimiter {
            params = params.set_delimiter(delimiter_byte(d)?);
        }
        if let Some(order) = self.input_order {
            params = params.set_input_order(order);
        }
        Ok(params)
    }

    fn layout(&self, base: ColumnLayout) -> ColumnLayout {
        match base {
            ColumnLayout::Raw {
                age,
                cholesterol,
                severity,
            } => ColumnLayout::Raw {
                age: self.age_column.unwrap_or(age),
                cholesterol: self.chol_column.unwrap_or(cholesterol),
                severity: self.severity_column.unwrap_or(severity),
            },
            ColumnLayout::Labeled {
                age_bucket,
                chol_bucket,
                severity,
            } => ColumnLayout::Labeled {
                age_bucket: self.age_column.unwrap_or(age_bucket),
                chol_bucket: self.chol_column.unwrap_or(chol_bucket),
                severity: self.severity_column.unwrap_or(severity),
            },
        }
    }
}

fn open_input(input: Option<&Path>) -> anyhow::Result<(LineSource, String)> {
    match input {
        None => Ok((Box::new(lines::new_from_stdin()), "<stdin>".to_string())),
        Some(path) if path.is_dir() => {
            let reader = lines::new_from_dir(path, "").with_context(|| format!("reading directory {}", path.display()))?;
            Ok((Box::new(reader), path.display().to_string()))
        }
        Some(path) => {
            let reader = lines::new_from_file(path).with_context(|| format!("opening {}", path.display()))?;
            Ok((Box::new(reader), path.display().to_string()))
        }
    }
}

fn write_stats<T: Serialize>(path: Option<&Path>, stats: &T) -> anyhow::Result<()> {
    if let Some(path) = path {
        let json = serde_json::to_string_pretty(stats)?;
        fs::write(path, json).with_context(|| format!("writing stats to {}", path.display()))?;
    }
    Ok(())
}

fn map(input: Option<&Path>, job: &JobArgs) -> anyhow::Result<()> {
    let params = job.params()?;
    params.validate()?;
    let (source, origin) = open_input(input)?;

    let stdout = io::stdout().lock();
    let partition = MapPartition::new(
        RecordMapper::new(&params),
        DefaultSharder,
        PosRecordIterator::new(source, origin.clone()),
        vec![LinesWriter::new_to_write(stdout)],
        vec!["<stdout>".to_string()],
    );
    let stats = partition.run(&origin)?;
    write_stats(job.stats.as_deref(), &stats)
}

fn reduce(input: Option<&Path>, output: Option<&Path>, job: &JobArgs) -> anyhow::Result<()> {
    let params = job.params()?;
    params.validate()?;
    let (source, origin) = open_input(input)?;
    let pairs = PairReader::new(source, origin.clone());
    let aggregator = Aggregator::for_order(params.input_order);

    let stats = match output {
        None => {
            let out = LinesWriter::new_to_write(io::stdout().lock());
            ReducePartition::new(aggregator, pairs, out, "<stdout>").run(&origin)?.0
        }
        Some(path) => {
            let pending = pending_output_name(path);
            let out = LinesWriter::new_to_file(&pending).with_context(|| format!("creating {}", pending.display()))?;
            let outcome = ReducePartition::new(aggregator, pairs, out, pending.display().to_string()).run(&origin);
            match outcome {
                Ok((stats, file)) => {
                    drop(file);
                    fs::rename(&pending, path).with_context(|| format!("renaming {} to {}", pending.display(), path.display()))?;
                    stats
                }
                Err(e) => {
                    if let Err(rm) = sort::remove_if_present(&pending) {
                        warn!("could not remove {}: {}", pending.display(), rm);
                    }
                    return Err(e.into());
                }
            }
        }
    };
    write_stats(job.stats.as_deref(), &stats)
}

#[allow(clippy::too_many_arguments)]
fn run(
    input: &Path,
    mappers: Option<usize>,
    reducers: Option<usize>,
    partition_mb: Option<usize>,
    temp_dir: Option<PathBuf>,
    keep_temp: bool,
    output_prefix: Option<String>,
    job: &JobArgs,
) -> anyhow::Result<()> {
    let mut params = job.params()?;
    if mappers.is_some() || reducers.is_some() {
        let mappers = mappers.unwrap_or(params.mappers);
        let reducers = reducers.unwrap_or(params.reducers);
        params = params.set_concurrency(mappers, reducers);
    }
    if let Some(mb) = partition_mb {
        params = params.set_partition_size(mb * 1024 * 1024);
    }
    if let Some(dir) = temp_dir {
        params = params.set_map_output_location(dir);
    }
    if keep_temp {
        params = params.keep_temp_files(true);
    }
    if let Some(prefix) = output_prefix {
        params = params.set_out_name(prefix);
    }

    let (source, origin) = open_input(Some(input))?;
    let records = PosRecordIterator::new(source, origin.clone());
    let report = MRController::run(RecordMapper::new(&params), DefaultSharder, params, records, &origin)
        .with_context(|| format!("job on {} failed", origin))?;

    let mut stdout = io::stdout().lock();
    for out in &report.outputs {
        writeln!(stdout, "{}", out.display())?;
    }
    write_stats(job.stats.as_deref(), &report)
}

fn print_report(files: &[PathBuf], stats: Option<&Path>) -> anyhow::Result<()> {
    let mut skips = SkipCounter::new();
    let mut rows: Vec<DashboardRow> = Vec::new();

    for path in files {
        let origin = path.display().to_string();
        let reader = lines::new_from_file(path).with_context(|| format!("opening {}", origin))?;
        rows.extend(report::read_rows(reader, &origin, &mut skips)?);
    }
    if rows.is_empty() && !skips.is_empty() {
        bail!("no line of {} files could be parsed as reduce output", files.len());
    }
    info!("{} rows, {} lines skipped", rows.len(), skips.total);

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &rows)?;
    writeln!(stdout)?;
    write_stats(stats, &skips)
}

fn main() -> anyhow::Result<()> {
    Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Map { input, job } => map(input.as_deref(), &job),
        Command::Reduce { input, output, job } => reduce(input.as_deref(), output.as_deref(), &job),
        Command::Run {
            input,
            mappers,
            reducers,
            partition_mb,
            temp_dir,
            keep_temp,
            output_prefix,
            job,
        } => run(
            &input,
            mappers,
            reducers,
            partition_mb,
            temp_dir,
            keep_temp,
            output_prefix,
            &job,
        ),
        Command::Report { files, stats } => print_report(&files, stats.as_deref()),
    }
}
