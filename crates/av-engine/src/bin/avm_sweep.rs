//! `avm-sweep`: run or resume the validation sweep for one target period.
//!
//! ```bash
//! # full grid for April 2007, all three families
//! avm-sweep 200704
//!
//! # forests only, four compute threads, explicit paths
//! avm-sweep 2007-04 --family rf --workers 4 --data samples.csv --output rf-200704.jsonl
//!
//! # smoke run: one computed configuration per family
//! avm-sweep 200704 --test
//!
//! # the "sw" feature set, logged under valavm/sw-all/
//! avm-sweep 200704 --features sw=land_sq_ft,rooms
//! ```
//!
//! Rerunning the same command resumes from the checkpoint log.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;

use av_data::{CheckpointLog, CsvLoader, FeatureSet, SyncPolicy, WorkingDir};
use av_engine::{
    EarlyExit, Exhaustive, PredictionPolicy, SweepDriver, SweepOptions, SweepSummary, TestScope,
    WindowPolicy,
};
use av_models::{DefaultFitter, RunSetup};
use av_optimizer::{ConfigurationSpace, FamilySelection, SearchAxes};
use av_types::Period;

#[derive(Parser)]
#[command(name = "avm-sweep")]
#[command(about = "Restartable hyperparameter sweep for one target period")]
struct Cli {
    /// Period to validate on (YYYYMM or YYYY-MM)
    #[arg(value_name = "TARGET_PERIOD")]
    target: Period,

    /// Samples CSV [default: <working dir>/samples-train.csv]
    #[arg(long)]
    data: Option<PathBuf>,

    /// Checkpoint log [default: <working dir>/valavm/[<features>-]<family>/<YYYYMM>.jsonl]
    #[arg(long)]
    output: Option<PathBuf>,

    /// Feature columns: all, NAME=col,col,... or col,col,...
    #[arg(long, default_value = "all")]
    features: FeatureSet,

    /// Model family subgrid: all, en, rf or gb
    #[arg(long, default_value = "all")]
    family: FamilySelection,

    /// Abbreviated run writing to a test- log
    #[arg(long)]
    test: bool,

    /// What --test stops after
    #[arg(long, value_enum, default_value_t = Scope::PerFamily)]
    test_scope: Scope,

    /// JSON file overriding the search axes
    #[arg(long)]
    axes: Option<PathBuf>,

    /// Compute threads
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Seed for every randomized fit
    #[arg(long, default_value_t = RunSetup::DEFAULT_SEED)]
    seed: u64,

    /// Warn and continue when a train or test window is empty
    #[arg(long)]
    skip_empty_windows: bool,

    /// Warn and continue when a model fails or returns no predictions
    #[arg(long)]
    lenient_predictions: bool,

    /// fsync the log after every record
    #[arg(long)]
    fsync: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Scope {
    /// One computed configuration per family
    PerFamily,
    /// One computed configuration overall
    Global,
}

impl From<Scope> for TestScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::PerFamily => TestScope::PerFamily,
            Scope::Global => TestScope::Global,
        }
    }
}

impl Cli {
    fn options(&self) -> SweepOptions {
        SweepOptions::default()
            .with_workers(self.workers)
            .with_empty_window(if self.skip_empty_windows {
                WindowPolicy::Skip
            } else {
                WindowPolicy::Abort
            })
            .with_missing_predictions(if self.lenient_predictions {
                PredictionPolicy::SkipConfiguration
            } else {
                PredictionPolicy::AbortSweep
            })
            .with_sync(if self.fsync {
                SyncPolicy::FsyncEach
            } else {
                SyncPolicy::Flush
            })
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(summary) => {
            println!("{}", summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("avm-sweep: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<SweepSummary> {
    let working = WorkingDir::from_env();
    let data_path = cli.data.clone().unwrap_or_else(|| working.samples_path());
    let log_path = cli
        .output
        .clone()
        .unwrap_or_else(|| working.checkpoint_path(cli.target, &cli.features, cli.family.single(), cli.test));

    let axes = match &cli.axes {
        Some(path) => SearchAxes::from_json_file(path)?,
        None => SearchAxes::default(),
    };
    let space = ConfigurationSpace::new(axes, cli.family)?;

    let dataset = cli
        .features
        .apply(CsvLoader::new())
        .load(&data_path)
        .with_context(|| format!("loading {} features from {}", cli.features, data_path.display()))?;

    let options = cli.options();
    let mut log = CheckpointLog::open_with(&log_path, options.sync)?;
    let mut exit: Box<dyn EarlyExit> = if cli.test {
        TestScope::from(cli.test_scope).policy()
    } else {
        Box::new(Exhaustive)
    };

    let summary = SweepDriver::new(&dataset, &space, &DefaultFitter)
        .with_setup(RunSetup::new(cli.seed))
        .with_options(options)
        .run(cli.target, &mut log, exit.as_mut())
        .with_context(|| format!("sweep for {} into {}", cli.target, log_path.display()))?;
    log.close()?;
    Ok(summary)
}
