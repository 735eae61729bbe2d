//! The sweep driver: load the checkpoint, walk the grid, compute what is
//! missing and append each result as soon as it exists.
//!
//! With one worker everything happens on the calling thread in generation
//! order. With more, COMPUTE fans out over a rayon pool while the calling
//! thread stays the only writer to the checkpoint log, fed through a bounded
//! crossbeam channel. The completed set is loaded before any worker starts.

use av_data::{select, CheckpointLog, Dataset};
use av_models::{DefaultFitter, ModelFitter, RunSetup};
use av_optimizer::ConfigurationSpace;
use av_types::{
    internal_error, AvError, AvResult, DataError, ErrorStatistics, EvaluationResult, ModelConfig,
    ModelFamily, Period, SweepError,
};
use crossbeam_channel::bounded;
use parking_lot::RwLock;
use rayon::prelude::*;
use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, info_span, warn};

use crate::policy::{EarlyExit, ExitDecision, PredictionPolicy, SweepOptions, WindowPolicy};
use crate::summary::SweepSummary;

/// What COMPUTE produced for one configuration.
#[derive(Debug)]
enum Outcome {
    Computed(EvaluationResult),
    EmptyWindow,
    Failed,
}

/// Runs sweeps of one configuration space over one dataset.
pub struct SweepDriver<'a, F: ModelFitter + ?Sized = DefaultFitter> {
    dataset: &'a Dataset,
    space: &'a ConfigurationSpace,
    fitter: &'a F,
    setup: RunSetup,
    options: SweepOptions,
}

impl<'a, F: ModelFitter + ?Sized> SweepDriver<'a, F> {
    pub fn new(dataset: &'a Dataset, space: &'a ConfigurationSpace, fitter: &'a F) -> Self {
        Self {
            dataset,
            space,
            fitter,
            setup: RunSetup::default(),
            options: SweepOptions::default(),
        }
    }

    pub fn with_setup(mut self, setup: RunSetup) -> Self {
        self.setup = setup;
        self
    }

    pub fn with_options(mut self, options: SweepOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SweepOptions {
        &self.options
    }

    /// Sweep every configuration of the space for `target`.
    ///
    /// Configurations already in `log` are skipped. Each computed result is
    /// appended before the next configuration is considered, so an
    /// interrupted sweep resumes where it stopped. Fatal conditions (storage
    /// failures, and empty windows or missing predictions under the strict
    /// policies) abort the sweep with the error.
    pub fn run(
        &self,
        target: Period,
        log: &mut CheckpointLog,
        exit: &mut dyn EarlyExit,
    ) -> AvResult<SweepSummary> {
        let mut summary = SweepSummary::new(target, self.space.selection(), self.space.len());
        let span = info_span!("sweep", id = %summary.id, target = %target);
        let _guard = span.enter();

        summary.mark_running();
        let mut completed = log.load_completed()?;
        summary.already_complete = self.space.iter().filter(|c| completed.contains(c)).count();
        info!(
            "Sweeping {} configurations ({}) from {}: {} already complete, {} worker(s)",
            summary.generated,
            summary.selection,
            log.path().display(),
            summary.already_complete,
            self.options.workers
        );

        let outcome = if self.options.workers > 1 {
            self.run_parallel(target, log, exit, &completed, &mut summary)
        } else {
            self.run_sequential(target, log, exit, &mut completed, &mut summary)
        };

        let cut_short = match outcome {
            Ok(cut_short) => cut_short,
            Err(e) => {
                error!(
                    "Sweep aborted after {} computed configuration(s): {}",
                    summary.computed, e
                );
                return Err(e);
            }
        };

        if cut_short && summary.not_attempted() > 0 {
            summary.mark_stopped_early();
        } else {
            summary.mark_completed();
        }
        info!("{}", summary);
        Ok(summary)
    }

    /// Returns whether an early-exit decision cut iteration short.
    fn run_sequential(
        &self,
        target: Period,
        log: &mut CheckpointLog,
        exit: &mut dyn EarlyExit,
        completed: &mut HashSet<ModelConfig>,
        summary: &mut SweepSummary,
    ) -> AvResult<bool> {
        let mut cut_short = false;

        for family in self.space.families() {
            let n = self.space.family_len(family);
            for (i, config) in self.space.iter_family(family).enumerate() {
                if completed.contains(&config) {
                    continue;
                }
                info!("fitting {} of {} {}", i + 1, n, family);

                let outcome = self.compute(&config, target)?;
                match settle(config, outcome, log, completed, summary, exit)? {
                    ExitDecision::Continue => {}
                    ExitDecision::StopFamily => {
                        debug!("Early exit: leaving the rest of {} unattempted", family);
                        cut_short = true;
                        break;
                    }
                    ExitDecision::StopSweep => {
                        debug!("Early exit: stopping the sweep after {}", config);
                        return Ok(true);
                    }
                }
            }
        }
        Ok(cut_short)
    }

    /// Results that arrive after their family was stopped, after the sweep
    /// was stopped, or after a fatal error are dropped unrecorded.
    fn run_parallel(
        &self,
        target: Period,
        log: &mut CheckpointLog,
        exit: &mut dyn EarlyExit,
        completed: &HashSet<ModelConfig>,
        summary: &mut SweepSummary,
    ) -> AvResult<bool> {
        let pending: Vec<ModelConfig> = self.space.iter().filter(|c| !completed.contains(c)).collect();
        let total = pending.len();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers)
            .thread_name(|i| format!("avm-worker-{}", i))
            .build()
            .map_err(|e| internal_error!("Failed to build worker pool: {}", e))?;

        let (tx, rx) = bounded::<(ModelConfig, AvResult<Outcome>)>(self.options.workers * 2);
        let halted = AtomicBool::new(false);
        let stopped_families: RwLock<HashSet<ModelFamily>> = RwLock::new(HashSet::new());

        let pending = &pending;
        let halted_ref = &halted;
        let stopped_ref = &stopped_families;
        let pool = &pool;

        std::thread::scope(|scope| {
            let producer = scope.spawn(move || {
                pool.install(|| {
                    pending.par_iter().for_each_with(tx, |tx, config| {
                        if halted_ref.load(Ordering::Relaxed)
                            || stopped_ref.read().contains(&config.family())
                        {
                            return;
                        }
                        let outcome = self.compute(config, target);
                        // The receiver only goes away once the writer loop is done.
                        let _ = tx.send((*config, outcome));
                    });
                });
            });

            let mut written = completed.clone();
            let mut failure: Option<AvError> = None;
            let mut cut_short = false;
            let mut settled = 0usize;

            for (config, outcome) in rx.iter() {
                if failure.is_some()
                    || halted.load(Ordering::Relaxed)
                    || stopped_families.read().contains(&config.family())
                {
                    debug!("Dropping late result for {}", config);
                    continue;
                }

                let decision = match outcome {
                    Ok(outcome) => {
                        settled += 1;
                        settle(config, outcome, log, &mut written, summary, exit)
                    }
                    Err(e) => Err(e),
                };
                match decision {
                    Ok(ExitDecision::Continue) => {
                        info!("settled {} of {} pending configurations, last {}", settled, total, config);
                    }
                    Ok(ExitDecision::StopFamily) => {
                        debug!("Early exit: leaving the rest of {} unattempted", config.family());
                        stopped_families.write().insert(config.family());
                        cut_short = true;
                    }
                    Ok(ExitDecision::StopSweep) => {
                        debug!("Early exit: stopping the sweep after {}", config);
                        halted.store(true, Ordering::Relaxed);
                        cut_short = true;
                    }
                    Err(e) => {
                        halted.store(true, Ordering::Relaxed);
                        failure = Some(e);
                    }
                }
            }

            if let Err(payload) = producer.join() {
                return Err(SweepError::WorkerPanicked {
                    message: panic_message(payload.as_ref()),
                }
                .into());
            }
            match failure {
                Some(e) => Err(e),
                None => Ok(cut_short),
            }
        })
    }

    fn compute(&self, config: &ModelConfig, target: Period) -> AvResult<Outcome> {
        let split = match select(self.dataset, target, config.lookback_periods()) {
            Ok(split) => split,
            Err(e @ AvError::Data(DataError::EmptyWindow { .. }))
                if self.options.empty_window == WindowPolicy::Skip =>
            {
                warn!("Skipping {}: {}", config, e);
                return Ok(Outcome::EmptyWindow);
            }
            Err(e) => return Err(e),
        };

        let model = match self.fitter.fit(config, split.train, &self.setup) {
            Ok(model) => model,
            Err(e) => return self.lenient(config, e),
        };

        let actuals: Vec<f64> = split.test.iter().map(|s| s.price).collect();
        let scored = model.predict(split.test).and_then(|predictions| {
            ErrorStatistics::compute(&actuals, &predictions).map(|stats| (predictions, stats))
        });
        let Some((predictions, stats)) = scored else {
            let missing = SweepError::MissingPredictions {
                config: config.to_string(),
            };
            return self.lenient(config, missing.into());
        };

        debug!(
            "{}: {} train rows, {} test rows, rmse {:.2}",
            config,
            split.train.len(),
            split.test.len(),
            stats.rmse
        );
        Ok(Outcome::Computed(EvaluationResult {
            target,
            train_rows: split.train.len(),
            test_rows: split.test.len(),
            actuals,
            predictions,
            stats,
            importances: model.importances(),
        }))
    }

    fn lenient(&self, config: &ModelConfig, e: AvError) -> AvResult<Outcome> {
        match self.options.missing_predictions {
            PredictionPolicy::AbortSweep => Err(e),
            PredictionPolicy::SkipConfiguration => {
                warn!("Leaving {} unrecorded: {}", config, e);
                Ok(Outcome::Failed)
            }
        }
    }
}

/// APPEND a computed result and consult the early-exit policy.
fn settle(
    config: ModelConfig,
    outcome: Outcome,
    log: &mut CheckpointLog,
    completed: &mut HashSet<ModelConfig>,
    summary: &mut SweepSummary,
    exit: &mut dyn EarlyExit,
) -> AvResult<ExitDecision> {
    match outcome {
        Outcome::Computed(result) => {
            log.append(&config, &result)?;
            completed.insert(config);
            summary.computed += 1;
            Ok(exit.after_computed(&config))
        }
        Outcome::EmptyWindow => {
            summary.empty_windows += 1;
            Ok(ExitDecision::Continue)
        }
        Outcome::Failed => {
            summary.failed += 1;
            Ok(ExitDecision::Continue)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Exhaustive, FirstComputed, FirstPerFamily};
    use crate::summary::SweepState;
    use av_data::Sample;
    use av_models::FittedModel;
    use av_optimizer::{FamilySelection, SearchAxes};
    use std::path::Path;
    use tempfile::TempDir;

    /// Predicts the training mean for every test row.
    struct MeanFitter;

    struct Constant(f64);

    impl FittedModel for Constant {
        fn predict(&self, test: &[Sample]) -> Option<Vec<f64>> {
            Some(vec![self.0; test.len()])
        }
    }

    impl ModelFitter for MeanFitter {
        fn fit(
            &self,
            _config: &ModelConfig,
            train: &[Sample],
            _setup: &RunSetup,
        ) -> AvResult<Box<dyn FittedModel>> {
            let mean = train.iter().map(|s| s.price).sum::<f64>() / train.len() as f64;
            Ok(Box::new(Constant(mean)))
        }
    }

    /// Like [`MeanFitter`] but boosted trees never predict.
    struct SilentBoosting;

    struct Silent;

    impl FittedModel for Silent {
        fn predict(&self, _test: &[Sample]) -> Option<Vec<f64>> {
            None
        }
    }

    impl ModelFitter for SilentBoosting {
        fn fit(
            &self,
            config: &ModelConfig,
            train: &[Sample],
            setup: &RunSetup,
        ) -> AvResult<Box<dyn FittedModel>> {
            match config.family() {
                ModelFamily::BoostedTrees => Ok(Box::new(Silent)),
                _ => MeanFitter.fit(config, train, setup),
            }
        }
    }

    fn period(s: &str) -> Period {
        s.parse().unwrap()
    }

    fn dataset() -> Dataset {
        let mut samples = Vec::new();
        for (p, rows) in [("2007-01", 2), ("2007-02", 3), ("2007-03", 1), ("2007-04", 4)] {
            for i in 0..rows {
                let x = (i + 1) as f64;
                samples.push(Sample::new(period(p), 1000.0 + 100.0 * x, vec![x, 10.0 - x]));
            }
        }
        Dataset::new(vec!["rooms".into(), "age".into()], samples)
    }

    /// 4 linear, 2 forest and 2 boosted configurations.
    fn space() -> ConfigurationSpace {
        let mut axes = SearchAxes::abbreviated();
        axes.lookback_periods = vec![1, 2];
        axes.linear.alpha = vec![0.1, 0.3];
        ConfigurationSpace::new(axes, FamilySelection::All).unwrap()
    }

    fn line_count(path: &Path) -> usize {
        std::fs::read_to_string(path).unwrap().lines().count()
    }

    #[test]
    fn sweeps_every_configuration() {
        let dir = TempDir::new().unwrap();
        let (data, space) = (dataset(), space());
        let mut log = CheckpointLog::open(dir.path().join("200704.jsonl")).unwrap();

        let summary = SweepDriver::new(&data, &space, &MeanFitter)
            .run(period("2007-04"), &mut log, &mut Exhaustive)
            .unwrap();

        assert_eq!(summary.state, SweepState::Completed);
        assert_eq!((summary.generated, summary.computed, summary.deferred()), (8, 8, 0));

        let records = log.load_records().unwrap();
        assert_eq!(records.len(), 8);
        let record = records.values().find(|r| r.config.lookback_periods() == 1).unwrap();
        assert_eq!(record.result.train_rows, 1);
        assert_eq!(record.result.test_rows, 4);
        assert_eq!(record.result.predictions, vec![1100.0; 4]);
    }

    #[test]
    fn second_run_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("200704.jsonl");
        let (data, space) = (dataset(), space());
        let driver = SweepDriver::new(&data, &space, &MeanFitter);

        let mut log = CheckpointLog::open(&path).unwrap();
        driver.run(period("2007-04"), &mut log, &mut Exhaustive).unwrap();
        let after_first = log.load_completed().unwrap();
        log.close().unwrap();

        let mut log = CheckpointLog::open(&path).unwrap();
        let summary = driver.run(period("2007-04"), &mut log, &mut Exhaustive).unwrap();
        assert_eq!((summary.already_complete, summary.computed), (8, 0));
        assert_eq!(log.appended(), 0);
        assert_eq!(log.load_completed().unwrap(), after_first);
        assert_eq!(line_count(&path), 8);
    }

    #[test]
    fn resumed_sweep_matches_uninterrupted_sweep() {
        let dir = TempDir::new().unwrap();
        let (data, space) = (dataset(), space());
        let driver = SweepDriver::new(&data, &space, &MeanFitter);
        let target = period("2007-04");

        let mut reference = CheckpointLog::open(dir.path().join("reference.jsonl")).unwrap();
        driver.run(target, &mut reference, &mut Exhaustive).unwrap();

        let path = dir.path().join("resumed.jsonl");
        let mut log = CheckpointLog::open(&path).unwrap();
        let mut appended = 0;
        let mut interrupt = |_: &ModelConfig| {
            appended += 1;
            if appended == 3 {
                ExitDecision::StopSweep
            } else {
                ExitDecision::Continue
            }
        };
        let first = driver.run(target, &mut log, &mut interrupt).unwrap();
        assert_eq!(first.computed, 3);
        assert_eq!(first.state, SweepState::StoppedEarly);
        drop(log);

        let mut log = CheckpointLog::open(&path).unwrap();
        let second = driver.run(target, &mut log, &mut Exhaustive).unwrap();
        assert_eq!((second.already_complete, second.computed), (3, 5));
        assert_eq!(log.load_completed().unwrap(), reference.load_completed().unwrap());
    }

    #[test]
    fn duplicate_records_do_not_disturb_resume() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("200704.jsonl");
        let (data, space) = (dataset(), space());
        let driver = SweepDriver::new(&data, &space, &MeanFitter);

        let mut log = CheckpointLog::open(&path).unwrap();
        driver.run(period("2007-04"), &mut log, &mut Exhaustive).unwrap();
        let record = log.load_records().unwrap().into_values().next().unwrap();
        log.append_record(&record).unwrap();
        assert_eq!(line_count(&path), 9);

        let scan = log.scan().unwrap();
        assert_eq!((scan.len(), scan.duplicates), (8, 1));
        let summary = driver.run(period("2007-04"), &mut log, &mut Exhaustive).unwrap();
        assert_eq!((summary.already_complete, summary.computed), (8, 0));
    }

    #[test]
    fn missing_predictions_abort_the_sweep() {
        let dir = TempDir::new().unwrap();
        let (data, space) = (dataset(), space());
        let mut log = CheckpointLog::open(dir.path().join("200704.jsonl")).unwrap();

        let err = SweepDriver::new(&data, &space, &SilentBoosting)
            .run(period("2007-04"), &mut log, &mut Exhaustive)
            .unwrap_err();
        assert!(matches!(err, AvError::Sweep(SweepError::MissingPredictions { .. })));
        // linear and forest configurations come first and stay recorded
        assert_eq!(log.load_completed().unwrap().len(), 6);
    }

    #[test]
    fn lenient_policy_leaves_failures_unrecorded() {
        let dir = TempDir::new().unwrap();
        let (data, space) = (dataset(), space());
        let mut log = CheckpointLog::open(dir.path().join("200704.jsonl")).unwrap();
        let options = SweepOptions::default().with_missing_predictions(PredictionPolicy::SkipConfiguration);

        let summary = SweepDriver::new(&data, &space, &SilentBoosting)
            .with_options(options)
            .run(period("2007-04"), &mut log, &mut Exhaustive)
            .unwrap();
        assert_eq!(summary.state, SweepState::Completed);
        assert_eq!((summary.computed, summary.failed, summary.deferred()), (6, 2, 2));
        assert!(log
            .load_completed()
            .unwrap()
            .iter()
            .all(|c| c.family() != ModelFamily::BoostedTrees));
    }

    #[test]
    fn empty_windows_abort_or_skip() {
        let dir = TempDir::new().unwrap();
        let (data, space) = (dataset(), space());
        // nothing precedes 2007-01
        let target = period("2007-01");

        let mut log = CheckpointLog::open(dir.path().join("strict.jsonl")).unwrap();
        let err = SweepDriver::new(&data, &space, &MeanFitter)
            .run(target, &mut log, &mut Exhaustive)
            .unwrap_err();
        assert!(matches!(err, AvError::Data(DataError::EmptyWindow { .. })));

        let mut log = CheckpointLog::open(dir.path().join("lenient.jsonl")).unwrap();
        let summary = SweepDriver::new(&data, &space, &MeanFitter)
            .with_options(SweepOptions::default().with_empty_window(WindowPolicy::Skip))
            .run(target, &mut log, &mut Exhaustive)
            .unwrap();
        assert_eq!((summary.computed, summary.empty_windows), (0, 8));
        assert!(log.load_completed().unwrap().is_empty());
    }

    #[test]
    fn first_per_family_computes_one_of_each() {
        let dir = TempDir::new().unwrap();
        let (data, space) = (dataset(), space());
        let mut log = CheckpointLog::open(dir.path().join("test-200704.jsonl")).unwrap();

        let summary = SweepDriver::new(&data, &space, &MeanFitter)
            .run(period("2007-04"), &mut log, &mut FirstPerFamily::default())
            .unwrap();
        assert_eq!(summary.computed, 3);
        assert_eq!(summary.state, SweepState::StoppedEarly);

        let families: HashSet<ModelFamily> =
            log.load_completed().unwrap().iter().map(|c| c.family()).collect();
        assert_eq!(families.len(), 3);
    }

    #[test]
    fn parallel_sweep_matches_sequential() {
        let dir = TempDir::new().unwrap();
        let (data, space) = (dataset(), space());
        let target = period("2007-04");

        let mut sequential = CheckpointLog::open(dir.path().join("sequential.jsonl")).unwrap();
        SweepDriver::new(&data, &space, &DefaultFitter)
            .run(target, &mut sequential, &mut Exhaustive)
            .unwrap();

        let mut parallel = CheckpointLog::open(dir.path().join("parallel.jsonl")).unwrap();
        let summary = SweepDriver::new(&data, &space, &DefaultFitter)
            .with_options(SweepOptions::default().with_workers(4))
            .run(target, &mut parallel, &mut Exhaustive)
            .unwrap();

        assert_eq!(summary.computed, 8);
        assert_eq!(parallel.load_records().unwrap(), sequential.load_records().unwrap());
    }

    #[test]
    fn parallel_sweep_honors_early_exit_and_errors() {
        let dir = TempDir::new().unwrap();
        let (data, space) = (dataset(), space());
        let parallel = SweepOptions::default().with_workers(3);

        let mut log = CheckpointLog::open(dir.path().join("first.jsonl")).unwrap();
        let summary = SweepDriver::new(&data, &space, &MeanFitter)
            .with_options(parallel)
            .run(period("2007-04"), &mut log, &mut FirstComputed)
            .unwrap();
        assert_eq!(summary.computed, 1);
        assert_eq!(log.load_completed().unwrap().len(), 1);

        let mut log = CheckpointLog::open(dir.path().join("silent.jsonl")).unwrap();
        let err = SweepDriver::new(&data, &space, &SilentBoosting)
            .with_options(parallel)
            .run(period("2007-04"), &mut log, &mut Exhaustive)
            .unwrap_err();
        assert!(matches!(err, AvError::Sweep(SweepError::MissingPredictions { .. })));
    }

    #[test]
    fn parallel_late_results_are_not_settled() {
        let dir = TempDir::new().unwrap();
        let (data, space) = (dataset(), space());
        let path = dir.path().join("test-200704.jsonl");
        let mut log = CheckpointLog::open(&path).unwrap();

        let summary = SweepDriver::new(&data, &space, &MeanFitter)
            .with_options(SweepOptions::default().with_workers(4))
            .run(period("2007-04"), &mut log, &mut FirstPerFamily::default())
            .unwrap();
        assert_eq!(summary.computed, 3);
        assert_eq!(summary.empty_windows + summary.failed, 0);
        assert_eq!(summary.not_attempted(), 8 - 3);
        assert_eq!(summary.state, SweepState::StoppedEarly);
        assert_eq!(line_count(&path), 3);
    }
}
