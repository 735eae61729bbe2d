//! Caller-configurable sweep behavior: early exit and error policies.

use av_data::SyncPolicy;
use av_types::{ModelConfig, ModelFamily};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What the driver should do after a configuration has been computed and recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    Continue,
    /// Leave the rest of this configuration's family unattempted.
    StopFamily,
    /// Leave everything not yet computed unattempted.
    StopSweep,
}

/// Early-exit predicate consulted after every successful append.
pub trait EarlyExit {
    fn after_computed(&mut self, config: &ModelConfig) -> ExitDecision;
}

impl<F> EarlyExit for F
where
    F: FnMut(&ModelConfig) -> ExitDecision,
{
    fn after_computed(&mut self, config: &ModelConfig) -> ExitDecision {
        self(config)
    }
}

/// Compute the whole grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exhaustive;

impl EarlyExit for Exhaustive {
    fn after_computed(&mut self, _config: &ModelConfig) -> ExitDecision {
        ExitDecision::Continue
    }
}

/// Stop the sweep after the first computed configuration, whatever its family.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstComputed;

impl EarlyExit for FirstComputed {
    fn after_computed(&mut self, _config: &ModelConfig) -> ExitDecision {
        ExitDecision::StopSweep
    }
}

/// Compute one configuration per family, then move to the next family.
#[derive(Debug, Clone, Default)]
pub struct FirstPerFamily {
    done: HashSet<ModelFamily>,
}

impl EarlyExit for FirstPerFamily {
    fn after_computed(&mut self, config: &ModelConfig) -> ExitDecision {
        self.done.insert(config.family());
        if self.done.len() == ModelFamily::ALL.len() {
            ExitDecision::StopSweep
        } else {
            ExitDecision::StopFamily
        }
    }
}

/// Abbreviated-run scope selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestScope {
    #[default]
    PerFamily,
    Global,
}

impl TestScope {
    pub fn policy(&self) -> Box<dyn EarlyExit> {
        match self {
            TestScope::PerFamily => Box::new(FirstPerFamily::default()),
            TestScope::Global => Box::new(FirstComputed),
        }
    }
}

/// Reaction to a configuration whose train or test window is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPolicy {
    #[default]
    Abort,
    /// Warn and leave the configuration unrecorded.
    Skip,
}

/// Reaction to a fit that fails or yields no usable predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionPolicy {
    #[default]
    AbortSweep,
    /// Warn and leave the configuration unrecorded; it is retried on the next run.
    SkipConfiguration,
}

/// Knobs for one sweep invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepOptions {
    pub empty_window: WindowPolicy,
    pub missing_predictions: PredictionPolicy,
    /// Compute threads; 1 runs the sweep on the calling thread.
    pub workers: usize,
    pub sync: SyncPolicy,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            empty_window: WindowPolicy::Abort,
            missing_predictions: PredictionPolicy::AbortSweep,
            workers: 1,
            sync: SyncPolicy::Flush,
        }
    }
}

impl SweepOptions {
    pub fn with_empty_window(mut self, policy: WindowPolicy) -> Self {
        self.empty_window = policy;
        self
    }

    pub fn with_missing_predictions(mut self, policy: PredictionPolicy) -> Self {
        self.missing_predictions = policy;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_sync(mut self, sync: SyncPolicy) -> Self {
        self.sync = sync;
        self
    }
}
