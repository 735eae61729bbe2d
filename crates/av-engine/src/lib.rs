//! Restartable validation sweeps over a hyperparameter grid.
//!
//! A [`SweepDriver`] walks a [`ConfigurationSpace`](av_optimizer::ConfigurationSpace)
//! for one target period, skips what the checkpoint log already holds,
//! fits and scores everything else, and appends each result as it is produced.

pub mod driver;
pub mod policy;
pub mod summary;

pub use driver::SweepDriver;
pub use policy::{
    EarlyExit, Exhaustive, ExitDecision, FirstComputed, FirstPerFamily, PredictionPolicy,
    SweepOptions, TestScope, WindowPolicy,
};
pub use summary::{SweepId, SweepState, SweepSummary};
