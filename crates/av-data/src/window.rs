//! Rolling time-window train/test selection.
//!
//! For a target period `P` and lookback `L` the test window is exactly `P`
//! and the train window is `[P - L, P - 1]`. Both are contiguous slices of
//! the period-sorted [`Dataset`], so the two never overlap.

use av_types::{AvResult, DataError, Period};

use crate::dataset::{Dataset, Sample};

/// Train and test subsets for one target period and lookback.
#[derive(Debug, Clone, Copy)]
pub struct TrainTestSplit<'a> {
    pub target: Period,
    pub lookback: u32,
    pub test: &'a [Sample],
    pub train: &'a [Sample],
}

impl<'a> TrainTestSplit<'a> {
    /// First period of the training window.
    pub fn train_start(&self) -> Period {
        self.target.decrement(self.lookback)
    }

    /// Last period of the training window.
    pub fn train_end(&self) -> Period {
        self.target.decrement(1)
    }
}

/// Split `dataset` into the test window (`target`) and the train window
/// (the `lookback` periods immediately before it).
///
/// Fails with [`DataError::EmptyWindow`] if either side would be empty.
pub fn select(dataset: &Dataset, target: Period, lookback: u32) -> AvResult<TrainTestSplit<'_>> {
    let samples = dataset.samples();

    let train_lo = dataset.lower_bound(target.decrement(lookback));
    let test_lo = dataset.lower_bound(target);
    let test_hi = dataset.lower_bound(target.increment(1));

    // lookback == 0 collapses the train window to nothing
    let train = if lookback == 0 {
        &samples[test_lo..test_lo]
    } else {
        &samples[train_lo..test_lo]
    };
    let test = &samples[test_lo..test_hi];

    if train.is_empty() || test.is_empty() {
        return Err(DataError::EmptyWindow {
            target: target.to_string(),
            lookback,
            train_rows: train.len(),
            test_rows: test.len(),
        }
        .into());
    }

    Ok(TrainTestSplit {
        target,
        lookback,
        test,
        train,
    })
}
