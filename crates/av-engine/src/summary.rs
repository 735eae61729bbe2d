//! Sweep run tracking and the end-of-run report.

use av_optimizer::FamilySelection;
use av_types::Period;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique sweep invocation identifier.
pub type SweepId = Uuid;

/// Lifecycle state for one sweep invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepState {
    Pending,
    Running,
    /// The generator was exhausted.
    Completed,
    /// An early-exit policy left configurations unattempted.
    StoppedEarly,
}

/// Counts reported when a sweep finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub id: SweepId,
    pub target: Period,
    pub selection: FamilySelection,
    pub state: SweepState,
    /// Configurations the space generated.
    pub generated: usize,
    /// Generated configurations already present in the log at start.
    pub already_complete: usize,
    /// Configurations computed and appended by this run.
    pub computed: usize,
    /// Left unrecorded because a window was empty and the policy was to skip.
    pub empty_windows: usize,
    /// Left unrecorded because fitting or prediction failed under the lenient policy.
    pub failed: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SweepSummary {
    pub fn new(target: Period, selection: FamilySelection, generated: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            selection,
            state: SweepState::Pending,
            generated,
            already_complete: 0,
            computed: 0,
            empty_windows: 0,
            failed: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = SweepState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = SweepState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_stopped_early(&mut self) {
        self.state = SweepState::StoppedEarly;
        self.finished_at = Some(Utc::now());
    }

    /// Generated configurations still absent from the log after this run.
    pub fn deferred(&self) -> usize {
        self.generated
            .saturating_sub(self.already_complete)
            .saturating_sub(self.computed)
    }

    /// Deferred configurations that were never handed to the fitter.
    pub fn not_attempted(&self) -> usize {
        self.deferred()
            .saturating_sub(self.empty_windows)
            .saturating_sub(self.failed)
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sweep {} for {} ({}): {} generated, {} already complete, {} computed, {} deferred",
            self.id,
            self.target,
            self.selection,
            self.generated,
            self.already_complete,
            self.computed,
            self.deferred()
        )?;
        if self.deferred() > 0 {
            write!(
                f,
                " ({} empty windows, {} failed, {} not attempted)",
                self.empty_windows,
                self.failed,
                self.not_attempted()
            )?;
        }
        if self.state == SweepState::StoppedEarly {
            write!(f, ", stopped early")?;
        }
        Ok(())
    }
}
