//! Experiment lifecycle state machine
//!
//! ```text
//!            start            stop
//!   Draft ──────────> Active ──────> Completed
//!     │               │   ^
//!     │         pause │   │ resume
//!     │               v   │
//!     │              Paused
//!     │                 │
//!     └──── cancel ─────┴──(from Active too)──> Cancelled
//! ```
//!
//! Disallowed transitions return `InvalidTransition` and leave the record
//! untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExperimentRecord, ExperimentStatus, VariantRecord};
use crate::allocator::cumulative_bounds;
use crate::{Error, Result};

/// Lifecycle action requested on an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    /// Draft -> Active
    Start,
    /// Active -> Paused
    Pause,
    /// Paused -> Active
    Resume,
    /// Active -> Completed
    Stop,
    /// Any non-terminal -> Cancelled
    Cancel,
}

impl Transition {
    /// Get action name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Cancel => "cancel",
        }
    }

    /// Status reached by applying this action to `from`, if allowed.
    #[must_use]
    pub const fn target(&self, from: ExperimentStatus) -> Option<ExperimentStatus> {
        use ExperimentStatus::{Active, Cancelled, Completed, Draft, Paused};
        match (self, from) {
            (Self::Start, Draft) | (Self::Resume, Paused) => Some(Active),
            (Self::Pause, Active) => Some(Paused),
            (Self::Stop, Active) => Some(Completed),
            (Self::Cancel, Draft | Active | Paused) => Some(Cancelled),
            _ => None,
        }
    }
}

/// How the allocator treats a unit given the experiment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationPolicy {
    /// New units are assigned.
    Allocate,
    /// Only previously stored assignments are returned.
    ExistingOnly,
    /// Allocation is refused.
    Reject,
}

impl AllocationPolicy {
    /// Policy for an experiment in `status`.
    #[must_use]
    pub const fn for_status(status: ExperimentStatus) -> Self {
        match status {
            ExperimentStatus::Active => Self::Allocate,
            ExperimentStatus::Paused => Self::ExistingOnly,
            ExperimentStatus::Draft | ExperimentStatus::Completed | ExperimentStatus::Cancelled => {
                Self::Reject
            }
        }
    }
}

/// Apply `transition` to `record` at time `now`.
///
/// Starting validates that the variants can be allocated and stamps the
/// start date if none was planned. Stopping stamps the end date, never
/// earlier than the start date.
///
/// # Errors
///
/// - `InvalidTransition` if the action is not allowed from the current status
/// - `NoVariantsAvailable` / `InvalidWeightConfiguration` when starting an
///   experiment whose variants cannot be allocated
pub fn apply(
    record: &mut ExperimentRecord,
    variants: &[VariantRecord],
    transition: Transition,
    now: DateTime<Utc>,
) -> Result<ExperimentStatus> {
    let from = record.status();
    let to = transition.target(from).ok_or(Error::InvalidTransition {
        from,
        action: transition.as_str(),
    })?;

    match transition {
        Transition::Start => {
            cumulative_bounds(record.experiment_id(), variants)?;
            if record.start_date().is_none() {
                record.set_start_date(now);
            }
        }
        Transition::Stop => {
            let end = record.start_date().map_or(now, |start| start.max(now));
            record.set_end_date(end);
        }
        Transition::Pause | Transition::Resume | Transition::Cancel => {}
    }

    record.set_status(to);
    Ok(to)
}
