//! Error types for the experiment engine
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)
//!
//! Every variant except [`Error::Serialization`] is a local validation failure.
//! None of them are retried internally; the API layer maps them to 4xx responses.

use thiserror::Error;

use crate::experiment::ExperimentStatus;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Experiment engine error types
#[derive(Error, Debug)]
pub enum Error {
    /// All variant weights are zero (or a weight is out of range)
    #[error("Invalid weight configuration: {0}")]
    InvalidWeightConfiguration(String),

    /// Allocation requested against an experiment with no variants
    #[error("No variants available for experiment '{0}'\nAdd at least one variant before starting it")]
    NoVariantsAvailable(String),

    /// Forced or referenced variant is not part of the experiment
    #[error("Variant '{variant_id}' not found in experiment '{experiment_id}'")]
    VariantNotFound {
        /// Experiment that was searched
        experiment_id: String,
        /// Variant that was requested
        variant_id: String,
    },

    /// Lifecycle transition not allowed from the current status
    #[error("Invalid transition: cannot {action} an experiment in status '{from}'")]
    InvalidTransition {
        /// Status the experiment was in
        from: ExperimentStatus,
        /// Requested lifecycle action
        action: &'static str,
    },

    /// Event recorded against an unknown participant
    #[error("Participant '{0}' not found")]
    ParticipantNotFound(String),

    /// Event recorded against a cancelled experiment
    #[error("Experiment '{0}' is cancelled and no longer accepts events")]
    ExperimentCancelled(String),

    /// Statistical computation requested on an empty group
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Unknown experiment id
    #[error("Experiment '{0}' not found")]
    ExperimentNotFound(String),

    /// Experiment id already registered
    #[error("Experiment '{0}' already exists")]
    ExperimentExists(String),

    /// Two variants of one experiment share a name
    #[error("Duplicate variant name '{name}' in experiment '{experiment_id}'")]
    DuplicateVariant {
        /// Experiment being created
        experiment_id: String,
        /// Name used twice
        name: String,
    },

    /// Allocation requested while the experiment does not accept new units
    #[error("Experiment '{experiment_id}' is {status} and does not accept new participants")]
    ExperimentNotActive {
        /// Experiment id
        experiment_id: String,
        /// Current status
        status: ExperimentStatus,
    },

    /// Unit falls outside the experiment's traffic allocation
    #[error("Unit '{unit_id}' is outside the traffic allocation of experiment '{experiment_id}'")]
    UnitNotAdmitted {
        /// Experiment id
        experiment_id: String,
        /// Unit that was bucketed out
        unit_id: String,
    },

    /// Start/end dates are inconsistent
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error is a caller-side validation failure (4xx class).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !matches!(self, Self::Serialization(_))
    }
}
