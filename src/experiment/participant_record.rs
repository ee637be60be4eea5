//! Participant Record - durable assignment of a unit to a variant

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Participant Record binds a unit (user) to exactly one variant of an experiment.
///
/// The `(experiment_id, unit_id)` pair is unique. After creation only the
/// conversion fields change, and they change at most once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantRecord {
    participant_id: String,
    experiment_id: String,
    unit_id: String,
    variant_id: String,
    assigned_at: DateTime<Utc>,
    is_converted: bool,
    converted_at: Option<DateTime<Utc>>,
}

impl ParticipantRecord {
    /// Create a new, unconverted participant with a fresh ID.
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        unit_id: impl Into<String>,
        variant_id: impl Into<String>,
    ) -> Self {
        Self {
            participant_id: Uuid::new_v4().to_string(),
            experiment_id: experiment_id.into(),
            unit_id: unit_id.into(),
            variant_id: variant_id.into(),
            assigned_at: Utc::now(),
            is_converted: false,
            converted_at: None,
        }
    }

    /// Get the participant ID.
    #[must_use]
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the unit (user) ID.
    #[must_use]
    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    /// Get the assigned variant ID.
    #[must_use]
    pub fn variant_id(&self) -> &str {
        &self.variant_id
    }

    /// Get the assignment timestamp.
    #[must_use]
    pub const fn assigned_at(&self) -> DateTime<Utc> {
        self.assigned_at
    }

    /// Whether the participant has converted.
    #[must_use]
    pub const fn is_converted(&self) -> bool {
        self.is_converted
    }

    /// Time of the first conversion, if any.
    #[must_use]
    pub const fn converted_at(&self) -> Option<DateTime<Utc>> {
        self.converted_at
    }

    /// Mark converted. Returns `false` (and changes nothing) if already converted.
    pub(crate) fn mark_converted(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_converted {
            return false;
        }
        self.is_converted = true;
        self.converted_at = Some(at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_participant_record_new() {
        let participant = ParticipantRecord::new("exp-1", "user-42", "v-a");
        assert_eq!(participant.experiment_id(), "exp-1");
        assert_eq!(participant.unit_id(), "user-42");
        assert_eq!(participant.variant_id(), "v-a");
        assert!(!participant.is_converted());
        assert!(participant.converted_at().is_none());
        assert!(Uuid::parse_str(participant.participant_id()).is_ok());
    }

    #[test]
    fn test_mark_converted_once() {
        let mut participant = ParticipantRecord::new("exp-1", "user-42", "v-a");
        let first = Utc::now();
        assert!(participant.mark_converted(first));
        assert!(!participant.mark_converted(first + Duration::seconds(5)));
        assert_eq!(participant.converted_at(), Some(first));
    }
}
