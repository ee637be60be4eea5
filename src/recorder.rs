//! Event capture for experiment participants
//!
//! Events are immutable once appended. A `conversion` event additionally
//! flips the participant's conversion flag, exactly once: the first
//! conversion fixes `converted_at`, later ones are stored as plain events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::experiment::{
    EventRecord, EventType, ExperimentRecord, ExperimentStatus, ExperimentStore,
};
use crate::{Error, Result};

/// Appends participation events through an [`ExperimentStore`].
#[derive(Debug)]
pub struct EventRecorder<S> {
    store: Arc<S>,
}

impl<S> Clone for EventRecorder<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ExperimentStore> EventRecorder<S> {
    /// Create a recorder writing to `store`.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Record an event for `participant_id`.
    ///
    /// `occurred_at` defaults to now.
    ///
    /// # Errors
    ///
    /// - `ParticipantNotFound` if the participant is unknown
    /// - `ExperimentCancelled` if the parent experiment is cancelled
    pub fn record(
        &self,
        participant_id: &str,
        event_type: EventType,
        event_name: &str,
        properties: serde_json::Value,
        occurred_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let event = EventRecord::builder(participant_id, event_type, event_name)
            .properties(properties)
            .occurred_at(occurred_at.unwrap_or_else(Utc::now))
            .build();
        self.record_event(event)
    }

    /// Record a fully built event (e.g. with client IP and user agent).
    ///
    /// # Errors
    ///
    /// Same as [`EventRecorder::record`].
    pub fn record_event(&self, mut event: EventRecord) -> Result<String> {
        let participant = self
            .store
            .get_participant(event.participant_id())?
            .ok_or_else(|| Error::ParticipantNotFound(event.participant_id().to_string()))?;

        event.bind(participant.experiment_id(), participant.variant_id());
        let event_id = event.event_id().to_string();
        let event_type = event.event_type();

        // Checked by the store under the experiment row, so a cancel cannot
        // slip in between the check and the append.
        let not_cancelled = |experiment: &ExperimentRecord| {
            if experiment.status() == ExperimentStatus::Cancelled {
                Err(Error::ExperimentCancelled(experiment.experiment_id().to_string()))
            } else {
                Ok(())
            }
        };
        let first_conversion = match self.store.append_event_guarded(event, &not_cancelled) {
            Ok(first) => first,
            Err(err) => {
                if matches!(err, Error::ExperimentCancelled(_)) {
                    warn!(
                        experiment_id = participant.experiment_id(),
                        participant_id = participant.participant_id(),
                        "event rejected: experiment cancelled"
                    );
                }
                return Err(err);
            }
        };

        if event_type == EventType::Conversion {
            debug!(
                participant_id = participant.participant_id(),
                first_conversion,
                "conversion recorded"
            );
        }
        debug!(
            event_id = %event_id,
            event_type = %event_type,
            participant_id = participant.participant_id(),
            "event recorded"
        );
        Ok(event_id)
    }

    /// Events of `participant_id` ordered by occurrence.
    ///
    /// # Errors
    ///
    /// `ParticipantNotFound` if the participant is unknown.
    pub fn events_for(&self, participant_id: &str) -> Result<Vec<EventRecord>> {
        if self.store.get_participant(participant_id)?.is_none() {
            return Err(Error::ParticipantNotFound(participant_id.to_string()));
        }
        self.store.events_for_participant(participant_id)
    }
}
