//! Experiment Store - persistence boundary for A/B testing data
//!
//! [`ExperimentStore`] is the seam to the external relational store.
//! [`MemoryExperimentStore`] is the default in-process backend built on
//! `DashMap`; data is lost on process restart.
//!
//! ## Concurrency contract
//!
//! - Participant creation is an atomic insert-if-absent keyed on
//!   `(experiment_id, unit_id)`. Two racing first allocations converge on
//!   one stored participant.
//! - Per-variant counters are atomic increments done in the same critical
//!   section as the row write they mirror.
//! - Events are appended under the participant's entry lock, so readers never
//!   observe a torn record and per-participant insertion order is preserved.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    EventRecord, EventType, ExperimentRecord, MetricRecord, ParticipantRecord, VariantRecord,
};
use crate::{Error, Result};

/// Outcome of an insert-if-absent participant write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantUpsert {
    /// The stored participant (pre-existing or newly inserted).
    pub participant: ParticipantRecord,
    /// `true` if this call created the participant.
    pub inserted: bool,
}

/// Denormalized per-variant counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCounters {
    /// Participants assigned to the variant.
    pub participants: u64,
    /// Participants of the variant that converted.
    pub conversions: u64,
}

/// Precondition on the stored experiment, checked inside a guarded write.
///
/// The store evaluates it while holding the experiment row, so no lifecycle
/// transition can commit between the check and the write.
pub type ExperimentGuard<'a> = &'a dyn Fn(&ExperimentRecord) -> Result<()>;

/// Persistence abstraction for experiments, variants, participants, events and metrics.
///
/// Every method returns `Result` because real backends block on I/O.
pub trait ExperimentStore: Send + Sync {
    /// Register an experiment together with its variants and metric definitions.
    ///
    /// # Errors
    ///
    /// `ExperimentExists`, `DuplicateVariant`, `InvalidWeightConfiguration`
    /// or `InvalidInput` when the definition is rejected.
    fn create_experiment(
        &self,
        experiment: ExperimentRecord,
        variants: Vec<VariantRecord>,
        metrics: Vec<MetricRecord>,
    ) -> Result<()>;

    /// Get an experiment by ID.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn get_experiment(&self, experiment_id: &str) -> Result<Option<ExperimentRecord>>;

    /// All experiments, ordered by creation time then ID.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn list_experiments(&self) -> Result<Vec<ExperimentRecord>>;

    /// Atomically apply `update` to a copy of the experiment and persist it.
    ///
    /// If `update` fails nothing is written.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound`, or whatever `update` returns.
    fn update_experiment(
        &self,
        experiment_id: &str,
        update: &mut dyn FnMut(&mut ExperimentRecord) -> Result<()>,
    ) -> Result<ExperimentRecord>;

    /// Variants of an experiment in declaration order.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` for unknown experiments.
    fn variants(&self, experiment_id: &str) -> Result<Vec<VariantRecord>>;

    /// Metric definitions of an experiment.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` for unknown experiments.
    fn metrics(&self, experiment_id: &str) -> Result<Vec<MetricRecord>>;

    /// Insert `participant` unless the unit is already assigned in that experiment.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn insert_participant_if_absent(
        &self,
        participant: ParticipantRecord,
    ) -> Result<ParticipantUpsert>;

    /// Like [`ExperimentStore::insert_participant_if_absent`], but a new row is
    /// written only if `guard` accepts the experiment as stored at write time.
    /// An existing assignment is returned without consulting `guard`.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound`, or whatever `guard` returns.
    fn insert_participant_guarded(
        &self,
        participant: ParticipantRecord,
        guard: ExperimentGuard<'_>,
    ) -> Result<ParticipantUpsert>;

    /// Get a participant by ID.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn get_participant(&self, participant_id: &str) -> Result<Option<ParticipantRecord>>;

    /// Find the participant of `unit_id` in `experiment_id`.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn find_participant(
        &self,
        experiment_id: &str,
        unit_id: &str,
    ) -> Result<Option<ParticipantRecord>>;

    /// Participants of an experiment in assignment order.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn participants(&self, experiment_id: &str) -> Result<Vec<ParticipantRecord>>;

    /// Every participation of `unit_id` across experiments.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn participations_for_unit(&self, unit_id: &str) -> Result<Vec<ParticipantRecord>>;

    /// Mark a participant converted. Returns `true` only for the first conversion.
    ///
    /// # Errors
    ///
    /// `ParticipantNotFound` for unknown participants.
    fn mark_converted(&self, participant_id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Append an immutable event.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn append_event(&self, event: EventRecord) -> Result<()>;

    /// Append a bound event if `guard` accepts its experiment as stored at
    /// write time. A conversion event also marks the participant converted
    /// in the same step. Returns `true` for the participant's first
    /// conversion.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound`, `ParticipantNotFound`, or whatever `guard` returns.
    fn append_event_guarded(&self, event: EventRecord, guard: ExperimentGuard<'_>) -> Result<bool>;

    /// Events of a participant ordered by occurrence time (ties by insertion).
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn events_for_participant(&self, participant_id: &str) -> Result<Vec<EventRecord>>;

    /// Denormalized counters per variant, in variant declaration order.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` for unknown experiments.
    fn variant_counters(&self, experiment_id: &str) -> Result<Vec<(String, VariantCounters)>>;
}

/// Validate an experiment definition before it is stored.
///
/// # Errors
///
/// - `InvalidInput` if a variant or metric belongs to another experiment,
///   a variant ID repeats or a metric name repeats
/// - `DuplicateVariant` if two variants share a name
/// - `InvalidWeightConfiguration` if a weight exceeds 100
pub fn validate_definition(
    experiment: &ExperimentRecord,
    variants: &[VariantRecord],
    metrics: &[MetricRecord],
) -> Result<()> {
    let experiment_id = experiment.experiment_id();
    let mut ids = HashSet::new();
    let mut names = HashSet::new();

    for variant in variants {
        if variant.experiment_id() != experiment_id {
            return Err(Error::InvalidInput(format!(
                "variant '{}' belongs to experiment '{}', not '{experiment_id}'",
                variant.variant_id(),
                variant.experiment_id()
            )));
        }
        if variant.weight() > 100 {
            return Err(Error::InvalidWeightConfiguration(format!(
                "variant '{}' has weight {}, expected 0-100",
                variant.variant_id(),
                variant.weight()
            )));
        }
        if !ids.insert(variant.variant_id()) {
            return Err(Error::InvalidInput(format!(
                "variant id '{}' used twice",
                variant.variant_id()
            )));
        }
        if !names.insert(variant.name()) {
            return Err(Error::DuplicateVariant {
                experiment_id: experiment_id.to_string(),
                name: variant.name().to_string(),
            });
        }
    }

    let mut metric_names = HashSet::new();
    for metric in metrics {
        if metric.experiment_id() != experiment_id {
            return Err(Error::InvalidInput(format!(
                "metric '{}' belongs to experiment '{}', not '{experiment_id}'",
                metric.name(),
                metric.experiment_id()
            )));
        }
        if !metric_names.insert(metric.name()) {
            return Err(Error::InvalidInput(format!(
                "metric name '{}' used twice",
                metric.name()
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct AtomicCounters {
    participants: AtomicU64,
    conversions: AtomicU64,
}

/// In-memory experiment store using lock-free concurrent hashmaps.
///
/// Thread-safe and optimized for high-concurrency allocation workloads.
///
/// # Example
///
/// ```rust
/// use abtest_engine::experiment::{
///     ExperimentRecord, ExperimentStore, MemoryExperimentStore, ParticipantRecord, VariantRecord,
/// };
///
/// # fn main() -> abtest_engine::Result<()> {
/// let store = MemoryExperimentStore::new();
/// store.create_experiment(
///     ExperimentRecord::new("exp-1", "Checkout"),
///     vec![VariantRecord::control("a", "exp-1", "control", 100)],
///     vec![],
/// )?;
///
/// let first = store.insert_participant_if_absent(ParticipantRecord::new("exp-1", "u1", "a"))?;
/// let again = store.insert_participant_if_absent(ParticipantRecord::new("exp-1", "u1", "a"))?;
/// assert!(first.inserted && !again.inserted);
/// assert_eq!(first.participant, again.participant);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryExperimentStore {
    experiments: DashMap<String, ExperimentRecord>,
    variants: DashMap<String, Vec<VariantRecord>>,
    metrics: DashMap<String, Vec<MetricRecord>>,
    // (experiment_id, unit_id) -> participant_id
    assignments: DashMap<(String, String), String>,
    participants: DashMap<String, ParticipantRecord>,
    // experiment_id -> participant ids in assignment order
    roster: DashMap<String, Vec<String>>,
    events: DashMap<String, Vec<EventRecord>>,
    // (experiment_id, variant_id) -> counters
    counters: DashMap<(String, String), AtomicCounters>,
}

impl MemoryExperimentStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the store holds no experiments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    /// Number of experiments.
    #[must_use]
    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    /// Number of participants across all experiments.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Number of events across all participants.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.iter().map(|entry| entry.value().len()).sum()
    }

    fn insert_with(
        &self,
        participant: ParticipantRecord,
        admit: impl FnOnce() -> Result<()>,
    ) -> Result<ParticipantUpsert> {
        let key = (
            participant.experiment_id().to_string(),
            participant.unit_id().to_string(),
        );

        // The assignment entry lock serializes racing first allocations of one unit.
        match self.assignments.entry(key) {
            Entry::Occupied(existing) => {
                let stored = self
                    .participants
                    .get(existing.get())
                    .map(|p| p.value().clone())
                    .ok_or_else(|| Error::ParticipantNotFound(existing.get().clone()))?;
                Ok(ParticipantUpsert {
                    participant: stored,
                    inserted: false,
                })
            }
            Entry::Vacant(slot) => {
                admit()?;
                let participant_id = participant.participant_id().to_string();
                self.participants
                    .insert(participant_id.clone(), participant.clone());
                self.roster
                    .entry(participant.experiment_id().to_string())
                    .or_default()
                    .push(participant_id.clone());
                self.bump(participant.experiment_id(), participant.variant_id(), false);
                slot.insert(participant_id);

                debug!(
                    experiment_id = participant.experiment_id(),
                    unit_id = participant.unit_id(),
                    variant_id = participant.variant_id(),
                    "participant assigned"
                );
                Ok(ParticipantUpsert {
                    participant,
                    inserted: true,
                })
            }
        }
    }

    fn bump(&self, experiment_id: &str, variant_id: &str, conversion: bool) {
        let key = (experiment_id.to_string(), variant_id.to_string());
        if let Some(counters) = self.counters.get(&key) {
            let counter = if conversion {
                &counters.conversions
            } else {
                &counters.participants
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl ExperimentStore for MemoryExperimentStore {
    fn create_experiment(
        &self,
        experiment: ExperimentRecord,
        variants: Vec<VariantRecord>,
        metrics: Vec<MetricRecord>,
    ) -> Result<()> {
        validate_definition(&experiment, &variants, &metrics)?;

        let experiment_id = experiment.experiment_id().to_string();
        match self.experiments.entry(experiment_id.clone()) {
            Entry::Occupied(_) => Err(Error::ExperimentExists(experiment_id)),
            Entry::Vacant(slot) => {
                for variant in &variants {
                    self.counters.insert(
                        (experiment_id.clone(), variant.variant_id().to_string()),
                        AtomicCounters::default(),
                    );
                }
                info!(
                    experiment_id = %experiment_id,
                    variants = variants.len(),
                    metrics = metrics.len(),
                    "experiment created"
                );
                self.variants.insert(experiment_id.clone(), variants);
                self.metrics.insert(experiment_id.clone(), metrics);
                self.roster.insert(experiment_id, Vec::new());
                slot.insert(experiment);
                Ok(())
            }
        }
    }

    fn get_experiment(&self, experiment_id: &str) -> Result<Option<ExperimentRecord>> {
        Ok(self.experiments.get(experiment_id).map(|e| e.value().clone()))
    }

    fn list_experiments(&self) -> Result<Vec<ExperimentRecord>> {
        let mut experiments: Vec<ExperimentRecord> =
            self.experiments.iter().map(|e| e.value().clone()).collect();
        experiments.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.experiment_id().cmp(b.experiment_id()))
        });
        Ok(experiments)
    }

    fn update_experiment(
        &self,
        experiment_id: &str,
        update: &mut dyn FnMut(&mut ExperimentRecord) -> Result<()>,
    ) -> Result<ExperimentRecord> {
        let mut entry = self
            .experiments
            .get_mut(experiment_id)
            .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))?;

        let mut draft = entry.value().clone();
        update(&mut draft)?;
        *entry.value_mut() = draft.clone();
        Ok(draft)
    }

    fn variants(&self, experiment_id: &str) -> Result<Vec<VariantRecord>> {
        self.variants
            .get(experiment_id)
            .map(|v| v.value().clone())
            .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))
    }

    fn metrics(&self, experiment_id: &str) -> Result<Vec<MetricRecord>> {
        self.metrics
            .get(experiment_id)
            .map(|m| m.value().clone())
            .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))
    }

    fn insert_participant_if_absent(
        &self,
        participant: ParticipantRecord,
    ) -> Result<ParticipantUpsert> {
        self.insert_with(participant, || Ok(()))
    }

    fn insert_participant_guarded(
        &self,
        participant: ParticipantRecord,
        guard: ExperimentGuard<'_>,
    ) -> Result<ParticipantUpsert> {
        // The read guard blocks update_experiment until the row is written.
        let experiment = self
            .experiments
            .get(participant.experiment_id())
            .ok_or_else(|| Error::ExperimentNotFound(participant.experiment_id().to_string()))?;
        self.insert_with(participant, || guard(experiment.value()))
    }

    fn get_participant(&self, participant_id: &str) -> Result<Option<ParticipantRecord>> {
        Ok(self.participants.get(participant_id).map(|p| p.value().clone()))
    }

    fn find_participant(
        &self,
        experiment_id: &str,
        unit_id: &str,
    ) -> Result<Option<ParticipantRecord>> {
        let key = (experiment_id.to_string(), unit_id.to_string());
        let Some(participant_id) = self.assignments.get(&key).map(|id| id.value().clone()) else {
            return Ok(None);
        };
        self.get_participant(&participant_id)
    }

    fn participants(&self, experiment_id: &str) -> Result<Vec<ParticipantRecord>> {
        let ids = self
            .roster
            .get(experiment_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.participants.get(id).map(|p| p.value().clone()))
            .collect())
    }

    fn participations_for_unit(&self, unit_id: &str) -> Result<Vec<ParticipantRecord>> {
        let mut found: Vec<ParticipantRecord> = self
            .participants
            .iter()
            .filter(|p| p.value().unit_id() == unit_id)
            .map(|p| p.value().clone())
            .collect();
        found.sort_by(|a, b| {
            a.assigned_at()
                .cmp(&b.assigned_at())
                .then_with(|| a.experiment_id().cmp(b.experiment_id()))
        });
        Ok(found)
    }

    fn mark_converted(&self, participant_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut participant = self
            .participants
            .get_mut(participant_id)
            .ok_or_else(|| Error::ParticipantNotFound(participant_id.to_string()))?;

        let first = participant.mark_converted(at);
        if first {
            self.bump(participant.experiment_id(), participant.variant_id(), true);
        }
        Ok(first)
    }

    fn append_event(&self, event: EventRecord) -> Result<()> {
        self.events
            .entry(event.participant_id().to_string())
            .or_default()
            .push(event);
        Ok(())
    }

    fn append_event_guarded(&self, event: EventRecord, guard: ExperimentGuard<'_>) -> Result<bool> {
        let experiment = self
            .experiments
            .get(event.experiment_id())
            .ok_or_else(|| Error::ExperimentNotFound(event.experiment_id().to_string()))?;
        guard(experiment.value())?;

        let first = if event.event_type() == EventType::Conversion {
            self.mark_converted(event.participant_id(), event.occurred_at())?
        } else if self.participants.contains_key(event.participant_id()) {
            false
        } else {
            return Err(Error::ParticipantNotFound(event.participant_id().to_string()));
        };
        self.append_event(event)?;
        Ok(first)
    }

    fn events_for_participant(&self, participant_id: &str) -> Result<Vec<EventRecord>> {
        let mut events = self
            .events
            .get(participant_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        // Stable sort keeps insertion order among equal timestamps
        events.sort_by_key(EventRecord::occurred_at);
        Ok(events)
    }

    fn variant_counters(&self, experiment_id: &str) -> Result<Vec<(String, VariantCounters)>> {
        let variants = self.variants(experiment_id)?;
        Ok(variants
            .iter()
            .map(|variant| {
                let key = (experiment_id.to_string(), variant.variant_id().to_string());
                let counters = self.counters.get(&key).map_or(
                    VariantCounters {
                        participants: 0,
                        conversions: 0,
                    },
                    |c| VariantCounters {
                        participants: c.participants.load(Ordering::Relaxed),
                        conversions: c.conversions.load(Ordering::Relaxed),
                    },
                );
                (variant.variant_id().to_string(), counters)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{EventType, MetricType};
    use chrono::Duration;

    fn seeded() -> MemoryExperimentStore {
        let store = MemoryExperimentStore::new();
        store
            .create_experiment(
                ExperimentRecord::new("exp-1", "Test"),
                vec![
                    VariantRecord::control("a", "exp-1", "control", 50),
                    VariantRecord::new("b", "exp-1", "treatment", 50),
                ],
                vec![MetricRecord::new("exp-1", "signup", MetricType::ConversionRate)],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_store_default() {
        let store = MemoryExperimentStore::new();
        assert!(store.is_empty());
        assert_eq!(store.experiment_count(), 0);
        assert_eq!(store.participant_count(), 0);
        assert_eq!(store.event_count(), 0);
    }

    #[test]
    fn test_store_add_and_get() {
        let store = seeded();
        assert!(!store.is_empty());
        assert!(store.get_experiment("exp-1").unwrap().is_some());
        assert_eq!(store.variants("exp-1").unwrap().len(), 2);
        assert_eq!(store.metrics("exp-1").unwrap().len(), 1);
        assert!(matches!(
            store.variants("missing"),
            Err(Error::ExperimentNotFound(_))
        ));
    }

    #[test]
    fn test_create_duplicate_experiment() {
        let store = seeded();
        let result =
            store.create_experiment(ExperimentRecord::new("exp-1", "Again"), vec![], vec![]);
        assert!(matches!(result, Err(Error::ExperimentExists(_))));
    }

    #[test]
    fn test_create_rejects_duplicate_variant_names() {
        let store = MemoryExperimentStore::new();
        let result = store.create_experiment(
            ExperimentRecord::new("exp-1", "Test"),
            vec![
                VariantRecord::new("a", "exp-1", "same", 50),
                VariantRecord::new("b", "exp-1", "same", 50),
            ],
            vec![],
        );
        assert!(matches!(result, Err(Error::DuplicateVariant { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn test_create_rejects_weight_over_100() {
        let store = MemoryExperimentStore::new();
        let result = store.create_experiment(
            ExperimentRecord::new("exp-1", "Test"),
            vec![VariantRecord::new("a", "exp-1", "a", 101)],
            vec![],
        );
        assert!(matches!(result, Err(Error::InvalidWeightConfiguration(_))));
    }

    #[test]
    fn test_create_rejects_foreign_variant() {
        let store = MemoryExperimentStore::new();
        let result = store.create_experiment(
            ExperimentRecord::new("exp-1", "Test"),
            vec![VariantRecord::new("a", "exp-2", "a", 10)],
            vec![],
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_insert_participant_if_absent() {
        let store = seeded();
        let first = store
            .insert_participant_if_absent(ParticipantRecord::new("exp-1", "u1", "a"))
            .unwrap();
        let second = store
            .insert_participant_if_absent(ParticipantRecord::new("exp-1", "u1", "b"))
            .unwrap();

        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(second.participant.variant_id(), "a");
        assert_eq!(
            first.participant.participant_id(),
            second.participant.participant_id()
        );
        assert_eq!(store.participant_count(), 1);
    }

    fn reject(_: &ExperimentRecord) -> Result<()> {
        Err(Error::InvalidInput("closed".into()))
    }

    #[test]
    fn test_guarded_insert_rejects_new_unit() {
        let store = seeded();
        let existing = store
            .insert_participant_if_absent(ParticipantRecord::new("exp-1", "u1", "a"))
            .unwrap();

        let result =
            store.insert_participant_guarded(ParticipantRecord::new("exp-1", "u2", "a"), &reject);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(store.find_participant("exp-1", "u2").unwrap().is_none());
        assert_eq!(store.variant_counters("exp-1").unwrap()[0].1.participants, 1);

        // Stored assignments are returned without consulting the guard
        let again = store
            .insert_participant_guarded(ParticipantRecord::new("exp-1", "u1", "b"), &reject)
            .unwrap();
        assert!(!again.inserted);
        assert_eq!(again.participant, existing.participant);

        assert!(matches!(
            store.insert_participant_guarded(
                ParticipantRecord::new("nope", "u1", "a"),
                &|_| Ok(()),
            ),
            Err(Error::ExperimentNotFound(_))
        ));
    }

    #[test]
    fn test_guarded_append_marks_conversion() {
        let store = seeded();
        let participant = store
            .insert_participant_if_absent(ParticipantRecord::new("exp-1", "u1", "b"))
            .unwrap()
            .participant;
        let event = |event_type| {
            let mut event =
                EventRecord::builder(participant.participant_id(), event_type, "buy").build();
            event.bind("exp-1", "b");
            event
        };

        assert!(!store.append_event_guarded(event(EventType::View), &|_| Ok(())).unwrap());
        assert!(store.append_event_guarded(event(EventType::Conversion), &|_| Ok(())).unwrap());
        assert!(!store.append_event_guarded(event(EventType::Conversion), &|_| Ok(())).unwrap());
        assert!(matches!(
            store.append_event_guarded(event(EventType::Conversion), &reject),
            Err(Error::InvalidInput(_))
        ));

        assert_eq!(store.events_for_participant(participant.participant_id()).unwrap().len(), 3);
        assert_eq!(store.variant_counters("exp-1").unwrap()[1].1.conversions, 1);

        let mut orphan = EventRecord::builder("ghost", EventType::Click, "cta").build();
        orphan.bind("exp-1", "a");
        assert!(matches!(
            store.append_event_guarded(orphan, &|_| Ok(())),
            Err(Error::ParticipantNotFound(_))
        ));
    }

    #[test]
    fn test_counters_track_rows() {
        let store = seeded();
        let p = store
            .insert_participant_if_absent(ParticipantRecord::new("exp-1", "u1", "b"))
            .unwrap()
            .participant;
        store
            .insert_participant_if_absent(ParticipantRecord::new("exp-1", "u2", "b"))
            .unwrap();
        assert!(store.mark_converted(p.participant_id(), Utc::now()).unwrap());
        assert!(!store.mark_converted(p.participant_id(), Utc::now()).unwrap());

        let counters = store.variant_counters("exp-1").unwrap();
        assert_eq!(counters[0].0, "a");
        assert_eq!(counters[0].1.participants, 0);
        assert_eq!(counters[1].1.participants, 2);
        assert_eq!(counters[1].1.conversions, 1);
    }

    #[test]
    fn test_mark_converted_unknown() {
        let store = seeded();
        assert!(matches!(
            store.mark_converted("ghost", Utc::now()),
            Err(Error::ParticipantNotFound(_))
        ));
    }

    #[test]
    fn test_events_ordered_by_time() {
        let store = seeded();
        let base = Utc::now();
        for (offset, name) in [(2, "late"), (0, "early"), (1, "middle"), (1, "middle-2")] {
            let event = EventRecord::builder("p-1", EventType::View, name)
                .occurred_at(base + Duration::seconds(offset))
                .build();
            store.append_event(event).unwrap();
        }

        let names: Vec<String> = store
            .events_for_participant("p-1")
            .unwrap()
            .iter()
            .map(|e| e.event_name().to_string())
            .collect();
        assert_eq!(names, ["early", "middle", "middle-2", "late"]);
        assert_eq!(store.event_count(), 4);
    }

    #[test]
    fn test_update_experiment_failure_leaves_record() {
        let store = seeded();
        let result = store.update_experiment("exp-1", &mut |record| {
            record.set_status(crate::experiment::ExperimentStatus::Active);
            Err(Error::InvalidInput("rejected".into()))
        });
        assert!(result.is_err());
        assert_eq!(
            store.get_experiment("exp-1").unwrap().unwrap().status(),
            crate::experiment::ExperimentStatus::Draft
        );
    }

    #[test]
    fn test_participations_for_unit() {
        let store = seeded();
        store
            .create_experiment(
                ExperimentRecord::new("exp-2", "Other"),
                vec![VariantRecord::new("x", "exp-2", "x", 100)],
                vec![],
            )
            .unwrap();
        store
            .insert_participant_if_absent(ParticipantRecord::new("exp-1", "u1", "a"))
            .unwrap();
        store
            .insert_participant_if_absent(ParticipantRecord::new("exp-2", "u1", "x"))
            .unwrap();
        store
            .insert_participant_if_absent(ParticipantRecord::new("exp-2", "u2", "x"))
            .unwrap();

        assert_eq!(store.participations_for_unit("u1").unwrap().len(), 2);
        assert_eq!(store.participants("exp-2").unwrap().len(), 2);
        assert!(store.find_participant("exp-1", "u2").unwrap().is_none());
    }
}
