//! Concurrent allocation races
//!
//! Racing first allocations of one unit must converge on a single stored
//! participant, and counters must match the participant rows. Lifecycle
//! transitions that commit while a request is in flight must win over it.

use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use abtest_engine::cache::CachedExperimentStore;
use abtest_engine::experiment::{
    EventRecord, EventType, ExperimentGuard, ExperimentRecord, ExperimentStatus, ExperimentStore,
    MemoryExperimentStore, MetricRecord, ParticipantRecord, ParticipantUpsert, VariantCounters,
    VariantRecord,
};
use abtest_engine::{Engine, Error, Result};
use chrono::{DateTime, Utc};

fn shared_engine() -> Arc<Engine> {
    let engine = Engine::in_memory();
    engine
        .create_experiment(
            ExperimentRecord::new("race", "Race"),
            vec![
                VariantRecord::control("a", "race", "a", 50),
                VariantRecord::new("b", "race", "b", 50),
            ],
            vec![],
        )
        .unwrap();
    engine.start("race").unwrap();
    Arc::new(engine)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_racing_first_allocations_converge() {
    let engine = shared_engine();

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::task::spawn_blocking(move || engine.allocate("race", "hot-user", None).unwrap())
        })
        .collect();

    let mut allocations = Vec::new();
    for handle in handles {
        allocations.push(handle.await.unwrap());
    }

    let inserted = allocations.iter().filter(|a| a.newly_assigned).count();
    assert_eq!(inserted, 1);
    assert!(allocations
        .iter()
        .all(|a| a.participant_id == allocations[0].participant_id));
    assert_eq!(engine.store().participants("race").unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_counters_match_rows_under_load() {
    let engine = shared_engine();

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            tokio::task::spawn_blocking(move || {
                // Workers overlap on half of their units
                for i in 0..500 {
                    let unit = format!("user-{}", worker * 250 + i);
                    let allocation = engine.allocate("race", &unit, None).unwrap();
                    engine
                        .record_event(
                            &allocation.participant_id,
                            EventType::Conversion,
                            "signup",
                            serde_json::json!({}),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let participants = engine.store().participants("race").unwrap();
    // users 0..2250 are covered by the overlapping ranges
    assert_eq!(participants.len(), 2_250);

    let counters = engine.variant_counters("race").unwrap();
    let counted: u64 = counters.iter().map(|(_, c)| c.participants).sum();
    let conversions: u64 = counters.iter().map(|(_, c)| c.conversions).sum();
    assert_eq!(counted, 2_250);
    assert_eq!(conversions, 2_250);

    let report = engine.get_report("race").unwrap();
    assert_eq!(report.total_participants, 2_250);
    for (variant_id, counters) in counters {
        assert_eq!(report.participants_by_variant[&variant_id], counters.participants);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Checkpoint {
    GetExperiment,
    GetParticipant,
    Variants,
}

/// Memory store that can hold one read open until the test releases it.
#[derive(Debug)]
struct SteppedStore {
    inner: MemoryExperimentStore,
    armed: Mutex<Option<Checkpoint>>,
    reached: Barrier,
    resume: Barrier,
}

impl SteppedStore {
    fn new() -> Self {
        Self {
            inner: MemoryExperimentStore::new(),
            armed: Mutex::new(None),
            reached: Barrier::new(2),
            resume: Barrier::new(2),
        }
    }

    /// Hold the next read at `checkpoint`, after it has read the inner store.
    fn hold_at(&self, checkpoint: Checkpoint) {
        *self.armed.lock().unwrap() = Some(checkpoint);
    }

    /// Block until the held reader is parked.
    fn wait_until_held(&self) {
        self.reached.wait();
    }

    fn release(&self) {
        self.resume.wait();
    }

    fn checkpoint(&self, checkpoint: Checkpoint) {
        let hit = {
            let mut armed = self.armed.lock().unwrap();
            if *armed == Some(checkpoint) {
                *armed = None;
                true
            } else {
                false
            }
        };
        if hit {
            self.reached.wait();
            self.resume.wait();
        }
    }
}

impl ExperimentStore for SteppedStore {
    fn create_experiment(
        &self,
        experiment: ExperimentRecord,
        variants: Vec<VariantRecord>,
        metrics: Vec<MetricRecord>,
    ) -> Result<()> {
        self.inner.create_experiment(experiment, variants, metrics)
    }

    fn get_experiment(&self, experiment_id: &str) -> Result<Option<ExperimentRecord>> {
        let found = self.inner.get_experiment(experiment_id);
        self.checkpoint(Checkpoint::GetExperiment);
        found
    }

    fn list_experiments(&self) -> Result<Vec<ExperimentRecord>> {
        self.inner.list_experiments()
    }

    fn update_experiment(
        &self,
        experiment_id: &str,
        update: &mut dyn FnMut(&mut ExperimentRecord) -> Result<()>,
    ) -> Result<ExperimentRecord> {
        self.inner.update_experiment(experiment_id, update)
    }

    fn variants(&self, experiment_id: &str) -> Result<Vec<VariantRecord>> {
        let variants = self.inner.variants(experiment_id);
        self.checkpoint(Checkpoint::Variants);
        variants
    }

    fn metrics(&self, experiment_id: &str) -> Result<Vec<MetricRecord>> {
        self.inner.metrics(experiment_id)
    }

    fn insert_participant_if_absent(
        &self,
        participant: ParticipantRecord,
    ) -> Result<ParticipantUpsert> {
        self.inner.insert_participant_if_absent(participant)
    }

    fn insert_participant_guarded(
        &self,
        participant: ParticipantRecord,
        guard: ExperimentGuard<'_>,
    ) -> Result<ParticipantUpsert> {
        self.inner.insert_participant_guarded(participant, guard)
    }

    fn get_participant(&self, participant_id: &str) -> Result<Option<ParticipantRecord>> {
        let found = self.inner.get_participant(participant_id);
        self.checkpoint(Checkpoint::GetParticipant);
        found
    }

    fn find_participant(
        &self,
        experiment_id: &str,
        unit_id: &str,
    ) -> Result<Option<ParticipantRecord>> {
        self.inner.find_participant(experiment_id, unit_id)
    }

    fn participants(&self, experiment_id: &str) -> Result<Vec<ParticipantRecord>> {
        self.inner.participants(experiment_id)
    }

    fn participations_for_unit(&self, unit_id: &str) -> Result<Vec<ParticipantRecord>> {
        self.inner.participations_for_unit(unit_id)
    }

    fn mark_converted(&self, participant_id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.inner.mark_converted(participant_id, at)
    }

    fn append_event(&self, event: EventRecord) -> Result<()> {
        self.inner.append_event(event)
    }

    fn append_event_guarded(&self, event: EventRecord, guard: ExperimentGuard<'_>) -> Result<bool> {
        self.inner.append_event_guarded(event, guard)
    }

    fn events_for_participant(&self, participant_id: &str) -> Result<Vec<EventRecord>> {
        self.inner.events_for_participant(participant_id)
    }

    fn variant_counters(&self, experiment_id: &str) -> Result<Vec<(String, VariantCounters)>> {
        self.inner.variant_counters(experiment_id)
    }
}

fn started<S: ExperimentStore>(store: S) -> Engine<S> {
    let engine = Engine::builder().build_with_store(store).unwrap();
    engine
        .create_experiment(
            ExperimentRecord::new("race", "Race"),
            vec![
                VariantRecord::control("a", "race", "a", 50),
                VariantRecord::new("b", "race", "b", 50),
            ],
            vec![],
        )
        .unwrap();
    engine.start("race").unwrap();
    engine
}

#[test]
fn test_pause_during_allocation_rejects_new_unit() {
    let engine = started(SteppedStore::new());
    engine.store().hold_at(Checkpoint::Variants);

    let result = thread::scope(|s| {
        // Reads Active, then parks before writing the participant
        let request = s.spawn(|| engine.allocate("race", "late-unit", None));
        engine.store().wait_until_held();
        engine.pause("race").unwrap();
        engine.store().release();
        request.join().unwrap()
    });

    assert!(matches!(
        result,
        Err(Error::ExperimentNotActive { status: ExperimentStatus::Paused, .. })
    ));
    assert!(engine.store().participants("race").unwrap().is_empty());
    assert_eq!(engine.variant_counters("race").unwrap()[0].1.participants, 0);
}

#[test]
fn test_cancel_during_event_rejects_event() {
    let engine = started(SteppedStore::new());
    let allocation = engine.allocate("race", "buyer", None).unwrap();
    engine.store().hold_at(Checkpoint::GetParticipant);

    let result = thread::scope(|s| {
        let request = s.spawn(|| {
            engine.record_event(
                &allocation.participant_id,
                EventType::Conversion,
                "purchase",
                serde_json::json!({}),
            )
        });
        engine.store().wait_until_held();
        engine.cancel("race").unwrap();
        engine.store().release();
        request.join().unwrap()
    });

    assert!(matches!(result, Err(Error::ExperimentCancelled(_))));
    let participant = engine
        .store()
        .get_participant(&allocation.participant_id)
        .unwrap()
        .unwrap();
    assert!(!participant.is_converted());
    assert!(engine
        .store()
        .events_for_participant(&allocation.participant_id)
        .unwrap()
        .is_empty());
}

#[test]
fn test_cached_read_overlapping_pause_is_not_kept() {
    let engine = started(CachedExperimentStore::new(SteppedStore::new()));
    engine.store().inner().hold_at(Checkpoint::GetExperiment);

    let seen = thread::scope(|s| {
        // Cache miss: reads Active from the inner store, then parks
        let reader = s.spawn(|| engine.experiment("race").unwrap().status());
        engine.store().inner().wait_until_held();
        engine.pause("race").unwrap();
        engine.store().inner().release();
        reader.join().unwrap()
    });
    assert_eq!(seen, ExperimentStatus::Active);

    assert_eq!(engine.experiment("race").unwrap().status(), ExperimentStatus::Paused);
    assert!(matches!(
        engine.allocate("race", "brand-new-unit", None),
        Err(Error::ExperimentNotActive { .. })
    ));
    assert!(engine.store().participants("race").unwrap().is_empty());
}
