//! Read-through cache over any `ExperimentStore`
//!
//! Caches experiment and variant definitions, the rows read on every
//! allocation. The wrapped store stays the source of truth: writes go to it
//! first and then drop the cached entry. Participants, events and counters
//! are never cached.
//!
//! A miss only fills the cache if no write happened while the inner store was
//! being read. Every write bumps a generation counter before invalidating, and
//! the fill re-checks the generation under the entry lock, so a read that
//! overlaps a write can never put the older row back.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::experiment::{
    EventRecord, ExperimentRecord, ExperimentStore, MetricRecord, ParticipantRecord,
    ExperimentGuard, ParticipantUpsert, VariantCounters, VariantRecord,
};
use crate::Result;

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups forwarded to the inner store.
    pub misses: u64,
}

/// Caching store wrapper
///
/// # Example
///
/// ```rust
/// use abtest_engine::cache::CachedExperimentStore;
/// use abtest_engine::experiment::{ExperimentRecord, ExperimentStore, MemoryExperimentStore};
///
/// # fn main() -> abtest_engine::Result<()> {
/// let store = CachedExperimentStore::new(MemoryExperimentStore::new());
/// store.create_experiment(ExperimentRecord::new("exp-1", "Checkout"), vec![], vec![])?;
///
/// store.get_experiment("exp-1")?; // miss, populates
/// store.get_experiment("exp-1")?; // hit
/// assert_eq!(store.stats().hits, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CachedExperimentStore<S: ExperimentStore> {
    inner: S,
    experiments: DashMap<String, ExperimentRecord>,
    variants: DashMap<String, Vec<VariantRecord>>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: ExperimentStore> CachedExperimentStore<S> {
    /// Wrap `inner` with an empty cache.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            experiments: DashMap::new(),
            variants: DashMap::new(),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get reference to inner store (for inspection/testing)
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Drop the cached rows of one experiment.
    pub fn invalidate(&self, experiment_id: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.experiments.remove(experiment_id);
        self.variants.remove(experiment_id);
        debug!(experiment_id, "cache entry invalidated");
    }

    /// Drop every cached row.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.experiments.clear();
        self.variants.clear();
    }

    /// Hit/miss counters since creation.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) -> u64 {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.generation.load(Ordering::SeqCst)
    }

    /// Cache `value` unless a write landed after `seen` was taken.
    fn fill<V>(&self, map: &DashMap<String, V>, key: &str, value: V, seen: u64) {
        let entry = map.entry(key.to_string());
        if self.generation.load(Ordering::SeqCst) == seen {
            entry.insert(value);
        } else {
            debug!(key, "stale cache fill skipped");
        }
    }
}

impl<S: ExperimentStore> ExperimentStore for CachedExperimentStore<S> {
    fn create_experiment(
        &self,
        experiment: ExperimentRecord,
        variants: Vec<VariantRecord>,
        metrics: Vec<MetricRecord>,
    ) -> Result<()> {
        let experiment_id = experiment.experiment_id().to_string();
        self.inner.create_experiment(experiment, variants, metrics)?;
        self.invalidate(&experiment_id);
        Ok(())
    }

    fn get_experiment(&self, experiment_id: &str) -> Result<Option<ExperimentRecord>> {
        if let Some(cached) = self.experiments.get(experiment_id) {
            self.hit();
            return Ok(Some(cached.value().clone()));
        }
        let seen = self.miss();
        let found = self.inner.get_experiment(experiment_id)?;
        if let Some(record) = &found {
            self.fill(&self.experiments, experiment_id, record.clone(), seen);
        }
        Ok(found)
    }

    fn list_experiments(&self) -> Result<Vec<ExperimentRecord>> {
        self.inner.list_experiments()
    }

    fn update_experiment(
        &self,
        experiment_id: &str,
        update: &mut dyn FnMut(&mut ExperimentRecord) -> Result<()>,
    ) -> Result<ExperimentRecord> {
        let result = self.inner.update_experiment(experiment_id, update);
        self.invalidate(experiment_id);
        result
    }

    fn variants(&self, experiment_id: &str) -> Result<Vec<VariantRecord>> {
        if let Some(cached) = self.variants.get(experiment_id) {
            self.hit();
            return Ok(cached.value().clone());
        }
        let seen = self.miss();
        let variants = self.inner.variants(experiment_id)?;
        self.fill(&self.variants, experiment_id, variants.clone(), seen);
        Ok(variants)
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

    // Guards see the inner store's row, never a cached copy
    fn insert_participant_guarded(
        &self,
        participant: ParticipantRecord,
        guard: ExperimentGuard<'_>,
    ) -> Result<ParticipantUpsert> {
        self.inner.insert_participant_guarded(participant, guard)
    }

    fn get_participant(&self, participant_id: &str) -> Result<Option<ParticipantRecord>> {
        self.inner.get_participant(participant_id)
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
