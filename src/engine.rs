//! Engine facade
//!
//! [`Engine`] is the contract the API layer calls: allocation, event
//! capture, reports, lifecycle actions and flag checks over one shared
//! [`ExperimentStore`]. It is `Send + Sync` and meant to live in an `Arc`.
//!
//! ## Allocation flow
//!
//! ```text
//! allocate(exp, unit)
//!   ├─ status policy: Reject ─────────────> ExperimentNotActive
//!   ├─ stored participant? ───────────────> return it (idempotent)
//!   ├─ status policy: ExistingOnly ───────> ExperimentNotActive
//!   ├─ tenant / traffic admission ────────> UnitNotAdmitted
//!   └─ hash → variant → insert-if-absent ─> Allocation
//!      (status re-checked under the experiment row)
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::allocator::TrafficAllocator;
use crate::config::EngineConfig;
use crate::experiment::{
    lifecycle, AllocationPolicy, EventType, ExperimentRecord, ExperimentStatus, ExperimentStore,
    MemoryExperimentStore, MetricRecord, ParticipantRecord, Transition, VariantCounters,
    VariantRecord,
};
use crate::flags::FeatureFlagManager;
use crate::recorder::EventRecorder;
use crate::report::{Report, ReportGenerator};
use crate::stats::StatisticalAnalyzer;
use crate::{Error, Result};

/// Outcome of an allocation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Assigned variant.
    pub variant_id: String,
    /// Participant row backing the assignment.
    pub participant_id: String,
    /// `false` when the unit was already assigned.
    pub newly_assigned: bool,
}

impl From<&ParticipantRecord> for Allocation {
    fn from(participant: &ParticipantRecord) -> Self {
        Self {
            variant_id: participant.variant_id().to_string(),
            participant_id: participant.participant_id().to_string(),
            newly_assigned: false,
        }
    }
}

/// Experiment engine instance
#[derive(Debug)]
pub struct Engine<S: ExperimentStore = MemoryExperimentStore> {
    store: Arc<S>,
    allocator: TrafficAllocator,
    recorder: EventRecorder<S>,
    reports: ReportGenerator<S>,
    analyzer: StatisticalAnalyzer,
    flags: FeatureFlagManager,
    config: EngineConfig,
}

impl Engine {
    /// Create a new engine builder
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// In-memory engine with the default configuration.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::assemble(
            Arc::new(MemoryExperimentStore::new()),
            EngineConfig::default(),
            FeatureFlagManager::new(),
        )
    }
}

impl<S: ExperimentStore> Engine<S> {
    fn assemble(store: Arc<S>, config: EngineConfig, flags: FeatureFlagManager) -> Self {
        Self {
            recorder: EventRecorder::new(Arc::clone(&store)),
            reports: ReportGenerator::new(Arc::clone(&store), config),
            analyzer: StatisticalAnalyzer::new().with_ttest(config.ttest),
            allocator: TrafficAllocator::new(),
            store,
            flags,
            config,
        }
    }

    /// Shared handle to the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Feature flag registry.
    #[must_use]
    pub const fn flags(&self) -> &FeatureFlagManager {
        &self.flags
    }

    /// Event recorder (for events carrying client metadata).
    #[must_use]
    pub const fn recorder(&self) -> &EventRecorder<S> {
        &self.recorder
    }

    /// Register an experiment with its variants and metrics, in `Draft`.
    ///
    /// # Errors
    ///
    /// `ExperimentExists`, `DuplicateVariant`, `InvalidWeightConfiguration`
    /// or `InvalidInput` when the definition is rejected.
    pub fn create_experiment(
        &self,
        experiment: ExperimentRecord,
        variants: Vec<VariantRecord>,
        metrics: Vec<MetricRecord>,
    ) -> Result<()> {
        if experiment.status() != ExperimentStatus::Draft {
            return Err(Error::InvalidInput(format!(
                "experiment '{}' must be created in draft status, got '{}'",
                experiment.experiment_id(),
                experiment.status()
            )));
        }
        self.store.create_experiment(experiment, variants, metrics)
    }

    /// Get an experiment.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` for unknown ids.
    pub fn experiment(&self, experiment_id: &str) -> Result<ExperimentRecord> {
        self.store
            .get_experiment(experiment_id)?
            .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))
    }

    /// Variants of an experiment in declaration order.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` for unknown ids.
    pub fn variants(&self, experiment_id: &str) -> Result<Vec<VariantRecord>> {
        self.store.variants(experiment_id)
    }

    /// Active experiments, optionally restricted to those visible to `tenant_id`.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    pub fn active_experiments(&self, tenant_id: Option<&str>) -> Result<Vec<ExperimentRecord>> {
        Ok(self
            .store
            .list_experiments()?
            .into_iter()
            .filter(|e| e.status() == ExperimentStatus::Active)
            .filter(|e| {
                tenant_id.map_or(true, |tenant| {
                    e.tenant_id().map_or(true, |owner| owner == tenant) && e.targets_tenant(tenant)
                })
            })
            .collect())
    }

    /// Assign `unit_id` to a variant of `experiment_id`. Idempotent.
    ///
    /// # Errors
    ///
    /// See [`Engine::allocate_for_tenant`].
    pub fn allocate(
        &self,
        experiment_id: &str,
        unit_id: &str,
        force_variant: Option<&str>,
    ) -> Result<Allocation> {
        self.allocate_for_tenant(experiment_id, unit_id, None, force_variant)
    }

    /// Assign `unit_id` of `tenant_id` to a variant of `experiment_id`.
    ///
    /// A unit that already participates always gets its stored variant back.
    /// A forced variant skips the traffic admission check but not tenant
    /// targeting.
    ///
    /// # Errors
    ///
    /// - `ExperimentNotFound` for unknown experiments
    /// - `ExperimentNotActive` unless active (or paused with a stored assignment)
    /// - `UnitNotAdmitted` for untargeted tenants or units outside the traffic allocation
    /// - `NoVariantsAvailable`, `InvalidWeightConfiguration`, `VariantNotFound` from the allocator
    pub fn allocate_for_tenant(
        &self,
        experiment_id: &str,
        unit_id: &str,
        tenant_id: Option<&str>,
        force_variant: Option<&str>,
    ) -> Result<Allocation> {
        let experiment = self.experiment(experiment_id)?;
        let policy = AllocationPolicy::for_status(experiment.status());
        let not_active = || Error::ExperimentNotActive {
            experiment_id: experiment_id.to_string(),
            status: experiment.status(),
        };

        if policy == AllocationPolicy::Reject {
            return Err(not_active());
        }
        if let Some(existing) = self.store.find_participant(experiment_id, unit_id)? {
            return Ok(Allocation::from(&existing));
        }
        if policy == AllocationPolicy::ExistingOnly {
            return Err(not_active());
        }

        let not_admitted = || Error::UnitNotAdmitted {
            experiment_id: experiment_id.to_string(),
            unit_id: unit_id.to_string(),
        };
        let tenant_ok = match tenant_id {
            Some(tenant) => experiment.targets_tenant(tenant),
            None => experiment.target_tenants().is_empty(),
        };
        if !tenant_ok {
            return Err(not_admitted());
        }
        if force_variant.is_none()
            && !self
                .allocator
                .admits(experiment_id, unit_id, experiment.traffic_allocation())
        {
            debug!(experiment_id, unit_id, "unit outside traffic allocation");
            return Err(not_admitted());
        }

        let variants = self.store.variants(experiment_id)?;
        let variant = self
            .allocator
            .assign(experiment_id, unit_id, &variants, force_variant)?;

        // Status is re-checked under the experiment row: a pause, stop or
        // cancel that committed since the read above wins.
        let still_allocating = |current: &ExperimentRecord| {
            if AllocationPolicy::for_status(current.status()) == AllocationPolicy::Allocate {
                Ok(())
            } else {
                Err(Error::ExperimentNotActive {
                    experiment_id: experiment_id.to_string(),
                    status: current.status(),
                })
            }
        };
        let upsert = self.store.insert_participant_guarded(
            ParticipantRecord::new(experiment_id, unit_id, variant.variant_id()),
            &still_allocating,
        )?;

        Ok(Allocation {
            newly_assigned: upsert.inserted,
            ..Allocation::from(&upsert.participant)
        })
    }

    /// Record an event for a participant, timestamped now.
    ///
    /// # Errors
    ///
    /// `ParticipantNotFound` or `ExperimentCancelled`.
    pub fn record_event(
        &self,
        participant_id: &str,
        event_type: EventType,
        event_name: &str,
        properties: serde_json::Value,
    ) -> Result<String> {
        self.recorder
            .record(participant_id, event_type, event_name, properties, None)
    }

    /// Build the analysis report of an experiment.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` for unknown ids.
    pub fn get_report(&self, experiment_id: &str) -> Result<Report> {
        self.reports.build_report(experiment_id)
    }

    /// Whether `flag_name` is on for `unit_id`.
    #[must_use]
    pub fn check_flag(&self, flag_name: &str, unit_id: &str, tenant_id: Option<&str>) -> bool {
        self.flags.check_flag(flag_name, unit_id, tenant_id)
    }

    /// Draft → Active.
    ///
    /// # Errors
    ///
    /// `InvalidTransition`, `NoVariantsAvailable` or `InvalidWeightConfiguration`.
    pub fn start(&self, experiment_id: &str) -> Result<ExperimentStatus> {
        self.transition(experiment_id, Transition::Start)
    }

    /// Active → Paused.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` from any other status.
    pub fn pause(&self, experiment_id: &str) -> Result<ExperimentStatus> {
        self.transition(experiment_id, Transition::Pause)
    }

    /// Paused → Active.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` from any other status.
    pub fn resume(&self, experiment_id: &str) -> Result<ExperimentStatus> {
        self.transition(experiment_id, Transition::Resume)
    }

    /// Active → Completed.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` from any other status.
    pub fn stop(&self, experiment_id: &str) -> Result<ExperimentStatus> {
        self.transition(experiment_id, Transition::Stop)
    }

    /// Any non-terminal status → Cancelled.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` from a terminal status.
    pub fn cancel(&self, experiment_id: &str) -> Result<ExperimentStatus> {
        self.transition(experiment_id, Transition::Cancel)
    }

    fn transition(&self, experiment_id: &str, transition: Transition) -> Result<ExperimentStatus> {
        let variants = self.store.variants(experiment_id)?;
        let now = Utc::now();
        let mut status = None;
        self.store.update_experiment(experiment_id, &mut |record| {
            status = Some(lifecycle::apply(record, &variants, transition, now)?);
            Ok(())
        })?;
        let status = status.ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))?;

        info!(
            experiment_id,
            action = transition.as_str(),
            status = %status,
            "experiment transitioned"
        );
        Ok(status)
    }

    /// Every experiment `unit_id` participates in.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    pub fn unit_participations(&self, unit_id: &str) -> Result<Vec<ParticipantRecord>> {
        self.store.participations_for_unit(unit_id)
    }

    /// Denormalized per-variant counters (dashboard reads).
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` for unknown ids.
    pub fn variant_counters(&self, experiment_id: &str) -> Result<Vec<(String, VariantCounters)>> {
        self.store.variant_counters(experiment_id)
    }

    /// Per-group sample size to detect `minimum_detectable_effect` over
    /// `baseline_rate`, at the configured power and alpha.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for out-of-range arguments.
    pub fn required_sample_size(
        &self,
        baseline_rate: f64,
        minimum_detectable_effect: f64,
    ) -> Result<u64> {
        self.analyzer.required_sample_size(
            baseline_rate,
            minimum_detectable_effect,
            self.config.power,
            self.config.alpha,
        )
    }
}

/// Engine builder
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    flags: Option<FeatureFlagManager>,
}

impl EngineBuilder {
    /// Set analysis thresholds
    #[must_use]
    pub const fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Start from a pre-populated flag registry
    #[must_use]
    pub fn flags(mut self, flags: FeatureFlagManager) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Build an engine over a fresh in-memory store
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the configuration is out of range
    pub fn build(self) -> Result<Engine> {
        self.build_with_store(MemoryExperimentStore::new())
    }

    /// Build an engine over `store`
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the configuration is out of range
    pub fn build_with_store<S: ExperimentStore>(self, store: S) -> Result<Engine<S>> {
        self.config.validate()?;
        Ok(Engine::assemble(
            Arc::new(store),
            self.config,
            self.flags.unwrap_or_default(),
        ))
    }
}
