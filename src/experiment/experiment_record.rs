//! Experiment Record - root entity for A/B testing

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lifecycle status of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    /// Experiment is being configured; no traffic.
    Draft,
    /// Experiment is running and accepts new participants.
    Active,
    /// Experiment is temporarily halted; existing participants keep their variant.
    Paused,
    /// Experiment finished normally.
    Completed,
    /// Experiment was abandoned.
    Cancelled,
}

impl ExperimentStatus {
    /// Get status name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses admit no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Experiment Record represents a tracked A/B test.
///
/// This is the root entity of the schema. Each experiment owns its
/// variants, participants and metric definitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentRecord {
    experiment_id: String,
    name: String,
    description: String,
    tenant_id: Option<String>,
    created_by: Option<String>,
    status: ExperimentStatus,
    traffic_allocation: u8,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    config: Option<serde_json::Value>,
    target_tenants: Vec<String>,
}

impl ExperimentRecord {
    /// Create a new draft experiment with full traffic allocation.
    ///
    /// # Arguments
    ///
    /// * `experiment_id` - Unique identifier for the experiment
    /// * `name` - Human-readable name for the experiment
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: name.into(),
            description: String::new(),
            tenant_id: None,
            created_by: None,
            status: ExperimentStatus::Draft,
            traffic_allocation: 100,
            start_date: None,
            end_date: None,
            created_at: Utc::now(),
            config: None,
            target_tenants: Vec::new(),
        }
    }

    /// Create a builder for constructing an experiment record with optional fields.
    #[must_use]
    pub fn builder(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
    ) -> ExperimentRecordBuilder {
        ExperimentRecordBuilder::new(experiment_id, name)
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the owning tenant, if any.
    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Get the creator, if recorded.
    #[must_use]
    pub fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    /// Get the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> ExperimentStatus {
        self.status
    }

    /// Percentage (1-100) of eligible units admitted into the experiment.
    #[must_use]
    pub const fn traffic_allocation(&self) -> u8 {
        self.traffic_allocation
    }

    /// Get the start timestamp, if set.
    #[must_use]
    pub const fn start_date(&self) -> Option<DateTime<Utc>> {
        self.start_date
    }

    /// Get the end timestamp, if set.
    #[must_use]
    pub const fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the experiment configuration, if any.
    #[must_use]
    pub const fn config(&self) -> Option<&serde_json::Value> {
        self.config.as_ref()
    }

    /// Tenants the experiment is restricted to. Empty means every tenant.
    #[must_use]
    pub fn target_tenants(&self) -> &[String] {
        &self.target_tenants
    }

    /// Whether the experiment applies to `tenant_id`.
    #[must_use]
    pub fn targets_tenant(&self, tenant_id: &str) -> bool {
        self.target_tenants.is_empty() || self.target_tenants.iter().any(|t| t == tenant_id)
    }

    pub(crate) fn set_status(&mut self, status: ExperimentStatus) {
        self.status = status;
    }

    pub(crate) fn set_start_date(&mut self, at: DateTime<Utc>) {
        self.start_date = Some(at);
    }

    pub(crate) fn set_end_date(&mut self, at: DateTime<Utc>) {
        self.end_date = Some(at);
    }
}

/// Builder for `ExperimentRecord`.
#[derive(Debug)]
pub struct ExperimentRecordBuilder {
    record: ExperimentRecord,
}

impl ExperimentRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            record: ExperimentRecord::new(experiment_id, name),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.record.description = description.into();
        self
    }

    /// Set the owning tenant.
    #[must_use]
    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.record.tenant_id = Some(tenant_id.into());
        self
    }

    /// Set the creator.
    #[must_use]
    pub fn created_by(mut self, user: impl Into<String>) -> Self {
        self.record.created_by = Some(user.into());
        self
    }

    /// Set the traffic allocation percentage (1-100).
    #[must_use]
    pub const fn traffic_allocation(mut self, percent: u8) -> Self {
        self.record.traffic_allocation = percent;
        self
    }

    /// Set a planned start date.
    #[must_use]
    pub const fn start_date(mut self, at: DateTime<Utc>) -> Self {
        self.record.start_date = Some(at);
        self
    }

    /// Set a planned end date.
    #[must_use]
    pub const fn end_date(mut self, at: DateTime<Utc>) -> Self {
        self.record.end_date = Some(at);
        self
    }

    /// Set the experiment configuration.
    #[must_use]
    pub fn config(mut self, config: serde_json::Value) -> Self {
        self.record.config = Some(config);
        self
    }

    /// Restrict the experiment to the given tenants.
    #[must_use]
    pub fn target_tenants<I, S>(mut self, tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record.target_tenants = tenants.into_iter().map(Into::into).collect();
        self
    }

    /// Set a custom creation timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.record.created_at = created_at;
        self
    }

    /// Build the `ExperimentRecord`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the traffic allocation is outside 1-100 and
    /// `InvalidSchedule` if the end date precedes the start date.
    pub fn build(self) -> Result<ExperimentRecord> {
        let record = self.record;
        if !(1..=100).contains(&record.traffic_allocation) {
            return Err(Error::InvalidInput(format!(
                "traffic_allocation must be within 1-100, got {}",
                record.traffic_allocation
            )));
        }
        if let (Some(start), Some(end)) = (record.start_date, record.end_date) {
            if end < start {
                return Err(Error::InvalidSchedule(format!(
                    "end date {end} precedes start date {start}"
                )));
            }
        }
        Ok(record)
    }
}
