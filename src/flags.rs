//! Feature flags with deterministic percentage rollout
//!
//! A flag is on for a unit when it is enabled, inside its time window,
//! targets the unit's tenant, and the unit's rollout bucket falls below the
//! rollout percentage. Buckets come from the allocator's stable hash, so a
//! unit sees the same answer in every process.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::allocator::TrafficAllocator;
use crate::{Error, Result};

/// Feature flag definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlag {
    name: String,
    description: String,
    is_enabled: bool,
    rollout_percentage: u8,
    target_tenants: Vec<String>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl FeatureFlag {
    /// Enabled flag rolled out to everybody.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            is_enabled: true,
            rollout_percentage: 100,
            target_tenants: Vec::new(),
            start_date: None,
            end_date: None,
            created_at: Utc::now(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the enabled switch.
    #[must_use]
    pub const fn enabled(mut self, is_enabled: bool) -> Self {
        self.is_enabled = is_enabled;
        self
    }

    /// Set the rollout percentage (validated on upsert).
    #[must_use]
    pub const fn rollout(mut self, percentage: u8) -> Self {
        self.rollout_percentage = percentage;
        self
    }

    /// Restrict the flag to `tenants`.
    #[must_use]
    pub fn for_tenants<I, S>(mut self, tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_tenants = tenants.into_iter().map(Into::into).collect();
        self
    }

    /// Limit the flag to a time window; either bound may be open.
    #[must_use]
    pub const fn window(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    /// Get the flag name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether the flag is switched on.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    /// Percentage of units that see the flag.
    #[must_use]
    pub const fn rollout_percentage(&self) -> u8 {
        self.rollout_percentage
    }

    /// Targeted tenants (empty means all).
    #[must_use]
    pub fn target_tenants(&self) -> &[String] {
        &self.target_tenants
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn in_window(&self, now: DateTime<Utc>) -> bool {
        self.start_date.map_or(true, |start| now >= start)
            && self.end_date.map_or(true, |end| now <= end)
    }

    fn targets(&self, tenant_id: Option<&str>) -> bool {
        if self.target_tenants.is_empty() {
            return true;
        }
        tenant_id.is_some_and(|tenant| self.target_tenants.iter().any(|t| t == tenant))
    }
}

/// Usage snapshot of one flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagUsage {
    /// Flag name.
    pub flag_name: String,
    /// Enabled switch.
    pub is_enabled: bool,
    /// Rollout percentage.
    pub rollout_percentage: u8,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Times the flag was checked.
    pub evaluations: u64,
    /// Times a check returned `true`.
    pub exposures: u64,
}

#[derive(Debug)]
struct FlagEntry {
    flag: FeatureFlag,
    evaluations: AtomicU64,
    exposures: AtomicU64,
}

impl FlagEntry {
    fn new(flag: FeatureFlag) -> Self {
        Self {
            flag,
            evaluations: AtomicU64::new(0),
            exposures: AtomicU64::new(0),
        }
    }
}

/// Concurrent registry of feature flags.
///
/// # Example
///
/// ```rust
/// use abtest_engine::flags::{FeatureFlag, FeatureFlagManager};
///
/// let flags = FeatureFlagManager::new();
/// flags.upsert(FeatureFlag::new("new-checkout").rollout(100))?;
/// assert!(flags.check_flag("new-checkout", "user-1", None));
/// assert!(!flags.check_flag("unknown", "user-1", None));
/// # Ok::<(), abtest_engine::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct FeatureFlagManager {
    flags: DashMap<String, FlagEntry>,
    allocator: TrafficAllocator,
}

impl FeatureFlagManager {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a flag. Replacing keeps the usage counters.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty name, a rollout above 100 or an inverted window.
    pub fn upsert(&self, flag: FeatureFlag) -> Result<()> {
        if flag.name.is_empty() {
            return Err(Error::InvalidInput("flag name must not be empty".to_string()));
        }
        if flag.rollout_percentage > 100 {
            return Err(Error::InvalidInput(format!(
                "flag '{}' rollout_percentage {} exceeds 100",
                flag.name, flag.rollout_percentage
            )));
        }
        if let (Some(start), Some(end)) = (flag.start_date, flag.end_date) {
            if end < start {
                return Err(Error::InvalidInput(format!(
                    "flag '{}' ends before it starts",
                    flag.name
                )));
            }
        }

        info!(
            flag = %flag.name,
            enabled = flag.is_enabled,
            rollout = flag.rollout_percentage,
            "flag upserted"
        );
        match self.flags.get_mut(&flag.name) {
            Some(mut entry) => entry.flag = flag,
            None => {
                self.flags.insert(flag.name.clone(), FlagEntry::new(flag));
            }
        }
        Ok(())
    }

    /// Get a flag by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<FeatureFlag> {
        self.flags.get(name).map(|entry| entry.flag.clone())
    }

    /// Remove a flag, returning it if it existed.
    pub fn remove(&self, name: &str) -> Option<FeatureFlag> {
        self.flags.remove(name).map(|(_, entry)| entry.flag)
    }

    /// Flip the enabled switch and return the new state.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the flag does not exist.
    pub fn toggle(&self, name: &str) -> Result<bool> {
        let mut entry = self
            .flags
            .get_mut(name)
            .ok_or_else(|| Error::InvalidInput(format!("unknown feature flag '{name}'")))?;
        entry.flag.is_enabled = !entry.flag.is_enabled;
        let enabled = entry.flag.is_enabled;
        info!(flag = name, enabled, "flag toggled");
        Ok(enabled)
    }

    /// Whether `flag_name` is on for `unit_id` in `tenant_id`, evaluated now.
    ///
    /// Unknown flags are off.
    #[must_use]
    pub fn check_flag(&self, flag_name: &str, unit_id: &str, tenant_id: Option<&str>) -> bool {
        self.check_flag_at(flag_name, unit_id, tenant_id, Utc::now())
    }

    /// Same as [`FeatureFlagManager::check_flag`] at an explicit instant.
    #[must_use]
    pub fn check_flag_at(
        &self,
        flag_name: &str,
        unit_id: &str,
        tenant_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(entry) = self.flags.get(flag_name) else {
            debug!(flag = flag_name, "unknown flag checked");
            return false;
        };
        entry.evaluations.fetch_add(1, Ordering::Relaxed);

        let flag = &entry.flag;
        let on = flag.is_enabled
            && flag.in_window(now)
            && flag.targets(tenant_id)
            && self.allocator.rollout_bucket(flag_name, unit_id) < flag.rollout_percentage;
        if on {
            entry.exposures.fetch_add(1, Ordering::Relaxed);
        }
        on
    }

    /// Evaluate every flag for `unit_id`, keyed by flag name.
    #[must_use]
    pub fn check_all(&self, unit_id: &str, tenant_id: Option<&str>) -> BTreeMap<String, bool> {
        let now = Utc::now();
        let names: Vec<String> = self.flags.iter().map(|entry| entry.key().clone()).collect();
        names
            .into_iter()
            .map(|name| {
                let on = self.check_flag_at(&name, unit_id, tenant_id, now);
                (name, on)
            })
            .collect()
    }

    /// Usage of every flag, ordered by name.
    #[must_use]
    pub fn usage_stats(&self) -> Vec<FlagUsage> {
        let mut stats: Vec<FlagUsage> = self
            .flags
            .iter()
            .map(|entry| FlagUsage {
                flag_name: entry.flag.name.clone(),
                is_enabled: entry.flag.is_enabled,
                rollout_percentage: entry.flag.rollout_percentage,
                created_at: entry.flag.created_at,
                evaluations: entry.evaluations.load(Ordering::Relaxed),
                exposures: entry.exposures.load(Ordering::Relaxed),
            })
            .collect();
        stats.sort_by(|a, b| a.flag_name.cmp(&b.flag_name));
        stats
    }

    /// Number of registered flags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Check if no flags are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}
