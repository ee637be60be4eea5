//! Variant Record - one treatment arm of an experiment

use serde::{Deserialize, Serialize};

/// Variant Record represents one arm of an experiment.
///
/// The `weight` is relative: weights of an experiment need not sum to 100,
/// the allocator normalizes them before assignment. A zero weight disables
/// the arm for hashed traffic (it can still be forced).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantRecord {
    variant_id: String,
    experiment_id: String,
    name: String,
    weight: u32,
    is_control: bool,
    config: serde_json::Value,
}

impl VariantRecord {
    /// Create a new treatment variant.
    ///
    /// # Arguments
    ///
    /// * `variant_id` - Unique identifier for the variant
    /// * `experiment_id` - ID of the parent experiment
    /// * `name` - Name, unique within the experiment
    /// * `weight` - Relative traffic weight (0-100)
    #[must_use]
    pub fn new(
        variant_id: impl Into<String>,
        experiment_id: impl Into<String>,
        name: impl Into<String>,
        weight: u32,
    ) -> Self {
        Self {
            variant_id: variant_id.into(),
            experiment_id: experiment_id.into(),
            name: name.into(),
            weight,
            is_control: false,
            config: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Create a control variant.
    #[must_use]
    pub fn control(
        variant_id: impl Into<String>,
        experiment_id: impl Into<String>,
        name: impl Into<String>,
        weight: u32,
    ) -> Self {
        Self {
            is_control: true,
            ..Self::new(variant_id, experiment_id, name, weight)
        }
    }

    /// Attach a free-form configuration blob.
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Get the variant ID.
    #[must_use]
    pub fn variant_id(&self) -> &str {
        &self.variant_id
    }

    /// Get the parent experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the variant name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the relative traffic weight.
    #[must_use]
    pub const fn weight(&self) -> u32 {
        self.weight
    }

    /// Whether this variant is the control arm.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        self.is_control
    }

    /// Get the configuration blob.
    #[must_use]
    pub const fn config(&self) -> &serde_json::Value {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_record_new() {
        let variant = VariantRecord::new("v-b", "exp-1", "green button", 50);
        assert_eq!(variant.variant_id(), "v-b");
        assert_eq!(variant.experiment_id(), "exp-1");
        assert_eq!(variant.weight(), 50);
        assert!(!variant.is_control());
        assert!(variant.config().as_object().unwrap().is_empty());
    }

    #[test]
    fn test_variant_record_control() {
        let variant = VariantRecord::control("v-a", "exp-1", "blue button", 50)
            .with_config(serde_json::json!({"color": "blue"}));
        assert!(variant.is_control());
        assert_eq!(variant.config()["color"], "blue");
    }
}
