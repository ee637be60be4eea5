//! Metric Record - which aggregation drives the experiment decision

use serde::{Deserialize, Serialize};

/// Kind of metric an experiment is judged on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Share of participants with a conversion.
    ConversionRate,
    /// Share of participants with at least one click.
    ClickThroughRate,
    /// Numeric value summed per participant from the event property of the same name.
    Custom,
}

/// Metric Record labels an aggregation the analyzer should compute.
///
/// Metric definitions are created with the experiment and are read-only
/// during analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    experiment_id: String,
    variant_id: Option<String>,
    name: String,
    metric_type: MetricType,
    target_value: Option<f64>,
    is_primary: bool,
}

impl MetricRecord {
    /// Create a new secondary metric.
    ///
    /// # Arguments
    ///
    /// * `experiment_id` - ID of the parent experiment
    /// * `name` - Metric name, unique within the experiment
    /// * `metric_type` - Aggregation to compute
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
        metric_type: MetricType,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            variant_id: None,
            name: name.into(),
            metric_type,
            target_value: None,
            is_primary: false,
        }
    }

    /// Create a builder for constructing a metric record with optional fields.
    #[must_use]
    pub fn builder(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
        metric_type: MetricType,
    ) -> MetricRecordBuilder {
        MetricRecordBuilder::new(experiment_id, name, metric_type)
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Variant the metric is scoped to, if any.
    #[must_use]
    pub fn variant_id(&self) -> Option<&str> {
        self.variant_id.as_deref()
    }

    /// Get the metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the metric type.
    #[must_use]
    pub const fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    /// Target value, if configured.
    #[must_use]
    pub const fn target_value(&self) -> Option<f64> {
        self.target_value
    }

    /// Whether this metric drives the winner decision.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.is_primary
    }
}

/// Builder for `MetricRecord`.
#[derive(Debug)]
pub struct MetricRecordBuilder {
    record: MetricRecord,
}

impl MetricRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
        metric_type: MetricType,
    ) -> Self {
        Self {
            record: MetricRecord::new(experiment_id, name, metric_type),
        }
    }

    /// Scope the metric to one variant.
    #[must_use]
    pub fn variant(mut self, variant_id: impl Into<String>) -> Self {
        self.record.variant_id = Some(variant_id.into());
        self
    }

    /// Set a target value.
    #[must_use]
    pub const fn target_value(mut self, value: f64) -> Self {
        self.record.target_value = Some(value);
        self
    }

    /// Mark as the primary metric.
    #[must_use]
    pub const fn primary(mut self) -> Self {
        self.record.is_primary = true;
        self
    }

    /// Build the `MetricRecord`.
    #[must_use]
    pub fn build(self) -> MetricRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_record_new() {
        let metric = MetricRecord::new("exp-1", "signup", MetricType::ConversionRate);
        assert_eq!(metric.experiment_id(), "exp-1");
        assert_eq!(metric.name(), "signup");
        assert_eq!(metric.metric_type(), MetricType::ConversionRate);
        assert!(!metric.is_primary());
        assert!(metric.variant_id().is_none());
    }

    #[test]
    fn test_metric_record_builder() {
        let metric = MetricRecord::builder("exp-1", "revenue", MetricType::Custom)
            .target_value(12.0)
            .variant("v-b")
            .primary()
            .build();
        assert!(metric.is_primary());
        assert_eq!(metric.variant_id(), Some("v-b"));
        assert!((metric.target_value().unwrap() - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metric_type_serialization() {
        let json = serde_json::to_string(&MetricType::ClickThroughRate).unwrap();
        assert_eq!(json, "\"click_through_rate\"");
    }
}
