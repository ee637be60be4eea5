//! Engine configuration
//!
//! Analysis thresholds shared by the report generator and the planning
//! helpers. Deserializable with per-field defaults, so a partial JSON
//! document only overrides what it names.

use serde::{Deserialize, Serialize};

use crate::stats::{TTestKind, DEFAULT_ALPHA, DEFAULT_CONFIDENCE_LEVEL, DEFAULT_POWER};
use crate::{Error, Result};

/// Analysis thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Significance level of every test.
    pub alpha: f64,
    /// Confidence level of the lift interval.
    pub confidence_level: f64,
    /// Minimum `1 - p` required to declare a winner.
    pub confidence_bar: f64,
    /// Minimum absolute relative lift for practical significance.
    pub min_lift: f64,
    /// Desired power for sample size estimates.
    pub power: f64,
    /// t-test flavor for continuous metrics.
    pub ttest: TTestKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            confidence_bar: 0.95,
            min_lift: 0.05,
            power: DEFAULT_POWER,
            ttest: TTestKind::Student,
        }
    }
}

impl EngineConfig {
    /// Create a config builder starting from the defaults.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Parse a JSON document; missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// `Serialization` for malformed JSON, `InvalidInput` for out-of-range values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every probability lies in (0, 1) and `min_lift` is non-negative.
    ///
    /// # Errors
    ///
    /// `InvalidInput` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("alpha", self.alpha),
            ("confidence_level", self.confidence_level),
            ("confidence_bar", self.confidence_bar),
            ("power", self.power),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(Error::InvalidInput(format!(
                    "{name} must be within (0, 1), got {value}"
                )));
            }
        }
        if !(self.min_lift.is_finite() && self.min_lift >= 0.0) {
            return Err(Error::InvalidInput(format!(
                "min_lift must be non-negative, got {}",
                self.min_lift
            )));
        }
        Ok(())
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the significance level.
    #[must_use]
    pub const fn alpha(mut self, alpha: f64) -> Self {
        self.config.alpha = alpha;
        self
    }

    /// Set the confidence level of lift intervals.
    #[must_use]
    pub const fn confidence_level(mut self, level: f64) -> Self {
        self.config.confidence_level = level;
        self
    }

    /// Set the confidence required to declare a winner.
    #[must_use]
    pub const fn confidence_bar(mut self, bar: f64) -> Self {
        self.config.confidence_bar = bar;
        self
    }

    /// Set the minimum practically significant lift.
    #[must_use]
    pub const fn min_lift(mut self, min_lift: f64) -> Self {
        self.config.min_lift = min_lift;
        self
    }

    /// Set the desired power for sample size estimates.
    #[must_use]
    pub const fn power(mut self, power: f64) -> Self {
        self.config.power = power;
        self
    }

    /// Select the t-test flavor.
    #[must_use]
    pub const fn ttest(mut self, ttest: TTestKind) -> Self {
        self.config.ttest = ttest;
        self
    }

    /// Validate and build the config.
    ///
    /// # Errors
    ///
    /// Same as [`EngineConfig::validate`].
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!((config.alpha - 0.05).abs() < f64::EPSILON);
        assert!((config.confidence_bar - 0.95).abs() < f64::EPSILON);
        assert!((config.min_lift - 0.05).abs() < f64::EPSILON);
        assert_eq!(config.ttest, TTestKind::Student);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::builder()
            .alpha(0.01)
            .min_lift(0.1)
            .ttest(TTestKind::Welch)
            .build()
            .unwrap();
        assert!((config.alpha - 0.01).abs() < f64::EPSILON);
        assert!((config.min_lift - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.ttest, TTestKind::Welch);
    }

    #[test]
    fn test_builder_rejects_out_of_range() {
        assert!(matches!(
            EngineConfig::builder().alpha(0.0).build(),
            Err(Error::InvalidInput(_))
        ));
        assert!(EngineConfig::builder().power(1.0).build().is_err());
        assert!(EngineConfig::builder().min_lift(-0.1).build().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"alpha": 0.1, "ttest": "welch"}"#).unwrap();
        assert!((config.alpha - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.ttest, TTestKind::Welch);
        assert!((config.power - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            EngineConfig::from_json("{not json"),
            Err(Error::Serialization(_))
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{"confidence_bar": 2.0}"#),
            Err(Error::InvalidInput(_))
        ));
    }
}
