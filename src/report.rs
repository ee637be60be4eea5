//! Experiment reports
//!
//! A [`Report`] is a read-only snapshot derived from the authoritative
//! participant and event rows (never from the denormalized counters).
//!
//! ## Determinism
//!
//! Reports carry no timestamps and only ordered collections (`Vec` in
//! variant declaration order, `BTreeMap` keyed by variant id), so
//! serializing the report of an unchanged experiment twice yields
//! byte-identical JSON.
//!
//! ## Winner rule
//!
//! A treatment passes when `1 - p >= confidence_bar` and
//! `|lift| >= min_lift`. The passing treatment with positive lift and the
//! highest conversion rate wins. If every treatment passes with negative
//! lift the control wins. Otherwise there is no winner.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::experiment::{
    EventRecord, EventType, ExperimentStatus, ExperimentStore, MetricRecord, MetricType,
    ParticipantRecord, VariantRecord,
};
use crate::stats::{
    extended_float, ContinuousSignificance, ConversionData, ConversionSignificance,
    StatisticalAnalyzer,
};
use crate::{Error, Result};

/// Per-variant aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSummary {
    /// Variant ID.
    pub variant_id: String,
    /// Variant name.
    pub name: String,
    /// Control flag as declared.
    pub is_control: bool,
    /// Participants assigned to the variant.
    pub participants: u64,
    /// Participants counted as converted under the primary metric.
    pub conversions: u64,
    /// `conversions / participants`, 0 for an empty variant.
    pub conversion_rate: f64,
}

/// Continuous analysis of a custom metric for one treatment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    /// Metric name (also the event property that is summed).
    pub metric: String,
    /// Treatment variant compared against the control.
    pub variant_id: String,
    /// Mean per-participant value in the control group.
    #[serde(with = "extended_float")]
    pub control_mean: f64,
    /// Mean per-participant value in the treatment group.
    #[serde(with = "extended_float")]
    pub treatment_mean: f64,
    /// `None` when a group has fewer than 2 participants or its values
    /// overflow `f64`.
    pub significance: Option<ContinuousSignificance>,
}

/// Analysis snapshot of one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Experiment ID.
    pub experiment_id: String,
    /// Experiment name.
    pub experiment_name: String,
    /// Status at build time.
    pub status: ExperimentStatus,
    /// Aggregation used for conversions.
    pub primary_metric: MetricType,
    /// Participants across all variants.
    pub total_participants: u64,
    /// Per-variant aggregates in declaration order.
    pub variants: Vec<VariantSummary>,
    /// Participants keyed by variant ID.
    pub participants_by_variant: BTreeMap<String, u64>,
    /// Conversion rate keyed by variant ID.
    pub conversion_rates: BTreeMap<String, f64>,
    /// Baseline variant of the comparisons.
    pub control_variant_id: Option<String>,
    /// Conversion test of each treatment against the control.
    /// `None` when either group is empty.
    pub significance: BTreeMap<String, Option<ConversionSignificance>>,
    /// `(1 - p) * 100` of each computed comparison.
    pub confidence: BTreeMap<String, f64>,
    /// Custom metric results, by metric then treatment.
    pub metric_results: Vec<MetricResult>,
    /// Winning variant, if any.
    pub winner_variant: Option<String>,
    /// Per-group sample size needed to detect `min_lift` at the control's rate.
    pub recommended_sample_size: Option<u64>,
    /// Human-readable next steps.
    pub recommendations: Vec<String>,
}

impl Report {
    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// `Serialization` if a value cannot be encoded.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Summary of `variant_id`.
    #[must_use]
    pub fn variant(&self, variant_id: &str) -> Option<&VariantSummary> {
        self.variants.iter().find(|v| v.variant_id == variant_id)
    }

    /// Conversion test of `variant_id` against the control, if computed.
    #[must_use]
    pub fn significance_for(&self, variant_id: &str) -> Option<&ConversionSignificance> {
        self.significance.get(variant_id).and_then(Option::as_ref)
    }
}

/// Builds [`Report`]s from an [`ExperimentStore`].
#[derive(Debug)]
pub struct ReportGenerator<S> {
    store: Arc<S>,
    analyzer: StatisticalAnalyzer,
    config: EngineConfig,
}

impl<S> Clone for ReportGenerator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            analyzer: self.analyzer,
            config: self.config,
        }
    }
}

struct Tally {
    participants: u64,
    conversions: u64,
}

fn control_index(variants: &[VariantRecord]) -> Option<usize> {
    if variants.is_empty() {
        return None;
    }
    Some(variants.iter().position(VariantRecord::is_control).unwrap_or(0))
}

fn primary_metric(metrics: &[MetricRecord]) -> MetricType {
    let aggregation = |m: &&MetricRecord| m.metric_type() != MetricType::Custom;
    metrics
        .iter()
        .filter(aggregation)
        .find(|m| m.is_primary())
        .or_else(|| metrics.iter().find(aggregation))
        .map_or(MetricType::ConversionRate, MetricRecord::metric_type)
}

#[allow(clippy::cast_precision_loss)]
fn rate(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl<S: ExperimentStore> ReportGenerator<S> {
    /// Create a generator reading from `store`.
    #[must_use]
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self {
            store,
            analyzer: StatisticalAnalyzer::new().with_ttest(config.ttest),
            config,
        }
    }

    /// Build the report of `experiment_id`.
    ///
    /// Empty groups never fail the report; their comparisons are `None`.
    ///
    /// # Errors
    ///
    /// `ExperimentNotFound` for unknown experiments.
    pub fn build_report(&self, experiment_id: &str) -> Result<Report> {
        let experiment = self
            .store
            .get_experiment(experiment_id)?
            .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))?;
        let variants = self.store.variants(experiment_id)?;
        let metrics = self.store.metrics(experiment_id)?;
        let participants = self.store.participants(experiment_id)?;

        let primary = primary_metric(&metrics);
        let custom: Vec<&MetricRecord> = metrics
            .iter()
            .filter(|m| m.metric_type() == MetricType::Custom)
            .collect();

        let events = if primary == MetricType::ClickThroughRate || !custom.is_empty() {
            self.load_events(&participants)?
        } else {
            FxHashMap::default()
        };

        let mut tallies: FxHashMap<&str, Tally> = variants
            .iter()
            .map(|v| (v.variant_id(), Tally { participants: 0, conversions: 0 }))
            .collect();
        for participant in &participants {
            let Some(tally) = tallies.get_mut(participant.variant_id()) else {
                continue;
            };
            tally.participants += 1;
            let converted = match primary {
                MetricType::ClickThroughRate => events
                    .get(participant.participant_id())
                    .is_some_and(|evs| evs.iter().any(|e| e.event_type() == EventType::Click)),
                _ => participant.is_converted(),
            };
            if converted {
                tally.conversions += 1;
            }
        }

        let summaries: Vec<VariantSummary> = variants
            .iter()
            .map(|v| {
                let (participants, conversions) = tallies
                    .get(v.variant_id())
                    .map_or((0, 0), |t| (t.participants, t.conversions));
                VariantSummary {
                    variant_id: v.variant_id().to_string(),
                    name: v.name().to_string(),
                    is_control: v.is_control(),
                    participants,
                    conversions,
                    conversion_rate: rate(conversions, participants),
                }
            })
            .collect();

        let control = control_index(&variants);
        let mut significance = BTreeMap::new();
        let mut confidence = BTreeMap::new();
        if let Some(ci) = control {
            let base = &summaries[ci];
            for (i, treatment) in summaries.iter().enumerate() {
                if i == ci {
                    continue;
                }
                let result = if base.participants == 0 || treatment.participants == 0 {
                    None
                } else {
                    let data = ConversionData::new(
                        base.conversions,
                        base.participants,
                        treatment.conversions,
                        treatment.participants,
                    )
                    .with_alpha(self.config.alpha)
                    .with_confidence_level(self.config.confidence_level);
                    let computed = self.analyzer.conversion_significance(&data)?;
                    confidence.insert(
                        treatment.variant_id.clone(),
                        (1.0 - computed.p_value) * 100.0,
                    );
                    Some(computed)
                };
                significance.insert(treatment.variant_id.clone(), result);
            }
        }

        let metric_results = match control {
            Some(ci) => self.metric_results(&custom, &variants, ci, &participants, &events)?,
            None => Vec::new(),
        };

        let winner_variant = control.and_then(|ci| self.pick_winner(&summaries, ci, &significance));
        let recommended_sample_size = control.and_then(|ci| {
            self.analyzer
                .required_sample_size(
                    summaries[ci].conversion_rate,
                    self.config.min_lift,
                    self.config.power,
                    self.config.alpha,
                )
                .ok()
        });

        let mut report = Report {
            experiment_id: experiment_id.to_string(),
            experiment_name: experiment.name().to_string(),
            status: experiment.status(),
            primary_metric: primary,
            total_participants: summaries.iter().map(|s| s.participants).sum(),
            participants_by_variant: summaries
                .iter()
                .map(|s| (s.variant_id.clone(), s.participants))
                .collect(),
            conversion_rates: summaries
                .iter()
                .map(|s| (s.variant_id.clone(), s.conversion_rate))
                .collect(),
            control_variant_id: control.map(|ci| summaries[ci].variant_id.clone()),
            variants: summaries,
            significance,
            confidence,
            metric_results,
            winner_variant,
            recommended_sample_size,
            recommendations: Vec::new(),
        };
        report.recommendations = self.recommendations(&report);

        info!(
            experiment_id,
            participants = report.total_participants,
            winner = report.winner_variant.as_deref().unwrap_or("none"),
            "report built"
        );
        Ok(report)
    }

    fn load_events(
        &self,
        participants: &[ParticipantRecord],
    ) -> Result<FxHashMap<String, Vec<EventRecord>>> {
        let mut events = FxHashMap::default();
        for participant in participants {
            let rows = self.store.events_for_participant(participant.participant_id())?;
            events.insert(participant.participant_id().to_string(), rows);
        }
        debug!(participants = participants.len(), "events loaded for report");
        Ok(events)
    }

    fn passes(&self, result: &ConversionSignificance) -> bool {
        1.0 - result.p_value >= self.config.confidence_bar
            && result.lift.abs() >= self.config.min_lift
    }

    fn pick_winner(
        &self,
        summaries: &[VariantSummary],
        control: usize,
        significance: &BTreeMap<String, Option<ConversionSignificance>>,
    ) -> Option<String> {
        let mut any_treatment = false;
        let mut all_losing = true;
        let mut best: Option<(&str, f64)> = None;

        // Declaration order keeps ties deterministic: the earlier variant wins.
        for (i, summary) in summaries.iter().enumerate() {
            if i == control {
                continue;
            }
            any_treatment = true;
            let passing = significance
                .get(&summary.variant_id)
                .and_then(Option::as_ref)
                .filter(|r| self.passes(r));
            match passing {
                Some(result) if result.lift > 0.0 => {
                    all_losing = false;
                    if best.map_or(true, |(_, rate)| result.treatment_rate > rate) {
                        best = Some((summary.variant_id.as_str(), result.treatment_rate));
                    }
                }
                Some(_) => {}
                None => all_losing = false,
            }
        }

        if let Some((id, _)) = best {
            return Some(id.to_string());
        }
        (any_treatment && all_losing).then(|| summaries[control].variant_id.clone())
    }

    fn metric_results(
        &self,
        custom: &[&MetricRecord],
        variants: &[VariantRecord],
        control: usize,
        participants: &[ParticipantRecord],
        events: &FxHashMap<String, Vec<EventRecord>>,
    ) -> Result<Vec<MetricResult>> {
        let mut results = Vec::new();
        for metric in custom {
            let mut values: FxHashMap<&str, Vec<f64>> = FxHashMap::default();
            for participant in participants {
                let total: f64 = events
                    .get(participant.participant_id())
                    .map(|evs| evs.iter().filter_map(|e| e.numeric_property(metric.name())).sum())
                    .unwrap_or(0.0);
                values.entry(participant.variant_id()).or_default().push(total);
            }

            let control_id = variants[control].variant_id();
            let control_values = values.get(control_id).map_or(&[][..], Vec::as_slice);
            for (i, variant) in variants.iter().enumerate() {
                if i == control || metric.variant_id().is_some_and(|v| v != variant.variant_id()) {
                    continue;
                }
                let treatment_values = values
                    .get(variant.variant_id())
                    .map_or(&[][..], Vec::as_slice);
                let significance = match self.analyzer.continuous_significance(
                    control_values,
                    treatment_values,
                    self.config.alpha,
                ) {
                    Ok(result) => Some(result),
                    Err(Error::InsufficientData(_)) => None,
                    Err(Error::InvalidInput(reason)) => {
                        warn!(
                            metric = metric.name(),
                            variant_id = variant.variant_id(),
                            %reason,
                            "metric values out of range, comparison skipped"
                        );
                        None
                    }
                    Err(other) => return Err(other),
                };
                results.push(MetricResult {
                    metric: metric.name().to_string(),
                    variant_id: variant.variant_id().to_string(),
                    control_mean: mean(control_values),
                    treatment_mean: mean(treatment_values),
                    significance,
                });
            }
        }
        Ok(results)
    }

    fn recommendations(&self, report: &Report) -> Vec<String> {
        let mut out = Vec::new();
        let computed: Vec<&ConversionSignificance> =
            report.significance.values().flatten().collect();

        if report.variants.len() < 2 {
            out.push(
                "Add at least one treatment variant to compare against the control.".to_string(),
            );
        } else if computed.iter().any(|r| self.passes(r)) {
            out.push("The experiment shows statistically significant results.".to_string());
        } else {
            out.push(
                "Not enough data to make a decision yet. Keep the experiment running.".to_string(),
            );
        }

        if let Some(winner) = &report.winner_variant {
            if report.status == ExperimentStatus::Active {
                out.push(format!(
                    "Consider stopping the experiment and rolling out variant '{winner}'."
                ));
            }
        }

        for variant in report.variants.iter().filter(|v| v.participants == 0) {
            out.push(format!(
                "Variant '{}' has no participants yet; check its weight and the traffic allocation.",
                variant.variant_id
            ));
        }

        if let (Some(needed), Some(control)) = (
            report.recommended_sample_size,
            report.control_variant_id.as_deref().and_then(|id| report.variant(id)),
        ) {
            if report.variants.iter().any(|v| v.participants < needed) {
                out.push(format!(
                    "About {needed} participants per variant are needed to detect a {:.1}% lift \
                     over the current {:.2}% baseline.",
                    self.config.min_lift * 100.0,
                    control.conversion_rate * 100.0
                ));
            }
        }
        out
    }
}
