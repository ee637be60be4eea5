//! Statistical analysis for A/B tests
//!
//! Pure computation over in-memory aggregates; no I/O.
//!
//! - Conversion metrics: chi-square test of independence on the 2×2
//!   contingency table (Yates-corrected), lift and a Wald confidence
//!   interval on the rate difference
//! - Continuous metrics: independent two-sample t-test (Student or Welch)
//!   and Cohen's d
//! - Planning: per-group sample size for a two-proportion test, and the
//!   achieved power of a finished test
//!
//! Empty groups raise `InsufficientData`; nothing here returns `NaN`.
//! The single documented exception is the lift guard: with no baseline
//! conversions the lift is reported as 0.

pub mod distributions;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};
use distributions::{chi_square_sf_df1, normal_cdf, normal_ppf, student_t_two_sided_p};

/// Default significance level.
pub const DEFAULT_ALPHA: f64 = 0.05;
/// Default confidence level for intervals.
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;
/// Default desired power for sample size planning.
pub const DEFAULT_POWER: f64 = 0.8;
/// Cohen's d above which an effect counts as practically significant.
pub const PRACTICAL_EFFECT_SIZE: f64 = 0.2;

/// Conversion counts of a control and a treatment group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConversionData {
    /// Converted units in the control group.
    pub control_conversions: u64,
    /// All units in the control group.
    pub control_total: u64,
    /// Converted units in the treatment group.
    pub treatment_conversions: u64,
    /// All units in the treatment group.
    pub treatment_total: u64,
    /// Confidence level for the lift interval.
    pub confidence_level: f64,
    /// Significance level for the test.
    pub alpha: f64,
}

impl ConversionData {
    /// Counts with the default confidence level (0.95) and alpha (0.05).
    #[must_use]
    pub const fn new(
        control_conversions: u64,
        control_total: u64,
        treatment_conversions: u64,
        treatment_total: u64,
    ) -> Self {
        Self {
            control_conversions,
            control_total,
            treatment_conversions,
            treatment_total,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            alpha: DEFAULT_ALPHA,
        }
    }

    /// Set the significance level.
    #[must_use]
    pub const fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the confidence level of the lift interval.
    #[must_use]
    pub const fn with_confidence_level(mut self, confidence_level: f64) -> Self {
        self.confidence_level = confidence_level;
        self
    }

    /// Control and treatment conversion rates.
    ///
    /// # Errors
    ///
    /// - `InsufficientData` if either group is empty
    /// - `InvalidInput` if conversions exceed the group total
    #[allow(clippy::cast_precision_loss)]
    pub fn rates(&self) -> Result<(f64, f64)> {
        if self.control_total == 0 || self.treatment_total == 0 {
            return Err(Error::InsufficientData(format!(
                "conversion test needs participants in both groups (control={}, treatment={})",
                self.control_total, self.treatment_total
            )));
        }
        if self.control_conversions > self.control_total
            || self.treatment_conversions > self.treatment_total
        {
            return Err(Error::InvalidInput(format!(
                "conversions exceed totals (control {}/{}, treatment {}/{})",
                self.control_conversions,
                self.control_total,
                self.treatment_conversions,
                self.treatment_total
            )));
        }
        Ok((
            self.control_conversions as f64 / self.control_total as f64,
            self.treatment_conversions as f64 / self.treatment_total as f64,
        ))
    }

    /// Relative lift of treatment over control; 0 when the control rate is 0.
    ///
    /// # Errors
    ///
    /// Same as [`ConversionData::rates`].
    pub fn lift(&self) -> Result<f64> {
        let (control_rate, treatment_rate) = self.rates()?;
        Ok(relative_lift(control_rate, treatment_rate))
    }
}

fn relative_lift(control_rate: f64, treatment_rate: f64) -> f64 {
    if control_rate > 0.0 {
        (treatment_rate - control_rate) / control_rate
    } else {
        0.0
    }
}

/// Two-sided confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    /// Lower bound.
    pub lower: f64,
    /// Upper bound.
    pub upper: f64,
}

impl ConfidenceInterval {
    /// Whether the interval contains `value`.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Result of a conversion significance test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionSignificance {
    /// Yates-corrected chi-square statistic.
    pub chi2_statistic: f64,
    /// p-value of the test (1 degree of freedom).
    pub p_value: f64,
    /// `p_value < alpha`.
    pub significant: bool,
    /// Control conversion rate.
    pub control_rate: f64,
    /// Treatment conversion rate.
    pub treatment_rate: f64,
    /// Relative lift `(treatment - control) / control`.
    pub lift: f64,
    /// Confidence interval of the absolute rate difference.
    pub lift_confidence_interval: ConfidenceInterval,
    /// Expected cell counts under independence: `[[conv, non-conv]; control, treatment]`.
    pub expected_conversions: [[f64; 2]; 2],
}

/// Flavor of the two-sample t-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TTestKind {
    /// Pooled variance, `n1 + n2 - 2` degrees of freedom.
    #[default]
    Student,
    /// Unequal variances, Welch–Satterthwaite degrees of freedom.
    Welch,
}

/// Result of a continuous-metric significance test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousSignificance {
    /// t statistic of treatment minus control. Infinite when both groups
    /// have zero variance and different means.
    #[serde(with = "extended_float")]
    pub t_statistic: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Degrees of freedom used.
    pub degrees_of_freedom: f64,
    /// `p_value < alpha`.
    pub significant: bool,
    /// `(1 - alpha) * 100`.
    pub confidence_level: f64,
    /// Cohen's d.
    pub effect_size: f64,
    /// `|d| > 0.2`.
    pub practical_significance: bool,
}

#[derive(Debug, Clone, Copy)]
struct SampleSummary {
    n: f64,
    mean: f64,
    variance: f64,
}

#[allow(clippy::cast_precision_loss)]
fn summarize(label: &str, sample: &[f64]) -> Result<SampleSummary> {
    if sample.len() < 2 {
        return Err(Error::InsufficientData(format!(
            "{label} group needs at least 2 observations, got {}",
            sample.len()
        )));
    }
    if sample.iter().any(|x| !x.is_finite()) {
        return Err(Error::InvalidInput(format!(
            "{label} group contains non-finite values"
        )));
    }
    let n = sample.len() as f64;
    let mean = sample.iter().sum::<f64>() / n;
    let variance = sample.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    if !mean.is_finite() || !variance.is_finite() {
        return Err(Error::InvalidInput(format!(
            "{label} group overflows f64 arithmetic"
        )));
    }
    Ok(SampleSummary { n, mean, variance })
}

fn pooled_std(control: &SampleSummary, treatment: &SampleSummary) -> f64 {
    (((control.n - 1.0) * control.variance + (treatment.n - 1.0) * treatment.variance)
        / (control.n + treatment.n - 2.0))
        .sqrt()
}

fn cohens_d(control: &SampleSummary, treatment: &SampleSummary) -> f64 {
    let pooled = pooled_std(control, treatment);
    if pooled == 0.0 {
        return 0.0;
    }
    (treatment.mean - control.mean) / pooled
}

fn check_open_unit(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "{name} must be within (0, 1), got {value}"
        )))
    }
}

/// Statistical analysis for A/B tests.
///
/// # Example
///
/// ```rust
/// use abtest_engine::stats::{ConversionData, StatisticalAnalyzer};
///
/// let analyzer = StatisticalAnalyzer::new();
/// let result = analyzer.conversion_significance(&ConversionData::new(100, 1000, 150, 1000))?;
/// assert!(result.significant);
/// assert!((result.lift - 0.5).abs() < 1e-12);
/// # Ok::<(), abtest_engine::Error>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticalAnalyzer {
    ttest: TTestKind,
}

impl StatisticalAnalyzer {
    /// Analyzer using Student's pooled-variance t-test.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ttest: TTestKind::Student,
        }
    }

    /// Select the t-test flavor for continuous metrics.
    #[must_use]
    pub const fn with_ttest(mut self, ttest: TTestKind) -> Self {
        self.ttest = ttest;
        self
    }

    /// Configured t-test flavor.
    #[must_use]
    pub const fn ttest(&self) -> TTestKind {
        self.ttest
    }

    /// Significance of a difference in conversion rates.
    ///
    /// A table with an empty column (nobody or everybody converted) carries
    /// no evidence either way and reports `chi2 = 0`, `p = 1`.
    ///
    /// # Errors
    ///
    /// - `InsufficientData` if either group is empty
    /// - `InvalidInput` for conversions above totals or alpha/confidence outside (0, 1)
    #[allow(clippy::cast_precision_loss)]
    pub fn conversion_significance(&self, data: &ConversionData) -> Result<ConversionSignificance> {
        check_open_unit("alpha", data.alpha)?;
        check_open_unit("confidence_level", data.confidence_level)?;
        let (control_rate, treatment_rate) = data.rates()?;

        let observed = [
            [
                data.control_conversions as f64,
                (data.control_total - data.control_conversions) as f64,
            ],
            [
                data.treatment_conversions as f64,
                (data.treatment_total - data.treatment_conversions) as f64,
            ],
        ];
        let rows = [data.control_total as f64, data.treatment_total as f64];
        let cols = [
            observed[0][0] + observed[1][0],
            observed[0][1] + observed[1][1],
        ];
        let n = rows[0] + rows[1];

        let mut expected = [[0.0; 2]; 2];
        for (i, row) in rows.iter().enumerate() {
            for (j, col) in cols.iter().enumerate() {
                expected[i][j] = row * col / n;
            }
        }

        let (chi2_statistic, p_value) = if cols.iter().any(|&c| c == 0.0) {
            (0.0, 1.0)
        } else {
            let mut chi2 = 0.0;
            for i in 0..2 {
                for j in 0..2 {
                    // Yates: shrink |O - E| by 0.5, never past zero
                    let deviation = ((observed[i][j] - expected[i][j]).abs() - 0.5).max(0.0);
                    chi2 += deviation * deviation / expected[i][j];
                }
            }
            (chi2, chi_square_sf_df1(chi2))
        };

        let se = (control_rate * (1.0 - control_rate) / rows[0]
            + treatment_rate * (1.0 - treatment_rate) / rows[1])
            .sqrt();
        let z = normal_ppf(1.0 - (1.0 - data.confidence_level) / 2.0);
        let difference = treatment_rate - control_rate;
        let margin = z * se;

        Ok(ConversionSignificance {
            chi2_statistic,
            p_value,
            significant: p_value < data.alpha,
            control_rate,
            treatment_rate,
            lift: relative_lift(control_rate, treatment_rate),
            lift_confidence_interval: ConfidenceInterval {
                lower: difference - margin,
                upper: difference + margin,
            },
            expected_conversions: expected,
        })
    }

    /// Significance of a difference in means of a continuous metric.
    ///
    /// With zero pooled variance the effect size is 0; the t statistic is 0
    /// (p = 1) when the means agree and infinite (p = 0) when they differ.
    ///
    /// # Errors
    ///
    /// - `InsufficientData` if either sample has fewer than 2 observations
    /// - `InvalidInput` for non-finite observations or alpha outside (0, 1)
    pub fn continuous_significance(
        &self,
        control: &[f64],
        treatment: &[f64],
        alpha: f64,
    ) -> Result<ContinuousSignificance> {
        check_open_unit("alpha", alpha)?;
        let c = summarize("control", control)?;
        let t = summarize("treatment", treatment)?;
        let difference = t.mean - c.mean;

        let (se, df) = match self.ttest {
            TTestKind::Student => {
                let pooled = pooled_std(&c, &t);
                (pooled * (1.0 / c.n + 1.0 / t.n).sqrt(), c.n + t.n - 2.0)
            }
            TTestKind::Welch => {
                let vc = c.variance / c.n;
                let vt = t.variance / t.n;
                let se = (vc + vt).sqrt();
                let df = if se == 0.0 {
                    c.n + t.n - 2.0
                } else {
                    (vc + vt).powi(2) / (vc.powi(2) / (c.n - 1.0) + vt.powi(2) / (t.n - 1.0))
                };
                (se, df)
            }
        };

        let (t_statistic, p_value) = if se == 0.0 {
            if difference == 0.0 {
                (0.0, 1.0)
            } else {
                (difference.signum() * f64::INFINITY, 0.0)
            }
        } else {
            let t_stat = difference / se;
            (t_stat, student_t_two_sided_p(t_stat, df))
        };

        let effect_size = cohens_d(&c, &t);
        Ok(ContinuousSignificance {
            t_statistic,
            p_value,
            degrees_of_freedom: df,
            significant: p_value < alpha,
            confidence_level: (1.0 - alpha) * 100.0,
            effect_size,
            practical_significance: effect_size.abs() > PRACTICAL_EFFECT_SIZE,
        })
    }

    /// Cohen's d of treatment versus control (pooled standard deviation).
    ///
    /// # Errors
    ///
    /// `InsufficientData` if either sample has fewer than 2 observations.
    pub fn effect_size(&self, control: &[f64], treatment: &[f64]) -> Result<f64> {
        let c = summarize("control", control)?;
        let t = summarize("treatment", treatment)?;
        Ok(cohens_d(&c, &t))
    }

    /// Required sample size per group to detect a relative lift of
    /// `minimum_detectable_effect` over `baseline_rate` with a two-sided
    /// two-proportion z-test.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `baseline_rate`, `power` or `alpha` is outside (0, 1),
    /// the effect is not positive, or the implied treatment rate reaches 1.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn required_sample_size(
        &self,
        baseline_rate: f64,
        minimum_detectable_effect: f64,
        power: f64,
        alpha: f64,
    ) -> Result<u64> {
        check_open_unit("baseline_rate", baseline_rate)?;
        check_open_unit("power", power)?;
        check_open_unit("alpha", alpha)?;
        if !(minimum_detectable_effect.is_finite() && minimum_detectable_effect > 0.0) {
            return Err(Error::InvalidInput(format!(
                "minimum_detectable_effect must be positive, got {minimum_detectable_effect}"
            )));
        }

        let p1 = baseline_rate;
        let p2 = baseline_rate * (1.0 + minimum_detectable_effect);
        if p2 >= 1.0 {
            return Err(Error::InvalidInput(format!(
                "baseline {p1} lifted by {minimum_detectable_effect} reaches {p2}, beyond a valid rate"
            )));
        }

        let z_alpha = normal_ppf(1.0 - alpha / 2.0);
        let z_beta = normal_ppf(power);
        let p_bar = (p1 + p2) / 2.0;
        let numerator = z_alpha * (2.0 * p_bar * (1.0 - p_bar)).sqrt()
            + z_beta * (p1 * (1.0 - p1) + p2 * (1.0 - p2)).sqrt();
        let n = (numerator / (p2 - p1)).powi(2);
        Ok(n.ceil() as u64)
    }

    /// Achieved power of a two-sample test for the observed effect size.
    ///
    /// # Errors
    ///
    /// - `InsufficientData` if either sample has fewer than 2 observations
    /// - `InvalidInput` if `alpha` is outside (0, 1)
    pub fn power(&self, control: &[f64], treatment: &[f64], alpha: f64) -> Result<f64> {
        check_open_unit("alpha", alpha)?;
        let c = summarize("control", control)?;
        let t = summarize("treatment", treatment)?;
        let d = cohens_d(&c, &t);

        let ncp = d.abs() * (c.n * t.n / (c.n + t.n)).sqrt();
        let z = normal_ppf(1.0 - alpha / 2.0);
        Ok((normal_cdf(ncp - z) + normal_cdf(-ncp - z)).min(1.0))
    }

    /// Whether the absolute lift meets `min_lift`, regardless of significance.
    ///
    /// # Errors
    ///
    /// Same as [`ConversionData::rates`].
    pub fn is_practically_significant(&self, data: &ConversionData, min_lift: f64) -> Result<bool> {
        Ok(data.lift()?.abs() >= min_lift)
    }
}

/// Serde for `f64` fields that may hold an infinity.
///
/// JSON has no infinities and `serde_json` writes them as `null`, which then
/// fails to read back. Non-finite values are written as the strings
/// `"Infinity"`, `"-Infinity"` and `"NaN"` instead; finite values stay numbers.
pub mod extended_float {
    use serde::de::{Error as _, Unexpected};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    /// Serialize `value`, spelling out non-finite values.
    ///
    /// # Errors
    ///
    /// Whatever the serializer returns.
    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("Infinity")
        } else {
            serializer.serialize_str("-Infinity")
        }
    }

    /// Deserialize a number or one of the non-finite spellings.
    ///
    /// # Errors
    ///
    /// Any other string or value type.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.as_str() {
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                "NaN" => Ok(f64::NAN),
                other => Err(D::Error::invalid_value(
                    Unexpected::Str(other),
                    &"a number, \"Infinity\", \"-Infinity\" or \"NaN\"",
                )),
            },
        }
    }
}
