//! Probability distributions used by the analyzer
//!
//! Special functions come from `libm` (`erfc`, `lgamma`); the rest is built
//! on them:
//! - Standard normal CDF and its inverse (Acklam's rational approximation,
//!   refined with one Halley step to ~1e-15 relative error)
//! - Chi-square survival for one degree of freedom
//! - Student-t two-sided p-value via the regularized incomplete beta function
//!   (Lentz continued fraction, Numerical Recipes §6.4)

use std::f64::consts::{PI, SQRT_2};

/// Standard normal cumulative distribution function.
#[must_use]
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * libm::erfc(-x / SQRT_2)
}

const ACKLAM_A: [f64; 6] = [
    -3.969_683_028_665_376e1,
    2.209_460_984_245_205e2,
    -2.759_285_104_469_687e2,
    1.383_577_518_672_69e2,
    -3.066_479_806_614_716e1,
    2.506_628_277_459_239,
];
const ACKLAM_B: [f64; 5] = [
    -5.447_609_879_822_406e1,
    1.615_858_368_580_409e2,
    -1.556_989_798_598_866e2,
    6.680_131_188_771_972e1,
    -1.328_068_155_288_572e1,
];
const ACKLAM_C: [f64; 6] = [
    -7.784_894_002_430_293e-3,
    -3.223_964_580_411_365e-1,
    -2.400_758_277_161_838,
    -2.549_732_539_343_734,
    4.374_664_141_464_968,
    2.938_163_982_698_783,
];
const ACKLAM_D: [f64; 4] = [
    7.784_695_709_041_462e-3,
    3.224_671_290_700_398e-1,
    2.445_134_137_142_996,
    3.754_408_661_907_416,
];
const ACKLAM_P_LOW: f64 = 0.024_25;

fn acklam_tail(q: f64) -> f64 {
    let [c0, c1, c2, c3, c4, c5] = ACKLAM_C;
    let [d0, d1, d2, d3] = ACKLAM_D;
    (((((c0 * q + c1) * q + c2) * q + c3) * q + c4) * q + c5)
        / ((((d0 * q + d1) * q + d2) * q + d3) * q + 1.0)
}

/// Inverse of the standard normal CDF (quantile function).
///
/// Returns `-inf` for `p <= 0`, `+inf` for `p >= 1` and `NaN` for `NaN`.
#[must_use]
pub fn normal_ppf(p: f64) -> f64 {
    if p.is_nan() {
        return f64::NAN;
    }
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let x = if p < ACKLAM_P_LOW {
        acklam_tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - ACKLAM_P_LOW {
        let [a0, a1, a2, a3, a4, a5] = ACKLAM_A;
        let [b0, b1, b2, b3, b4] = ACKLAM_B;
        let q = p - 0.5;
        let r = q * q;
        (((((a0 * r + a1) * r + a2) * r + a3) * r + a4) * r + a5) * q
            / (((((b0 * r + b1) * r + b2) * r + b3) * r + b4) * r + 1.0)
    } else {
        -acklam_tail((-2.0 * (1.0 - p).ln()).sqrt())
    };

    // Halley refinement
    let e = normal_cdf(x) - p;
    let u = e * (2.0 * PI).sqrt() * (x * x / 2.0).exp();
    x - u / (1.0 + x * u / 2.0)
}

/// Survival function `P(X > x)` of the chi-square distribution with 1 df.
#[must_use]
pub fn chi_square_sf_df1(x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    libm::erfc((x / 2.0).sqrt())
}

/// Two-sided p-value of Student's t statistic with `df` degrees of freedom.
#[must_use]
pub fn student_t_two_sided_p(t: f64, df: f64) -> f64 {
    if t.is_infinite() {
        return 0.0;
    }
    regularized_incomplete_beta(df / 2.0, 0.5, df / (df + t * t))
}

const BETA_MAX_ITERATIONS: u32 = 300;
const BETA_EPSILON: f64 = 3.0e-16;
const BETA_FLOOR: f64 = 1.0e-300;

/// Regularized incomplete beta function `I_x(a, b)`.
#[must_use]
pub fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = libm::lgamma(a + b) - libm::lgamma(a) - libm::lgamma(b)
        + a * x.ln()
        + b * (1.0 - x).ln();
    let front = ln_front.exp();

    // The continued fraction converges fast only below the mean; use symmetry above it.
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

fn clamp_away_from_zero(v: f64) -> f64 {
    if v.abs() < BETA_FLOOR {
        BETA_FLOOR
    } else {
        v
    }
}

fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 / clamp_away_from_zero(1.0 - qab * x / qap);
    let mut h = d;

    for m in 1..=BETA_MAX_ITERATIONS {
        let m = f64::from(m);
        let m2 = 2.0 * m;

        // Even step
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / clamp_away_from_zero(1.0 + aa * d);
        c = clamp_away_from_zero(1.0 + aa / c);
        h *= d * c;

        // Odd step
        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / clamp_away_from_zero(1.0 + aa * d);
        c = clamp_away_from_zero(1.0 + aa / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < BETA_EPSILON {
            break;
        }
    }
    h
}
