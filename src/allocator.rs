//! Deterministic traffic allocation
//!
//! **Problem**: A runtime string hash (seeded per process) reassigns users
//! to different variants after every restart, and random selection breaks
//! assignment idempotence.
//!
//! **Solution**: FNV-1a over the UTF-8 bytes of `"{experiment_id}:{unit_id}"`,
//! followed by a SplitMix64 finalizer. The result is identical across
//! processes, platforms and releases.
//!
//! Three independent hash streams are derived from the same key by seed:
//! - variant assignment (weighted buckets over [0, 1))
//! - traffic admission (percentage bucket)
//! - feature-flag rollout (percentage bucket)
//!
//! The allocator is pure. Persisting the resulting participant is the
//! store's job (atomic insert-if-absent).

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::experiment::VariantRecord;
use crate::{Error, Result};

const ASSIGNMENT_SEED: u64 = 0;
const ADMISSION_SEED: u64 = 0xA11C_A7E5_0000_0001;
const ROLLOUT_SEED: u64 = 0xF1A6_0000_0000_0002;

/// Deterministic (non-crypto) stable 64-bit hash of `s`.
///
/// Implementation:
/// - FNV-1a over bytes (cheap, stable across platforms)
/// - SplitMix64 finalizer (improves bit diffusion / uniformity)
#[must_use]
pub fn stable_hash64(seed: u64, s: &str) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in s.as_bytes() {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    splitmix64(seed ^ h)
}

#[inline]
const fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Map a hash onto [0, 1) using its top 53 bits (exact in `f64`).
#[inline]
#[allow(clippy::cast_precision_loss)]
fn unit_interval(hash: u64) -> f64 {
    (hash >> 11) as f64 / (1u64 << 53) as f64
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn percent_bucket(hash: u64) -> u8 {
    (hash % 100) as u8
}

fn composite_key(namespace: &str, unit_id: &str) -> String {
    format!("{namespace}:{unit_id}")
}

/// Normalize variant weights into cumulative upper bounds over (0, 1].
///
/// # Errors
///
/// - `NoVariantsAvailable` if `variants` is empty
/// - `InvalidWeightConfiguration` if every weight is zero
#[allow(clippy::cast_precision_loss)]
pub fn cumulative_bounds(experiment_id: &str, variants: &[VariantRecord]) -> Result<Vec<f64>> {
    if variants.is_empty() {
        return Err(Error::NoVariantsAvailable(experiment_id.to_string()));
    }
    let total: u64 = variants.iter().map(|v| u64::from(v.weight())).sum();
    if total == 0 {
        return Err(Error::InvalidWeightConfiguration(format!(
            "all {} variant weights of experiment '{experiment_id}' are zero",
            variants.len()
        )));
    }

    let mut running = 0u64;
    Ok(variants
        .iter()
        .map(|v| {
            running += u64::from(v.weight());
            running as f64 / total as f64
        })
        .collect())
}

/// Pure, deterministic variant allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrafficAllocator {
    _private: (),
}

impl TrafficAllocator {
    /// Create a new allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Assign `unit_id` to one of `variants`.
    ///
    /// Same `(experiment_id, unit_id, variants)` always yields the same variant.
    /// A `force_variant` id overrides hashing (manual override/testing).
    ///
    /// # Errors
    ///
    /// - `NoVariantsAvailable` if `variants` is empty
    /// - `InvalidWeightConfiguration` if all weights are zero
    /// - `VariantNotFound` if `force_variant` is not one of `variants`
    ///
    /// # Example
    ///
    /// ```rust
    /// use abtest_engine::allocator::TrafficAllocator;
    /// use abtest_engine::experiment::VariantRecord;
    ///
    /// let variants = vec![
    ///     VariantRecord::control("a", "exp-1", "control", 50),
    ///     VariantRecord::new("b", "exp-1", "treatment", 50),
    /// ];
    /// let allocator = TrafficAllocator::new();
    /// let first = allocator.assign("exp-1", "user-7", &variants, None)?;
    /// let again = allocator.assign("exp-1", "user-7", &variants, None)?;
    /// assert_eq!(first.variant_id(), again.variant_id());
    /// # Ok::<(), abtest_engine::Error>(())
    /// ```
    pub fn assign<'a>(
        &self,
        experiment_id: &str,
        unit_id: &str,
        variants: &'a [VariantRecord],
        force_variant: Option<&str>,
    ) -> Result<&'a VariantRecord> {
        if variants.is_empty() {
            return Err(Error::NoVariantsAvailable(experiment_id.to_string()));
        }
        if let Some(forced) = force_variant {
            return variants
                .iter()
                .find(|v| v.variant_id() == forced)
                .ok_or_else(|| Error::VariantNotFound {
                    experiment_id: experiment_id.to_string(),
                    variant_id: forced.to_string(),
                });
        }

        let bounds = cumulative_bounds(experiment_id, variants)?;
        Ok(&variants[Self::select(&bounds, experiment_id, unit_id)])
    }

    /// Assign many units at once (backfills, simulations).
    ///
    /// Output order matches `unit_ids`. Runs on the rayon pool when the
    /// `rayon` feature is enabled.
    ///
    /// # Errors
    ///
    /// Same as [`TrafficAllocator::assign`] without a forced variant.
    pub fn assign_batch<'a, S>(
        &self,
        experiment_id: &str,
        unit_ids: &[S],
        variants: &'a [VariantRecord],
    ) -> Result<Vec<&'a VariantRecord>>
    where
        S: AsRef<str> + Sync,
    {
        let bounds = cumulative_bounds(experiment_id, variants)?;

        #[cfg(feature = "rayon")]
        let picks = unit_ids
            .par_iter()
            .map(|unit| &variants[Self::select(&bounds, experiment_id, unit.as_ref())])
            .collect();

        #[cfg(not(feature = "rayon"))]
        let picks = unit_ids
            .iter()
            .map(|unit| &variants[Self::select(&bounds, experiment_id, unit.as_ref())])
            .collect();

        Ok(picks)
    }

    /// Whether `unit_id` falls inside the experiment's traffic allocation.
    ///
    /// Uses a hash stream independent of variant assignment, so admission
    /// does not skew the variant split.
    #[must_use]
    pub fn admits(&self, experiment_id: &str, unit_id: &str, traffic_allocation: u8) -> bool {
        let hash = stable_hash64(ADMISSION_SEED, &composite_key(experiment_id, unit_id));
        percent_bucket(hash) < traffic_allocation
    }

    /// Percentage bucket (0-99) of `unit_id` within `namespace`.
    ///
    /// Feature flags compare this against their rollout percentage.
    #[must_use]
    pub fn rollout_bucket(&self, namespace: &str, unit_id: &str) -> u8 {
        percent_bucket(stable_hash64(ROLLOUT_SEED, &composite_key(namespace, unit_id)))
    }

    fn select(bounds: &[f64], experiment_id: &str, unit_id: &str) -> usize {
        let h = unit_interval(stable_hash64(
            ASSIGNMENT_SEED,
            &composite_key(experiment_id, unit_id),
        ));
        bounds
            .iter()
            .position(|&upper| h < upper)
            .unwrap_or(bounds.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variants(weights: &[u32]) -> Vec<VariantRecord> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| VariantRecord::new(format!("v{i}"), "exp-1", format!("arm {i}"), *w))
            .collect()
    }

    #[test]
    fn test_stable_hash_is_fixed() {
        // Pinned values: a change here reassigns every live participant.
        assert_eq!(stable_hash64(0, "exp-1:user-1"), 0x1f68_fa80_7cd9_ad9b);
        assert_eq!(stable_hash64(0, "exp-1:user-2"), 0x4ae0_7cf4_44af_30a9);
        assert_ne!(stable_hash64(0, "exp-1:user-1"), stable_hash64(1, "exp-1:user-1"));
    }

    #[test]
    fn test_fnv_offset_basis_for_empty_input() {
        assert_eq!(stable_hash64(0, ""), splitmix64(0xcbf2_9ce4_8422_2325));
    }

    #[test]
    fn test_unit_interval_range() {
        assert!(unit_interval(0).abs() < f64::EPSILON);
        assert!(unit_interval(u64::MAX) < 1.0);
    }

    #[test]
    fn test_assign_is_deterministic() {
        let allocator = TrafficAllocator::new();
        let vs = variants(&[50, 50]);
        for i in 0..100 {
            let unit = format!("user-{i}");
            let a = allocator.assign("exp-1", &unit, &vs, None).unwrap();
            let b = allocator.assign("exp-1", &unit, &vs, None).unwrap();
            assert_eq!(a.variant_id(), b.variant_id());
        }
    }

    #[test]
    fn test_assign_empty_variants() {
        let allocator = TrafficAllocator::new();
        let result = allocator.assign("exp-1", "user-1", &[], None);
        assert!(matches!(result, Err(Error::NoVariantsAvailable(_))));
    }

    #[test]
    fn test_assign_all_zero_weights() {
        let allocator = TrafficAllocator::new();
        let vs = variants(&[0, 0]);
        let result = allocator.assign("exp-1", "user-1", &vs, None);
        assert!(matches!(result, Err(Error::InvalidWeightConfiguration(_))));
    }

    #[test]
    fn test_assign_forced_variant() {
        let allocator = TrafficAllocator::new();
        let vs = variants(&[100, 0]);
        let forced = allocator.assign("exp-1", "user-1", &vs, Some("v1")).unwrap();
        assert_eq!(forced.variant_id(), "v1");
    }

    #[test]
    fn test_assign_forced_variant_missing() {
        let allocator = TrafficAllocator::new();
        let vs = variants(&[50, 50]);
        let result = allocator.assign("exp-1", "user-1", &vs, Some("nope"));
        assert!(matches!(result, Err(Error::VariantNotFound { .. })));
    }

    #[test]
    fn test_zero_weight_arm_gets_no_traffic() {
        let allocator = TrafficAllocator::new();
        let vs = variants(&[0, 30, 0, 70]);
        for i in 0..2_000 {
            let v = allocator.assign("exp-1", &format!("u{i}"), &vs, None).unwrap();
            assert!(v.variant_id() == "v1" || v.variant_id() == "v3");
        }
    }

    #[test]
    fn test_cumulative_bounds_normalize() {
        let bounds = cumulative_bounds("exp-1", &variants(&[1, 1, 2])).unwrap();
        assert_eq!(bounds.len(), 3);
        assert!((bounds[0] - 0.25).abs() < 1e-12);
        assert!((bounds[1] - 0.5).abs() < 1e-12);
        assert!((bounds[2] - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_assign_batch_matches_single() {
        let allocator = TrafficAllocator::new();
        let vs = variants(&[20, 30, 50]);
        let units: Vec<String> = (0..500).map(|i| format!("user-{i}")).collect();
        let batch = allocator.assign_batch("exp-1", &units, &vs).unwrap();
        for (unit, picked) in units.iter().zip(batch) {
            let single = allocator.assign("exp-1", unit, &vs, None).unwrap();
            assert_eq!(single.variant_id(), picked.variant_id());
        }
    }

    #[test]
    fn test_admits_bounds() {
        let allocator = TrafficAllocator::new();
        for i in 0..200 {
            let unit = format!("user-{i}");
            assert!(allocator.admits("exp-1", &unit, 100));
            assert!(!allocator.admits("exp-1", &unit, 0));
        }
    }

    #[test]
    fn test_rollout_bucket_range() {
        let allocator = TrafficAllocator::new();
        for i in 0..500 {
            assert!(allocator.rollout_bucket("new-ui", &format!("user-{i}")) < 100);
        }
    }
}
