// flagforge-core/src/eval/bucketer.rs
// ============================================================================
// Module: Flagforge Bucketer
// Description: Deterministic hash -> [0, 10000) bucket assignment.
// Purpose: Back percentage and experiment rollouts with stable exposure.
// Dependencies: crate::model
// ============================================================================

//! ## Overview
//! `bucket(bucketingKey, salt)` must be stable across processes, restarts,
//! and Rust versions — `std`'s `DefaultHasher`/`SipHash` gives none of those
//! guarantees, so the Bucketer hand-rolls FNV-1a 64-bit with a fixed seed
//! rather than depend on `std::hash`. `salt` is the flag key for percentage
//! rollouts and the rollout id for experiments, so two flags with the same
//! target percentage never correlate the same users (specification §4.2).

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::model::ExperimentVariant;
use crate::model::PercentageVariant;
use crate::model::VariationId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// FNV-1a 64-bit offset basis. Fixed so the hash is stable across
/// processes and versions, per the specification's open question (b).
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
/// The number of discrete buckets a bucketing key is assigned to.
pub const BUCKET_SPACE: u32 = 10_000;

// ============================================================================
// SECTION: Hashing
// ============================================================================

/// FNV-1a 64-bit hash over raw bytes.
fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Assigns `bucketing_key` to a bucket in `[0, 10000)` under `salt`.
///
/// `bucket = hash64(salt ":" bucketingKey) mod 10000`. Pure and
/// deterministic: the same `(bucketing_key, salt)` pair always produces
/// the same bucket, in this process or any other, which is what gives
/// sticky bucketing its guarantee for free.
#[must_use]
pub fn bucket(bucketing_key: &str, salt: &str) -> u32 {
    let mut input = String::with_capacity(salt.len() + 1 + bucketing_key.len());
    input.push_str(salt);
    input.push(':');
    input.push_str(bucketing_key);
    let hash = fnv1a_64(input.as_bytes());
    u32::try_from(hash % u64::from(BUCKET_SPACE)).unwrap_or(0)
}

// ============================================================================
// SECTION: Traffic Allocation
// ============================================================================

/// Returns `true` if `bucketing_key` participates in a rollout gated by
/// `traffic_allocation` (a percent in `[0, 100]`). Gated with its own
/// bucket, salted `"alloc:" + flag_key`, independent of the rollout's own
/// bucketing — per specification §4.2.
#[must_use]
pub fn participates(flag_key: &str, bucketing_key: &str, traffic_allocation: f64) -> bool {
    if traffic_allocation >= 100.0 {
        return true;
    }
    if traffic_allocation <= 0.0 {
        return false;
    }
    let salt = format!("alloc:{flag_key}");
    let threshold = (traffic_allocation * 100.0) as u32;
    bucket(bucketing_key, &salt) < threshold
}

// ============================================================================
// SECTION: Rollout Application
// ============================================================================

/// Applies a percentage rollout: exposed traffic gets `variant.variation`,
/// everyone else falls through. Exposure is gated by `bucket(flagKey) <
/// percent*100`.
#[must_use]
pub fn evaluate_percentage(
    variant: &PercentageVariant,
    flag_key: &str,
    bucketing_key: &str,
) -> Option<VariationId> {
    let threshold = (variant.percent * 100.0) as u32;
    if bucket(bucketing_key, flag_key) < threshold {
        Some(variant.variation.clone())
    } else {
        None
    }
}

/// Applies a weighted experiment: computes cumulative weights (normalized
/// to 10000 basis points) and picks the variation whose range contains the
/// bucket, salted with the rollout id so co-occurring flags don't
/// correlate.
#[must_use]
pub fn evaluate_experiment(
    variant: &ExperimentVariant,
    rollout_id: &str,
    bucketing_key: &str,
) -> Option<VariationId> {
    let total_weight: f64 = variant.weights.iter().map(|w| w.weight).sum();
    if total_weight <= 0.0 {
        return None;
    }
    let assigned = bucket(bucketing_key, rollout_id);
    let mut cumulative_bp: u32 = 0;
    for entry in &variant.weights {
        let share_bp = ((entry.weight / total_weight) * f64::from(BUCKET_SPACE)).round() as u32;
        cumulative_bp = cumulative_bp.saturating_add(share_bp);
        if assigned < cumulative_bp {
            return Some(entry.variation.clone());
        }
    }
    // Rounding can leave a sliver of the bucket space unassigned; fall
    // back to the last variation rather than drop the request.
    variant.weights.last().map(|entry| entry.variation.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_stable_across_calls() {
        let a = bucket("user-42", "new-checkout");
        let b = bucket("user-42", "new-checkout");
        assert_eq!(a, b);
    }

    #[test]
    fn bucket_is_bounded() {
        for i in 0..1000 {
            let key = format!("user-{i}");
            assert!(bucket(&key, "salt") < BUCKET_SPACE);
        }
    }

    #[test]
    fn different_salts_decorrelate_same_key() {
        // Not a mathematical proof, just a sanity check that two
        // differently salted flags targeting the same percent don't
        // always expose the same users.
        let mismatches = (0..500)
            .filter(|i| {
                let key = format!("user-{i}");
                let a = bucket(&key, "flag-a") < 2500;
                let b = bucket(&key, "flag-b") < 2500;
                a != b
            })
            .count();
        assert!(mismatches > 0, "independent salts should not perfectly correlate");
    }

    #[test]
    fn traffic_allocation_full_always_participates() {
        assert!(participates("flag", "user-1", 100.0));
    }

    #[test]
    fn traffic_allocation_zero_never_participates() {
        assert!(!participates("flag", "user-1", 0.0));
    }
}
