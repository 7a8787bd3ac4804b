// flagforge-core/src/model/rollout.rs
// ============================================================================
// Module: Flagforge Rollouts
// Description: Percentage, experiment, and segment rollout configurations.
// Purpose: Define the policy the Bucketer consults for exposed traffic.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A `Rollout` is attached to a flag in a specific environment. Only
//! `RolloutState::Active` rollouts affect evaluation; transitions between
//! lifecycle states (`draft -> active -> paused -> completed`) are explicit
//! store operations, never implicit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::model::ids::RolloutId;
use crate::model::ids::SegmentId;
use crate::model::ids::VariationId;

// ============================================================================
// SECTION: Rollout Lifecycle
// ============================================================================

/// Rollout lifecycle state. Only `Active` rollouts affect evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutState {
    /// Configured but not yet live.
    Draft,
    /// Live; affects evaluation.
    Active,
    /// Temporarily suspended; behaves as if absent.
    Paused,
    /// Permanently finished; behaves as if absent.
    Completed,
}

// ============================================================================
// SECTION: Bucketing Key Selection
// ============================================================================

/// The context attribute used as the bucketing key. Defaults to
/// `"user_key"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketBy(String);

impl Default for BucketBy {
    fn default() -> Self {
        Self("user_key".to_string())
    }
}

impl BucketBy {
    /// Returns the attribute name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// SECTION: Rollout Variants
// ============================================================================

/// A simple percentage exposure rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentageVariant {
    /// Percent of traffic exposed, in `[0, 100]`.
    pub percent: f64,
    /// Variation returned to exposed traffic.
    pub variation: VariationId,
}

/// A weighted multi-variation experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentVariant {
    /// Variation weights; must sum to 100 before normalization to basis
    /// points.
    pub weights: Vec<ExperimentWeight>,
}

/// A single variation's weight within an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentWeight {
    /// Variation identifier.
    pub variation: VariationId,
    /// Weight, in whole percent (weights across the experiment sum to
    /// 100).
    pub weight: f64,
}

/// A segment-routed rollout: the first matching segment's variation wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentVariant {
    /// Ordered `(segment, variation)` routes.
    pub routes: Vec<SegmentRoute>,
}

/// A single segment-to-variation route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRoute {
    /// Segment to test membership against.
    pub segment_id: SegmentId,
    /// Variation returned on membership.
    pub variation: VariationId,
}

/// The rollout policy kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "snake_case")]
pub enum RolloutKind {
    /// Percentage exposure.
    Percentage(PercentageVariant),
    /// Weighted experiment.
    Experiment(ExperimentVariant),
    /// Segment-routed delivery.
    Segment(SegmentVariant),
}

// ============================================================================
// SECTION: Rollout
// ============================================================================

/// A rollout policy attached to a flag in a specific environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollout {
    /// Rollout identifier.
    pub id: RolloutId,
    /// Lifecycle state; only `Active` affects evaluation.
    pub state: RolloutState,
    /// The rollout's kind-specific configuration.
    pub kind: RolloutKind,
    /// Whether the same `(bucketingKey, rolloutId)` pair always maps to
    /// the same variation. Conformance tests assume `true`; see the
    /// specification's open question (c).
    #[serde(default = "default_sticky")]
    pub sticky_bucketing: bool,
    /// Context attribute used as the bucketing key.
    #[serde(default)]
    pub bucket_by: BucketBy,
    /// Percent of traffic that participates in the rollout at all;
    /// non-participants fall through. `100` means everyone participates.
    #[serde(default = "default_traffic_allocation")]
    pub traffic_allocation: f64,
}

const fn default_sticky() -> bool {
    true
}

const fn default_traffic_allocation() -> f64 {
    100.0
}

impl Rollout {
    /// Returns `true` if this rollout currently affects evaluation.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, RolloutState::Active)
    }
}
