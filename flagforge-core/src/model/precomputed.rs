// flagforge-core/src/model/precomputed.rs
// ============================================================================
// Module: Flagforge Precomputed Flags
// Description: Flattened, immutable evaluation-ready flag snapshots.
// Purpose: Back the Hub preloaded table (C6) and the Edge cache (C8).
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A `PrecomputedFlag` flattens a `Flag` with its active `Rollout` and any
//! segments its targeting rules or rollout reference. Evaluation expands
//! segment references into an indexed lookup against this snapshot — no
//! runtime graph walking, per the specification's design note on cyclic
//! data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::model::flag::Flag;
use crate::model::ids::EnvironmentKey;
use crate::model::ids::FlagKey;
use crate::model::ids::ProjectId;
use crate::model::ids::SegmentId;
use crate::model::rollout::Rollout;
use crate::model::segment::Segment;

// ============================================================================
// SECTION: Precomputed Flag
// ============================================================================

/// An immutable, flattened snapshot of a flag, its active rollout, and the
/// segments its rules reference, keyed by `(projectId, environmentKey,
/// flagKey)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecomputedFlag {
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning environment.
    pub environment_key: EnvironmentKey,
    /// Flag key.
    pub flag_key: FlagKey,
    /// The flag definition at the time this snapshot was built.
    pub flag: Flag,
    /// The active rollout, if any, resolved at build time.
    pub rollout: Option<Rollout>,
    /// Segments referenced (directly or transitively) by the flag's
    /// targeting rules or rollout, indexed by id for O(1) lookup during
    /// evaluation.
    pub segments: BTreeMap<SegmentId, Segment>,
    /// Monotonic version; bumped on every rebuild caused by a change to
    /// any of this snapshot's inputs.
    pub version: u64,
}

impl PrecomputedFlag {
    /// Returns the key triple this snapshot is indexed by.
    #[must_use]
    pub fn key(&self) -> (ProjectId, EnvironmentKey, FlagKey) {
        (self.project_id.clone(), self.environment_key.clone(), self.flag_key.clone())
    }
}

// ============================================================================
// SECTION: Edge Cache Entry
// ============================================================================

/// The Edge-side cache entry: a `PrecomputedFlag` plus cache bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCacheEntry {
    /// The precomputed flag snapshot.
    pub snapshot: PrecomputedFlag,
    /// Unix-epoch milliseconds at which this entry was last refreshed.
    pub last_refreshed_ms: i64,
    /// Monotonic per-flag version, independent of `snapshot.version`,
    /// tracking the Edge's own applied-delta sequence for this flag.
    pub applied_version: u64,
    /// Time-to-live in milliseconds before the entry is eligible for
    /// sweep eviction.
    pub ttl_ms: u64,
}

impl EdgeCacheEntry {
    /// Returns `true` if this entry's TTL has elapsed as of `now_ms`.
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.last_refreshed_ms) >= i64::try_from(self.ttl_ms).unwrap_or(i64::MAX)
    }
}
