// flagforge-core/src/interfaces/mod.rs
// ============================================================================
// Module: Flagforge Store Interfaces
// Description: Backend-agnostic contracts for the Flag Store and Key Store.
// Purpose: Let the Hub depend on a trait, not on `flagforge-store-sqlite`.
// Dependencies: crate::model
// ============================================================================

//! ## Overview
//! `FlagStore` and `ApiKeyStore` are the only surfaces the Hub's tiered
//! evaluation path and RPC layer depend on; `flagforge-store-sqlite`
//! provides the only implementation today. Methods are synchronous —
//! callers on an async runtime are expected to run them via
//! `tokio::task::spawn_blocking`, matching how the underlying SQLite
//! connection is used.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::model::ApiKey;
use crate::model::ChangeEvent;
use crate::model::EnvironmentKey;
use crate::model::Flag;
use crate::model::FlagKey;
use crate::model::PlaintextApiKey;
use crate::model::ProjectId;
use crate::model::Rollout;
use crate::model::RolloutId;
use crate::model::RolloutState;
use crate::model::Segment;
use crate::model::SegmentId;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by a [`FlagStore`] or [`ApiKeyStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested entity does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// The write violated an invariant (bad key charset, unresolved
    /// variation reference, cyclic segment reference, weights that do
    /// not sum to 10000 basis points, ...).
    #[error("invalid write: {0}")]
    InvalidWrite(String),
    /// A concurrent writer raced this one; the caller should reload and
    /// retry, not blindly overwrite.
    #[error("conflicting concurrent update for {0}")]
    Conflict(String),
    /// The underlying backend failed (I/O, serialization, pool
    /// exhaustion, ...).
    #[error("store backend error: {0}")]
    Backend(String),
}

// ============================================================================
// SECTION: Flag Store
// ============================================================================

/// An optional filter over [`FlagStore::list_flags`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagFilter {
    /// Only flags whose key contains this substring.
    pub key_contains: Option<String>,
    /// Only flags whose `enabled` matches.
    pub enabled: Option<bool>,
}

/// The durable repository of flags, variations, segments, and rollouts,
/// scoped by `(project, environment)`.
pub trait FlagStore: Send + Sync {
    /// Fetches a single flag by key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such flag exists, or
    /// [`StoreError::Backend`] on an underlying I/O failure.
    fn get_flag(
        &self,
        project_id: &ProjectId,
        environment_key: &EnvironmentKey,
        key: &FlagKey,
    ) -> Result<Flag, StoreError>;

    /// Lists flags in an environment, optionally filtered.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on an underlying I/O failure.
    fn list_flags(
        &self,
        project_id: &ProjectId,
        environment_key: &EnvironmentKey,
        filter: &FlagFilter,
    ) -> Result<Vec<Flag>, StoreError>;

    /// Creates or replaces a flag. Enforces the key-charset, value-type,
    /// and variation-reference invariants before committing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidWrite`] if an invariant is violated,
    /// or [`StoreError::Backend`] on an underlying I/O failure.
    fn upsert_flag(&self, flag: &Flag) -> Result<(), StoreError>;

    /// Deletes a flag and its rollout, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such flag exists, or
    /// [`StoreError::Backend`] on an underlying I/O failure.
    fn delete_flag(
        &self,
        project_id: &ProjectId,
        environment_key: &EnvironmentKey,
        key: &FlagKey,
    ) -> Result<(), StoreError>;

    /// Flips a flag's `enabled` bit without touching any other field.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such flag exists, or
    /// [`StoreError::Backend`] on an underlying I/O failure.
    fn toggle_flag(
        &self,
        project_id: &ProjectId,
        environment_key: &EnvironmentKey,
        key: &FlagKey,
        enabled: bool,
    ) -> Result<(), StoreError>;

    /// Fetches the rollout attached to a flag in an environment, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on an underlying I/O failure.
    fn get_rollout(
        &self,
        project_id: &ProjectId,
        environment_key: &EnvironmentKey,
        flag_key: &FlagKey,
    ) -> Result<Option<Rollout>, StoreError>;

    /// Creates or replaces a rollout. Enforces the weight-normalization
    /// invariant before committing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidWrite`] if weights do not sum to 100,
    /// or [`StoreError::Backend`] on an underlying I/O failure.
    fn upsert_rollout(
        &self,
        project_id: &ProjectId,
        environment_key: &EnvironmentKey,
        flag_key: &FlagKey,
        rollout: &Rollout,
    ) -> Result<(), StoreError>;

    /// Transitions a rollout's lifecycle state. Only
    /// `draft -> active -> paused -> completed` (and `active -> paused`
    /// back and forth) are legal; illegal transitions are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidWrite`] on an illegal transition, or
    /// [`StoreError::NotFound`] if no such rollout exists.
    fn transition_rollout(
        &self,
        project_id: &ProjectId,
        environment_key: &EnvironmentKey,
        rollout_id: &RolloutId,
        state: RolloutState,
    ) -> Result<(), StoreError>;

    /// Fetches a segment by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such segment exists.
    fn get_segment(&self, project_id: &ProjectId, id: &SegmentId) -> Result<Segment, StoreError>;

    /// Lists every segment in a project.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on an underlying I/O failure.
    fn list_segments(&self, project_id: &ProjectId) -> Result<Vec<Segment>, StoreError>;

    /// Creates or replaces a segment. Rejects writes that would
    /// introduce a cycle through `InSegment` references.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidWrite`] if the write would introduce
    /// a cycle or reference an unknown segment.
    fn upsert_segment(&self, project_id: &ProjectId, segment: &Segment) -> Result<(), StoreError>;

    /// Returns the highest change version assigned so far for
    /// `(project, environment)`, or `0` if no mutation has ever been
    /// recorded for it. This is the durable counter the Change Broker's
    /// own versions are drawn from, so a bootstrap snapshot can report the
    /// true current version rather than assuming `0`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on an underlying I/O failure.
    fn current_change_version(&self, project_id: &ProjectId, environment_key: &EnvironmentKey) -> Result<u64, StoreError>;
}

// ============================================================================
// SECTION: API Key Store
// ============================================================================

/// The durable repository of hashed API keys.
pub trait ApiKeyStore: Send + Sync {
    /// Looks up a key by the salted hash of its plaintext. Returns the
    /// scope/permission tuple; never the plaintext, which is not stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on an underlying I/O failure.
    fn get_api_key(&self, hash: &str) -> Result<Option<ApiKey>, StoreError>;

    /// Creates a new API key scoped to `(project, environment)` with the
    /// given permissions. Returns the plaintext exactly once; it cannot
    /// be recovered afterward.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on an underlying I/O failure.
    fn create_api_key(
        &self,
        project_id: &ProjectId,
        environment_key: &EnvironmentKey,
        permissions: &[crate::model::Permission],
        expires_at: Option<crate::model::Timestamp>,
    ) -> Result<PlaintextApiKey, StoreError>;
}

// ============================================================================
// SECTION: Change Sink
// ============================================================================

/// The sink every store mutation publishes a [`ChangeEvent`] to, feeding
/// the Change Broker (C7). Kept as a trait so `flagforge-store-sqlite`
/// does not need to depend on `flagforge-broker` directly.
pub trait ChangeSink: Send + Sync {
    /// Publishes a change event. Implementations must not block the
    /// caller on a slow subscriber — the broker's own flow control
    /// handles that.
    fn publish(&self, event: ChangeEvent);
}
