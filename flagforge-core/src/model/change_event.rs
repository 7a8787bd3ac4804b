// flagforge-core/src/model/change_event.rs
// ============================================================================
// Module: Flagforge Change Events
// Description: The event shape published by every store mutation.
// Purpose: Feed the Change Broker (C7) and, downstream, Sync delta frames.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every mutation accepted by the Flag Store or API-Key Store produces one
//! `ChangeEvent` on a process-local channel feeding the Change Broker.
//! Events are totally ordered per `(project, env, entity-id)`; ordering
//! across entities is not guaranteed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::model::ids::EnvironmentKey;
use crate::model::ids::ProjectId;

// ============================================================================
// SECTION: Entity / Op
// ============================================================================

/// The kind of entity a change event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A flag definition.
    Flag,
    /// A segment definition.
    Segment,
    /// A rollout definition.
    Rollout,
    /// An API key record.
    ApiKey,
}

/// The operation a change event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    /// The entity was created.
    Created,
    /// The entity was updated.
    Updated,
    /// The entity was deleted.
    Deleted,
    /// The entity's enabled flag was flipped (flags only).
    Toggled,
}

// ============================================================================
// SECTION: Change Event
// ============================================================================

/// A single, versioned mutation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Entity kind.
    pub entity: EntityKind,
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning environment.
    pub environment_key: EnvironmentKey,
    /// Entity identifier (flag key, segment id, rollout id, or API key
    /// id), carried as a string so the broker does not need a generic
    /// parameter per entity kind.
    pub entity_id: String,
    /// Monotonic version, per `(project, environment)`, sufficient for
    /// subscribers to detect gaps.
    pub version: u64,
    /// The operation that occurred.
    pub op: ChangeOp,
}

impl ChangeEvent {
    /// Returns the `(project, environment)` topic this event belongs to.
    #[must_use]
    pub fn topic(&self) -> (ProjectId, EnvironmentKey) {
        (self.project_id.clone(), self.environment_key.clone())
    }
}
