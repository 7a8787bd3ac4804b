// flagforge-edge/src/sync/protocol.rs
// ============================================================================
// Module: Edge Sync Wire Protocol
// Description: The message shapes exchanged with the Hub's Sync Server (C10).
// Purpose: Give the Sync Client (C9) a typed mirror of the Hub's wire
//          format without a crate dependency on flagforge-hub.
// Dependencies: serde, flagforge-core
// ============================================================================

//! ## Overview
//! Deliberately duplicated rather than imported: the Edge is a standalone
//! data-plane binary and never links against the Hub's control-plane
//! crate. The shapes below are kept byte-for-byte wire-compatible with
//! `flagforge_hub::sync::SyncMessage` / `DeltaPayload` — the same `#[serde]`
//! tag names and variant names — since both sides serialize through the
//! same JSON wire format.

// ============================================================================
// SECTION: Imports
// ============================================================================

use flagforge_core::model::ApiKeyScope;
use flagforge_core::model::ChangeOp;
use flagforge_core::model::EntityKind;
use flagforge_core::model::Flag;
use flagforge_core::model::FlagKey;
use flagforge_core::model::PrecomputedFlag;
use flagforge_core::model::Rollout;
use flagforge_core::model::Segment;
use flagforge_core::model::Timestamp;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Wire protocol version this Edge understands.
pub const PROTOCOL_VERSION: u8 = 1;

// ============================================================================
// SECTION: Wire Messages
// ============================================================================

/// A message exchanged over the sync WebSocket or SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    /// The full bootstrap payload for this Edge's `(project, env)`.
    Snapshot {
        /// Wire protocol version, for forward compatibility.
        protocol_version: u8,
        /// Highest per-(project, env) change-broker version known at send
        /// time.
        version: u64,
        /// Every flag in scope.
        flags: Vec<Flag>,
        /// Every segment in scope.
        segments: Vec<Segment>,
        /// Every active rollout in scope, paired with the flag key it is
        /// attached to.
        rollouts: Vec<(FlagKey, Rollout)>,
        /// Every API key scope visible to this session.
        api_keys: Vec<ApiKeyScope>,
    },
    /// A single incremental change, applied strictly in broker order.
    Delta {
        /// Wire protocol version, for forward compatibility.
        protocol_version: u8,
        /// This change's per-(project, env) version.
        version: u64,
        /// Which kind of entity changed.
        entity: EntityKind,
        /// What happened to it.
        op: ChangeOp,
        /// The entity id affected.
        entity_id: String,
        /// The entity's current state, or `None` if it could not be
        /// resolved on the Hub side.
        payload: Option<DeltaPayload>,
    },
    /// Forces this Edge to discard pending deltas and re-bootstrap.
    Resync {
        /// Why the resync was forced.
        reason: String,
    },
    /// Heartbeat frame.
    Ping {
        /// Timestamp the frame was sent at.
        ts: Timestamp,
    },
    /// Heartbeat acknowledgment.
    Pong {
        /// Timestamp the frame was sent at.
        ts: Timestamp,
    },
}

/// The current state of the entity named by a [`SyncMessage::Delta`]'s
/// `entity_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeltaPayload {
    /// A flag changed (directly, or via its attached rollout).
    Flag(PrecomputedFlag),
    /// A segment definition changed.
    Segment(Segment),
}
