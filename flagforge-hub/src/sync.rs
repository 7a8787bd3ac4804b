// flagforge-hub/src/sync.rs
// ============================================================================
// Module: Hub Sync Server (C10)
// Description: Accepts Edge connections, authenticates, streams bootstrap +
//              incremental updates over WebSocket or SSE.
// Purpose: Feed every Edge's cache (C8) so it converges with the Hub's
//          Flag Store within one heartbeat interval of network quiescence.
// Dependencies: axum (ws, sse), flagforge-broker, flagforge-core
// ============================================================================

//! ## Overview
//! Grounded on `axum`'s own `ws` extractor (already a teacher dependency via
//! `decision-gate-mcp`) for the WebSocket upgrade, and `axum::response::sse`
//! for the unidirectional alternative; the request-building/backoff/typed-
//! error idiom for the Edge side's half of this protocol is grounded on
//! `decision-gate-broker::source::http`. Every session is registered under
//! `(project, env, client_id)` with the operational metrics the
//! specification's language about "Hub registers the session" implies are
//! worth inspecting: `connected_since`, `last_heartbeat`, `missed_heartbeats`,
//! `bytes_sent`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use flagforge_broker::PROTOCOL_VERSION;
use flagforge_core::StoreError;
use flagforge_core::model::ApiKeyScope;
use flagforge_core::model::ChangeEvent;
use flagforge_core::model::ChangeOp;
use flagforge_core::model::EntityKind;
use flagforge_core::model::EnvironmentKey;
use flagforge_core::model::Flag;
use flagforge_core::model::FlagKey;
use flagforge_core::model::PrecomputedFlag;
use flagforge_core::model::ProjectId;
use flagforge_core::model::Rollout;
use flagforge_core::model::Segment;
use flagforge_core::model::SegmentId;
use flagforge_core::model::Timestamp;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default interval between heartbeat frames.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Consecutive missed heartbeats before the Hub tears a session down.
pub const MAX_MISSED_HEARTBEATS: u32 = 3;

// ============================================================================
// SECTION: Wire Messages
// ============================================================================

/// A message exchanged over the sync WebSocket or SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    /// The full bootstrap payload for an Edge's `(project, env)`.
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
        /// attached to (`Rollout` itself carries no flag key, so the pair
        /// is how the Edge learns the association).
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
        /// The entity's current state, so the Edge can apply the change
        /// without a round trip back to the Hub. `None` on
        /// [`ChangeOp::Deleted`] (nothing to carry) and for entity kinds
        /// whose current payload cannot be resolved from `entity_id`
        /// alone, in which case the Edge should treat this as a
        /// [`SyncMessage::Resync`] trigger instead of an incremental
        /// apply.
        payload: Option<DeltaPayload>,
    },
    /// Forces the Edge to discard pending deltas and re-bootstrap, sent on
    /// send-buffer overflow (flow control) or on a detected version gap.
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
/// `entity_id`, resolved at the moment the delta is sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeltaPayload {
    /// A flag changed (directly, or via its attached rollout), carried as
    /// the same flattened shape the Preloaded Table and Edge Cache both
    /// use.
    Flag(PrecomputedFlag),
    /// A segment definition changed.
    Segment(Segment),
}

/// Builds the [`SyncMessage::Delta`] for `event`, resolving a payload
/// where `event.entity_id` identifies a single re-fetchable entity.
///
/// Flag and Rollout events both carry a flag key in `entity_id` (a
/// rollout is attached to exactly one flag, so a rollout change is
/// published as that flag's key) and resolve to [`DeltaPayload::Flag`],
/// rebuilt the same way the RPC surface's cold-path lookup does. Segment
/// events resolve to [`DeltaPayload::Segment`]. API key events carry no
/// payload: [`crate::auth`] only ever consults a key by its hash, which
/// `entity_id` does not contain, so the Edge treats an API key delta as
/// informational and relies on [`SyncMessage::Resync`] to refresh scopes.
/// Deletions never carry a payload, since there is nothing left to fetch.
///
/// # Errors
///
/// Propagates [`StoreError`] from the underlying lookup. A lookup miss
/// (the entity was deleted between the event firing and this fetch) is
/// not an error: the payload is simply omitted.
pub fn build_delta_message(
    flag_store: &dyn flagforge_core::FlagStore,
    event: &ChangeEvent,
) -> Result<SyncMessage, StoreError> {
    let payload = if event.op == ChangeOp::Deleted {
        None
    } else {
        match event.entity {
            EntityKind::Flag | EntityKind::Rollout => {
                let flag_key = FlagKey::new(event.entity_id.clone());
                fetch_flag_payload(flag_store, &event.project_id, &event.environment_key, &flag_key)?
            }
            EntityKind::Segment => {
                let segment_id = SegmentId::new(event.entity_id.clone());
                match flag_store.get_segment(&event.project_id, &segment_id) {
                    Ok(segment) => Some(DeltaPayload::Segment(segment)),
                    Err(StoreError::NotFound(_)) => None,
                    Err(err) => return Err(err),
                }
            }
            EntityKind::ApiKey => None,
        }
    };

    Ok(SyncMessage::Delta {
        protocol_version: PROTOCOL_VERSION,
        version: event.version,
        entity: event.entity,
        op: event.op,
        entity_id: event.entity_id.clone(),
        payload,
    })
}

fn fetch_flag_payload(
    flag_store: &dyn flagforge_core::FlagStore,
    project_id: &ProjectId,
    environment_key: &EnvironmentKey,
    flag_key: &FlagKey,
) -> Result<Option<DeltaPayload>, StoreError> {
    let flag = match flag_store.get_flag(project_id, environment_key, flag_key) {
        Ok(flag) => flag,
        Err(StoreError::NotFound(_)) => return Ok(None),
        Err(err) => return Err(err),
    };
    let rollout = flag_store.get_rollout(project_id, environment_key, flag_key)?;
    let segments = crate::cache::resolve_segments(&flag, rollout.as_ref(), |id| flag_store.get_segment(project_id, id))?;
    Ok(Some(DeltaPayload::Flag(PrecomputedFlag {
        project_id: project_id.clone(),
        environment_key: environment_key.clone(),
        flag_key: flag_key.clone(),
        flag,
        rollout,
        segments,
        version: 0,
    })))
}

// ============================================================================
// SECTION: Session Metrics
// ============================================================================

/// Operational metrics for one live sync session, exposed read-only via the
/// admin RPC.
#[derive(Debug, Serialize)]
pub struct SessionMetrics {
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning environment.
    pub environment_key: EnvironmentKey,
    /// Edge-generated client identifier.
    pub client_id: String,
    /// When the session was accepted.
    pub connected_since: Timestamp,
    /// Last heartbeat frame observed from this session.
    pub last_heartbeat: Timestamp,
    /// Consecutive missed heartbeats so far.
    pub missed_heartbeats: u32,
    /// Total bytes written to this session.
    pub bytes_sent: u64,
}

struct SessionState {
    project_id: ProjectId,
    environment_key: EnvironmentKey,
    client_id: String,
    connected_since: Timestamp,
    last_heartbeat: Mutex<Timestamp>,
    missed_heartbeats: AtomicU64,
    bytes_sent: AtomicU64,
}

/// Opaque identifier for a live session in the [`SessionRegistry`].
pub type SessionId = u64;

/// Registers every live sync session so its metrics can be inspected
/// operationally without touching the connection itself.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<SessionId, SessionState>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly accepted session, returning its id.
    pub fn register(&self, project_id: ProjectId, environment_key: EnvironmentKey, client_id: String) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Timestamp::now();
        let state = SessionState {
            project_id,
            environment_key,
            client_id,
            connected_since: now,
            last_heartbeat: Mutex::new(now),
            missed_heartbeats: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        };
        self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(id, state);
        id
    }

    /// Removes a session, e.g. on close or teardown after too many missed
    /// heartbeats.
    pub fn remove(&self, id: SessionId) {
        self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&id);
    }

    /// Records a heartbeat from `id`, resetting its missed-heartbeat count.
    pub fn record_heartbeat(&self, id: SessionId) {
        let sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(state) = sessions.get(&id) {
            *state.last_heartbeat.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Timestamp::now();
            state.missed_heartbeats.store(0, Ordering::Relaxed);
        }
    }

    /// Increments `id`'s missed-heartbeat count, returning the new count,
    /// or `None` if the session is no longer registered.
    pub fn record_missed_heartbeat(&self, id: SessionId) -> Option<u32> {
        let sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let state = sessions.get(&id)?;
        let missed = state.missed_heartbeats.fetch_add(1, Ordering::Relaxed) + 1;
        Some(u32::try_from(missed).unwrap_or(u32::MAX))
    }

    /// Adds to `id`'s sent-byte counter.
    pub fn record_bytes_sent(&self, id: SessionId, bytes: u64) {
        let sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(state) = sessions.get(&id) {
            state.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// Snapshots every live session's metrics, for the admin RPC.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionMetrics> {
        let sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        sessions
            .values()
            .map(|state| SessionMetrics {
                project_id: state.project_id.clone(),
                environment_key: state.environment_key.clone(),
                client_id: state.client_id.clone(),
                connected_since: state.connected_since,
                last_heartbeat: *state.last_heartbeat.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
                missed_heartbeats: u32::try_from(state.missed_heartbeats.load(Ordering::Relaxed)).unwrap_or(u32::MAX),
                bytes_sent: state.bytes_sent.load(Ordering::Relaxed),
            })
            .collect()
    }
}

// ============================================================================
// SECTION: Bootstrap Snapshot
// ============================================================================

/// Builds the bootstrap snapshot for `(project_id, environment_key)`: every
/// flag, every segment the project defines, every active rollout, and the
/// API key scopes the Edge is allowed to see (here: every key scoped to
/// this project/environment, since an Edge only ever authenticates with a
/// key already scoped to the `(project, env)` it is bootstrapping).
///
/// # Errors
///
/// Returns [`flagforge_core::StoreError`] if the store cannot be read.
pub fn build_snapshot(
    flag_store: &dyn flagforge_core::FlagStore,
    project_id: &ProjectId,
    environment_key: &EnvironmentKey,
    broker_version: u64,
    api_keys: Vec<ApiKeyScope>,
) -> Result<SyncMessage, flagforge_core::StoreError> {
    let flags = flag_store.list_flags(project_id, environment_key, &flagforge_core::FlagFilter::default())?;
    let segments = flag_store.list_segments(project_id)?;
    let mut rollouts = Vec::new();
    for flag in &flags {
        if let Some(rollout) = flag_store.get_rollout(project_id, environment_key, &flag.key)? {
            rollouts.push((flag.key.clone(), rollout));
        }
    }

    Ok(SyncMessage::Snapshot {
        protocol_version: PROTOCOL_VERSION,
        version: broker_version,
        flags,
        segments,
        rollouts,
        api_keys,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "Unit tests use expect for setup clarity.")]

    use std::collections::BTreeMap as Map;

    use flagforge_core::FlagFilter;
    use flagforge_core::FlagStore;
    use flagforge_core::model::FlagValue;
    use flagforge_core::model::TargetingBlock;
    use flagforge_core::model::ValueType;

    use super::*;

    #[derive(Default)]
    struct FakeFlagStore {
        flags: Map<FlagKey, Flag>,
        rollouts: Map<FlagKey, Rollout>,
        segments: Map<SegmentId, Segment>,
    }

    impl FlagStore for FakeFlagStore {
        fn get_flag(&self, _project_id: &ProjectId, _environment_key: &EnvironmentKey, key: &FlagKey) -> Result<Flag, StoreError> {
            self.flags.get(key).cloned().ok_or_else(|| StoreError::NotFound(key.to_string()))
        }

        fn list_flags(&self, _project_id: &ProjectId, _environment_key: &EnvironmentKey, _filter: &FlagFilter) -> Result<Vec<Flag>, StoreError> {
            Ok(self.flags.values().cloned().collect())
        }

        fn upsert_flag(&self, _flag: &Flag) -> Result<(), StoreError> {
            Err(StoreError::Backend("not supported by fake".to_string()))
        }

        fn delete_flag(&self, _project_id: &ProjectId, _environment_key: &EnvironmentKey, _key: &FlagKey) -> Result<(), StoreError> {
            Err(StoreError::Backend("not supported by fake".to_string()))
        }

        fn toggle_flag(&self, _project_id: &ProjectId, _environment_key: &EnvironmentKey, _key: &FlagKey, _enabled: bool) -> Result<(), StoreError> {
            Err(StoreError::Backend("not supported by fake".to_string()))
        }

        fn get_rollout(&self, _project_id: &ProjectId, _environment_key: &EnvironmentKey, flag_key: &FlagKey) -> Result<Option<Rollout>, StoreError> {
            Ok(self.rollouts.get(flag_key).cloned())
        }

        fn upsert_rollout(&self, _project_id: &ProjectId, _environment_key: &EnvironmentKey, _flag_key: &FlagKey, _rollout: &Rollout) -> Result<(), StoreError> {
            Err(StoreError::Backend("not supported by fake".to_string()))
        }

        fn transition_rollout(&self, _project_id: &ProjectId, _environment_key: &EnvironmentKey, _rollout_id: &RolloutId, _state: RolloutState) -> Result<(), StoreError> {
            Err(StoreError::Backend("not supported by fake".to_string()))
        }

        fn get_segment(&self, _project_id: &ProjectId, id: &SegmentId) -> Result<Segment, StoreError> {
            self.segments.get(id).cloned().ok_or_else(|| StoreError::NotFound(id.to_string()))
        }

        fn list_segments(&self, _project_id: &ProjectId) -> Result<Vec<Segment>, StoreError> {
            Ok(self.segments.values().cloned().collect())
        }

        fn upsert_segment(&self, _project_id: &ProjectId, _segment: &Segment) -> Result<(), StoreError> {
            Err(StoreError::Backend("not supported by fake".to_string()))
        }

        fn current_change_version(&self, _project_id: &ProjectId, _environment_key: &EnvironmentKey) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    fn sample_flag(key: &str) -> Flag {
        Flag {
            project_id: ProjectId::new("proj"),
            environment_key: EnvironmentKey::new("prod"),
            key: FlagKey::new(key),
            name: key.to_string(),
            description: None,
            value_type: ValueType::Bool,
            enabled: true,
            default: FlagValue::Bool(false),
            variations: Vec::new(),
            targeting: TargetingBlock::default(),
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
        }
    }

    fn sample_event(entity: EntityKind, op: ChangeOp, entity_id: &str) -> ChangeEvent {
        ChangeEvent {
            entity,
            project_id: ProjectId::new("proj"),
            environment_key: EnvironmentKey::new("prod"),
            entity_id: entity_id.to_string(),
            version: 7,
            op,
        }
    }

    #[test]
    fn flag_delta_carries_a_precomputed_payload() {
        let mut store = FakeFlagStore::default();
        store.flags.insert(FlagKey::new("beta-ui"), sample_flag("beta-ui"));
        let event = sample_event(EntityKind::Flag, ChangeOp::Updated, "beta-ui");

        let message = build_delta_message(&store, &event).expect("build delta");
        let SyncMessage::Delta { payload: Some(DeltaPayload::Flag(precomputed)), entity, .. } = message else {
            unreachable!("expected a flag payload delta");
        };
        assert_eq!(entity, EntityKind::Flag);
        assert_eq!(precomputed.flag_key, FlagKey::new("beta-ui"));
    }

    #[test]
    fn rollout_delta_resolves_via_the_carried_flag_key() {
        let mut store = FakeFlagStore::default();
        store.flags.insert(FlagKey::new("beta-ui"), sample_flag("beta-ui"));
        let event = sample_event(EntityKind::Rollout, ChangeOp::Updated, "beta-ui");

        let message = build_delta_message(&store, &event).expect("build delta");
        assert!(matches!(message, SyncMessage::Delta { payload: Some(DeltaPayload::Flag(_)), .. }));
    }

    #[test]
    fn deleted_flag_carries_no_payload() {
        let store = FakeFlagStore::default();
        let event = sample_event(EntityKind::Flag, ChangeOp::Deleted, "beta-ui");

        let message = build_delta_message(&store, &event).expect("build delta");
        assert!(matches!(message, SyncMessage::Delta { payload: None, .. }));
    }

    #[test]
    fn api_key_delta_never_carries_a_payload() {
        let store = FakeFlagStore::default();
        let event = sample_event(EntityKind::ApiKey, ChangeOp::Created, "key-1");

        let message = build_delta_message(&store, &event).expect("build delta");
        assert!(matches!(message, SyncMessage::Delta { payload: None, .. }));
    }

    #[test]
    fn register_then_snapshot_reports_the_session() {
        let registry = SessionRegistry::new();
        let id = registry.register(ProjectId::new("proj"), EnvironmentKey::new("prod"), "edge-1".to_string());

        let metrics = registry.snapshot();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].client_id, "edge-1");
        assert_eq!(metrics[0].missed_heartbeats, 0);

        registry.record_missed_heartbeat(id);
        registry.record_missed_heartbeat(id);
        let metrics = registry.snapshot();
        assert_eq!(metrics[0].missed_heartbeats, 2);

        registry.record_heartbeat(id);
        let metrics = registry.snapshot();
        assert_eq!(metrics[0].missed_heartbeats, 0);
    }

    #[test]
    fn missed_heartbeats_past_the_limit_signal_teardown() {
        let registry = SessionRegistry::new();
        let id = registry.register(ProjectId::new("proj"), EnvironmentKey::new("prod"), "edge-1".to_string());
        for _ in 0..MAX_MISSED_HEARTBEATS {
            registry.record_missed_heartbeat(id);
        }
        let metrics = registry.snapshot();
        assert!(metrics[0].missed_heartbeats >= MAX_MISSED_HEARTBEATS);
    }

    #[test]
    fn remove_drops_the_session() {
        let registry = SessionRegistry::new();
        let id = registry.register(ProjectId::new("proj"), EnvironmentKey::new("prod"), "edge-1".to_string());
        registry.remove(id);
        assert!(registry.snapshot().is_empty());
    }
}
