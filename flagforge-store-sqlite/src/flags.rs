// flagforge-store-sqlite/src/flags.rs
// ============================================================================
// Module: SQLite Flag Store
// Description: Durable FlagStore backed by SQLite, emitting change events.
// Purpose: Persist flags, rollouts, and segments; enforce write invariants.
// Dependencies: flagforge-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Each flag, rollout, and segment is stored as a canonical JSON blob
//! alongside the indexed columns the store's own queries need (key,
//! enabled, lifecycle state). Every successful write allocates the next
//! monotonic `(project, environment)` change version inside the same
//! transaction as the write, then publishes a [`ChangeEvent`] through the
//! configured [`ChangeSink`] only after the transaction commits, so a
//! subscriber never observes a version the store has not yet durably
//! recorded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use flagforge_core::ChangeEvent;
use flagforge_core::ChangeOp;
use flagforge_core::ChangeSink;
use flagforge_core::EntityKind;
use flagforge_core::EnvironmentKey;
use flagforge_core::Flag;
use flagforge_core::FlagKey;
use flagforge_core::FlagStore;
use flagforge_core::Rollout;
use flagforge_core::RolloutId;
use flagforge_core::RolloutState;
use flagforge_core::Segment;
use flagforge_core::SegmentId;
use flagforge_core::StoreError;
use flagforge_core::interfaces::FlagFilter;
use flagforge_core::model::ids::is_valid_flag_key;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::schema;

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed [`FlagStore`].
#[derive(Clone)]
pub struct SqliteFlagStore {
    connection: Arc<Mutex<Connection>>,
    change_sink: Option<Arc<dyn ChangeSink>>,
}

impl SqliteFlagStore {
    /// Opens (or creates) a flag store at `config.path`.
    ///
    /// # Errors
    ///
    /// Returns [`schema::SqliteStoreError`] if the database cannot be
    /// opened or migrated.
    pub fn open(config: &schema::SqliteStoreConfig) -> Result<Self, schema::SqliteStoreError> {
        let connection = schema::open(config)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)), change_sink: None })
    }

    /// Attaches the sink every mutation publishes a [`ChangeEvent`] to.
    #[must_use]
    pub fn with_change_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.change_sink = Some(sink);
        self
    }

    /// Wraps an existing shared connection, typically to pair with a
    /// [`crate::api_keys::SqliteApiKeyStore`] built from the same handle.
    #[must_use]
    pub const fn from_shared(
        connection: Arc<Mutex<Connection>>,
        change_sink: Option<Arc<dyn ChangeSink>>,
    ) -> Self {
        Self { connection, change_sink }
    }

    fn publish(&self, event: ChangeEvent) {
        if let Some(sink) = &self.change_sink {
            sink.publish(event);
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.connection.lock().map_err(|_| StoreError::Backend("connection mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: FlagStore
// ============================================================================

impl FlagStore for SqliteFlagStore {
    fn get_flag(
        &self,
        project_id: &flagforge_core::ProjectId,
        environment_key: &EnvironmentKey,
        key: &FlagKey,
    ) -> Result<Flag, StoreError> {
        let guard = self.lock()?;
        let row: Option<Vec<u8>> = guard
            .query_row(
                "SELECT flag_json FROM flags WHERE project_id = ?1 AND environment_key = ?2 AND \
                 flag_key = ?3",
                params![project_id.as_str(), environment_key.as_str(), key.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let bytes = row.ok_or_else(|| StoreError::NotFound(format!("flag {key}")))?;
        serde_json::from_slice(&bytes).map_err(|err| StoreError::Backend(err.to_string()))
    }

    fn list_flags(
        &self,
        project_id: &flagforge_core::ProjectId,
        environment_key: &EnvironmentKey,
        filter: &FlagFilter,
    ) -> Result<Vec<Flag>, StoreError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare(
                "SELECT flag_json FROM flags WHERE project_id = ?1 AND environment_key = ?2 \
                 ORDER BY flag_key",
            )
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let rows = stmt
            .query_map(params![project_id.as_str(), environment_key.as_str()], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let mut flags = Vec::new();
        for row in rows {
            let bytes = row.map_err(|err| StoreError::Backend(err.to_string()))?;
            let flag: Flag =
                serde_json::from_slice(&bytes).map_err(|err| StoreError::Backend(err.to_string()))?;
            if let Some(enabled) = filter.enabled {
                if flag.enabled != enabled {
                    continue;
                }
            }
            if let Some(substring) = &filter.key_contains {
                if !flag.key.as_str().contains(substring.as_str()) {
                    continue;
                }
            }
            flags.push(flag);
        }
        Ok(flags)
    }

    fn upsert_flag(&self, flag: &Flag) -> Result<(), StoreError> {
        validate_flag(flag)?;
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| StoreError::Backend(err.to_string()))?;
        let exists: bool = tx
            .query_row(
                "SELECT 1 FROM flags WHERE project_id = ?1 AND environment_key = ?2 AND flag_key \
                 = ?3",
                params![flag.project_id.as_str(), flag.environment_key.as_str(), flag.key.as_str()],
                |_| Ok(()),
            )
            .optional()
            .map_err(|err| StoreError::Backend(err.to_string()))?
            .is_some();
        let bytes = serde_json::to_vec(flag).map_err(|err| StoreError::Backend(err.to_string()))?;
        tx.execute(
            "INSERT INTO flags (project_id, environment_key, flag_key, flag_json, enabled, \
             updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(project_id, environment_key, flag_key) DO UPDATE SET
                flag_json = excluded.flag_json, enabled = excluded.enabled, updated_at = \
             excluded.updated_at",
            params![
                flag.project_id.as_str(),
                flag.environment_key.as_str(),
                flag.key.as_str(),
                bytes,
                i64::from(flag.enabled),
                String::from(flag.updated_at),
            ],
        )
        .map_err(|err| StoreError::Backend(err.to_string()))?;
        let version =
            schema::next_change_version(&tx, flag.project_id.as_str(), flag.environment_key.as_str())
                .map_err(|err| StoreError::Backend(err.to_string()))?;
        tx.commit().map_err(|err| StoreError::Backend(err.to_string()))?;
        drop(guard);
        self.publish(ChangeEvent {
            entity: EntityKind::Flag,
            project_id: flag.project_id.clone(),
            environment_key: flag.environment_key.clone(),
            entity_id: flag.key.to_string(),
            version,
            op: if exists { ChangeOp::Updated } else { ChangeOp::Created },
        });
        Ok(())
    }

    fn delete_flag(
        &self,
        project_id: &flagforge_core::ProjectId,
        environment_key: &EnvironmentKey,
        key: &FlagKey,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| StoreError::Backend(err.to_string()))?;
        let affected = tx
            .execute(
                "DELETE FROM flags WHERE project_id = ?1 AND environment_key = ?2 AND flag_key = \
                 ?3",
                params![project_id.as_str(), environment_key.as_str(), key.as_str()],
            )
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("flag {key}")));
        }
        tx.execute(
            "DELETE FROM rollouts WHERE project_id = ?1 AND environment_key = ?2 AND flag_key = ?3",
            params![project_id.as_str(), environment_key.as_str(), key.as_str()],
        )
        .map_err(|err| StoreError::Backend(err.to_string()))?;
        let version = schema::next_change_version(&tx, project_id.as_str(), environment_key.as_str())
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        tx.commit().map_err(|err| StoreError::Backend(err.to_string()))?;
        drop(guard);
        self.publish(ChangeEvent {
            entity: EntityKind::Flag,
            project_id: project_id.clone(),
            environment_key: environment_key.clone(),
            entity_id: key.to_string(),
            version,
            op: ChangeOp::Deleted,
        });
        Ok(())
    }

    fn toggle_flag(
        &self,
        project_id: &flagforge_core::ProjectId,
        environment_key: &EnvironmentKey,
        key: &FlagKey,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| StoreError::Backend(err.to_string()))?;
        let existing: Option<Vec<u8>> = tx
            .query_row(
                "SELECT flag_json FROM flags WHERE project_id = ?1 AND environment_key = ?2 AND \
                 flag_key = ?3",
                params![project_id.as_str(), environment_key.as_str(), key.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let bytes = existing.ok_or_else(|| StoreError::NotFound(format!("flag {key}")))?;
        let mut flag: Flag =
            serde_json::from_slice(&bytes).map_err(|err| StoreError::Backend(err.to_string()))?;
        flag.enabled = enabled;
        flag.updated_at = flagforge_core::Timestamp::now();
        let bytes = serde_json::to_vec(&flag).map_err(|err| StoreError::Backend(err.to_string()))?;
        tx.execute(
            "UPDATE flags SET flag_json = ?1, enabled = ?2, updated_at = ?3 WHERE project_id = ?4 \
             AND environment_key = ?5 AND flag_key = ?6",
            params![
                bytes,
                i64::from(enabled),
                String::from(flag.updated_at),
                project_id.as_str(),
                environment_key.as_str(),
                key.as_str(),
            ],
        )
        .map_err(|err| StoreError::Backend(err.to_string()))?;
        let version = schema::next_change_version(&tx, project_id.as_str(), environment_key.as_str())
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        tx.commit().map_err(|err| StoreError::Backend(err.to_string()))?;
        drop(guard);
        self.publish(ChangeEvent {
            entity: EntityKind::Flag,
            project_id: project_id.clone(),
            environment_key: environment_key.clone(),
            entity_id: key.to_string(),
            version,
            op: ChangeOp::Toggled,
        });
        Ok(())
    }

    fn get_rollout(
        &self,
        project_id: &flagforge_core::ProjectId,
        environment_key: &EnvironmentKey,
        flag_key: &FlagKey,
    ) -> Result<Option<Rollout>, StoreError> {
        let guard = self.lock()?;
        let row: Option<Vec<u8>> = guard
            .query_row(
                "SELECT rollout_json FROM rollouts WHERE project_id = ?1 AND environment_key = \
                 ?2 AND flag_key = ?3",
                params![project_id.as_str(), environment_key.as_str(), flag_key.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        row.map(|bytes| {
            serde_json::from_slice(&bytes).map_err(|err| StoreError::Backend(err.to_string()))
        })
        .transpose()
    }

    fn upsert_rollout(
        &self,
        project_id: &flagforge_core::ProjectId,
        environment_key: &EnvironmentKey,
        flag_key: &FlagKey,
        rollout: &Rollout,
    ) -> Result<(), StoreError> {
        validate_rollout_weights(rollout)?;
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| StoreError::Backend(err.to_string()))?;
        let bytes = serde_json::to_vec(rollout).map_err(|err| StoreError::Backend(err.to_string()))?;
        tx.execute(
            "INSERT INTO rollouts (project_id, environment_key, flag_key, rollout_id, state, \
             rollout_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(project_id, environment_key, flag_key) DO UPDATE SET
                rollout_id = excluded.rollout_id, state = excluded.state, rollout_json = \
             excluded.rollout_json",
            params![
                project_id.as_str(),
                environment_key.as_str(),
                flag_key.as_str(),
                rollout.id.as_str(),
                rollout_state_label(rollout.state),
                bytes,
            ],
        )
        .map_err(|err| StoreError::Backend(err.to_string()))?;
        let version = schema::next_change_version(&tx, project_id.as_str(), environment_key.as_str())
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        tx.commit().map_err(|err| StoreError::Backend(err.to_string()))?;
        drop(guard);
        self.publish(ChangeEvent {
            entity: EntityKind::Rollout,
            project_id: project_id.clone(),
            environment_key: environment_key.clone(),
            entity_id: flag_key.to_string(),
            version,
            op: ChangeOp::Updated,
        });
        Ok(())
    }

    fn transition_rollout(
        &self,
        project_id: &flagforge_core::ProjectId,
        environment_key: &EnvironmentKey,
        rollout_id: &RolloutId,
        state: RolloutState,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| StoreError::Backend(err.to_string()))?;
        let row: Option<(String, Vec<u8>)> = tx
            .query_row(
                "SELECT flag_key, rollout_json FROM rollouts WHERE project_id = ?1 AND \
                 environment_key = ?2 AND rollout_id = ?3",
                params![project_id.as_str(), environment_key.as_str(), rollout_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let (flag_key, bytes) = row.ok_or_else(|| StoreError::NotFound(format!("rollout {rollout_id}")))?;
        let flag_key = FlagKey::new(flag_key);
        let mut rollout: Rollout =
            serde_json::from_slice(&bytes).map_err(|err| StoreError::Backend(err.to_string()))?;
        if !is_legal_transition(rollout.state, state) {
            return Err(StoreError::InvalidWrite(format!(
                "illegal rollout transition {:?} -> {:?}",
                rollout.state, state
            )));
        }
        rollout.state = state;
        let bytes = serde_json::to_vec(&rollout).map_err(|err| StoreError::Backend(err.to_string()))?;
        tx.execute(
            "UPDATE rollouts SET state = ?1, rollout_json = ?2 WHERE project_id = ?3 AND \
             environment_key = ?4 AND rollout_id = ?5",
            params![
                rollout_state_label(state),
                bytes,
                project_id.as_str(),
                environment_key.as_str(),
                rollout_id.as_str(),
            ],
        )
        .map_err(|err| StoreError::Backend(err.to_string()))?;
        let version = schema::next_change_version(&tx, project_id.as_str(), environment_key.as_str())
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        tx.commit().map_err(|err| StoreError::Backend(err.to_string()))?;
        drop(guard);
        self.publish(ChangeEvent {
            entity: EntityKind::Rollout,
            project_id: project_id.clone(),
            environment_key: environment_key.clone(),
            entity_id: flag_key.to_string(),
            version,
            op: ChangeOp::Updated,
        });
        Ok(())
    }

    fn get_segment(
        &self,
        project_id: &flagforge_core::ProjectId,
        id: &SegmentId,
    ) -> Result<Segment, StoreError> {
        let guard = self.lock()?;
        let row: Option<Vec<u8>> = guard
            .query_row(
                "SELECT segment_json FROM segments WHERE project_id = ?1 AND segment_id = ?2",
                params![project_id.as_str(), id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let bytes = row.ok_or_else(|| StoreError::NotFound(format!("segment {id}")))?;
        serde_json::from_slice(&bytes).map_err(|err| StoreError::Backend(err.to_string()))
    }

    fn list_segments(&self, project_id: &flagforge_core::ProjectId) -> Result<Vec<Segment>, StoreError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare("SELECT segment_json FROM segments WHERE project_id = ?1 ORDER BY segment_id")
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let rows = stmt
            .query_map(params![project_id.as_str()], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        rows.map(|row| {
            let bytes = row.map_err(|err| StoreError::Backend(err.to_string()))?;
            serde_json::from_slice(&bytes).map_err(|err| StoreError::Backend(err.to_string()))
        })
        .collect()
    }

    fn upsert_segment(
        &self,
        project_id: &flagforge_core::ProjectId,
        segment: &Segment,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| StoreError::Backend(err.to_string()))?;
        let mut graph = load_segment_graph(&tx, project_id.as_str())
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        graph.insert(
            segment.id.clone(),
            segment.referenced_segment_ids().into_iter().cloned().collect(),
        );
        if has_cycle(&graph, &segment.id) {
            return Err(StoreError::Conflict(format!(
                "segment {} would introduce a cycle",
                segment.id
            )));
        }
        let bytes = serde_json::to_vec(segment).map_err(|err| StoreError::Backend(err.to_string()))?;
        tx.execute(
            "INSERT INTO segments (project_id, segment_id, segment_json) VALUES (?1, ?2, ?3)
             ON CONFLICT(project_id, segment_id) DO UPDATE SET segment_json = excluded.segment_json",
            params![project_id.as_str(), segment.id.as_str(), bytes],
        )
        .map_err(|err| StoreError::Backend(err.to_string()))?;
        // A segment is project-scoped, not per-environment, but the
        // broker's topics are keyed by (project, environment); fan the
        // event out to every environment that currently has flags in
        // this project, since any of them may reference the segment.
        let environments = distinct_environments(&tx, project_id.as_str())
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let mut versions = Vec::with_capacity(environments.len());
        for environment_key in &environments {
            let version = schema::next_change_version(&tx, project_id.as_str(), environment_key)
                .map_err(|err| StoreError::Backend(err.to_string()))?;
            versions.push(version);
        }
        tx.commit().map_err(|err| StoreError::Backend(err.to_string()))?;
        drop(guard);
        for (environment_key, version) in environments.into_iter().zip(versions) {
            self.publish(ChangeEvent {
                entity: EntityKind::Segment,
                project_id: project_id.clone(),
                environment_key: EnvironmentKey::new(environment_key),
                entity_id: segment.id.to_string(),
                version,
                op: ChangeOp::Updated,
            });
        }
        Ok(())
    }

    fn current_change_version(
        &self,
        project_id: &flagforge_core::ProjectId,
        environment_key: &EnvironmentKey,
    ) -> Result<u64, StoreError> {
        let guard = self.lock()?;
        schema::current_change_version(&guard, project_id.as_str(), environment_key.as_str())
            .map_err(|err| StoreError::Backend(err.to_string()))
    }
}

fn distinct_environments(
    tx: &rusqlite::Transaction<'_>,
    project_id: &str,
) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        tx.prepare("SELECT DISTINCT environment_key FROM flags WHERE project_id = ?1")?;
    let rows = stmt.query_map(params![project_id], |row| row.get::<_, String>(0))?;
    rows.collect()
}

// ============================================================================
// SECTION: Validation
// ============================================================================

fn validate_flag(flag: &Flag) -> Result<(), StoreError> {
    if !is_valid_flag_key(flag.key.as_str()) {
        return Err(StoreError::InvalidWrite(format!("invalid flag key: {}", flag.key)));
    }
    for variation in &flag.variations {
        if !variation.value.matches_type(flag.value_type) {
            return Err(StoreError::InvalidWrite(format!(
                "variation {} has a value type incompatible with flag {}",
                variation.id, flag.key
            )));
        }
    }
    if !flag.default.matches_type(flag.value_type) {
        return Err(StoreError::InvalidWrite(format!("default value type mismatch on {}", flag.key)));
    }
    if let Some(default_id) = &flag.targeting.default_rule {
        if flag.variation(default_id).is_none() {
            return Err(StoreError::InvalidWrite(format!(
                "default_rule references unknown variation {default_id}"
            )));
        }
    }
    for rule in &flag.targeting.rules {
        if flag.variation(&rule.result_variation).is_none() {
            return Err(StoreError::InvalidWrite(format!(
                "targeting rule references unknown variation {}",
                rule.result_variation
            )));
        }
    }
    Ok(())
}

fn validate_rollout_weights(rollout: &Rollout) -> Result<(), StoreError> {
    if let flagforge_core::RolloutKind::Experiment(variant) = &rollout.kind {
        let total: f64 = variant.weights.iter().map(|w| w.weight).sum();
        if (total - 100.0).abs() > 0.01 {
            return Err(StoreError::InvalidWrite(format!(
                "experiment weights must sum to 100, got {total}"
            )));
        }
    }
    Ok(())
}

const fn is_legal_transition(from: RolloutState, to: RolloutState) -> bool {
    matches!(
        (from, to),
        (RolloutState::Draft, RolloutState::Active)
            | (RolloutState::Active, RolloutState::Paused)
            | (RolloutState::Paused, RolloutState::Active)
            | (RolloutState::Active, RolloutState::Completed)
            | (RolloutState::Paused, RolloutState::Completed)
    )
}

const fn rollout_state_label(state: RolloutState) -> &'static str {
    match state {
        RolloutState::Draft => "draft",
        RolloutState::Active => "active",
        RolloutState::Paused => "paused",
        RolloutState::Completed => "completed",
    }
}

fn load_segment_graph(
    tx: &rusqlite::Transaction<'_>,
    project_id: &str,
) -> rusqlite::Result<BTreeMap<SegmentId, BTreeSet<SegmentId>>> {
    let mut stmt = tx.prepare("SELECT segment_json FROM segments WHERE project_id = ?1")?;
    let rows = stmt.query_map(params![project_id], |row| row.get::<_, Vec<u8>>(0))?;
    let mut graph = BTreeMap::new();
    for row in rows {
        let bytes = row?;
        let Ok(segment) = serde_json::from_slice::<Segment>(&bytes) else {
            continue;
        };
        graph.insert(segment.id.clone(), segment.referenced_segment_ids().into_iter().cloned().collect());
    }
    Ok(graph)
}

/// Depth-first cycle check starting from `start`, rejecting writes that
/// would make `InSegment` resolution non-terminating.
fn has_cycle(graph: &BTreeMap<SegmentId, BTreeSet<SegmentId>>, start: &SegmentId) -> bool {
    fn visit(
        node: &SegmentId,
        graph: &BTreeMap<SegmentId, BTreeSet<SegmentId>>,
        visiting: &mut BTreeSet<SegmentId>,
        done: &mut BTreeSet<SegmentId>,
    ) -> bool {
        if visiting.contains(node) {
            return true;
        }
        if done.contains(node) {
            return false;
        }
        visiting.insert(node.clone());
        if let Some(children) = graph.get(node) {
            for child in children {
                if visit(child, graph, visiting, done) {
                    return true;
                }
            }
        }
        visiting.remove(node);
        done.insert(node.clone());
        false
    }

    let mut visiting = BTreeSet::new();
    let mut done = BTreeSet::new();
    visit(start, graph, &mut visiting, &mut done)
}
