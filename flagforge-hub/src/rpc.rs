// flagforge-hub/src/rpc.rs
// ============================================================================
// Module: Hub RPC Surface (C11)
// Description: Evaluation, flag/segment/rollout CRUD, and admin endpoints.
// Purpose: The one HTTP surface every SDK, dashboard, and Edge talks to.
// Dependencies: axum, flagforge-core
// ============================================================================

//! ## Overview
//! Every evaluation handler walks the tiered path C6 -> C5 -> C3: a C6 miss
//! materializes a [`flagforge_core::model::PrecomputedFlag`] from the store
//! and inserts it into C6 before evaluating, so the next request for the
//! same flag is served without touching C3 again. Every response —
//! success or error — carries `evaluation_time_ms`, matching the wire
//! format named in the specification.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Instant;

use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use flagforge_core::FlagFilter;
use flagforge_core::FlagStore;
use flagforge_core::Reason;
use flagforge_core::evaluate;
use flagforge_core::model::EnvironmentKey;
use flagforge_core::model::EvaluationContext;
use flagforge_core::model::Flag;
use flagforge_core::model::FlagKey;
use flagforge_core::model::FlagValue;
use flagforge_core::model::Permission;
use flagforge_core::model::PrecomputedFlag;
use flagforge_core::model::ProjectId;
use flagforge_core::model::VariationId;
use serde::Deserialize;
use serde::Serialize;

use crate::auth;
use crate::cache::FlagScope;
use crate::error::RpcError;
use crate::server::AppState;
use crate::sync::SessionMetrics;

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// `{flag_key, user_id?, user_key?, attributes?}`.
#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    /// Flag to evaluate.
    pub flag_key: String,
    /// Optional application-level user id, audit-only.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Stable user key used for bucketing and targeting.
    pub user_key: String,
    /// Arbitrary context attributes.
    #[serde(default)]
    pub attributes: std::collections::BTreeMap<String, serde_json::Value>,
}

impl EvaluateRequest {
    fn context(&self) -> EvaluationContext {
        EvaluationContext { user_key: self.user_key.clone(), user_id: self.user_id.clone(), attributes: self.attributes.clone() }
    }
}

/// `{flag_key, value, variation_id?, reason, matched, evaluation_time_ms}`.
#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    /// Flag that was evaluated.
    pub flag_key: String,
    /// The resolved value.
    pub value: FlagValue,
    /// Variation id that produced `value`, if any.
    pub variation_id: Option<VariationId>,
    /// Why this value was returned.
    pub reason: Reason,
    /// Whether a rule or rollout actively matched.
    pub matched: bool,
    /// Wall-clock time spent evaluating, in milliseconds.
    pub evaluation_time_ms: u64,
}

/// A request to evaluate several flags against one context.
#[derive(Debug, Deserialize)]
pub struct EvaluateBatchRequest {
    /// Flags to evaluate.
    pub flag_keys: Vec<String>,
    /// Optional application-level user id, audit-only.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Stable user key used for bucketing and targeting.
    pub user_key: String,
    /// Arbitrary context attributes.
    #[serde(default)]
    pub attributes: std::collections::BTreeMap<String, serde_json::Value>,
}

// ============================================================================
// SECTION: Evaluation Path
// ============================================================================

fn load_precomputed(state: &AppState, project_id: &ProjectId, environment_key: &EnvironmentKey, flag_key: &FlagKey) -> Result<PrecomputedFlag, RpcError> {
    let preload_key = (project_id.clone(), environment_key.clone(), flag_key.clone());
    if let Some(entry) = state.preloaded_table.get(&preload_key) {
        return Ok(entry);
    }

    let flag: Flag = state.flag_store.get_flag(project_id, environment_key, flag_key)?;
    let rollout = state.flag_store.get_rollout(project_id, environment_key, flag_key)?;
    let segments = crate::cache::resolve_segments(&flag, rollout.as_ref(), |id| state.flag_store.get_segment(project_id, id))?;
    let entry = PrecomputedFlag {
        project_id: project_id.clone(),
        environment_key: environment_key.clone(),
        flag_key: flag_key.clone(),
        flag,
        rollout,
        segments,
        version: 0,
    };
    state.preloaded_table.upsert(preload_key, entry.clone());
    Ok(entry)
}

fn evaluate_one(state: &AppState, project_id: &ProjectId, environment_key: &EnvironmentKey, flag_key: &str, context: &EvaluationContext) -> Result<EvaluateResponse, RpcError> {
    let start = Instant::now();
    let flag_key = FlagKey::new(flag_key);

    let fingerprint = flagforge_core::hashing::fingerprint(project_id.as_str(), environment_key.as_str(), flag_key.as_str(), context)?;
    if let Some(bytes) = state.response_cache.get(&fingerprint) {
        if let Ok(mut cached) = serde_json::from_slice::<EvaluateResponse>(&bytes) {
            cached.evaluation_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            return Ok(cached);
        }
    }

    let precomputed = load_precomputed(state, project_id, environment_key, &flag_key)?;
    let outcome = evaluate(&precomputed.flag, context, precomputed.rollout.as_ref(), &precomputed.segments)?;

    let response = EvaluateResponse {
        flag_key: flag_key.as_str().to_string(),
        value: outcome.value,
        variation_id: outcome.variation_id,
        reason: outcome.reason,
        matched: outcome.matched,
        evaluation_time_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    };

    if let Ok(bytes) = serde_json::to_vec(&response) {
        let scope = FlagScope { project_id: project_id.clone(), environment_key: environment_key.clone(), flag_key: flag_key.clone() };
        state.response_cache.put(fingerprint, scope, bytes);
    }

    Ok(response)
}

// ============================================================================
// SECTION: Handlers — Evaluation
// ============================================================================

/// `POST /api/v1/evaluate` — tiered C6 -> C5 -> C3 evaluation.
///
/// # Errors
///
/// Returns [`RpcError`] on an auth failure or a store/evaluation error.
pub async fn evaluate_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, RpcError> {
    let project_id = project_from_headers(&headers)?;
    let environment_key = environment_from_headers(&headers)?;
    let auth = auth::authenticate(&headers, state.api_key_store.as_ref(), &state.auth)?;
    auth.require_scope(&project_id, &environment_key)?;
    auth.require_permission(Permission::Evaluate)?;

    let context = request.context();
    let response = evaluate_one(&state, &project_id, &environment_key, &request.flag_key, &context)?;
    Ok(Json(response))
}

/// `POST /api/v1/evaluate/batch` — evaluates several flags against one
/// context in a single round trip.
///
/// # Errors
///
/// Returns [`RpcError`] on an auth failure; a per-flag evaluation failure
/// is surfaced per-entry rather than failing the whole batch.
pub async fn evaluate_batch_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EvaluateBatchRequest>,
) -> Result<Json<Vec<EvaluateResponse>>, RpcError> {
    let project_id = project_from_headers(&headers)?;
    let environment_key = environment_from_headers(&headers)?;
    let auth = auth::authenticate(&headers, state.api_key_store.as_ref(), &state.auth)?;
    auth.require_scope(&project_id, &environment_key)?;
    auth.require_permission(Permission::Evaluate)?;

    let context = EvaluationContext { user_key: request.user_key, user_id: request.user_id, attributes: request.attributes };
    let mut responses = Vec::with_capacity(request.flag_keys.len());
    for flag_key in &request.flag_keys {
        responses.push(evaluate_one(&state, &project_id, &environment_key, flag_key, &context)?);
    }
    Ok(Json(responses))
}

/// `POST /api/v1/evaluate/ultra` — serves exclusively from C6/C5; never
/// touches C3, and returns `NOT_READY` before preload completes.
///
/// # Errors
///
/// Returns [`RpcError::NotReady`] before the first preload swap, or
/// [`RpcError`] on an auth failure.
pub async fn evaluate_ultra_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, RpcError> {
    if !state.preloaded_table.is_ready() {
        return Err(RpcError::NotReady("preloaded table has not completed its initial build".to_string()));
    }

    let project_id = project_from_headers(&headers)?;
    let environment_key = environment_from_headers(&headers)?;
    let auth = auth::authenticate(&headers, state.api_key_store.as_ref(), &state.auth)?;
    auth.require_scope(&project_id, &environment_key)?;
    auth.require_permission(Permission::Evaluate)?;

    let start = Instant::now();
    let flag_key = FlagKey::new(request.flag_key.as_str());
    let preload_key = (project_id.clone(), environment_key.clone(), flag_key.clone());
    let precomputed = state
        .preloaded_table
        .get(&preload_key)
        .ok_or_else(|| RpcError::NotReady(format!("flag {} is not preloaded", request.flag_key)))?;

    let context = request.context();
    let outcome = evaluate(&precomputed.flag, &context, precomputed.rollout.as_ref(), &precomputed.segments)?;
    Ok(Json(EvaluateResponse {
        flag_key: request.flag_key,
        value: outcome.value,
        variation_id: outcome.variation_id,
        reason: outcome.reason,
        matched: outcome.matched,
        evaluation_time_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    }))
}

// ============================================================================
// SECTION: Handlers — Flag/Segment/Rollout CRUD
// ============================================================================

/// `GET /api/v1/flags` — lists flags in scope.
///
/// # Errors
///
/// Returns [`RpcError`] on an auth failure or store error.
pub async fn list_flags_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Vec<Flag>>, RpcError> {
    let project_id = project_from_headers(&headers)?;
    let environment_key = environment_from_headers(&headers)?;
    let auth = auth::authenticate(&headers, state.api_key_store.as_ref(), &state.auth)?;
    auth.require_scope(&project_id, &environment_key)?;
    auth.require_permission(Permission::Read)?;

    let flags = state.flag_store.list_flags(&project_id, &environment_key, &FlagFilter::default())?;
    Ok(Json(flags))
}

/// `PUT /api/v1/flags/{key}` — creates or replaces a flag.
///
/// # Errors
///
/// Returns [`RpcError`] on an auth failure or a store validation error.
pub async fn upsert_flag_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(flag): Json<Flag>,
) -> Result<Json<()>, RpcError> {
    if key != flag.key.as_str() {
        return Err(RpcError::Forbidden(format!("path key {key} does not match body key {}", flag.key.as_str())));
    }

    let auth = auth::authenticate(&headers, state.api_key_store.as_ref(), &state.auth)?;
    auth.require_scope(&flag.project_id, &flag.environment_key)?;
    auth.require_permission(Permission::Write)?;

    state.flag_store.upsert_flag(&flag)?;
    let scope = FlagScope { project_id: flag.project_id.clone(), environment_key: flag.environment_key.clone(), flag_key: flag.key.clone() };
    state.response_cache.invalidate_scope(&scope);
    state.preloaded_table.remove(&(flag.project_id, flag.environment_key, flag.key));
    Ok(Json(()))
}

/// `POST /api/v1/flags/{key}/toggle` — flips `enabled` without touching
/// any other field.
///
/// # Errors
///
/// Returns [`RpcError`] on an auth failure or store error.
pub async fn toggle_flag_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(body): Json<ToggleRequest>,
) -> Result<Json<()>, RpcError> {
    let project_id = project_from_headers(&headers)?;
    let environment_key = environment_from_headers(&headers)?;
    let auth = auth::authenticate(&headers, state.api_key_store.as_ref(), &state.auth)?;
    auth.require_scope(&project_id, &environment_key)?;
    auth.require_permission(Permission::Write)?;

    let flag_key = FlagKey::new(key.as_str());
    state.flag_store.toggle_flag(&project_id, &environment_key, &flag_key, body.enabled)?;
    let scope = FlagScope { project_id: project_id.clone(), environment_key: environment_key.clone(), flag_key: flag_key.clone() };
    state.response_cache.invalidate_scope(&scope);
    state.preloaded_table.remove(&(project_id, environment_key, flag_key));
    Ok(Json(()))
}

/// Body of a toggle request.
#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    /// The new `enabled` value.
    pub enabled: bool,
}

// ============================================================================
// SECTION: Handlers — Admin / Health
// ============================================================================

/// `GET /healthz` — liveness; always succeeds once the process is serving.
pub async fn healthz() -> &'static str {
    "ok"
}

/// `GET /readyz` — readiness; mirrors the Edge's `ready` flag, generalized
/// to the Hub's own C6 preload state.
pub async fn readyz(State(state): State<AppState>) -> Result<&'static str, RpcError> {
    if state.preloaded_table.is_ready() {
        Ok("ready")
    } else {
        Err(RpcError::NotReady("preloaded table has not completed its initial build".to_string()))
    }
}

/// `GET /api/v1/admin/sessions` — read-only sync session metrics.
///
/// # Errors
///
/// Returns [`RpcError`] on an auth failure.
pub async fn list_sessions_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Vec<SessionMetrics>>, RpcError> {
    let auth = auth::authenticate(&headers, state.api_key_store.as_ref(), &state.auth)?;
    auth.require_permission(Permission::Admin)?;
    Ok(Json(state.session_registry.snapshot()))
}

// ============================================================================
// SECTION: Header Helpers
// ============================================================================

fn project_from_headers(headers: &HeaderMap) -> Result<ProjectId, RpcError> {
    headers
        .get("x-flagforge-project")
        .and_then(|value| value.to_str().ok())
        .map(ProjectId::new)
        .ok_or_else(|| RpcError::Unauthenticated("missing X-Flagforge-Project header".to_string()))
}

fn environment_from_headers(headers: &HeaderMap) -> Result<EnvironmentKey, RpcError> {
    headers
        .get("x-flagforge-environment")
        .and_then(|value| value.to_str().ok())
        .map(EnvironmentKey::new)
        .ok_or_else(|| RpcError::Unauthenticated("missing X-Flagforge-Environment header".to_string()))
}
