// flagforge-edge/src/rpc.rs
// ============================================================================
// Module: Edge RPC Surface (C11 subset)
// Description: Evaluation-only handlers, served entirely from C8.
// Purpose: Give SDKs a drop-in-compatible evaluate endpoint with no
//          dependency on Hub reachability once C8 is warm.
// Dependencies: axum, flagforge-core
// ============================================================================

//! ## Overview
//! Generalizes `flagforge_hub::rpc`'s evaluate handlers to a store-less
//! world: there is no C3 fallback and no C5 response cache here, only C8.
//! A cache miss or a not-yet-ready cache both surface as errors rather than
//! a cold-path fetch, since the Edge has no store to fetch from — the
//! Sync Client (C9) is the only thing that ever populates C8.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use flagforge_core::Reason;
use flagforge_core::evaluate;
use flagforge_core::model::EnvironmentKey;
use flagforge_core::model::EvaluationContext;
use flagforge_core::model::FlagKey;
use flagforge_core::model::FlagValue;
use flagforge_core::model::Permission;
use flagforge_core::model::ProjectId;
use flagforge_core::model::VariationId;
use serde::Deserialize;
use serde::Serialize;

use crate::auth;
use crate::error::EdgeError;
use crate::server::EdgeState;

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// `{flag_key, user_id?, user_key, attributes?}`.
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

fn evaluate_one(
    state: &EdgeState,
    project_id: &ProjectId,
    environment_key: &EnvironmentKey,
    flag_key: &str,
    context: &EvaluationContext,
) -> Result<EvaluateResponse, EdgeError> {
    let start = Instant::now();
    let flag_key = FlagKey::new(flag_key);
    let key = (project_id.clone(), environment_key.clone(), flag_key.clone());

    let entry = state.cache.get(&key).ok_or_else(|| {
        EdgeError::UpstreamUnavailable(format!("flag {} is not in the local cache", flag_key.as_str()))
    })?;

    let outcome = evaluate(&entry.snapshot.flag, context, entry.snapshot.rollout.as_ref(), &entry.snapshot.segments)?;
    Ok(EvaluateResponse {
        flag_key: flag_key.as_str().to_string(),
        value: outcome.value,
        variation_id: outcome.variation_id,
        reason: outcome.reason,
        matched: outcome.matched,
        evaluation_time_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    })
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// `POST /api/v1/evaluate` — serves from C8 only.
///
/// # Errors
///
/// Returns [`EdgeError::NotReady`] before the first bootstrap snapshot,
/// [`EdgeError::UpstreamUnavailable`] on a cache miss, or [`EdgeError`] on
/// an auth failure.
pub async fn evaluate_handler(
    State(state): State<EdgeState>,
    headers: HeaderMap,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, EdgeError> {
    if !state.cache.is_ready() {
        return Err(EdgeError::NotReady("edge cache has not completed its bootstrap snapshot".to_string()));
    }

    let project_id = project_from_headers(&headers)?;
    let environment_key = environment_from_headers(&headers)?;
    let auth = auth::authenticate(&headers, &state.cache)?;
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
/// Returns [`EdgeError`] on a not-ready cache or auth failure; a per-flag
/// cache miss fails the whole batch, since a partial batch result would
/// hide which flags the Edge has stopped tracking.
pub async fn evaluate_batch_handler(
    State(state): State<EdgeState>,
    headers: HeaderMap,
    Json(request): Json<EvaluateBatchRequest>,
) -> Result<Json<Vec<EvaluateResponse>>, EdgeError> {
    if !state.cache.is_ready() {
        return Err(EdgeError::NotReady("edge cache has not completed its bootstrap snapshot".to_string()));
    }

    let project_id = project_from_headers(&headers)?;
    let environment_key = environment_from_headers(&headers)?;
    let auth = auth::authenticate(&headers, &state.cache)?;
    auth.require_scope(&project_id, &environment_key)?;
    auth.require_permission(Permission::Evaluate)?;

    let context = EvaluationContext { user_key: request.user_key, user_id: request.user_id, attributes: request.attributes };
    let mut responses = Vec::with_capacity(request.flag_keys.len());
    for flag_key in &request.flag_keys {
        responses.push(evaluate_one(&state, &project_id, &environment_key, flag_key, &context)?);
    }
    Ok(Json(responses))
}

/// `GET /healthz` — liveness; always succeeds once the process is serving.
pub async fn healthz() -> &'static str {
    "ok"
}

/// `GET /readyz` — readiness; mirrors the Hub's C6 readiness check,
/// generalized to C8's bootstrap flag.
pub async fn readyz(State(state): State<EdgeState>) -> Result<&'static str, EdgeError> {
    if state.cache.is_ready() {
        Ok("ready")
    } else {
        Err(EdgeError::NotReady("edge cache has not completed its bootstrap snapshot".to_string()))
    }
}

// ============================================================================
// SECTION: Header Helpers
// ============================================================================

fn project_from_headers(headers: &HeaderMap) -> Result<ProjectId, EdgeError> {
    headers
        .get("x-flagforge-project")
        .and_then(|value| value.to_str().ok())
        .map(ProjectId::new)
        .ok_or_else(|| EdgeError::Unauthenticated("missing X-Flagforge-Project header".to_string()))
}

fn environment_from_headers(headers: &HeaderMap) -> Result<EnvironmentKey, EdgeError> {
    headers
        .get("x-flagforge-environment")
        .and_then(|value| value.to_str().ok())
        .map(EnvironmentKey::new)
        .ok_or_else(|| EdgeError::Unauthenticated("missing X-Flagforge-Environment header".to_string()))
}
