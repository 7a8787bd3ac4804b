// flagforge-hub/src/server.rs
// ============================================================================
// Module: Hub Server
// Description: Shared state, router wiring, and the Sync Server's WS/SSE
//              connection handlers.
// Purpose: Tie C5/C6/C10/C11 together into one running axum service.
// Dependencies: axum, flagforge-broker, flagforge-config, tokio
// ============================================================================

//! ## Overview
//! One [`AppState`] is cloned into every handler; every field behind it is
//! already internally synchronized (`RwLock`, `ArcSwap`, `Mutex`, or a
//! lock-free broadcast channel), so the clone is cheap and handlers never
//! need their own locking. The WebSocket and SSE sync handlers below are
//! this crate's only long-lived tasks: everything else is request/response.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::response::Sse;
use axum::response::sse::Event;
use axum::response::sse::KeepAlive;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use flagforge_broker::BrokerMessage;
use flagforge_broker::ChangeBroker;
use flagforge_config::FlagforgeConfig;
use flagforge_core::ApiKeyStore;
use flagforge_core::FlagStore;
use flagforge_core::model::ApiKeyScope;
use futures_util::Stream;
use futures_util::StreamExt;

use crate::auth;
use crate::cache::PreloadedTable;
use crate::cache::ResponseCache;
use crate::rpc;
use crate::sync::DEFAULT_HEARTBEAT_INTERVAL;
use crate::sync::MAX_MISSED_HEARTBEATS;
use crate::sync::SessionRegistry;
use crate::sync::SyncMessage;
use crate::sync::build_delta_message;
use crate::sync::build_snapshot;

// ============================================================================
// SECTION: Shared State
// ============================================================================

/// Shared, cheaply-cloned state behind every handler.
#[derive(Clone)]
pub struct AppState {
    /// Durable flag/segment/rollout repository.
    pub flag_store: Arc<dyn FlagStore>,
    /// Durable API key repository.
    pub api_key_store: Arc<dyn ApiKeyStore>,
    /// Per-`(project, environment)` change broker (C7).
    pub broker: Arc<ChangeBroker>,
    /// The Response Cache (C5).
    pub response_cache: Arc<ResponseCache>,
    /// The Preloaded Table (C6).
    pub preloaded_table: Arc<PreloadedTable>,
    /// Live sync session registry, exposed via the admin RPC.
    pub session_registry: Arc<SessionRegistry>,
    /// Authentication settings, consulted on every RPC call.
    pub auth: flagforge_config::AuthConfig,
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the full Hub router.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(rpc::healthz))
        .route("/readyz", get(rpc::readyz))
        .route("/api/v1/evaluate", post(rpc::evaluate_handler))
        .route("/api/v1/evaluate/batch", post(rpc::evaluate_batch_handler))
        .route("/api/v1/evaluate/ultra", post(rpc::evaluate_ultra_handler))
        .route("/api/v1/flags", get(rpc::list_flags_handler))
        .route("/api/v1/flags/{key}", put(rpc::upsert_flag_handler))
        .route("/api/v1/flags/{key}/toggle", post(rpc::toggle_flag_handler))
        .route("/api/v1/admin/sessions", get(rpc::list_sessions_handler))
        .route("/sync/ws", get(sync_ws_handler))
        .route("/sync/sse", get(sync_sse_handler))
        .route("/sync/ping", post(sync_ping_handler))
        .with_state(state)
}

/// Binds and serves the Hub router on `bind_addr` until the process is
/// signaled to stop.
///
/// # Errors
///
/// Returns a [`std::io::Error`] if the address cannot be bound.
pub async fn serve(config: &FlagforgeConfig, state: AppState) -> std::io::Result<()> {
    let addr: SocketAddr = config.server.bind_addr.parse().map_err(|err| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid bind address: {err}"))
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "flagforge-hub listening");
    axum::serve(listener, build_router(state)).await
}

// ============================================================================
// SECTION: Sync — WebSocket
// ============================================================================

async fn sync_ws_handler(State(state): State<AppState>, headers: HeaderMap, ws: WebSocketUpgrade) -> impl IntoResponse {
    match auth::authenticate_api_key(&headers, state.api_key_store.as_ref()) {
        Ok(auth_context) => ws.on_upgrade(move |socket| run_ws_session(socket, state, auth_context)),
        Err(error) => crate::error::RpcError::from(error).into_response(),
    }
}

async fn run_ws_session(mut socket: WebSocket, state: AppState, auth_context: auth::ApiKeyAuthContext) {
    let project_id = auth_context.api_key.project_id.clone();
    let environment_key = auth_context.api_key.environment_key.clone();
    let client_id = auth_context.api_key.id.as_str().to_string();

    let mut subscription = match state.broker.subscribe(&project_id, &environment_key) {
        Ok(subscription) => subscription,
        Err(error) => {
            tracing::error!(%error, "failed to subscribe sync session to change broker");
            return;
        }
    };

    let scope = ApiKeyScope {
        id: auth_context.api_key.id.clone(),
        project_id: project_id.clone(),
        environment_key: environment_key.clone(),
        permissions: auth_context.api_key.permissions.clone(),
        hash: auth_context.api_key.hash.clone(),
    };
    let broker_version = match state.flag_store.current_change_version(&project_id, &environment_key) {
        Ok(version) => version,
        Err(error) => {
            tracing::error!(%error, "failed to read current change version for sync bootstrap");
            return;
        }
    };
    let snapshot = match build_snapshot(state.flag_store.as_ref(), &project_id, &environment_key, broker_version, vec![scope]) {
        Ok(snapshot) => snapshot,
        Err(error) => {
            tracing::error!(%error, "failed to build sync bootstrap snapshot");
            return;
        }
    };
    if !send_ws_message(&mut socket, &state, 0, &snapshot).await {
        return;
    }

    let session_id = state.session_registry.register(project_id, environment_key, client_id);
    let mut heartbeat = tokio::time::interval(DEFAULT_HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            message = subscription.recv() => {
                let Some(message) = message else { break };
                let sync_message = match message {
                    BrokerMessage::Delta(event) => match build_delta_message(state.flag_store.as_ref(), &event) {
                        Ok(sync_message) => sync_message,
                        Err(error) => {
                            tracing::error!(%error, "failed to build sync delta message");
                            break;
                        }
                    },
                    BrokerMessage::ResyncRequired => SyncMessage::Resync { reason: "subscriber lagged the change broker buffer".to_string() },
                };
                if !send_ws_message(&mut socket, &state, session_id, &sync_message).await {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                let ping = SyncMessage::Ping { ts: flagforge_core::model::Timestamp::now() };
                if !send_ws_message(&mut socket, &state, session_id, &ping).await {
                    break;
                }
                let missed = state.session_registry.record_missed_heartbeat(session_id);
                if missed.is_some_and(|missed| missed >= MAX_MISSED_HEARTBEATS) {
                    tracing::warn!(session_id, "sync session missed too many heartbeats, tearing down");
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Pong(_) | Message::Text(_))) => {
                        state.session_registry.record_heartbeat(session_id);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::warn!(%error, "sync websocket read error");
                        break;
                    }
                }
            }
        }
    }

    state.session_registry.remove(session_id);
}

async fn send_ws_message(socket: &mut WebSocket, state: &AppState, session_id: crate::sync::SessionId, message: &SyncMessage) -> bool {
    let Ok(bytes) = serde_json::to_vec(message) else { return false };
    let len = bytes.len() as u64;
    if socket.send(Message::Text(String::from_utf8_lossy(&bytes).into_owned().into())).await.is_err() {
        return false;
    }
    state.session_registry.record_bytes_sent(session_id, len);
    true
}

// ============================================================================
// SECTION: Sync — SSE
// ============================================================================

async fn sync_sse_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, crate::error::RpcError> {
    let auth_context = auth::authenticate_api_key(&headers, state.api_key_store.as_ref())?;
    let project_id = auth_context.api_key.project_id.clone();
    let environment_key = auth_context.api_key.environment_key.clone();
    let client_id = auth_context.api_key.id.as_str().to_string();

    let scope = ApiKeyScope {
        id: auth_context.api_key.id.clone(),
        project_id: project_id.clone(),
        environment_key: environment_key.clone(),
        permissions: auth_context.api_key.permissions.clone(),
        hash: auth_context.api_key.hash.clone(),
    };
    let broker_version = state.flag_store.current_change_version(&project_id, &environment_key)?;
    let snapshot = build_snapshot(state.flag_store.as_ref(), &project_id, &environment_key, broker_version, vec![scope])?;

    let mut subscription = state
        .broker
        .subscribe(&project_id, &environment_key)
        .map_err(|error| crate::error::RpcError::Unauthenticated(error.to_string()))?;
    let session_id = state.session_registry.register(project_id, environment_key, client_id);
    let registry = Arc::clone(&state.session_registry);

    let flag_store = Arc::clone(&state.flag_store);
    let initial = futures_util::stream::once(async move { sse_event(&snapshot) });
    let tail = futures_util::stream::unfold((subscription, registry, session_id, flag_store), move |(mut subscription, registry, session_id, flag_store)| async move {
        let message = subscription.recv().await?;
        registry.record_heartbeat(session_id);
        let sync_message = match message {
            BrokerMessage::Delta(event) => match build_delta_message(flag_store.as_ref(), &event) {
                Ok(sync_message) => sync_message,
                Err(error) => {
                    tracing::error!(%error, "failed to build sync delta message");
                    SyncMessage::Resync { reason: "failed to resolve delta payload".to_string() }
                }
            },
            BrokerMessage::ResyncRequired => SyncMessage::Resync { reason: "subscriber lagged the change broker buffer".to_string() },
        };
        Some((sse_event(&sync_message), (subscription, registry, session_id, flag_store)))
    });

    Ok(Sse::new(initial.chain(tail)).keep_alive(KeepAlive::new().interval(DEFAULT_HEARTBEAT_INTERVAL)))
}

fn sse_event(message: &SyncMessage) -> Result<Event, std::convert::Infallible> {
    let data = serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string());
    Ok(Event::default().data(data))
}

/// `POST /sync/ping` — the SSE transport's heartbeat, since SSE has no
/// client-to-server frame of its own. Liveness-only: correlating a ping to
/// a specific [`crate::sync::SessionId`] would require the client to carry
/// a session token, which the wire format does not yet define.
async fn sync_ping_handler(State(_state): State<AppState>) -> &'static str {
    "pong"
}
