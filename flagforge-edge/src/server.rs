// flagforge-edge/src/server.rs
// ============================================================================
// Module: Edge Server
// Description: Shared state, router wiring, and the Sync Client's spawn.
// Purpose: Tie C8/C9/C11 together into one running axum service.
// Dependencies: axum, flagforge-config, tokio
// ============================================================================

//! ## Overview
//! Mirrors `flagforge_hub::server`: one [`EdgeState`] clone per handler,
//! every field behind it already internally synchronized. Unlike the Hub,
//! this crate has exactly one long-lived task — the Sync Client — rather
//! than one per connected session, since an Edge maintains a single
//! outbound connection to its Hub regardless of how many SDKs it serves.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use axum::routing::post;
use flagforge_config::EdgeConfig;
use tokio::task::JoinHandle;

use crate::cache::EdgeCache;
use crate::rpc;
use crate::sync;

// ============================================================================
// SECTION: Shared State
// ============================================================================

/// Shared, cheaply-cloned state behind every Edge handler.
#[derive(Clone)]
pub struct EdgeState {
    /// The Edge Cache (C8).
    pub cache: Arc<EdgeCache>,
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the Edge's evaluate-only router.
#[must_use]
pub fn build_router(state: EdgeState) -> Router {
    Router::new()
        .route("/healthz", get(rpc::healthz))
        .route("/readyz", get(rpc::readyz))
        .route("/api/v1/evaluate", post(rpc::evaluate_handler))
        .route("/api/v1/evaluate/batch", post(rpc::evaluate_batch_handler))
        .with_state(state)
}

/// Starts the Sync Client as a background task and binds and serves the
/// Edge router on `bind_addr` until the process is signaled to stop.
///
/// # Errors
///
/// Returns a [`std::io::Error`] if the address cannot be bound.
pub async fn serve(bind_addr: &str, config: EdgeConfig, api_key: String, state: EdgeState) -> std::io::Result<()> {
    let sync_handle = spawn_sync_client(Arc::clone(&state.cache), config, api_key);

    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid bind address: {err}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "flagforge-edge listening");
    let result = axum::serve(listener, build_router(state)).await;
    sync_handle.abort();
    result
}

/// Spawns the Sync Client as an independent background task, returning a
/// handle the caller may use to cancel it.
pub fn spawn_sync_client(cache: Arc<EdgeCache>, config: EdgeConfig, api_key: String) -> JoinHandle<()> {
    tokio::spawn(sync::run(cache, config, api_key))
}
