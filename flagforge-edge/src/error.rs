// flagforge-edge/src/error.rs
// ============================================================================
// Module: Edge RPC Error
// Description: Maps every Edge-internal failure onto flagforge_core::ApiErrorKind.
// Purpose: Give the evaluate-only RPC subset one error type with a lossless
//          HTTP mapping, mirroring the Hub's RpcError.
// Dependencies: flagforge-core, axum, thiserror
// ============================================================================

//! ## Overview
//! Smaller than the Hub's `RpcError` since the Edge never mutates a store:
//! there is no `StoreError` variant. In its place, `NoCachedValue` covers
//! the case specific to a data-plane relay — a flag simply isn't (yet) in
//! C8 — and `UpstreamUnavailable` covers the case where C8 was never
//! populated at all and the Sync Client cannot reach the Hub to fix that.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use flagforge_core::ApiErrorKind;
use flagforge_core::EvalError;
use flagforge_core::hashing::HashError;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Error
// ============================================================================

/// Errors raised by the Edge's evaluate-only RPC subset.
#[derive(Debug, Error)]
pub enum EdgeError {
    /// Evaluation failed against a cached, but malformed, flag.
    #[error(transparent)]
    Eval(#[from] EvalError),
    /// Fingerprint computation failed.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// The caller's API key did not match any cached scope.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// The caller authenticated but lacks the required permission.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// C8 has not completed its first bootstrap snapshot.
    #[error("not ready: {0}")]
    NotReady(String),
    /// The requested flag is not present in C8, and the Hub could not be
    /// reached to resolve it.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl EdgeError {
    /// Maps this error onto the shared, serializable error-kind taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ApiErrorKind {
        match self {
            Self::Eval(_) => ApiErrorKind::MalformedFlag,
            Self::Hash(_) => ApiErrorKind::Internal,
            Self::Unauthenticated(_) => ApiErrorKind::Unauthenticated,
            Self::Forbidden(_) => ApiErrorKind::Forbidden,
            Self::NotReady(_) => ApiErrorKind::NotReady,
            Self::UpstreamUnavailable(_) => ApiErrorKind::UpstreamUnavailable,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ApiErrorKind,
    message: String,
}

impl IntoResponse for EdgeError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody { error: kind, message: self.to_string() };
        (status, Json(body)).into_response()
    }
}
