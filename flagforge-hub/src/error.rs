// flagforge-hub/src/error.rs
// ============================================================================
// Module: Hub RPC Error
// Description: Maps every Hub-internal failure onto flagforge_core::ApiErrorKind.
// Purpose: Give RPC handlers one error type with a lossless HTTP mapping.
// Dependencies: flagforge-core, axum, thiserror
// ============================================================================

//! ## Overview
//! `RpcError` composes the lower error enums (`StoreError`, `EvalError`,
//! `HashError`) via `#[from]`, matching the teacher's
//! `ControlPlaneError`-composes-`StoreError`/`DispatchError`/`PolicyError`
//! idiom. `IntoResponse` renders the shared `ApiErrorKind` plus a message,
//! so every failure path — regardless of which internal enum produced it —
//! reaches the client in one consistent shape.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use flagforge_core::ApiErrorKind;
use flagforge_core::EvalError;
use flagforge_core::StoreError;
use flagforge_core::hashing::HashError;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Error
// ============================================================================

/// Errors raised by the Hub's RPC handlers.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The underlying flag/API-key store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Evaluation failed against a malformed flag.
    #[error(transparent)]
    Eval(#[from] EvalError),
    /// Fingerprint computation failed.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// The caller's API key or bearer token did not authenticate.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// The caller authenticated but lacks the required permission or scope.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// C6 has not completed its initial preload.
    #[error("not ready: {0}")]
    NotReady(String),
}

impl RpcError {
    /// Maps this error onto the shared, serializable error-kind taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ApiErrorKind {
        match self {
            Self::Store(StoreError::NotFound(_)) => ApiErrorKind::NotFound,
            Self::Store(StoreError::Conflict(_)) => ApiErrorKind::Conflict,
            Self::Store(StoreError::InvalidWrite(_)) => ApiErrorKind::MalformedFlag,
            Self::Store(StoreError::Backend(_)) => ApiErrorKind::Internal,
            Self::Eval(_) => ApiErrorKind::MalformedFlag,
            Self::Hash(_) => ApiErrorKind::Internal,
            Self::Unauthenticated(_) => ApiErrorKind::Unauthenticated,
            Self::Forbidden(_) => ApiErrorKind::Forbidden,
            Self::NotReady(_) => ApiErrorKind::NotReady,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ApiErrorKind,
    message: String,
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody { error: kind, message: self.to_string() };
        (status, Json(body)).into_response()
    }
}
