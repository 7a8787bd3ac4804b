// flagforge-edge/src/auth.rs
// ============================================================================
// Module: Edge Auth
// Description: X-API-Key auth against the locally cached key scopes (C8).
// Purpose: Authenticate SDK callers without a round trip to the Hub.
// Dependencies: flagforge-core, axum
// ============================================================================

//! ## Overview
//! Mirrors the Hub's `X-API-Key` auth (`flagforge_hub::auth`), but looks up
//! scope in the Edge Cache's bounded LRU rather than the durable API Key
//! Store — the Edge never holds a `Box<dyn ApiKeyStore>` of its own.
//! `ApiKeyScope` carries no expiry, so an Edge cannot independently reject
//! an expired key between bootstrap snapshots; an expiring key is revoked
//! the same way any other change reaches an Edge, via the next sync delta
//! or snapshot.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::http::HeaderMap;
use flagforge_core::model::ApiKeyScope;
use flagforge_core::model::EnvironmentKey;
use flagforge_core::model::Permission;
use flagforge_core::model::ProjectId;
use thiserror::Error;

use crate::cache::EdgeCache;
use crate::error::EdgeError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Authentication or authorization errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No recognized credential was presented.
    #[error("missing credential")]
    MissingCredential,
    /// The `X-API-Key` header did not match any cached scope.
    #[error("unknown api key")]
    UnknownApiKey,
    /// The API key's scope does not cover the requested `(project, env)`.
    #[error("api key not scoped to this project/environment")]
    ScopeMismatch,
    /// The API key lacks the permission the RPC requires.
    #[error("api key lacks required permission")]
    MissingPermission,
}

impl From<AuthError> for EdgeError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingCredential | AuthError::UnknownApiKey => Self::Unauthenticated(error.to_string()),
            AuthError::ScopeMismatch | AuthError::MissingPermission => Self::Forbidden(error.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Auth Context
// ============================================================================

/// The authenticated caller's cached scope, attached once [`authenticate`]
/// succeeds.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The cached scope that authenticated this request.
    pub scope: ApiKeyScope,
}

impl AuthContext {
    /// Returns an error unless the key is scoped to `(project_id, environment_key)`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ScopeMismatch`] if the key belongs to a
    /// different project or environment.
    pub fn require_scope(&self, project_id: &ProjectId, environment_key: &EnvironmentKey) -> Result<(), AuthError> {
        if &self.scope.project_id == project_id && &self.scope.environment_key == environment_key {
            Ok(())
        } else {
            Err(AuthError::ScopeMismatch)
        }
    }

    /// Returns an error unless the key carries `permission`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingPermission`] otherwise.
    pub fn require_permission(&self, permission: Permission) -> Result<(), AuthError> {
        if self.scope.permissions.contains(&permission) {
            Ok(())
        } else {
            Err(AuthError::MissingPermission)
        }
    }
}

// ============================================================================
// SECTION: Header Parsing
// ============================================================================

const API_KEY_HEADER: &str = "x-api-key";

/// Authenticates an `X-API-Key` request against the Edge Cache's API key
/// scope LRU.
///
/// # Errors
///
/// Returns [`AuthError`] if the header is missing or the key is not in
/// cache.
pub fn authenticate(headers: &HeaderMap, cache: &EdgeCache) -> Result<AuthContext, AuthError> {
    let plaintext = headers.get(API_KEY_HEADER).and_then(|value| value.to_str().ok()).ok_or(AuthError::MissingCredential)?;

    let hash = flagforge_core::hashing::hash_api_key_plaintext(plaintext);
    let scope = cache.api_key_scope(&hash).ok_or(AuthError::UnknownApiKey)?;

    Ok(AuthContext { scope })
}
