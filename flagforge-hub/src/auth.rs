// flagforge-hub/src/auth.rs
// ============================================================================
// Module: Hub Auth
// Description: JWT-bearer (dashboard) and X-API-Key (SDK/Edge) auth.
// Purpose: Authenticate and scope every RPC call before it touches C6/C3.
// Dependencies: flagforge-core, axum
// ============================================================================

//! ## Overview
//! Generalizes the teacher's bearer-token-vs-mTLS-subject split
//! (`decision-gate-mcp::auth`) into this specification's JWT-bearer (for
//! the dashboard, verified against a configured HMAC secret and issuer) vs.
//! `X-API-Key` (for SDKs and Edges, looked up by salted hash against the
//! API Key Store) split. Every decision is fail-closed: a missing,
//! malformed, expired, or unscoped credential is rejected before a handler
//! runs. [`AuthConfig::mode`] picks which credential the Hub accepts;
//! sync sessions (always Edges) authenticate via [`authenticate_api_key`]
//! directly, since only an API key carries the `id`/`hash` a sync session
//! needs for bookkeeping.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use flagforge_config::AuthConfig;
use flagforge_config::AuthMode;
use flagforge_core::ApiKeyStore;
use flagforge_core::model::ApiKey;
use flagforge_core::model::EnvironmentKey;
use flagforge_core::model::Permission;
use flagforge_core::model::ProjectId;
use jsonwebtoken::Algorithm;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::Validation;
use serde::Deserialize;
use thiserror::Error;

use crate::error::RpcError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Authentication or authorization errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No recognized credential was presented.
    #[error("missing credential")]
    MissingCredential,
    /// The `X-API-Key` header did not match any stored key.
    #[error("unknown api key")]
    UnknownApiKey,
    /// The API key has expired.
    #[error("api key expired")]
    ApiKeyExpired,
    /// The caller's scope does not cover the requested `(project, env)`.
    #[error("credential not scoped to this project/environment")]
    ScopeMismatch,
    /// The caller lacks the permission the RPC requires.
    #[error("credential lacks required permission")]
    MissingPermission,
    /// The bearer JWT was missing, malformed, expired, or failed signature
    /// or issuer verification.
    #[error("invalid bearer token: {0}")]
    InvalidToken(String),
    /// `auth.mode = "jwt"` but `auth.jwt_secret`/`auth.jwt_issuer` are not
    /// configured. [`AuthConfig::validate`] should prevent this from ever
    /// being reachable in a loaded config.
    #[error("jwt auth mode is not fully configured")]
    JwtNotConfigured,
}

impl From<AuthError> for RpcError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingCredential
            | AuthError::UnknownApiKey
            | AuthError::ApiKeyExpired
            | AuthError::InvalidToken(_) => Self::Unauthenticated(error.to_string()),
            AuthError::ScopeMismatch | AuthError::MissingPermission | AuthError::JwtNotConfigured => {
                Self::Forbidden(error.to_string())
            }
        }
    }
}

// ============================================================================
// SECTION: Auth Context
// ============================================================================

/// The authenticated caller's scope and permissions, attached to the
/// request once [`authenticate`] succeeds. Carries only what every RPC
/// handler needs, regardless of which credential kind produced it.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Scoped project.
    pub project_id: ProjectId,
    /// Scoped environment.
    pub environment_key: EnvironmentKey,
    /// Granted permissions.
    pub permissions: Vec<Permission>,
}

impl AuthContext {
    /// Returns an error unless the caller is scoped to `(project_id, environment_key)`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ScopeMismatch`] if the caller is scoped to a
    /// different project or environment.
    pub fn require_scope(&self, project_id: &ProjectId, environment_key: &EnvironmentKey) -> Result<(), AuthError> {
        if &self.project_id == project_id && &self.environment_key == environment_key {
            Ok(())
        } else {
            Err(AuthError::ScopeMismatch)
        }
    }

    /// Returns an error unless the caller carries `permission`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingPermission`] otherwise.
    pub fn require_permission(&self, permission: Permission) -> Result<(), AuthError> {
        if self.permissions.contains(&permission) {
            Ok(())
        } else {
            Err(AuthError::MissingPermission)
        }
    }
}

/// The authenticated Edge/SDK credential, resolved directly against the
/// API Key Store. Kept distinct from [`AuthContext`] because sync sessions
/// need the underlying record's `id` and `hash`, which a JWT credential
/// does not carry.
#[derive(Debug, Clone)]
pub struct ApiKeyAuthContext {
    /// The stored key record that authenticated this request.
    pub api_key: ApiKey,
}

impl ApiKeyAuthContext {
    /// Narrows this credential to the scope/permission shape every RPC
    /// handler consumes.
    #[must_use]
    pub fn into_auth_context(self) -> AuthContext {
        AuthContext {
            project_id: self.api_key.project_id,
            environment_key: self.api_key.environment_key,
            permissions: self.api_key.permissions,
        }
    }
}

// ============================================================================
// SECTION: JWT Claims
// ============================================================================

/// Claims carried by a dashboard-issued bearer JWT. `project_id` and
/// `environment_key` scope the token the same way an API key's own
/// columns scope it; `permissions` mirrors [`ApiKey::permissions`].
#[derive(Debug, Deserialize)]
struct JwtClaims {
    /// Standard expiry claim, seconds since the epoch; enforced by
    /// [`Validation::validate_exp`] (on by default).
    #[allow(dead_code, reason = "required by the JWT wire shape even though jsonwebtoken enforces it internally")]
    exp: usize,
    /// Scoped project.
    project_id: String,
    /// Scoped environment.
    environment_key: String,
    /// Granted permissions.
    #[serde(default)]
    permissions: Vec<Permission>,
}

// ============================================================================
// SECTION: Header Parsing
// ============================================================================

const API_KEY_HEADER: &str = "x-api-key";
const BEARER_PREFIX: &str = "Bearer ";
/// Clock-skew allowance applied to `exp`/`iat` checks, matching the
/// leeway the pack's own JWT verification uses.
const JWT_LEEWAY_SECONDS: u64 = 60;

/// Authenticates a request using whichever credential kind
/// `auth_config.mode` accepts.
///
/// # Errors
///
/// Returns [`AuthError`] if the configured credential is missing, unknown,
/// expired, or fails JWT signature/issuer verification.
pub fn authenticate(headers: &HeaderMap, store: &dyn ApiKeyStore, auth_config: &AuthConfig) -> Result<AuthContext, AuthError> {
    match auth_config.mode {
        AuthMode::ApiKey => authenticate_api_key(headers, store).map(ApiKeyAuthContext::into_auth_context),
        AuthMode::Jwt => authenticate_jwt(headers, auth_config),
    }
}

/// Authenticates an `X-API-Key` request against the API Key Store.
/// Used directly (never through [`authenticate`]) by the sync-session
/// handlers, which always speak to Edges and need the resolved `id`/`hash`.
///
/// # Errors
///
/// Returns [`AuthError`] if the header is missing, the key is unknown, or
/// the key has expired.
pub fn authenticate_api_key(headers: &HeaderMap, store: &dyn ApiKeyStore) -> Result<ApiKeyAuthContext, AuthError> {
    let plaintext = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingCredential)?;

    let hash = flagforge_core::hashing::hash_api_key_plaintext(plaintext);
    let api_key = store.get_api_key(&hash).map_err(|_| AuthError::UnknownApiKey)?.ok_or(AuthError::UnknownApiKey)?;

    if api_key.is_expired(flagforge_core::model::Timestamp::now()) {
        return Err(AuthError::ApiKeyExpired);
    }

    Ok(ApiKeyAuthContext { api_key })
}

/// Authenticates an `Authorization: Bearer <jwt>` request, verifying the
/// signature with `auth_config.jwt_secret` (HMAC-SHA256) and the `iss`
/// claim against `auth_config.jwt_issuer`.
///
/// # Errors
///
/// Returns [`AuthError::MissingCredential`] if the header is absent or not
/// a bearer token, [`AuthError::JwtNotConfigured`] if JWT mode is selected
/// without a secret/issuer configured, or [`AuthError::InvalidToken`] if
/// the token's signature, issuer, or expiry do not check out.
fn authenticate_jwt(headers: &HeaderMap, auth_config: &AuthConfig) -> Result<AuthContext, AuthError> {
    let header_value = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()).ok_or(AuthError::MissingCredential)?;
    let token = header_value.strip_prefix(BEARER_PREFIX).ok_or(AuthError::MissingCredential)?;

    let secret = auth_config.jwt_secret.as_deref().ok_or(AuthError::JwtNotConfigured)?;
    let issuer = auth_config.jwt_issuer.as_deref().ok_or(AuthError::JwtNotConfigured)?;

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[issuer]);
    validation.leeway = JWT_LEEWAY_SECONDS;

    let token_data =
        jsonwebtoken::decode::<JwtClaims>(token, &decoding_key, &validation).map_err(|err| AuthError::InvalidToken(err.to_string()))?;

    Ok(AuthContext {
        project_id: ProjectId::new(token_data.claims.project_id),
        environment_key: EnvironmentKey::new(token_data.claims.environment_key),
        permissions: token_data.claims.permissions,
    })
}
