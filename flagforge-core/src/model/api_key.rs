// flagforge-core/src/model/api_key.rs
// ============================================================================
// Module: Flagforge API Keys
// Description: Hashed API key records scoped to (project, environment).
// Purpose: Authenticate and scope RPC and sync-protocol callers.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! An API key's identity is 256 bits of randomness; it is stored only as a
//! salted hash plus a short visible prefix. Plaintext is returned exactly
//! once, at creation time (`flagforge_store_sqlite::ApiKeyStoreImpl::create`),
//! and never persisted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::model::ids::ApiKeyId;
use crate::model::ids::EnvironmentKey;
use crate::model::ids::ProjectId;
use crate::model::time::Timestamp;

// ============================================================================
// SECTION: Permission
// ============================================================================

/// A single capability an API key may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// May read flag/segment/rollout definitions.
    Read,
    /// May call evaluation RPCs.
    Evaluate,
    /// May mutate flags/segments/rollouts.
    Write,
    /// May manage API keys and project/environment settings.
    Admin,
}

// ============================================================================
// SECTION: API Key
// ============================================================================

/// A durable, hashed API key record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Key identifier.
    pub id: ApiKeyId,
    /// Scoped project.
    pub project_id: ProjectId,
    /// Scoped environment.
    pub environment_key: EnvironmentKey,
    /// Salted SHA-256 hash of the plaintext key, hex-encoded.
    pub hash: String,
    /// First 8 characters of the plaintext, kept for dashboard display.
    pub visible_prefix: String,
    /// Granted permissions.
    pub permissions: Vec<Permission>,
    /// Optional expiry; an expired key authenticates as
    /// `UNAUTHENTICATED`.
    pub expires_at: Option<Timestamp>,
    /// Last time this key successfully authenticated.
    pub last_used_at: Option<Timestamp>,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

impl ApiKey {
    /// Returns `true` if the key carries `permission`.
    #[must_use]
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Returns `true` if the key is expired as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expiry| expiry < now)
    }

    /// Returns `true` if this key is scoped to `(project, environment)`.
    #[must_use]
    pub fn is_scoped_to(&self, project_id: &ProjectId, environment_key: &EnvironmentKey) -> bool {
        &self.project_id == project_id && &self.environment_key == environment_key
    }
}

/// The compact scope a key resolves to after authentication — the shape
/// streamed to Edges as part of the sync snapshot (`apiKeys` in the wire
/// format). Never the plaintext: `hash` is the same salted SHA-256 already
/// stored by the Flag Store, present here so an Edge can build its own
/// `apiKeyHash -> scope` cache (C8) without a round trip to the Hub for
/// every request. This is an internal Hub-Edge sync detail, never surfaced
/// by a user-facing listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyScope {
    /// Key identifier.
    pub id: ApiKeyId,
    /// Scoped project.
    pub project_id: ProjectId,
    /// Scoped environment.
    pub environment_key: EnvironmentKey,
    /// Granted permissions.
    pub permissions: Vec<Permission>,
    /// Salted SHA-256 hash of the plaintext key, hex-encoded.
    pub hash: String,
}

/// A freshly generated API key: returned exactly once, at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaintextApiKey {
    /// The durable record (hash, scope, metadata).
    pub record: ApiKey,
    /// The plaintext secret. The caller must display or store this
    /// immediately; it cannot be recovered afterward.
    pub plaintext: String,
}
