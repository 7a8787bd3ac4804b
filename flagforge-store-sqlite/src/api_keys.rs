// flagforge-store-sqlite/src/api_keys.rs
// ============================================================================
// Module: SQLite API Key Store
// Description: Durable ApiKeyStore backed by SQLite.
// Purpose: Generate, hash, and look up scoped API keys.
// Dependencies: flagforge-core, rusqlite, rand, base64
// ============================================================================

//! ## Overview
//! A key's identity is 256 bits of randomness, base64url-encoded as the
//! plaintext a caller sends as `X-API-Key`. Only a salted SHA-256 hash of
//! that plaintext is persisted; the first 8 characters of the plaintext
//! are kept separately as a display prefix so dashboards can list keys
//! without ever re-deriving the secret.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use flagforge_core::ApiKeyStore;
use flagforge_core::StoreError;
use flagforge_core::model::ApiKey;
use flagforge_core::model::ApiKeyId;
use flagforge_core::model::EnvironmentKey;
use flagforge_core::model::Permission;
use flagforge_core::model::PlaintextApiKey;
use flagforge_core::model::ProjectId;
use flagforge_core::model::Timestamp;
use flagforge_core::hashing::hash_api_key_plaintext;
use rand::RngCore;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

// ============================================================================
// SECTION: Constants
// ============================================================================

const KEY_RANDOM_BYTES: usize = 32;
const VISIBLE_PREFIX_LEN: usize = 8;

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed [`ApiKeyStore`].
#[derive(Clone)]
pub struct SqliteApiKeyStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteApiKeyStore {
    /// Wraps an existing shared connection, typically the same one a
    /// [`crate::flags::SqliteFlagStore`] was built from.
    #[must_use]
    pub const fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.connection.lock().map_err(|_| StoreError::Backend("connection mutex poisoned".to_string()))
    }
}

/// Expects columns in the order: `key_id, project_id, environment_key,
/// hash, visible_prefix, permissions_json, expires_at, last_used_at,
/// created_at`.
fn row_to_api_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApiKey> {
    let permissions_json: Vec<u8> = row.get(5)?;
    let permissions: Vec<Permission> = serde_json::from_slice(&permissions_json).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Blob, Box::new(err))
    })?;
    let expires_at: Option<String> = row.get(6)?;
    let last_used_at: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;
    Ok(ApiKey {
        id: ApiKeyId::new(row.get::<_, String>(0)?),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        environment_key: EnvironmentKey::new(row.get::<_, String>(2)?),
        hash: row.get(3)?,
        visible_prefix: row.get(4)?,
        permissions,
        expires_at: expires_at.and_then(|value| Timestamp::try_from(value).ok()),
        last_used_at: last_used_at.and_then(|value| Timestamp::try_from(value).ok()),
        created_at: Timestamp::try_from(created_at).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(err))
        })?,
    })
}

impl ApiKeyStore for SqliteApiKeyStore {
    fn get_api_key(&self, hash: &str) -> Result<Option<ApiKey>, StoreError> {
        let guard = self.lock()?;
        guard
            .query_row(
                "SELECT key_id, project_id, environment_key, hash, visible_prefix, \
                 permissions_json, expires_at, last_used_at, created_at FROM api_keys WHERE hash \
                 = ?1",
                params![hash],
                row_to_api_key,
            )
            .optional()
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    fn create_api_key(
        &self,
        project_id: &ProjectId,
        environment_key: &EnvironmentKey,
        permissions: &[Permission],
        expires_at: Option<Timestamp>,
    ) -> Result<PlaintextApiKey, StoreError> {
        let mut random_bytes = [0u8; KEY_RANDOM_BYTES];
        rand::thread_rng().fill_bytes(&mut random_bytes);
        let plaintext = URL_SAFE_NO_PAD.encode(random_bytes);
        let hash = hash_api_key_plaintext(&plaintext);
        let visible_prefix: String = plaintext.chars().take(VISIBLE_PREFIX_LEN).collect();
        let key_id = ApiKeyId::new(uuid::Uuid::new_v4().to_string());
        let created_at = Timestamp::now();
        let permissions_json =
            serde_json::to_vec(permissions).map_err(|err| StoreError::Backend(err.to_string()))?;

        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO api_keys (key_id, project_id, environment_key, hash, \
                 visible_prefix, permissions_json, expires_at, last_used_at, created_at) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8)",
                params![
                    key_id.as_str(),
                    project_id.as_str(),
                    environment_key.as_str(),
                    hash,
                    visible_prefix,
                    permissions_json,
                    expires_at.map(String::from),
                    String::from(created_at),
                ],
            )
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        let record = ApiKey {
            id: key_id,
            project_id: project_id.clone(),
            environment_key: environment_key.clone(),
            hash,
            visible_prefix,
            permissions: permissions.to_vec(),
            expires_at,
            last_used_at: None,
            created_at,
        };
        Ok(PlaintextApiKey { record, plaintext })
    }
}
