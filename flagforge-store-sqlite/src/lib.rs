// flagforge-store-sqlite/src/lib.rs
// ============================================================================
// Module: Flagforge SQLite Store
// Description: Durable Flag Store (C3) and API-Key Store (C4) on SQLite.
// Purpose: Provide the reference FlagStore/ApiKeyStore backend for the Hub.
// Dependencies: flagforge-core, rusqlite
// ============================================================================

//! ## Overview
//! `SqliteFlagStore` and `SqliteApiKeyStore` share one `Connection`, guarded
//! by a single mutex, opened once by [`schema::open`]. Both are thin
//! trait implementations over the tables `schema` creates; neither crate
//! in the Hub depends on `rusqlite` directly.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod api_keys;
pub mod flags;
pub mod schema;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use api_keys::SqliteApiKeyStore;
pub use flags::SqliteFlagStore;
pub use schema::SqliteJournalMode;
pub use schema::SqliteStoreConfig;
pub use schema::SqliteStoreError;

// ============================================================================
// SECTION: Combined Open
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use flagforge_core::ChangeSink;

/// Opens one `SQLite` connection and returns both stores sharing it.
///
/// # Errors
///
/// Returns [`SqliteStoreError`] if the database cannot be opened or
/// migrated.
pub fn open_stores(
    config: &SqliteStoreConfig,
    change_sink: Option<Arc<dyn ChangeSink>>,
) -> Result<(SqliteFlagStore, SqliteApiKeyStore), SqliteStoreError> {
    let connection = Arc::new(Mutex::new(schema::open(config)?));
    let flag_store = SqliteFlagStore::from_shared(Arc::clone(&connection), change_sink);
    let api_key_store = SqliteApiKeyStore::new(connection);
    Ok((flag_store, api_key_store))
}
