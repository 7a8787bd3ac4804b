// flagforge-store-sqlite/src/schema.rs
// ============================================================================
// Module: SQLite Schema
// Description: Connection setup, pragmas, and schema versioning.
// Purpose: Open a durable, WAL-mode SQLite connection for the Flag Store.
// Dependencies: rusqlite, serde
// ============================================================================

//! ## Overview
//! Every store shares one connection, guarded by a mutex, matching the
//! teacher's `SqliteRunStateStore` pattern: a single schema-version row in
//! `store_meta` gates startup, rather than a migrations table per change —
//! appropriate at this crate's scale.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Current schema version. Bump and add a migration arm in
/// [`initialize_schema`] when the schema changes.
pub const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout, in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended; allows concurrent readers).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the pragma value for this mode.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// Configuration for the `SQLite`-backed stores.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while opening or migrating the store.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Filesystem error opening the database or its parent directory.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// The `SQLite` engine reported an error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// The on-disk schema version is newer than this binary understands.
    #[error("sqlite store schema version mismatch: on-disk={on_disk}, supported={supported}")]
    VersionMismatch {
        /// Version found on disk.
        on_disk: i64,
        /// Version this binary knows how to migrate to.
        supported: i64,
    },
    /// A schema migration left the database in a state this binary does
    /// not recognize — surfaced to the CLI as exit code 3.
    #[error("sqlite store dirty migration: {0}")]
    DirtyMigration(String),
}

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Opens a connection, applies pragmas, and runs schema migrations.
///
/// # Errors
///
/// Returns [`SqliteStoreError`] if the path is unusable, the connection
/// cannot be opened, or the on-disk schema is ahead of what this binary
/// supports.
pub fn open(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    ensure_parent_dir(&config.path)?;
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let mut connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    initialize_schema(&mut connection)?;
    Ok(connection)
}

fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Creates the schema on first open, or validates the version on
/// subsequent opens.
///
/// # Errors
///
/// Returns [`SqliteStoreError::VersionMismatch`] if the on-disk schema is
/// newer than [`SCHEMA_VERSION`], or [`SqliteStoreError::DirtyMigration`]
/// if `store_meta` holds more than one row.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let versions: Vec<i64> = {
        let mut stmt = tx
            .prepare("SELECT version FROM store_meta")
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let rows = stmt
            .query_map(params![], |row| row.get(0))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        rows.collect::<Result<_, _>>().map_err(|err| SqliteStoreError::Db(err.to_string()))?
    };
    match versions.as_slice() {
        [] => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            create_tables(&tx)?;
        }
        [version] if *version == SCHEMA_VERSION => {}
        [version] if *version > SCHEMA_VERSION => {
            return Err(SqliteStoreError::VersionMismatch {
                on_disk: *version,
                supported: SCHEMA_VERSION,
            });
        }
        [version] => {
            return Err(SqliteStoreError::DirtyMigration(format!(
                "no migration path from version {version} to {SCHEMA_VERSION}"
            )));
        }
        _ => {
            return Err(SqliteStoreError::DirtyMigration(
                "store_meta holds more than one row".to_string(),
            ));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))
}

fn create_tables(tx: &rusqlite::Transaction<'_>) -> Result<(), SqliteStoreError> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS flags (
            project_id TEXT NOT NULL,
            environment_key TEXT NOT NULL,
            flag_key TEXT NOT NULL,
            flag_json BLOB NOT NULL,
            enabled INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (project_id, environment_key, flag_key)
        );
        CREATE TABLE IF NOT EXISTS rollouts (
            project_id TEXT NOT NULL,
            environment_key TEXT NOT NULL,
            flag_key TEXT NOT NULL,
            rollout_id TEXT NOT NULL,
            state TEXT NOT NULL,
            rollout_json BLOB NOT NULL,
            PRIMARY KEY (project_id, environment_key, flag_key)
        );
        CREATE TABLE IF NOT EXISTS segments (
            project_id TEXT NOT NULL,
            segment_id TEXT NOT NULL,
            segment_json BLOB NOT NULL,
            PRIMARY KEY (project_id, segment_id)
        );
        CREATE TABLE IF NOT EXISTS api_keys (
            key_id TEXT NOT NULL PRIMARY KEY,
            project_id TEXT NOT NULL,
            environment_key TEXT NOT NULL,
            hash TEXT NOT NULL UNIQUE,
            visible_prefix TEXT NOT NULL,
            permissions_json BLOB NOT NULL,
            expires_at TEXT,
            last_used_at TEXT,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS change_versions (
            project_id TEXT NOT NULL,
            environment_key TEXT NOT NULL,
            version INTEGER NOT NULL,
            PRIMARY KEY (project_id, environment_key)
        );",
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))
}

/// Allocates the next monotonic `(project, environment)` change version
/// within an open transaction.
///
/// # Errors
///
/// Returns [`SqliteStoreError::Db`] on an underlying `SQLite` failure.
pub fn next_change_version(
    tx: &rusqlite::Transaction<'_>,
    project_id: &str,
    environment_key: &str,
) -> Result<u64, SqliteStoreError> {
    let current: Option<i64> = tx
        .query_row(
            "SELECT version FROM change_versions WHERE project_id = ?1 AND environment_key = ?2",
            params![project_id, environment_key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let next = current.unwrap_or(0).saturating_add(1);
    tx.execute(
        "INSERT INTO change_versions (project_id, environment_key, version) VALUES (?1, ?2, ?3)
         ON CONFLICT(project_id, environment_key) DO UPDATE SET version = excluded.version",
        params![project_id, environment_key, next],
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(u64::try_from(next).unwrap_or(u64::MAX))
}

/// Reads the highest `(project, environment)` change version allocated so
/// far, without allocating a new one. Returns `0` if no mutation has ever
/// been recorded for the topic.
///
/// # Errors
///
/// Returns [`SqliteStoreError::Db`] on an underlying `SQLite` failure.
pub fn current_change_version(
    connection: &rusqlite::Connection,
    project_id: &str,
    environment_key: &str,
) -> Result<u64, SqliteStoreError> {
    let current: Option<i64> = connection
        .query_row(
            "SELECT version FROM change_versions WHERE project_id = ?1 AND environment_key = ?2",
            params![project_id, environment_key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(u64::try_from(current.unwrap_or(0)).unwrap_or(u64::MAX))
}
