// flagforge-config/src/config.rs
// ============================================================================
// Module: Flagforge Configuration Model
// Description: Top-level config struct, loading, and validation.
// Purpose: A single TOML file configures the Hub, Edge, and CLI binaries.
// Dependencies: serde, toml, flagforge-store-sqlite
// ============================================================================

//! ## Overview
//! [`FlagforgeConfig`] mirrors the teacher's `DecisionGateConfig` shape: one
//! top-level struct with `#[serde(default)]` nested sub-configs, loaded by
//! [`FlagforgeConfig::load`] and checked by [`FlagforgeConfig::validate`]
//! before any binary acts on it. Every bound referenced by `validate` is a
//! named constant in this module, not a literal.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use flagforge_store_sqlite::SqliteStoreConfig;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable overriding the config file path.
const CONFIG_ENV_VAR: &str = "FLAGFORGE_CONFIG";
/// Default config file name, resolved relative to the current directory.
const DEFAULT_CONFIG_NAME: &str = "flagforge.toml";
/// Hard ceiling on the config file's size, to bound parse cost.
const MAX_CONFIG_FILE_BYTES: u64 = 1_048_576;
/// Hard ceiling on a config path's total length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Hard ceiling on a single path component's length.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;

const MIN_CACHE_SHARD_COUNT: usize = 1;
const MAX_CACHE_SHARD_COUNT: usize = 256;
const MIN_RPC_TIMEOUT_MS: u64 = 50;
const MAX_RPC_TIMEOUT_MS: u64 = 60_000;
const MIN_BACKOFF_MS: u64 = 50;
const MAX_BACKOFF_MS: u64 = 300_000;
const MIN_EDGE_CACHE_CAPACITY: usize = 1;
const MAX_EDGE_CACHE_CAPACITY: usize = 1_000_000;
const MIN_JWT_SECRET_LENGTH: usize = 16;

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

const fn default_cache_shard_count() -> usize {
    16
}

const fn default_rebuild_tick_ms() -> u64 {
    1_000
}

const fn default_broker_channel_capacity() -> usize {
    1_024
}

const fn default_rpc_timeout_ms() -> u64 {
    2_000
}

const fn default_reconnect_initial_backoff_ms() -> u64 {
    200
}

const fn default_reconnect_max_backoff_ms() -> u64 {
    30_000
}

const fn default_edge_cache_capacity() -> usize {
    10_000
}

fn default_hub_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// SECTION: Top-Level Config
// ============================================================================

/// Root configuration shared by `flagforge-hub`, `flagforge-edge`, and
/// `flagforge-cli`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlagforgeConfig {
    /// Hub HTTP/WS/SSE server settings.
    pub server: ServerConfig,
    /// SQLite-backed flag and API key store settings.
    pub store: SqliteStoreConfig,
    /// Change Broker (C7) settings.
    pub broker: BrokerConfig,
    /// Response Cache (C5) and Preloaded Table (C6) settings.
    pub cache: CacheConfig,
    /// RPC Surface (C11) settings shared by Hub and Edge.
    pub rpc: RpcConfig,
    /// Edge (C8/C9) settings.
    pub edge: EdgeConfig,
    /// Authentication settings for the RPC Surface.
    pub auth: AuthConfig,
    /// Structured logging settings.
    pub logging: LoggingConfig,
}

impl Default for FlagforgeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: SqliteStoreConfig { path: PathBuf::from("flagforge.sqlite3"), busy_timeout_ms: 5_000, journal_mode: flagforge_store_sqlite::SqliteJournalMode::default() },
            broker: BrokerConfig::default(),
            cache: CacheConfig::default(),
            rpc: RpcConfig::default(),
            edge: EdgeConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FlagforgeConfig {
    /// Loads configuration from `path`, or from the `FLAGFORGE_CONFIG`
    /// environment variable, or from `flagforge.toml` in the current
    /// directory if neither is given.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the path cannot be resolved, the file is
    /// too large, the file cannot be read or is not valid UTF-8, the TOML
    /// cannot be parsed, or the parsed config fails [`Self::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;

        let metadata = fs::metadata(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if metadata.len() > MAX_CONFIG_FILE_BYTES {
            return Err(ConfigError::Invalid(format!(
                "config file exceeds max size of {MAX_CONFIG_FILE_BYTES} bytes"
            )));
        }

        let contents = fs::read_to_string(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        let mut config: Self = toml::from_str(&contents).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every sub-config against its own bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violated
    /// constraint.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.broker.validate()?;
        self.cache.validate()?;
        self.rpc.validate()?;
        self.edge.validate()?;
        self.auth.validate()?;
        self.logging.validate()?;
        validate_path_string("store.path", &self.store.path.to_string_lossy())?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Server (Hub) Config
// ============================================================================

/// Hub HTTP/WS/SSE server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the Hub binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: default_bind_addr() }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("server.bind_addr must be non-empty".to_string()));
        }
        if self.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "server.bind_addr {:?} is not a valid socket address",
                self.bind_addr
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Broker Config
// ============================================================================

/// Change Broker (C7) settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Per-topic bounded channel capacity (`bufferSize`).
    #[serde(default = "default_broker_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { channel_capacity: default_broker_channel_capacity() }
    }
}

impl BrokerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("broker.channel_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Cache Config
// ============================================================================

/// Response Cache (C5) and Preloaded Table (C6) settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of shards in the Hub's Response Cache.
    #[serde(default = "default_cache_shard_count")]
    pub shard_count: usize,
    /// Interval, in milliseconds, between Preloaded Table rebuild ticks.
    #[serde(default = "default_rebuild_tick_ms")]
    pub rebuild_tick_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { shard_count: default_cache_shard_count(), rebuild_tick_ms: default_rebuild_tick_ms() }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CACHE_SHARD_COUNT..=MAX_CACHE_SHARD_COUNT).contains(&self.shard_count) {
            return Err(ConfigError::Invalid(format!(
                "cache.shard_count must be between {MIN_CACHE_SHARD_COUNT} and {MAX_CACHE_SHARD_COUNT}"
            )));
        }
        if self.rebuild_tick_ms == 0 {
            return Err(ConfigError::Invalid("cache.rebuild_tick_ms must be at least 1".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: RPC Config
// ============================================================================

/// RPC Surface (C11) settings shared by Hub and Edge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Per-RPC deadline, in milliseconds.
    #[serde(default = "default_rpc_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self { request_timeout_ms: default_rpc_timeout_ms() }
    }
}

impl RpcConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_RPC_TIMEOUT_MS..=MAX_RPC_TIMEOUT_MS).contains(&self.request_timeout_ms) {
            return Err(ConfigError::Invalid(format!(
                "rpc.request_timeout_ms must be between {MIN_RPC_TIMEOUT_MS} and {MAX_RPC_TIMEOUT_MS}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Edge Config
// ============================================================================

/// Transport the Edge uses to stream changes from the Hub's Sync Server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EdgeTransport {
    /// Server-Sent Events, the default.
    #[default]
    Sse,
    /// `WebSocket`.
    WebSocket,
}

/// Edge (C8/C9) settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Base URL of the Hub the Edge syncs from.
    #[serde(default = "default_hub_url")]
    pub hub_url: String,
    /// Transport used for the sync stream.
    #[serde(default)]
    pub transport: EdgeTransport,
    /// Initial reconnect backoff, in milliseconds.
    #[serde(default = "default_reconnect_initial_backoff_ms")]
    pub reconnect_initial_backoff_ms: u64,
    /// Maximum reconnect backoff, in milliseconds.
    #[serde(default = "default_reconnect_max_backoff_ms")]
    pub reconnect_max_backoff_ms: u64,
    /// Maximum number of scopes cached by the Edge Cache (C8).
    #[serde(default = "default_edge_cache_capacity")]
    pub cache_capacity: usize,
    /// Optional path to persist the last-known-good snapshot for offline
    /// startup.
    pub offline_snapshot_path: Option<PathBuf>,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            hub_url: default_hub_url(),
            transport: EdgeTransport::default(),
            reconnect_initial_backoff_ms: default_reconnect_initial_backoff_ms(),
            reconnect_max_backoff_ms: default_reconnect_max_backoff_ms(),
            cache_capacity: default_edge_cache_capacity(),
            offline_snapshot_path: None,
        }
    }
}

impl EdgeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.hub_url.trim().is_empty() {
            return Err(ConfigError::Invalid("edge.hub_url must be non-empty".to_string()));
        }
        if !(MIN_BACKOFF_MS..=MAX_BACKOFF_MS).contains(&self.reconnect_initial_backoff_ms) {
            return Err(ConfigError::Invalid(format!(
                "edge.reconnect_initial_backoff_ms must be between {MIN_BACKOFF_MS} and {MAX_BACKOFF_MS}"
            )));
        }
        if !(MIN_BACKOFF_MS..=MAX_BACKOFF_MS).contains(&self.reconnect_max_backoff_ms) {
            return Err(ConfigError::Invalid(format!(
                "edge.reconnect_max_backoff_ms must be between {MIN_BACKOFF_MS} and {MAX_BACKOFF_MS}"
            )));
        }
        if self.reconnect_max_backoff_ms < self.reconnect_initial_backoff_ms {
            return Err(ConfigError::Invalid(
                "edge.reconnect_max_backoff_ms must be >= edge.reconnect_initial_backoff_ms".to_string(),
            ));
        }
        if !(MIN_EDGE_CACHE_CAPACITY..=MAX_EDGE_CACHE_CAPACITY).contains(&self.cache_capacity) {
            return Err(ConfigError::Invalid(format!(
                "edge.cache_capacity must be between {MIN_EDGE_CACHE_CAPACITY} and {MAX_EDGE_CACHE_CAPACITY}"
            )));
        }
        if let Some(path) = &self.offline_snapshot_path {
            validate_path_string("edge.offline_snapshot_path", &path.to_string_lossy())?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Auth Config
// ============================================================================

/// Authentication mode accepted by the RPC Surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// `X-API-Key` header, looked up against the API Key Store.
    #[default]
    ApiKey,
    /// `Authorization: Bearer <jwt>` header.
    Jwt,
}

/// Authentication settings for the RPC Surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Which auth mode the Hub accepts.
    #[serde(default)]
    pub mode: AuthMode,
    /// HMAC secret used to verify JWTs, required when `mode = "jwt"`.
    pub jwt_secret: Option<String>,
    /// Expected `iss` claim, required when `mode = "jwt"`.
    pub jwt_issuer: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { mode: AuthMode::default(), jwt_secret: None, jwt_issuer: None }
    }
}

impl AuthConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == AuthMode::Jwt {
            let secret = self
                .jwt_secret
                .as_ref()
                .ok_or_else(|| ConfigError::Invalid("auth.jwt_secret is required when auth.mode = \"jwt\"".to_string()))?;
            if secret.len() < MIN_JWT_SECRET_LENGTH {
                return Err(ConfigError::Invalid(format!(
                    "auth.jwt_secret must be at least {MIN_JWT_SECRET_LENGTH} bytes"
                )));
            }
            if self.jwt_issuer.as_deref().unwrap_or_default().trim().is_empty() {
                return Err(ConfigError::Invalid("auth.jwt_issuer is required when auth.mode = \"jwt\"".to_string()));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Logging Config
// ============================================================================

/// Structured logging settings, consumed by `tracing-subscriber`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing-subscriber` `EnvFilter` directive, e.g. `"info"` or
    /// `"flagforge_hub=debug,tower_http=info"`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit logs as JSON instead of the default human-readable format.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.level.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.level must be non-empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from the explicit argument, the
/// `FLAGFORGE_CONFIG` environment variable, or the default file name.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    validate_path_string("config path", &path.to_string_lossy())
}

/// Validates a path-shaped string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "Unit tests use expect for setup clarity.")]

    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_validate() {
        let mut config = FlagforgeConfig::default();
        config.validate().expect("defaults should validate");
    }

    #[test]
    fn jwt_mode_requires_secret_and_issuer() {
        let mut config = FlagforgeConfig { auth: AuthConfig { mode: AuthMode::Jwt, ..AuthConfig::default() }, ..FlagforgeConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn jwt_mode_with_secret_and_issuer_validates() {
        let mut config = FlagforgeConfig {
            auth: AuthConfig {
                mode: AuthMode::Jwt,
                jwt_secret: Some("a-sufficiently-long-secret".to_string()),
                jwt_issuer: Some("flagforge-hub".to_string()),
            },
            ..FlagforgeConfig::default()
        };
        config.validate().expect("jwt config with secret and issuer should validate");
    }

    #[test]
    fn zero_shard_count_is_rejected() {
        let mut config = FlagforgeConfig { cache: CacheConfig { shard_count: 0, ..CacheConfig::default() }, ..FlagforgeConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn reconnect_max_below_initial_is_rejected() {
        let mut config = FlagforgeConfig {
            edge: EdgeConfig { reconnect_initial_backoff_ms: 5_000, reconnect_max_backoff_ms: 1_000, ..EdgeConfig::default() },
            ..FlagforgeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_toml_file_and_applies_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("flagforge.toml");
        let mut file = fs::File::create(&path).expect("create config file");
        writeln!(file, "[server]\nbind_addr = \"127.0.0.1:9000\"\n\n[store]\npath = \"test.sqlite3\"\n").expect("write config file");

        let config = FlagforgeConfig::load(Some(&path)).expect("load config");
        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.broker.channel_capacity, default_broker_channel_capacity());
    }

    #[test]
    fn load_rejects_file_exceeding_size_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("flagforge.toml");
        let mut file = fs::File::create(&path).expect("create config file");
        let oversized = "a".repeat((MAX_CONFIG_FILE_BYTES + 1) as usize);
        writeln!(file, "# {oversized}").expect("write oversized config file");

        let err = FlagforgeConfig::load(Some(&path)).expect_err("oversized config should be rejected");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
