// flagforge-config/src/lib.rs
// ============================================================================
// Module: Flagforge Config Library
// Description: Loads, validates, and documents flagforge.toml.
// Purpose: Shared configuration surface for the Hub, Edge, and CLI binaries.
// Dependencies: serde, toml, flagforge-store-sqlite
// ============================================================================

//! ## Overview
//! One TOML file configures every binary in the workspace. [`FlagforgeConfig`]
//! is the parsed, validated result; [`docs::config_docs_markdown`] renders a
//! reference for it, and [`examples::config_toml_example`] is a canonical
//! starting point a new deployment can copy.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod docs;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AuthConfig;
pub use config::AuthMode;
pub use config::BrokerConfig;
pub use config::CacheConfig;
pub use config::ConfigError;
pub use config::EdgeConfig;
pub use config::EdgeTransport;
pub use config::FlagforgeConfig;
pub use config::LoggingConfig;
pub use config::RpcConfig;
pub use config::ServerConfig;
