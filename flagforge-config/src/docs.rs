// flagforge-config/src/docs.rs
// ============================================================================
// Module: Config Docs Generator
// Description: Markdown generator for flagforge.toml documentation.
// Purpose: Keep a human-readable reference for every config field.
// Dependencies: std
// ============================================================================

//! ## Overview
//! [`config_docs_markdown`] renders one section per [`crate::FlagforgeConfig`]
//! sub-config, in field declaration order, so the output stays in sync with
//! the struct by construction rather than by a separate schema walk.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while generating or verifying config docs.
#[derive(Debug, Error)]
pub enum DocsError {
    /// I/O failure while writing docs.
    #[error("docs io error: {0}")]
    Io(String),
    /// The generated docs do not match the file already on disk.
    #[error("docs drift: generated markdown does not match {0}")]
    Drift(String),
}

// ============================================================================
// SECTION: Public API
// ============================================================================

/// A single documented config field.
struct FieldDoc {
    name: &'static str,
    default: &'static str,
    description: &'static str,
}

const SERVER_FIELDS: &[FieldDoc] =
    &[FieldDoc { name: "bind_addr", default: "0.0.0.0:8080", description: "Socket address the Hub's HTTP/WS/SSE server binds to." }];

const STORE_FIELDS: &[FieldDoc] = &[
    FieldDoc { name: "path", default: "(required)", description: "Path to the SQLite database file." },
    FieldDoc { name: "busy_timeout_ms", default: "5000", description: "SQLite busy timeout, in milliseconds." },
    FieldDoc { name: "journal_mode", default: "wal", description: "SQLite journal mode: `wal` or `delete`." },
];

const BROKER_FIELDS: &[FieldDoc] = &[FieldDoc {
    name: "channel_capacity",
    default: "1024",
    description: "Per-(project, environment) bounded channel capacity. Overflow forces a resync.",
}];

const CACHE_FIELDS: &[FieldDoc] = &[
    FieldDoc { name: "shard_count", default: "16", description: "Number of shards in the Hub's Response Cache." },
    FieldDoc { name: "rebuild_tick_ms", default: "1000", description: "Interval between Preloaded Table rebuild ticks." },
];

const RPC_FIELDS: &[FieldDoc] =
    &[FieldDoc { name: "request_timeout_ms", default: "2000", description: "Deadline applied to every RPC, in milliseconds." }];

const EDGE_FIELDS: &[FieldDoc] = &[
    FieldDoc { name: "hub_url", default: "http://127.0.0.1:8080", description: "Base URL of the Hub the Edge syncs from." },
    FieldDoc { name: "transport", default: "sse", description: "Sync transport: `sse` or `web_socket`." },
    FieldDoc { name: "reconnect_initial_backoff_ms", default: "200", description: "Initial reconnect backoff." },
    FieldDoc { name: "reconnect_max_backoff_ms", default: "30000", description: "Maximum reconnect backoff." },
    FieldDoc { name: "cache_capacity", default: "10000", description: "Maximum number of scopes cached by the Edge Cache." },
    FieldDoc { name: "offline_snapshot_path", default: "(none)", description: "Optional path to persist a last-known-good snapshot." },
];

const AUTH_FIELDS: &[FieldDoc] = &[
    FieldDoc { name: "mode", default: "api_key", description: "`api_key` (X-API-Key header) or `jwt` (Authorization: Bearer)." },
    FieldDoc { name: "jwt_secret", default: "(none)", description: "HMAC secret used to verify JWTs. Required when mode = \"jwt\"." },
    FieldDoc { name: "jwt_issuer", default: "(none)", description: "Expected `iss` claim. Required when mode = \"jwt\"." },
];

const LOGGING_FIELDS: &[FieldDoc] = &[
    FieldDoc { name: "level", default: "info", description: "`tracing-subscriber` `EnvFilter` directive." },
    FieldDoc { name: "json", default: "false", description: "Emit logs as JSON instead of human-readable text." },
];

const SECTIONS: &[(&str, &[FieldDoc])] = &[
    ("server", SERVER_FIELDS),
    ("store", STORE_FIELDS),
    ("broker", BROKER_FIELDS),
    ("cache", CACHE_FIELDS),
    ("rpc", RPC_FIELDS),
    ("edge", EDGE_FIELDS),
    ("auth", AUTH_FIELDS),
    ("logging", LOGGING_FIELDS),
];

/// Renders the configuration reference as Markdown.
#[must_use]
pub fn config_docs_markdown() -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# flagforge.toml reference\n");
    for (section, fields) in SECTIONS {
        let _ = writeln!(out, "## [{section}]\n");
        let _ = writeln!(out, "| field | default | description |");
        let _ = writeln!(out, "|---|---|---|");
        for field in *fields {
            let _ = writeln!(out, "| `{}` | `{}` | {} |", field.name, field.default, field.description);
        }
        out.push('\n');
    }
    out
}

/// Writes the rendered docs to `path`.
///
/// # Errors
///
/// Returns [`DocsError::Io`] if the file cannot be written.
pub fn write_config_docs(path: &Path) -> Result<(), DocsError> {
    fs::write(path, config_docs_markdown()).map_err(|err| DocsError::Io(err.to_string()))
}

/// Verifies that the rendered docs match the committed file at `path`.
///
/// # Errors
///
/// Returns [`DocsError::Io`] if the file cannot be read, or
/// [`DocsError::Drift`] if its contents differ from the freshly rendered
/// markdown.
pub fn verify_config_docs(path: &Path) -> Result<(), DocsError> {
    let on_disk = fs::read_to_string(path).map_err(|err| DocsError::Io(err.to_string()))?;
    if on_disk != config_docs_markdown() {
        return Err(DocsError::Drift(path.display().to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_section_renders_a_heading() {
        let markdown = config_docs_markdown();
        for (section, _) in SECTIONS {
            assert!(markdown.contains(&format!("[{section}]")));
        }
    }
}
