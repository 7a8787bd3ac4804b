// flagforge-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payload.
// Purpose: A deterministic starting point for `flagforge.toml`.
// Dependencies: std
// ============================================================================

//! ## Overview
//! [`config_toml_example`] is shipped by the CLI's `config docs` subcommand
//! and used by this crate's own tests to assert the example stays parseable.

/// Returns a canonical example `flagforge.toml`.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"[server]
bind_addr = "0.0.0.0:8080"

[store]
path = "flagforge.sqlite3"
busy_timeout_ms = 5000
journal_mode = "wal"

[broker]
channel_capacity = 1024

[cache]
shard_count = 16
rebuild_tick_ms = 1000

[rpc]
request_timeout_ms = 2000

[edge]
hub_url = "http://127.0.0.1:8080"
transport = "sse"
reconnect_initial_backoff_ms = 200
reconnect_max_backoff_ms = 30000
cache_capacity = 10000

[auth]
mode = "api_key"

[logging]
level = "info"
json = false
"#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlagforgeConfig;

    #[test]
    fn example_parses_and_validates() {
        let mut config: FlagforgeConfig = toml::from_str(&config_toml_example()).expect("example should parse");
        config.validate().expect("example should validate");
    }
}
