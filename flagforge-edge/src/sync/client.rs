// flagforge-edge/src/sync/client.rs
// ============================================================================
// Module: Edge Sync Client (C9) — connection loop
// Description: Opens an SSE or WebSocket stream to the Hub, applies every
//              message into C8, and reconnects with backoff on failure.
// Purpose: The only long-lived task in the Edge binary.
// Dependencies: reqwest, reqwest-eventsource, tokio-tungstenite, tokio, rand
// ============================================================================

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use flagforge_config::EdgeConfig;
use flagforge_config::EdgeTransport;
use flagforge_core::model::PrecomputedFlag;
use flagforge_core::model::Timestamp;
use futures_util::Sink;
use futures_util::SinkExt;
use futures_util::StreamExt;
use rand::Rng;
use reqwest_eventsource::Event as SseEvent;
use reqwest_eventsource::EventSource;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use super::protocol::DeltaPayload;
use super::protocol::PROTOCOL_VERSION;
use super::protocol::SyncMessage;
use crate::cache::EdgeCache;

// ============================================================================
// SECTION: Constants
// ============================================================================

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_MISSED_HEARTBEATS: u32 = 3;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Failures raised while opening or reading the sync stream. Every variant
/// is recoverable: [`run`] reconnects after any of them.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The sync request could not be built (bad URL, invalid header value).
    #[error("failed to build sync request: {0}")]
    Request(String),
    /// The transport (HTTP/WS) failed.
    #[error("sync transport error: {0}")]
    Transport(String),
    /// The Hub spoke a protocol version this Edge does not understand.
    #[error("received an unsupported protocol version {0}")]
    ProtocolVersion(u8),
    /// Too many consecutive heartbeats were missed.
    #[error("missed too many consecutive heartbeats")]
    HeartbeatTimeout,
    /// A delta's version left a gap versus the last applied version; the
    /// session is unrecoverable and must reconnect and rebootstrap.
    #[error("observed a change version gap: local={local}, received={received}")]
    VersionGap { local: i64, received: u64 },
}

// ============================================================================
// SECTION: Reconnect Loop
// ============================================================================

/// Runs the Sync Client until cancelled, reconnecting with exponential
/// backoff (full jitter) on any failure. While disconnected, the Edge
/// keeps serving whatever C8 already holds — this is this design's
/// "offline mode", since the specification's config surface defines no
/// retry ceiling.
pub async fn run(cache: Arc<EdgeCache>, config: EdgeConfig, api_key: String) {
    let mut attempt: u32 = 0;
    loop {
        let outcome = match config.transport {
            EdgeTransport::Sse => run_sse(&cache, &config, &api_key).await,
            EdgeTransport::WebSocket => run_ws(&cache, &config, &api_key).await,
        };

        match outcome {
            Ok(()) => {
                tracing::info!("sync stream ended cleanly, reconnecting");
                attempt = 0;
            }
            Err(error) => {
                tracing::warn!(%error, attempt, "sync stream failed, backing off before reconnect");
            }
        }

        let delay = backoff_with_jitter(attempt, config.reconnect_initial_backoff_ms, config.reconnect_max_backoff_ms);
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

/// Computes the next reconnect delay: exponential growth from
/// `initial_ms`, capped at `max_ms`, with full jitter (a uniform draw
/// between zero and the capped value) to avoid a reconnect thundering
/// herd across many Edges.
fn backoff_with_jitter(attempt: u32, initial_ms: u64, max_ms: u64) -> Duration {
    let exponent = attempt.min(16);
    let scaled = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    let capped = initial_ms.saturating_mul(scaled).min(max_ms.max(initial_ms));
    let jittered = rand::thread_rng().gen_range(0..=capped.max(1));
    Duration::from_millis(jittered)
}

// ============================================================================
// SECTION: SSE Transport
// ============================================================================

async fn run_sse(cache: &Arc<EdgeCache>, config: &EdgeConfig, api_key: &str) -> Result<(), SyncError> {
    let http_client = reqwest::Client::new();
    let base = config.hub_url.trim_end_matches('/');
    let request = http_client.get(format!("{base}/sync/sse")).header("x-api-key", api_key);
    let mut source = EventSource::new(request).map_err(|err| SyncError::Request(err.to_string()))?;

    let ping_url = format!("{base}/sync/ping");
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            event = source.next() => {
                let Some(event) = event else { return Ok(()) };
                match event {
                    Ok(SseEvent::Open) => tracing::debug!("sync sse stream opened"),
                    Ok(SseEvent::Message(message)) => {
                        missed = 0;
                        let parsed = serde_json::from_str(&message.data).map_err(|err| SyncError::Transport(err.to_string()))?;
                        apply_message(cache, parsed)?;
                        if cache.resync_requested() {
                            source.close();
                            return Ok(());
                        }
                    }
                    Err(error) => {
                        source.close();
                        return Err(SyncError::Transport(error.to_string()));
                    }
                }
            }
            _ = heartbeat.tick() => {
                match http_client.post(&ping_url).header("x-api-key", api_key).send().await {
                    Ok(response) if response.status().is_success() => missed = 0,
                    _ => missed += 1,
                }
                if missed >= MAX_MISSED_HEARTBEATS {
                    source.close();
                    return Err(SyncError::HeartbeatTimeout);
                }
            }
        }
    }
}

// ============================================================================
// SECTION: WebSocket Transport
// ============================================================================

async fn run_ws(cache: &Arc<EdgeCache>, config: &EdgeConfig, api_key: &str) -> Result<(), SyncError> {
    let ws_url = to_ws_url(&config.hub_url);
    let mut request = ws_url.into_client_request().map_err(|err| SyncError::Request(err.to_string()))?;
    let header_value = api_key.parse().map_err(|_| SyncError::Request("api key is not a valid header value".to_string()))?;
    request.headers_mut().insert("x-api-key", header_value);

    let (mut stream, _response) = tokio_tungstenite::connect_async(request).await.map_err(|err| SyncError::Transport(err.to_string()))?;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let Some(incoming) = incoming else { return Ok(()) };
                match incoming {
                    Ok(WsMessage::Text(text)) => {
                        missed = 0;
                        let parsed: SyncMessage = serde_json::from_str(&text).map_err(|err| SyncError::Transport(err.to_string()))?;
                        if matches!(parsed, SyncMessage::Ping { .. }) {
                            send_ws(&mut stream, &SyncMessage::Pong { ts: Timestamp::now() }).await;
                        }
                        apply_message(cache, parsed)?;
                        if cache.resync_requested() {
                            return Ok(());
                        }
                    }
                    Ok(WsMessage::Close(_)) => return Ok(()),
                    Ok(_) => {}
                    Err(error) => return Err(SyncError::Transport(error.to_string())),
                }
            }
            _ = heartbeat.tick() => {
                missed += 1;
                if missed >= MAX_MISSED_HEARTBEATS {
                    return Err(SyncError::HeartbeatTimeout);
                }
                send_ws(&mut stream, &SyncMessage::Ping { ts: Timestamp::now() }).await;
            }
        }
    }
}

async fn send_ws<S>(stream: &mut S, message: &SyncMessage)
where
    S: Sink<WsMessage> + Unpin,
{
    if let Ok(bytes) = serde_json::to_string(message) {
        let _ignored = stream.send(WsMessage::Text(bytes.into())).await;
    }
}

fn to_ws_url(hub_url: &str) -> String {
    let base = hub_url.trim_end_matches('/');
    let ws_base = base.strip_prefix("https://").map_or_else(
        || base.strip_prefix("http://").map_or_else(|| base.to_string(), |rest| format!("ws://{rest}")),
        |rest| format!("wss://{rest}"),
    );
    format!("{ws_base}/sync/ws")
}

// ============================================================================
// SECTION: Apply
// ============================================================================

fn apply_message(cache: &EdgeCache, message: SyncMessage) -> Result<(), SyncError> {
    let now_ms = now_millis();
    match message {
        SyncMessage::Snapshot { protocol_version, version, flags, segments, rollouts, api_keys } => {
            if protocol_version != PROTOCOL_VERSION {
                return Err(SyncError::ProtocolVersion(protocol_version));
            }
            // The Hub already resolved this session's segments-in-scope; the
            // Edge has no store of its own to do a narrower, per-flag fetch
            // against, so every flag's snapshot carries the full segment
            // set rather than just the ones it directly references.
            let segments_by_id: BTreeMap<_, _> = segments.into_iter().map(|segment| (segment.id.clone(), segment)).collect();
            let mut rollouts_by_flag: BTreeMap<_, _> = rollouts.into_iter().collect();

            let mut entries = Vec::with_capacity(flags.len());
            for flag in flags {
                let rollout = rollouts_by_flag.remove(&flag.key);
                entries.push(PrecomputedFlag {
                    project_id: flag.project_id.clone(),
                    environment_key: flag.environment_key.clone(),
                    flag_key: flag.key.clone(),
                    rollout,
                    segments: segments_by_id.clone(),
                    flag,
                    version,
                });
            }
            cache.apply_snapshot(entries, now_ms, version);
            for scope in api_keys {
                cache.cache_api_key_scope(scope.hash.clone(), scope);
            }
            tracing::info!(version, flags = cache.len(), "applied sync bootstrap snapshot");
        }
        SyncMessage::Delta { version, payload, .. } => {
            let local = cache.last_applied_version();
            let received = i64::try_from(version).unwrap_or(i64::MAX);
            if received > local + 1 {
                cache.request_resync();
                return Err(SyncError::VersionGap { local, received: version });
            }
            match payload {
                Some(DeltaPayload::Flag(snapshot)) => cache.upsert_flag(snapshot, now_ms, version),
                Some(DeltaPayload::Segment(_)) | None => cache.request_resync(),
            }
        }
        SyncMessage::Resync { reason } => {
            tracing::warn!(%reason, "hub requested a resync");
            cache.request_resync();
        }
        SyncMessage::Ping { .. } | SyncMessage::Pong { .. } => {}
    }
    Ok(())
}

fn now_millis() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use flagforge_core::model::ChangeOp;
    use flagforge_core::model::EntityKind;
    use flagforge_core::model::EnvironmentKey;
    use flagforge_core::model::Flag;
    use flagforge_core::model::FlagKey;
    use flagforge_core::model::FlagValue;
    use flagforge_core::model::ProjectId;
    use flagforge_core::model::TargetingBlock;
    use flagforge_core::model::ValueType;

    use super::*;
    use crate::cache::EdgeCache;

    fn sample_delta(version: u64) -> SyncMessage {
        let flag = Flag {
            project_id: ProjectId::new("proj"),
            environment_key: EnvironmentKey::new("prod"),
            key: FlagKey::new("beta-ui"),
            name: "beta-ui".to_string(),
            description: None,
            value_type: ValueType::Bool,
            enabled: true,
            default: FlagValue::Bool(false),
            variations: Vec::new(),
            targeting: TargetingBlock::default(),
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
        };
        let snapshot = PrecomputedFlag {
            project_id: flag.project_id.clone(),
            environment_key: flag.environment_key.clone(),
            flag_key: flag.key.clone(),
            flag,
            rollout: None,
            segments: BTreeMap::new(),
            version,
        };
        SyncMessage::Delta {
            protocol_version: PROTOCOL_VERSION,
            version,
            entity: EntityKind::Flag,
            op: ChangeOp::Updated,
            entity_id: "beta-ui".to_string(),
            payload: Some(DeltaPayload::Flag(snapshot)),
        }
    }

    #[test]
    fn apply_message_accepts_a_contiguous_delta() {
        let cache = EdgeCache::new(16, 30_000);
        cache.apply_snapshot(Vec::new(), 0, 5);
        assert!(apply_message(&cache, sample_delta(6)).is_ok());
        assert_eq!(cache.last_applied_version(), 6);
    }

    #[test]
    fn apply_message_rejects_a_version_gap_and_requests_resync() {
        let cache = EdgeCache::new(16, 30_000);
        cache.apply_snapshot(Vec::new(), 0, 5);
        let result = apply_message(&cache, sample_delta(8));
        assert!(matches!(result, Err(SyncError::VersionGap { local: 5, received: 8 })));
        assert!(cache.resync_requested());
    }

    #[test]
    fn backoff_grows_but_never_exceeds_the_cap() {
        for attempt in 0..20 {
            let delay = backoff_with_jitter(attempt, 200, 30_000);
            assert!(delay.as_millis() <= 30_000);
        }
    }

    #[test]
    fn backoff_respects_a_cap_below_the_first_step() {
        let delay = backoff_with_jitter(0, 5_000, 1_000);
        assert!(delay.as_millis() <= 5_000);
    }

    #[test]
    fn ws_url_rewrites_http_schemes() {
        assert_eq!(to_ws_url("http://localhost:8080"), "ws://localhost:8080/sync/ws");
        assert_eq!(to_ws_url("https://hub.example.com"), "wss://hub.example.com/sync/ws");
    }
}
