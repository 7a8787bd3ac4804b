// flagforge-edge/src/sync/mod.rs
// ============================================================================
// Module: Edge Sync Client (C9)
// Description: Long-lived connection to the Hub's Sync Server (C10); applies
//              bootstrap snapshots and incremental deltas into C8.
// Purpose: Keep the Edge Cache convergent with the Hub within one heartbeat
//          interval of network quiescence, surviving disconnects.
// Dependencies: reqwest, reqwest-eventsource, tokio-tungstenite, tokio
// ============================================================================

//! ## Overview
//! Generalizes the teacher's long-lived-stream-plus-retry idiom
//! (`decision-gate-broker::source::http`'s typed `SourceError`, and the
//! `mraerino-launchdarkly-rust-sdk-experimental` consumer's
//! failure-counter-then-restart-stream loop) into a transport-agnostic
//! reconnect loop: each attempt opens either an SSE or a WebSocket stream
//! per [`flagforge_config::EdgeTransport`], applies every message it
//! yields into the shared [`crate::cache::EdgeCache`], and on any
//! transport error or heartbeat timeout backs off exponentially (with
//! jitter) before retrying. There is no retry ceiling in this
//! specification's config surface — the Edge keeps retrying forever,
//! serving whatever is already cached in the meantime, which is this
//! design's "offline mode".

pub mod client;
pub mod protocol;

pub use client::SyncError;
pub use client::run;
pub use protocol::DeltaPayload;
pub use protocol::SyncMessage;
