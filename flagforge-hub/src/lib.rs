// flagforge-hub/src/lib.rs
// ============================================================================
// Module: Flagforge Hub Library
// Description: Public API surface for the Hub control-plane/data-plane service.
// Purpose: Expose AppState, the router, and the building blocks the
//          `flagforge-cli`'s `hub serve` subcommand wires together.
// Dependencies: crate::{cache, auth, sync, error, rpc, server}
// ============================================================================

//! ## Overview
//! The Hub owns the durable Flag Store and API Key Store, the in-memory
//! Response Cache (C5) and Preloaded Table (C6), the Change Broker (C7),
//! and the Sync Server (C10) that feeds every Edge. `flagforge-cli` is the
//! only expected caller of [`server::serve`]; everything else in this
//! crate is exported so it can be exercised directly in tests or embedded
//! in a different binary.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod auth;
pub mod cache;
pub mod error;
pub mod rpc;
pub mod server;
pub mod sync;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use cache::DEFAULT_SHARD_COUNT;
pub use cache::DEFAULT_TTL;
pub use cache::PreloadedTable;
pub use cache::ResponseCache;
pub use error::RpcError;
pub use server::AppState;
pub use server::build_router;
pub use server::serve;
pub use sync::SessionRegistry;
