// flagforge-edge/src/lib.rs
// ============================================================================
// Module: Flagforge Edge Library
// Description: Public API surface for the Edge data-plane relay.
// Purpose: Expose EdgeState, the router, and the Sync Client entry point the
//          `flagforge-cli`'s `edge serve` subcommand wires together.
// Dependencies: crate::{cache, auth, sync, error, rpc, server}
// ============================================================================

//! ## Overview
//! The Edge owns no durable state of its own: the Edge Cache (C8) is fed
//! exclusively by the Sync Client (C9), which stays connected to a Hub's
//! Sync Server (C10). `flagforge-cli` is the only expected caller of
//! [`server::serve`]; everything else in this crate is exported so it can
//! be exercised directly in tests or embedded in a different binary.

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

pub use cache::EdgeCache;
pub use error::EdgeError;
pub use server::EdgeState;
pub use server::build_router;
pub use server::serve;
pub use sync::SyncError;
