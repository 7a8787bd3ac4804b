// flagforge-broker/src/lib.rs
// ============================================================================
// Module: Flagforge Change Broker Library
// Description: Per-(project, environment) publish/subscribe over change events.
// Purpose: Feed the Hub's Sync Server (C10) with the deltas the store emits.
// Dependencies: flagforge-core, tokio
// ============================================================================

//! ## Overview
//! `ChangeBroker` is the only [`flagforge_core::ChangeSink`] implementation
//! in the workspace: the store publishes to it, and the Hub's sync server
//! subscribes to it per `(project, environment)` session.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod broker;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use broker::BrokerError;
pub use broker::BrokerMessage;
pub use broker::BrokerSubscription;
pub use broker::ChangeBroker;
pub use broker::ChangeBrokerBuilder;
pub use broker::PROTOCOL_VERSION;
