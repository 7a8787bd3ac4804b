// flagforge-broker/src/broker.rs
// ============================================================================
// Module: Flagforge Change Broker
// Description: Per-(project, environment) publish/subscribe over change events.
// Purpose: Feed C10 (Sync Server) with the deltas the store produces.
// Dependencies: flagforge-core, tokio::sync::broadcast
// ============================================================================

//! ## Overview
//! One `tokio::sync::broadcast` channel per `(project, environment)` topic,
//! created lazily on first publish or subscribe. A slow subscriber that
//! falls behind the channel's buffer does not see a torn stream: the
//! channel reports [`tokio::sync::broadcast::error::RecvError::Lagged`],
//! which [`BrokerSubscription::recv`] turns into
//! [`BrokerMessage::ResyncRequired`] so the caller re-bootstraps instead
//! of applying a gapped delta sequence.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;

use flagforge_core::ChangeEvent;
use flagforge_core::ChangeSink;
use flagforge_core::EnvironmentKey;
use flagforge_core::ProjectId;
use thiserror::Error;
use tokio::sync::broadcast;

// ============================================================================
// SECTION: Constants
// ============================================================================

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
/// Wire protocol version carried by every message, for forward
/// compatibility as the envelope shape evolves.
pub const PROTOCOL_VERSION: u8 = 1;

// ============================================================================
// SECTION: Messages
// ============================================================================

/// A message delivered to a topic subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerMessage {
    /// A single change event, in order for its `(project, env, entity-id)`.
    Delta(ChangeEvent),
    /// The subscriber fell behind the channel buffer and must discard any
    /// pending deltas and re-bootstrap from a fresh Hub snapshot.
    ResyncRequired,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while subscribing to or publishing on the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker's internal topic registry mutex was poisoned by a
    /// panicking holder.
    #[error("change broker registry mutex poisoned")]
    RegistryPoisoned,
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Builder for a [`ChangeBroker`].
pub struct ChangeBrokerBuilder {
    channel_capacity: usize,
}

impl Default for ChangeBrokerBuilder {
    fn default() -> Self {
        Self { channel_capacity: DEFAULT_CHANNEL_CAPACITY }
    }
}

impl ChangeBrokerBuilder {
    /// Sets the per-topic bounded channel capacity (`bufferSize`).
    /// Overflowing it forces the next receive to resolve as
    /// [`BrokerMessage::ResyncRequired`].
    #[must_use]
    pub const fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Builds the broker.
    #[must_use]
    pub fn build(self) -> ChangeBroker {
        ChangeBroker { channel_capacity: self.channel_capacity, topics: Mutex::new(BTreeMap::new()) }
    }
}

// ============================================================================
// SECTION: Change Broker
// ============================================================================

type Topic = (ProjectId, EnvironmentKey);

/// Publishes change events to per-`(project, environment)` subscribers.
pub struct ChangeBroker {
    channel_capacity: usize,
    topics: Mutex<BTreeMap<Topic, broadcast::Sender<BrokerMessage>>>,
}

impl ChangeBroker {
    /// Returns a builder with the default channel capacity.
    #[must_use]
    pub fn builder() -> ChangeBrokerBuilder {
        ChangeBrokerBuilder::default()
    }

    /// Subscribes to a topic, creating it if this is the first subscriber
    /// or publisher to reference it.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::RegistryPoisoned`] if a prior holder of the
    /// registry mutex panicked while holding it.
    pub fn subscribe(
        &self,
        project_id: &ProjectId,
        environment_key: &EnvironmentKey,
    ) -> Result<BrokerSubscription, BrokerError> {
        let sender = self.sender_for(project_id, environment_key)?;
        Ok(BrokerSubscription { receiver: sender.subscribe() })
    }

    fn sender_for(
        &self,
        project_id: &ProjectId,
        environment_key: &EnvironmentKey,
    ) -> Result<broadcast::Sender<BrokerMessage>, BrokerError> {
        let mut topics = self.topics.lock().map_err(|_| BrokerError::RegistryPoisoned)?;
        let key = (project_id.clone(), environment_key.clone());
        if let Some(sender) = topics.get(&key) {
            return Ok(sender.clone());
        }
        let (sender, _receiver) = broadcast::channel(self.channel_capacity);
        topics.insert(key, sender.clone());
        Ok(sender)
    }
}

impl ChangeSink for ChangeBroker {
    fn publish(&self, event: ChangeEvent) {
        let Ok(sender) = self.sender_for(&event.project_id, &event.environment_key) else {
            tracing::error!("change broker registry poisoned, dropping event");
            return;
        };
        // No active subscribers is not an error; the event is simply
        // undelivered until the next bootstrap.
        let _ = sender.send(BrokerMessage::Delta(event));
    }
}

// ============================================================================
// SECTION: Subscription
// ============================================================================

/// A live subscription to one `(project, environment)` topic.
pub struct BrokerSubscription {
    receiver: broadcast::Receiver<BrokerMessage>,
}

impl BrokerSubscription {
    /// Awaits the next message, translating a lagged receiver into
    /// [`BrokerMessage::ResyncRequired`] rather than surfacing the gap.
    /// Returns `None` once every sender for this topic has been dropped.
    pub async fn recv(&mut self) -> Option<BrokerMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(_)) => return Some(BrokerMessage::ResyncRequired),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "Unit tests use expect for setup clarity.")]

    use flagforge_core::ChangeOp;
    use flagforge_core::EntityKind;

    use super::*;

    fn sample_event(project: &str, env: &str, version: u64) -> ChangeEvent {
        ChangeEvent {
            entity: EntityKind::Flag,
            project_id: ProjectId::new(project),
            environment_key: EnvironmentKey::new(env),
            entity_id: "beta-ui".to_string(),
            version,
            op: ChangeOp::Updated,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_delta() {
        let broker = ChangeBroker::builder().build();
        let project_id = ProjectId::new("proj");
        let environment_key = EnvironmentKey::new("prod");
        let mut subscription = broker.subscribe(&project_id, &environment_key).expect("subscribe");

        broker.publish(sample_event("proj", "prod", 1));

        let message = subscription.recv().await.expect("message");
        assert_eq!(message, BrokerMessage::Delta(sample_event("proj", "prod", 1)));
    }

    #[tokio::test]
    async fn topics_are_isolated_by_project_and_environment() {
        let broker = ChangeBroker::builder().build();
        let mut prod_subscription = broker
            .subscribe(&ProjectId::new("proj"), &EnvironmentKey::new("prod"))
            .expect("subscribe prod");
        let mut staging_subscription = broker
            .subscribe(&ProjectId::new("proj"), &EnvironmentKey::new("staging"))
            .expect("subscribe staging");

        broker.publish(sample_event("proj", "prod", 1));

        let prod_message = prod_subscription.recv().await.expect("prod message");
        assert_eq!(prod_message, BrokerMessage::Delta(sample_event("proj", "prod", 1)));

        let staging_result =
            tokio::time::timeout(std::time::Duration::from_millis(50), staging_subscription.recv()).await;
        assert!(staging_result.is_err(), "staging subscriber should not observe the prod event");
    }

    #[tokio::test]
    async fn slow_subscriber_sees_resync_required_instead_of_a_gap() {
        let broker = ChangeBroker::builder().channel_capacity(2).build();
        let project_id = ProjectId::new("proj");
        let environment_key = EnvironmentKey::new("prod");
        let mut subscription = broker.subscribe(&project_id, &environment_key).expect("subscribe");

        for version in 1..=5u64 {
            broker.publish(sample_event("proj", "prod", version));
        }

        let message = subscription.recv().await.expect("message");
        assert_eq!(message, BrokerMessage::ResyncRequired);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let broker = ChangeBroker::builder().build();
        broker.publish(sample_event("proj", "prod", 1));
    }
}
