use async_trait::async_trait;
use thiserror::Error;

use eventlog_events::{SubscriptionEvents, SubscriptionEventsAck};

/// Why a delivery to a subscription target did not produce an acknowledgement.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The target no longer exists. Terminal for the subscription.
    #[error("subscription target no longer exists")]
    DeadLetter,

    /// The target is alive but did not accept the events; delivery is retried.
    #[error("subscription target rejected the events: {0}")]
    Rejected(String),
}

/// The endpoint a subscription pushes its batches to.
///
/// A delivery resolves once the target has handled the events; the subscription waits for
/// it (bounded by the configured ack timeout) before sending the next batch.
#[async_trait]
pub trait SubscriptionTarget: Send + Sync {
    async fn deliver(
        &self,
        events: SubscriptionEvents,
    ) -> Result<SubscriptionEventsAck, DeliveryError>;
}
