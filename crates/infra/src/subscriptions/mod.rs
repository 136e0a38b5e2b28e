//! Fan-out of persisted commits to subscribers.
//!
//! Per tenant there is one [`StreamSubscriptionManager`] (registry and broadcaster), one
//! catch-up actor (historical pages) and one subscription actor per subscriber. Each
//! subscription backfills from storage up to the manager's high-water mark, then tails
//! live commits, waiting for the target's acknowledgement before sending the next batch.

pub mod catchup;
pub mod manager;
pub mod stream;
pub mod subscription;
pub mod target;

pub use catchup::{EventStoreCatchupActor, EventStoreCatchupHandle};
pub use manager::{
    EventStoreSubscriptionRequest, StreamSubscriptionManager, StreamSubscriptionManagerHandle,
};
pub use stream::{EventLogStream, EventLogSubscription};
pub use target::{DeliveryError, SubscriptionTarget};
