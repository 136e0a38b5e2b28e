//! Infrastructure of the event log: per-tenant actors, persistence boundary, configuration.
//!
//! Each tenant gets a committer (sequencing, aggregate concurrency, batched persists), a
//! subscription manager fanning persisted commits out to subscribers, and a catch-up actor
//! for historical pages. [`registry::EventStoreRegistry`] wires them together.

pub mod committer;
pub mod config;
pub mod event_store;
pub mod registry;
pub mod shutdown;
pub mod subscriptions;


pub use committer::{CommitListener, Committer, CommitterHandle, PendingResult};
pub use config::EventLogConfig;
pub use event_store::{
    EventLogPersistence, FetchAggregateRootVersions, FetchCommittedEvents, InMemoryEventStore,
    PersistCommits, PersistenceError,
};
pub use registry::{EventStoreRegistry, TenantEventStore};
pub use shutdown::{ShutdownCoordinator, ShutdownHook, ShutdownSignal};
pub use subscriptions::{
    DeliveryError, EventLogStream, EventLogSubscription, EventStoreSubscriptionRequest,
    SubscriptionTarget,
};
