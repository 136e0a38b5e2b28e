//! Persistence boundary of the event log.
//!
//! The committer and the catch-up path only talk to storage through the traits
//! defined here, so the in-memory backend used in tests and any durable backend
//! are interchangeable.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{
    EventLogPersistence, FetchAggregateRootVersions, FetchCommittedEvents, PersistCommits,
    PersistenceError,
};
