//! `eventlog-core`: value types shared by the event log.
//!
//! This crate contains **pure** primitives (no IO, no async): identifiers,
//! sequence numbers, aggregate identity/versions and the error taxonomy that
//! every commit and subscription path reports through.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod sequence;

pub use aggregate::{Aggregate, AggregateRootVersion};
pub use error::{EventStoreError, EventStoreResult, Failure, FailureId};
pub use id::{
    AggregateRootTypeId, CorrelationId, EventSourceId, EventTypeId, SubscriptionId, TenantId,
};
pub use sequence::EventLogSequenceNumber;
