//! Events, commits and the message contracts of the event log.
//!
//! Everything here is an immutable value: once a `Commit` has been built it is
//! shared read-only between the committer, the persistence collaborator and
//! every subscription.

pub mod batch;
pub mod commit;
pub mod committed;
pub mod event;
pub mod execution_context;
pub mod messages;
pub mod tenant;

pub use batch::{EventLogBatch, EventTypeFilter};
pub use commit::Commit;
pub use committed::{
    CommittedAggregateEvent, CommittedAggregateEvents, CommittedEvent, CommittedEvents,
};
pub use event::{Artifact, Event, UncommittedAggregateEvents, UncommittedEvent};
pub use execution_context::ExecutionContext;
pub use messages::{
    CancelEventStoreSubscription, CancelEventStoreSubscriptionAck, CommitAggregateEventsRequest,
    CommitAggregateEventsResponse, CommitEventsRequest, CommitEventsResponse,
    EventLogCatchupRequest, EventLogCatchupResponse, EventStoreSubscriptionAck,
    MAX_CATCHUP_PAGE_SIZE, SubscriptionEvents, SubscriptionEventsAck,
};
pub use tenant::TenantScoped;
