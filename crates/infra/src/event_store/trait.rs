use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use eventlog_core::{
    Aggregate, AggregateRootVersion, EventLogSequenceNumber, EventStoreError, TenantId,
};
use eventlog_events::{Commit, CommittedEvent};

/// Persistence operation error.
///
/// These are **infrastructure errors** (storage reachability, log continuity) as opposed to
/// caller errors. Every variant surfaces to callers as [`EventStoreError::Unavailable`]:
/// the committer cannot tell a dead disk from a log that moved underneath it, and both
/// require the pipeline to be rebuilt from what is actually stored.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("sequence number mismatch: log continues at {expected}, commit starts at {actual}")]
    SequenceMismatch {
        expected: EventLogSequenceNumber,
        actual: EventLogSequenceNumber,
    },

    #[error(
        "aggregate root version mismatch for {aggregate}: stored {stored}, commit expects {expected}"
    )]
    AggregateRootVersionMismatch {
        aggregate: Aggregate,
        stored: AggregateRootVersion,
        expected: AggregateRootVersion,
    },
}

impl PersistenceError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

impl From<PersistenceError> for EventStoreError {
    fn from(value: PersistenceError) -> Self {
        EventStoreError::Unavailable(value.to_string())
    }
}

/// Durably appends whole commits to a tenant's event log.
///
/// Implementations must:
/// - persist a commit atomically (all events or none)
/// - reject a commit whose first sequence number is not the log's next sequence number
/// - reject a commit whose aggregate events do not continue the stored aggregate versions
#[async_trait]
pub trait PersistCommits: Send + Sync {
    async fn persist(&self, tenant: TenantId, commit: &Commit) -> Result<(), PersistenceError>;

    /// The sequence number the next commit must start at (`0` for an empty log).
    async fn next_sequence_number(
        &self,
        tenant: TenantId,
    ) -> Result<EventLogSequenceNumber, PersistenceError>;
}

/// Reads committed events back in sequence-number order.
#[async_trait]
pub trait FetchCommittedEvents: Send + Sync {
    /// Returns at most `max_count` events starting at `from`. Fewer (or none) when the log
    /// ends earlier.
    async fn fetch_committed_events(
        &self,
        tenant: TenantId,
        from: EventLogSequenceNumber,
        max_count: usize,
    ) -> Result<Vec<CommittedEvent>, PersistenceError>;
}

/// Reads the stored version of an aggregate root instance.
#[async_trait]
pub trait FetchAggregateRootVersions: Send + Sync {
    /// [`AggregateRootVersion::INITIAL`] for an aggregate that never committed.
    async fn fetch_aggregate_root_version(
        &self,
        tenant: TenantId,
        aggregate: &Aggregate,
    ) -> Result<AggregateRootVersion, PersistenceError>;
}

/// Everything the event log needs from its storage backend.
pub trait EventLogPersistence:
    PersistCommits + FetchCommittedEvents + FetchAggregateRootVersions
{
}

impl<T> EventLogPersistence for T where
    T: PersistCommits + FetchCommittedEvents + FetchAggregateRootVersions
{
}

#[async_trait]
impl<S> PersistCommits for Arc<S>
where
    S: PersistCommits + ?Sized,
{
    async fn persist(&self, tenant: TenantId, commit: &Commit) -> Result<(), PersistenceError> {
        (**self).persist(tenant, commit).await
    }

    async fn next_sequence_number(
        &self,
        tenant: TenantId,
    ) -> Result<EventLogSequenceNumber, PersistenceError> {
        (**self).next_sequence_number(tenant).await
    }
}

#[async_trait]
impl<S> FetchCommittedEvents for Arc<S>
where
    S: FetchCommittedEvents + ?Sized,
{
    async fn fetch_committed_events(
        &self,
        tenant: TenantId,
        from: EventLogSequenceNumber,
        max_count: usize,
    ) -> Result<Vec<CommittedEvent>, PersistenceError> {
        (**self).fetch_committed_events(tenant, from, max_count).await
    }
}

#[async_trait]
impl<S> FetchAggregateRootVersions for Arc<S>
where
    S: FetchAggregateRootVersions + ?Sized,
{
    async fn fetch_aggregate_root_version(
        &self,
        tenant: TenantId,
        aggregate: &Aggregate,
    ) -> Result<AggregateRootVersion, PersistenceError> {
        (**self).fetch_aggregate_root_version(tenant, aggregate).await
    }
}
