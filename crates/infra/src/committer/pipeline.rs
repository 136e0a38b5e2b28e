//! Batching of accepted commit requests.
//!
//! The pipeline hands out sequence numbers eagerly: a request is given its contiguous block
//! the moment it is accepted, so requests accepted while a batch is being persisted are
//! numbered after that batch. Whatever accumulated is drained as one [`Batch`] once the
//! committer is free to persist again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use eventlog_core::{
    Aggregate, EventLogSequenceNumber, EventStoreError, EventStoreResult,
};
use eventlog_events::{
    Commit, CommitAggregateEventsRequest, CommitEventsRequest, CommittedAggregateEvent,
    CommittedAggregateEvents, CommittedEvent, CommittedEvents, ExecutionContext,
    UncommittedEvent,
};

/// Resolves once the batch holding the request has been persisted (or has failed).
#[derive(Debug)]
pub struct PendingResult<T> {
    receiver: oneshot::Receiver<EventStoreResult<T>>,
}

impl<T> PendingResult<T> {
    pub async fn wait(self) -> EventStoreResult<T> {
        // The sender only disappears without answering when the committer stopped.
        self.receiver
            .await
            .unwrap_or(Err(EventStoreError::ShuttingDown))
    }
}

fn pending<T>() -> (oneshot::Sender<EventStoreResult<T>>, PendingResult<T>) {
    let (sender, receiver) = oneshot::channel();
    (sender, PendingResult { receiver })
}

#[derive(Debug)]
enum Responder {
    Events {
        index: usize,
        respond: oneshot::Sender<EventStoreResult<CommittedEvents>>,
    },
    Aggregate {
        index: usize,
        aggregate: Aggregate,
        respond: oneshot::Sender<EventStoreResult<CommittedAggregateEvents>>,
    },
}

impl Responder {
    fn aggregate(&self) -> Option<&Aggregate> {
        match self {
            Self::Events { .. } => None,
            Self::Aggregate { aggregate, .. } => Some(aggregate),
        }
    }

    fn fail(self, error: EventStoreError) -> Option<Aggregate> {
        match self {
            Self::Events { respond, .. } => {
                let _ = respond.send(Err(error));
                None
            }
            Self::Aggregate {
                aggregate, respond, ..
            } => {
                let _ = respond.send(Err(error));
                Some(aggregate)
            }
        }
    }
}

/// Accumulates requests into the next commit.
#[derive(Debug)]
pub struct CommitBuilder {
    first_sequence_number: EventLogSequenceNumber,
    next_sequence_number: EventLogSequenceNumber,
    events: Vec<CommittedEvents>,
    aggregate_events: Vec<CommittedAggregateEvents>,
    responders: Vec<Responder>,
}

impl CommitBuilder {
    pub fn new(first_sequence_number: EventLogSequenceNumber) -> Self {
        Self {
            first_sequence_number,
            next_sequence_number: first_sequence_number,
            events: Vec::new(),
            aggregate_events: Vec::new(),
            responders: Vec::new(),
        }
    }

    pub fn next_sequence_number(&self) -> EventLogSequenceNumber {
        self.next_sequence_number
    }

    pub fn is_empty(&self) -> bool {
        self.responders.is_empty()
    }

    fn stamp(
        &mut self,
        execution_context: ExecutionContext,
        occurred: DateTime<Utc>,
        event: UncommittedEvent,
    ) -> CommittedEvent {
        let sequence_number = self.next_sequence_number;
        self.next_sequence_number = sequence_number.next();
        CommittedEvent {
            sequence_number,
            occurred,
            execution_context,
            event_source: event.event_source,
            event_type: event.event_type,
            public: event.public,
            content: event.content,
        }
    }

    fn add_events(
        &mut self,
        request: CommitEventsRequest,
        occurred: DateTime<Utc>,
    ) -> PendingResult<CommittedEvents> {
        let context = request.execution_context;
        let committed = request
            .events
            .into_iter()
            .map(|e| self.stamp(context, occurred, e))
            .collect();

        let (respond, result) = pending();
        self.responders.push(Responder::Events {
            index: self.events.len(),
            respond,
        });
        self.events.push(CommittedEvents::new(committed));
        result
    }

    fn add_aggregate_events(
        &mut self,
        request: CommitAggregateEventsRequest,
        occurred: DateTime<Utc>,
    ) -> EventStoreResult<PendingResult<CommittedAggregateEvents>> {
        let context = request.execution_context;
        let uncommitted = request.events;
        let expected = uncommitted
            .expected_version
            .ok_or(EventStoreError::MissingExpectedVersion)?;
        let aggregate = uncommitted.aggregate;

        let events: Vec<CommittedAggregateEvent> = uncommitted
            .events
            .into_iter()
            .enumerate()
            .map(|(i, e)| CommittedAggregateEvent {
                event: self.stamp(context, occurred, e),
                aggregate_root: aggregate.aggregate_root,
                aggregate_root_version: expected.advance(i as u64 + 1),
            })
            .collect();
        let aggregate_root_version = expected.advance(events.len() as u64);

        let (respond, result) = pending();
        self.responders.push(Responder::Aggregate {
            index: self.aggregate_events.len(),
            aggregate: aggregate.clone(),
            respond,
        });
        self.aggregate_events.push(CommittedAggregateEvents {
            aggregate,
            aggregate_root_version,
            events,
        });
        Ok(result)
    }

    /// Freezes the accumulated requests into an immutable commit.
    ///
    /// Should the commit fail validation, every caller is answered with the error.
    pub fn build(self) -> Result<Batch, RejectedBatch> {
        match Commit::new(self.events, self.aggregate_events) {
            Ok(commit) => Ok(Batch {
                commit: Arc::new(commit),
                responders: self.responders,
            }),
            Err(error) => {
                let aggregates = self
                    .responders
                    .into_iter()
                    .filter_map(|r| r.fail(error.clone()))
                    .collect();
                Err(RejectedBatch {
                    first_sequence_number: self.first_sequence_number,
                    error,
                    aggregates,
                })
            }
        }
    }

    fn fail(self, error: EventStoreError) -> Vec<Aggregate> {
        self.responders
            .into_iter()
            .filter_map(|r| r.fail(error.clone()))
            .collect()
    }
}

/// A drained batch that could not be turned into a commit. Its callers were already answered.
#[derive(Debug)]
pub struct RejectedBatch {
    pub first_sequence_number: EventLogSequenceNumber,
    pub error: EventStoreError,
    pub aggregates: Vec<Aggregate>,
}

/// A commit on its way to persistence, together with the callers waiting for it.
#[derive(Debug)]
pub struct Batch {
    commit: Arc<Commit>,
    responders: Vec<Responder>,
}

impl Batch {
    pub fn commit(&self) -> &Arc<Commit> {
        &self.commit
    }

    /// Aggregates with a request in this batch.
    pub fn aggregates(&self) -> impl Iterator<Item = &Aggregate> {
        self.responders.iter().filter_map(Responder::aggregate)
    }

    /// Answers every request with its committed events. Returns the aggregates resolved.
    pub fn complete(self) -> Vec<Aggregate> {
        let mut resolved = Vec::new();
        for responder in self.responders {
            match responder {
                Responder::Events { index, respond } => {
                    let events = self.commit.committed_events()[index].clone();
                    let _ = respond.send(Ok(events));
                }
                Responder::Aggregate {
                    index,
                    aggregate,
                    respond,
                } => {
                    let events = self.commit.committed_aggregate_events()[index].clone();
                    let _ = respond.send(Ok(events));
                    resolved.push(aggregate);
                }
            }
        }
        resolved
    }

    /// Answers every request with `error`. Returns the aggregates resolved.
    pub fn fail(self, error: EventStoreError) -> Vec<Aggregate> {
        self.responders
            .into_iter()
            .filter_map(|r| r.fail(error.clone()))
            .collect()
    }
}

/// Ordered queue of requests not yet handed to persistence.
#[derive(Debug)]
pub struct CommitPipeline {
    next_sequence_number: EventLogSequenceNumber,
    open: Option<CommitBuilder>,
}

impl CommitPipeline {
    /// A pipeline whose first commit starts at `next_sequence_number`.
    pub fn new(next_sequence_number: EventLogSequenceNumber) -> Self {
        Self {
            next_sequence_number,
            open: None,
        }
    }

    /// The sequence number the next accepted event will get.
    pub fn next_sequence_number(&self) -> EventLogSequenceNumber {
        self.next_sequence_number
    }

    pub fn has_pending(&self) -> bool {
        self.open.as_ref().is_some_and(|b| !b.is_empty())
    }

    fn builder(&mut self) -> &mut CommitBuilder {
        let next = self.next_sequence_number;
        self.open.get_or_insert_with(|| CommitBuilder::new(next))
    }

    /// Accepts a free-standing commit request into the open batch.
    pub fn try_add_events_from(
        &mut self,
        request: CommitEventsRequest,
    ) -> EventStoreResult<PendingResult<CommittedEvents>> {
        if request.events.is_empty() {
            return Err(EventStoreError::NoEventsToCommit);
        }

        let occurred = Utc::now();
        let builder = self.builder();
        let result = builder.add_events(request, occurred);
        self.next_sequence_number = builder.next_sequence_number();
        Ok(result)
    }

    /// Accepts an aggregate commit request into the open batch.
    ///
    /// The expected version is assumed to have been verified against storage already.
    pub fn try_add_aggregate_events_from(
        &mut self,
        request: CommitAggregateEventsRequest,
    ) -> EventStoreResult<PendingResult<CommittedAggregateEvents>> {
        if request.events.events.is_empty() {
            return Err(EventStoreError::NoEventsToCommit);
        }
        if request.events.expected_version.is_none() {
            return Err(EventStoreError::MissingExpectedVersion);
        }
        request.events.validate_event_sources()?;

        let occurred = Utc::now();
        let builder = self.builder();
        let result = builder.add_aggregate_events(request, occurred)?;
        self.next_sequence_number = builder.next_sequence_number();
        Ok(result)
    }

    /// Drains everything accepted so far into one batch.
    pub fn try_get_next_batch(&mut self) -> Option<Result<Batch, RejectedBatch>> {
        match self.open.take() {
            Some(builder) if !builder.is_empty() => Some(builder.build()),
            _ => None,
        }
    }

    /// Fails every request still waiting in the pipeline. Returns the aggregates resolved.
    pub fn fail_pending(&mut self, error: EventStoreError) -> Vec<Aggregate> {
        self.open
            .take()
            .map(|builder| builder.fail(error))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventlog_core::{AggregateRootTypeId, AggregateRootVersion, EventSourceId, EventTypeId, TenantId};
    use eventlog_events::{Artifact, UncommittedAggregateEvents};

    fn uncommitted(source: &str) -> UncommittedEvent {
        UncommittedEvent::new(
            EventSourceId::new(source).unwrap(),
            Artifact::new(EventTypeId::new(), 1),
            serde_json::json!({ "source": source }),
        )
    }

    fn free_request(tenant: TenantId, count: usize) -> CommitEventsRequest {
        CommitEventsRequest {
            execution_context: ExecutionContext::new(tenant),
            events: (0..count).map(|_| uncommitted("free")).collect(),
        }
    }

    fn aggregate_request(
        tenant: TenantId,
        aggregate: &Aggregate,
        expected: u64,
        count: usize,
    ) -> CommitAggregateEventsRequest {
        CommitAggregateEventsRequest {
            execution_context: ExecutionContext::new(tenant),
            events: UncommittedAggregateEvents::new(
                aggregate.clone(),
                AggregateRootVersion::new(expected),
                (0..count)
                    .map(|_| uncommitted(aggregate.event_source.as_str()))
                    .collect(),
            ),
        }
    }

    #[tokio::test]
    async fn requests_get_contiguous_blocks_in_arrival_order() {
        let tenant = TenantId::new();
        let aggregate = Aggregate::new(EventSourceId::new("cart-1").unwrap(), AggregateRootTypeId::new());
        let mut pipeline = CommitPipeline::new(EventLogSequenceNumber::new(10));

        let first = pipeline.try_add_events_from(free_request(tenant, 2)).unwrap();
        let second = pipeline
            .try_add_aggregate_events_from(aggregate_request(tenant, &aggregate, 3, 2))
            .unwrap();
        assert_eq!(pipeline.next_sequence_number(), EventLogSequenceNumber::new(14));

        let batch = pipeline.try_get_next_batch().unwrap().unwrap();
        assert_eq!(batch.commit().first_sequence_number(), EventLogSequenceNumber::new(10));
        assert_eq!(batch.commit().last_sequence_number(), EventLogSequenceNumber::new(13));
        assert_eq!(batch.aggregates().count(), 1);
        assert!(pipeline.try_get_next_batch().is_none());

        let resolved = batch.complete();
        assert_eq!(resolved, vec![aggregate.clone()]);

        let free = first.wait().await.unwrap();
        let seqs: Vec<u64> = free.iter().map(|e| e.sequence_number.value()).collect();
        assert_eq!(seqs, vec![10, 11]);

        let committed = second.wait().await.unwrap();
        assert_eq!(committed.aggregate_root_version, AggregateRootVersion::new(5));
        let versions: Vec<u64> = committed
            .events
            .iter()
            .map(|e| e.aggregate_root_version.value())
            .collect();
        assert_eq!(versions, vec![4, 5]);
        assert_eq!(committed.expected_version(), AggregateRootVersion::new(3));
    }

    #[tokio::test]
    async fn requests_after_a_drain_continue_the_numbering() {
        let tenant = TenantId::new();
        let mut pipeline = CommitPipeline::new(EventLogSequenceNumber::INITIAL);

        pipeline.try_add_events_from(free_request(tenant, 3)).unwrap();
        let in_flight = pipeline.try_get_next_batch().unwrap().unwrap();
        pipeline.try_add_events_from(free_request(tenant, 1)).unwrap();

        let next = pipeline.try_get_next_batch().unwrap().unwrap();
        assert_eq!(
            next.commit().first_sequence_number(),
            in_flight.commit().next_sequence_number()
        );
    }

    #[tokio::test]
    async fn failing_pending_requests_answers_every_caller() {
        let tenant = TenantId::new();
        let aggregate = Aggregate::new(EventSourceId::new("cart-2").unwrap(), AggregateRootTypeId::new());
        let mut pipeline = CommitPipeline::new(EventLogSequenceNumber::INITIAL);

        let free = pipeline.try_add_events_from(free_request(tenant, 1)).unwrap();
        let agg = pipeline
            .try_add_aggregate_events_from(aggregate_request(tenant, &aggregate, 0, 1))
            .unwrap();

        let resolved = pipeline.fail_pending(EventStoreError::ShuttingDown);
        assert_eq!(resolved, vec![aggregate]);
        assert!(!pipeline.has_pending());
        assert_eq!(free.wait().await.unwrap_err(), EventStoreError::ShuttingDown);
        assert_eq!(agg.wait().await.unwrap_err(), EventStoreError::ShuttingDown);
    }

    #[test]
    fn empty_and_versionless_requests_are_rejected() {
        let tenant = TenantId::new();
        let aggregate = Aggregate::new(EventSourceId::new("cart-3").unwrap(), AggregateRootTypeId::new());
        let mut pipeline = CommitPipeline::new(EventLogSequenceNumber::INITIAL);

        assert_eq!(
            pipeline.try_add_events_from(free_request(tenant, 0)).unwrap_err(),
            EventStoreError::NoEventsToCommit
        );

        let mut versionless = aggregate_request(tenant, &aggregate, 0, 1);
        versionless.events.expected_version = None;
        assert_eq!(
            pipeline.try_add_aggregate_events_from(versionless).unwrap_err(),
            EventStoreError::MissingExpectedVersion
        );
        assert_eq!(pipeline.next_sequence_number(), EventLogSequenceNumber::INITIAL);
    }
}
