//! Request/response contracts of the event log.
//!
//! Every message is addressable by tenant (through its `ExecutionContext` or the
//! handle it is sent to). Failures travel as [`Failure`]: a structured id plus a
//! human-readable reason.

use serde::{Deserialize, Serialize};

use eventlog_core::{
    EventLogSequenceNumber, EventStoreError, Failure, SubscriptionId,
};

use crate::committed::{CommittedAggregateEvents, CommittedEvent, CommittedEvents};
use crate::event::{UncommittedAggregateEvents, UncommittedEvent};
use crate::execution_context::ExecutionContext;

/// Largest page the catch-up path ever fetches in one request.
pub const MAX_CATCHUP_PAGE_SIZE: usize = 1000;

/// Commit free-standing events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEventsRequest {
    pub execution_context: ExecutionContext,
    pub events: Vec<UncommittedEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitEventsResponse {
    Events(CommittedEvents),
    Failure(Failure),
}

impl From<Result<CommittedEvents, EventStoreError>> for CommitEventsResponse {
    fn from(value: Result<CommittedEvents, EventStoreError>) -> Self {
        match value {
            Ok(events) => Self::Events(events),
            Err(err) => Self::Failure(err.to_failure()),
        }
    }
}

/// Commit the events produced by one aggregate root instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAggregateEventsRequest {
    pub execution_context: ExecutionContext,
    pub events: UncommittedAggregateEvents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitAggregateEventsResponse {
    Events(CommittedAggregateEvents),
    Failure(Failure),
}

impl From<Result<CommittedAggregateEvents, EventStoreError>> for CommitAggregateEventsResponse {
    fn from(value: Result<CommittedAggregateEvents, EventStoreError>) -> Self {
        match value {
            Ok(events) => Self::Events(events),
            Err(err) => Self::Failure(err.to_failure()),
        }
    }
}

/// Acknowledges (or refuses) an event store subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStoreSubscriptionAck {
    pub subscription_id: SubscriptionId,
    pub ok: bool,
    pub failure: Option<Failure>,
}

impl EventStoreSubscriptionAck {
    pub fn accepted(subscription_id: SubscriptionId) -> Self {
        Self {
            subscription_id,
            ok: true,
            failure: None,
        }
    }

    pub fn rejected(subscription_id: SubscriptionId, error: &EventStoreError) -> Self {
        Self {
            subscription_id,
            ok: false,
            failure: Some(error.to_failure()),
        }
    }
}

/// A range of the event log pushed to a subscription target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEvents {
    pub subscription_id: SubscriptionId,
    pub from_offset: EventLogSequenceNumber,
    pub to_offset: EventLogSequenceNumber,
    pub events: Vec<CommittedEvent>,
}

impl SubscriptionEvents {
    /// The acknowledgement a target sends once the range is handled.
    pub fn ack(&self) -> SubscriptionEventsAck {
        SubscriptionEventsAck {
            from_offset: self.from_offset,
            to_offset: self.to_offset,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEventsAck {
    pub from_offset: EventLogSequenceNumber,
    pub to_offset: EventLogSequenceNumber,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelEventStoreSubscription {
    pub subscription_id: SubscriptionId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelEventStoreSubscriptionAck {
    pub subscription_id: SubscriptionId,
}

/// Request for a page of historical events.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogCatchupRequest {
    pub from: EventLogSequenceNumber,
    pub max_count: usize,
}

impl EventLogCatchupRequest {
    /// Builds a request; the page size is capped at [`MAX_CATCHUP_PAGE_SIZE`].
    pub fn new(from: EventLogSequenceNumber, max_count: usize) -> Self {
        Self {
            from,
            max_count: max_count.clamp(1, MAX_CATCHUP_PAGE_SIZE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogCatchupResponse {
    pub from: EventLogSequenceNumber,
    pub events: Vec<CommittedEvent>,
}
