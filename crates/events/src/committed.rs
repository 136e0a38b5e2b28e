use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use eventlog_core::{
    Aggregate, AggregateRootTypeId, AggregateRootVersion, EventLogSequenceNumber, EventSourceId,
};

use crate::event::Artifact;
use crate::execution_context::ExecutionContext;

/// An event stored in the event log (assigned a sequence number).
///
/// Never mutated after creation. This is what subscribers receive and what a
/// direct fetch returns for the same range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedEvent {
    pub sequence_number: EventLogSequenceNumber,
    pub occurred: DateTime<Utc>,
    pub execution_context: ExecutionContext,
    pub event_source: EventSourceId,
    pub event_type: Artifact,
    pub public: bool,
    pub content: JsonValue,
}

/// The committed events of one free-standing commit request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommittedEvents(Vec<CommittedEvent>);

impl CommittedEvents {
    pub fn new(events: Vec<CommittedEvent>) -> Self {
        Self(events)
    }

    pub fn as_slice(&self) -> &[CommittedEvent] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first_sequence_number(&self) -> Option<EventLogSequenceNumber> {
        self.0.first().map(|e| e.sequence_number)
    }

    pub fn last_sequence_number(&self) -> Option<EventLogSequenceNumber> {
        self.0.last().map(|e| e.sequence_number)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommittedEvent> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<CommittedEvent> {
        self.0
    }
}

/// An event committed by an aggregate root.
///
/// `aggregate_root_version` is the aggregate's version *after* this event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedAggregateEvent {
    pub event: CommittedEvent,
    pub aggregate_root: AggregateRootTypeId,
    pub aggregate_root_version: AggregateRootVersion,
}

impl CommittedAggregateEvent {
    pub fn aggregate(&self) -> Aggregate {
        Aggregate::new(self.event.event_source.clone(), self.aggregate_root)
    }
}

/// The committed events of one aggregate commit request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedAggregateEvents {
    pub aggregate: Aggregate,
    /// Version of the aggregate once every event in this commit is applied.
    pub aggregate_root_version: AggregateRootVersion,
    pub events: Vec<CommittedAggregateEvent>,
}

impl CommittedAggregateEvents {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn first_sequence_number(&self) -> Option<EventLogSequenceNumber> {
        self.events.first().map(|e| e.event.sequence_number)
    }

    pub fn last_sequence_number(&self) -> Option<EventLogSequenceNumber> {
        self.events.last().map(|e| e.event.sequence_number)
    }

    /// The version the aggregate had before this commit.
    pub fn expected_version(&self) -> AggregateRootVersion {
        AggregateRootVersion::new(
            self.aggregate_root_version
                .value()
                .saturating_sub(self.events.len() as u64),
        )
    }
}
