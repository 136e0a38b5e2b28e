//! The unit of persistence and of subscription delivery.

use serde::{Deserialize, Serialize};

use eventlog_core::{Aggregate, AggregateRootVersion, EventLogSequenceNumber, EventStoreError};

use crate::committed::{CommittedAggregateEvents, CommittedEvent, CommittedEvents};

/// An immutable batch of committed events.
///
/// A commit covers a contiguous, ordered run of sequence numbers
/// `[first_sequence_number, last_sequence_number]`. It groups the results of every
/// request that was drained into the same batch, in request-arrival order.
///
/// Construction validates contiguity, so a `Commit` can never describe a gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    events: Vec<CommittedEvents>,
    aggregate_events: Vec<CommittedAggregateEvents>,
    ordered: Vec<CommittedEvent>,
    first_sequence_number: EventLogSequenceNumber,
    last_sequence_number: EventLogSequenceNumber,
}

impl Commit {
    pub fn new(
        events: Vec<CommittedEvents>,
        aggregate_events: Vec<CommittedAggregateEvents>,
    ) -> Result<Self, EventStoreError> {
        let mut ordered: Vec<CommittedEvent> = events
            .iter()
            .flat_map(|e| e.iter().cloned())
            .chain(
                aggregate_events
                    .iter()
                    .flat_map(|a| a.events.iter().map(|e| e.event.clone())),
            )
            .collect();
        ordered.sort_by_key(|e| e.sequence_number);

        let (first, last) = match (ordered.first(), ordered.last()) {
            (Some(first), Some(last)) => (first.sequence_number, last.sequence_number),
            _ => return Err(EventStoreError::NoEventsToCommit),
        };

        for (idx, event) in ordered.iter().enumerate() {
            let expected = first.advance(idx as u64);
            if event.sequence_number != expected {
                return Err(EventStoreError::invalid_request(format!(
                    "commit is not contiguous: expected sequence number {expected}, found {}",
                    event.sequence_number
                )));
            }
        }

        Ok(Self {
            events,
            aggregate_events,
            ordered,
            first_sequence_number: first,
            last_sequence_number: last,
        })
    }

    pub fn first_sequence_number(&self) -> EventLogSequenceNumber {
        self.first_sequence_number
    }

    pub fn last_sequence_number(&self) -> EventLogSequenceNumber {
        self.last_sequence_number
    }

    /// The first sequence number after this commit.
    pub fn next_sequence_number(&self) -> EventLogSequenceNumber {
        self.last_sequence_number.next()
    }

    pub fn event_count(&self) -> usize {
        self.ordered.len()
    }

    pub fn committed_events(&self) -> &[CommittedEvents] {
        &self.events
    }

    pub fn committed_aggregate_events(&self) -> &[CommittedAggregateEvents] {
        &self.aggregate_events
    }

    /// Every event of the commit in sequence-number order.
    pub fn all_events(&self) -> &[CommittedEvent] {
        &self.ordered
    }

    /// The events at or after `offset`, in order. Empty when `offset` is past the commit.
    pub fn events_from(&self, offset: EventLogSequenceNumber) -> &[CommittedEvent] {
        let skip = self.first_sequence_number.distance_to(offset) as usize;
        self.ordered.get(skip..).unwrap_or(&[])
    }

    /// Aggregates touched by this commit with their post-commit versions.
    pub fn aggregates(&self) -> impl Iterator<Item = (&Aggregate, AggregateRootVersion)> {
        self.aggregate_events
            .iter()
            .map(|a| (&a.aggregate, a.aggregate_root_version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Artifact;
    use crate::execution_context::ExecutionContext;
    use chrono::Utc;
    use eventlog_core::{EventSourceId, EventTypeId, TenantId};

    fn event(seq: u64) -> CommittedEvent {
        CommittedEvent {
            sequence_number: EventLogSequenceNumber::new(seq),
            occurred: Utc::now(),
            execution_context: ExecutionContext::new(TenantId::new()),
            event_source: EventSourceId::new("source").unwrap(),
            event_type: Artifact::new(EventTypeId::new(), 1),
            public: false,
            content: serde_json::json!({ "seq": seq }),
        }
    }

    #[test]
    fn commit_orders_and_bounds_events() {
        let commit = Commit::new(
            vec![
                CommittedEvents::new(vec![event(5), event(6)]),
                CommittedEvents::new(vec![event(7)]),
            ],
            vec![],
        )
        .unwrap();

        assert_eq!(commit.first_sequence_number().value(), 5);
        assert_eq!(commit.last_sequence_number().value(), 7);
        assert_eq!(commit.next_sequence_number().value(), 8);
        assert_eq!(commit.event_count(), 3);
        assert_eq!(commit.events_from(EventLogSequenceNumber::new(6)).len(), 2);
        assert_eq!(commit.events_from(EventLogSequenceNumber::new(2)).len(), 3);
        assert!(commit.events_from(EventLogSequenceNumber::new(8)).is_empty());
    }

    #[test]
    fn commit_with_gap_is_rejected() {
        let result = Commit::new(
            vec![CommittedEvents::new(vec![event(1), event(3)])],
            vec![],
        );
        assert!(matches!(result, Err(EventStoreError::InvalidRequest(_))));
    }

    #[test]
    fn empty_commit_is_rejected() {
        assert_eq!(
            Commit::new(vec![], vec![]).unwrap_err(),
            EventStoreError::NoEventsToCommit
        );
    }
}
