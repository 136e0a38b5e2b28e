use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use eventlog_core::{EventLogSequenceNumber, EventTypeId};

use crate::committed::CommittedEvent;

/// The unit delivered to an event log subscriber.
///
/// A batch covers the offsets `[from, to]` of the log; `matched_events` holds the events
/// in that range that passed the subscription's filter (possibly none). Consecutive
/// batches delivered to one subscriber tile the log: `previous.to + 1 == next.from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogBatch {
    pub from: EventLogSequenceNumber,
    pub to: EventLogSequenceNumber,
    pub matched_events: Vec<CommittedEvent>,
}

impl EventLogBatch {
    /// The offset the next batch must start at.
    pub fn next_offset(&self) -> EventLogSequenceNumber {
        self.to.next()
    }
}

/// Event-type filter of a subscription. An empty filter matches every event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeFilter(HashSet<EventTypeId>);

impl EventTypeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, event: &CommittedEvent) -> bool {
        self.0.is_empty() || self.0.contains(&event.event_type.id)
    }

    /// Clones the matching events out of `events`.
    pub fn apply(&self, events: &[CommittedEvent]) -> Vec<CommittedEvent> {
        events.iter().filter(|e| self.matches(e)).cloned().collect()
    }

    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<EventTypeId> for EventTypeFilter {
    fn from_iter<T: IntoIterator<Item = EventTypeId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Artifact;
    use crate::execution_context::ExecutionContext;
    use chrono::Utc;
    use eventlog_core::{EventSourceId, TenantId};

    fn event_of(event_type: EventTypeId) -> CommittedEvent {
        CommittedEvent {
            sequence_number: EventLogSequenceNumber::INITIAL,
            occurred: Utc::now(),
            execution_context: ExecutionContext::new(TenantId::new()),
            event_source: EventSourceId::new("s").unwrap(),
            event_type: Artifact::new(event_type, 1),
            public: false,
            content: serde_json::Value::Null,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(EventTypeFilter::all().matches(&event_of(EventTypeId::new())));
    }

    #[test]
    fn filter_keeps_only_listed_types() {
        let wanted = EventTypeId::new();
        let filter: EventTypeFilter = [wanted].into_iter().collect();
        let kept = filter.apply(&[event_of(wanted), event_of(EventTypeId::new())]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].event_type.id, wanted);
    }
}
