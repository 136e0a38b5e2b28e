use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use eventlog_core::{
    Aggregate, AggregateRootVersion, EventSourceId, EventStoreError, EventTypeId,
};

/// Identifies an event type together with its schema generation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact {
    pub id: EventTypeId,
    pub generation: u32,
}

impl Artifact {
    pub fn new(id: EventTypeId, generation: u32) -> Self {
        Self { id, generation }
    }
}

/// A typed domain event that can be committed to the event log.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution through `generation`)
/// - designed to be **append-only**
pub trait Event: Serialize {
    /// Stable event type identifier.
    fn event_type(&self) -> EventTypeId;

    /// Schema generation for this event type.
    fn generation(&self) -> u32 {
        1
    }

    /// Whether the event may be shared with other runtimes.
    fn is_public(&self) -> bool {
        false
    }
}

/// An event ready to be committed (not yet assigned a sequence number).
///
/// `UncommittedEvent` represents a fact a client wants appended to the tenant's event log.
/// The committer assigns its `EventLogSequenceNumber` when the commit is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_source: EventSourceId,
    pub event_type: Artifact,
    pub public: bool,
    pub content: JsonValue,
}

impl UncommittedEvent {
    pub fn new(event_source: EventSourceId, event_type: Artifact, content: JsonValue) -> Self {
        Self {
            event_source,
            event_type,
            public: false,
            content,
        }
    }

    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    /// Convenience constructor from a typed event.
    ///
    /// Serializes the event to JSON while keeping the type metadata needed to read it back.
    pub fn from_typed<E>(event_source: EventSourceId, event: &E) -> Result<Self, EventStoreError>
    where
        E: Event,
    {
        let content = serde_json::to_value(event).map_err(|e| {
            EventStoreError::invalid_request(format!("event content serialization failed: {e}"))
        })?;

        Ok(Self {
            event_source,
            event_type: Artifact::new(event.event_type(), event.generation()),
            public: event.is_public(),
            content,
        })
    }
}

/// Events produced by one aggregate root instance, committed together.
///
/// `expected_version` is the version the producer observed before applying the events;
/// the commit is only accepted when it matches the stored version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedAggregateEvents {
    pub aggregate: Aggregate,
    pub expected_version: Option<AggregateRootVersion>,
    pub events: Vec<UncommittedEvent>,
}

impl UncommittedAggregateEvents {
    pub fn new(
        aggregate: Aggregate,
        expected_version: AggregateRootVersion,
        events: Vec<UncommittedEvent>,
    ) -> Self {
        Self {
            aggregate,
            expected_version: Some(expected_version),
            events,
        }
    }

    /// Checks the events belong to the aggregate's event source.
    pub fn validate_event_sources(&self) -> Result<(), EventStoreError> {
        for (idx, event) in self.events.iter().enumerate() {
            if event.event_source != self.aggregate.event_source {
                return Err(EventStoreError::invalid_request(format!(
                    "event at index {idx} has event source '{}', aggregate has '{}'",
                    event.event_source, self.aggregate.event_source
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventlog_core::AggregateRootTypeId;

    #[derive(Serialize)]
    struct CustomerRegistered {
        name: String,
    }

    impl Event for CustomerRegistered {
        fn event_type(&self) -> EventTypeId {
            EventTypeId::from_uuid(uuid::Uuid::from_u128(7))
        }

        fn generation(&self) -> u32 {
            2
        }
    }

    #[test]
    fn typed_events_keep_their_artifact() {
        let source = EventSourceId::new("customer-1").unwrap();
        let event = UncommittedEvent::from_typed(
            source.clone(),
            &CustomerRegistered {
                name: "Ada".to_string(),
            },
        )
        .unwrap();

        assert_eq!(event.event_source, source);
        assert_eq!(event.event_type.generation, 2);
        assert_eq!(event.content["name"], "Ada");
        assert!(!event.public);
    }

    #[test]
    fn aggregate_events_must_share_the_event_source() {
        let aggregate = Aggregate::new(
            EventSourceId::new("a").unwrap(),
            AggregateRootTypeId::new(),
        );
        let artifact = Artifact::new(EventTypeId::new(), 1);
        let stray = UncommittedEvent::new(
            EventSourceId::new("b").unwrap(),
            artifact,
            serde_json::json!({}),
        );
        let events =
            UncommittedAggregateEvents::new(aggregate, AggregateRootVersion::INITIAL, vec![stray]);

        assert!(matches!(
            events.validate_event_sources(),
            Err(EventStoreError::InvalidRequest(_))
        ));
    }
}
