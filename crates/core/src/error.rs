//! Event log error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::aggregate::{Aggregate, AggregateRootVersion};
use crate::id::SubscriptionId;
use crate::sequence::EventLogSequenceNumber;

/// Result type used across the event log.
pub type EventStoreResult<T> = Result<T, EventStoreError>;

/// Event log error.
///
/// Split in two families:
/// - **caller-correctable** (conflict, in-flight, no events, invalid request): returned to
///   the single request that caused it, never retried internally
/// - **shared** (unavailable, shutting down, not ready): affect every request co-batched
///   with the failure; the caller may retry at its own discretion
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    /// The persistence collaborator could not accept the read or write.
    #[error("event store unavailable: {0}")]
    Unavailable(String),

    /// The expected aggregate root version did not match the stored version.
    #[error(
        "aggregate root concurrency conflict for {aggregate}: expected version {expected}, actual version {actual}"
    )]
    AggregateRootConcurrencyConflict {
        aggregate: Aggregate,
        expected: AggregateRootVersion,
        actual: AggregateRootVersion,
    },

    /// Another commit for the same aggregate is still being built or persisted.
    #[error("aggregate {0} already has a commit in flight")]
    AggregateRootAlreadyInFlight(Aggregate),

    #[error("no events to commit")]
    NoEventsToCommit,

    #[error("aggregate events must carry an expected aggregate root version")]
    MissingExpectedVersion,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("event store is shutting down")]
    ShuttingDown,

    #[error("event store is not ready")]
    NotReady,

    #[error("subscription {0} already exists")]
    SubscriptionAlreadyExists(SubscriptionId),

    /// A subscriber received a batch that does not continue where the previous one ended.
    #[error("event log offset mismatch: expected batch from {expected}, received from {actual}")]
    OffsetMismatch {
        expected: EventLogSequenceNumber,
        actual: EventLogSequenceNumber,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl EventStoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn concurrency_conflict(
        aggregate: Aggregate,
        expected: AggregateRootVersion,
        actual: AggregateRootVersion,
    ) -> Self {
        Self::AggregateRootConcurrencyConflict {
            aggregate,
            expected,
            actual,
        }
    }

    /// Whether the failure affects a whole batch rather than the single request.
    pub fn is_shared(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::ShuttingDown | Self::NotReady | Self::Cancelled
        )
    }

    pub fn failure_id(&self) -> FailureId {
        match self {
            Self::Unavailable(_) => FailureId::EVENT_STORE_UNAVAILABLE,
            Self::AggregateRootConcurrencyConflict { .. } => FailureId::AGGREGATE_ROOT_CONCURRENCY_CONFLICT,
            Self::AggregateRootAlreadyInFlight(_) => FailureId::AGGREGATE_ROOT_ALREADY_IN_FLIGHT,
            Self::NoEventsToCommit => FailureId::NO_EVENTS_TO_COMMIT,
            Self::MissingExpectedVersion | Self::InvalidRequest(_) => FailureId::INVALID_REQUEST,
            Self::ShuttingDown => FailureId::SHUTTING_DOWN,
            Self::NotReady => FailureId::NOT_READY,
            Self::SubscriptionAlreadyExists(_) => FailureId::SUBSCRIPTION_ALREADY_EXISTS,
            Self::OffsetMismatch { .. } => FailureId::OFFSET_MISMATCH,
            Self::Cancelled => FailureId::CANCELLED,
        }
    }

    /// The wire representation carried in response messages.
    pub fn to_failure(&self) -> Failure {
        Failure {
            id: self.failure_id(),
            reason: self.to_string(),
        }
    }
}

/// Stable identifier of a failure kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureId(Uuid);

impl FailureId {
    pub const EVENT_STORE_UNAVAILABLE: Self =
        Self(Uuid::from_u128(0xb6fcb5dd_a32b_435b_8bf4_ed96e846d460));
    pub const AGGREGATE_ROOT_CONCURRENCY_CONFLICT: Self =
        Self(Uuid::from_u128(0xf25cccfb_3ad7_4ac5_8d1f_e6a6b3b4e1a7));
    pub const AGGREGATE_ROOT_ALREADY_IN_FLIGHT: Self =
        Self(Uuid::from_u128(0x3b2c5c1e_8f0d_4f6a_9a47_52e7c1d0a9b3));
    pub const NO_EVENTS_TO_COMMIT: Self =
        Self(Uuid::from_u128(0x0d4a1f38_2e6b_4c0e_b1f7_9c83d5e2a614));
    pub const INVALID_REQUEST: Self =
        Self(Uuid::from_u128(0x6c1e9d2a_47b3_4e58_a0c9_1f2d3b4c5e6f));
    pub const SHUTTING_DOWN: Self =
        Self(Uuid::from_u128(0x9a8b7c6d_5e4f_4a3b_8c2d_1e0f9a8b7c6d));
    pub const NOT_READY: Self =
        Self(Uuid::from_u128(0x2f1e0d9c_8b7a_4d6e_9f5a_4b3c2d1e0f9a));
    pub const SUBSCRIPTION_ALREADY_EXISTS: Self =
        Self(Uuid::from_u128(0x7e6d5c4b_3a29_4f18_8e07_d6c5b4a39281));
    pub const OFFSET_MISMATCH: Self =
        Self(Uuid::from_u128(0x1c2d3e4f_5a6b_4c7d_8e9f_0a1b2c3d4e5f));
    pub const CANCELLED: Self =
        Self(Uuid::from_u128(0x8f9e0d1c_2b3a_4948_a756_6f5e4d3c2b1a));

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl core::fmt::Display for FailureId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Failure payload of a response message: a structured id plus a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub id: FailureId,
    pub reason: String,
}

impl From<&EventStoreError> for Failure {
    fn from(value: &EventStoreError) -> Self {
        value.to_failure()
    }
}

impl From<EventStoreError> for Failure {
    fn from(value: EventStoreError) -> Self {
        value.to_failure()
    }
}
