//! Aggregate root identity and versions.

use serde::{Deserialize, Serialize};

use crate::id::{AggregateRootTypeId, EventSourceId};

/// An aggregate root instance: the pair (event source, aggregate root type).
///
/// Identity and hashing are structural, so `Aggregate` is used directly as the key
/// of the version cache and of the in-flight set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggregate {
    pub event_source: EventSourceId,
    pub aggregate_root: AggregateRootTypeId,
}

impl Aggregate {
    pub fn new(event_source: EventSourceId, aggregate_root: AggregateRootTypeId) -> Self {
        Self {
            event_source,
            aggregate_root,
        }
    }
}

impl core::fmt::Display for Aggregate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.aggregate_root, self.event_source)
    }
}

/// Version of an aggregate root instance.
///
/// Starts at `INITIAL` (no events) and increases by exactly the number of events
/// committed for the aggregate in one request.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AggregateRootVersion(u64);

impl AggregateRootVersion {
    pub const INITIAL: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// The version after `count` more events have been applied.
    pub const fn advance(self, count: u64) -> Self {
        Self(self.0 + count)
    }
}

impl core::fmt::Display for AggregateRootVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for AggregateRootVersion {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
