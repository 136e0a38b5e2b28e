//! Event log positions.

use serde::{Deserialize, Serialize};

/// Position of an event in a tenant's event log.
///
/// Sequence numbers are:
/// - **gapless**: every number from `INITIAL` up to the log head is used exactly once
/// - **monotonic**: assigned in commit order, never reused
/// - **assigned at commit-build time**, not when a request arrives
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventLogSequenceNumber(u64);

impl EventLogSequenceNumber {
    /// The position of the first event ever committed to a log.
    pub const INITIAL: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The position `count` events after this one.
    pub const fn advance(self, count: u64) -> Self {
        Self(self.0 + count)
    }

    /// Number of positions in `[self, end)`; zero when `end` is not after `self`.
    pub const fn distance_to(self, end: Self) -> u64 {
        end.0.saturating_sub(self.0)
    }
}

impl core::fmt::Display for EventLogSequenceNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for EventLogSequenceNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<EventLogSequenceNumber> for u64 {
    fn from(value: EventLogSequenceNumber) -> Self {
        value.0
    }
}
