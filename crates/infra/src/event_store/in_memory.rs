use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use eventlog_core::{Aggregate, AggregateRootVersion, EventLogSequenceNumber, TenantId};
use eventlog_events::{Commit, CommittedEvent};

use super::r#trait::{
    FetchAggregateRootVersions, FetchCommittedEvents, PersistCommits, PersistenceError,
};

#[derive(Debug, Default)]
struct TenantLog {
    events: Vec<CommittedEvent>,
    aggregates: HashMap<Aggregate, AggregateRootVersion>,
}

impl TenantLog {
    fn next_sequence_number(&self) -> EventLogSequenceNumber {
        EventLogSequenceNumber::new(self.events.len() as u64)
    }
}

/// In-memory event log backend.
///
/// Intended for tests/dev. Not optimized for performance. Supports injecting transient
/// failures and persist latency so the commit and catch-up paths can be exercised.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    logs: RwLock<HashMap<TenantId, TenantLog>>,
    failing_persists: AtomicUsize,
    failing_fetches: AtomicUsize,
    failing_commit_at: Mutex<Option<EventLogSequenceNumber>>,
    persist_delay: Option<Duration>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every persist sleeps for `delay` before touching the log.
    pub fn with_persist_delay(mut self, delay: Duration) -> Self {
        self.persist_delay = Some(delay);
        self
    }

    /// The next `count` persist calls fail with [`PersistenceError::Unavailable`].
    pub fn fail_next_persists(&self, count: usize) {
        self.failing_persists.store(count, Ordering::SeqCst);
    }

    /// The next persist of a commit starting at `first` fails with
    /// [`PersistenceError::Unavailable`].
    pub fn fail_commit_starting_at(&self, first: EventLogSequenceNumber) {
        if let Ok(mut failing) = self.failing_commit_at.lock() {
            *failing = Some(first);
        }
    }

    /// The next `count` fetches (events or versions) fail with [`PersistenceError::Unavailable`].
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Number of events stored for `tenant`.
    pub fn len(&self, tenant: TenantId) -> usize {
        self.logs
            .read()
            .map(|logs| logs.get(&tenant).map(|l| l.events.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    fn take_injected_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn fetch_guard(&self) -> Result<(), PersistenceError> {
        if Self::take_injected_failure(&self.failing_fetches) {
            return Err(PersistenceError::unavailable("injected fetch failure"));
        }
        Ok(())
    }
}

fn lock_poisoned() -> PersistenceError {
    PersistenceError::unavailable("lock poisoned")
}

#[async_trait]
impl PersistCommits for InMemoryEventStore {
    async fn persist(&self, tenant: TenantId, commit: &Commit) -> Result<(), PersistenceError> {
        if let Some(delay) = self.persist_delay {
            tokio::time::sleep(delay).await;
        }
        if Self::take_injected_failure(&self.failing_persists) {
            return Err(PersistenceError::unavailable("injected persist failure"));
        }
        if let Ok(mut failing) = self.failing_commit_at.lock() {
            if *failing == Some(commit.first_sequence_number()) {
                *failing = None;
                return Err(PersistenceError::unavailable(format!(
                    "injected failure for commit starting at {}",
                    commit.first_sequence_number()
                )));
            }
        }

        let mut logs = self.logs.write().map_err(|_| lock_poisoned())?;
        let log = logs.entry(tenant).or_default();

        let next = log.next_sequence_number();
        if commit.first_sequence_number() != next {
            return Err(PersistenceError::SequenceMismatch {
                expected: next,
                actual: commit.first_sequence_number(),
            });
        }

        // Validate every aggregate before mutating anything.
        for aggregate_events in commit.committed_aggregate_events() {
            let stored = log
                .aggregates
                .get(&aggregate_events.aggregate)
                .copied()
                .unwrap_or(AggregateRootVersion::INITIAL);
            let expected = aggregate_events.expected_version();
            if stored != expected {
                return Err(PersistenceError::AggregateRootVersionMismatch {
                    aggregate: aggregate_events.aggregate.clone(),
                    stored,
                    expected,
                });
            }
        }

        log.events.extend(commit.all_events().iter().cloned());
        for (aggregate, version) in commit.aggregates() {
            log.aggregates.insert(aggregate.clone(), version);
        }

        Ok(())
    }

    async fn next_sequence_number(
        &self,
        tenant: TenantId,
    ) -> Result<EventLogSequenceNumber, PersistenceError> {
        self.fetch_guard()?;
        let logs = self.logs.read().map_err(|_| lock_poisoned())?;
        Ok(logs
            .get(&tenant)
            .map(TenantLog::next_sequence_number)
            .unwrap_or(EventLogSequenceNumber::INITIAL))
    }
}

#[async_trait]
impl FetchCommittedEvents for InMemoryEventStore {
    async fn fetch_committed_events(
        &self,
        tenant: TenantId,
        from: EventLogSequenceNumber,
        max_count: usize,
    ) -> Result<Vec<CommittedEvent>, PersistenceError> {
        self.fetch_guard()?;
        let logs = self.logs.read().map_err(|_| lock_poisoned())?;
        let Some(log) = logs.get(&tenant) else {
            return Ok(vec![]);
        };

        let start = (from.value() as usize).min(log.events.len());
        let end = start.saturating_add(max_count).min(log.events.len());
        Ok(log.events[start..end].to_vec())
    }
}

#[async_trait]
impl FetchAggregateRootVersions for InMemoryEventStore {
    async fn fetch_aggregate_root_version(
        &self,
        tenant: TenantId,
        aggregate: &Aggregate,
    ) -> Result<AggregateRootVersion, PersistenceError> {
        self.fetch_guard()?;
        let logs = self.logs.read().map_err(|_| lock_poisoned())?;
        Ok(logs
            .get(&tenant)
            .and_then(|log| log.aggregates.get(aggregate).copied())
            .unwrap_or(AggregateRootVersion::INITIAL))
    }
}
