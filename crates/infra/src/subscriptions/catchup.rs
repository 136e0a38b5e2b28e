//! Historical backfill for subscriptions.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use eventlog_core::{EventStoreError, EventStoreResult, TenantId};
use eventlog_events::{EventLogCatchupRequest, EventLogCatchupResponse};

use crate::config::EventLogConfig;
use crate::event_store::EventLogPersistence;
use crate::shutdown::ShutdownSignal;

struct FetchPage {
    request: EventLogCatchupRequest,
    cancel: ShutdownSignal,
    respond: oneshot::Sender<EventStoreResult<EventLogCatchupResponse>>,
}

/// Address of a tenant's catch-up actor.
#[derive(Clone)]
pub struct EventStoreCatchupHandle {
    inbox: mpsc::UnboundedSender<FetchPage>,
}

impl std::fmt::Debug for EventStoreCatchupHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStoreCatchupHandle").finish_non_exhaustive()
    }
}

impl EventStoreCatchupHandle {
    /// Fetches one page of the log.
    ///
    /// Transient storage failures are retried inside the actor; the only errors returned are
    /// [`EventStoreError::Cancelled`] (once `cancel` fires) and
    /// [`EventStoreError::ShuttingDown`].
    pub async fn fetch(
        &self,
        request: EventLogCatchupRequest,
        cancel: &ShutdownSignal,
    ) -> EventStoreResult<EventLogCatchupResponse> {
        let (respond, response) = oneshot::channel();
        self.inbox
            .send(FetchPage {
                request,
                cancel: cancel.clone(),
                respond,
            })
            .map_err(|_| EventStoreError::ShuttingDown)?;
        response.await.map_err(|_| EventStoreError::ShuttingDown)?
    }
}

/// Answers bounded historical-range requests for one tenant.
///
/// Each request is served by its own task so a slow page for one subscription never
/// delays another.
pub struct EventStoreCatchupActor {
    tenant: TenantId,
    config: EventLogConfig,
    persistence: Arc<dyn EventLogPersistence>,
    shutdown: ShutdownSignal,
}

impl EventStoreCatchupActor {
    pub fn spawn(
        tenant: TenantId,
        config: EventLogConfig,
        persistence: Arc<dyn EventLogPersistence>,
        shutdown: ShutdownSignal,
    ) -> EventStoreCatchupHandle {
        let (inbox, receiver) = mpsc::unbounded_channel();
        let actor = Self {
            tenant,
            config,
            persistence,
            shutdown,
        };
        tokio::spawn(actor.run(receiver));
        EventStoreCatchupHandle { inbox }
    }

    async fn run(self, mut inbox: mpsc::UnboundedReceiver<FetchPage>) {
        loop {
            let page = tokio::select! {
                page = inbox.recv() => match page {
                    Some(page) => page,
                    None => break,
                },
                _ = self.shutdown.triggered() => break,
            };

            let task = PageFetch {
                tenant: self.tenant,
                persistence: self.persistence.clone(),
                max_count: page.request.max_count.min(self.config.catchup_page_size),
                retry_delay: self.config.fetch_retry_delay,
                shutdown: self.shutdown.clone(),
            };
            tokio::spawn(async move {
                let result = task.run(page.request, &page.cancel).await;
                let _ = page.respond.send(result);
            });
        }
        debug!(tenant = %self.tenant, "catch-up actor stopped");
    }
}

struct PageFetch {
    tenant: TenantId,
    persistence: Arc<dyn EventLogPersistence>,
    max_count: usize,
    retry_delay: std::time::Duration,
    shutdown: ShutdownSignal,
}

impl PageFetch {
    async fn run(
        self,
        request: EventLogCatchupRequest,
        cancel: &ShutdownSignal,
    ) -> EventStoreResult<EventLogCatchupResponse> {
        loop {
            if cancel.is_triggered() || self.shutdown.is_triggered() {
                return Err(EventStoreError::Cancelled);
            }

            match self
                .persistence
                .fetch_committed_events(self.tenant, request.from, self.max_count)
                .await
            {
                Ok(events) => {
                    return Ok(EventLogCatchupResponse {
                        from: request.from,
                        events,
                    });
                }
                Err(err) => {
                    warn!(tenant = %self.tenant, from = %request.from, error = %err, "catch-up fetch failed; retrying");
                }
            }

            tokio::select! {
                _ = cancel.triggered() => return Err(EventStoreError::Cancelled),
                _ = self.shutdown.triggered() => return Err(EventStoreError::Cancelled),
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use eventlog_core::{EventLogSequenceNumber, EventSourceId, EventTypeId};
    use eventlog_events::{Artifact, Commit, CommittedEvent, CommittedEvents, ExecutionContext};

    use crate::event_store::{InMemoryEventStore, PersistCommits};

    async fn seeded(tenant: TenantId, count: u64) -> Arc<InMemoryEventStore> {
        let store = Arc::new(InMemoryEventStore::new());
        let events = (0..count)
            .map(|seq| CommittedEvent {
                sequence_number: EventLogSequenceNumber::new(seq),
                occurred: Utc::now(),
                execution_context: ExecutionContext::new(tenant),
                event_source: EventSourceId::new("seed").unwrap(),
                event_type: Artifact::new(EventTypeId::new(), 1),
                public: false,
                content: serde_json::json!({ "seq": seq }),
            })
            .collect();
        let commit = Commit::new(vec![CommittedEvents::new(events)], vec![]).unwrap();
        store.persist(tenant, &commit).await.unwrap();
        store
    }

    fn config() -> EventLogConfig {
        EventLogConfig::default()
            .with_catchup_page_size(10)
            .with_fetch_retry_delay(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn pages_are_capped_by_the_configured_size() {
        let tenant = TenantId::new();
        let store = seeded(tenant, 25).await;
        let handle = EventStoreCatchupActor::spawn(tenant, config(), store, ShutdownSignal::new());

        let page = handle
            .fetch(
                EventLogCatchupRequest::new(EventLogSequenceNumber::new(5), 1000),
                &ShutdownSignal::new(),
            )
            .await
            .unwrap();

        assert_eq!(page.from, EventLogSequenceNumber::new(5));
        assert_eq!(page.events.len(), 10);
        assert_eq!(page.events[0].sequence_number, EventLogSequenceNumber::new(5));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_internally() {
        let tenant = TenantId::new();
        let store = seeded(tenant, 3).await;
        store.fail_next_fetches(3);
        let handle = EventStoreCatchupActor::spawn(tenant, config(), store, ShutdownSignal::new());

        let page = handle
            .fetch(
                EventLogCatchupRequest::new(EventLogSequenceNumber::INITIAL, 10),
                &ShutdownSignal::new(),
            )
            .await
            .unwrap();
        assert_eq!(page.events.len(), 3);
    }

    #[tokio::test]
    async fn cancellation_ends_the_retry_loop() {
        let tenant = TenantId::new();
        let store = seeded(tenant, 3).await;
        store.fail_next_fetches(usize::MAX);
        let handle = EventStoreCatchupActor::spawn(tenant, config(), store, ShutdownSignal::new());

        let cancel = ShutdownSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.trigger();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            handle.fetch(
                EventLogCatchupRequest::new(EventLogSequenceNumber::INITIAL, 10),
                &cancel,
            ),
        )
        .await
        .unwrap();
        assert_eq!(result.unwrap_err(), EventStoreError::Cancelled);
    }
}
