//! The per-tenant committer actor.
//!
//! All mutable state (pipeline, version cache, in-flight aggregates) is owned by one task
//! and only touched while handling a message from its inbox. Asynchronous work (version
//! fetches, persists, the startup read) runs in spawned tasks that post their outcome back
//! to the same inbox as a continuation message.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use eventlog_core::{
    Aggregate, AggregateRootVersion, EventLogSequenceNumber, EventStoreError, EventStoreResult,
    TenantId,
};
use eventlog_events::{
    Commit, CommitAggregateEventsRequest, CommitEventsRequest, CommittedAggregateEvents,
    CommittedEvents, TenantScoped,
};

use crate::config::EventLogConfig;
use crate::event_store::{EventLogPersistence, PersistenceError};
use crate::shutdown::{ShutdownHook, ShutdownSignal};

use super::pipeline::{Batch, CommitPipeline, PendingResult};
use super::version_cache::{reconcile, AggregateRootVersionCache, Reconciliation};

/// Receives every commit once it has been persisted, in commit order.
pub trait CommitListener: Send + Sync {
    fn on_commit(&self, commit: Arc<Commit>);
}

type Reply<T> = oneshot::Sender<EventStoreResult<PendingResult<T>>>;

struct AwaitingVersion {
    request: CommitAggregateEventsRequest,
    expected: AggregateRootVersion,
    cached: Option<AggregateRootVersion>,
    respond: Reply<CommittedAggregateEvents>,
}

impl AwaitingVersion {
    fn aggregate(&self) -> &Aggregate {
        &self.request.events.aggregate
    }
}

enum CommitterMessage {
    Commit {
        request: CommitEventsRequest,
        respond: Reply<CommittedEvents>,
    },
    CommitForAggregate {
        request: CommitAggregateEventsRequest,
        respond: Reply<CommittedAggregateEvents>,
    },
    Started(EventLogSequenceNumber),
    AggregateVersionFetched {
        awaiting: AwaitingVersion,
        result: Result<AggregateRootVersion, PersistenceError>,
    },
    BatchPersisted {
        batch: Batch,
        result: Result<(), PersistenceError>,
    },
    Shutdown,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CommitterState {
    Starting,
    Ready,
    ShuttingDown,
    Stopped,
}

/// Address of a running committer.
#[derive(Clone)]
pub struct CommitterHandle {
    tenant: TenantId,
    inbox: mpsc::UnboundedSender<CommitterMessage>,
}

impl fmt::Debug for CommitterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitterHandle")
            .field("tenant", &self.tenant)
            .finish()
    }
}

impl CommitterHandle {
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// Commits free-standing events and waits until they are persisted.
    pub async fn commit(&self, request: CommitEventsRequest) -> EventStoreResult<CommittedEvents> {
        self.begin_commit(request).await?.wait().await
    }

    /// Commits aggregate events and waits until they are persisted.
    pub async fn commit_for_aggregate(
        &self,
        request: CommitAggregateEventsRequest,
    ) -> EventStoreResult<CommittedAggregateEvents> {
        self.begin_commit_for_aggregate(request).await?.wait().await
    }

    /// Resolves once the request was accepted into the pipeline (or rejected).
    ///
    /// Sequence numbers are assigned in the order requests are accepted.
    pub async fn begin_commit(
        &self,
        request: CommitEventsRequest,
    ) -> EventStoreResult<PendingResult<CommittedEvents>> {
        let (respond, accepted) = oneshot::channel();
        self.send(CommitterMessage::Commit { request, respond })?;
        accepted.await.map_err(|_| EventStoreError::ShuttingDown)?
    }

    pub async fn begin_commit_for_aggregate(
        &self,
        request: CommitAggregateEventsRequest,
    ) -> EventStoreResult<PendingResult<CommittedAggregateEvents>> {
        let (respond, accepted) = oneshot::channel();
        self.send(CommitterMessage::CommitForAggregate { request, respond })?;
        accepted.await.map_err(|_| EventStoreError::ShuttingDown)?
    }

    /// Asks the committer to stop; in-flight work is finished first.
    pub fn shutdown(&self) {
        let _ = self.inbox.send(CommitterMessage::Shutdown);
    }

    fn send(&self, message: CommitterMessage) -> EventStoreResult<()> {
        self.inbox
            .send(message)
            .map_err(|_| EventStoreError::ShuttingDown)
    }
}

/// Serializes commits for one tenant.
pub struct Committer {
    tenant: TenantId,
    config: EventLogConfig,
    persistence: Arc<dyn EventLogPersistence>,
    listener: Arc<dyn CommitListener>,
    shutdown: ShutdownSignal,
    hook: Option<ShutdownHook>,
    reenter: mpsc::UnboundedSender<CommitterMessage>,

    state: CommitterState,
    pipeline: CommitPipeline,
    versions: AggregateRootVersionCache,
    in_flight: HashSet<Aggregate>,
    batch_in_flight: bool,
}

impl Committer {
    /// Spawns the committer on the current Tokio runtime.
    pub fn spawn(
        tenant: TenantId,
        config: EventLogConfig,
        persistence: Arc<dyn EventLogPersistence>,
        listener: Arc<dyn CommitListener>,
        shutdown: ShutdownSignal,
        hook: ShutdownHook,
    ) -> CommitterHandle {
        let (inbox, receiver) = mpsc::unbounded_channel();
        let committer = Self {
            tenant,
            config,
            persistence,
            listener,
            shutdown,
            hook: Some(hook),
            reenter: inbox.clone(),
            state: CommitterState::Starting,
            pipeline: CommitPipeline::new(EventLogSequenceNumber::INITIAL),
            versions: AggregateRootVersionCache::new(),
            in_flight: HashSet::new(),
            batch_in_flight: false,
        };
        tokio::spawn(committer.run(receiver));

        CommitterHandle { tenant, inbox }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<CommitterMessage>) {
        info!(tenant = %self.tenant, "committer starting");
        self.fetch_next_sequence_number();

        let shutdown = self.shutdown.clone();
        let mut shutdown_seen = false;
        loop {
            let message = tokio::select! {
                message = inbox.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
                _ = shutdown.triggered(), if !shutdown_seen => {
                    shutdown_seen = true;
                    CommitterMessage::Shutdown
                }
            };

            self.handle(message);
            if self.state == CommitterState::Stopped {
                break;
            }
        }
        // Anything still queued is dropped here; its callers observe ShuttingDown.
        self.finish_shutdown();
    }

    fn handle(&mut self, message: CommitterMessage) {
        match message {
            CommitterMessage::Commit { request, respond } => self.handle_commit(request, respond),
            CommitterMessage::CommitForAggregate { request, respond } => {
                self.handle_commit_for_aggregate(request, respond)
            }
            CommitterMessage::Started(next) => self.handle_started(next),
            CommitterMessage::AggregateVersionFetched { awaiting, result } => {
                self.handle_aggregate_version_fetched(awaiting, result)
            }
            CommitterMessage::BatchPersisted { batch, result } => {
                self.handle_batch_persisted(batch, result)
            }
            CommitterMessage::Shutdown => self.handle_shutdown(),
        }
    }

    fn ensure_accepting(&self, request: &impl TenantScoped) -> EventStoreResult<()> {
        match self.state {
            CommitterState::Starting => return Err(EventStoreError::NotReady),
            CommitterState::ShuttingDown | CommitterState::Stopped => {
                return Err(EventStoreError::ShuttingDown);
            }
            CommitterState::Ready => {}
        }
        if request.tenant_id() != self.tenant {
            return Err(EventStoreError::invalid_request(format!(
                "request for tenant {} sent to the committer of tenant {}",
                request.tenant_id(),
                self.tenant
            )));
        }
        Ok(())
    }

    fn handle_commit(&mut self, request: CommitEventsRequest, respond: Reply<CommittedEvents>) {
        let result = self
            .ensure_accepting(&request)
            .and_then(|_| self.pipeline.try_add_events_from(request));
        if let Err(err) = &result {
            debug!(tenant = %self.tenant, error = %err, "commit rejected");
        }
        let _ = respond.send(result);
        self.try_send_next_batch();
    }

    fn handle_commit_for_aggregate(
        &mut self,
        request: CommitAggregateEventsRequest,
        respond: Reply<CommittedAggregateEvents>,
    ) {
        let expected = match self.validate_aggregate_request(&request) {
            Ok(expected) => expected,
            Err(err) => {
                debug!(tenant = %self.tenant, error = %err, "aggregate commit rejected");
                let _ = respond.send(Err(err));
                return;
            }
        };

        let aggregate = request.events.aggregate.clone();
        if !self.in_flight.insert(aggregate.clone()) {
            let _ = respond.send(Err(EventStoreError::AggregateRootAlreadyInFlight(aggregate)));
            return;
        }

        match self.versions.get(&aggregate) {
            Some(cached) if cached == expected => self.accept_aggregate_commit(request, respond),
            cached => self.fetch_aggregate_version(AwaitingVersion {
                request,
                expected,
                cached,
                respond,
            }),
        }
    }

    fn validate_aggregate_request(
        &self,
        request: &CommitAggregateEventsRequest,
    ) -> EventStoreResult<AggregateRootVersion> {
        self.ensure_accepting(request)?;
        if request.events.events.is_empty() {
            return Err(EventStoreError::NoEventsToCommit);
        }
        let expected = request
            .events
            .expected_version
            .ok_or(EventStoreError::MissingExpectedVersion)?;
        request.events.validate_event_sources()?;
        Ok(expected)
    }

    fn accept_aggregate_commit(
        &mut self,
        request: CommitAggregateEventsRequest,
        respond: Reply<CommittedAggregateEvents>,
    ) {
        let aggregate = request.events.aggregate.clone();
        let result = self.pipeline.try_add_aggregate_events_from(request);
        if result.is_err() {
            self.in_flight.remove(&aggregate);
        }
        let _ = respond.send(result);
        self.try_send_next_batch();
    }

    fn fetch_aggregate_version(&self, awaiting: AwaitingVersion) {
        let persistence = self.persistence.clone();
        let reenter = self.reenter.clone();
        let tenant = self.tenant;
        tokio::spawn(async move {
            let result = persistence
                .fetch_aggregate_root_version(tenant, awaiting.aggregate())
                .await;
            let _ = reenter.send(CommitterMessage::AggregateVersionFetched { awaiting, result });
        });
    }

    fn handle_aggregate_version_fetched(
        &mut self,
        awaiting: AwaitingVersion,
        result: Result<AggregateRootVersion, PersistenceError>,
    ) {
        let aggregate = awaiting.aggregate().clone();
        if self.state != CommitterState::Ready {
            self.in_flight.remove(&aggregate);
            let _ = awaiting.respond.send(Err(EventStoreError::ShuttingDown));
            return;
        }

        let fetched = match result {
            Ok(version) => version,
            Err(err) => {
                warn!(tenant = %self.tenant, aggregate = %aggregate, error = %err, "aggregate root version fetch failed");
                self.in_flight.remove(&aggregate);
                let _ = awaiting.respond.send(Err(err.into()));
                return;
            }
        };

        let outcome = reconcile(awaiting.expected, awaiting.cached, fetched);
        if outcome.refresh() {
            self.versions.set(aggregate.clone(), fetched);
        }
        match outcome {
            Reconciliation::Proceed { .. } => {
                self.accept_aggregate_commit(awaiting.request, awaiting.respond)
            }
            Reconciliation::Conflict { actual, .. } => {
                debug!(tenant = %self.tenant, aggregate = %aggregate, expected = %awaiting.expected, actual = %actual, "aggregate root concurrency conflict");
                self.in_flight.remove(&aggregate);
                let _ = awaiting.respond.send(Err(EventStoreError::concurrency_conflict(
                    aggregate,
                    awaiting.expected,
                    actual,
                )));
            }
        }
    }

    fn try_send_next_batch(&mut self) {
        if self.batch_in_flight || self.state != CommitterState::Ready {
            return;
        }
        let batch = match self.pipeline.try_get_next_batch() {
            None => return,
            Some(Ok(batch)) => batch,
            Some(Err(rejected)) => {
                error!(tenant = %self.tenant, error = %rejected.error, "failed to build commit; resetting pipeline");
                for aggregate in &rejected.aggregates {
                    self.in_flight.remove(aggregate);
                }
                self.pipeline = CommitPipeline::new(rejected.first_sequence_number);
                return;
            }
        };

        self.batch_in_flight = true;
        debug!(
            tenant = %self.tenant,
            first = %batch.commit().first_sequence_number(),
            last = %batch.commit().last_sequence_number(),
            "persisting commit"
        );

        let persistence = self.persistence.clone();
        let reenter = self.reenter.clone();
        let tenant = self.tenant;
        tokio::spawn(async move {
            let commit = batch.commit().clone();
            let result = persistence.persist(tenant, &commit).await;
            let _ = reenter.send(CommitterMessage::BatchPersisted { batch, result });
        });
    }

    fn handle_batch_persisted(&mut self, batch: Batch, result: Result<(), PersistenceError>) {
        self.batch_in_flight = false;
        let commit = batch.commit().clone();

        match result {
            Ok(()) => {
                for (aggregate, version) in commit.aggregates() {
                    self.versions.set(aggregate.clone(), version);
                }
                for aggregate in batch.complete() {
                    self.in_flight.remove(&aggregate);
                }
                debug!(
                    tenant = %self.tenant,
                    first = %commit.first_sequence_number(),
                    last = %commit.last_sequence_number(),
                    events = commit.event_count(),
                    "commit persisted"
                );
                self.listener.on_commit(commit);
            }
            Err(err) => {
                let restart_at = commit.first_sequence_number();
                error!(
                    tenant = %self.tenant,
                    first = %restart_at,
                    last = %commit.last_sequence_number(),
                    error = %err,
                    "persisting commit failed; resetting pipeline"
                );

                let mut resolved = batch.fail(err.into());
                resolved.extend(self.pipeline.fail_pending(EventStoreError::unavailable(
                    format!("commit pipeline reset to sequence number {restart_at} after a failed commit"),
                )));
                for aggregate in resolved {
                    self.versions.invalidate(&aggregate);
                    self.in_flight.remove(&aggregate);
                }
                self.pipeline = CommitPipeline::new(restart_at);
            }
        }

        match self.state {
            CommitterState::Ready => self.try_send_next_batch(),
            CommitterState::ShuttingDown => self.state = CommitterState::Stopped,
            _ => {}
        }
    }

    fn fetch_next_sequence_number(&self) {
        let persistence = self.persistence.clone();
        let reenter = self.reenter.clone();
        let shutdown = self.shutdown.clone();
        let tenant = self.tenant;
        let retry_delay = self.config.startup_retry_delay;
        tokio::spawn(async move {
            loop {
                match persistence.next_sequence_number(tenant).await {
                    Ok(next) => {
                        let _ = reenter.send(CommitterMessage::Started(next));
                        return;
                    }
                    Err(err) => {
                        warn!(tenant = %tenant, error = %err, "committer startup read failed; retrying");
                    }
                }
                tokio::select! {
                    _ = shutdown.triggered() => return,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        });
    }

    fn handle_started(&mut self, next: EventLogSequenceNumber) {
        if self.state != CommitterState::Starting {
            return;
        }
        self.pipeline = CommitPipeline::new(next);
        self.state = CommitterState::Ready;
        info!(tenant = %self.tenant, next_sequence_number = %next, "committer ready");
    }

    fn handle_shutdown(&mut self) {
        if matches!(
            self.state,
            CommitterState::ShuttingDown | CommitterState::Stopped
        ) {
            return;
        }
        info!(tenant = %self.tenant, batch_in_flight = self.batch_in_flight, "committer shutting down");

        for aggregate in self.pipeline.fail_pending(EventStoreError::ShuttingDown) {
            self.in_flight.remove(&aggregate);
        }
        self.state = if self.batch_in_flight {
            CommitterState::ShuttingDown
        } else {
            CommitterState::Stopped
        };
    }

    fn finish_shutdown(&mut self) {
        self.state = CommitterState::Stopped;
        if let Some(hook) = self.hook.take() {
            hook.mark_completed();
            info!(tenant = %self.tenant, "committer stopped");
        }
    }
}
