//! Per-tenant wiring of the event log actors.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument};

use eventlog_core::{EventLogSequenceNumber, EventStoreResult, EventTypeId, TenantId};
use eventlog_events::{
    CommitAggregateEventsRequest, CommitEventsRequest, CommittedAggregateEvents, CommittedEvent,
    CommittedEvents, MAX_CATCHUP_PAGE_SIZE,
};

use crate::committer::{Committer, CommitterHandle};
use crate::config::EventLogConfig;
use crate::event_store::EventLogPersistence;
use crate::shutdown::ShutdownCoordinator;
use crate::subscriptions::{
    EventLogStream, EventLogSubscription, EventStoreCatchupActor, EventStoreCatchupHandle,
    StreamSubscriptionManager, StreamSubscriptionManagerHandle,
};

/// The event log of one tenant: its committer, subscription manager and catch-up actor.
pub struct TenantEventStore {
    tenant: TenantId,
    persistence: Arc<dyn EventLogPersistence>,
    committer: CommitterHandle,
    subscriptions: StreamSubscriptionManagerHandle,
    catchup: EventStoreCatchupHandle,
    stream: EventLogStream,
}

impl std::fmt::Debug for TenantEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantEventStore")
            .field("tenant", &self.tenant)
            .finish_non_exhaustive()
    }
}

impl TenantEventStore {
    /// Spawns the tenant's actors on the current Tokio runtime.
    pub fn start(
        tenant: TenantId,
        config: EventLogConfig,
        persistence: Arc<dyn EventLogPersistence>,
        coordinator: &ShutdownCoordinator,
    ) -> Self {
        let signal = coordinator.signal();
        let catchup = EventStoreCatchupActor::spawn(
            tenant,
            config.clone(),
            persistence.clone(),
            signal.clone(),
        );
        let subscriptions = StreamSubscriptionManager::spawn(
            tenant,
            config.clone(),
            persistence.clone(),
            catchup.clone(),
            signal.clone(),
        );
        let committer = Committer::spawn(
            tenant,
            config.clone(),
            persistence.clone(),
            Arc::new(subscriptions.clone()),
            signal,
            coordinator.register_hook(format!("committer/{tenant}")),
        );
        let stream = EventLogStream::new(subscriptions.clone(), config);

        info!(tenant = %tenant, "tenant event store started");
        Self {
            tenant,
            persistence,
            committer,
            subscriptions,
            catchup,
            stream,
        }
    }

    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    pub fn committer(&self) -> &CommitterHandle {
        &self.committer
    }

    pub fn subscriptions(&self) -> &StreamSubscriptionManagerHandle {
        &self.subscriptions
    }

    pub fn catchup(&self) -> &EventStoreCatchupHandle {
        &self.catchup
    }

    pub fn event_log_stream(&self) -> &EventLogStream {
        &self.stream
    }

    #[instrument(skip(self, request), fields(tenant = %self.tenant, events = request.events.len()), err)]
    pub async fn commit(&self, request: CommitEventsRequest) -> EventStoreResult<CommittedEvents> {
        self.committer.commit(request).await
    }

    #[instrument(
        skip(self, request),
        fields(tenant = %self.tenant, aggregate = %request.events.aggregate, events = request.events.events.len()),
        err
    )]
    pub async fn commit_for_aggregate(
        &self,
        request: CommitAggregateEventsRequest,
    ) -> EventStoreResult<CommittedAggregateEvents> {
        self.committer.commit_for_aggregate(request).await
    }

    pub async fn subscribe(
        &self,
        from: EventLogSequenceNumber,
        event_types: impl IntoIterator<Item = EventTypeId>,
    ) -> EventStoreResult<EventLogSubscription> {
        self.stream.subscribe(from, event_types).await
    }

    /// Reads committed events straight from storage (at most one catch-up page).
    pub async fn fetch_committed_events(
        &self,
        from: EventLogSequenceNumber,
        max_count: usize,
    ) -> EventStoreResult<Vec<CommittedEvent>> {
        Ok(self
            .persistence
            .fetch_committed_events(self.tenant, from, max_count.min(MAX_CATCHUP_PAGE_SIZE))
            .await?)
    }
}

/// Owns one [`TenantEventStore`] per configured tenant.
#[derive(Debug)]
pub struct EventStoreRegistry {
    stores: HashMap<TenantId, Arc<TenantEventStore>>,
    coordinator: ShutdownCoordinator,
}

impl EventStoreRegistry {
    /// Starts the event log of every tenant. Must be called inside a Tokio runtime.
    pub fn start(
        config: EventLogConfig,
        persistence: Arc<dyn EventLogPersistence>,
        tenants: impl IntoIterator<Item = TenantId>,
    ) -> Self {
        let coordinator = ShutdownCoordinator::new();
        let stores = tenants
            .into_iter()
            .map(|tenant| {
                let store =
                    TenantEventStore::start(tenant, config.clone(), persistence.clone(), &coordinator);
                (tenant, Arc::new(store))
            })
            .collect::<HashMap<_, _>>();
        info!(tenants = stores.len(), "event store registry started");

        Self {
            stores,
            coordinator,
        }
    }

    pub fn get(&self, tenant: TenantId) -> Option<Arc<TenantEventStore>> {
        self.stores.get(&tenant).cloned()
    }

    pub fn tenants(&self) -> impl Iterator<Item = TenantId> + '_ {
        self.stores.keys().copied()
    }

    /// Stops every tenant; in-flight commits are persisted before this returns.
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }
}
