//! Per-tenant registry of live subscriptions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use eventlog_core::{
    EventLogSequenceNumber, EventStoreError, EventStoreResult, SubscriptionId, TenantId,
};
use eventlog_events::{
    CancelEventStoreSubscription, CancelEventStoreSubscriptionAck, Commit,
    EventStoreSubscriptionAck, EventTypeFilter,
};

use crate::committer::CommitListener;
use crate::config::EventLogConfig;
use crate::event_store::EventLogPersistence;
use crate::shutdown::ShutdownSignal;

use super::catchup::EventStoreCatchupHandle;
use super::subscription::{
    StreamSubscriptionActor, StreamSubscriptionHandle, SubscriptionExit, SubscriptionSetup,
};
use super::target::SubscriptionTarget;

/// Asks for events of the tenant's log, starting at `from_offset`, to be pushed to `target`.
#[derive(Clone)]
pub struct EventStoreSubscriptionRequest {
    pub subscription_id: SubscriptionId,
    pub from_offset: EventLogSequenceNumber,
    pub event_types: EventTypeFilter,
    pub target: Arc<dyn SubscriptionTarget>,
}

impl fmt::Debug for EventStoreSubscriptionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStoreSubscriptionRequest")
            .field("subscription_id", &self.subscription_id)
            .field("from_offset", &self.from_offset)
            .field("event_types", &self.event_types)
            .finish_non_exhaustive()
    }
}

enum ManagerMessage {
    Subscribe {
        request: EventStoreSubscriptionRequest,
        respond: oneshot::Sender<EventStoreSubscriptionAck>,
    },
    Cancel {
        request: CancelEventStoreSubscription,
        respond: oneshot::Sender<CancelEventStoreSubscriptionAck>,
    },
    CommitPersisted(Arc<Commit>),
    SubscriptionStopped(SubscriptionId),
}

/// Address of a tenant's subscription manager.
#[derive(Clone)]
pub struct StreamSubscriptionManagerHandle {
    tenant: TenantId,
    inbox: mpsc::UnboundedSender<ManagerMessage>,
}

impl fmt::Debug for StreamSubscriptionManagerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSubscriptionManagerHandle")
            .field("tenant", &self.tenant)
            .finish()
    }
}

impl StreamSubscriptionManagerHandle {
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// Registers a subscription. The ack is negative when the id is already active.
    pub async fn subscribe(
        &self,
        request: EventStoreSubscriptionRequest,
    ) -> EventStoreResult<EventStoreSubscriptionAck> {
        let (respond, ack) = oneshot::channel();
        self.inbox
            .send(ManagerMessage::Subscribe { request, respond })
            .map_err(|_| EventStoreError::ShuttingDown)?;
        ack.await.map_err(|_| EventStoreError::ShuttingDown)
    }

    /// Stops and forgets a subscription. Acknowledged even when the id is unknown.
    pub async fn cancel(
        &self,
        subscription_id: SubscriptionId,
    ) -> EventStoreResult<CancelEventStoreSubscriptionAck> {
        let (respond, ack) = oneshot::channel();
        self.inbox
            .send(ManagerMessage::Cancel {
                request: CancelEventStoreSubscription { subscription_id },
                respond,
            })
            .map_err(|_| EventStoreError::ShuttingDown)?;
        ack.await.map_err(|_| EventStoreError::ShuttingDown)
    }

    /// Fire-and-forget cancellation, for contexts that cannot await (drop paths).
    pub fn cancel_detached(&self, subscription_id: SubscriptionId) {
        let (respond, _) = oneshot::channel();
        let _ = self.inbox.send(ManagerMessage::Cancel {
            request: CancelEventStoreSubscription { subscription_id },
            respond,
        });
    }
}

impl CommitListener for StreamSubscriptionManagerHandle {
    fn on_commit(&self, commit: Arc<Commit>) {
        if self.inbox.send(ManagerMessage::CommitPersisted(commit)).is_err() {
            debug!(tenant = %self.tenant, "subscription manager gone; commit notification dropped");
        }
    }
}

/// Tracks the active subscriptions of one tenant and fans persisted commits out to them.
pub struct StreamSubscriptionManager {
    tenant: TenantId,
    config: EventLogConfig,
    persistence: Arc<dyn EventLogPersistence>,
    catchup: EventStoreCatchupHandle,
    shutdown: ShutdownSignal,
    reenter: mpsc::UnboundedSender<ManagerMessage>,
    subscriptions: HashMap<SubscriptionId, StreamSubscriptionHandle>,
    high_water_mark: EventLogSequenceNumber,
}

impl StreamSubscriptionManager {
    pub fn spawn(
        tenant: TenantId,
        config: EventLogConfig,
        persistence: Arc<dyn EventLogPersistence>,
        catchup: EventStoreCatchupHandle,
        shutdown: ShutdownSignal,
    ) -> StreamSubscriptionManagerHandle {
        let (inbox, receiver) = mpsc::unbounded_channel();
        let manager = Self {
            tenant,
            config,
            persistence,
            catchup,
            shutdown,
            reenter: inbox.clone(),
            subscriptions: HashMap::new(),
            high_water_mark: EventLogSequenceNumber::INITIAL,
        };
        tokio::spawn(manager.run(receiver));
        StreamSubscriptionManagerHandle { tenant, inbox }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<ManagerMessage>) {
        // Messages queue up until the starting high-water mark is known.
        match self.read_high_water_mark().await {
            Some(mark) => self.high_water_mark = mark,
            None => return,
        }
        info!(tenant = %self.tenant, high_water_mark = %self.high_water_mark, "subscription manager ready");

        let shutdown = self.shutdown.clone();
        loop {
            let message = tokio::select! {
                message = inbox.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
                _ = shutdown.triggered() => break,
            };
            self.handle(message);
        }

        for subscription in self.subscriptions.values() {
            subscription.stop();
        }
        info!(tenant = %self.tenant, subscriptions = self.subscriptions.len(), "subscription manager stopped");
    }

    async fn read_high_water_mark(&self) -> Option<EventLogSequenceNumber> {
        loop {
            match self.persistence.next_sequence_number(self.tenant).await {
                Ok(mark) => return Some(mark),
                Err(err) => {
                    warn!(tenant = %self.tenant, error = %err, "subscription manager startup read failed; retrying");
                }
            }
            tokio::select! {
                _ = self.shutdown.triggered() => return None,
                _ = tokio::time::sleep(self.config.startup_retry_delay) => {}
            }
        }
    }

    fn handle(&mut self, message: ManagerMessage) {
        match message {
            ManagerMessage::Subscribe { request, respond } => {
                let _ = respond.send(self.handle_subscribe(request));
            }
            ManagerMessage::Cancel { request, respond } => {
                self.handle_cancel(request.subscription_id);
                let _ = respond.send(CancelEventStoreSubscriptionAck {
                    subscription_id: request.subscription_id,
                });
            }
            ManagerMessage::CommitPersisted(commit) => self.handle_commit(commit),
            ManagerMessage::SubscriptionStopped(id) => {
                if self.subscriptions.remove(&id).is_some() {
                    info!(tenant = %self.tenant, subscription = %id, "subscription target disconnected; removed");
                }
            }
        }
    }

    fn handle_subscribe(&mut self, request: EventStoreSubscriptionRequest) -> EventStoreSubscriptionAck {
        let id = request.subscription_id;
        if self.subscriptions.contains_key(&id) {
            let error = EventStoreError::SubscriptionAlreadyExists(id);
            warn!(tenant = %self.tenant, subscription = %id, "duplicate subscription rejected");
            return EventStoreSubscriptionAck::rejected(id, &error);
        }

        let setup = SubscriptionSetup {
            id,
            tenant: self.tenant,
            from_offset: request.from_offset,
            high_water_mark: self.high_water_mark,
            filter: request.event_types,
            target: request.target,
        };
        let reenter = self.reenter.clone();
        let handle = StreamSubscriptionActor::spawn(
            setup,
            self.catchup.clone(),
            self.config.clone(),
            self.shutdown.child(),
            move |exit| {
                if exit == SubscriptionExit::Disconnected {
                    let _ = reenter.send(ManagerMessage::SubscriptionStopped(id));
                }
            },
        );
        self.subscriptions.insert(id, handle);
        EventStoreSubscriptionAck::accepted(id)
    }

    fn handle_cancel(&mut self, id: SubscriptionId) {
        match self.subscriptions.remove(&id) {
            Some(subscription) => {
                subscription.stop();
                debug!(tenant = %self.tenant, subscription = %id, "subscription cancelled");
            }
            None => debug!(tenant = %self.tenant, subscription = %id, "cancel for unknown subscription"),
        }
    }

    fn handle_commit(&mut self, commit: Arc<Commit>) {
        if commit.next_sequence_number() > self.high_water_mark {
            self.high_water_mark = commit.next_sequence_number();
        }

        let tenant = self.tenant;
        self.subscriptions.retain(|id, subscription| {
            let alive = subscription.notify(commit.clone());
            if !alive {
                debug!(tenant = %tenant, subscription = %id, "subscription actor gone; removed");
            }
            alive
        });
    }
}
