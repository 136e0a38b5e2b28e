//! Consumer-facing event log subscriptions.
//!
//! [`EventLogStream::subscribe`] registers a subscription whose target is an in-process
//! channel and returns an [`EventLogSubscription`]: a bounded, consumer-driven stream of
//! [`EventLogBatch`]es. A slow consumer only slows its own subscription.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, error};

use eventlog_core::{
    EventLogSequenceNumber, EventStoreError, EventStoreResult, EventTypeId, SubscriptionId,
    TenantId,
};
use eventlog_events::{EventLogBatch, SubscriptionEvents, SubscriptionEventsAck};

use crate::config::EventLogConfig;

use super::manager::{EventStoreSubscriptionRequest, StreamSubscriptionManagerHandle};
use super::target::{DeliveryError, SubscriptionTarget};

struct Delivery {
    events: SubscriptionEvents,
    ack: oneshot::Sender<SubscriptionEventsAck>,
}

/// Subscription target that hands deliveries to the stream task of one subscriber.
///
/// The hand-off channel holds a single delivery, so a stalled consumer makes `deliver`
/// wait (and time out) instead of queueing a copy per redelivery.
struct ChannelTarget {
    deliveries: mpsc::Sender<Delivery>,
}

#[async_trait]
impl SubscriptionTarget for ChannelTarget {
    async fn deliver(
        &self,
        events: SubscriptionEvents,
    ) -> Result<SubscriptionEventsAck, DeliveryError> {
        let (ack, acked) = oneshot::channel();
        self.deliveries
            .send(Delivery { events, ack })
            .await
            .map_err(|_| DeliveryError::DeadLetter)?;
        acked.await.map_err(|_| DeliveryError::DeadLetter)
    }
}

/// Subscription entry point for one tenant's event log.
#[derive(Debug, Clone)]
pub struct EventLogStream {
    tenant: TenantId,
    manager: StreamSubscriptionManagerHandle,
    config: EventLogConfig,
}

impl EventLogStream {
    pub fn new(manager: StreamSubscriptionManagerHandle, config: EventLogConfig) -> Self {
        Self {
            tenant: manager.tenant(),
            manager,
            config,
        }
    }

    /// Subscribes to the log from offset `from`.
    ///
    /// `event_types` filters the events inside each batch (empty = every type); batches are
    /// delivered for every range of the log regardless, so offsets always tile.
    pub async fn subscribe(
        &self,
        from: EventLogSequenceNumber,
        event_types: impl IntoIterator<Item = EventTypeId>,
    ) -> EventStoreResult<EventLogSubscription> {
        let id = SubscriptionId::new();
        let (batches_tx, batches_rx) = mpsc::channel(self.config.stream_buffer_size);
        let (deliveries_tx, deliveries_rx) = mpsc::channel(1);

        let forwarder = BatchForwarder {
            id,
            tenant: self.tenant,
            expected: from,
            deliveries: deliveries_rx,
            batches: batches_tx,
            manager: self.manager.clone(),
        };
        tokio::spawn(forwarder.run());

        let ack = self
            .manager
            .subscribe(EventStoreSubscriptionRequest {
                subscription_id: id,
                from_offset: from,
                event_types: event_types.into_iter().collect(),
                target: Arc::new(ChannelTarget {
                    deliveries: deliveries_tx,
                }),
            })
            .await?;
        if !ack.ok {
            let reason = ack
                .failure
                .map(|f| f.reason)
                .unwrap_or_else(|| "subscription refused".to_string());
            return Err(EventStoreError::invalid_request(reason));
        }

        debug!(tenant = %self.tenant, subscription = %id, from = %from, "event log subscription registered");
        Ok(EventLogSubscription {
            id,
            batches: ReceiverStream::new(batches_rx),
            manager: self.manager.clone(),
        })
    }
}

/// Moves pushed batches into the subscriber's bounded channel, checking offset continuity.
struct BatchForwarder {
    id: SubscriptionId,
    tenant: TenantId,
    expected: EventLogSequenceNumber,
    deliveries: mpsc::Receiver<Delivery>,
    batches: mpsc::Sender<EventStoreResult<EventLogBatch>>,
    manager: StreamSubscriptionManagerHandle,
}

impl BatchForwarder {
    async fn run(mut self) {
        loop {
            let delivery = tokio::select! {
                _ = self.batches.closed() => {
                    debug!(tenant = %self.tenant, subscription = %self.id, "subscriber dropped the stream");
                    self.manager.cancel_detached(self.id);
                    return;
                }
                delivery = self.deliveries.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => return,
                },
            };

            let Delivery { events, ack } = delivery;
            if ack.is_closed() {
                // The subscription stopped waiting for this one and will redeliver.
                continue;
            }
            if events.to_offset < self.expected {
                // Redelivery of a batch we already forwarded (its ack timed out).
                let _ = ack.send(events.ack());
                continue;
            }
            if events.from_offset != self.expected {
                error!(
                    tenant = %self.tenant,
                    subscription = %self.id,
                    expected = %self.expected,
                    actual = %events.from_offset,
                    "event log offset mismatch; terminating subscription"
                );
                let _ = self
                    .batches
                    .send(Err(EventStoreError::OffsetMismatch {
                        expected: self.expected,
                        actual: events.from_offset,
                    }))
                    .await;
                self.manager.cancel_detached(self.id);
                return;
            }

            let acknowledgement = events.ack();
            let batch = EventLogBatch {
                from: events.from_offset,
                to: events.to_offset,
                matched_events: events.events,
            };
            if self.batches.send(Ok(batch)).await.is_err() {
                self.manager.cancel_detached(self.id);
                return;
            }
            self.expected = acknowledgement.to_offset.next();
            let _ = ack.send(acknowledgement);
        }
    }
}

/// A live subscription to a tenant's event log.
///
/// Yields consecutive batches; the stream ends after an error or when the subscription is
/// torn down. Dropping it cancels the subscription.
pub struct EventLogSubscription {
    id: SubscriptionId,
    batches: ReceiverStream<EventStoreResult<EventLogBatch>>,
    manager: StreamSubscriptionManagerHandle,
}

impl std::fmt::Debug for EventLogSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLogSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl EventLogSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Cancels the subscription with the manager and waits for the acknowledgement.
    pub async fn cancel(self) -> EventStoreResult<()> {
        self.manager.cancel(self.id).await.map(|_| ())
    }
}

impl Stream for EventLogSubscription {
    type Item = EventStoreResult<EventLogBatch>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.batches).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::event_store::InMemoryEventStore;
    use crate::shutdown::ShutdownSignal;
    use crate::subscriptions::{EventStoreCatchupActor, StreamSubscriptionManager};

    fn manager(tenant: TenantId) -> StreamSubscriptionManagerHandle {
        let store = Arc::new(InMemoryEventStore::new());
        let signal = ShutdownSignal::new();
        let catchup = EventStoreCatchupActor::spawn(
            tenant,
            EventLogConfig::default(),
            store.clone(),
            signal.clone(),
        );
        StreamSubscriptionManager::spawn(tenant, EventLogConfig::default(), store, catchup, signal)
    }

    fn range(id: SubscriptionId, from: u64, to: u64) -> SubscriptionEvents {
        SubscriptionEvents {
            subscription_id: id,
            from_offset: EventLogSequenceNumber::new(from),
            to_offset: EventLogSequenceNumber::new(to),
            events: vec![],
        }
    }

    async fn push(
        deliveries: &mpsc::Sender<Delivery>,
        events: SubscriptionEvents,
    ) -> oneshot::Receiver<SubscriptionEventsAck> {
        let (ack, acked) = oneshot::channel();
        deliveries.send(Delivery { events, ack }).await.unwrap();
        acked
    }

    fn spawn_forwarder(
        id: SubscriptionId,
    ) -> (
        mpsc::Sender<Delivery>,
        mpsc::Receiver<EventStoreResult<EventLogBatch>>,
    ) {
        let tenant = TenantId::new();
        let (deliveries_tx, deliveries_rx) = mpsc::channel(1);
        let (batches_tx, batches_rx) = mpsc::channel(4);
        let forwarder = BatchForwarder {
            id,
            tenant,
            expected: EventLogSequenceNumber::INITIAL,
            deliveries: deliveries_rx,
            batches: batches_tx,
            manager: manager(tenant),
        };
        tokio::spawn(forwarder.run());
        (deliveries_tx, batches_rx)
    }

    #[tokio::test]
    async fn redelivered_batches_are_acked_and_gaps_terminate() {
        let id = SubscriptionId::new();
        let (deliveries, mut batches) = spawn_forwarder(id);

        let acked = push(&deliveries, range(id, 0, 2)).await;
        let batch = batches.recv().await.unwrap().unwrap();
        assert_eq!(batch.from, EventLogSequenceNumber::new(0));
        assert_eq!(batch.to, EventLogSequenceNumber::new(2));
        assert_eq!(acked.await.unwrap(), range(id, 0, 2).ack());

        let duplicate = push(&deliveries, range(id, 0, 2)).await;
        assert_eq!(duplicate.await.unwrap(), range(id, 0, 2).ack());

        let _gap = push(&deliveries, range(id, 5, 6)).await;
        assert_eq!(
            batches.recv().await.unwrap().unwrap_err(),
            EventStoreError::OffsetMismatch {
                expected: EventLogSequenceNumber::new(3),
                actual: EventLogSequenceNumber::new(5),
            }
        );
        assert!(batches.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_consumer_turns_deliveries_into_dead_letters() {
        let id = SubscriptionId::new();
        let (deliveries, batches) = spawn_forwarder(id);
        drop(batches);

        tokio::time::timeout(Duration::from_secs(1), deliveries.closed())
            .await
            .unwrap();

        let target = ChannelTarget { deliveries };
        assert_eq!(
            target.deliver(range(id, 0, 0)).await.unwrap_err(),
            DeliveryError::DeadLetter
        );
    }

    #[tokio::test]
    async fn abandoned_deliveries_are_not_forwarded() {
        let id = SubscriptionId::new();
        let (deliveries, mut batches) = spawn_forwarder(id);

        let (ack, abandoned) = oneshot::channel();
        drop(abandoned);
        deliveries
            .send(Delivery {
                events: range(id, 0, 0),
                ack,
            })
            .await
            .unwrap();
        let acked = push(&deliveries, range(id, 0, 2)).await;

        let batch = batches.recv().await.unwrap().unwrap();
        assert_eq!(batch.from, EventLogSequenceNumber::new(0));
        assert_eq!(batch.to, EventLogSequenceNumber::new(2));
        assert_eq!(acked.await.unwrap(), range(id, 0, 2).ack());
    }

    #[tokio::test]
    async fn stalled_consumer_holds_at_most_one_pending_delivery() {
        let id = SubscriptionId::new();
        let (deliveries, pending) = mpsc::channel(1);
        let target = ChannelTarget { deliveries };

        for _ in 0..5 {
            let attempt =
                tokio::time::timeout(Duration::from_millis(10), target.deliver(range(id, 0, 9)))
                    .await;
            assert!(attempt.is_err());
        }

        assert_eq!(pending.len(), 1);
    }
}
