//! One subscription: catch up from storage, then tail live commits.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use eventlog_core::{EventLogSequenceNumber, EventStoreError, SubscriptionId, TenantId};
use eventlog_events::{
    Commit, CommittedEvent, EventLogCatchupRequest, EventTypeFilter, SubscriptionEvents,
};

use crate::config::EventLogConfig;
use crate::shutdown::ShutdownSignal;

use super::catchup::EventStoreCatchupHandle;
use super::target::{DeliveryError, SubscriptionTarget};

/// How a subscription actor ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum SubscriptionExit {
    /// Cancelled by its owner or by shutdown.
    Cancelled,
    /// The target is gone; the manager must forget the subscription.
    Disconnected,
}

/// The manager's side of a running subscription.
pub(crate) struct StreamSubscriptionHandle {
    commits: mpsc::UnboundedSender<Arc<Commit>>,
    cancel: ShutdownSignal,
}

impl StreamSubscriptionHandle {
    /// Forwards a commit; `false` once the actor is gone.
    pub(crate) fn notify(&self, commit: Arc<Commit>) -> bool {
        self.commits.send(commit).is_ok()
    }

    pub(crate) fn stop(&self) {
        self.cancel.trigger();
    }
}

pub(crate) struct StreamSubscriptionActor {
    id: SubscriptionId,
    tenant: TenantId,
    next_offset: EventLogSequenceNumber,
    catch_up_until: EventLogSequenceNumber,
    filter: EventTypeFilter,
    target: Arc<dyn SubscriptionTarget>,
    catchup: EventStoreCatchupHandle,
    config: EventLogConfig,
    cancel: ShutdownSignal,
    commits: mpsc::UnboundedReceiver<Arc<Commit>>,
}

pub(crate) struct SubscriptionSetup {
    pub id: SubscriptionId,
    pub tenant: TenantId,
    pub from_offset: EventLogSequenceNumber,
    pub high_water_mark: EventLogSequenceNumber,
    pub filter: EventTypeFilter,
    pub target: Arc<dyn SubscriptionTarget>,
}

impl StreamSubscriptionActor {
    /// Spawns the actor. `on_exit` runs with the way the actor ended.
    pub(crate) fn spawn<F>(
        setup: SubscriptionSetup,
        catchup: EventStoreCatchupHandle,
        config: EventLogConfig,
        cancel: ShutdownSignal,
        on_exit: F,
    ) -> StreamSubscriptionHandle
    where
        F: FnOnce(SubscriptionExit) + Send + 'static,
    {
        let (commits_tx, commits_rx) = mpsc::unbounded_channel();
        let actor = Self {
            id: setup.id,
            tenant: setup.tenant,
            next_offset: setup.from_offset,
            catch_up_until: setup.high_water_mark,
            filter: setup.filter,
            target: setup.target,
            catchup,
            config,
            cancel: cancel.clone(),
            commits: commits_rx,
        };
        let finished = cancel.clone();
        tokio::spawn(async move {
            let exit = actor.run().await;
            // Releases the task forwarding the parent signal to this one.
            finished.trigger();
            on_exit(exit);
        });

        StreamSubscriptionHandle {
            commits: commits_tx,
            cancel,
        }
    }

    async fn run(mut self) -> SubscriptionExit {
        info!(
            tenant = %self.tenant,
            subscription = %self.id,
            from = %self.next_offset,
            high_water_mark = %self.catch_up_until,
            "subscription started"
        );

        let exit = match self.stream().await {
            Ok(()) => SubscriptionExit::Cancelled,
            Err(exit) => exit,
        };
        info!(tenant = %self.tenant, subscription = %self.id, exit = ?exit, at = %self.next_offset, "subscription stopped");
        exit
    }

    async fn stream(&mut self) -> Result<(), SubscriptionExit> {
        let until = self.catch_up_until;
        self.catch_up_to(until).await?;
        debug!(tenant = %self.tenant, subscription = %self.id, at = %self.next_offset, "subscription live");

        loop {
            let commit = tokio::select! {
                _ = self.cancel.triggered() => return Err(SubscriptionExit::Cancelled),
                commit = self.commits.recv() => match commit {
                    Some(commit) => commit,
                    None => return Err(SubscriptionExit::Cancelled),
                },
            };
            self.handle_commit(&commit).await?;
        }
    }

    async fn handle_commit(&mut self, commit: &Commit) -> Result<(), SubscriptionExit> {
        if commit.last_sequence_number() < self.next_offset {
            return Ok(());
        }
        if commit.first_sequence_number() > self.next_offset {
            // Something between the cursor and this commit was never seen live.
            self.catch_up_to(commit.first_sequence_number()).await?;
        }

        let from = self.next_offset;
        let events = self.filter.apply(commit.events_from(from));
        self.deliver(from, commit.last_sequence_number(), events).await
    }

    async fn catch_up_to(&mut self, until: EventLogSequenceNumber) -> Result<(), SubscriptionExit> {
        while self.next_offset < until {
            let from = self.next_offset;
            let wanted = from.distance_to(until) as usize;
            let request = EventLogCatchupRequest::new(from, wanted.min(self.config.catchup_page_size));

            let page = match self.catchup.fetch(request, &self.cancel).await {
                Ok(page) => page,
                Err(EventStoreError::Cancelled) | Err(EventStoreError::ShuttingDown) => {
                    return Err(SubscriptionExit::Cancelled);
                }
                Err(err) => {
                    warn!(subscription = %self.id, error = %err, "catch-up failed; retrying");
                    self.pause(self.config.fetch_retry_delay).await?;
                    continue;
                }
            };

            let (first, last) = match (page.events.first(), page.events.last()) {
                (Some(first), Some(last)) => (first.sequence_number, last.sequence_number),
                _ => {
                    warn!(subscription = %self.id, from = %from, until = %until, "catch-up page came back empty; retrying");
                    self.pause(self.config.fetch_retry_delay).await?;
                    continue;
                }
            };
            if first != from {
                warn!(subscription = %self.id, expected = %from, actual = %first, "catch-up page does not start at the cursor; retrying");
                self.pause(self.config.fetch_retry_delay).await?;
                continue;
            }

            let events = self.filter.apply(&page.events);
            self.deliver(from, last, events).await?;
        }
        Ok(())
    }

    /// Pushes `[from, to]` to the target until it is acknowledged.
    async fn deliver(
        &mut self,
        from: EventLogSequenceNumber,
        to: EventLogSequenceNumber,
        events: Vec<CommittedEvent>,
    ) -> Result<(), SubscriptionExit> {
        let message = SubscriptionEvents {
            subscription_id: self.id,
            from_offset: from,
            to_offset: to,
            events,
        };
        let expected_ack = message.ack();

        loop {
            let attempt = tokio::select! {
                _ = self.cancel.triggered() => return Err(SubscriptionExit::Cancelled),
                attempt = tokio::time::timeout(
                    self.config.subscription_ack_timeout,
                    self.target.deliver(message.clone()),
                ) => attempt,
            };

            match attempt {
                Ok(Ok(ack)) if ack == expected_ack => {
                    self.next_offset = to.next();
                    return Ok(());
                }
                Ok(Ok(ack)) => {
                    warn!(subscription = %self.id, expected = ?expected_ack, received = ?ack, "unexpected acknowledgement; redelivering");
                }
                Ok(Err(DeliveryError::DeadLetter)) => {
                    return Err(SubscriptionExit::Disconnected);
                }
                Ok(Err(err @ DeliveryError::Rejected(_))) => {
                    warn!(subscription = %self.id, from = %from, to = %to, error = %err, "delivery failed; retrying");
                }
                Err(_) => {
                    warn!(subscription = %self.id, from = %from, to = %to, "delivery not acknowledged in time; retrying");
                }
            }

            self.pause(self.config.delivery_retry_delay).await?;
        }
    }

    async fn pause(&self, delay: std::time::Duration) -> Result<(), SubscriptionExit> {
        tokio::select! {
            _ = self.cancel.triggered() => Err(SubscriptionExit::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
