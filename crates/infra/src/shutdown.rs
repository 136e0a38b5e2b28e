//! Cooperative shutdown for the event log actors.
//!
//! Every actor observes a [`ShutdownSignal`] and stops taking new work once it fires.
//! Actors that must finish in-flight work first (the committer) register a
//! [`ShutdownHook`] and complete it when they are done; [`ShutdownCoordinator::shutdown`]
//! waits for every hook.

use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

/// Broadcast cancellation signal.
///
/// Clones observe the same signal. A [`child`](Self::child) fires with its parent but can
/// also be triggered on its own (cancelling one subscription without touching the rest).
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes once the signal has fired (immediately if it already has).
    pub async fn triggered(&self) {
        let mut receiver = self.receiver.clone();
        // Every clone keeps the sender alive, so `wait_for` only returns once set.
        let _ = receiver.wait_for(|fired| *fired).await;
    }

    /// A signal that fires when `self` fires, or when triggered directly.
    pub fn child(&self) -> Self {
        let child = Self::new();
        if self.is_triggered() {
            child.trigger();
            return child;
        }

        let parent = self.clone();
        let forward = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.triggered() => forward.trigger(),
                _ = forward.triggered() => {}
            }
        });
        child
    }
}

/// Completion token handed to an actor that must drain before shutdown finishes.
///
/// Dropping the hook counts as completion, so an actor that panics cannot wedge shutdown.
#[derive(Debug)]
pub struct ShutdownHook {
    name: String,
    done: Option<oneshot::Sender<()>>,
}

impl ShutdownHook {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mark_completed(mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
        debug!(hook = %self.name, "shutdown hook completed");
    }
}

/// Owns the shutdown signal and the hooks that shutdown waits for.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    signal: ShutdownSignal,
    hooks: Mutex<Vec<(String, oneshot::Receiver<()>)>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn register_hook(&self, name: impl Into<String>) -> ShutdownHook {
        let name = name.into();
        let (done, wait) = oneshot::channel();
        if let Ok(mut hooks) = self.hooks.lock() {
            hooks.push((name.clone(), wait));
        }
        ShutdownHook {
            name,
            done: Some(done),
        }
    }

    /// Fires the signal and waits until every registered hook has completed.
    pub async fn shutdown(&self) {
        self.signal.trigger();

        let hooks = match self.hooks.lock() {
            Ok(mut hooks) => std::mem::take(&mut *hooks),
            Err(_) => Vec::new(),
        };
        info!(hooks = hooks.len(), "shutdown requested; waiting for hooks");

        for (name, wait) in hooks {
            // A dropped hook counts as completed.
            let _ = wait.await;
            debug!(hook = %name, "shutdown hook released");
        }
        info!("shutdown completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn child_fires_with_parent_but_not_the_other_way_round() {
        let parent = ShutdownSignal::new();
        let child = parent.child();
        let sibling = parent.child();

        sibling.trigger();
        sibling.triggered().await;
        assert!(!parent.is_triggered());
        assert!(!child.is_triggered());

        parent.trigger();
        tokio::time::timeout(Duration::from_secs(1), child.triggered())
            .await
            .unwrap();
        assert!(child.is_triggered());
    }

    #[tokio::test]
    async fn shutdown_waits_for_hooks() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let hook = coordinator.register_hook("committer");
        let signal = coordinator.signal();

        tokio::spawn(async move {
            signal.triggered().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            hook.mark_completed();
        });

        tokio::time::timeout(Duration::from_secs(1), coordinator.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_hook_counts_as_completed() {
        let coordinator = ShutdownCoordinator::new();
        drop(coordinator.register_hook("gone"));

        tokio::time::timeout(Duration::from_secs(1), coordinator.shutdown())
            .await
            .unwrap();
    }
}
