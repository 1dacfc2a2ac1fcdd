//! Broker listener and listener handles.

use splitr_core::Subscription;
use splitr_framework::DispatchEngine;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// =============================================================================
// ListenerHandle
// =============================================================================

/// Handle to a background listener (a broker consumer or the callback server).
///
/// The listener stops when the handle is stopped or dropped.
#[derive(Debug)]
pub struct ListenerHandle {
    /// Unique identifier for this listener.
    pub id: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Creates a new listener handle.
    pub fn new(id: impl Into<String>, shutdown_tx: oneshot::Sender<()>) -> Self {
        Self {
            id: id.into(),
            shutdown_tx: Some(shutdown_tx),
            task: None,
        }
    }

    /// Attaches the listener task so [`shutdown`](Self::shutdown) can wait for it.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Signals the listener to stop without waiting for it.
    pub fn stop(mut self) {
        self.signal();
    }

    /// Signals the listener to stop and waits until it has.
    pub async fn shutdown(mut self) {
        self.signal();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn signal(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.signal();
    }
}

// =============================================================================
// BrokerListener
// =============================================================================

/// Feeds envelopes from broker subscriptions into a dispatch engine.
///
/// Each envelope is submitted to the engine's worker pool as its own unit of
/// work, so a slow handler never holds up the subscription.
#[derive(Debug, Clone)]
pub struct BrokerListener {
    engine: DispatchEngine,
}

impl BrokerListener {
    pub fn new(engine: DispatchEngine) -> Self {
        Self { engine }
    }

    /// Starts draining `subscription` in a background task.
    pub fn listen(&self, mut subscription: Subscription) -> ListenerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let channel = subscription.channel().to_string();
        let engine = self.engine.clone();

        let task = tokio::spawn({
            let channel = channel.clone();
            async move {
                info!(channel = %channel, "Broker listener started");
                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => {
                            info!(channel = %channel, "Broker listener stopping");
                            break;
                        }
                        next = subscription.next() => {
                            let Some(envelope) = next else {
                                info!(channel = %channel, "Channel closed, listener exiting");
                                break;
                            };
                            debug!(channel = %channel, id = %envelope.id(), "Envelope received");
                            if engine.submit(envelope).await.is_err() {
                                warn!(channel = %channel, "Dispatch engine closed, listener exiting");
                                break;
                            }
                        }
                    }
                }
            }
        });

        ListenerHandle::new(format!("listener-{channel}"), shutdown_tx).with_task(task)
    }
}
