//! Work-queue broker.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use splitr_core::{
    Broker, CorrelationId, RequestEnvelope, Subscription, TransportError, TransportResult,
};
use tokio::sync::mpsc;
use tracing::trace;

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<RequestEnvelope>>>;

struct Queue {
    tx: mpsc::UnboundedSender<RequestEnvelope>,
    rx: SharedReceiver,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

/// A broker where subscribers of a channel compete for envelopes.
///
/// Each envelope is handed to exactly one subscriber. Envelopes sent before
/// anyone subscribes stay queued until someone does.
#[derive(Clone, Default)]
pub struct QueueBroker {
    queues: Arc<Mutex<HashMap<String, Queue>>>,
}

impl QueueBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn receiver(&self, channel: &str) -> SharedReceiver {
        let mut queues = self.queues.lock();
        let queue = queues.entry(channel.to_string()).or_insert_with(Queue::new);
        Arc::clone(&queue.rx)
    }

    /// Drops every queue. Subscribers drain what is already queued, then end.
    pub fn close(&self) {
        self.queues.lock().clear();
    }
}

#[async_trait]
impl Broker for QueueBroker {
    async fn send(
        &self,
        channel: &str,
        key: &CorrelationId,
        envelope: RequestEnvelope,
    ) -> TransportResult<()> {
        let mut queues = self.queues.lock();
        let queue = queues.entry(channel.to_string()).or_insert_with(Queue::new);
        queue
            .tx
            .send(envelope)
            .map_err(|_| TransportError::Closed(channel.to_string()))?;
        trace!(channel = %channel, key = %key, "Enqueued envelope");
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Subscription {
        let rx = self.receiver(channel);
        let stream = futures::stream::unfold(rx, |rx| async move {
            let envelope = rx.lock().await.recv().await?;
            Some((envelope, rx))
        });
        Subscription::new(channel, stream.boxed())
    }
}

impl std::fmt::Debug for QueueBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues = self.queues.lock();
        f.debug_struct("QueueBroker")
            .field("queues", &queues.keys().collect::<Vec<_>>())
            .finish()
    }
}
