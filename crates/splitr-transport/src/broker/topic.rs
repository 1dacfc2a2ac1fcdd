//! Publish/subscribe broker.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use splitr_core::{Broker, CorrelationId, RequestEnvelope, Subscription, TransportResult};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::receiver_stream;

type Subscribers = Vec<mpsc::UnboundedSender<RequestEnvelope>>;

/// A broker where every subscriber of a channel sees every envelope.
///
/// Envelopes sent to a channel nobody listens on are dropped with a warning.
#[derive(Clone, Default)]
pub struct TopicBroker {
    channels: Arc<Mutex<HashMap<String, Subscribers>>>,
}

impl TopicBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Ends every subscription.
    pub fn close(&self) {
        self.channels.lock().clear();
    }
}

#[async_trait]
impl Broker for TopicBroker {
    async fn send(
        &self,
        channel: &str,
        key: &CorrelationId,
        envelope: RequestEnvelope,
    ) -> TransportResult<()> {
        let mut channels = self.channels.lock();
        let subscribers = channels.entry(channel.to_string()).or_default();
        subscribers.retain(|tx| tx.send(envelope.clone()).is_ok());

        if subscribers.is_empty() {
            warn!(channel = %channel, key = %key, "No subscribers on topic, envelope dropped");
        } else {
            trace!(channel = %channel, key = %key, subscribers = subscribers.len(), "Published to topic");
        }
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Subscription::new(channel, receiver_stream(rx))
    }
}

impl std::fmt::Debug for TopicBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.channels.lock();
        f.debug_struct("TopicBroker")
            .field("channels", &channels.keys().collect::<Vec<_>>())
            .finish()
    }
}
