//! Interfaces to external collaborators.
//!
//! The core never talks to a network itself. It depends on two primitives
//! that the transport crate implements:
//!
//! - [`Broker`]: `send(channel, key, envelope)` plus subscription to a channel,
//!   assumed at-least-once and unordered across keys.
//! - [`CallbackSink`]: "send this response to that address".

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::envelope::{CorrelationId, RequestEnvelope, ResponseEnvelope};
use crate::error::TransportResult;

// =============================================================================
// Broker
// =============================================================================

/// A publish/subscribe channel primitive.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes `envelope` on `channel`, partitioned by `key`.
    async fn send(
        &self,
        channel: &str,
        key: &CorrelationId,
        envelope: RequestEnvelope,
    ) -> TransportResult<()>;

    /// Starts consuming `channel`.
    fn subscribe(&self, channel: &str) -> Subscription;
}

/// Boxed broker.
pub type BoxedBroker = Arc<dyn Broker>;

/// A stream of envelopes consumed from one channel.
pub struct Subscription {
    channel: String,
    stream: BoxStream<'static, RequestEnvelope>,
}

impl Subscription {
    /// Wraps a stream of envelopes for `channel`.
    pub fn new(channel: impl Into<String>, stream: BoxStream<'static, RequestEnvelope>) -> Self {
        Self {
            channel: channel.into(),
            stream,
        }
    }

    /// The channel this subscription consumes.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next envelope. `None` once the channel is closed.
    pub async fn next(&mut self) -> Option<RequestEnvelope> {
        self.stream.next().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish()
    }
}

// =============================================================================
// Callback Sink
// =============================================================================

/// Delivers a response to a remote callback address.
#[async_trait]
pub trait CallbackSink: Send + Sync {
    /// Sends `response` to `address`.
    async fn deliver(&self, address: &str, response: &ResponseEnvelope) -> TransportResult<()>;
}

/// Boxed callback sink.
pub type BoxedCallbackSink = Arc<dyn CallbackSink>;
