//! Transport bindings.
//!
//! A binding decides how a [`RequestEnvelope`] leaves the caller and how its
//! response finds the way back:
//!
//! | Binding | Send path | Response path |
//! |---------|-----------|---------------|
//! | [`InProcessTransport`] | straight into the local [`DispatchEngine`] | engine resolves the registry |
//! | [`BrokerTransport`] | broker channel per message kind | callback address → [`CallbackSink`](splitr_core::CallbackSink) |

use std::sync::Arc;

use async_trait::async_trait;
use splitr_core::{
    BoxedBroker, CallError, CallResult, MessageKind, RequestEnvelope, TransportError,
    TransportResult,
};
use splitr_framework::DispatchEngine;
use tracing::trace;

// =============================================================================
// Transport Trait
// =============================================================================

/// A strategy for sending request envelopes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Address embedded in requests that expect a response, if the binding
    /// needs one.
    fn callback_address(&self) -> Option<&str>;

    /// Hands `envelope` to the receiving side.
    async fn send(&self, envelope: RequestEnvelope) -> CallResult<()>;
}

/// Boxed transport.
pub type BoxedTransport = Arc<dyn Transport>;

// =============================================================================
// Channel Names
// =============================================================================

/// Channel names, one per message kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    pub command: String,
    pub query: String,
    pub event: String,
}

impl ChannelNames {
    /// `splitr.{kind}.topic`
    pub fn topic() -> Self {
        Self::with_suffix("topic")
    }

    /// `splitr.{kind}.queue`
    pub fn queue() -> Self {
        Self::with_suffix("queue")
    }

    fn with_suffix(suffix: &str) -> Self {
        Self {
            command: format!("splitr.command.{suffix}"),
            query: format!("splitr.query.{suffix}"),
            event: format!("splitr.event.{suffix}"),
        }
    }

    /// The channel carrying messages of `kind`.
    pub fn for_kind(&self, kind: MessageKind) -> &str {
        match kind {
            MessageKind::Command => &self.command,
            MessageKind::Query => &self.query,
            MessageKind::Event => &self.event,
        }
    }

    /// All three channels, command first.
    pub fn all(&self) -> [&str; 3] {
        [&self.command, &self.query, &self.event]
    }
}

// =============================================================================
// In-process
// =============================================================================

/// Sends envelopes directly to a dispatch engine in the same process.
///
/// The engine must share its registry with the bus using this transport,
/// since responses are written straight into it.
#[derive(Debug, Clone)]
pub struct InProcessTransport {
    engine: DispatchEngine,
}

impl InProcessTransport {
    pub fn new(engine: DispatchEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    fn name(&self) -> &'static str {
        "in-process"
    }

    fn callback_address(&self) -> Option<&str> {
        None
    }

    async fn send(&self, envelope: RequestEnvelope) -> CallResult<()> {
        if envelope.kind() != MessageKind::Event
            && self.engine.table().handler(envelope.type_key()).is_none()
        {
            return Err(CallError::NoHandler(envelope.type_key().to_string()));
        }

        trace!(id = %envelope.id(), type_key = %envelope.type_key(), "Submitting in-process");
        self.engine
            .submit(envelope)
            .await
            .map_err(|_| TransportError::Closed(self.name().to_string()))?;
        Ok(())
    }
}

// =============================================================================
// Broker-backed
// =============================================================================

/// Publishes envelopes to a broker channel per message kind.
#[derive(Clone)]
pub struct BrokerTransport {
    broker: BoxedBroker,
    channels: ChannelNames,
    callback: String,
}

impl BrokerTransport {
    /// Creates a broker binding that asks for responses at `callback`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] if `callback` is blank, since
    /// synchronous and async calls could never be answered.
    pub fn new(
        broker: BoxedBroker,
        channels: ChannelNames,
        callback: impl Into<String>,
    ) -> TransportResult<Self> {
        let callback = callback.into();
        if callback.trim().is_empty() {
            return Err(TransportError::InvalidConfig(
                "callback address is required for broker transports".into(),
            ));
        }
        Ok(Self {
            broker,
            channels,
            callback,
        })
    }

    pub fn channels(&self) -> &ChannelNames {
        &self.channels
    }
}

#[async_trait]
impl Transport for BrokerTransport {
    fn name(&self) -> &'static str {
        "broker"
    }

    fn callback_address(&self) -> Option<&str> {
        Some(&self.callback)
    }

    async fn send(&self, envelope: RequestEnvelope) -> CallResult<()> {
        let channel = self.channels.for_kind(envelope.kind());
        let key = envelope.id().clone();
        trace!(id = %key, channel = %channel, "Publishing to broker");
        self.broker.send(channel, &key, envelope).await?;
        Ok(())
    }
}

impl std::fmt::Debug for BrokerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerTransport")
            .field("channels", &self.channels)
            .field("callback", &self.callback)
            .finish()
    }
}
