//! Loopback callback sink.

use async_trait::async_trait;
use splitr_core::{CallbackSink, CorrelationRegistry, ResponseEnvelope, TransportResult};
use tracing::trace;

/// Resolves responses in a local registry, ignoring the callback address.
///
/// Used when caller and listener share a process but still go through a
/// broker, and in tests.
#[derive(Debug, Clone)]
pub struct LoopbackSink {
    registry: CorrelationRegistry,
}

impl LoopbackSink {
    pub fn new(registry: CorrelationRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl CallbackSink for LoopbackSink {
    async fn deliver(&self, address: &str, response: &ResponseEnvelope) -> TransportResult<()> {
        let resolved = self.registry.resolve(response.clone());
        trace!(address = %address, id = %response.id(), resolved, "Looped back response");
        Ok(())
    }
}
