//! Webhook callback sink.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use splitr_core::{CallbackSink, ResponseEnvelope, TransportError, TransportResult};
use tracing::{debug, warn};

/// Default request timeout for callback POSTs.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Delivers responses by POSTing them as JSON to the callback address.
#[derive(Debug, Clone)]
pub struct HttpCallbackSink {
    client: Client,
}

impl HttpCallbackSink {
    /// Creates a sink with the default request timeout.
    pub fn new() -> TransportResult<Self> {
        Self::with_timeout(DEFAULT_CALLBACK_TIMEOUT)
    }

    /// Creates a sink with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> TransportResult<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackSink for HttpCallbackSink {
    async fn deliver(&self, address: &str, response: &ResponseEnvelope) -> TransportResult<()> {
        let resp = self
            .client
            .post(address)
            .json(response)
            .send()
            .await
            .map_err(|e| TransportError::callback_failed(address, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(address = %address, status = status.as_u16(), "Callback rejected");
            return Err(TransportError::callback_failed(
                address,
                format!("HTTP {} error: {}", status.as_u16(), text),
            ));
        }

        debug!(address = %address, id = %response.id(), "Callback delivered");
        Ok(())
    }
}
