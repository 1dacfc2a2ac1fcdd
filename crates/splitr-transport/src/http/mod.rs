//! HTTP callback channel.
//!
//! The broker bindings carry responses back over HTTP: the listening side
//! POSTs each [`ResponseEnvelope`](splitr_core::ResponseEnvelope) to the
//! callback address embedded in the request, and the calling side runs a
//! small server that resolves its registry from those POSTs.

#[cfg(feature = "http-client")]
mod client;
#[cfg(feature = "http-client")]
pub use client::{DEFAULT_CALLBACK_TIMEOUT, HttpCallbackSink};

#[cfg(feature = "http-server")]
mod server;
#[cfg(feature = "http-server")]
pub use server::{CallbackServer, DEFAULT_BASE_PATH};

#[cfg(all(test, feature = "http-client", feature = "http-server"))]
mod tests {
    use super::*;
    use splitr_core::{CallbackSink, CorrelationRegistry, ResponseEnvelope};
    use std::time::Duration;

    #[tokio::test]
    async fn test_sink_resolves_through_server() {
        let registry = CorrelationRegistry::new();
        let server = CallbackServer::new(registry.clone());
        let (handle, addr) = server.listen("127.0.0.1:0").await.unwrap();
        let pending = registry.register("q-1".into()).unwrap();

        let sink = HttpCallbackSink::new().unwrap();
        let url = format!("http://{addr}{}", server.query_path());
        sink.deliver(&url, &ResponseEnvelope::ok("q-1".into(), "\"DATA\""))
            .await
            .unwrap();

        let response = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.decode::<String>().unwrap(), "DATA");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_sink_reports_http_errors() {
        let server = CallbackServer::new(CorrelationRegistry::new());
        let (handle, addr) = server.listen("127.0.0.1:0").await.unwrap();

        let sink = HttpCallbackSink::new().unwrap();
        let url = format!("http://{addr}/nowhere");
        let err = sink
            .deliver(&url, &ResponseEnvelope::ok("x".into(), "null"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
        handle.shutdown().await;
    }
}
