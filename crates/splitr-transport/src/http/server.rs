//! Callback endpoint.

use std::net::SocketAddr;

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use splitr_core::{CorrelationRegistry, ResponseEnvelope, TransportResult};
use tracing::{debug, error, info};

use crate::listener::ListenerHandle;

/// Default path prefix of the callback routes.
pub const DEFAULT_BASE_PATH: &str = "/internal";

/// HTTP endpoint that resolves the local registry from callback POSTs.
///
/// | Route | Body |
/// |-------|------|
/// | `POST {base}/command/callback` | `ResponseEnvelope` JSON |
/// | `POST {base}/query/callback` | `ResponseEnvelope` JSON |
///
/// Both answer `200 OK` whether or not the id was still pending; malformed
/// bodies are rejected by the JSON extractor with a 4xx status.
#[derive(Debug, Clone)]
pub struct CallbackServer {
    registry: CorrelationRegistry,
    base_path: String,
}

impl CallbackServer {
    pub fn new(registry: CorrelationRegistry) -> Self {
        Self {
            registry,
            base_path: DEFAULT_BASE_PATH.to_string(),
        }
    }

    /// Sets the path prefix. A missing leading `/` is added.
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        let base_path = base_path.into();
        let trimmed = base_path.trim_end_matches('/');
        self.base_path = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        self
    }

    pub fn command_path(&self) -> String {
        format!("{}/command/callback", self.base_path)
    }

    pub fn query_path(&self) -> String {
        format!("{}/query/callback", self.base_path)
    }

    /// Builds the router, for mounting into an existing axum app.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.command_path(), post(receive_callback))
            .route(&self.query_path(), post(receive_callback))
            .with_state(self.registry.clone())
    }

    /// Binds `addr` and serves the callback routes in the background.
    ///
    /// Returns the handle stopping the server and the bound address.
    pub async fn listen(&self, addr: &str) -> TransportResult<(ListenerHandle, SocketAddr)> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let actual_addr = listener.local_addr()?;

        info!(addr = %actual_addr, base_path = %self.base_path, "Callback server listening");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
                info!("Callback server shutting down");
            });
            if let Err(e) = server.await {
                error!(error = %e, "Callback server error");
            }
        });

        let handle = ListenerHandle::new(format!("callback-server-{actual_addr}"), shutdown_tx)
            .with_task(task);
        Ok((handle, actual_addr))
    }
}

async fn receive_callback(
    State(registry): State<CorrelationRegistry>,
    Json(response): Json<ResponseEnvelope>,
) -> StatusCode {
    let id = response.id().clone();
    let resolved = registry.resolve(response);
    debug!(id = %id, resolved, "Callback received");
    StatusCode::OK
}
