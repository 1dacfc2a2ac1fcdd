//! # splitr
//!
//! Typed command, query and event buses for services that talk over
//! asynchronous transports, with responses correlated back to the caller.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  RequestEnvelope  ┌───────────┐     ┌─────────────────┐
//! │ Command/Query│──────────────────▶│ Transport │────▶│ Dispatch engine │──▶ handlers
//! │ /Event buses │                   └───────────┘     │ (deadline, LRU  │
//! │              │◀──────────────────────────────────── │  replay, pool)  │
//! └──────┬───────┘  ResponseEnvelope (callback)         └─────────────────┘
//!        ▼
//!   Correlation registry
//! ```
//!
//! - **Buses**: `publish_sync`, `publish_async` and fire-and-forget `publish`
//! - **Correlation registry**: one pending slot per outbound call, resolved once
//! - **Dispatch engine**: drops expired requests, replays cached responses, fans out events
//! - **Transports**: in-process, topic broker or queue broker, with an HTTP callback channel
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use serde::{Deserialize, Serialize};
//! use splitr::prelude::*;
//!
//! #[derive(Serialize, Deserialize, BusMessage)]
//! #[message(kind = "query", type_key = "orders.GetOrderData", response = "String", crate = "splitr::core")]
//! struct GetOrderData {
//!     order_id: String,
//! }
//!
//! async fn get_order_data(query: GetOrderData) -> Result<String, BoxError> {
//!     Ok(format!("DATA-FOR-{}", query.order_id))
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = SplitrRuntime::builder()
//!         .handlers(HandlerTable::builder().query(get_order_data))
//!         .build()?;
//!
//!     let data = runtime
//!         .query_bus()
//!         .publish_sync(&GetOrderData { order_id: "100".into() })
//!         .await?;
//!     assert_eq!(data, "DATA-FOR-100");
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)* / `yaml-config`: configuration file formats
//! - `json-log`: JSON log lines
//! - `http-client`: deliver responses to callback URLs over HTTP
//! - `http-server`: serve the callback endpoint
//! - `full-transport`: both HTTP features

pub use splitr_core as core;
pub use splitr_framework as framework;
pub use splitr_runtime as runtime;
pub use splitr_transport as transport;

pub use splitr_macros::BusMessage;

/// Commonly used types for declaring messages, writing handlers and
/// publishing.
///
/// ```rust,ignore
/// use splitr::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use splitr_runtime::{SplitrConfig, SplitrRuntime, TransportKind};

    // Messages
    pub use splitr_core::{BusMessage, Command, Event, Query};
    pub use splitr_macros::BusMessage;

    // Handlers
    pub use splitr_framework::{BoxError, HandlerContext, HandlerTable};

    // Publishing
    pub use splitr_core::{CallError, CallResult, CorrelationId};
    pub use splitr_transport::{CommandBus, DomainEventBus, EventBus, PendingResponse, QueryBus};
}
