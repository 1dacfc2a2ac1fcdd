//! splitr runtime: configuration, logging and lifecycle.
//!
//! This crate wires the pieces of the lower crates into one owned
//! [`SplitrRuntime`]:
//!
//! - layered configuration with figment ([`config`])
//! - `tracing` subscriber setup ([`logging`])
//! - the registry, cache, dispatch engine, binding and buses for one process
//! - broker listeners and the optional callback server, started and stopped together
//!
//! # Transport Features
//!
//! - `http-client`: responses to callback addresses are POSTed with reqwest
//! - `http-server`: `callback_server.enabled = true` serves the callback routes
//! - `full-transport`: both
//!
//! Without `http-client`, responses for broker calls loop back into the local
//! registry, which is enough when caller and handlers share a process.
//!
//! ```ignore
//! use splitr_runtime::SplitrRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = SplitrRuntime::builder()
//!         .handlers(HandlerTable::builder().query(get_order_data))
//!         .build()?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{
    ConfigError, ConfigLoader, ConfigResult, Profile, SplitrConfig, TransportKind, load_config,
    load_config_from_file,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, LoggingError, SpanEvents};
pub use runtime::{RuntimeBuilder, SplitrRuntime};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for handler code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
