//! # Splitr Framework
//!
//! The receiving side of the bus.
//!
//! This layer provides:
//! - Handler trait for plain async functions, adapted into tower services
//! - Handler table mapping type tags to handlers, validated at build time
//! - Bounded worker pool so each inbound message runs in its own task
//! - Dispatch engine with deadline checks, idempotent replay and event fan-out
//!
//! Transports feed envelopes into a [`DispatchEngine`]; they never call
//! handlers directly.

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod pool;
pub mod table;

pub use dispatcher::{DispatchEngine, DispatchOutcome, EngineBuilder, EngineStats};
pub use error::{BoxError, PayloadError, PoolClosed, TableError, TableResult};
pub use handler::{BoxedHandler, Handler, HandlerCall, HandlerContext, HandlerEntry, HandlerService};
pub use pool::{DEFAULT_MAX_CONCURRENCY, WorkerPool};
pub use table::{HandlerTable, HandlerTableBuilder};
