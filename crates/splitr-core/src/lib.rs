//! # splitr core
//!
//! The zero-I/O foundation of splitr: the pieces a request/response call
//! needs regardless of which transport carries it.
//!
//! ## Components
//!
//! - **Envelopes**: [`RequestEnvelope`] / [`ResponseEnvelope`] keyed by a [`CorrelationId`]
//! - **Message traits**: [`BusMessage`], [`Command`], [`Query`], [`Event`] with explicit type tags
//! - **Correlation Registry**: [`CorrelationRegistry`] parks a [`PendingCall`] per outbound request
//! - **Idempotency Cache**: [`IdempotencyCache`] replays responses for redelivered requests
//! - **Collaborator interfaces**: [`Broker`] and [`CallbackSink`]
//!
//! ## Call flow
//!
//! ```text
//! caller ──register──▶ CorrelationRegistry ◀──resolve── callback / engine
//!   │                                                        ▲
//!   └──send──▶ transport ──▶ listener ──▶ dispatch engine ───┘
//! ```
//!
//! The registry and cache are plain owned values. Whoever builds the
//! process (usually `splitr-runtime`) creates them and hands clones to the
//! components that need them.

pub mod cache;
pub mod envelope;
pub mod error;
pub mod message;
pub mod registry;
pub mod transport;

pub use cache::IdempotencyCache;
pub use envelope::{
    Budget, CorrelationId, MessageKind, Outcome, RequestEnvelope, ResponseEnvelope, epoch_millis,
};
pub use error::{CallError, CallResult, RegistryError, TransportError, TransportResult};
pub use message::{BusMessage, Command, Event, Query};
pub use registry::{CorrelationRegistry, PendingCall, deadline_after};
pub use transport::{Broker, BoxedBroker, BoxedCallbackSink, CallbackSink, Subscription};
