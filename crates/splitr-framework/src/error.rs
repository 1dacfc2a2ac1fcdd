//! Framework error types.

use splitr_core::MessageKind;
use thiserror::Error;

/// Boxed error returned by handlers.
pub use tower::BoxError;

/// Errors raised while building a [`HandlerTable`](crate::HandlerTable).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TableError {
    /// More than one handler registered for a command or query type.
    #[error("{kind} '{type_key}' has {count} handlers, expected exactly one")]
    Ambiguous {
        /// The offending type tag.
        type_key: String,
        /// Message kind of the tag.
        kind: MessageKind,
        /// Number of handlers registered.
        count: usize,
    },

    /// The same type tag was registered under two kinds.
    #[error("type '{type_key}' registered as both {first} and {second}")]
    KindConflict {
        /// The offending type tag.
        type_key: String,
        /// Kind of the first registration.
        first: MessageKind,
        /// Kind of the conflicting registration.
        second: MessageKind,
    },
}

/// Errors produced while adapting a payload for a handler.
#[derive(Debug, Clone, Error)]
pub enum PayloadError {
    /// The inbound payload did not match the handler's message type.
    #[error("failed to decode '{type_key}' payload: {reason}")]
    Decode {
        /// Type tag of the message.
        type_key: &'static str,
        /// Reason for failure.
        reason: String,
    },

    /// The handler's result could not be serialized.
    #[error("failed to encode result of '{type_key}': {reason}")]
    Encode {
        /// Type tag of the message.
        type_key: &'static str,
        /// Reason for failure.
        reason: String,
    },
}

/// The worker pool no longer accepts work.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("worker pool is closed")]
pub struct PoolClosed;

/// Result type for table construction.
pub type TableResult<T> = Result<T, TableError>;
