//! Unified error types for the splitr core.
//!
//! Errors inside the dispatch engine never reach the caller directly; what a
//! caller can observe is captured by [`CallError`]. Transport-level failures
//! (broker sends, webhook posts) are described by [`TransportError`].

use std::time::Duration;

use thiserror::Error;

use crate::envelope::CorrelationId;

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors raised by the correlation registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A pending call with this id is already registered.
    #[error("correlation id '{0}' is already registered")]
    Duplicate(CorrelationId),
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur while moving envelopes between processes.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The channel or broker was closed.
    #[error("channel '{0}' is closed")]
    Closed(String),

    /// Delivering a response to a callback address failed.
    #[error("callback to '{address}' failed: {reason}")]
    CallbackFailed {
        /// The callback address.
        address: String,
        /// Reason for failure.
        reason: String,
    },

    /// Invalid transport configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Creates a callback failure for the given address.
    pub fn callback_failed(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CallbackFailed {
            address: address.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Call Errors
// =============================================================================

/// Errors a publishing caller can observe.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// No response arrived before the deadline.
    #[error("call '{id}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The correlation id of the call.
        id: CorrelationId,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The handler ran and reported a failure.
    #[error("handler failed: {reason}")]
    Handler {
        /// Failure description reported by the receiving side.
        reason: String,
    },

    /// No handler is registered for the message type.
    #[error("no handler registered for '{0}'")]
    NoHandler(String),

    /// The pending call was dropped before resolution (registry shut down).
    #[error("call '{0}' was closed before a response arrived")]
    Closed(CorrelationId),

    /// Payload or result (de)serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Registry rejected the call.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The envelope could not be handed to the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CallError {
    /// Creates a timeout error for the call `id` that was given `timeout`.
    pub fn timeout(id: CorrelationId, timeout: Duration) -> Self {
        Self::Timeout {
            id,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns `true` if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for publishing calls.
pub type CallResult<T> = Result<T, CallError>;
