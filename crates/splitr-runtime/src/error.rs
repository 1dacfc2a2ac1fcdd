//! Runtime error types.

use splitr_core::TransportError;
use splitr_framework::TableError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while building or running a [`SplitrRuntime`](crate::SplitrRuntime).
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The handler table failed validation.
    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The configuration asks for something compiled out.
    #[error("`{0}` is required but the feature is not enabled")]
    FeatureDisabled(&'static str),

    /// Shutdown signals could not be installed.
    #[error("Failed to listen for shutdown signals: {0}")]
    Signal(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
