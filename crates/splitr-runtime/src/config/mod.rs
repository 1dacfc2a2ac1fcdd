//! Configuration module for the splitr runtime.
//!
//! This module provides layered configuration loading (defaults, files,
//! environment) and validation for the bus, dispatch engine, callback
//! channel and logging.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BusConfig, CallbackConfig, CallbackServerConfig, ChannelOverrides, DispatchConfig,
    IdempotencyConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    SpanEventConfig, SplitrConfig, TransportKind,
};
pub use validation::validate_config;
