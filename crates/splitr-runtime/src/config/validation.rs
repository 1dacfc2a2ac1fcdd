//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    BusConfig, CallbackConfig, CallbackServerConfig, LogFormat, LoggingConfig, SplitrConfig,
};

/// Validates the entire configuration.
pub fn validate_config(config: &SplitrConfig) -> ConfigResult<()> {
    validate_bus_config(&config.bus)?;

    if config.idempotency.max_size == 0 {
        return Err(ConfigError::validation(
            "idempotency.max_size must be greater than 0",
        ));
    }
    if config.dispatch.max_concurrency == 0 {
        return Err(ConfigError::validation(
            "dispatch.max_concurrency must be greater than 0",
        ));
    }

    validate_callback_config(&config.callback, config.bus.transport.is_broker())?;

    if config.callback_server.enabled {
        validate_callback_server_config(&config.callback_server)?;
    }

    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_bus_config(bus: &BusConfig) -> ConfigResult<()> {
    if bus.default_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "bus.default_timeout_ms must be greater than 0",
        ));
    }

    let names = bus.channel_names();
    if names.all().iter().any(|name| name.trim().is_empty()) {
        return Err(ConfigError::validation("Channel names cannot be empty"));
    }
    Ok(())
}

/// A broker binding cannot work without an address to send responses to.
fn validate_callback_config(callback: &CallbackConfig, required: bool) -> ConfigResult<()> {
    match callback.url.as_deref() {
        Some(url) => validate_url(url)?,
        None if required => return Err(ConfigError::missing_field("callback.url")),
        None => {}
    }

    if callback.timeout_ms == 0 {
        return Err(ConfigError::validation(
            "callback.timeout_ms must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_callback_server_config(server: &CallbackServerConfig) -> ConfigResult<()> {
    validate_port(server.port)?;
    validate_path(&server.base_path)?;
    if server.host.is_empty() {
        return Err(ConfigError::missing_field("callback_server.host"));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.format == LogFormat::Json && !cfg!(feature = "json-log") {
        return Err(ConfigError::validation(
            "logging.format = \"json\" requires the `json-log` feature",
        ));
    }

    if logging.filters.keys().any(|module| module.trim().is_empty()) {
        return Err(ConfigError::validation(
            "Logging filter module names cannot be empty",
        ));
    }
    Ok(())
}

/// Validates an HTTP URL.
fn validate_url(url: &str) -> ConfigResult<()> {
    if url.trim().is_empty() {
        return Err(ConfigError::missing_field("callback.url"));
    }

    let valid_schemes = ["http://", "https://"];
    if !valid_schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {valid_schemes:?}"),
        ));
    }
    Ok(())
}

/// Validates a port number.
fn validate_port(port: u16) -> ConfigResult<()> {
    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }
    Ok(())
}

/// Validates a path.
fn validate_path(path: &str) -> ConfigResult<()> {
    if !path.starts_with('/') {
        return Err(ConfigError::validation("Path must start with '/'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{LogLevel, TransportKind};

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&SplitrConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = SplitrConfig::default();
        config.bus.default_timeout_ms = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_broker_requires_callback_url() {
        let mut config = SplitrConfig::default();
        config.bus.transport = TransportKind::Queue;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.callback.url = Some("orders:8080/callback".into());
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidUrl { .. })
        ));

        config.callback.url = Some("http://orders:8080/internal/command/callback".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_callback_server_checked_only_when_enabled() {
        let mut config = SplitrConfig::default();
        config.callback_server.port = 0;
        assert!(validate_config(&config).is_ok());

        config.callback_server.enabled = true;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidPort(0))
        ));

        config.callback_server.port = 9000;
        config.callback_server.base_path = "internal".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_empty_filter_module_rejected() {
        let mut config = SplitrConfig::default();
        config.logging.filters.insert(" ".into(), LogLevel::Debug);
        assert!(validate_config(&config).is_err());
    }

    #[cfg(not(feature = "json-log"))]
    #[test]
    fn test_json_format_needs_feature() {
        let mut config = SplitrConfig::default();
        config.logging.format = LogFormat::Json;
        assert!(validate_config(&config).is_err());
    }
}
