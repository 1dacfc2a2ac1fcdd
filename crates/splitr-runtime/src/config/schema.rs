//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use splitr_transport::ChannelNames;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SplitrConfig {
    /// Bus binding and call defaults.
    #[serde(default)]
    pub bus: BusConfig,

    /// Redelivery protection.
    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    /// Receiving-side concurrency.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Where remote listeners send responses.
    #[serde(default)]
    pub callback: CallbackConfig,

    /// Local endpoint receiving those responses.
    #[serde(default)]
    pub callback_server: CallbackServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// =============================================================================
// Bus
// =============================================================================

/// Which binding carries envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Direct calls into the local dispatch engine.
    #[default]
    InProcess,
    /// Publish/subscribe broker.
    Topic,
    /// Competing-consumer broker.
    Queue,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProcess => "in-process",
            Self::Topic => "topic",
            Self::Queue => "queue",
        }
    }

    /// Returns `true` for the broker-backed bindings.
    pub fn is_broker(&self) -> bool {
        !matches!(self, Self::InProcess)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Time a caller waits for a response, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Binding used by the buses.
    #[serde(default)]
    pub transport: TransportKind,

    /// Channel name overrides for broker bindings.
    #[serde(default)]
    pub channels: ChannelOverrides,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            transport: TransportKind::default(),
            channels: ChannelOverrides::default(),
        }
    }
}

impl BusConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Channel names for the configured binding, with overrides applied.
    pub fn channel_names(&self) -> ChannelNames {
        let mut names = match self.transport {
            TransportKind::Queue => ChannelNames::queue(),
            TransportKind::Topic | TransportKind::InProcess => ChannelNames::topic(),
        };
        if let Some(command) = &self.channels.command {
            names.command.clone_from(command);
        }
        if let Some(query) = &self.channels.query {
            names.query.clone_from(query);
        }
        if let Some(event) = &self.channels.event {
            names.event.clone_from(event);
        }
        names
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Per-kind channel name overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelOverrides {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
}

// =============================================================================
// Engine
// =============================================================================

/// Idempotency cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// Maximum number of remembered responses.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
        }
    }
}

fn default_max_size() -> usize {
    100
}

/// Dispatch engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of envelopes processed at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_max_concurrency() -> usize {
    64
}

// =============================================================================
// Callback
// =============================================================================

/// Callback channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Address embedded in requests for the response. Required for brokers.
    #[serde(default)]
    pub url: Option<String>,

    /// Request timeout for delivering a response, in milliseconds.
    #[serde(default = "default_callback_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_callback_timeout_ms(),
        }
    }
}

fn default_callback_timeout_ms() -> u64 {
    5_000
}

/// Callback endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackServerConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Prefix of the callback routes.
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

impl Default for CallbackServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            base_path: default_base_path(),
        }
    }
}

impl CallbackServerConfig {
    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_base_path() -> String {
    "/internal".to_string()
}

// =============================================================================
// Logging
// =============================================================================

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Log file rollover period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Minutely,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, used when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// How often the log file rolls over.
    #[serde(default)]
    pub rotation: LogRotation,

    /// Rolled files kept on disk.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line of each event.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Per-module level overrides, e.g. `splitr_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            rotation: LogRotation::default(),
            max_files: default_max_files(),
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
            filters: HashMap::new(),
        }
    }
}

fn default_max_files() -> usize {
    5
}
