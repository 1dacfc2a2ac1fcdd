//! Runtime assembly and lifecycle.
//!
//! A [`SplitrRuntime`] owns one correlation registry, one idempotency cache,
//! one dispatch engine and the binding its buses publish through. Nothing is
//! global: two runtimes in one process are fully independent, which is how
//! the tests run a caller and a listener side by side.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let runtime = SplitrRuntime::builder()
//!     .config_file("config/splitr.toml")
//!     .handlers(
//!         HandlerTable::builder()
//!             .query(get_order_data)
//!             .command(place_order),
//!     )
//!     .build()?;
//!
//! runtime.start().await?;
//! let data = runtime.query_bus().publish_sync(&GetOrderData { order_id: "100".into() }).await?;
//! runtime.stop().await?;
//! ```
//!
//! # Lifecycle
//!
//! | Step | In-process | Topic / queue |
//! |------|------------|---------------|
//! | build | registry, cache, engine, buses | same, plus broker binding |
//! | `domain_event_bus` | local engine | local engine, broker untouched |
//! | `start` | nothing to start | one listener per kind with handlers, callback server if enabled |
//! | `stop` | pending calls closed | listeners stopped, pending calls closed |

use std::sync::Arc;

use splitr_core::{
    BoxedBroker, BoxedCallbackSink, CorrelationRegistry, IdempotencyCache, MessageKind,
};
use splitr_framework::{DispatchEngine, EngineStats, HandlerTable, HandlerTableBuilder};
use splitr_transport::{
    BoxedTransport, BrokerListener, BrokerTransport, Bus, ChannelNames, CommandBus, DomainEventBus,
    EventBus,
    InProcessTransport, ListenerHandle, LoopbackSink, QueryBus, QueueBroker, TopicBroker,
};
use tokio::signal;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ConfigLoader, SplitrConfig, TransportKind, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// How the engine delivers responses to callback addresses.
enum SinkChoice {
    /// HTTP when the `http-client` feature is on, loopback otherwise.
    Auto,
    /// Resolve this runtime's own registry.
    Loopback,
    Custom(BoxedCallbackSink),
}

#[cfg(feature = "http-client")]
fn default_sink(
    config: &SplitrConfig,
    _registry: &CorrelationRegistry,
) -> RuntimeResult<BoxedCallbackSink> {
    let timeout = std::time::Duration::from_millis(config.callback.timeout_ms);
    Ok(Arc::new(splitr_transport::HttpCallbackSink::with_timeout(
        timeout,
    )?))
}

#[cfg(not(feature = "http-client"))]
fn default_sink(
    config: &SplitrConfig,
    registry: &CorrelationRegistry,
) -> RuntimeResult<BoxedCallbackSink> {
    if config.bus.transport.is_broker() {
        debug!("http-client disabled, responses loop back to the local registry");
    }
    Ok(Arc::new(LoopbackSink::new(registry.clone())))
}

/// A configured splitr process: buses on the calling side, the dispatch
/// engine and its listeners on the receiving side.
pub struct SplitrRuntime {
    config: SplitrConfig,
    registry: CorrelationRegistry,
    engine: DispatchEngine,
    bus: Bus,
    domain_events: DomainEventBus,
    /// Broker and channel names for broker bindings.
    broker: Option<(BoxedBroker, ChannelNames)>,
    /// Listeners started by [`start`](Self::start).
    listeners: Mutex<Vec<ListenerHandle>>,
    running: Arc<RwLock<bool>>,
}

impl SplitrRuntime {
    /// Creates a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from a loaded configuration and a handler table.
    ///
    /// Initializes logging (once per process) and validates `config`.
    pub fn from_config(config: SplitrConfig, table: HandlerTable) -> RuntimeResult<Self> {
        Self::assemble(config, table, None, SinkChoice::Auto)
    }

    fn assemble(
        config: SplitrConfig,
        table: HandlerTable,
        broker: Option<BoxedBroker>,
        sink: SinkChoice,
    ) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);
        validate_config(&config)?;

        if config.callback_server.enabled && !cfg!(feature = "http-server") {
            return Err(RuntimeError::FeatureDisabled("http-server"));
        }

        let registry = CorrelationRegistry::new();
        let cache = IdempotencyCache::new(config.idempotency.max_size);

        let sink: BoxedCallbackSink = match sink {
            SinkChoice::Custom(sink) => sink,
            SinkChoice::Loopback => Arc::new(LoopbackSink::new(registry.clone())),
            SinkChoice::Auto => default_sink(&config, &registry)?,
        };
        let engine = DispatchEngine::builder(table)
            .registry(registry.clone())
            .cache(cache)
            .callback_sink(sink)
            .max_concurrency(config.dispatch.max_concurrency)
            .build();

        let (transport, broker) = match config.bus.transport {
            TransportKind::InProcess => {
                if broker.is_some() {
                    warn!("Broker supplied but the in-process binding is configured, ignoring it");
                }
                let transport: BoxedTransport = Arc::new(InProcessTransport::new(engine.clone()));
                (transport, None)
            }
            kind @ (TransportKind::Topic | TransportKind::Queue) => {
                let broker: BoxedBroker = match broker {
                    Some(broker) => broker,
                    None if kind == TransportKind::Queue => Arc::new(QueueBroker::new()),
                    None => Arc::new(TopicBroker::new()),
                };
                let channels = config.bus.channel_names();
                let callback = config
                    .callback
                    .url
                    .clone()
                    .ok_or_else(|| ConfigError::missing_field("callback.url"))?;
                let transport: BoxedTransport = Arc::new(BrokerTransport::new(
                    Arc::clone(&broker),
                    channels.clone(),
                    callback,
                )?);
                (transport, Some((broker, channels)))
            }
        };

        let bus = Bus::new(registry.clone(), transport, config.bus.default_timeout());
        let domain_events = DomainEventBus::new(engine.clone());

        info!(
            transport = %config.bus.transport,
            default_timeout_ms = config.bus.default_timeout_ms,
            handlers = engine.table().handler_count(),
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config,
            registry,
            engine,
            bus,
            domain_events,
            broker,
            listeners: Mutex::new(Vec::new()),
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// Returns the configuration this runtime was built from.
    pub fn config(&self) -> &SplitrConfig {
        &self.config
    }

    pub fn command_bus(&self) -> CommandBus {
        self.bus.command_bus()
    }

    pub fn query_bus(&self) -> QueryBus {
        self.bus.query_bus()
    }

    pub fn event_bus(&self) -> EventBus {
        self.bus.event_bus()
    }

    /// Raises events on this runtime's own handlers, never through the broker.
    pub fn domain_event_bus(&self) -> DomainEventBus {
        self.domain_events.clone()
    }

    /// The registry responses for this runtime's calls resolve into.
    pub fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    pub fn engine_stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// Returns whether the runtime is currently running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts the broker listeners and the callback server.
    pub async fn start(&self) -> RuntimeResult<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Runtime is already running");
                return Ok(());
            }
            *running = true;
        }

        info!(transport = %self.config.bus.transport, "Starting splitr runtime");

        let mut handles = Vec::new();
        if let Err(e) = self.start_listeners(&mut handles).await {
            for handle in handles {
                handle.shutdown().await;
            }
            *self.running.write().await = false;
            return Err(e);
        }

        let started = handles.len();
        self.listeners.lock().await.extend(handles);
        info!(listeners = started, "Runtime started");
        Ok(())
    }

    async fn start_listeners(&self, handles: &mut Vec<ListenerHandle>) -> RuntimeResult<()> {
        if let Some((broker, channels)) = &self.broker {
            let listener = BrokerListener::new(self.engine.clone());
            for kind in [MessageKind::Command, MessageKind::Query, MessageKind::Event] {
                let channel = channels.for_kind(kind);
                if !self.engine.table().handles_kind(kind) {
                    debug!(%kind, channel, "No handlers for kind, not consuming channel");
                    continue;
                }
                handles.push(listener.listen(broker.subscribe(channel)));
            }
        }

        #[cfg(feature = "http-server")]
        {
            let server_config = &self.config.callback_server;
            if server_config.enabled {
                let server = splitr_transport::CallbackServer::new(self.registry.clone())
                    .with_base_path(server_config.base_path.as_str());
                let (handle, addr) = server.listen(&server_config.bind_addr()).await?;
                debug!(%addr, "Callback server bound");
                handles.push(handle);
            }
        }

        Ok(())
    }

    /// Stops listeners and closes every pending call.
    ///
    /// Callers still waiting observe [`CallError::Closed`](splitr_core::CallError::Closed).
    pub async fn stop(&self) -> RuntimeResult<()> {
        {
            let mut running = self.running.write().await;
            if !*running {
                warn!("Runtime is not running");
                return Ok(());
            }
            *running = false;
        }

        info!("Stopping splitr runtime");

        let handles: Vec<ListenerHandle> = self.listeners.lock().await.drain(..).collect();
        for handle in handles {
            debug!(listener = %handle.id, "Stopping listener");
            handle.shutdown().await;
        }

        let dropped = self.registry.clear();
        if dropped > 0 {
            warn!(dropped, "Pending calls closed by shutdown");
        }

        let stats = self.engine.stats();
        info!(
            received = stats.received,
            completed = stats.completed,
            failed = stats.failed,
            timed_out = stats.timed_out,
            "Runtime stopped"
        );
        Ok(())
    }

    /// Runs the runtime until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("splitr runtime is now running. Press Ctrl+C to stop.");

        let waited = Self::wait_for_shutdown().await;
        self.stop().await?;
        waited
    }

    /// Runs the runtime until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }

    async fn wait_for_shutdown() -> RuntimeResult<()> {
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                .map_err(|e| RuntimeError::Signal(e.to_string()))?;

            tokio::select! {
                res = signal::ctrl_c() => {
                    res.map_err(|e| RuntimeError::Signal(e.to_string()))?;
                    info!("Received Ctrl+C, shutting down");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c()
                .await
                .map_err(|e| RuntimeError::Signal(e.to_string()))?;
            info!("Received Ctrl+C, shutting down");
        }

        Ok(())
    }
}

impl std::fmt::Debug for SplitrRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitrRuntime")
            .field("transport", &self.config.bus.transport)
            .field("registry", &self.registry)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`SplitrRuntime`].
///
/// ```rust,ignore
/// let runtime = SplitrRuntime::builder()
///     .profile("production")
///     .handlers(HandlerTable::builder().event(send_email))
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    handlers: HandlerTableBuilder,
    broker: Option<BoxedBroker>,
    sink: SinkChoice,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            handlers: HandlerTableBuilder::new(),
            broker: None,
            sink: SinkChoice::Auto,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges configuration over every loaded source.
    pub fn merge(mut self, config: SplitrConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Handlers served by this runtime. Publishing-only runtimes can skip this.
    pub fn handlers(mut self, handlers: HandlerTableBuilder) -> Self {
        self.handlers = handlers;
        self
    }

    /// Uses an existing broker instead of creating one.
    ///
    /// Runtimes sharing a broker can call each other over it.
    pub fn broker(mut self, broker: BoxedBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Delivers responses through `sink`.
    pub fn callback_sink(mut self, sink: BoxedCallbackSink) -> Self {
        self.sink = SinkChoice::Custom(sink);
        self
    }

    /// Resolves callback responses directly in this runtime's registry.
    ///
    /// Lets a single runtime publish and serve over a broker without a
    /// callback server.
    pub fn loopback_callbacks(mut self) -> Self {
        self.sink = SinkChoice::Loopback;
        self
    }

    /// Loads the configuration, validates the handlers and builds the runtime.
    pub fn build(self) -> RuntimeResult<SplitrRuntime> {
        let config = self.config_loader.load()?;
        let table = self.handlers.build()?;
        SplitrRuntime::assemble(config, table, self.broker, self.sink)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use splitr_core::{
        Broker, CallError, CorrelationId, RequestEnvelope, Subscription, TransportResult,
    };
    use splitr_framework::BoxError;
    use splitr_macros::BusMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, BusMessage)]
    #[message(kind = "query", type_key = "orders.GetOrderData", response = "String")]
    struct GetOrderData {
        order_id: String,
    }

    #[derive(Debug, Serialize, Deserialize, BusMessage)]
    #[message(kind = "command", type_key = "orders.Stall", response = "String")]
    struct Stall;

    #[derive(Debug, Serialize, Deserialize, BusMessage)]
    #[message(kind = "event", type_key = "orders.OrderPlaced")]
    struct OrderPlaced {
        order_id: String,
    }

    async fn get_order_data(query: GetOrderData) -> Result<String, BoxError> {
        Ok(format!("DATA-FOR-{}", query.order_id))
    }

    fn in_process_config() -> SplitrConfig {
        SplitrConfig::default()
    }

    fn queue_config() -> SplitrConfig {
        let mut config = SplitrConfig::default();
        config.bus.transport = TransportKind::Queue;
        config.callback.url = Some("http://localhost:8080/internal/query/callback".into());
        config
    }

    #[tokio::test]
    async fn test_in_process_query() {
        let table = HandlerTable::builder().query(get_order_data).build().unwrap();
        let runtime = SplitrRuntime::from_config(in_process_config(), table).unwrap();

        let data = runtime
            .query_bus()
            .publish_sync(&GetOrderData {
                order_id: "100".into(),
            })
            .await
            .unwrap();
        assert_eq!(data, "DATA-FOR-100");
        assert_eq!(runtime.engine_stats().completed, 1);
        assert!(runtime.registry().is_empty());
    }

    #[tokio::test]
    async fn test_queue_with_loopback_callbacks() {
        let runtime = SplitrRuntime::builder()
            .without_env()
            .merge(queue_config())
            .handlers(HandlerTable::builder().query(get_order_data))
            .loopback_callbacks()
            .build()
            .unwrap();
        runtime.start().await.unwrap();
        assert!(runtime.is_running().await);

        let data = runtime
            .query_bus()
            .publish_sync(&GetOrderData {
                order_id: "7".into(),
            })
            .await
            .unwrap();
        assert_eq!(data, "DATA-FOR-7");

        runtime.stop().await.unwrap();
        assert!(!runtime.is_running().await);
    }

    #[tokio::test]
    async fn test_shared_topic_broker_between_runtimes() {
        let broker: BoxedBroker = Arc::new(TopicBroker::new());
        let mut config = queue_config();
        config.bus.transport = TransportKind::Topic;

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let listener = SplitrRuntime::builder()
            .without_env()
            .merge(config.clone())
            .handlers(HandlerTable::builder().event(move |_: OrderPlaced| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            }))
            .broker(broker.clone())
            .build()
            .unwrap();
        listener.start().await.unwrap();

        let caller = SplitrRuntime::builder()
            .without_env()
            .merge(config)
            .broker(broker)
            .build()
            .unwrap();
        caller.start().await.unwrap();

        caller
            .event_bus()
            .publish(&OrderPlaced {
                order_id: "100".into(),
            })
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(caller.engine_stats().received, 0);

        caller.stop().await.unwrap();
        listener.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_broker_without_callback_url_is_rejected() {
        let mut config = queue_config();
        config.callback.url = None;

        let err = SplitrRuntime::from_config(config, HandlerTable::default()).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Config(ConfigError::MissingField { .. })
        ));
    }

    #[tokio::test]
    async fn test_ambiguous_handlers_fail_build() {
        let err = SplitrRuntime::builder()
            .without_env()
            .handlers(
                HandlerTable::builder()
                    .query(get_order_data)
                    .query(get_order_data),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Table(_)));
    }

    #[cfg(not(feature = "http-server"))]
    #[tokio::test]
    async fn test_callback_server_needs_feature() {
        let mut config = in_process_config();
        config.callback_server.enabled = true;

        let err = SplitrRuntime::from_config(config, HandlerTable::default()).unwrap_err();
        assert!(matches!(err, RuntimeError::FeatureDisabled("http-server")));
    }

    #[tokio::test]
    async fn test_stop_closes_pending_calls() {
        let table = HandlerTable::builder()
            .command(|_: Stall| async {
                std::future::pending::<()>().await;
                Ok::<_, BoxError>(String::new())
            })
            .build()
            .unwrap();
        let runtime = SplitrRuntime::from_config(in_process_config(), table).unwrap();
        runtime.start().await.unwrap();

        let pending = runtime.command_bus().publish_async(&Stall).await.unwrap();
        let id = pending.id().clone();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !runtime.registry().contains(&id) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        runtime.stop().await.unwrap();
        assert!(matches!(pending.await, Err(CallError::Closed(_))));
    }

    #[tokio::test]
    async fn test_run_until() {
        let runtime =
            SplitrRuntime::from_config(in_process_config(), HandlerTable::default()).unwrap();
        runtime.run_until(async {}).await.unwrap();
        assert!(!runtime.is_running().await);
    }

    #[tokio::test]
    async fn test_queue_listener_skips_unhandled_kinds() {
        let broker = Arc::new(QueueBroker::new());
        let runtime = SplitrRuntime::builder()
            .without_env()
            .merge(queue_config())
            .handlers(HandlerTable::builder().query(get_order_data))
            .broker(broker.clone())
            .loopback_callbacks()
            .build()
            .unwrap();
        runtime.start().await.unwrap();

        assert_eq!(runtime.listeners.lock().await.len(), 1);
        runtime.stop().await.unwrap();
        broker.close();
    }

    /// Queue broker that counts what passes through it.
    #[derive(Default)]
    struct CountingBroker {
        inner: QueueBroker,
        sent: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Broker for CountingBroker {
        async fn send(
            &self,
            channel: &str,
            key: &CorrelationId,
            envelope: RequestEnvelope,
        ) -> TransportResult<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            self.inner.send(channel, key, envelope).await
        }

        fn subscribe(&self, channel: &str) -> Subscription {
            self.inner.subscribe(channel)
        }
    }

    #[tokio::test]
    async fn test_domain_events_bypass_the_broker() {
        let broker = Arc::new(CountingBroker::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let runtime = SplitrRuntime::builder()
            .without_env()
            .merge(queue_config())
            .handlers(HandlerTable::builder().event(move |_: OrderPlaced| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            }))
            .broker(broker.clone())
            .build()
            .unwrap();

        // Not started: no listener consumes the broker.
        runtime
            .domain_event_bus()
            .arise(&OrderPlaced {
                order_id: "100".into(),
            })
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(broker.sent.load(Ordering::SeqCst), 0);

        runtime
            .event_bus()
            .publish(&OrderPlaced {
                order_id: "101".into(),
            })
            .await
            .unwrap();
        assert_eq!(broker.sent.load(Ordering::SeqCst), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
