//! Command, query and event buses.
//!
//! The buses are typed front doors over one shared [`Bus`] core. Every call
//! shape composes the same primitives:
//!
//! | Call | Registry | Send | Wait |
//! |------|----------|------|------|
//! | `publish_sync` | register | yes | until response or timeout |
//! | `publish_async` | register | yes | returns a [`PendingResponse`] to await later |
//! | `publish` | no | yes | no |
//!
//! [`DomainEventBus::arise`] is the odd one out: it always dispatches on the
//! local engine, even when the other buses publish through a broker.
//!
//! ```rust,ignore
//! let order: String = runtime.query_bus().publish_sync(&GetOrder { id: "100".into() }).await?;
//!
//! let pending = runtime.command_bus().publish_async(&PlaceOrder { .. }).await?;
//! let receipt = pending.await?;
//! ```

use std::future::IntoFuture;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use splitr_core::{
    BusMessage, CallError, CallResult, Command, CorrelationId, CorrelationRegistry, Event,
    PendingCall, Query, RequestEnvelope, deadline_after,
};
use tokio::time::Instant;
use tracing::{debug, warn};

use splitr_framework::DispatchEngine;

use crate::binding::{BoxedTransport, InProcessTransport};

/// Default time a caller waits for a response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

// =============================================================================
// Bus Core
// =============================================================================

/// Shared core of the typed buses: registry, binding and default timeout.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

struct BusInner {
    registry: CorrelationRegistry,
    transport: BoxedTransport,
    default_timeout: Duration,
}

impl Bus {
    /// Creates a bus core.
    ///
    /// `registry` must be the one responses are resolved into: the engine's
    /// registry for in-process bindings, the callback server's otherwise.
    pub fn new(
        registry: CorrelationRegistry,
        transport: BoxedTransport,
        default_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry,
                transport,
                default_timeout,
            }),
        }
    }

    pub fn registry(&self) -> &CorrelationRegistry {
        &self.inner.registry
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Name of the underlying binding.
    pub fn transport_name(&self) -> &'static str {
        self.inner.transport.name()
    }

    pub fn command_bus(&self) -> CommandBus {
        CommandBus { bus: self.clone() }
    }

    pub fn query_bus(&self) -> QueryBus {
        QueryBus { bus: self.clone() }
    }

    pub fn event_bus(&self) -> EventBus {
        EventBus { bus: self.clone() }
    }

    fn envelope<M: BusMessage>(
        &self,
        message: &M,
        timeout: Option<Duration>,
        reply: bool,
        synchronous: bool,
    ) -> CallResult<RequestEnvelope> {
        let mut envelope = RequestEnvelope::for_message(CorrelationId::generate(), message)?
            .with_synchronous(synchronous);
        if let Some(timeout) = timeout {
            envelope = envelope.with_timeout(timeout);
        }
        if reply {
            if let Some(address) = self.inner.transport.callback_address() {
                envelope = envelope.with_callback(address);
            }
        }
        Ok(envelope)
    }

    /// Registers a slot for `message` and sends it.
    ///
    /// The send counts against `timeout`: a binding applying backpressure
    /// (a full worker pool, a slow broker) cannot hold the caller past the
    /// returned deadline.
    async fn start_call<M: BusMessage>(
        &self,
        message: &M,
        timeout: Duration,
        synchronous: bool,
    ) -> CallResult<(PendingCall, Instant)> {
        let deadline = deadline_after(timeout);
        let envelope = self.envelope(message, Some(timeout), true, synchronous)?;
        let pending = self.inner.registry.register(envelope.id().clone())?;
        debug!(
            id = %envelope.id(),
            type_key = %envelope.type_key(),
            transport = self.transport_name(),
            synchronous,
            "Publishing request"
        );
        // On failure `pending` is dropped here, which removes the slot.
        match tokio::time::timeout_at(deadline, self.inner.transport.send(envelope)).await {
            Ok(sent) => sent?,
            Err(_) => {
                warn!(id = %pending.id(), "Send did not complete before the deadline");
                return Err(CallError::timeout(pending.id().clone(), timeout));
            }
        }
        Ok((pending, deadline))
    }

    async fn call<M: BusMessage, R: DeserializeOwned>(
        &self,
        message: &M,
        timeout: Duration,
    ) -> CallResult<R> {
        let (pending, deadline) = self.start_call(message, timeout, true).await?;
        pending.wait_until(deadline, timeout).await?.decode()
    }

    async fn call_async<M: BusMessage, R: DeserializeOwned + Send + 'static>(
        &self,
        message: &M,
        timeout: Duration,
    ) -> CallResult<PendingResponse<R>> {
        let (call, deadline) = self.start_call(message, timeout, false).await?;
        Ok(PendingResponse {
            call,
            deadline,
            timeout,
            _marker: PhantomData,
        })
    }

    async fn fire<M: BusMessage>(
        &self,
        message: &M,
        timeout: Option<Duration>,
    ) -> CallResult<CorrelationId> {
        let envelope = self.envelope(message, timeout, false, false)?;
        let id = envelope.id().clone();
        debug!(
            id = %id,
            type_key = %envelope.type_key(),
            transport = self.transport_name(),
            "Publishing fire-and-forget"
        );
        self.inner.transport.send(envelope).await?;
        Ok(id)
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("transport", &self.transport_name())
            .field("default_timeout", &self.inner.default_timeout)
            .finish()
    }
}

// =============================================================================
// PendingResponse
// =============================================================================

/// A response that has been asked for but not yet awaited.
///
/// Awaiting it waits until the call's deadline, counted from when it was
/// published, and decodes the result. Dropping it abandons the call.
pub struct PendingResponse<R> {
    call: PendingCall,
    deadline: Instant,
    timeout: Duration,
    _marker: PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned + Send + 'static> PendingResponse<R> {
    /// Correlation id of the call.
    pub fn id(&self) -> &CorrelationId {
        self.call.id()
    }

    /// Waits for the response.
    pub async fn wait(self) -> CallResult<R> {
        self.call
            .wait_until(self.deadline, self.timeout)
            .await?
            .decode()
    }
}

impl<R: DeserializeOwned + Send + 'static> IntoFuture for PendingResponse<R> {
    type Output = CallResult<R>;
    type IntoFuture = BoxFuture<'static, CallResult<R>>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait().boxed()
    }
}

impl<R> std::fmt::Debug for PendingResponse<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("id", self.call.id())
            .field("timeout", &self.timeout)
            .finish()
    }
}

// =============================================================================
// Typed Buses
// =============================================================================

/// Sends commands.
#[derive(Debug, Clone)]
pub struct CommandBus {
    bus: Bus,
}

impl CommandBus {
    /// Sends `command` and waits up to the default timeout for its response.
    pub async fn publish_sync<C: Command>(&self, command: &C) -> CallResult<C::Response> {
        self.publish_sync_with_timeout(command, self.bus.default_timeout())
            .await
    }

    pub async fn publish_sync_with_timeout<C: Command>(
        &self,
        command: &C,
        timeout: Duration,
    ) -> CallResult<C::Response> {
        self.bus.call(command, timeout).await
    }

    /// Sends `command` and returns without waiting for the response.
    pub async fn publish_async<C: Command>(
        &self,
        command: &C,
    ) -> CallResult<PendingResponse<C::Response>> {
        self.bus
            .call_async(command, self.bus.default_timeout())
            .await
    }

    /// Fire-and-forget. The handler still observes the default timeout.
    pub async fn publish<C: Command>(&self, command: &C) -> CallResult<CorrelationId> {
        self.publish_with_timeout(command, self.bus.default_timeout())
            .await
    }

    pub async fn publish_with_timeout<C: Command>(
        &self,
        command: &C,
        timeout: Duration,
    ) -> CallResult<CorrelationId> {
        self.bus.fire(command, Some(timeout)).await
    }
}

/// Sends queries.
#[derive(Debug, Clone)]
pub struct QueryBus {
    bus: Bus,
}

impl QueryBus {
    /// Sends `query` and waits up to the default timeout for its result.
    pub async fn publish_sync<Q: Query>(&self, query: &Q) -> CallResult<Q::Response> {
        self.publish_sync_with_timeout(query, self.bus.default_timeout())
            .await
    }

    pub async fn publish_sync_with_timeout<Q: Query>(
        &self,
        query: &Q,
        timeout: Duration,
    ) -> CallResult<Q::Response> {
        self.bus.call(query, timeout).await
    }

    /// Sends `query` and returns without waiting for the result.
    pub async fn publish_async<Q: Query>(
        &self,
        query: &Q,
    ) -> CallResult<PendingResponse<Q::Response>> {
        self.bus.call_async(query, self.bus.default_timeout()).await
    }
}

/// Publishes events to every registered handler.
#[derive(Debug, Clone)]
pub struct EventBus {
    bus: Bus,
}

impl EventBus {
    /// Fire-and-forget with no deadline.
    pub async fn publish<E: Event>(&self, event: &E) -> CallResult<CorrelationId> {
        self.bus.fire(event, None).await
    }
}

/// Raises domain events inside this process.
///
/// Unlike [`EventBus`], which publishes through whatever binding the bus was
/// built with, a domain event always goes straight to the local dispatch
/// engine. Handlers are the engine's event handlers, and the engine's
/// idempotency cache still suppresses repeats of the same id.
#[derive(Debug, Clone)]
pub struct DomainEventBus {
    bus: Bus,
}

impl DomainEventBus {
    pub fn new(engine: DispatchEngine) -> Self {
        let registry = engine.registry().clone();
        let transport = Arc::new(InProcessTransport::new(engine));
        Self {
            bus: Bus::new(registry, transport, DEFAULT_TIMEOUT),
        }
    }

    /// Fire-and-forget fan-out to the local event handlers.
    pub async fn arise<E: Event>(&self, event: &E) -> CallResult<CorrelationId> {
        self.bus.fire(event, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{BrokerTransport, ChannelNames, InProcessTransport};
    use crate::broker::{QueueBroker, TopicBroker};
    use crate::listener::{BrokerListener, ListenerHandle};
    use crate::sink::LoopbackSink;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use splitr_core::{
        BoxedBroker, Broker, CallError, CallbackSink, MessageKind, ResponseEnvelope,
        TransportResult,
    };
    use splitr_framework::{BoxError, DispatchEngine, HandlerContext, HandlerTable};
    use splitr_macros::BusMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Serialize, Deserialize, BusMessage)]
    #[message(kind = "query", type_key = "orders.Order", response = "String")]
    struct Order {
        id: String,
    }

    #[derive(Serialize, Deserialize, BusMessage)]
    #[message(kind = "command", type_key = "orders.Cancel", response = "bool")]
    struct Cancel {
        id: String,
    }

    #[derive(Serialize, Deserialize, BusMessage)]
    #[message(kind = "query", type_key = "orders.Slow", response = "String")]
    struct Slow;

    #[derive(Serialize, Deserialize, BusMessage)]
    #[message(kind = "command", type_key = "orders.Unhandled")]
    struct Unhandled;

    #[derive(Serialize, Deserialize, BusMessage)]
    #[message(kind = "event", type_key = "orders.Shipped")]
    struct Shipped {
        id: String,
    }

    struct Counters {
        orders: Arc<AtomicUsize>,
        cancels: Arc<AtomicUsize>,
        shipped: Arc<AtomicUsize>,
    }

    fn table(counters: &Counters) -> HandlerTable {
        let orders = Arc::clone(&counters.orders);
        let cancels = Arc::clone(&counters.cancels);
        let shipped = Arc::clone(&counters.shipped);
        HandlerTable::builder()
            .query(move |q: Order| {
                let orders = Arc::clone(&orders);
                async move {
                    orders.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(format!("DATA-FOR-{}", q.id))
                }
            })
            .command(move |c: Cancel| {
                let cancels = Arc::clone(&cancels);
                async move {
                    cancels.fetch_add(1, Ordering::SeqCst);
                    if c.id.is_empty() {
                        return Err::<bool, BoxError>("empty order id".into());
                    }
                    Ok(true)
                }
            })
            .query(|_: Slow, ctx: HandlerContext| async move {
                ctx.cancelled().await;
                Ok::<_, BoxError>("too late".to_string())
            })
            .event(|_: Shipped| async { Err::<(), _>("mailer down") })
            .event(move |_: Shipped| {
                let shipped = Arc::clone(&shipped);
                async move {
                    shipped.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            })
            .build()
            .unwrap()
    }

    fn counters() -> Counters {
        Counters {
            orders: Arc::new(AtomicUsize::new(0)),
            cancels: Arc::new(AtomicUsize::new(0)),
            shipped: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn in_process(counters: &Counters) -> Bus {
        let registry = CorrelationRegistry::new();
        let engine = DispatchEngine::builder(table(counters))
            .registry(registry.clone())
            .build();
        Bus::new(
            registry,
            Arc::new(InProcessTransport::new(engine)),
            DEFAULT_TIMEOUT,
        )
    }

    /// A caller and a listener sharing one process over a broker.
    fn over_broker(
        counters: &Counters,
        broker: BoxedBroker,
        channels: ChannelNames,
    ) -> (Bus, Vec<ListenerHandle>) {
        let registry = CorrelationRegistry::new();
        let engine = DispatchEngine::builder(table(counters))
            .callback_sink(Arc::new(LoopbackSink::new(registry.clone())))
            .build();
        let listener = BrokerListener::new(engine);
        let handles = channels
            .all()
            .into_iter()
            .map(|channel| listener.listen(broker.subscribe(channel)))
            .collect();
        let transport = BrokerTransport::new(broker, channels, "loopback://local").unwrap();
        (Bus::new(registry, Arc::new(transport), DEFAULT_TIMEOUT), handles)
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while counter.load(Ordering::SeqCst) < expected {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_query_in_process() {
        let counters = counters();
        let bus = in_process(&counters);
        let result = bus
            .query_bus()
            .publish_sync(&Order { id: "100".into() })
            .await
            .unwrap();
        assert_eq!(result, "DATA-FOR-100");
        assert!(bus.registry().is_empty());
    }

    #[tokio::test]
    async fn test_query_over_queue_broker() {
        let counters = counters();
        let (bus, _listeners) =
            over_broker(&counters, Arc::new(QueueBroker::new()), ChannelNames::queue());
        let result = bus
            .query_bus()
            .publish_sync(&Order { id: "100".into() })
            .await
            .unwrap();
        assert_eq!(result, "DATA-FOR-100");
    }

    #[tokio::test]
    async fn test_command_async_over_topic_broker() {
        let counters = counters();
        let (bus, _listeners) =
            over_broker(&counters, Arc::new(TopicBroker::new()), ChannelNames::topic());
        let pending = bus
            .command_bus()
            .publish_async(&Cancel { id: "7".into() })
            .await
            .unwrap();
        assert!(!pending.id().as_str().is_empty());
        assert!(pending.await.unwrap());
    }

    #[tokio::test]
    async fn test_handler_failure_reaches_caller() {
        let counters = counters();
        let bus = in_process(&counters);
        let err = bus
            .command_bus()
            .publish_sync(&Cancel { id: String::new() })
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Handler { ref reason } if reason == "empty order id"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out() {
        let counters = counters();
        let bus = in_process(&counters);
        let err = bus
            .query_bus()
            .publish_sync_with_timeout(&Slow, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(bus.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_deadline_covers_a_full_pool() {
        let counters = counters();
        let registry = CorrelationRegistry::new();
        let engine = DispatchEngine::builder(table(&counters))
            .registry(registry.clone())
            .max_concurrency(1)
            .build();
        let bus = Bus::new(
            registry,
            Arc::new(InProcessTransport::new(engine.clone())),
            DEFAULT_TIMEOUT,
        );

        // Holds the only worker slot until its own 10s budget runs out.
        let blocker = bus.query_bus().publish_async(&Slow).await.unwrap();
        assert_eq!(engine.pool().in_flight(), 1);

        let started = tokio::time::Instant::now();
        let err = bus
            .query_bus()
            .publish_sync_with_timeout(&Order { id: "1".into() }, Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(matches!(err, CallError::Timeout { timeout_ms: 100, .. }));
        assert_eq!(counters.orders.load(Ordering::SeqCst), 0);
        assert_eq!(bus.registry().len(), 1);
        assert!(bus.registry().contains(blocker.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_deadline_counts_from_publish() {
        let counters = counters();
        let bus = in_process(&counters);

        let pending = bus.query_bus().publish_async(&Slow).await.unwrap();
        tokio::time::sleep(DEFAULT_TIMEOUT - Duration::from_millis(50)).await;

        let started = tokio::time::Instant::now();
        let err = pending.await.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_domain_events_stay_in_process() {
        let counters = counters();
        let registry = CorrelationRegistry::new();
        let engine = DispatchEngine::builder(table(&counters))
            .registry(registry.clone())
            .build();
        let broker = Arc::new(QueueBroker::new());
        let broker_bus = Bus::new(
            registry,
            Arc::new(
                BrokerTransport::new(broker.clone(), ChannelNames::queue(), "loopback://local")
                    .unwrap(),
            ),
            DEFAULT_TIMEOUT,
        );
        let domain = DomainEventBus::new(engine.clone());

        domain
            .arise(&Shipped { id: "7".into() })
            .await
            .unwrap();
        wait_for(&counters.shipped, 1).await;
        assert_eq!(engine.stats().received, 1);

        // Nobody listens on the broker, so its event goes nowhere.
        broker_bus
            .event_bus()
            .publish(&Shipped { id: "8".into() })
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(engine.stats().received, 1);
        assert_eq!(counters.shipped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_in_process_reports_missing_handler() {
        let counters = counters();
        let bus = in_process(&counters);
        let err = bus.command_bus().publish(&Unhandled).await.unwrap_err();
        assert!(matches!(err, CallError::NoHandler(ref key) if key == "orders.Unhandled"));
        assert!(bus.registry().is_empty());
    }

    #[tokio::test]
    async fn test_fire_and_forget_registers_nothing() {
        let counters = counters();
        let bus = in_process(&counters);
        bus.command_bus()
            .publish(&Cancel { id: "1".into() })
            .await
            .unwrap();
        assert!(bus.registry().is_empty());
        wait_for(&counters.cancels, 1).await;
    }

    #[tokio::test]
    async fn test_event_fanout_survives_failing_handler() {
        let counters = counters();
        let (bus, _listeners) =
            over_broker(&counters, Arc::new(TopicBroker::new()), ChannelNames::topic());
        bus.event_bus()
            .publish(&Shipped { id: "1".into() })
            .await
            .unwrap();
        wait_for(&counters.shipped, 1).await;
    }

    /// Forwards every delivered response to a channel.
    struct ForwardingSink(mpsc::UnboundedSender<(String, ResponseEnvelope)>);

    #[async_trait]
    impl CallbackSink for ForwardingSink {
        async fn deliver(&self, address: &str, response: &ResponseEnvelope) -> TransportResult<()> {
            let _ = self.0.send((address.to_string(), response.clone()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_redelivered_request_runs_once() {
        let counters = counters();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = DispatchEngine::builder(table(&counters))
            .callback_sink(Arc::new(ForwardingSink(tx)))
            .build();
        let broker = QueueBroker::new();
        let _listener = BrokerListener::new(engine).listen(broker.subscribe("splitr.query.queue"));

        let envelope = RequestEnvelope::for_message("abc".into(), &Order { id: "9".into() })
            .unwrap()
            .with_timeout(Duration::from_secs(5))
            .with_callback("http://caller/internal/query/callback");
        assert_eq!(envelope.kind(), MessageKind::Query);

        broker
            .send("splitr.query.queue", envelope.id(), envelope.clone())
            .await
            .unwrap();
        let first = rx.recv().await.unwrap();
        broker
            .send("splitr.query.queue", envelope.id(), envelope.clone())
            .await
            .unwrap();
        let second = rx.recv().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.1.clone().decode::<String>().unwrap(), "DATA-FOR-9");
        assert_eq!(counters.orders.load(Ordering::SeqCst), 1);
    }
}
