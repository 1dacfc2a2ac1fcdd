//! Dispatch engine.
//!
//! The [`DispatchEngine`] takes an inbound [`RequestEnvelope`] through the
//! following steps:
//!
//! ```text
//! Received ─▶ deadline check ─┬─ Expired                      (drop)
//!                             ├─ cache hit ─▶ Replayed        (deliver cached response)
//!                             ├─ same id running ─▶ InFlight  (drop)
//!                             ├─ no handler ─▶ NoHandler      (drop)
//!                             └─ Executing ─┬─ Completed      (cache, deliver)
//!                                           ├─ TimedOut       (cancel, drop)
//!                                           └─ Failed         (deliver typed failure)
//! ```
//!
//! The cache is consulted again once the id is marked as executing, so for
//! one id at most one execution happens whose result was not cached yet.
//!
//! Events run every handler registered for their type, each in its own task,
//! so one failing handler never keeps the others from seeing the event.
//!
//! Responses go to the callback address embedded in the request when there
//! is one, or straight into the local [`CorrelationRegistry`] otherwise.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use splitr_core::{
    BoxedCallbackSink, Budget, CorrelationId, CorrelationRegistry, IdempotencyCache, MessageKind,
    RequestEnvelope, ResponseEnvelope,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{Instrument, Level, debug, error, span, warn};

use crate::error::PoolClosed;
use crate::handler::{HandlerCall, HandlerContext, HandlerEntry};
use crate::pool::WorkerPool;
use crate::table::HandlerTable;

// =============================================================================
// Outcome
// =============================================================================

/// How a single dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Deadline had passed on receipt; nothing ran.
    Expired,
    /// A cached response was delivered instead of running the handler.
    Replayed,
    /// The event id was already processed; nothing ran.
    Duplicate,
    /// The same id is being executed right now; this delivery was dropped.
    InFlight,
    /// No handler is registered for the type tag.
    NoHandler,
    /// The handler completed and its response was cached and delivered.
    Completed,
    /// The handler did not finish in time and was cancelled.
    TimedOut,
    /// The handler failed; a failure response was delivered.
    Failed,
    /// An event was fanned out to `invoked` handlers, `failed` of which failed.
    Fanout { invoked: usize, failed: usize },
}

enum Execution {
    Completed(String),
    TimedOut,
    Failed(String),
}

// =============================================================================
// Stats
// =============================================================================

/// Snapshot of engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Envelopes received.
    pub received: u64,
    /// Handler invocations started.
    pub invoked: u64,
    /// Handler invocations that completed.
    pub completed: u64,
    /// Cached responses replayed.
    pub replayed: u64,
    /// Envelopes dropped because their deadline had passed.
    pub expired: u64,
    /// Envelopes dropped for lack of a handler.
    pub no_handler: u64,
    /// Handler invocations cancelled at the deadline.
    pub timed_out: u64,
    /// Handler invocations that failed.
    pub failed: u64,
    /// Redeliveries dropped (processed events, or ids still executing).
    pub duplicates: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    invoked: AtomicU64,
    completed: AtomicU64,
    replayed: AtomicU64,
    expired: AtomicU64,
    no_handler: AtomicU64,
    timed_out: AtomicU64,
    failed: AtomicU64,
    duplicates: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            received: self.received.load(Ordering::Relaxed),
            invoked: self.invoked.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            no_handler: self.no_handler.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Resolves, executes and answers inbound requests.
///
/// Cloning is cheap; clones share the table, registry, cache, pool and stats.
#[derive(Clone)]
pub struct DispatchEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    table: Arc<HandlerTable>,
    registry: CorrelationRegistry,
    cache: IdempotencyCache,
    sink: Option<BoxedCallbackSink>,
    pool: WorkerPool,
    in_flight: Mutex<HashSet<CorrelationId>>,
    counters: Counters,
}

impl DispatchEngine {
    /// Starts building an engine around `table`.
    pub fn builder(table: impl Into<Arc<HandlerTable>>) -> EngineBuilder {
        EngineBuilder::new(table.into())
    }

    pub fn table(&self) -> &HandlerTable {
        &self.inner.table
    }

    pub fn registry(&self) -> &CorrelationRegistry {
        &self.inner.registry
    }

    pub fn cache(&self) -> &IdempotencyCache {
        &self.inner.cache
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Current counter values.
    pub fn stats(&self) -> EngineStats {
        self.inner.counters.snapshot()
    }

    /// Schedules `envelope` on the worker pool as its own unit of work.
    ///
    /// Waits for a free worker slot before returning.
    pub async fn submit(
        &self,
        envelope: RequestEnvelope,
    ) -> Result<JoinHandle<DispatchOutcome>, PoolClosed> {
        let engine = self.clone();
        self.inner
            .pool
            .spawn(async move { engine.dispatch(envelope).await })
            .await
    }

    /// Stops accepting submissions.
    pub fn close(&self) {
        self.inner.pool.close();
    }

    /// Runs `envelope` through the dispatch steps on the current task.
    pub async fn dispatch(&self, envelope: RequestEnvelope) -> DispatchOutcome {
        let span = span!(
            Level::DEBUG,
            "dispatch",
            id = %envelope.id(),
            type_key = %envelope.type_key(),
            kind = %envelope.kind(),
        );
        async move {
            let outcome = self.dispatch_inner(&envelope).await;
            debug!(outcome = ?outcome, "Dispatch finished");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn dispatch_inner(&self, envelope: &RequestEnvelope) -> DispatchOutcome {
        let inner = &self.inner;
        Counters::bump(&inner.counters.received);

        let budget = envelope.budget();
        if budget == Budget::Expired {
            debug!(
                sent_at_ms = envelope.sent_at_ms(),
                timeout_ms = envelope.timeout_ms(),
                "Request expired before dispatch"
            );
            Counters::bump(&inner.counters.expired);
            return DispatchOutcome::Expired;
        }

        if let Some(cached) = inner.cache.get(envelope.id()) {
            return self.replay(envelope, cached).await;
        }

        let Some(_guard) = InFlightGuard::acquire(&inner.in_flight, envelope.id()) else {
            debug!("Request with this id is already executing, dropping redelivery");
            Counters::bump(&inner.counters.duplicates);
            return DispatchOutcome::InFlight;
        };

        // An execution of the same id may have finished between the lookup
        // above and taking the guard.
        if let Some(cached) = inner.cache.get(envelope.id()) {
            return self.replay(envelope, cached).await;
        }

        match envelope.kind() {
            MessageKind::Event => self.fan_out(envelope, budget).await,
            MessageKind::Command | MessageKind::Query => self.run_single(envelope, budget).await,
        }
    }

    async fn replay(
        &self,
        envelope: &RequestEnvelope,
        cached: ResponseEnvelope,
    ) -> DispatchOutcome {
        let counters = &self.inner.counters;
        if envelope.kind() == MessageKind::Event {
            debug!("Event already processed, skipping");
            Counters::bump(&counters.duplicates);
            return DispatchOutcome::Duplicate;
        }
        debug!("Replaying cached response");
        Counters::bump(&counters.replayed);
        self.deliver(envelope, cached).await;
        DispatchOutcome::Replayed
    }

    async fn run_single(&self, envelope: &RequestEnvelope, budget: Budget) -> DispatchOutcome {
        let inner = &self.inner;
        let Some(entry) = inner.table.handler(envelope.type_key()) else {
            warn!("No handler registered, dropping request");
            Counters::bump(&inner.counters.no_handler);
            return DispatchOutcome::NoHandler;
        };

        match self.execute(entry, envelope, budget).await {
            Execution::Completed(result) => {
                let response = ResponseEnvelope::ok(envelope.id().clone(), result);
                inner.cache.put(envelope.id().clone(), response.clone());
                self.deliver(envelope, response).await;
                DispatchOutcome::Completed
            }
            Execution::TimedOut => DispatchOutcome::TimedOut,
            Execution::Failed(reason) => {
                let response = ResponseEnvelope::failed(envelope.id().clone(), reason);
                self.deliver(envelope, response).await;
                DispatchOutcome::Failed
            }
        }
    }

    async fn fan_out(&self, envelope: &RequestEnvelope, budget: Budget) -> DispatchOutcome {
        let inner = &self.inner;
        let handlers = inner.table.handlers(envelope.type_key());
        if handlers.is_empty() {
            warn!("No handler registered for event, dropping");
            Counters::bump(&inner.counters.no_handler);
            return DispatchOutcome::NoHandler;
        }

        let runs = handlers
            .iter()
            .map(|entry| self.execute(entry, envelope, budget));
        let results = futures::future::join_all(runs).await;
        let failed = results
            .iter()
            .filter(|r| !matches!(r, Execution::Completed(_)))
            .count();

        inner.cache.put(
            envelope.id().clone(),
            ResponseEnvelope::ok(envelope.id().clone(), "null"),
        );

        DispatchOutcome::Fanout {
            invoked: handlers.len(),
            failed,
        }
    }

    /// Runs one handler in its own task, bounded by the request's budget.
    async fn execute(
        &self,
        entry: &HandlerEntry,
        envelope: &RequestEnvelope,
        budget: Budget,
    ) -> Execution {
        let counters = &self.inner.counters;
        let deadline = match budget {
            Budget::Remaining(left) => Instant::now().checked_add(left),
            Budget::Unbounded | Budget::Expired => None,
        };
        let token = CancellationToken::new();
        let ctx = HandlerContext::new(envelope.id().clone(), deadline, token.clone());
        let call = HandlerCall::new(envelope.payload(), ctx);

        Counters::bump(&counters.invoked);
        let mut task = tokio::spawn(entry.service().oneshot(call));

        let joined = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    token.cancel();
                    task.abort();
                    warn!(handler = entry.name(), "Handler timed out, cancelled");
                    Counters::bump(&counters.timed_out);
                    return Execution::TimedOut;
                }
            },
            None => (&mut task).await,
        };

        match joined {
            Ok(Ok(result)) => {
                Counters::bump(&counters.completed);
                Execution::Completed(result)
            }
            Ok(Err(e)) => {
                error!(handler = entry.name(), error = %e, "Handler failed");
                Counters::bump(&counters.failed);
                Execution::Failed(e.to_string())
            }
            Err(e) => {
                let reason = if e.is_panic() {
                    "handler panicked".to_string()
                } else {
                    e.to_string()
                };
                error!(handler = entry.name(), error = %reason, "Handler task aborted");
                Counters::bump(&counters.failed);
                Execution::Failed(reason)
            }
        }
    }

    /// Sends `response` back along the path the request came from.
    async fn deliver(&self, envelope: &RequestEnvelope, response: ResponseEnvelope) {
        if envelope.kind() == MessageKind::Event {
            return;
        }
        match envelope.callback_address() {
            Some(address) => match &self.inner.sink {
                Some(sink) => {
                    if let Err(e) = sink.deliver(address, &response).await {
                        error!(address = %address, error = %e, "Failed to deliver response");
                    }
                }
                None => {
                    warn!(address = %address, "No callback sink configured, response dropped");
                }
            },
            None => {
                self.inner.registry.resolve(response);
            }
        }
    }
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("handlers", &self.inner.table.handler_count())
            .field("max_concurrency", &self.inner.pool.max_concurrency())
            .field("has_callback_sink", &self.inner.sink.is_some())
            .finish()
    }
}

/// Marks an id as executing for as long as it is alive.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<CorrelationId>>,
    id: CorrelationId,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<CorrelationId>>, id: &CorrelationId) -> Option<Self> {
        set.lock().insert(id.clone()).then(|| Self {
            set,
            id: id.clone(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`DispatchEngine`].
///
/// Registry and cache default to fresh instances; pass shared ones when the
/// same process also publishes.
pub struct EngineBuilder {
    table: Arc<HandlerTable>,
    registry: Option<CorrelationRegistry>,
    cache: Option<IdempotencyCache>,
    sink: Option<BoxedCallbackSink>,
    pool: Option<WorkerPool>,
}

impl EngineBuilder {
    fn new(table: Arc<HandlerTable>) -> Self {
        Self {
            table,
            registry: None,
            cache: None,
            sink: None,
            pool: None,
        }
    }

    pub fn registry(mut self, registry: CorrelationRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn cache(mut self, cache: IdempotencyCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sink used for requests that carry a callback address.
    pub fn callback_sink(mut self, sink: BoxedCallbackSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Shorthand for `pool(WorkerPool::new(max))`.
    pub fn max_concurrency(self, max: usize) -> Self {
        self.pool(WorkerPool::new(max))
    }

    pub fn build(self) -> DispatchEngine {
        DispatchEngine {
            inner: Arc::new(EngineInner {
                table: self.table,
                registry: self.registry.unwrap_or_default(),
                cache: self.cache.unwrap_or_default(),
                sink: self.sink,
                pool: self.pool.unwrap_or_default(),
                in_flight: Mutex::new(HashSet::new()),
                counters: Counters::default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use splitr_core::{CallbackSink, TransportResult, epoch_millis};
    use splitr_macros::BusMessage;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Serialize, Deserialize, BusMessage)]
    #[message(kind = "query", type_key = "orders.Get", response = "String")]
    struct GetOrder {
        id: String,
    }

    #[derive(Serialize, Deserialize, BusMessage)]
    #[message(kind = "command", type_key = "orders.Slow", response = "String")]
    struct Slow;

    #[derive(Serialize, Deserialize, BusMessage)]
    #[message(kind = "command", type_key = "orders.Fail")]
    struct Fail;

    #[derive(Serialize, Deserialize, BusMessage)]
    #[message(kind = "event", type_key = "orders.Shipped")]
    struct Shipped;

    /// Records every delivery instead of sending it anywhere.
    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<(String, ResponseEnvelope)>>,
    }

    #[async_trait]
    impl CallbackSink for RecordingSink {
        async fn deliver(&self, address: &str, response: &ResponseEnvelope) -> TransportResult<()> {
            self.delivered
                .lock()
                .push((address.to_string(), response.clone()));
            Ok(())
        }
    }

    fn counting_table(counter: Arc<AtomicUsize>) -> HandlerTable {
        HandlerTable::builder()
            .query(move |q: GetOrder| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(format!("DATA-FOR-{}", q.id))
                }
            })
            .command(|_: Slow, ctx: HandlerContext| async move {
                ctx.cancelled().await;
                Ok::<_, BoxError>("never".to_string())
            })
            .command(|_: Fail| async { Err::<(), _>("disk full") })
            .build()
            .unwrap()
    }

    fn request<M: splitr_core::BusMessage>(id: &str, msg: &M) -> RequestEnvelope {
        RequestEnvelope::for_message(id.into(), msg)
            .unwrap()
            .with_timeout_ms(5_000)
    }

    #[tokio::test]
    async fn test_completed_resolves_local_registry() {
        let counter = Arc::new(AtomicUsize::new(0));
        let engine = DispatchEngine::builder(counting_table(counter)).build();
        let call = engine.registry().register("q1".into()).unwrap();

        let env = request("q1", &GetOrder { id: "100".into() });
        assert_eq!(engine.dispatch(env).await, DispatchOutcome::Completed);

        let resp = call.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(resp.decode::<String>().unwrap(), "DATA-FOR-100");
        assert!(engine.cache().contains(&"q1".into()));
    }

    #[tokio::test]
    async fn test_redelivery_replays_cached_response() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(RecordingSink::default());
        let engine = DispatchEngine::builder(counting_table(Arc::clone(&counter)))
            .callback_sink(sink.clone())
            .build();

        let env = request("abc", &GetOrder { id: "7".into() }).with_callback("http://caller/cb");
        assert_eq!(engine.dispatch(env.clone()).await, DispatchOutcome::Completed);
        assert_eq!(engine.dispatch(env).await, DispatchOutcome::Replayed);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let delivered = sink.delivered.lock();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0], delivered[1]);
        assert_eq!(delivered[0].0, "http://caller/cb");
    }

    #[tokio::test]
    async fn test_overlapping_redelivery_runs_once() {
        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let table = {
            let (started, release, runs) = (started.clone(), release.clone(), runs.clone());
            HandlerTable::builder()
                .query(move |q: GetOrder| {
                    let (started, release, runs) = (started.clone(), release.clone(), runs.clone());
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        started.notify_one();
                        release.notified().await;
                        Ok::<_, BoxError>(format!("DATA-FOR-{}", q.id))
                    }
                })
                .build()
                .unwrap()
        };
        let sink = Arc::new(RecordingSink::default());
        let engine = DispatchEngine::builder(table)
            .callback_sink(sink.clone())
            .build();
        let env = request("dup", &GetOrder { id: "5".into() }).with_callback("http://caller/cb");

        let first = tokio::spawn({
            let engine = engine.clone();
            let env = env.clone();
            async move { engine.dispatch(env).await }
        });
        started.notified().await;

        assert_eq!(engine.dispatch(env.clone()).await, DispatchOutcome::InFlight);
        release.notify_one();
        assert_eq!(first.await.unwrap(), DispatchOutcome::Completed);
        assert_eq!(engine.dispatch(env).await, DispatchOutcome::Replayed);

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(sink.delivered.lock().len(), 2);
        assert_eq!(engine.stats().duplicates, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_redeliveries_never_run_twice() {
        let runs: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
        let table = {
            let runs = runs.clone();
            HandlerTable::builder()
                .query(move |q: GetOrder| {
                    let runs = runs.clone();
                    async move {
                        *runs.lock().entry(q.id.clone()).or_default() += 1;
                        Ok::<_, BoxError>(q.id)
                    }
                })
                .build()
                .unwrap()
        };
        let engine = DispatchEngine::builder(table)
            .callback_sink(Arc::new(RecordingSink::default()))
            .cache(IdempotencyCache::new(10_000))
            .build();

        let mut pairs = Vec::new();
        for i in 0..2_000 {
            let env = request(&format!("race-{i}"), &GetOrder { id: i.to_string() })
                .with_callback("http://caller/cb");
            let a = tokio::spawn({
                let (engine, env) = (engine.clone(), env.clone());
                async move { engine.dispatch(env).await }
            });
            let b = tokio::spawn({
                let engine = engine.clone();
                async move { engine.dispatch(env).await }
            });
            pairs.push((a, b));
        }

        for (a, b) in pairs {
            let mut outcomes = [a.await.unwrap(), b.await.unwrap()];
            outcomes.sort_by_key(|o| *o != DispatchOutcome::Completed);
            assert_eq!(outcomes[0], DispatchOutcome::Completed);
            assert!(matches!(
                outcomes[1],
                DispatchOutcome::InFlight | DispatchOutcome::Replayed
            ));
        }
        let runs = runs.lock();
        assert_eq!(runs.len(), 2_000);
        assert!(runs.values().all(|&count| count == 1));
    }

    #[tokio::test]
    async fn test_expired_request_is_dropped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(RecordingSink::default());
        let engine = DispatchEngine::builder(counting_table(Arc::clone(&counter)))
            .callback_sink(sink.clone())
            .build();

        let env = request("old", &GetOrder { id: "1".into() })
            .with_sent_at_ms(epoch_millis() - 10_000)
            .with_timeout_ms(1_000)
            .with_callback("http://caller/cb");
        assert_eq!(engine.dispatch(env).await, DispatchOutcome::Expired);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(sink.delivered.lock().is_empty());
        assert_eq!(engine.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_no_handler_is_dropped() {
        let engine = DispatchEngine::builder(HandlerTable::default()).build();
        let env = request("x", &GetOrder { id: "1".into() });
        assert_eq!(engine.dispatch(env).await, DispatchOutcome::NoHandler);
        assert_eq!(engine.stats().no_handler, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_and_delivers_nothing() {
        let counter = Arc::new(AtomicUsize::new(0));
        let engine = DispatchEngine::builder(counting_table(counter)).build();
        let call = engine.registry().register("s1".into()).unwrap();

        let env = request("s1", &Slow).with_timeout_ms(100);
        assert_eq!(engine.dispatch(env).await, DispatchOutcome::TimedOut);
        assert!(!engine.cache().contains(&"s1".into()));

        let err = call.wait(Duration::from_millis(50)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_failure_delivers_typed_response() {
        let counter = Arc::new(AtomicUsize::new(0));
        let engine = DispatchEngine::builder(counting_table(counter)).build();
        let call = engine.registry().register("f1".into()).unwrap();

        assert_eq!(
            engine.dispatch(request("f1", &Fail)).await,
            DispatchOutcome::Failed
        );
        let resp = call.wait(Duration::from_secs(1)).await.unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.to_string(), "handler failed: disk full");
        assert!(!engine.cache().contains(&"f1".into()));
    }

    #[tokio::test]
    async fn test_event_fanout_isolates_failures() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let table = HandlerTable::builder()
            .event(|_: Shipped| async { Err::<(), _>("mailer down") })
            .event(move |_: Shipped| {
                let seen = Arc::clone(&seen_clone);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            })
            .build()
            .unwrap();
        let engine = DispatchEngine::builder(table).build();

        let env = RequestEnvelope::for_message("e1".into(), &Shipped).unwrap();
        assert_eq!(
            engine.dispatch(env.clone()).await,
            DispatchOutcome::Fanout {
                invoked: 2,
                failed: 1
            }
        );
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        assert_eq!(engine.dispatch(env).await, DispatchOutcome::Duplicate);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_runs_on_pool() {
        let counter = Arc::new(AtomicUsize::new(0));
        let engine = DispatchEngine::builder(counting_table(Arc::clone(&counter)))
            .max_concurrency(4)
            .build();

        let handle = engine
            .submit(request("p1", &GetOrder { id: "2".into() }))
            .await
            .unwrap();
        assert_eq!(handle.await.unwrap(), DispatchOutcome::Completed);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        engine.close();
        assert!(
            engine
                .submit(request("p2", &GetOrder { id: "3".into() }))
                .await
                .is_err()
        );
    }

    #[test]
    fn test_stats_start_at_zero() {
        let engine = DispatchEngine::builder(HandlerTable::default()).build();
        assert_eq!(engine.stats(), EngineStats::default());
    }
}
