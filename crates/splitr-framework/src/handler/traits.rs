//! The [`Handler`] trait and the per-invocation [`HandlerContext`].
//!
//! Handlers are plain async functions or closures. Two shapes are accepted:
//!
//! ```rust,ignore
//! // Message only
//! async fn get_order(q: GetOrder) -> Result<String, BoxError> {
//!     Ok(format!("DATA-FOR-{}", q.id))
//! }
//!
//! // Message plus context, for cooperative cancellation
//! async fn slow(q: GetOrder, ctx: HandlerContext) -> Result<String, BoxError> {
//!     tokio::select! {
//!         _ = ctx.cancelled() => Err("cancelled".into()),
//!         v = expensive(q) => Ok(v),
//!     }
//! }
//! ```

use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;
use splitr_core::CorrelationId;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::BoxError;

// ============================================================================
// HandlerContext
// ============================================================================

/// Per-invocation information passed to a handler.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    id: CorrelationId,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl HandlerContext {
    /// Creates a context for one invocation.
    pub fn new(id: CorrelationId, deadline: Option<Instant>, cancellation: CancellationToken) -> Self {
        Self {
            id,
            deadline,
            cancellation,
        }
    }

    /// Correlation id of the request being handled.
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Instant after which the result is discarded. `None` for unbounded requests.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` once the engine has given up on this invocation.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Completes when the engine gives up on this invocation.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancellation.cancelled()
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// An async function handling messages of type `M`.
///
/// `T` is a marker distinguishing the accepted function shapes; it is
/// inferred and never written by hand.
pub trait Handler<M, T>: Clone + Send + Sync + 'static {
    /// The value produced on success.
    type Output: Send + 'static;

    /// Invokes the handler.
    fn call(&self, message: M, ctx: HandlerContext) -> BoxFuture<'static, Result<Self::Output, BoxError>>;
}

impl<F, Fut, M, R, E> Handler<M, ()> for F
where
    F: Fn(M) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Send + 'static,
    E: Into<BoxError>,
{
    type Output = R;

    fn call(&self, message: M, _ctx: HandlerContext) -> BoxFuture<'static, Result<R, BoxError>> {
        (self)(message).map(|res| res.map_err(Into::into)).boxed()
    }
}

impl<F, Fut, M, R, E> Handler<M, (HandlerContext,)> for F
where
    F: Fn(M, HandlerContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Send + 'static,
    E: Into<BoxError>,
{
    type Output = R;

    fn call(&self, message: M, ctx: HandlerContext) -> BoxFuture<'static, Result<R, BoxError>> {
        (self)(message, ctx).map(|res| res.map_err(Into::into)).boxed()
    }
}
