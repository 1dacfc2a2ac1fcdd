//! Tower adaptation of typed handlers.
//!
//! [`HandlerService<M, H, T>`] wraps a single typed handler and implements
//! `tower::Service<HandlerCall>`: it decodes the JSON payload into `M`, runs
//! the handler and encodes the result back to JSON. Once wrapped, handlers of
//! every message type share one erased shape, [`BoxedHandler`], which is what
//! the handler table stores.

use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use splitr_core::BusMessage;
use tower::Service;
use tower::util::BoxCloneSyncService;

use super::traits::{Handler, HandlerContext};
use crate::error::{BoxError, PayloadError};

// ============================================================================
// HandlerCall
// ============================================================================

/// The request a handler service receives: raw payload plus context.
#[derive(Debug, Clone)]
pub struct HandlerCall {
    payload: Arc<str>,
    ctx: HandlerContext,
}

impl HandlerCall {
    pub fn new(payload: impl Into<Arc<str>>, ctx: HandlerContext) -> Self {
        Self {
            payload: payload.into(),
            ctx,
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }
}

// ============================================================================
// HandlerService
// ============================================================================

/// A tower [`Service`] that calls a single typed handler.
pub struct HandlerService<M, H, T> {
    handler: H,
    _marker: PhantomData<fn() -> (M, T)>,
}

impl<M, H, T> HandlerService<M, H, T> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<M, H: Clone, T> Clone for HandlerService<M, H, T> {
    fn clone(&self) -> Self {
        HandlerService {
            handler: self.handler.clone(),
            _marker: PhantomData,
        }
    }
}

impl<M, H, T> Service<HandlerCall> for HandlerService<M, H, T>
where
    M: BusMessage,
    H: Handler<M, T>,
    H::Output: Serialize,
    T: 'static,
{
    type Response = String;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<String, BoxError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: HandlerCall) -> Self::Future {
        let handler = self.handler.clone();
        async move {
            let message: M =
                serde_json::from_str(call.payload()).map_err(|e| PayloadError::Decode {
                    type_key: M::TYPE_KEY,
                    reason: e.to_string(),
                })?;
            let output = handler.call(message, call.ctx).await?;
            let encoded = serde_json::to_string(&output).map_err(|e| PayloadError::Encode {
                type_key: M::TYPE_KEY,
                reason: e.to_string(),
            })?;
            Ok(encoded)
        }
        .boxed()
    }
}

// ============================================================================
// Type erasure
// ============================================================================

/// A handler service with its message type erased.
pub type BoxedHandler = BoxCloneSyncService<HandlerCall, String, BoxError>;

/// A registered handler together with a printable name.
#[derive(Clone)]
pub struct HandlerEntry {
    name: &'static str,
    service: BoxedHandler,
}

impl HandlerEntry {
    /// Wraps a typed handler for message `M`.
    pub fn new<M, H, T>(handler: H) -> Self
    where
        M: BusMessage,
        H: Handler<M, T>,
        H::Output: Serialize,
        T: 'static,
    {
        Self {
            name: std::any::type_name::<H>(),
            service: BoxCloneSyncService::new(HandlerService::<M, H, T>::new(handler)),
        }
    }

    /// Type name of the wrapped handler, for logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A fresh handle to the handler service.
    pub fn service(&self) -> BoxedHandler {
        self.service.clone()
    }
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("name", &self.name)
            .finish()
    }
}
