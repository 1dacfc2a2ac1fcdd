//! Correlation registry: correlation id → single-resolution waitable slot.
//!
//! The registry is the rendezvous point between a caller that published a
//! request and whichever path eventually carries the response back (a direct
//! call from the in-process engine, or a callback endpoint).
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`register`](CorrelationRegistry::register) | stores a new slot, fails on a duplicate id |
//! | [`resolve`](CorrelationRegistry::resolve) | removes the slot and completes it; no-op for unknown ids |
//! | [`PendingCall::wait`] | suspends until resolution or timeout; on timeout the slot is removed |
//! | [`PendingCall::wait_until`] | same, against an absolute deadline shared with the send |
//!
//! All mutations happen under one lock, and a slot is completed while that
//! lock is held, so a resolution racing a timeout is observed by exactly one
//! side: either the waiter gets the response or the resolve finds no slot.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::envelope::{CorrelationId, ResponseEnvelope};
use crate::error::{CallError, CallResult, RegistryError};

type Slot = oneshot::Sender<ResponseEnvelope>;

/// Roughly 30 years, the cap tokio itself uses for "never".
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// The instant `timeout` from now, saturating for huge timeouts.
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

/// In-memory map of pending calls.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct CorrelationRegistry {
    pending: Arc<Mutex<HashMap<CorrelationId, Slot>>>,
}

impl CorrelationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a slot for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if `id` is already pending.
    pub fn register(&self, id: CorrelationId) -> Result<PendingCall, RegistryError> {
        let (tx, rx) = oneshot::channel();
        match self.pending.lock().entry(id.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::Duplicate(id)),
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        trace!(id = %id, "Registered pending call");
        Ok(PendingCall {
            id,
            rx,
            registry: self.clone(),
        })
    }

    /// Completes the pending call matching the response's id.
    ///
    /// Returns `true` if a waiting slot was completed. Late, duplicate and
    /// unknown responses are discarded and return `false`.
    pub fn resolve(&self, response: ResponseEnvelope) -> bool {
        let mut pending = self.pending.lock();
        match pending.remove(response.id()) {
            Some(slot) => {
                let id = response.id().clone();
                let delivered = slot.send(response).is_ok();
                trace!(id = %id, delivered, "Resolved pending call");
                delivered
            }
            None => {
                debug!(id = %response.id(), "Discarding response for unknown or settled call");
                false
            }
        }
    }

    /// Removes the slot for `id` without completing it.
    ///
    /// The waiter observes [`CallError::Closed`]. Returns `true` if a slot was removed.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    /// Returns `true` if a call with `id` is pending.
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.pending.lock().contains_key(id)
    }

    /// Returns the number of pending calls.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if no calls are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drops every pending slot. Waiters observe [`CallError::Closed`].
    ///
    /// Returns the number of slots dropped.
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        if count > 0 {
            debug!(count, "Clearing pending calls");
            pending.clear();
        }
        count
    }
}

impl std::fmt::Debug for CorrelationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

// =============================================================================
// Pending Call
// =============================================================================

/// A slot created by [`CorrelationRegistry::register`].
///
/// Exactly one of resolve, timeout or cancel terminates it. Dropping the
/// call without waiting cancels it.
pub struct PendingCall {
    id: CorrelationId,
    rx: oneshot::Receiver<ResponseEnvelope>,
    registry: CorrelationRegistry,
}

impl PendingCall {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Waits for the response, giving up after `timeout`.
    ///
    /// On timeout the slot is removed, so a later resolve is a no-op.
    pub async fn wait(self, timeout: Duration) -> CallResult<ResponseEnvelope> {
        self.wait_until(deadline_after(timeout), timeout).await
    }

    /// Waits for the response until `deadline`.
    ///
    /// `budget` is the whole time the caller granted the call, and is what a
    /// timeout error reports.
    pub async fn wait_until(
        mut self,
        deadline: Instant,
        budget: Duration,
    ) -> CallResult<ResponseEnvelope> {
        match tokio::time::timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(CallError::Closed(self.id.clone())),
            Err(_) => {
                if self.registry.cancel(&self.id) {
                    debug!(id = %self.id, "Pending call timed out");
                    return Err(CallError::timeout(self.id.clone(), budget));
                }
                // The slot was taken by a resolve that completed under the
                // registry lock, so the value is already in the channel.
                match self.rx.try_recv() {
                    Ok(response) => Ok(response),
                    Err(_) => Err(CallError::Closed(self.id.clone())),
                }
            }
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.registry.cancel(&self.id);
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall").field("id", &self.id).finish()
    }
}
