//! Handler table: type tag → handler(s).
//!
//! The table is assembled once with [`HandlerTableBuilder`] and is read-only
//! afterwards, so lookups need no synchronization.
//!
//! | Kind | Handlers per type tag |
//! |------|-----------------------|
//! | Command | exactly one |
//! | Query | exactly one |
//! | Event | zero or more, all invoked |
//!
//! ```rust,ignore
//! let table = HandlerTable::builder()
//!     .query(get_order)
//!     .command(place_order)
//!     .event(send_email)
//!     .event(update_stats)
//!     .build()?;
//! ```

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use serde::Serialize;
use splitr_core::{BusMessage, Command, Event, MessageKind, Query};
use tracing::info;

use crate::error::{TableError, TableResult};
use crate::handler::{Handler, HandlerEntry};

/// Immutable routing map from type tag to handlers.
#[derive(Debug, Default)]
pub struct HandlerTable {
    routes: HashMap<String, Route>,
}

#[derive(Debug)]
struct Route {
    kind: MessageKind,
    handlers: Vec<HandlerEntry>,
}

impl HandlerTable {
    /// Starts building a table.
    pub fn builder() -> HandlerTableBuilder {
        HandlerTableBuilder::new()
    }

    /// Returns the single handler for a command or query type.
    pub fn handler(&self, type_key: &str) -> Option<&HandlerEntry> {
        self.routes
            .get(type_key)
            .filter(|r| r.kind != MessageKind::Event)
            .and_then(|r| r.handlers.first())
    }

    /// Returns every handler registered for an event type.
    pub fn handlers(&self, type_key: &str) -> &[HandlerEntry] {
        self.routes
            .get(type_key)
            .filter(|r| r.kind == MessageKind::Event)
            .map(|r| r.handlers.as_slice())
            .unwrap_or(&[])
    }

    /// Returns the kind a type tag was registered under.
    pub fn kind_of(&self, type_key: &str) -> Option<MessageKind> {
        self.routes.get(type_key).map(|r| r.kind)
    }

    /// Returns `true` if at least one handler exists for `type_key`.
    pub fn contains(&self, type_key: &str) -> bool {
        self.routes
            .get(type_key)
            .is_some_and(|r| !r.handlers.is_empty())
    }

    /// Returns `true` if any handler is registered for messages of `kind`.
    pub fn handles_kind(&self, kind: MessageKind) -> bool {
        self.routes
            .values()
            .any(|r| r.kind == kind && !r.handlers.is_empty())
    }

    /// Iterates over registered type tags.
    pub fn type_keys(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Total number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.routes.values().map(|r| r.handlers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Collects handler registrations and validates them into a [`HandlerTable`].
#[derive(Debug, Default)]
pub struct HandlerTableBuilder {
    registrations: Vec<(String, MessageKind, HandlerEntry)>,
}

impl HandlerTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for command `C`.
    pub fn command<C, H, T>(mut self, handler: H) -> Self
    where
        C: Command,
        H: Handler<C, T, Output = C::Response>,
        T: 'static,
    {
        self.push::<C, H, T>(handler);
        self
    }

    /// Registers the handler for query `Q`.
    pub fn query<Q, H, T>(mut self, handler: H) -> Self
    where
        Q: Query,
        H: Handler<Q, T, Output = Q::Response>,
        T: 'static,
    {
        self.push::<Q, H, T>(handler);
        self
    }

    /// Adds a handler for event `E`. May be called any number of times per type.
    pub fn event<E, H, T>(mut self, handler: H) -> Self
    where
        E: Event,
        H: Handler<E, T, Output = ()>,
        T: 'static,
    {
        self.push::<E, H, T>(handler);
        self
    }

    fn push<M, H, T>(&mut self, handler: H)
    where
        M: BusMessage,
        H: Handler<M, T>,
        H::Output: Serialize,
        T: 'static,
    {
        self.registrations.push((
            M::TYPE_KEY.to_string(),
            M::KIND,
            HandlerEntry::new::<M, H, T>(handler),
        ));
    }

    /// Validates the registrations and builds the table.
    ///
    /// # Errors
    ///
    /// - [`TableError::Ambiguous`] if a command or query has more than one handler
    /// - [`TableError::KindConflict`] if a type tag is used by two kinds
    pub fn build(self) -> TableResult<HandlerTable> {
        let mut routes: HashMap<String, Route> = HashMap::new();

        for (type_key, kind, entry) in self.registrations {
            match routes.entry(type_key) {
                Entry::Vacant(slot) => {
                    slot.insert(Route {
                        kind,
                        handlers: vec![entry],
                    });
                }
                Entry::Occupied(mut slot) => {
                    let first = slot.get().kind;
                    if first != kind {
                        return Err(TableError::KindConflict {
                            type_key: slot.key().clone(),
                            first,
                            second: kind,
                        });
                    }
                    slot.get_mut().handlers.push(entry);
                }
            }
        }

        for (type_key, route) in &routes {
            if route.kind != MessageKind::Event && route.handlers.len() > 1 {
                return Err(TableError::Ambiguous {
                    type_key: type_key.clone(),
                    kind: route.kind,
                    count: route.handlers.len(),
                });
            }
        }

        let table = HandlerTable { routes };
        let mut keys: Vec<&str> = table.type_keys().collect();
        keys.sort_unstable();
        info!(handlers = table.handler_count(), types = ?keys, "Handler table built");
        Ok(table)
    }
}
