//! Message traits and explicit type tags.
//!
//! Every payload that travels over a bus declares its type tag and kind up
//! front. The tag is what the handler table is keyed on, so a receiving
//! process never needs to inspect a payload's Rust type at runtime.
//!
//! ```rust,ignore
//! use splitr_core::{BusMessage, Query};
//!
//! #[derive(Serialize, Deserialize, BusMessage)]
//! #[message(kind = "query", type_key = "orders.GetOrder", response = "String")]
//! pub struct GetOrder {
//!     pub id: String,
//! }
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::envelope::MessageKind;

/// A payload that can be carried in a [`RequestEnvelope`](crate::RequestEnvelope).
pub trait BusMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Type tag used to bind the payload to its handler(s).
    const TYPE_KEY: &'static str;

    /// Semantic family of the payload.
    const KIND: MessageKind;
}

/// A message with exactly one handler that answers with [`Command::Response`].
pub trait Command: BusMessage {
    /// The handler's result type.
    type Response: Serialize + DeserializeOwned + Send + 'static;
}

/// A read-only request with exactly one handler.
pub trait Query: BusMessage {
    /// The handler's result type.
    type Response: Serialize + DeserializeOwned + Send + 'static;
}

/// A notification fanned out to every handler registered for its type.
pub trait Event: BusMessage {}
