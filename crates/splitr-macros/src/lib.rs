//! Procedural macros for splitr.
//!
//! This crate provides:
//!
//! - `#[derive(BusMessage)]` - registers a payload's type tag and kind
//!
//! # BusMessage Derive Macro
//!
//! ```rust,ignore
//! use serde::{Deserialize, Serialize};
//! use splitr_macros::BusMessage;
//!
//! #[derive(Serialize, Deserialize, BusMessage)]
//! #[message(kind = "query", type_key = "orders.GetOrder", response = "String")]
//! pub struct GetOrder {
//!     pub id: String,
//! }
//!
//! #[derive(Serialize, Deserialize, BusMessage)]
//! #[message(kind = "event")]
//! pub struct OrderShipped {
//!     pub id: String,
//! }
//! ```

mod message;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Derives `BusMessage` plus the matching `Command`, `Query` or `Event` impl.
///
/// # Attributes
///
/// - `#[message(kind = "...")]` - `"command"`, `"query"` or `"event"` (required)
/// - `#[message(type_key = "...")]` - Override the type tag (default: module path + type name)
/// - `#[message(response = "...")]` - Response type for commands and queries (default: `()`)
/// - `#[message(crate = "...")]` - Path to the core crate (default: `::splitr_core`)
#[proc_macro_derive(BusMessage, attributes(message))]
pub fn derive_bus_message(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match message::derive_bus_message(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}
