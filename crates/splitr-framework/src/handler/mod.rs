//! Handler system.
//!
//! - [`Handler`]: blanket-implemented for async functions taking the message
//!   (and optionally a [`HandlerContext`])
//! - [`HandlerService`]: the tower service wrapping one typed handler
//! - [`HandlerEntry`]: the erased form stored in the handler table

mod service;
mod traits;

pub use service::{BoxedHandler, HandlerCall, HandlerEntry, HandlerService};
pub use traits::{Handler, HandlerContext};
