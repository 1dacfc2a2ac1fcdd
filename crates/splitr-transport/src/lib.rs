//! # Splitr Transport
//!
//! Transport bindings and the typed buses built on them.
//!
//! ## Features
//!
//! - `http-client`: webhook [`CallbackSink`](splitr_core::CallbackSink) on reqwest
//! - `http-server`: callback endpoint on axum
//! - `full`: both
//!
//! ## Architecture
//!
//! ```text
//!  caller                                        listener
//! ┌──────────────┐   envelope    ┌────────┐   ┌──────────────────┐
//! │ CommandBus   │──────────────▶│ Broker │──▶│ BrokerListener   │
//! │ QueryBus     │               └────────┘   │  └▶ DispatchEngine│
//! │ EventBus     │                            └────────┬─────────┘
//! │   │ register │       ResponseEnvelope (callback)   │
//! │   ▼          │◀────────────────────────────────────┘
//! │ Registry     │  CallbackServer / LoopbackSink
//! └──────────────┘
//! ```
//!
//! With [`InProcessTransport`] the broker and callback legs collapse into a
//! direct call into the engine, which resolves the caller's registry itself.
//!
//! ## Bindings
//!
//! | Binding | Channels | Needs callback address |
//! |---------|----------|------------------------|
//! | [`InProcessTransport`] | none | no |
//! | [`BrokerTransport`] + [`TopicBroker`] | `splitr.{kind}.topic` | yes |
//! | [`BrokerTransport`] + [`QueueBroker`] | `splitr.{kind}.queue` | yes |

pub mod binding;
pub mod broker;
pub mod bus;
pub mod listener;
pub mod sink;

#[cfg(any(feature = "http-client", feature = "http-server"))]
pub mod http;

pub use binding::{BoxedTransport, BrokerTransport, ChannelNames, InProcessTransport, Transport};
pub use broker::{QueueBroker, TopicBroker};
pub use bus::{
    Bus, CommandBus, DEFAULT_TIMEOUT, DomainEventBus, EventBus, PendingResponse, QueryBus,
};
pub use listener::{BrokerListener, ListenerHandle};
pub use sink::LoopbackSink;

#[cfg(feature = "http-client")]
pub use http::{DEFAULT_CALLBACK_TIMEOUT, HttpCallbackSink};

#[cfg(feature = "http-server")]
pub use http::{CallbackServer, DEFAULT_BASE_PATH};
