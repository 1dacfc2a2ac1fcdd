//! In-memory brokers.
//!
//! Both brokers implement [`Broker`](splitr_core::Broker) and differ only in
//! how envelopes are shared between subscribers of a channel:
//!
//! | Broker | Subscribers of one channel | No subscriber yet |
//! |--------|----------------------------|-------------------|
//! | [`TopicBroker`] | every subscriber gets every envelope | envelope dropped |
//! | [`QueueBroker`] | subscribers compete, one gets each envelope | envelope buffered |

mod queue;
mod topic;

pub use queue::QueueBroker;
pub use topic::TopicBroker;

use futures::StreamExt;
use futures::stream::BoxStream;
use splitr_core::RequestEnvelope;
use tokio::sync::mpsc;

/// Turns an unbounded receiver into a boxed envelope stream.
fn receiver_stream(
    rx: mpsc::UnboundedReceiver<RequestEnvelope>,
) -> BoxStream<'static, RequestEnvelope> {
    futures::stream::unfold(rx, |mut rx| async move {
        let envelope = rx.recv().await?;
        Some((envelope, rx))
    })
    .boxed()
}
