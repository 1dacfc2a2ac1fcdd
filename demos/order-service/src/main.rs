//! Order Service Demo
//!
//! Runs one order workflow through splitr over the selected binding:
//!
//! ```text
//! gateway ──GetOrderData──▶ orders   "DATA-FOR-100"
//! gateway ──PlaceOrder────▶ orders   receipt (sync, then async)
//! gateway ──PlaceOrder(0)─▶ orders   handler failure
//! gateway ──ReserveStock──▶ orders   times out, handler is cancelled
//! gateway ──OrderPlaced───▶ orders   email + stats handlers
//! ```
//!
//! With a broker binding the gateway and the orders service are separate
//! runtimes sharing one in-memory broker. Responses travel back through a
//! loopback sink standing in for the HTTP callback leg.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package order-service -- --transport queue --order-id 42
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use splitr::core::BoxedBroker;
use splitr::framework::HandlerTableBuilder;
use splitr::prelude::*;
use splitr::runtime::config::LogLevel;
use splitr::transport::{LoopbackSink, QueueBroker, TopicBroker};
use tracing::{info, warn};

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Serialize, Deserialize, BusMessage)]
#[message(
    kind = "query",
    type_key = "orders.GetOrderData",
    response = "String",
    crate = "splitr::core"
)]
struct GetOrderData {
    order_id: String,
}

#[derive(Debug, Serialize, Deserialize, BusMessage)]
#[message(
    kind = "command",
    type_key = "orders.PlaceOrder",
    response = "OrderReceipt",
    crate = "splitr::core"
)]
struct PlaceOrder {
    order_id: String,
    quantity: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderReceipt {
    order_id: String,
    total_cents: u64,
}

#[derive(Debug, Serialize, Deserialize, BusMessage)]
#[message(
    kind = "command",
    type_key = "orders.ReserveStock",
    response = "bool",
    crate = "splitr::core"
)]
struct ReserveStock {
    order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, BusMessage)]
#[message(kind = "event", type_key = "orders.OrderPlaced", crate = "splitr::core")]
struct OrderPlaced {
    order_id: String,
}

// ============================================================================
// Handlers
// ============================================================================

const UNIT_PRICE_CENTS: u64 = 1_250;

async fn get_order_data(query: GetOrderData) -> Result<String, BoxError> {
    Ok(format!("DATA-FOR-{}", query.order_id))
}

async fn place_order(command: PlaceOrder) -> Result<OrderReceipt, BoxError> {
    if command.quantity == 0 {
        return Err("quantity must be positive".into());
    }
    Ok(OrderReceipt {
        total_cents: UNIT_PRICE_CENTS * u64::from(command.quantity),
        order_id: command.order_id,
    })
}

/// Simulates a slow warehouse call and stops as soon as the engine gives up.
async fn reserve_stock(command: ReserveStock, ctx: HandlerContext) -> Result<bool, BoxError> {
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(2)) => Ok(true),
        _ = ctx.cancelled() => {
            warn!(order_id = %command.order_id, "Reservation abandoned");
            Err("cancelled".into())
        }
    }
}

async fn send_email(event: OrderPlaced) -> Result<(), BoxError> {
    info!(order_id = %event.order_id, "Confirmation email queued");
    Ok(())
}

fn order_handlers(placed: Arc<AtomicUsize>) -> HandlerTableBuilder {
    HandlerTable::builder()
        .query(get_order_data)
        .command(place_order)
        .command(reserve_stock)
        .event(send_email)
        .event(move |event: OrderPlaced| {
            let placed = placed.clone();
            async move {
                let total = placed.fetch_add(1, Ordering::SeqCst) + 1;
                info!(order_id = %event.order_id, total, "Order statistics updated");
                Ok::<_, BoxError>(())
            }
        })
}

// ============================================================================
// Scenario
// ============================================================================

async fn run_scenario(gateway: &SplitrRuntime, order_id: &str) -> Result<()> {
    let data = gateway
        .query_bus()
        .publish_sync(&GetOrderData {
            order_id: order_id.to_string(),
        })
        .await?;
    info!(%data, "Order data");

    let receipt = gateway
        .command_bus()
        .publish_sync(&PlaceOrder {
            order_id: order_id.to_string(),
            quantity: 2,
        })
        .await?;
    info!(?receipt, "Order placed");

    let pending = gateway
        .command_bus()
        .publish_async(&PlaceOrder {
            order_id: format!("{order_id}-b"),
            quantity: 1,
        })
        .await?;
    info!(id = %pending.id(), "Second order sent, waiting later");
    let receipt = pending.await?;
    info!(?receipt, "Second order placed");

    match gateway
        .command_bus()
        .publish_sync(&PlaceOrder {
            order_id: format!("{order_id}-empty"),
            quantity: 0,
        })
        .await
    {
        Err(CallError::Handler { reason }) => info!(%reason, "Empty order rejected"),
        other => warn!(?other, "Expected a handler failure"),
    }

    match gateway
        .command_bus()
        .publish_sync_with_timeout(
            &ReserveStock {
                order_id: order_id.to_string(),
            },
            Duration::from_millis(200),
        )
        .await
    {
        Err(err) if err.is_timeout() => info!(%err, "Reservation timed out"),
        other => warn!(?other, "Expected a timeout"),
    }

    gateway
        .event_bus()
        .publish(&OrderPlaced {
            order_id: order_id.to_string(),
        })
        .await?;

    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Binding {
    InProcess,
    Topic,
    Queue,
}

impl From<Binding> for TransportKind {
    fn from(binding: Binding) -> Self {
        match binding {
            Binding::InProcess => TransportKind::InProcess,
            Binding::Topic => TransportKind::Topic,
            Binding::Queue => TransportKind::Queue,
        }
    }
}

/// Order workflow over splitr.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Binding carrying the envelopes.
    #[arg(long, value_enum, default_value_t = Binding::InProcess)]
    transport: Binding,

    #[arg(long, default_value = "100")]
    order_id: String,

    /// Log dispatch decisions.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = SplitrConfig::default();
    config.bus.transport = args.transport.into();
    if config.bus.transport.is_broker() {
        config.callback.url = Some("http://gateway.local:8080/internal/command/callback".into());
    }
    if args.verbose {
        config.logging.level = LogLevel::Debug;
    }

    let placed = Arc::new(AtomicUsize::new(0));

    let (gateway, orders) = match args.transport {
        Binding::InProcess => {
            let runtime = SplitrRuntime::builder()
                .merge(config)
                .handlers(order_handlers(placed.clone()))
                .build()?;
            (runtime, None)
        }
        Binding::Topic | Binding::Queue => {
            let broker: BoxedBroker = if args.transport == Binding::Queue {
                Arc::new(QueueBroker::new())
            } else {
                Arc::new(TopicBroker::new())
            };
            let gateway = SplitrRuntime::builder()
                .merge(config.clone())
                .broker(broker.clone())
                .build()?;
            let orders = SplitrRuntime::builder()
                .merge(config)
                .handlers(order_handlers(placed.clone()))
                .broker(broker)
                .callback_sink(Arc::new(LoopbackSink::new(gateway.registry().clone())))
                .build()?;
            (gateway, Some(orders))
        }
    };

    if let Some(orders) = &orders {
        orders.start().await?;
    }
    gateway.start().await?;

    let outcome = run_scenario(&gateway, &args.order_id).await;

    // Events are fire-and-forget; give the fan-out a moment to land.
    tokio::time::sleep(Duration::from_millis(100)).await;

    gateway.stop().await?;
    let service = orders.as_ref().unwrap_or(&gateway);
    if orders.is_some() {
        service.stop().await?;
    }

    let stats = service.engine_stats();
    info!(
        received = stats.received,
        completed = stats.completed,
        failed = stats.failed,
        timed_out = stats.timed_out,
        events_counted = placed.load(Ordering::SeqCst),
        "Order service finished"
    );

    outcome
}
