//! Saga participants binary.
//!
//! Runs the inventory, payment and notification services, each behind its own
//! dispatcher and consumer group so every one of them sees every event.
//!
//! Extra environment variables:
//! - `INVENTORY_STOCK`: initial stock, e.g. `p1=100,p2=25`
//! - `PAYMENT_LIMIT`: largest amount the payment gateway approves (default 10000)

use anyhow::Context;
use order_saga_core::environment::{Clock, SystemClock};
use order_saga_core::event::EventType;
use order_saga_redpanda::RedpandaBroker;
use order_saga_runtime::metrics::MetricsServer;
use order_saga_runtime::{Dispatcher, EventConsumer, EventHandler, Publisher, ServiceConfig};
use rust_decimal::Decimal;
use saga_participants::inventory::{self, InventoryService};
use saga_participants::notification::{self, LoggingNotifier, NotificationService};
use saga_participants::payment::{self, LimitGateway, PaymentService};
use std::env;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = ServiceConfig::from_env("saga-participants");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(brokers = %config.brokers, "Starting saga participants");

    let mut metrics = config.metrics_addr.map(MetricsServer::new);
    if let Some(server) = metrics.as_mut() {
        server.start().context("Failed to start metrics server")?;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stock = parse_stock(&env::var("INVENTORY_STOCK").unwrap_or_default());
    let limit = env::var("PAYMENT_LIMIT")
        .ok()
        .and_then(|s| s.parse::<Decimal>().ok())
        .unwrap_or_else(|| Decimal::new(10_000, 0));
    info!(products = stock.len(), payment_limit = %limit, "Participants configured");

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut handles = Vec::new();

    let broker = participant_broker(&config, "inventory")?;
    let publisher = participant_publisher(&config, &broker);
    let service = InventoryService::new(publisher.clone(), Arc::clone(&clock), stock);
    handles.push(start(&config, "inventory", broker, publisher, Arc::new(service), &inventory::EVENTS, &shutdown_tx));

    let broker = participant_broker(&config, "payment")?;
    let publisher = participant_publisher(&config, &broker);
    let service = PaymentService::new(Arc::new(LimitGateway::new(limit)), publisher.clone(), Arc::clone(&clock));
    handles.push(start(&config, "payment", broker, publisher, Arc::new(service), &payment::EVENTS, &shutdown_tx));

    let broker = participant_broker(&config, "notification")?;
    let publisher = participant_publisher(&config, &broker);
    let service = NotificationService::new(Arc::new(LoggingNotifier), publisher.clone(), Arc::clone(&clock));
    handles.push(start(&config, "notification", broker, publisher, Arc::new(service), &notification::EVENTS, &shutdown_tx));

    shutdown_signal().await;
    let _ = shutdown_tx.send(());
    for handle in handles {
        handle.await.context("Consumer task failed")?;
    }

    info!("Saga participants stopped");
    Ok(())
}

fn participant_broker(config: &ServiceConfig, name: &str) -> anyhow::Result<Arc<RedpandaBroker>> {
    let broker = RedpandaBroker::builder()
        .brokers(&config.brokers)
        .consumer_group(format!("{}-{name}", config.consumer_group))
        .timeout(config.publisher.publish_timeout)
        .build()
        .with_context(|| format!("Failed to create Redpanda broker for {name}"))?;
    Ok(Arc::new(broker))
}

fn participant_publisher(config: &ServiceConfig, broker: &Arc<RedpandaBroker>) -> Publisher {
    Publisher::new(broker.clone(), config.topics.clone(), config.publisher.clone())
}

fn start(
    config: &ServiceConfig,
    name: &str,
    broker: Arc<RedpandaBroker>,
    publisher: Publisher,
    handler: Arc<dyn EventHandler>,
    events: &[EventType],
    shutdown: &broadcast::Sender<()>,
) -> JoinHandle<()> {
    let mut dispatcher = Dispatcher::new(publisher, config.redelivery.clone());
    for event_type in events {
        dispatcher.register(*event_type, Arc::clone(&handler));
    }

    let consumer = EventConsumer::new(
        name,
        dispatcher.topics(),
        broker,
        Arc::new(dispatcher),
        shutdown.subscribe(),
    )
    .with_workers(config.worker_count);
    consumer.spawn()
}

/// Parses `product=units` pairs separated by commas; malformed pairs are skipped.
fn parse_stock(raw: &str) -> Vec<(String, u32)> {
    raw.split(',')
        .filter_map(|pair| {
            let (product, units) = pair.split_once('=')?;
            Some((product.trim().to_string(), units.trim().parse().ok()?))
        })
        .filter(|(product, _)| !product.is_empty())
        .collect()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_stock_skips_malformed_pairs() {
        assert_eq!(
            parse_stock("p1=10, p2 = 3,bad,p3=x,=4"),
            vec![("p1".to_string(), 10), ("p2".to_string(), 3)]
        );
        assert!(parse_stock("").is_empty());
    }
}
