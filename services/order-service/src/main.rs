//! Order service binary.
//!
//! Consumes the saga topics that concern orders from Redpanda and applies
//! them to the order store. Orders live in memory here; a REST layer and a
//! database are wired in front of [`OrderService`] by the deployment.

use anyhow::Context;
use order_saga_core::environment::SystemClock;
use order_saga_core::store::OrderStore;
use order_saga_redpanda::RedpandaBroker;
use order_saga_runtime::metrics::MetricsServer;
use order_saga_runtime::{Dispatcher, EventConsumer, Publisher, ServiceConfig};
use order_saga_testing::InMemoryOrderStore;
use order_service::{OrderService, handlers};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = ServiceConfig::from_env("order-service");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        brokers = %config.brokers,
        consumer_group = %config.consumer_group,
        workers = config.worker_count,
        "Starting order service"
    );

    let mut metrics = config.metrics_addr.map(MetricsServer::new);
    if let Some(server) = metrics.as_mut() {
        server.start().context("Failed to start metrics server")?;
    }

    let broker = Arc::new(
        RedpandaBroker::builder()
            .brokers(&config.brokers)
            .consumer_group(&config.consumer_group)
            .timeout(config.publisher.publish_timeout)
            .build()
            .context("Failed to create Redpanda broker")?,
    );
    let publisher = Publisher::new(broker.clone(), config.topics.clone(), config.publisher.clone());

    let store: Arc<dyn OrderStore> = Arc::new(InMemoryOrderStore::new());
    let service = Arc::new(OrderService::new(store, publisher.clone(), Arc::new(SystemClock)));

    let mut dispatcher = Dispatcher::new(publisher, config.redelivery.clone());
    handlers::register(&mut dispatcher, &service);

    let (shutdown_tx, _) = broadcast::channel(1);
    let consumer = EventConsumer::new(
        "order-service",
        dispatcher.topics(),
        broker,
        Arc::new(dispatcher),
        shutdown_tx.subscribe(),
    )
    .with_workers(config.worker_count);
    let handle = consumer.spawn();

    shutdown_signal().await;
    let _ = shutdown_tx.send(());
    handle.await.context("Consumer task failed")?;

    info!("Order service stopped");
    Ok(())
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
