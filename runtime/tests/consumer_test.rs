//! Integration tests for the event consumer: ordering, resilience and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use order_saga_core::correlation::CorrelationId;
use order_saga_core::event::{EventPayload, EventType};
use order_saga_core::order::OrderId;
use order_saga_core::topics::TopicConfig;
use order_saga_runtime::{
    Dispatcher, EventConsumer, Publisher, PublisherConfig, RedeliveryPolicy,
};
use order_saga_testing::{InMemoryBroker, RecordingHandler, fixtures, init_tracing};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const TIMEOUT: Duration = Duration::from_secs(5);

fn consumer(
    broker: &InMemoryBroker,
    handler: Arc<RecordingHandler>,
    shutdown: &broadcast::Sender<()>,
) -> EventConsumer {
    let publisher = Publisher::new(
        Arc::new(broker.clone()),
        TopicConfig::default(),
        PublisherConfig::default(),
    );
    let policy = RedeliveryPolicy::builder()
        .max_attempts(3)
        .initial_delay(Duration::from_millis(1))
        .build();
    let mut dispatcher = Dispatcher::new(publisher, policy);
    dispatcher.register(EventType::OrderCancelled, handler);

    EventConsumer::new(
        "test-consumer",
        dispatcher.topics(),
        Arc::new(broker.clone()),
        Arc::new(dispatcher),
        shutdown.subscribe(),
    )
    .with_retry_delay(Duration::from_millis(10))
    .with_workers(4)
}

async fn publish_step(publisher: &Publisher, order: &str, step: usize) {
    let event = fixtures::envelope(
        &CorrelationId::new(format!("saga-{order}")),
        fixtures::order_cancelled(&OrderId::new(order), &format!("step-{step}")),
    );
    assert!(publisher.publish_event(&event).outcome().await.is_acked());
}

#[tokio::test]
async fn events_of_one_order_are_processed_in_order() {
    init_tracing();
    let broker = InMemoryBroker::new();
    let handler = Arc::new(RecordingHandler::new().with_delay(Duration::from_millis(1)));
    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = consumer(&broker, handler.clone(), &shutdown_tx).spawn();

    let publisher = Publisher::new(
        Arc::new(broker.clone()),
        TopicConfig::default(),
        PublisherConfig::default(),
    );
    let orders = ["order-a", "order-b", "order-c", "order-d", "order-e"];
    for step in 0..10 {
        for order in orders {
            publish_step(&publisher, order, step).await;
        }
    }

    let acked = broker.wait_for_acks(50, TIMEOUT).await;
    assert_eq!(acked.len(), 50);

    let mut steps: HashMap<String, Vec<String>> = HashMap::new();
    for envelope in handler.handled() {
        let EventPayload::OrderCancelled(cancelled) = envelope.payload() else {
            panic!("unexpected payload");
        };
        steps
            .entry(cancelled.order_id.to_string())
            .or_default()
            .push(cancelled.reason.clone());
    }
    for order in orders {
        let expected: Vec<String> = (0..10).map(|step| format!("step-{step}")).collect();
        assert_eq!(steps[order], expected, "{order}");
    }

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(TIMEOUT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn undecodable_message_does_not_stop_the_consumer() {
    let broker = InMemoryBroker::new();
    let handler = Arc::new(RecordingHandler::new());
    let (shutdown_tx, _) = broadcast::channel(1);

    let _ = order_saga_core::broker::Broker::publish(
        &broker,
        order_saga_core::broker::OutboundRecord::new("order-cancelled", "order-x", b"{}".to_vec()),
    )
    .await;
    let handle = consumer(&broker, handler.clone(), &shutdown_tx).spawn();

    let publisher = Publisher::new(
        Arc::new(broker.clone()),
        TopicConfig::default(),
        PublisherConfig::default(),
    );
    publish_step(&publisher, "order-x", 1).await;

    let acked = broker.wait_for_acks(2, TIMEOUT).await;
    assert_eq!(acked.len(), 2);
    assert_eq!(handler.handled().len(), 1);
    assert_eq!(broker.records("order-cancelled-dlt").len(), 1);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(TIMEOUT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_stops_an_idle_consumer() {
    let broker = InMemoryBroker::new();
    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = consumer(&broker, Arc::new(RecordingHandler::new()), &shutdown_tx).spawn();

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.send(()).unwrap();

    tokio::time::timeout(TIMEOUT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_lets_workers_finish_queued_messages() {
    let broker = InMemoryBroker::new();
    let handler = Arc::new(RecordingHandler::new().with_delay(Duration::from_millis(20)));
    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = consumer(&broker, handler.clone(), &shutdown_tx).spawn();

    let publisher = Publisher::new(
        Arc::new(broker.clone()),
        TopicConfig::default(),
        PublisherConfig::default(),
    );
    for step in 0..3 {
        publish_step(&publisher, "order-z", step).await;
    }
    broker
        .wait_for_acks(1, TIMEOUT)
        .await;

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(TIMEOUT, handle).await.unwrap().unwrap();

    let handled = handler.handled().len();
    assert_eq!(broker.acked().len(), handled);
    assert!(handled >= 1);
}
