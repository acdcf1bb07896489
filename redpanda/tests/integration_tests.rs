//! Integration tests for [`RedpandaBroker`] with a real Kafka instance.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Publish/subscribe round-trip of encoded envelopes, key and headers
//! - Per-key ordering
//! - Offset commits on ack (unacked messages are redelivered)
//!
//! # Running These Tests
//!
//! Marked `#[ignore]` because they need Docker and take a while to start:
//! ```bash
//! cargo test -p order-saga-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use futures::StreamExt;
use order_saga_core::broker::{Broker, OutboundRecord};
use order_saga_core::codec::EventCodec;
use order_saga_core::correlation::CorrelationId;
use order_saga_core::event::{EventEnvelope, EventPayload, OrderCancelled};
use order_saga_core::order::OrderId;
use order_saga_redpanda::RedpandaBroker;
use std::time::Duration;
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");
    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

fn broker(brokers: &str, group: &str) -> RedpandaBroker {
    RedpandaBroker::builder()
        .brokers(brokers)
        .consumer_group(group)
        .auto_offset_reset("earliest")
        .session_timeout(Duration::from_secs(6))
        .build()
        .expect("Failed to create broker")
}

/// Publishes until the topic is auto-created and the leader is known.
async fn ensure_topic_exists(broker: &RedpandaBroker, topic: &str) {
    for attempt in 1..=60 {
        let warmup = OutboundRecord::new(topic, "warmup", b"warmup".to_vec());
        if broker.publish(warmup).await.is_acked() {
            tokio::time::sleep(Duration::from_secs(2)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(attempt != 60, "Failed to create topic {topic}");
    }
}

fn cancelled(order: &str, reason: &str) -> EventEnvelope {
    EventEnvelope::new(
        CorrelationId::new("saga-it"),
        EventPayload::OrderCancelled(OrderCancelled {
            order_id: OrderId::new(order),
            reason: reason.to_string(),
        }),
        chrono::Utc::now(),
    )
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_round_trip_keeps_key_headers_and_order() {
    let (_kafka, brokers) = start_kafka().await;
    let broker = broker(&brokers, "round-trip");
    ensure_topic_exists(&broker, "order-cancelled").await;

    let events: Vec<EventEnvelope> = (0..5)
        .map(|i| cancelled("order-1", &format!("step-{i}")))
        .collect();
    for event in &events {
        let record = OutboundRecord::new(
            "order-cancelled",
            "order-1",
            EventCodec::encode(event).unwrap(),
        )
        .with_header("x-event-type", "ORDER_CANCELLED");
        assert!(broker.publish(record).await.is_acked());
    }

    let mut stream = broker.subscribe(&["order-cancelled"]).await.unwrap();
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(30), async {
        while received.len() < events.len() {
            let message = stream.next().await.unwrap().unwrap();
            message.ack().unwrap();
            if message.key.as_deref() == Some("warmup") {
                continue;
            }
            assert_eq!(message.header("x-event-type"), Some("ORDER_CANCELLED"));
            received.push(EventCodec::decode(&message.payload).unwrap());
        }
    })
    .await
    .expect("Timeout waiting for events");

    assert_eq!(received, events);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_unacked_messages_are_redelivered() {
    let (_kafka, brokers) = start_kafka().await;
    let publisher = broker(&brokers, "unused");
    ensure_topic_exists(&publisher, "order-cancelled").await;

    let event = cancelled("order-2", "customer request");
    let record = OutboundRecord::new("order-cancelled", "order-2", EventCodec::encode(&event).unwrap());
    assert!(publisher.publish(record).await.is_acked());

    let next_event = |broker: RedpandaBroker, ack: bool| async move {
        let mut stream = broker.subscribe(&["order-cancelled"]).await.unwrap();
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                let message = stream.next().await.unwrap().unwrap();
                if message.key.as_deref() == Some("warmup") {
                    message.ack().unwrap();
                    continue;
                }
                if ack {
                    message.ack().unwrap();
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                return EventCodec::decode(&message.payload).unwrap();
            }
        })
        .await
        .expect("Timeout waiting for event")
    };

    // First subscriber never acks; a second one in the same group sees it again.
    assert_eq!(next_event(broker(&brokers, "redelivery"), false).await, event);
    assert_eq!(next_event(broker(&brokers, "redelivery"), true).await, event);
}
