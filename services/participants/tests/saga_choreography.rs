//! End-to-end saga runs: order service and participants on one in-memory broker.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use order_saga_core::broker::{Broker, OutboundRecord};
use order_saga_core::codec::EventCodec;
use order_saga_core::event::{EventPayload, EventType, NotificationType};
use order_saga_core::order::{OrderId, OrderStatus};
use order_saga_core::topics::TopicConfig;
use order_saga_runtime::{
    Dispatcher, EventConsumer, EventHandler, Publisher, PublisherConfig, RedeliveryPolicy,
};
use order_saga_testing::{InMemoryBroker, InMemoryOrderStore, fixtures, init_tracing, test_clock};
use order_service::{OrderService, handlers};
use saga_participants::inventory::{self, InventoryService};
use saga_participants::notification::{self, LoggingNotifier, NotificationService};
use saga_participants::payment::{self, LimitGateway, PaymentService};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Saga {
    broker: InMemoryBroker,
    orders: Arc<OrderService>,
    inventory: Arc<InventoryService>,
    shutdown: broadcast::Sender<()>,
    consumers: Vec<JoinHandle<()>>,
}

fn publisher(broker: &InMemoryBroker) -> Publisher {
    Publisher::new(
        Arc::new(broker.clone()),
        TopicConfig::default(),
        PublisherConfig::default(),
    )
}

fn policy() -> RedeliveryPolicy {
    RedeliveryPolicy::builder()
        .max_attempts(10)
        .initial_delay(Duration::from_millis(5))
        .max_delay(Duration::from_millis(20))
        .build()
}

fn consume(saga: &mut Saga, name: &str, dispatcher: Dispatcher, workers: usize) {
    let consumer = EventConsumer::new(
        name,
        dispatcher.topics(),
        Arc::new(saga.broker.clone()),
        Arc::new(dispatcher),
        saga.shutdown.subscribe(),
    )
    .with_retry_delay(Duration::from_millis(10))
    .with_workers(workers);
    saga.consumers.push(consumer.spawn());
}

fn participant(saga: &mut Saga, name: &str, handler: Arc<dyn EventHandler>, events: &[EventType]) {
    let mut dispatcher = Dispatcher::new(publisher(&saga.broker), policy());
    for event_type in events {
        dispatcher.register(*event_type, Arc::clone(&handler));
    }
    consume(saga, name, dispatcher, 4);
}

fn start_saga(stock: &[(&str, u32)], payment_limit: &str) -> Saga {
    init_tracing();
    let broker = InMemoryBroker::new();
    let clock = Arc::new(test_clock());

    let orders = Arc::new(OrderService::new(
        Arc::new(InMemoryOrderStore::new()),
        publisher(&broker),
        clock.clone(),
    ));
    let inventory = Arc::new(InventoryService::new(
        publisher(&broker),
        clock.clone(),
        stock.iter().map(|(p, n)| ((*p).to_string(), *n)),
    ));
    let payment = Arc::new(PaymentService::new(
        Arc::new(LimitGateway::new(fixtures::dec(payment_limit))),
        publisher(&broker),
        clock.clone(),
    ));
    let notification = Arc::new(NotificationService::new(
        Arc::new(LoggingNotifier),
        publisher(&broker),
        clock,
    ));

    let (shutdown, _) = broadcast::channel(1);
    let mut saga = Saga {
        broker,
        orders,
        inventory: Arc::clone(&inventory),
        shutdown,
        consumers: Vec::new(),
    };

    let mut dispatcher = Dispatcher::new(publisher(&saga.broker), policy());
    handlers::register(&mut dispatcher, &saga.orders);
    // One worker sees every order event in publish order across topics.
    consume(&mut saga, "order-service", dispatcher, 1);

    participant(&mut saga, "inventory", inventory, &inventory::EVENTS);
    participant(&mut saga, "payment", payment, &payment::EVENTS);
    participant(&mut saga, "notification", notification, &notification::EVENTS);
    saga
}

impl Saga {
    async fn wait_for_status(&self, order_id: &OrderId, status: OrderStatus) {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        loop {
            let current = self.orders.get_order_status(order_id).await.unwrap().status;
            if current == status {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "order {order_id} stuck in {current}, expected {status}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn notifications(&self, order_id: &OrderId, count: usize) -> Vec<NotificationType> {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        loop {
            let kinds: Vec<NotificationType> = self
                .broker
                .records_for_key("notification-sent", order_id.as_str())
                .iter()
                .filter_map(|r| match EventCodec::decode(&r.payload).unwrap().into_payload() {
                    EventPayload::NotificationSent(sent) => Some(sent.notification_type),
                    _ => None,
                })
                .collect();
            if kinds.len() >= count || tokio::time::Instant::now() >= deadline {
                return kinds;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        for consumer in self.consumers {
            tokio::time::timeout(TIMEOUT, consumer).await.unwrap().unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn happy_path_completes_the_order() {
    let saga = start_saga(&[("p1", 10), ("p2", 10)], "1000.00");

    let created = saga.orders.create_order(fixtures::sample_request()).await.unwrap();
    let order_id = created.order.order_id().clone();
    saga.wait_for_status(&order_id, OrderStatus::Completed).await;

    assert_eq!(saga.inventory.available("p1"), 8);
    assert_eq!(saga.inventory.available("p2"), 9);

    let payments = saga.broker.records_for_key("payment-processed", order_id.as_str());
    assert_eq!(payments.len(), 1);
    let payment = EventCodec::decode(&payments[0].payload).unwrap();
    assert_eq!(payment.correlation_id(), created.order.correlation_id());
    let EventPayload::PaymentProcessed(processed) = payment.payload() else {
        panic!("expected PAYMENT_PROCESSED");
    };
    assert_eq!(processed.amount.to_string(), "35.00");

    let kinds = saga.notifications(&order_id, 2).await;
    assert!(kinds.contains(&NotificationType::OrderConfirmation));
    assert!(kinds.contains(&NotificationType::PaymentConfirmation));

    saga.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn declined_payment_cancels_and_releases_stock() {
    let saga = start_saga(&[("p1", 10), ("p2", 10)], "20.00");

    let created = saga.orders.create_order(fixtures::sample_request()).await.unwrap();
    let order_id = created.order.order_id().clone();
    saga.wait_for_status(&order_id, OrderStatus::Cancelled).await;

    assert_eq!(saga.broker.records_for_key("payment-failed", order_id.as_str()).len(), 1);
    assert_eq!(saga.broker.records_for_key("order-cancelled", order_id.as_str()).len(), 1);

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while saga.inventory.reservation(&order_id).is_some() {
        assert!(tokio::time::Instant::now() < deadline, "reservation never released");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(saga.inventory.available("p1"), 10);
    assert_eq!(saga.inventory.available("p2"), 10);

    let kinds = saga.notifications(&order_id, 3).await;
    assert!(kinds.contains(&NotificationType::PaymentFailure));
    assert!(kinds.contains(&NotificationType::OrderCancellation));

    saga.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn insufficient_stock_cancels_without_charging() {
    let saga = start_saga(&[("p1", 1), ("p2", 10)], "1000.00");

    let created = saga.orders.create_order(fixtures::sample_request()).await.unwrap();
    let order_id = created.order.order_id().clone();
    saga.wait_for_status(&order_id, OrderStatus::Cancelled).await;

    let shortages = saga.broker.records_for_key("inventory-insufficient", order_id.as_str());
    assert_eq!(shortages.len(), 1);
    let EventPayload::InventoryInsufficient(shortage) =
        EventCodec::decode(&shortages[0].payload).unwrap().into_payload()
    else {
        panic!("expected INVENTORY_INSUFFICIENT");
    };
    assert_eq!(shortage.unavailable_items.get("p1"), Some(&2));
    assert!(!shortage.unavailable_items.contains_key("p2"));

    assert!(saga.broker.records("payment-processed").is_empty());
    assert_eq!(saga.inventory.available("p1"), 1);

    saga.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bogus_event_is_dead_lettered_and_saga_continues() {
    let saga = start_saga(&[("p1", 10), ("p2", 10)], "1000.00");

    let bogus = br#"{"eventId":"8c7b8e36-5d3c-4a4e-9d0e-0c2f8a6f7a11","correlationId":"c","eventType":"BOGUS","timestamp":"2024-03-01T12:30:45.123","orderId":"order-9"}"#;
    let outcome = saga
        .broker
        .publish(OutboundRecord::new("order-created", "order-9", bogus.to_vec()))
        .await;
    assert!(outcome.is_acked());

    // Inventory, payment and notification all consume order-created.
    let dead = saga
        .broker
        .wait_for_records("order-created-dlt", 3, TIMEOUT)
        .await;
    assert_eq!(dead.len(), 3);
    for record in &dead {
        assert_eq!(record.payload, bogus.to_vec());
        assert!(record.header("x-failure-reason").unwrap().contains("BOGUS"));
    }

    let created = saga.orders.create_order(fixtures::sample_request()).await.unwrap();
    saga.wait_for_status(created.order.order_id(), OrderStatus::Completed).await;

    saga.stop().await;
}
