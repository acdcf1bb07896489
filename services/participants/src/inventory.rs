//! Stock reservation for new orders.
//!
//! An order is reserved all-or-nothing: either every line fits in the
//! current stock and all of it is taken, or nothing is taken and
//! `INVENTORY_INSUFFICIENT` lists the lines that did not fit with their
//! requested quantities.
//!
//! A cancellation that arrives before its order's `ORDER_CREATED` is
//! remembered, and the late creation then takes no stock.

use crate::publish_follow_up;
use async_trait::async_trait;
use order_saga_core::environment::Clock;
use order_saga_core::event::{
    EventEnvelope, EventPayload, EventType, InventoryInsufficient, InventoryReserved, OrderCreated,
};
use order_saga_core::order::OrderId;
use order_saga_runtime::processed::DEFAULT_CAPACITY;
use order_saga_runtime::{BoundedMap, EventHandler, HandlerError, ProcessedEvents, Publisher};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Events the inventory service consumes.
pub const EVENTS: [EventType; 2] = [EventType::OrderCreated, EventType::OrderCancelled];

#[derive(Debug)]
struct Stock {
    available: HashMap<String, u32>,
    reservations: HashMap<OrderId, BTreeMap<String, u32>>,
    cancelled: BoundedMap<OrderId, ()>,
}

/// In-process stock keeper.
pub struct InventoryService {
    stock: Mutex<Stock>,
    publisher: Publisher,
    clock: Arc<dyn Clock>,
    processed: ProcessedEvents,
}

impl InventoryService {
    /// Creates the service with an initial stock per product id.
    #[must_use]
    pub fn new(
        publisher: Publisher,
        clock: Arc<dyn Clock>,
        stock: impl IntoIterator<Item = (String, u32)>,
    ) -> Self {
        Self {
            stock: Mutex::new(Stock {
                available: stock.into_iter().collect(),
                reservations: HashMap::new(),
                cancelled: BoundedMap::new(DEFAULT_CAPACITY),
            }),
            publisher,
            clock,
            processed: ProcessedEvents::default(),
        }
    }

    /// Units of `product_id` not reserved by any order.
    #[must_use]
    pub fn available(&self, product_id: &str) -> u32 {
        self.lock()
            .map(|stock| stock.available.get(product_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Units held for `order_id`, per product.
    #[must_use]
    pub fn reservation(&self, order_id: &OrderId) -> Option<BTreeMap<String, u32>> {
        self.lock()
            .ok()
            .and_then(|stock| stock.reservations.get(order_id).cloned())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Stock>, HandlerError> {
        self.stock
            .lock()
            .map_err(|_| HandlerError::Failed("inventory lock poisoned".to_string()))
    }

    /// Outcome for a new order; `None` when the order was already cancelled.
    fn reserve(&self, created: &OrderCreated) -> Result<Option<EventPayload>, HandlerError> {
        let mut stock = self.lock()?;

        if let Some(existing) = stock.reservations.get(&created.order_id) {
            return Ok(Some(EventPayload::InventoryReserved(InventoryReserved {
                order_id: created.order_id.clone(),
                reserved_items: existing.clone(),
            })));
        }

        if stock.cancelled.contains_key(&created.order_id) {
            tracing::info!(order_id = %created.order_id, "Order already cancelled, nothing reserved");
            return Ok(None);
        }

        // Summed in u64 so repeated lines of one product cannot wrap.
        let mut totals: BTreeMap<String, u64> = BTreeMap::new();
        for item in &created.items {
            *totals.entry(item.product_id.clone()).or_default() += u64::from(item.quantity);
        }

        let unavailable: BTreeMap<String, u32> = totals
            .iter()
            .filter(|(product, quantity)| {
                u64::from(stock.available.get(*product).copied().unwrap_or(0)) < **quantity
            })
            .map(|(product, quantity)| {
                (product.clone(), u32::try_from(*quantity).unwrap_or(u32::MAX))
            })
            .collect();

        if !unavailable.is_empty() {
            tracing::info!(
                order_id = %created.order_id,
                unavailable = ?unavailable,
                "Insufficient stock for order"
            );
            return Ok(Some(EventPayload::InventoryInsufficient(InventoryInsufficient {
                order_id: created.order_id.clone(),
                unavailable_items: unavailable,
                reason: "Insufficient stock".to_string(),
            })));
        }

        // Every total fits in the u32 stock it was checked against.
        let requested: BTreeMap<String, u32> = totals
            .into_iter()
            .map(|(product, quantity)| (product, u32::try_from(quantity).unwrap_or(u32::MAX)))
            .collect();

        for (product, quantity) in &requested {
            if let Some(units) = stock.available.get_mut(product) {
                *units -= quantity;
            }
        }
        stock
            .reservations
            .insert(created.order_id.clone(), requested.clone());
        tracing::info!(order_id = %created.order_id, reserved = ?requested, "Stock reserved");

        Ok(Some(EventPayload::InventoryReserved(InventoryReserved {
            order_id: created.order_id.clone(),
            reserved_items: requested,
        })))
    }

    fn release(&self, order_id: &OrderId) -> Result<(), HandlerError> {
        let mut stock = self.lock()?;
        stock.cancelled.insert(order_id.clone(), ());
        let Some(reserved) = stock.reservations.remove(order_id) else {
            tracing::debug!(order_id = %order_id, "Cancelled before any reservation");
            return Ok(());
        };
        for (product, quantity) in reserved {
            let units = stock.available.entry(product).or_default();
            *units = units.saturating_add(quantity);
        }
        tracing::info!(order_id = %order_id, "Reservation released");
        Ok(())
    }
}

#[async_trait]
impl EventHandler for InventoryService {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        if self.processed.contains(&envelope.event_id()) {
            tracing::debug!(event_id = %envelope.event_id(), "Duplicate event skipped");
            return Ok(());
        }

        match envelope.payload() {
            EventPayload::OrderCreated(created) => {
                if let Some(outcome) = self.reserve(created)? {
                    publish_follow_up(&self.publisher, self.clock.as_ref(), envelope, outcome)
                        .await?;
                }
            }
            EventPayload::OrderCancelled(cancelled) => self.release(&cancelled.order_id)?,
            _ => {}
        }

        self.processed.mark(envelope.event_id());
        Ok(())
    }
}
