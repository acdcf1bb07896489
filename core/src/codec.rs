//! JSON codec for [`EventEnvelope`].
//!
//! The wire shape is one flat JSON object with camelCase keys: the envelope
//! metadata (`eventId`, `correlationId`, `eventType`, `timestamp`) next to the
//! fields of the payload variant.
//!
//! ```json
//! {
//!   "eventId": "4b3f...",
//!   "correlationId": "9c1e...",
//!   "eventType": "ORDER_CANCELLED",
//!   "timestamp": "2024-03-01T12:30:45.123",
//!   "orderId": "order-1",
//!   "reason": "customer request"
//! }
//! ```
//!
//! Decoding fails closed: a missing or unrecognised `eventType` is
//! [`CodecError::UnknownVariant`], anything else that does not fit is
//! [`CodecError::MalformedPayload`]. Unknown extra keys are ignored.

use crate::correlation::CorrelationId;
use crate::event::{EventEnvelope, EventId, EventPayload, EventType};
use chrono::NaiveDateTime;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// Field carrying the discriminator.
pub const EVENT_TYPE_FIELD: &str = "eventType";

/// Errors produced by [`EventCodec`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The discriminator is absent, not a string, or not a known event type.
    #[error("Unknown event type: {0}")]
    UnknownVariant(String),

    /// Bytes are not a JSON object, or metadata/variant fields are missing or mistyped.
    #[error("Malformed event payload: {0}")]
    MalformedPayload(String),

    /// Serialization failed.
    #[error("Failed to encode event: {0}")]
    Encode(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireHeader<'a> {
    event_id: EventId,
    correlation_id: &'a CorrelationId,
    event_type: EventType,
    #[serde(with = "timestamp_format")]
    timestamp: NaiveDateTime,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMeta {
    event_id: EventId,
    correlation_id: CorrelationId,
    #[serde(with = "timestamp_format")]
    timestamp: NaiveDateTime,
}

/// Encoder/decoder for the saga wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventCodec;

impl EventCodec {
    /// Encodes an envelope as a flat JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    pub fn encode(envelope: &EventEnvelope) -> Result<Vec<u8>, CodecError> {
        let header = WireHeader {
            event_id: envelope.event_id(),
            correlation_id: envelope.correlation_id(),
            event_type: envelope.event_type(),
            timestamp: envelope.timestamp(),
        };

        let mut object = to_object(&header)?;
        let fields = match envelope.payload() {
            EventPayload::OrderCreated(e) => to_object(e)?,
            EventPayload::InventoryReserved(e) => to_object(e)?,
            EventPayload::InventoryInsufficient(e) => to_object(e)?,
            EventPayload::PaymentProcessed(e) => to_object(e)?,
            EventPayload::PaymentFailed(e) => to_object(e)?,
            EventPayload::OrderCancelled(e) => to_object(e)?,
            EventPayload::NotificationSent(e) => to_object(e)?,
        };
        object.extend(fields);

        serde_json::to_vec(&Value::Object(object)).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decodes bytes produced by [`encode`](Self::encode) or by any peer
    /// speaking the same wire contract.
    ///
    /// # Errors
    ///
    /// - [`CodecError::UnknownVariant`] if `eventType` is absent, not a string or unknown
    /// - [`CodecError::MalformedPayload`] if the bytes are not a JSON object or a
    ///   required field is missing or mistyped
    pub fn decode(bytes: &[u8]) -> Result<EventEnvelope, CodecError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| CodecError::MalformedPayload(e.to_string()))?;
        let Value::Object(object) = &value else {
            return Err(CodecError::MalformedPayload(
                "expected a JSON object".to_string(),
            ));
        };

        let event_type = Self::peek_event_type(object)?;
        let meta: WireMeta = parse(bytes)?;
        let payload = match event_type {
            EventType::OrderCreated => EventPayload::OrderCreated(parse(bytes)?),
            EventType::InventoryReserved => EventPayload::InventoryReserved(parse(bytes)?),
            EventType::InventoryInsufficient => EventPayload::InventoryInsufficient(parse(bytes)?),
            EventType::PaymentProcessed => EventPayload::PaymentProcessed(parse(bytes)?),
            EventType::PaymentFailed => EventPayload::PaymentFailed(parse(bytes)?),
            EventType::OrderCancelled => EventPayload::OrderCancelled(parse(bytes)?),
            EventType::NotificationSent => EventPayload::NotificationSent(parse(bytes)?),
        };

        Ok(EventEnvelope::from_parts(
            meta.event_id,
            meta.correlation_id,
            meta.timestamp,
            payload,
        ))
    }

    fn peek_event_type(object: &Map<String, Value>) -> Result<EventType, CodecError> {
        match object.get(EVENT_TYPE_FIELD) {
            Some(Value::String(name)) => EventType::parse(name)
                .ok_or_else(|| CodecError::UnknownVariant(name.clone())),
            Some(other) => Err(CodecError::UnknownVariant(other.to_string())),
            None => Err(CodecError::UnknownVariant(format!(
                "missing '{EVENT_TYPE_FIELD}'"
            ))),
        }
    }
}

fn to_object<T: Serialize>(value: &T) -> Result<Map<String, Value>, CodecError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CodecError::Encode(format!(
            "expected an object, serialized to {other}"
        ))),
        Err(e) => Err(CodecError::Encode(e.to_string())),
    }
}

// Only called once the input is known to be an object.
fn parse<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::MalformedPayload(e.to_string()))
}

/// `yyyy-MM-dd'T'HH:mm:ss.SSS`, no zone suffix.
mod timestamp_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const WRITE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";
    const READ_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(WRITE_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, READ_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{
        InventoryInsufficient, NotificationSent, NotificationType, OrderCancelled, OrderCreated,
        PaymentProcessed, PaymentStatus,
    };
    use crate::order::{CustomerId, OrderId, OrderItem};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn envelope(payload: EventPayload) -> EventEnvelope {
        EventEnvelope::new(CorrelationId::new("saga-1"), payload, Utc::now())
    }

    fn order_created(total: Decimal) -> EventPayload {
        EventPayload::OrderCreated(OrderCreated {
            order_id: OrderId::new("order-1"),
            customer_id: CustomerId::new("customer-1"),
            items: vec![OrderItem::new("p1", "Widget", 3, dec("10.50"))],
            total_amount: total,
        })
    }

    #[test]
    fn encodes_flat_camel_case_object() {
        let env = envelope(order_created(dec("31.50")));
        let bytes = EventCodec::encode(&env).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["eventType"], "ORDER_CREATED");
        assert_eq!(value["orderId"], "order-1");
        assert_eq!(value["customerId"], "customer-1");
        assert_eq!(value["correlationId"], "saga-1");
        assert_eq!(value["eventId"], env.event_id().to_string());
        assert_eq!(value["items"][0]["productId"], "p1");

        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"totalAmount\":31.50"), "{text}");
        assert!(text.contains("\"unitPrice\":10.50"), "{text}");
    }

    #[test]
    fn timestamp_has_millisecond_pattern() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap();
        let env = EventEnvelope::new(
            CorrelationId::new("c"),
            EventPayload::OrderCancelled(OrderCancelled {
                order_id: OrderId::new("o"),
                reason: "r".to_string(),
            }),
            now,
        );
        let value: Value = serde_json::from_slice(&EventCodec::encode(&env).unwrap()).unwrap();
        assert_eq!(value["timestamp"], "2024-03-01T12:30:45.000");
    }

    #[test]
    fn round_trip_keeps_decimal_scale() {
        let env = envelope(EventPayload::PaymentProcessed(PaymentProcessed {
            order_id: OrderId::new("order-1"),
            payment_id: "pay-1".to_string(),
            amount: dec("123.456789"),
            status: PaymentStatus::Completed,
        }));
        let decoded = EventCodec::decode(&EventCodec::encode(&env).unwrap()).unwrap();
        assert_eq!(decoded, env);
        let EventPayload::PaymentProcessed(p) = decoded.payload() else {
            panic!("wrong variant");
        };
        assert_eq!(p.amount.scale(), 6);
        assert_eq!(p.amount.to_string(), "123.456789");
    }

    #[test]
    fn round_trips_maps_and_enums() {
        let env = envelope(EventPayload::InventoryInsufficient(InventoryInsufficient {
            order_id: OrderId::new("order-1"),
            unavailable_items: BTreeMap::from([("p1".to_string(), 5), ("p2".to_string(), 1)]),
            reason: "Insufficient stock".to_string(),
        }));
        assert_eq!(
            EventCodec::decode(&EventCodec::encode(&env).unwrap()).unwrap(),
            env
        );

        let env = envelope(EventPayload::NotificationSent(NotificationSent {
            order_id: OrderId::new("order-1"),
            customer_id: CustomerId::new("c-1"),
            notification_type: NotificationType::OrderCancellation,
            message: "Your order was cancelled".to_string(),
            successful: true,
        }));
        let bytes = EventCodec::encode(&env).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["notificationType"], "ORDER_CANCELLATION");
        assert_eq!(EventCodec::decode(&bytes).unwrap(), env);
    }

    #[test]
    fn bogus_event_type_is_unknown_variant() {
        let raw = br#"{"eventId":"8c7b8e36-5d3c-4a4e-9d0e-0c2f8a6f7a11","correlationId":"c","eventType":"BOGUS","timestamp":"2024-03-01T12:30:45.123","orderId":"o"}"#;
        assert_eq!(
            EventCodec::decode(raw),
            Err(CodecError::UnknownVariant("BOGUS".to_string()))
        );
    }

    #[test]
    fn missing_or_non_string_event_type_is_unknown_variant() {
        let missing = br#"{"eventId":"8c7b8e36-5d3c-4a4e-9d0e-0c2f8a6f7a11","correlationId":"c","orderId":"o"}"#;
        assert!(matches!(
            EventCodec::decode(missing),
            Err(CodecError::UnknownVariant(_))
        ));

        let numeric = br#"{"eventType":7}"#;
        assert!(matches!(
            EventCodec::decode(numeric),
            Err(CodecError::UnknownVariant(_))
        ));
    }

    #[test]
    fn non_object_and_missing_fields_are_malformed() {
        assert!(matches!(
            EventCodec::decode(b"not json"),
            Err(CodecError::MalformedPayload(_))
        ));
        assert!(matches!(
            EventCodec::decode(b"[1,2,3]"),
            Err(CodecError::MalformedPayload(_))
        ));

        // ORDER_CANCELLED without a reason
        let raw = br#"{"eventId":"8c7b8e36-5d3c-4a4e-9d0e-0c2f8a6f7a11","correlationId":"c","eventType":"ORDER_CANCELLED","timestamp":"2024-03-01T12:30:45.123","orderId":"o"}"#;
        assert!(matches!(
            EventCodec::decode(raw),
            Err(CodecError::MalformedPayload(_))
        ));

        // bad eventId
        let raw = br#"{"eventId":"nope","correlationId":"c","eventType":"ORDER_CANCELLED","timestamp":"2024-03-01T12:30:45.123","orderId":"o","reason":"r"}"#;
        assert!(matches!(
            EventCodec::decode(raw),
            Err(CodecError::MalformedPayload(_))
        ));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw = br#"{"eventId":"8c7b8e36-5d3c-4a4e-9d0e-0c2f8a6f7a11","correlationId":"c","eventType":"ORDER_CANCELLED","timestamp":"2024-03-01T12:30:45.123","orderId":"o","reason":"r","schemaHint":"v2"}"#;
        let env = EventCodec::decode(raw).unwrap();
        assert_eq!(env.event_type(), EventType::OrderCancelled);
        assert_eq!(env.correlation_id().as_str(), "c");
        assert_eq!(env.order_id().as_str(), "o");
    }

    fn arb_amount() -> impl Strategy<Value = Decimal> {
        (any::<i64>(), 0u32..=12).prop_map(|(mantissa, scale)| Decimal::new(mantissa, scale))
    }

    proptest! {
        #[test]
        fn order_created_round_trips_with_scale(
            total in arb_amount(),
            price in arb_amount(),
            quantity in 1u32..1000,
            order in "[a-z0-9-]{1,36}",
        ) {
            let env = envelope(EventPayload::OrderCreated(OrderCreated {
                order_id: OrderId::new(order),
                customer_id: CustomerId::new("customer"),
                items: vec![OrderItem::new("p", "Product", quantity, price)],
                total_amount: total,
            }));
            let decoded = EventCodec::decode(&EventCodec::encode(&env).unwrap()).unwrap();
            prop_assert_eq!(&decoded, &env);

            let EventPayload::OrderCreated(created) = decoded.payload() else {
                return Err(TestCaseError::fail("wrong variant"));
            };
            prop_assert_eq!(created.total_amount.scale(), total.scale());
            prop_assert_eq!(created.items[0].unit_price.scale(), price.scale());
        }
    }
}
