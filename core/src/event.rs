//! Wire events published to the fan-out exchange.
//!
//! Every event is a UTF-8 JSON [`OrderEvent`] envelope. `items` is present on
//! `OrderCreated`, `StockReserved` and `StockInsufficient` so downstream
//! consumers can act without re-fetching the order; `metadata` carries the
//! per-producer payloads ([`PaymentMetadata`], [`StockMetadata`],
//! [`ShippingMetadata`]).
//!
//! # Example
//!
//! ```
//! use orderbus_core::event::{EventType, OrderEvent};
//! use orderbus_core::model::{OrderId, UserId};
//! use orderbus_core::status::OrderStatus;
//! use chrono::Utc;
//! use rust_decimal::Decimal;
//!
//! let event = OrderEvent::new(
//!     EventType::OrderCreated,
//!     OrderId::new("order-1".to_string()),
//!     OrderStatus::Created,
//!     Utc::now(),
//! )
//! .with_user(UserId::new("user-1".to_string()))
//! .with_total(Decimal::new(5998, 2));
//!
//! let json = serde_json::to_string(&event).unwrap();
//! assert!(json.contains("\"event_type\":\"OrderCreated\""));
//! ```

use crate::model::{OrderId, OrderItem, ProductId, ReservationId, UserId};
use crate::status::OrderStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The nine event names the pipeline produces, plus a catch-all.
///
/// The catch-all exists so that an event with an unrecognized `event_type`
/// still deserializes: the consumer logs and acks it instead of
/// dead-lettering a structurally valid message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// The order creator persisted a new order.
    OrderCreated,
    /// The payment worker recorded a successful charge.
    PaymentSuccessful,
    /// The payment worker recorded a failed charge.
    PaymentFailed,
    /// The stock worker reserved every item of the order.
    StockReserved,
    /// The stock worker could not cover the order.
    StockInsufficient,
    /// The status reducer observed both readiness pre-conditions.
    OrderReadyForShipping,
    /// The shipping worker dispatched the order.
    OrderShipped,
    /// The order reached the customer.
    OrderDelivered,
    /// The order was cancelled.
    OrderCancelled,
    /// Any event name this build does not recognize.
    #[serde(other)]
    Unknown,
}

impl EventType {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderCreated => "OrderCreated",
            Self::PaymentSuccessful => "PaymentSuccessful",
            Self::PaymentFailed => "PaymentFailed",
            Self::StockReserved => "StockReserved",
            Self::StockInsufficient => "StockInsufficient",
            Self::OrderReadyForShipping => "OrderReadyForShipping",
            Self::OrderShipped => "OrderShipped",
            Self::OrderDelivered => "OrderDelivered",
            Self::OrderCancelled => "OrderCancelled",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The JSON envelope published to the exchange.
///
/// Field presence follows the producer: `items` on `OrderCreated` and the
/// stock events, `metadata` on payment/stock/shipping events. Absent fields
/// are omitted from the JSON rather than serialized as `null`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Which event this is.
    pub event_type: EventType,
    /// The order the event is about.
    pub order_id: OrderId,
    /// Owner of the order. Empty on synthesized events that do not carry it.
    #[serde(default)]
    pub user_id: UserId,
    /// Order total, echoed from the triggering event.
    #[serde(default, with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    /// Order items, for consumers that act per item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<OrderItem>>,
    /// The canonical status the event drives the order toward.
    pub status: OrderStatus,
    /// Producer-side wall-clock time, RFC 3339.
    pub timestamp: DateTime<Utc>,
    /// Producer-specific payload; see the typed metadata structs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl OrderEvent {
    /// Create a minimal envelope; use the `with_*` builders for the rest.
    #[must_use]
    pub fn new(
        event_type: EventType,
        order_id: OrderId,
        status: OrderStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type,
            order_id,
            user_id: UserId::default(),
            total_amount: Decimal::ZERO,
            items: None,
            status,
            timestamp,
            metadata: None,
        }
    }

    /// Attach the owning user.
    #[must_use]
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = user_id;
        self
    }

    /// Attach the order total.
    #[must_use]
    pub fn with_total(mut self, total_amount: Decimal) -> Self {
        self.total_amount = total_amount;
        self
    }

    /// Attach the order items.
    #[must_use]
    pub fn with_items(mut self, items: Vec<OrderItem>) -> Self {
        self.items = Some(items);
        self
    }

    /// Attach a metadata payload.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl fmt::Display for OrderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for order {}", self.event_type, self.order_id)
    }
}

/// Metadata carried by `PaymentSuccessful` / `PaymentFailed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    /// External gateway transaction id.
    pub transaction_id: String,
    /// Payment method the gateway settled on.
    pub payment_method: String,
    /// Human-readable gateway outcome.
    pub message: String,
}

/// One reserved line, echoed in [`StockMetadata`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedItem {
    /// Product that was reserved.
    pub product_id: ProductId,
    /// Units reserved.
    pub quantity: i32,
    /// The reservation row backing this line.
    pub reservation_id: ReservationId,
}

/// Metadata carried by `StockReserved` / `StockInsufficient`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMetadata {
    /// Outcome description; on failure, names the offending products.
    pub message: String,
    /// Reservations made, one per item. Empty on failure.
    #[serde(default)]
    pub reservations: Vec<ReservedItem>,
}

/// Metadata carried by `OrderShipped`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingMetadata {
    /// Carrier tracking number.
    pub tracking_number: String,
    /// Selected carrier.
    pub carrier: String,
    /// Estimated delivery window in days.
    pub estimated_days: i32,
    /// Human-readable dispatch summary.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_items() -> Vec<OrderItem> {
        vec![OrderItem {
            id: "item-1".to_string(),
            order_id: OrderId::new("order-1".to_string()),
            product_id: ProductId::new("prod-1".to_string()),
            quantity: 2,
            price: Decimal::new(2999, 2),
        }]
    }

    #[test]
    fn envelope_roundtrips_through_json() {
        let event = OrderEvent::new(
            EventType::OrderCreated,
            OrderId::new("order-1".to_string()),
            OrderStatus::Created,
            Utc::now(),
        )
        .with_user(UserId::new("user-1".to_string()))
        .with_total(Decimal::new(5998, 2))
        .with_items(sample_items());

        let json = serde_json::to_string(&event).unwrap();
        let back: OrderEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, EventType::OrderCreated);
        assert_eq!(back.order_id.as_str(), "order-1");
        assert_eq!(back.items.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn optional_fields_are_omitted_not_null() {
        let event = OrderEvent::new(
            EventType::OrderReadyForShipping,
            OrderId::new("order-1".to_string()),
            OrderStatus::ReadyForShipping,
            Utc::now(),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("\"items\""));
        assert!(!json.contains("\"metadata\""));
    }

    #[test]
    fn total_amount_serializes_as_a_json_number() {
        let event = OrderEvent::new(
            EventType::OrderCreated,
            OrderId::new("order-1".to_string()),
            OrderStatus::Created,
            Utc::now(),
        )
        .with_total(Decimal::new(125, 1));
        let value = serde_json::to_value(&event).unwrap();
        assert!(value["total_amount"].is_number());
    }

    #[test]
    fn unrecognized_event_type_deserializes_to_unknown() {
        let json = r#"{
            "event_type": "OrderArchived",
            "order_id": "order-1",
            "status": "CREATED",
            "timestamp": "2025-03-01T00:00:00Z"
        }"#;
        let event: OrderEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, EventType::Unknown);
    }

    #[test]
    fn payment_metadata_roundtrips_through_envelope() {
        let metadata = PaymentMetadata {
            transaction_id: "TXN_ab12cd34".to_string(),
            payment_method: "credit_card".to_string(),
            message: "Payment processed successfully".to_string(),
        };
        let event = OrderEvent::new(
            EventType::PaymentSuccessful,
            OrderId::new("order-1".to_string()),
            OrderStatus::PaymentSuccessful,
            Utc::now(),
        )
        .with_metadata(serde_json::to_value(&metadata).unwrap());

        let json = serde_json::to_string(&event).unwrap();
        let back: OrderEvent = serde_json::from_str(&json).unwrap();
        let parsed: PaymentMetadata = serde_json::from_value(back.metadata.unwrap()).unwrap();
        assert_eq!(parsed, metadata);
    }
}
