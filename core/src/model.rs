//! Persisted domain rows.
//!
//! These types mirror the tables the pipeline reads and writes. Ids are
//! opaque uuid strings wrapped in newtypes; monetary amounts are
//! [`Decimal`] (stored as `NUMERIC`, serialized as JSON numbers).

use crate::status::OrderStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing id.
            #[must_use]
            pub const fn new(id: String) -> Self {
                Self(id)
            }

            /// Mint a fresh random id.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// The inner string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id! {
    /// Unique identifier of an order.
    OrderId
}
string_id! {
    /// Unique identifier of the user owning an order.
    UserId
}
string_id! {
    /// Unique identifier of a catalog product.
    ProductId
}
string_id! {
    /// Unique identifier of a stock reservation row.
    ReservationId
}

/// An order as persisted, with its items.
///
/// Created once by the order creator; only the status reducer mutates it
/// afterwards, and it is never deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Order id.
    #[serde(rename = "order_id")]
    pub id: OrderId,
    /// Owning user.
    pub user_id: UserId,
    /// Sum of `price * quantity` over the items, snapshotted at creation.
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    /// Canonical status, owned by the status reducer.
    pub status: OrderStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status mutation time.
    pub updated_at: DateTime<Utc>,
    /// Items, in submission order.
    pub items: Vec<OrderItem>,
}

/// One line of an order. Immutable after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Item row id.
    pub id: String,
    /// Parent order.
    pub order_id: OrderId,
    /// Ordered product.
    pub product_id: ProductId,
    /// Units ordered; always positive.
    pub quantity: i32,
    /// Unit price, snapshotted from the catalog at order time.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

/// A catalog product. The stock worker is the only writer of
/// `stock_quantity`, always under a row lock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Product id.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Current unit price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Units on hand. Never negative.
    pub stock_quantity: i32,
}

/// Lifecycle of a stock reservation row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Stock is earmarked for the order and counted by the readiness check.
    Reserved,
    /// The reservation expired and its quantity was returned to the catalog.
    Released,
    /// The order shipped; the earmarked stock left the building.
    Consumed,
}

impl ReservationStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reserved => "RESERVED",
            Self::Released => "RELEASED",
            Self::Consumed => "CONSUMED",
        }
    }

    /// Parse the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumValue`] for anything but the three states.
    pub fn parse(s: &str) -> Result<Self, UnknownEnumValue> {
        match s {
            "RESERVED" => Ok(Self::Reserved),
            "RELEASED" => Ok(Self::Released),
            "CONSUMED" => Ok(Self::Consumed),
            other => Err(UnknownEnumValue {
                column: "stock_reservations.status",
                value: other.to_string(),
            }),
        }
    }
}

/// A quantity of product earmarked for an order.
///
/// Invariant: at most one row per `(order_id, product_id)` is in
/// [`ReservationStatus::Reserved`] at a time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StockReservation {
    /// Reservation row id.
    pub id: ReservationId,
    /// Order the stock is held for.
    pub order_id: OrderId,
    /// Reserved product.
    pub product_id: ProductId,
    /// Units held.
    pub quantity: i32,
    /// Lifecycle state.
    pub status: ReservationStatus,
    /// When the hold was taken.
    pub created_at: DateTime<Utc>,
    /// When the hold stops counting toward readiness.
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a payment attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// The charge settled.
    Success,
    /// The charge was declined or errored.
    Failed,
}

impl PaymentStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumValue`] for anything but `SUCCESS` / `FAILED`.
    pub fn parse(s: &str) -> Result<Self, UnknownEnumValue> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(UnknownEnumValue {
                column: "payment_transactions.status",
                value: other.to_string(),
            }),
        }
    }
}

/// Append-only record of one payment outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    /// Row id.
    pub id: String,
    /// Order the charge was for.
    pub order_id: OrderId,
    /// Charged amount.
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// Outcome.
    pub status: PaymentStatus,
    /// External gateway transaction id.
    pub transaction_id: String,
    /// Method the gateway settled on.
    pub payment_method: String,
    /// Gateway outcome message.
    pub message: String,
    /// Record time.
    pub created_at: DateTime<Utc>,
}

/// Append-only record of one dispatched shipment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShippingInfo {
    /// Row id.
    pub id: String,
    /// Shipped order.
    pub order_id: OrderId,
    /// Carrier tracking number.
    pub tracking_number: String,
    /// Carrier name.
    pub carrier: String,
    /// Estimated delivery window in days.
    pub estimated_delivery_days: i32,
    /// Shipment state; currently always `SHIPPED` at insert.
    pub status: String,
    /// Dispatch time.
    pub created_at: DateTime<Utc>,
}

/// One row of the append-only status audit log.
///
/// Exactly one row is written per accepted status mutation when auditing is
/// enabled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    /// Row id.
    pub id: String,
    /// Audited order.
    pub order_id: OrderId,
    /// Status before the transition.
    pub old_status: OrderStatus,
    /// Status after the transition.
    pub new_status: OrderStatus,
    /// Event name that drove the transition.
    pub event_type: String,
    /// Metadata of the driving event, as JSON.
    pub metadata: serde_json::Value,
    /// Transition time.
    pub created_at: DateTime<Utc>,
}

/// A column held a value outside its expected vocabulary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unexpected value '{value}' in {column}")]
pub struct UnknownEnumValue {
    /// Qualified column name, for the log line.
    pub column: &'static str,
    /// The offending value.
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(OrderId::generate(), OrderId::generate());
    }

    #[test]
    fn ids_serialize_as_bare_strings() {
        let id = OrderId::new("order-1".to_string());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"order-1\"");
    }

    #[test]
    fn product_ids_order_lexicographically() {
        // Lock acquisition relies on a stable item ordering.
        let mut ids = vec![
            ProductId::new("p-9".to_string()),
            ProductId::new("p-1".to_string()),
            ProductId::new("p-5".to_string()),
        ];
        ids.sort();
        assert_eq!(ids[0].as_str(), "p-1");
        assert_eq!(ids[2].as_str(), "p-9");
    }

    #[test]
    fn reservation_status_roundtrips() {
        for status in [
            ReservationStatus::Reserved,
            ReservationStatus::Released,
            ReservationStatus::Consumed,
        ] {
            assert_eq!(ReservationStatus::parse(status.as_str()), Ok(status));
        }
        assert!(ReservationStatus::parse("PENDING").is_err());
    }

    #[test]
    fn payment_status_roundtrips() {
        assert_eq!(PaymentStatus::parse("SUCCESS"), Ok(PaymentStatus::Success));
        assert_eq!(PaymentStatus::parse("FAILED"), Ok(PaymentStatus::Failed));
        assert!(PaymentStatus::parse("success").is_err());
    }
}
