//! The orderbus pipeline actors.
//!
//! Five actors coordinate through the fan-out exchange and the database:
//!
//! - [`creator::OrderService`] accepts submissions, persists order + items
//!   and emits `OrderCreated`.
//! - [`payment::PaymentWorker`] charges (simulated) and emits
//!   `PaymentSuccessful` / `PaymentFailed`.
//! - [`stock::StockWorker`] runs the reservation engine and emits
//!   `StockReserved` / `StockInsufficient`.
//! - [`shipping::ShippingWorker`] dispatches once payment and stock both
//!   hold, emitting `OrderShipped`.
//! - [`status::StatusWorker`] owns `orders.status`, audits every accepted
//!   transition and synthesizes `OrderReadyForShipping`.
//!
//! [`sweeper::ReservationSweeper`] returns expired reservations to stock in
//! the background.
//!
//! No actor holds mutable in-process state; every rendezvous goes through
//! the database, so instances can be added or restarted freely.

pub mod creator;
pub mod payment;
pub mod shipping;
pub mod status;
pub mod stock;
pub mod sweeper;

use orderbus_core::event_bus::HandlerError;
use orderbus_postgres::StoreError;

/// Map a store failure to a redeliverable handler error.
pub(crate) fn transient(error: StoreError) -> HandlerError {
    HandlerError::Transient(error.to_string())
}
