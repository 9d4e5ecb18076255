//! Event bus abstraction: durable fan-out with per-consumer queues.
//!
//! One fan-out exchange, one durable queue per consumer role, empty routing
//! keys. Every published [`OrderEvent`] is delivered to every bound queue;
//! consumers filter by event type.
//!
//! # Delivery contract
//!
//! - **Publish** is best-effort from the producer's perspective: a failed
//!   publish surfaces as [`EventBusError::Publish`], which producers log and
//!   absorb. There is no transactional outbox; handlers are idempotent
//!   instead.
//! - **Consume** uses manual acknowledgement. The bus drives the policy:
//!   handler returns `Ok` → ack; handler returns an error → nack with
//!   requeue; the payload fails to deserialize → nack without requeue
//!   (dead-letter).
//! - Consumers are single-threaded per queue. Parallelism across orders
//!   comes from running multiple instances against the same queue.
//!
//! # Dyn compatibility
//!
//! Both traits return `Pin<Box<dyn Future>>` instead of using `async fn` so
//! they can be used as trait objects (`Arc<dyn EventBus>` is shared across
//! every worker and handler).

use crate::event::OrderEvent;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Name of the single fan-out exchange, unless overridden by configuration.
pub const DEFAULT_EXCHANGE: &str = "order_events_exchange";

/// The four durable queues bound to the exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Queue {
    /// Consumed by the payment worker.
    Payment,
    /// Consumed by the stock reservation worker.
    StockReservation,
    /// Consumed by the shipping worker.
    Shipping,
    /// Consumed by the status reducer.
    OrderStatus,
}

impl Queue {
    /// Every queue, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::Payment,
        Self::StockReservation,
        Self::Shipping,
        Self::OrderStatus,
    ];

    /// Broker-side queue name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Payment => "payment_queue",
            Self::StockReservation => "stock_reservation_queue",
            Self::Shipping => "shipping_queue",
            Self::OrderStatus => "order_status_queue",
        }
    }
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors surfaced by event bus implementations.
#[derive(Error, Debug)]
pub enum EventBusError {
    /// Could not reach or authenticate with the broker.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// The broker refused a publish, or the channel was closed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Could not start consuming from a queue.
    #[error("consume failed for queue '{queue}': {reason}")]
    Consume {
        /// The queue that failed.
        queue: &'static str,
        /// Broker-side reason.
        reason: String,
    },

    /// Declaring the exchange/queue topology failed.
    #[error("topology declaration failed: {0}")]
    Topology(String),

    /// Could not serialize an event for publishing.
    #[error("event serialization failed: {0}")]
    Serialization(String),
}

/// Error returned by an [`EventHandler`].
///
/// Any handler error causes the delivery to be nacked with requeue, so
/// handlers only return errors for conditions a redelivery can fix.
/// Validation, business and poison-message failures are absorbed inside the
/// handler (recorded as a failure state or logged and dropped) and reported
/// as `Ok` so the message is acked.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Transient infrastructure failure (connectivity, deadlock, timeout)
    /// worth redelivering.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Shutdown interrupted the delivery before it completed.
    #[error("delivery interrupted by shutdown")]
    Cancelled,
}

/// A consumer callback bound to one queue.
///
/// Handlers must be idempotent: at-least-once delivery means the same event
/// can arrive any number of times, in any interleaving with other queues.
pub trait EventHandler: Send + Sync {
    /// Process one delivery.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] only for failures a redelivery can fix; the
    /// bus then nacks with requeue.
    fn handle(
        &self,
        event: OrderEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>>;
}

/// Trait for event bus implementations.
///
/// Implementations must be `Send + Sync`; a single bus instance is shared by
/// every producer and consumer in the process.
pub trait EventBus: Send + Sync {
    /// Publish an event to the fan-out exchange.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Publish`] (or
    /// [`EventBusError::Serialization`]) when the event could not be put on
    /// the wire. Producers treat this as best-effort: log and continue.
    fn publish(
        &self,
        event: &OrderEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Run a manual-ack consume loop on `queue`, dispatching every delivery
    /// to `handler`, until `shutdown` is cancelled.
    ///
    /// The returned future is the loop itself; callers spawn it. A delivery
    /// in flight when `shutdown` fires is nacked with requeue so another
    /// instance can pick it up.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Consume`] when the loop cannot be
    /// (re-)established against the broker.
    fn consume(
        &self,
        queue: Queue,
        handler: Arc<dyn EventHandler>,
        shutdown: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_match_broker_topology() {
        assert_eq!(Queue::Payment.name(), "payment_queue");
        assert_eq!(Queue::StockReservation.name(), "stock_reservation_queue");
        assert_eq!(Queue::Shipping.name(), "shipping_queue");
        assert_eq!(Queue::OrderStatus.name(), "order_status_queue");
        assert_eq!(Queue::ALL.len(), 4);
    }
}
