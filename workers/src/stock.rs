//! Stock worker: drive the reservation engine off `OrderCreated`.

use chrono::Duration as ChronoDuration;
use orderbus_core::environment::Clock;
use orderbus_core::event::{EventType, OrderEvent, StockMetadata};
use orderbus_core::event_bus::{EventBus, EventHandler, HandlerError};
use orderbus_core::model::{OrderId, OrderItem, ProductId};
use orderbus_core::status::OrderStatus;
use orderbus_postgres::{ReservationOutcome, StockStore, StoreError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Reservation engine tunables.
#[derive(Debug, Clone)]
pub struct StockConfig {
    /// Attempts per order before giving up.
    pub retry_attempts: u32,
    /// Base backoff; attempt `n` sleeps `n * retry_backoff`.
    pub retry_backoff: Duration,
    /// How long a reservation counts toward readiness.
    pub reservation_timeout: Duration,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            reservation_timeout: Duration::from_secs(15 * 60),
        }
    }
}

/// Consumes `OrderCreated` and emits `StockReserved` / `StockInsufficient`.
///
/// The reservation itself is all-or-nothing inside [`StockStore::reserve`];
/// this worker adds the bounded retry loop and the event emission. Both
/// outcome events echo the original `items` so downstream consumers can act
/// without re-fetching the order.
#[derive(Clone)]
pub struct StockWorker {
    stock: Arc<StockStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    config: StockConfig,
}

impl StockWorker {
    /// Assemble the worker.
    #[must_use]
    pub fn new(
        stock: Arc<StockStore>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        config: StockConfig,
    ) -> Self {
        Self {
            stock,
            bus,
            clock,
            config,
        }
    }

    async fn process(&self, event: OrderEvent) -> Result<(), HandlerError> {
        if event.event_type != EventType::OrderCreated {
            return Ok(());
        }
        let Some(items) = event.items.clone() else {
            tracing::warn!(order_id = %event.order_id, "OrderCreated without items, dropping");
            return Ok(());
        };

        tracing::info!(
            order_id = %event.order_id,
            lines = items.len(),
            "processing stock reservation"
        );

        let outcome = self.reserve_with_retry(&event.order_id, &items).await;

        let now = self.clock.now();
        let result_event = match outcome {
            Ok(ReservationOutcome::Reserved(reservations)) => {
                let metadata = StockMetadata {
                    message: "Stock reserved successfully".to_string(),
                    reservations,
                };
                build_outcome_event(&event, EventType::StockReserved, now, &metadata)?
            },
            Ok(ReservationOutcome::Insufficient { products }) => {
                let metadata = StockMetadata {
                    message: insufficient_message(&products),
                    reservations: Vec::new(),
                };
                build_outcome_event(&event, EventType::StockInsufficient, now, &metadata)?
            },
            Err(StoreError::ProductNotFound(product_id)) => {
                let metadata = StockMetadata {
                    message: format!("Product not found: {product_id}"),
                    reservations: Vec::new(),
                };
                build_outcome_event(&event, EventType::StockInsufficient, now, &metadata)?
            },
            Err(e) => {
                // Retries exhausted on an infrastructure failure; surface a
                // business-level refusal so the order does not hang forever.
                tracing::error!(
                    order_id = %event.order_id,
                    error = %e,
                    "stock reservation failed after retries"
                );
                let metadata = StockMetadata {
                    message: "Failed to commit stock reservation".to_string(),
                    reservations: Vec::new(),
                };
                build_outcome_event(&event, EventType::StockInsufficient, now, &metadata)?
            },
        };

        if let Err(e) = self.bus.publish(&result_event).await {
            tracing::error!(
                order_id = %event.order_id,
                event_type = %result_event.event_type,
                error = %e,
                "failed to publish stock outcome"
            );
        }
        Ok(())
    }

    /// Bounded retry: insufficiency and transient failures both earn another
    /// attempt (stock can reappear when a competing reservation expires);
    /// a missing product never will, so it exits immediately.
    async fn reserve_with_retry(
        &self,
        order_id: &OrderId,
        items: &[OrderItem],
    ) -> Result<ReservationOutcome, StoreError> {
        let attempts = self.config.retry_attempts.max(1);
        let mut last: Option<Result<ReservationOutcome, StoreError>> = None;

        for attempt in 1..=attempts {
            let now = self.clock.now();
            let ttl = ChronoDuration::from_std(self.config.reservation_timeout)
                .unwrap_or_else(|_| ChronoDuration::minutes(15));
            let result = self.stock.reserve(order_id, items, now, now + ttl).await;

            match result {
                Ok(ReservationOutcome::Reserved(reservations)) => {
                    return Ok(ReservationOutcome::Reserved(reservations));
                },
                Err(StoreError::ProductNotFound(id)) => {
                    return Err(StoreError::ProductNotFound(id));
                },
                other => {
                    if attempt < attempts {
                        tracing::warn!(
                            order_id = %order_id,
                            attempt,
                            "stock reservation attempt failed, retrying"
                        );
                        tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    }
                    last = Some(other);
                },
            }
        }

        last.unwrap_or_else(|| {
            Ok(ReservationOutcome::Insufficient {
                products: Vec::new(),
            })
        })
    }
}

impl EventHandler for StockWorker {
    fn handle(
        &self,
        event: OrderEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
        Box::pin(self.process(event))
    }
}

fn build_outcome_event(
    source: &OrderEvent,
    event_type: EventType,
    now: chrono::DateTime<chrono::Utc>,
    metadata: &StockMetadata,
) -> Result<OrderEvent, HandlerError> {
    let status = match event_type {
        EventType::StockReserved => OrderStatus::StockReserved,
        _ => OrderStatus::StockInsufficient,
    };
    let metadata =
        serde_json::to_value(metadata).map_err(|e| HandlerError::Transient(e.to_string()))?;
    Ok(
        OrderEvent::new(event_type, source.order_id.clone(), status, now)
            .with_user(source.user_id.clone())
            .with_total(source.total_amount)
            .with_items(source.items.clone().unwrap_or_default())
            .with_metadata(metadata),
    )
}

fn insufficient_message(products: &[ProductId]) -> String {
    let names: Vec<&str> = products.iter().map(ProductId::as_str).collect();
    format!("Insufficient stock for products: [{}]", names.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn insufficient_message_names_every_offending_product() {
        let products = vec![
            ProductId::new("p-1".to_string()),
            ProductId::new("p-7".to_string()),
        ];
        assert_eq!(
            insufficient_message(&products),
            "Insufficient stock for products: [p-1, p-7]"
        );
    }

    #[test]
    fn outcome_events_echo_the_order_items() {
        let source = OrderEvent::new(
            EventType::OrderCreated,
            OrderId::new("order-1".to_string()),
            OrderStatus::Created,
            Utc::now(),
        )
        .with_items(vec![OrderItem {
            id: "i-1".to_string(),
            order_id: OrderId::new("order-1".to_string()),
            product_id: ProductId::new("p-1".to_string()),
            quantity: 2,
            price: rust_decimal::Decimal::new(500, 2),
        }]);

        let metadata = StockMetadata {
            message: "Stock reserved successfully".to_string(),
            reservations: Vec::new(),
        };
        let event =
            build_outcome_event(&source, EventType::StockReserved, Utc::now(), &metadata).unwrap();

        assert_eq!(event.event_type, EventType::StockReserved);
        assert_eq!(event.status, OrderStatus::StockReserved);
        assert_eq!(event.items.as_ref().map(Vec::len), Some(1));
        assert!(event.metadata.is_some());
    }
}
