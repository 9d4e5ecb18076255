//! Shipping worker: dispatch once payment and stock both hold.

use orderbus_core::environment::Clock;
use orderbus_core::event::{EventType, OrderEvent, ShippingMetadata};
use orderbus_core::event_bus::{EventBus, EventHandler, HandlerError};
use orderbus_core::model::{OrderId, ShippingInfo};
use orderbus_core::status::OrderStatus;
use orderbus_postgres::{OrderStore, PaymentStore, ShippingStore, StockStore, StoreError};
use rand::Rng;
use rust_decimal::Decimal;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Carrier simulation tunables.
#[derive(Debug, Clone)]
pub struct ShippingConfig {
    /// Carriers to pick from.
    pub carriers: Vec<String>,
    /// Simulated label-printing latency.
    pub processing_delay: Duration,
    /// Orders above this total ship premium (1-2 days).
    pub premium_threshold: Decimal,
    /// Orders above this total ship standard (2-4 days); below is economy
    /// (3-7 days).
    pub standard_threshold: Decimal,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            carriers: [
                "DHL",
                "UPS",
                "FedEx",
                "Aras Kargo",
                "Yurtiçi Kargo",
                "PTT Kargo",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            processing_delay: Duration::from_secs(2),
            premium_threshold: Decimal::new(5000, 0),
            standard_threshold: Decimal::new(1000, 0),
        }
    }
}

/// A simulated dispatch.
#[derive(Debug, Clone)]
pub struct Shipment {
    /// Carrier tracking number.
    pub tracking_number: String,
    /// Selected carrier.
    pub carrier: String,
    /// Estimated delivery window in days.
    pub estimated_days: i32,
    /// Human-readable dispatch summary.
    pub message: String,
}

/// Consumes `PaymentSuccessful`, `StockReserved` and the synthesized
/// `OrderReadyForShipping`.
///
/// A trigger only dispatches once the reducer has promoted the order to
/// `READY_FOR_SHIPPING`; the branch events usually arrive too early and are
/// acked, and the readiness event re-triggers once the promotion is
/// committed. Emitting `OrderShipped` any earlier would hand the reducer a
/// transition it must reject. Dispatch itself is guarded by the unique
/// `shipping_info.order_id` index: when triggers race, only the first
/// insert lands and only that caller emits `OrderShipped`.
#[derive(Clone)]
pub struct ShippingWorker {
    orders: Arc<OrderStore>,
    payments: Arc<PaymentStore>,
    stock: Arc<StockStore>,
    shipping: Arc<ShippingStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    config: ShippingConfig,
}

impl ShippingWorker {
    /// Assemble the worker.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<OrderStore>,
        payments: Arc<PaymentStore>,
        stock: Arc<StockStore>,
        shipping: Arc<ShippingStore>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        config: ShippingConfig,
    ) -> Self {
        Self {
            orders,
            payments,
            stock,
            shipping,
            bus,
            clock,
            config,
        }
    }

    async fn process(&self, event: OrderEvent) -> Result<(), HandlerError> {
        match event.event_type {
            EventType::PaymentSuccessful
            | EventType::StockReserved
            | EventType::OrderReadyForShipping => self.check_and_dispatch(&event.order_id).await,
            _ => Ok(()),
        }
    }

    async fn check_and_dispatch(&self, order_id: &OrderId) -> Result<(), HandlerError> {
        let now = self.clock.now();

        let order = match self.orders.fetch(order_id).await {
            Ok(order) => order,
            Err(StoreError::OrderNotFound(_)) => {
                tracing::warn!(order_id = %order_id, "order not found, dropping event");
                return Ok(());
            },
            Err(e) => return Err(crate::transient(e)),
        };

        match order.status {
            OrderStatus::ReadyForShipping => {},
            OrderStatus::Shipped | OrderStatus::Delivered => {
                tracing::debug!(order_id = %order_id, "already dispatched");
                return Ok(());
            },
            status => {
                tracing::debug!(
                    order_id = %order_id,
                    status = %status,
                    "order not promoted yet, waiting for the readiness event"
                );
                return Ok(());
            },
        }

        let payment_ok = self
            .payments
            .has_successful(order_id)
            .await
            .map_err(crate::transient)?;
        let stock_ok = self
            .stock
            .has_active_reservation(order_id, now)
            .await
            .map_err(crate::transient)?;

        if !(payment_ok && stock_ok) {
            tracing::debug!(
                order_id = %order_id,
                payment_ok,
                stock_ok,
                "dispatch conditions not met, skipping"
            );
            return Ok(());
        }

        let shipment = self.simulate_dispatch(order.total_amount).await;
        let info = ShippingInfo {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.clone(),
            tracking_number: shipment.tracking_number.clone(),
            carrier: shipment.carrier.clone(),
            estimated_delivery_days: shipment.estimated_days,
            status: "SHIPPED".to_string(),
            created_at: now,
        };

        let inserted = self.shipping.record(&info).await.map_err(crate::transient)?;
        if !inserted {
            tracing::debug!(order_id = %order_id, "shipment already recorded, skipping");
            return Ok(());
        }

        // The earmarked stock leaves the warehouse with the parcel; from
        // here the sweeper must never return it.
        if let Err(e) = self.stock.consume_reservations(order_id).await {
            tracing::error!(order_id = %order_id, error = %e, "failed to consume reservations");
        }

        let metadata = ShippingMetadata {
            tracking_number: shipment.tracking_number,
            carrier: shipment.carrier,
            estimated_days: shipment.estimated_days,
            message: shipment.message,
        };
        let metadata = serde_json::to_value(&metadata)
            .map_err(|e| HandlerError::Transient(e.to_string()))?;
        let shipped = OrderEvent::new(
            EventType::OrderShipped,
            order_id.clone(),
            OrderStatus::Shipped,
            now,
        )
        .with_user(order.user_id)
        .with_total(order.total_amount)
        .with_metadata(metadata);

        tracing::info!(order_id = %order_id, "order dispatched");
        if let Err(e) = self.bus.publish(&shipped).await {
            tracing::error!(order_id = %order_id, error = %e, "failed to publish OrderShipped");
        }
        Ok(())
    }

    async fn simulate_dispatch(&self, total_amount: Decimal) -> Shipment {
        tokio::time::sleep(self.config.processing_delay).await;

        let (carrier, estimated_days) = {
            let mut rng = rand::thread_rng();
            let carrier = self
                .config
                .carriers
                .get(rng.gen_range(0..self.config.carriers.len().max(1)))
                .cloned()
                .unwrap_or_else(|| "UPS".to_string());
            let estimated_days = estimate_days(
                total_amount,
                self.config.premium_threshold,
                self.config.standard_threshold,
                &mut rng,
            );
            (carrier, estimated_days)
        };

        let tracking_number = format!("{}_{}", carrier, &Uuid::new_v4().simple().to_string()[..8]);
        let message = format!(
            "Package shipped via {carrier}, estimated delivery in {estimated_days} days"
        );

        tracing::debug!(
            %total_amount,
            carrier = %carrier,
            tracking = %tracking_number,
            estimated_days,
            "shipment simulated"
        );

        Shipment {
            tracking_number,
            carrier,
            estimated_days,
            message,
        }
    }
}

impl EventHandler for ShippingWorker {
    fn handle(
        &self,
        event: OrderEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
        Box::pin(self.process(event))
    }
}

/// Delivery estimate tiered by order value: premium 1-2 days, standard 2-4,
/// economy 3-7.
fn estimate_days<R: Rng>(
    total_amount: Decimal,
    premium_threshold: Decimal,
    standard_threshold: Decimal,
    rng: &mut R,
) -> i32 {
    if total_amount > premium_threshold {
        rng.gen_range(1..=2)
    } else if total_amount > standard_threshold {
        rng.gen_range(2..=4)
    } else {
        rng.gen_range(3..=7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn estimates_respect_the_value_tiers() {
        let premium = Decimal::new(5000, 0);
        let standard = Decimal::new(1000, 0);
        let mut rng = rand::thread_rng();

        for _ in 0..32 {
            let days = estimate_days(Decimal::new(9000, 0), premium, standard, &mut rng);
            assert!((1..=2).contains(&days), "premium out of range: {days}");

            let days = estimate_days(Decimal::new(2500, 0), premium, standard, &mut rng);
            assert!((2..=4).contains(&days), "standard out of range: {days}");

            let days = estimate_days(Decimal::new(100, 0), premium, standard, &mut rng);
            assert!((3..=7).contains(&days), "economy out of range: {days}");
        }
    }

    #[test]
    fn boundary_totals_fall_into_the_lower_tier() {
        let premium = Decimal::new(5000, 0);
        let standard = Decimal::new(1000, 0);
        let mut rng = StepRng::new(0, 1);

        // Exactly at the threshold is not "above" it.
        let days = estimate_days(premium, premium, standard, &mut rng);
        assert!((2..=4).contains(&days));
        let days = estimate_days(standard, premium, standard, &mut rng);
        assert!((3..=7).contains(&days));
    }
}
