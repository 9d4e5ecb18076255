//! The status reducer: canonical `orders.status`, audit log, readiness.
//!
//! Every event lands here. The reducer maps it to a target status, validates
//! the move against the legal-transition table, persists the update together
//! with one audit row, and then evaluates readiness convergence on a
//! detached task. It is the only writer of `orders.status` after creation.

use orderbus_core::environment::Clock;
use orderbus_core::event::{EventType, OrderEvent};
use orderbus_core::event_bus::{EventBus, EventHandler, HandlerError};
use orderbus_core::model::OrderId;
use orderbus_core::status::{OrderStatus, Transition};
use orderbus_postgres::{OrderStore, PaymentStore, StockStore};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Reducer tunables.
#[derive(Debug, Clone)]
pub struct StatusConfig {
    /// Whether accepted transitions append `order_status_history` rows.
    pub audit_log_enabled: bool,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            audit_log_enabled: true,
        }
    }
}

/// Consumes every queue event and owns the per-order state machine.
///
/// Failure policy: anything that cannot be fixed by redelivery (unknown
/// event, missing order, illegal transition) is logged and acked. Database
/// errors are also acked; the authoritative state is the row, and a
/// redelivery storm on a poisoned message would stall the queue behind it.
#[derive(Clone)]
pub struct StatusWorker {
    orders: Arc<OrderStore>,
    payments: Arc<PaymentStore>,
    stock: Arc<StockStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    config: StatusConfig,
}

impl StatusWorker {
    /// Assemble the reducer.
    #[must_use]
    pub fn new(
        orders: Arc<OrderStore>,
        payments: Arc<PaymentStore>,
        stock: Arc<StockStore>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        config: StatusConfig,
    ) -> Self {
        Self {
            orders,
            payments,
            stock,
            bus,
            clock,
            config,
        }
    }

    async fn process(&self, event: OrderEvent) -> Result<(), HandlerError> {
        let Some(target) = event.event_type.target_status() else {
            tracing::warn!(
                order_id = %event.order_id,
                event_type = %event.event_type,
                "unknown event type, dropping"
            );
            return Ok(());
        };

        let current = match self.orders.status_of(&event.order_id).await {
            Ok(Some(status)) => status,
            Ok(None) => {
                // Possibly a stale duplicate for an order this database
                // never saw; requeueing cannot make it appear.
                tracing::warn!(order_id = %event.order_id, "order not found, dropping event");
                return Ok(());
            },
            Err(e) => {
                tracing::error!(order_id = %event.order_id, error = %e, "status read failed");
                return Ok(());
            },
        };

        match Transition::evaluate(current, target) {
            Transition::SelfTransition(status) => {
                tracing::debug!(
                    order_id = %event.order_id,
                    status = %status,
                    "duplicate delivery, no write"
                );
                Ok(())
            },
            Transition::Rejected { from, to } => {
                tracing::warn!(
                    order_id = %event.order_id,
                    from = %from,
                    to = %to,
                    event_type = %event.event_type,
                    "illegal transition rejected"
                );
                Ok(())
            },
            Transition::Apply { from, to } => {
                let persisted = self
                    .orders
                    .record_transition(
                        &event.order_id,
                        from,
                        to,
                        event.event_type.as_str(),
                        event.metadata.as_ref(),
                        self.config.audit_log_enabled,
                        self.clock.now(),
                    )
                    .await;
                if let Err(e) = persisted {
                    tracing::error!(
                        order_id = %event.order_id,
                        from = %from,
                        to = %to,
                        error = %e,
                        "transition persist failed, dropping delivery"
                    );
                    return Ok(());
                }

                tracing::info!(
                    order_id = %event.order_id,
                    from = %from,
                    to = %to,
                    "status updated"
                );

                // Readiness runs detached from the delivery, on its own
                // pooled connection; the ack does not wait for it.
                if matches!(
                    to,
                    OrderStatus::PaymentSuccessful | OrderStatus::StockReserved
                ) {
                    let worker = self.clone();
                    let order_id = event.order_id.clone();
                    tokio::spawn(async move {
                        worker.check_ready_for_shipping(&order_id).await;
                    });
                }
                Ok(())
            },
        }
    }

    /// Readiness convergence: promote to `READY_FOR_SHIPPING` when both a
    /// successful payment and an unexpired reservation are on record.
    ///
    /// Invoked from both the payment-arrival and the stock-arrival paths;
    /// the guarded UPDATE in [`OrderStore::promote_to_ready`] makes the race
    /// settle on exactly one winner, and only the winner publishes.
    async fn check_ready_for_shipping(&self, order_id: &OrderId) {
        let now = self.clock.now();

        let current = match self.orders.status_of(order_id).await {
            Ok(Some(status)) => status,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(order_id = %order_id, error = %e, "readiness status read failed");
                return;
            },
        };
        if !matches!(
            current,
            OrderStatus::PaymentSuccessful | OrderStatus::StockReserved
        ) {
            return;
        }

        let payment_ok = match self.payments.has_successful(order_id).await {
            Ok(ok) => ok,
            Err(e) => {
                tracing::error!(order_id = %order_id, error = %e, "payment check failed");
                return;
            },
        };
        let stock_ok = match self.stock.has_active_reservation(order_id, now).await {
            Ok(ok) => ok,
            Err(e) => {
                tracing::error!(order_id = %order_id, error = %e, "reservation check failed");
                return;
            },
        };
        if !(payment_ok && stock_ok) {
            return;
        }

        let promoted = self
            .orders
            .promote_to_ready(order_id, self.config.audit_log_enabled, now)
            .await;
        match promoted {
            Ok(true) => {
                tracing::info!(order_id = %order_id, "order ready for shipping");
                let event = OrderEvent::new(
                    EventType::OrderReadyForShipping,
                    order_id.clone(),
                    OrderStatus::ReadyForShipping,
                    now,
                );
                if let Err(e) = self.bus.publish(&event).await {
                    tracing::error!(
                        order_id = %order_id,
                        error = %e,
                        "failed to publish OrderReadyForShipping"
                    );
                }
            },
            Ok(false) => {
                tracing::debug!(order_id = %order_id, "readiness promotion lost the race");
            },
            Err(e) => {
                tracing::error!(order_id = %order_id, error = %e, "readiness promotion failed");
            },
        }
    }
}

impl EventHandler for StatusWorker {
    fn handle(
        &self,
        event: OrderEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
        Box::pin(self.process(event))
    }
}
