//! Payment worker: charge (simulated), record, emit the outcome.

use orderbus_core::environment::Clock;
use orderbus_core::event::{EventType, OrderEvent, PaymentMetadata};
use orderbus_core::event_bus::{EventBus, EventHandler, HandlerError};
use orderbus_core::model::{PaymentStatus, PaymentTransaction};
use orderbus_core::status::OrderStatus;
use orderbus_postgres::PaymentStore;
use rand::Rng;
use rust_decimal::Decimal;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const PAYMENT_METHODS: &[&str] = &[
    "credit_card",
    "debit_card",
    "bank_transfer",
    "digital_wallet",
];

const FAILURE_REASONS: &[&str] = &[
    "Insufficient funds",
    "Card expired",
    "Payment declined by bank",
    "Network timeout",
    "Invalid payment details",
];

/// Gateway simulation tunables.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Fraction of charges that succeed, in `[0, 1]`.
    pub success_rate: f64,
    /// Simulated gateway latency.
    pub processing_delay: Duration,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            success_rate: 0.9,
            processing_delay: Duration::from_secs(2),
        }
    }
}

/// Outcome of one simulated charge.
#[derive(Debug, Clone)]
pub struct PaymentAttempt {
    /// Whether the charge settled.
    pub success: bool,
    /// Gateway-side transaction id.
    pub transaction_id: String,
    /// Method the gateway settled on.
    pub method: String,
    /// Human-readable outcome.
    pub message: String,
}

/// The probabilistic gateway stub. Only its event-emission contract matters
/// to the pipeline; the kernel itself is a coin flip.
#[derive(Debug, Clone)]
pub struct PaymentSimulator {
    config: PaymentConfig,
}

impl PaymentSimulator {
    /// Build a simulator.
    #[must_use]
    pub const fn new(config: PaymentConfig) -> Self {
        Self { config }
    }

    /// Simulate one charge.
    pub async fn charge(&self, amount: Decimal) -> PaymentAttempt {
        tokio::time::sleep(self.config.processing_delay).await;

        let (success, method_index, reason_index) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen::<f64>() < self.config.success_rate,
                rng.gen_range(0..PAYMENT_METHODS.len()),
                rng.gen_range(0..FAILURE_REASONS.len()),
            )
        };

        let transaction_id = format!("TXN_{}", &Uuid::new_v4().simple().to_string()[..8]);
        let message = if success {
            "Payment processed successfully".to_string()
        } else {
            FAILURE_REASONS[reason_index].to_string()
        };

        tracing::debug!(
            %amount,
            method = PAYMENT_METHODS[method_index],
            success,
            "payment simulated"
        );

        PaymentAttempt {
            success,
            transaction_id,
            method: PAYMENT_METHODS[method_index].to_string(),
            message,
        }
    }
}

/// Consumes `OrderCreated`, records one `payment_transactions` row and emits
/// exactly one of `PaymentSuccessful` / `PaymentFailed`.
#[derive(Clone)]
pub struct PaymentWorker {
    payments: Arc<PaymentStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    simulator: PaymentSimulator,
}

impl PaymentWorker {
    /// Assemble the worker.
    #[must_use]
    pub fn new(
        payments: Arc<PaymentStore>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        config: PaymentConfig,
    ) -> Self {
        Self {
            payments,
            bus,
            clock,
            simulator: PaymentSimulator::new(config),
        }
    }

    async fn process(&self, event: OrderEvent) -> Result<(), HandlerError> {
        if event.event_type != EventType::OrderCreated {
            return Ok(());
        }

        tracing::info!(
            order_id = %event.order_id,
            amount = %event.total_amount,
            "processing payment"
        );

        let attempt = self.simulator.charge(event.total_amount).await;
        let now = self.clock.now();
        let status = if attempt.success {
            PaymentStatus::Success
        } else {
            PaymentStatus::Failed
        };

        let transaction = PaymentTransaction {
            id: Uuid::new_v4().to_string(),
            order_id: event.order_id.clone(),
            amount: event.total_amount,
            status,
            transaction_id: attempt.transaction_id.clone(),
            payment_method: attempt.method.clone(),
            message: attempt.message.clone(),
            created_at: now,
        };
        // A lost transaction row would break the readiness check, so DB
        // failures requeue the delivery rather than dropping the outcome.
        self.payments
            .record(&transaction)
            .await
            .map_err(crate::transient)?;

        let (event_type, order_status) = if attempt.success {
            (EventType::PaymentSuccessful, OrderStatus::PaymentSuccessful)
        } else {
            (EventType::PaymentFailed, OrderStatus::PaymentFailed)
        };

        let metadata = PaymentMetadata {
            transaction_id: attempt.transaction_id,
            payment_method: attempt.method,
            message: attempt.message,
        };
        let metadata = serde_json::to_value(&metadata)
            .map_err(|e| HandlerError::Transient(e.to_string()))?;

        let outcome = OrderEvent::new(event_type, event.order_id.clone(), order_status, now)
            .with_user(event.user_id.clone())
            .with_total(event.total_amount)
            .with_metadata(metadata);

        if let Err(e) = self.bus.publish(&outcome).await {
            tracing::error!(
                order_id = %event.order_id,
                event_type = %event_type,
                error = %e,
                "failed to publish payment outcome"
            );
        }
        Ok(())
    }
}

impl EventHandler for PaymentWorker {
    fn handle(
        &self,
        event: OrderEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
        Box::pin(self.process(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_simulator(success_rate: f64) -> PaymentSimulator {
        PaymentSimulator::new(PaymentConfig {
            success_rate,
            processing_delay: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn forced_success_rate_always_settles() {
        let simulator = instant_simulator(1.0);
        for _ in 0..16 {
            let attempt = simulator.charge(Decimal::new(1000, 2)).await;
            assert!(attempt.success);
            assert_eq!(attempt.message, "Payment processed successfully");
        }
    }

    #[tokio::test]
    async fn zero_success_rate_always_declines() {
        let simulator = instant_simulator(0.0);
        for _ in 0..16 {
            let attempt = simulator.charge(Decimal::new(1000, 2)).await;
            assert!(!attempt.success);
            assert!(FAILURE_REASONS.contains(&attempt.message.as_str()));
        }
    }

    #[tokio::test]
    async fn attempts_carry_gateway_shaped_fields() {
        let attempt = instant_simulator(1.0).charge(Decimal::ONE).await;
        assert!(attempt.transaction_id.starts_with("TXN_"));
        assert_eq!(attempt.transaction_id.len(), "TXN_".len() + 8);
        assert!(PAYMENT_METHODS.contains(&attempt.method.as_str()));
    }
}
