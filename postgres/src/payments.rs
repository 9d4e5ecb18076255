//! Append-only payment transaction records.

use crate::error::StoreError;
use orderbus_core::model::{OrderId, PaymentStatus, PaymentTransaction};
use sqlx::PgPool;

/// Store for the `payment_transactions` table.
///
/// Written once per payment attempt by the payment worker; read by the
/// readiness check and the shipping worker.
pub struct PaymentStore {
    pool: PgPool,
}

impl PaymentStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one payment outcome.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the insert fails; the caller
    /// requeues the delivery so the outcome is not lost.
    pub async fn record(&self, transaction: &PaymentTransaction) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO payment_transactions
                (id, order_id, amount, status, transaction_id, payment_method, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(&transaction.id)
        .bind(transaction.order_id.as_str())
        .bind(transaction.amount)
        .bind(transaction.status.as_str())
        .bind(&transaction.transaction_id)
        .bind(&transaction.payment_method)
        .bind(&transaction.message)
        .bind(transaction.created_at)
        .execute(&self.pool)
        .await?;

        metrics::counter!("orderbus.payments.recorded", "status" => transaction.status.as_str())
            .increment(1);
        Ok(())
    }

    /// Whether a successful charge is on record for the order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the query fails.
    pub async fn has_successful(&self, order_id: &OrderId) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS(
                SELECT 1 FROM payment_transactions
                WHERE order_id = $1 AND status = $2
            )
            ",
        )
        .bind(order_id.as_str())
        .bind(PaymentStatus::Success.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
