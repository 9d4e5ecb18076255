//! Append-only shipment records.

use crate::error::StoreError;
use orderbus_core::model::ShippingInfo;
use sqlx::PgPool;

/// Store for the `shipping_info` table.
pub struct ShippingStore {
    pool: PgPool,
}

impl ShippingStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a dispatched shipment.
    ///
    /// `order_id` is unique: when the payment-arrival and stock-arrival
    /// triggers race into dispatch, only the first insert lands and the
    /// loser observes `false` and skips its `OrderShipped` publish.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the insert fails.
    pub async fn record(&self, info: &ShippingInfo) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO shipping_info
                (id, order_id, tracking_number, carrier, estimated_delivery_days, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (order_id) DO NOTHING
            ",
        )
        .bind(&info.id)
        .bind(info.order_id.as_str())
        .bind(&info.tracking_number)
        .bind(&info.carrier)
        .bind(info.estimated_delivery_days)
        .bind(&info.status)
        .bind(info.created_at)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        if inserted {
            metrics::counter!("orderbus.shipments.dispatched").increment(1);
        }
        Ok(inserted)
    }
}
