//! The stock reservation engine.
//!
//! One reservation attempt is one transaction: every item's product row is
//! locked with `SELECT ... FOR UPDATE`, availability is checked across the
//! whole order, and either every decrement + reservation row commits or the
//! transaction rolls back untouched. Items are locked in `product_id` order
//! so two concurrent orders over overlapping products cannot deadlock.
//!
//! Conservation invariant: across any committed attempt, the sum of
//! `products.stock_quantity` and RESERVED `stock_reservations.quantity` per
//! product is unchanged.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use orderbus_core::event::ReservedItem;
use orderbus_core::model::{
    OrderId, OrderItem, ProductId, ReservationId, ReservationStatus, StockReservation,
};
use sqlx::{PgPool, Row};

/// Outcome of a single reservation attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// Every item was covered; the reservations are committed.
    Reserved(Vec<ReservedItem>),
    /// One or more products could not cover their quantity. Nothing was
    /// committed; the full offending list is reported.
    Insufficient {
        /// Products whose stock could not cover the requested quantity.
        products: Vec<ProductId>,
    },
}

/// Store for the `stock_reservations` table and the `products.stock_quantity`
/// column.
pub struct StockStore {
    pool: PgPool,
}

impl StockStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run one all-or-nothing reservation attempt for `items`.
    ///
    /// Rows are locked in `product_id` order regardless of input order. On
    /// insufficiency the whole list of offending products is collected
    /// before rolling back, so the failure event can name all of them.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ProductNotFound`] if any item references an unknown
    ///   product (the transaction is rolled back).
    /// - [`StoreError::Database`] on lock, write or commit failure; callers
    ///   retry transient cases.
    pub async fn reserve(
        &self,
        order_id: &OrderId,
        items: &[OrderItem],
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<ReservationOutcome, StoreError> {
        let mut sorted: Vec<&OrderItem> = items.iter().collect();
        sorted.sort_by(|a, b| a.product_id.cmp(&b.product_id));

        let mut tx = self.pool.begin().await?;
        let mut reserved = Vec::with_capacity(sorted.len());
        let mut insufficient = Vec::new();

        for item in sorted {
            let row = sqlx::query(
                r"
                SELECT stock_quantity
                FROM products
                WHERE id = $1
                FOR UPDATE
                ",
            )
            .bind(item.product_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = row else {
                tx.rollback().await?;
                return Err(StoreError::ProductNotFound(item.product_id.clone()));
            };

            let available: i32 = row.get("stock_quantity");
            if available < item.quantity {
                tracing::warn!(
                    order_id = %order_id,
                    product_id = %item.product_id,
                    requested = item.quantity,
                    available,
                    "insufficient stock"
                );
                insufficient.push(item.product_id.clone());
                continue;
            }

            sqlx::query(
                r"
                UPDATE products
                SET stock_quantity = stock_quantity - $1, updated_at = $2
                WHERE id = $3
                ",
            )
            .bind(item.quantity)
            .bind(now)
            .bind(item.product_id.as_str())
            .execute(&mut *tx)
            .await?;

            let reservation_id = ReservationId::generate();
            sqlx::query(
                r"
                INSERT INTO stock_reservations
                    (id, order_id, product_id, quantity, status, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(reservation_id.as_str())
            .bind(order_id.as_str())
            .bind(item.product_id.as_str())
            .bind(item.quantity)
            .bind(ReservationStatus::Reserved.as_str())
            .bind(now)
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;

            reserved.push(ReservedItem {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
                reservation_id,
            });
        }

        if !insufficient.is_empty() {
            tx.rollback().await?;
            metrics::counter!("orderbus.stock.reservations", "outcome" => "insufficient")
                .increment(1);
            return Ok(ReservationOutcome::Insufficient {
                products: insufficient,
            });
        }

        tx.commit().await?;
        metrics::counter!("orderbus.stock.reservations", "outcome" => "reserved").increment(1);
        tracing::debug!(order_id = %order_id, lines = reserved.len(), "stock reserved");
        Ok(ReservationOutcome::Reserved(reserved))
    }

    /// Whether the order holds at least one unexpired RESERVED row.
    ///
    /// Expired reservations do not count toward readiness even before the
    /// sweeper returns them to stock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the query fails.
    pub async fn has_active_reservation(
        &self,
        order_id: &OrderId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS(
                SELECT 1 FROM stock_reservations
                WHERE order_id = $1 AND status = $2 AND expires_at > $3
            )
            ",
        )
        .bind(order_id.as_str())
        .bind(ReservationStatus::Reserved.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Every reservation row for an order, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptEnum`] if a status column holds a value
    /// outside the reservation vocabulary.
    pub async fn reservations_for(
        &self,
        order_id: &OrderId,
    ) -> Result<Vec<StockReservation>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, order_id, product_id, quantity, status, created_at, expires_at
            FROM stock_reservations
            WHERE order_id = $1
            ORDER BY created_at DESC, id
            ",
        )
        .bind(order_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let status_raw: String = row.get("status");
                Ok(StockReservation {
                    id: ReservationId::new(row.get("id")),
                    order_id: OrderId::new(row.get("order_id")),
                    product_id: ProductId::new(row.get("product_id")),
                    quantity: row.get("quantity"),
                    status: ReservationStatus::parse(&status_raw)?,
                    created_at: row.get("created_at"),
                    expires_at: row.get("expires_at"),
                })
            })
            .collect()
    }

    /// Flip an order's RESERVED rows to CONSUMED at dispatch time.
    ///
    /// Consumed stock has left the building and must never be returned by
    /// the expiry sweeper. Returns the number of rows flipped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the update fails.
    pub async fn consume_reservations(&self, order_id: &OrderId) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE stock_reservations
            SET status = $1
            WHERE order_id = $2 AND status = $3
            ",
        )
        .bind(ReservationStatus::Consumed.as_str())
        .bind(order_id.as_str())
        .bind(ReservationStatus::Reserved.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Return expired RESERVED rows to the catalog and mark them RELEASED.
    ///
    /// Locks follow the same `product_id` ordering as [`Self::reserve`].
    /// `SKIP LOCKED` keeps concurrent sweeper instances from contending.
    /// Returns the number of reservations released.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on lock, write or commit failure.
    pub async fn release_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r"
            SELECT id, product_id, quantity
            FROM stock_reservations
            WHERE status = $1 AND expires_at <= $2
            ORDER BY product_id
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(ReservationStatus::Reserved.as_str())
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut released = 0u64;
        for row in rows {
            let reservation_id: String = row.get("id");
            let product_id: String = row.get("product_id");
            let quantity: i32 = row.get("quantity");

            sqlx::query(
                r"
                UPDATE products
                SET stock_quantity = stock_quantity + $1, updated_at = $2
                WHERE id = $3
                ",
            )
            .bind(quantity)
            .bind(now)
            .bind(&product_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE stock_reservations SET status = $1 WHERE id = $2")
                .bind(ReservationStatus::Released.as_str())
                .bind(&reservation_id)
                .execute(&mut *tx)
                .await?;

            released += 1;
        }

        tx.commit().await?;

        if released > 0 {
            metrics::counter!("orderbus.stock.reservations_released").increment(released);
            tracing::info!(released, "expired reservations returned to stock");
        }
        Ok(released)
    }
}
