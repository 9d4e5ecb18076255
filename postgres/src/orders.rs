//! Orders, the status column, the audit log, and the readiness promotion.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use orderbus_core::model::{Order, OrderId, OrderItem, ProductId, StatusHistoryEntry, UserId};
use orderbus_core::status::OrderStatus;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Store for the `orders`, `order_items` and `order_status_history` tables.
///
/// The creator inserts; afterwards only the status reducer writes here, and
/// orders are never deleted.
pub struct OrderStore {
    pool: PgPool,
}

impl OrderStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist an order and its items in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on any insert or commit failure; the
    /// transaction rolls back and nothing is visible.
    pub async fn create(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO orders (id, user_id, total_amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(order.id.as_str())
        .bind(order.user_id.as_str())
        .bind(order.total_amount)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for item in &order.items {
            sqlx::query(
                r"
                INSERT INTO order_items (id, order_id, product_id, quantity, price, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(&item.id)
            .bind(item.order_id.as_str())
            .bind(item.product_id.as_str())
            .bind(item.quantity)
            .bind(item.price)
            .bind(order.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        metrics::counter!("orderbus.orders.created").increment(1);
        tracing::debug!(order_id = %order.id, items = order.items.len(), "order persisted");
        Ok(())
    }

    /// Load an order with its items.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OrderNotFound`] for an unknown id.
    pub async fn fetch(&self, order_id: &OrderId) -> Result<Order, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, total_amount, status, created_at, updated_at
            FROM orders
            WHERE id = $1
            ",
        )
        .bind(order_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::OrderNotFound(order_id.clone()))?;

        let status_raw: String = row.get("status");
        let mut order = Order {
            id: OrderId::new(row.get("id")),
            user_id: UserId::new(row.get("user_id")),
            total_amount: row.get::<Decimal, _>("total_amount"),
            status: OrderStatus::parse(&status_raw)?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            items: Vec::new(),
        };

        let item_rows = sqlx::query(
            r"
            SELECT id, order_id, product_id, quantity, price
            FROM order_items
            WHERE order_id = $1
            ORDER BY id
            ",
        )
        .bind(order_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        order.items = item_rows
            .into_iter()
            .map(|row| OrderItem {
                id: row.get("id"),
                order_id: OrderId::new(row.get("order_id")),
                product_id: ProductId::new(row.get("product_id")),
                quantity: row.get("quantity"),
                price: row.get::<Decimal, _>("price"),
            })
            .collect();

        Ok(order)
    }

    /// Read the current status, or `None` for an unknown order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptStatus`] if the column holds a value
    /// outside the canonical vocabulary.
    pub async fn status_of(&self, order_id: &OrderId) -> Result<Option<OrderStatus>, StoreError> {
        let row = sqlx::query("SELECT status FROM orders WHERE id = $1")
            .bind(order_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let raw: String = row.get("status");
                Ok(Some(OrderStatus::parse(&raw)?))
            },
            None => Ok(None),
        }
    }

    /// Apply one accepted status transition: update the order row and, when
    /// auditing is on, append exactly one history row, atomically.
    ///
    /// An audit insert failure is logged and does not abort the status
    /// update.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the update or commit fails; the
    /// caller decides whether to ack or requeue.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_transition(
        &self,
        order_id: &OrderId,
        old_status: OrderStatus,
        new_status: OrderStatus,
        event_type: &str,
        metadata: Option<&serde_json::Value>,
        audit_enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            UPDATE orders
            SET status = $1, updated_at = $2
            WHERE id = $3
            ",
        )
        .bind(new_status.as_str())
        .bind(now)
        .bind(order_id.as_str())
        .execute(&mut *tx)
        .await?;

        if audit_enabled {
            let metadata_json = match metadata {
                Some(value) => value.clone(),
                None => serde_json::json!({}),
            };
            let audit = sqlx::query(
                r"
                INSERT INTO order_status_history
                    (id, order_id, old_status, new_status, event_type, metadata, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(order_id.as_str())
            .bind(old_status.as_str())
            .bind(new_status.as_str())
            .bind(event_type)
            .bind(metadata_json)
            .bind(now)
            .execute(&mut *tx)
            .await;
            if let Err(e) = audit {
                tracing::warn!(order_id = %order_id, error = %e, "audit log insert failed");
            }
        }

        tx.commit().await?;

        metrics::counter!("orderbus.status.transitions", "to" => new_status.as_str())
            .increment(1);
        Ok(())
    }

    /// Attempt the guarded promotion to `READY_FOR_SHIPPING`.
    ///
    /// The `status IN (...)` predicate is the concurrency primitive: when
    /// the payment-arrival and stock-arrival paths race, exactly one of them
    /// observes an affected row and wins the right to emit the readiness
    /// event. The row lock taken just before lets the winner audit the
    /// status it actually promoted from.
    ///
    /// The synthesized `OrderReadyForShipping` event later reaches the
    /// reducer as a self-transition and writes nothing, so the audit row for
    /// this status mutation is appended here.
    ///
    /// Returns whether this caller won.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the update cannot be executed.
    pub async fn promote_to_ready(
        &self,
        order_id: &OrderId,
        audit_enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };
        let old_status = OrderStatus::parse(&row.get::<String, _>("status"))?;

        let result = sqlx::query(
            r"
            UPDATE orders
            SET status = $1, updated_at = $2
            WHERE id = $3 AND status IN ($4, $5)
            ",
        )
        .bind(OrderStatus::ReadyForShipping.as_str())
        .bind(now)
        .bind(order_id.as_str())
        .bind(OrderStatus::PaymentSuccessful.as_str())
        .bind(OrderStatus::StockReserved.as_str())
        .execute(&mut *tx)
        .await?;

        let promoted = result.rows_affected() == 1;
        if promoted && audit_enabled {
            let audit = sqlx::query(
                r"
                INSERT INTO order_status_history
                    (id, order_id, old_status, new_status, event_type, metadata, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(order_id.as_str())
            .bind(old_status.as_str())
            .bind(OrderStatus::ReadyForShipping.as_str())
            .bind("OrderReadyForShipping")
            .bind(serde_json::json!({}))
            .bind(now)
            .execute(&mut *tx)
            .await;
            if let Err(e) = audit {
                tracing::warn!(order_id = %order_id, error = %e, "audit log insert failed");
            }
        }

        tx.commit().await?;

        if promoted {
            metrics::counter!("orderbus.status.promotions").increment(1);
        }
        Ok(promoted)
    }

    /// Number of audit rows for an order. Used by tests and diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the query fails.
    pub async fn history_len(&self, order_id: &OrderId) -> Result<i64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM order_status_history WHERE order_id = $1")
                .bind(order_id.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// The audit trail for an order, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptStatus`] if a history row holds a status
    /// outside the canonical vocabulary.
    pub async fn history(
        &self,
        order_id: &OrderId,
    ) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, order_id, old_status, new_status, event_type, metadata, created_at
            FROM order_status_history
            WHERE order_id = $1
            ORDER BY created_at, id
            ",
        )
        .bind(order_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let old_raw: String = row.get("old_status");
                let new_raw: String = row.get("new_status");
                Ok(StatusHistoryEntry {
                    id: row.get("id"),
                    order_id: OrderId::new(row.get("order_id")),
                    old_status: OrderStatus::parse(&old_raw)?,
                    new_status: OrderStatus::parse(&new_raw)?,
                    event_type: row.get("event_type"),
                    metadata: row.get("metadata"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }
}
