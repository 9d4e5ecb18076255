//! Product lookups for quoting and price snapshots.

use crate::error::StoreError;
use orderbus_core::model::{Product, ProductId};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

/// Read-side access to the `products` table.
///
/// The stock worker is the only writer of `stock_quantity` (see
/// [`crate::StockStore`]); this store is for the creator's non-binding
/// availability check and price snapshotting.
pub struct CatalogStore {
    pool: PgPool,
}

impl CatalogStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up one product.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ProductNotFound`] for an unknown id.
    pub async fn product(&self, product_id: &ProductId) -> Result<Product, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, name, description, price, stock_quantity
            FROM products
            WHERE id = $1
            ",
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::ProductNotFound(product_id.clone()))?;

        Ok(Product {
            id: ProductId::new(row.get("id")),
            name: row.get("name"),
            description: row.get("description"),
            price: row.get::<Decimal, _>("price"),
            stock_quantity: row.get("stock_quantity"),
        })
    }
}
