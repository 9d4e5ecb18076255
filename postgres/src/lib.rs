//! `PostgreSQL` persistence for the orderbus pipeline.
//!
//! This crate holds every table the coordination core reads or writes,
//! split by owner:
//!
//! - [`OrderStore`]: orders + items, the status column the reducer owns,
//!   the audit log, and the guarded readiness promotion.
//! - [`CatalogStore`]: product lookups for quoting and price snapshots.
//! - [`StockStore`]: the row-locked reservation engine, the
//!   active-reservation check, and reservation lifecycle (release on
//!   expiry, consume on dispatch).
//! - [`PaymentStore`] / [`ShippingStore`]: append-only outcome records plus
//!   the existence checks readiness and dispatch depend on.
//!
//! All cross-worker coordination happens through these tables; no process
//! holds mutable in-memory state, so any worker can restart at any time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod error;
mod orders;
mod payments;
mod shipping;
mod stock;

pub use catalog::CatalogStore;
pub use error::StoreError;
pub use orders::OrderStore;
pub use payments::PaymentStore;
pub use shipping::ShippingStore;
pub use stock::{ReservationOutcome, StockStore};

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`StoreError::Database`] when the URL is invalid or the server
/// cannot be reached.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run the embedded migrations.
///
/// Idempotent: already-applied migrations are skipped.
///
/// # Errors
///
/// Returns [`StoreError::Migration`] when a migration fails to apply.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;
    tracing::info!("database migrations applied");
    Ok(())
}
