//! Store error type shared by every store in this crate.

use orderbus_core::model::{OrderId, ProductId, UnknownEnumValue};
use orderbus_core::status::UnknownStatus;
use thiserror::Error;

/// Errors surfaced by the Postgres stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Any database-level failure (connectivity, constraint, deadlock).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed to apply.
    #[error("migration failed: {0}")]
    Migration(String),

    /// The referenced order does not exist.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// The referenced product does not exist.
    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    /// A status column held a value outside the known vocabulary.
    #[error(transparent)]
    CorruptStatus(#[from] UnknownStatus),

    /// An enum column held a value outside the known vocabulary.
    #[error(transparent)]
    CorruptEnum(#[from] UnknownEnumValue),

    /// Event metadata could not be serialized for the audit log.
    #[error("metadata serialization failed: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether a retry has a chance of succeeding.
    ///
    /// Deadlocks, serialization failures and connectivity problems are
    /// transient; missing rows and corrupt data are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => match e {
                sqlx::Error::Database(db) => {
                    // 40001 serialization_failure, 40P01 deadlock_detected.
                    matches!(db.code().as_deref(), Some("40001" | "40P01"))
                },
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                _ => false,
            },
            _ => false,
        }
    }
}
