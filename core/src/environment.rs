//! Injected dependencies shared by the workers.
//!
//! Time is the only ambient dependency the pipeline core needs; it is
//! abstracted behind [`Clock`] so expiry and audit timestamps are
//! deterministic in tests.

use chrono::{DateTime, Utc};

/// Abstracts time for testability.
///
/// Production code uses [`SystemClock`]; tests use a fixed clock so
/// reservation expiry and audit timestamps are reproducible.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
