//! Background task returning expired reservations to stock.

use orderbus_core::environment::Clock;
use orderbus_postgres::StockStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Periodically releases expired RESERVED rows back to the catalog.
///
/// Expired reservations already stop counting toward readiness at the query
/// level; this task closes the loop by restoring the earmarked quantity so
/// it can be sold again. Safe to run in multiple instances: the release
/// query skips rows another sweeper holds locked.
pub struct ReservationSweeper {
    stock: Arc<StockStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ReservationSweeper {
    /// Assemble the sweeper.
    #[must_use]
    pub fn new(stock: Arc<StockStore>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            stock,
            clock,
            interval,
        }
    }

    /// Run until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("reservation sweeper shutting down");
                    return;
                },
                _ = ticker.tick() => {
                    match self.stock.release_expired(self.clock.now()).await {
                        Ok(0) => {},
                        Ok(released) => {
                            tracing::info!(released, "swept expired reservations");
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "reservation sweep failed");
                        },
                    }
                },
            }
        }
    }
}
