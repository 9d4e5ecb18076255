//! # orderbus testing
//!
//! Test doubles for the orderbus pipeline:
//!
//! - [`mocks::FixedClock`]: deterministic time, so reservation expiry and
//!   audit timestamps are reproducible.
//! - [`InMemoryEventBus`]: an [`EventBus`] that records every publish and
//!   delivers to registered handlers on demand, applying the broker's
//!   redelivery-on-error policy with a bounded cap.
//!
//! ## Example
//!
//! ```ignore
//! use orderbus_testing::InMemoryEventBus;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn worker_reacts_to_order_created() {
//!     let bus = Arc::new(InMemoryEventBus::new());
//!     bus.consume(Queue::Payment, worker, shutdown.clone());
//!     bus.publish(&order_created_event).await.unwrap();
//!     bus.dispatch_all().await;
//!     assert_eq!(bus.published().len(), 2); // input + worker's outcome
//! }
//! ```

use orderbus_core::environment::Clock;
use orderbus_core::event::OrderEvent;
use orderbus_core::event_bus::{EventBus, EventBusError, EventHandler, Queue};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::Clock;
    use chrono::{DateTime, Utc};

    /// Fixed clock for deterministic tests.
    ///
    /// Always returns the same time, making expiry and audit assertions
    /// reproducible.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a clock pinned to `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// A fixed clock at 2025-03-01 00:00:00 UTC.
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-03-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Counters describing what [`InMemoryEventBus::dispatch_all`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Deliveries that ended in an ack.
    pub acked: u64,
    /// Redeliveries performed after a handler error.
    pub redelivered: u64,
    /// Deliveries abandoned after the redelivery cap.
    pub abandoned: u64,
}

/// In-memory [`EventBus`] for tests.
///
/// Fan-out semantics match the broker: every published event is offered to
/// every registered handler, regardless of queue. A handler error triggers
/// redelivery up to a bounded cap, mirroring nack-with-requeue.
///
/// Delivery is pull-based: events accumulate until [`Self::dispatch_all`]
/// drains them, so tests control exactly when handlers run and can observe
/// cascades (a handler publishing follow-up events extends the same drain).
pub struct InMemoryEventBus {
    published: Mutex<Vec<OrderEvent>>,
    pending: Mutex<VecDeque<OrderEvent>>,
    handlers: Mutex<Vec<(Queue, Arc<dyn EventHandler>)>>,
    max_redeliveries: u32,
}

impl InMemoryEventBus {
    /// Bus with the default redelivery cap of 3.
    #[must_use]
    pub fn new() -> Self {
        Self::with_redelivery_cap(3)
    }

    /// Bus with a custom redelivery cap.
    #[must_use]
    pub fn with_redelivery_cap(max_redeliveries: u32) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            handlers: Mutex::new(Vec::new()),
            max_redeliveries,
        }
    }

    /// Everything published so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (a prior test panic).
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn published(&self) -> Vec<OrderEvent> {
        self.published.lock().expect("published lock").clone()
    }

    /// Deliver every pending event to every registered handler, including
    /// events the handlers publish while draining. Returns what happened.
    ///
    /// # Panics
    ///
    /// Panics if an internal lock is poisoned (a prior test panic).
    #[allow(clippy::expect_used)]
    pub async fn dispatch_all(&self) -> DeliveryStats {
        let mut stats = DeliveryStats::default();

        loop {
            let event = self.pending.lock().expect("pending lock").pop_front();
            let Some(event) = event else { break };

            let handlers: Vec<(Queue, Arc<dyn EventHandler>)> =
                self.handlers.lock().expect("handlers lock").clone();

            for (queue, handler) in handlers {
                let mut attempts = 0u32;
                loop {
                    match handler.handle(event.clone()).await {
                        Ok(()) => {
                            stats.acked += 1;
                            break;
                        },
                        Err(e) => {
                            attempts += 1;
                            if attempts > self.max_redeliveries {
                                tracing::warn!(
                                    queue = %queue,
                                    error = %e,
                                    "abandoning delivery after redelivery cap"
                                );
                                stats.abandoned += 1;
                                break;
                            }
                            stats.redelivered += 1;
                        },
                    }
                }
            }
        }
        stats
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    #[allow(clippy::expect_used)]
    fn publish(
        &self,
        event: &OrderEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let event = event.clone();
        Box::pin(async move {
            self.published.lock().expect("published lock").push(event.clone());
            self.pending.lock().expect("pending lock").push_back(event);
            Ok(())
        })
    }

    #[allow(clippy::expect_used)]
    fn consume(
        &self,
        queue: Queue,
        handler: Arc<dyn EventHandler>,
        shutdown: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        self.handlers
            .lock()
            .expect("handlers lock")
            .push((queue, handler));
        Box::pin(async move {
            shutdown.cancelled().await;
            Ok(())
        })
    }
}
