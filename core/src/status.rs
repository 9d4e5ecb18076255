//! The per-order status state machine.
//!
//! Payment and stock reservation complete in parallel, so the machine cannot
//! be a strict linear ladder: from `CREATED` the order may move through
//! either `PAYMENT_SUCCESSFUL` or `STOCK_RESERVED` first, and the two paths
//! converge on `READY_FOR_SHIPPING`. The legal-transition table below is the
//! single authority; everything else (duplicates, reordering, stale events)
//! is rejected without touching state.
//!
//! Evaluation is pure: [`Transition::evaluate`] takes the current and target
//! status and decides whether to apply, silently accept a duplicate, or
//! reject. The status reducer persists the outcome; this module never does
//! I/O.

use crate::event::EventType;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Canonical order status.
///
/// Serialized on the wire and stored in `orders.status` as the
/// SCREAMING_SNAKE name (`"PAYMENT_SUCCESSFUL"`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order persisted, no downstream outcome recorded yet.
    Created,
    /// Payment has been initiated but not resolved.
    ///
    /// Present in the status vocabulary for completeness; no event currently
    /// targets it.
    PaymentPending,
    /// The payment worker recorded a successful charge.
    PaymentSuccessful,
    /// The payment worker recorded a failed charge.
    PaymentFailed,
    /// The stock worker reserved every item.
    StockReserved,
    /// The stock worker could not reserve one or more items.
    StockInsufficient,
    /// Both payment and stock conditions hold; synthesized by the reducer.
    ReadyForShipping,
    /// The shipping worker dispatched the order.
    Shipped,
    /// The order reached the customer. Terminal.
    Delivered,
    /// The order was cancelled. Terminal.
    Cancelled,
}

impl OrderStatus {
    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::PaymentPending => "PAYMENT_PENDING",
            Self::PaymentSuccessful => "PAYMENT_SUCCESSFUL",
            Self::PaymentFailed => "PAYMENT_FAILED",
            Self::StockReserved => "STOCK_RESERVED",
            Self::StockInsufficient => "STOCK_INSUFFICIENT",
            Self::ReadyForShipping => "READY_FOR_SHIPPING",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStatus`] if `s` is not one of the canonical names.
    pub fn parse(s: &str) -> Result<Self, UnknownStatus> {
        match s {
            "CREATED" => Ok(Self::Created),
            "PAYMENT_PENDING" => Ok(Self::PaymentPending),
            "PAYMENT_SUCCESSFUL" => Ok(Self::PaymentSuccessful),
            "PAYMENT_FAILED" => Ok(Self::PaymentFailed),
            "STOCK_RESERVED" => Ok(Self::StockReserved),
            "STOCK_INSUFFICIENT" => Ok(Self::StockInsufficient),
            "READY_FOR_SHIPPING" => Ok(Self::ReadyForShipping),
            "SHIPPED" => Ok(Self::Shipped),
            "DELIVERED" => Ok(Self::Delivered),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }

    /// The set of statuses this status may legally move to.
    ///
    /// Self-transitions are not listed; they are handled separately by
    /// [`Transition::evaluate`] (accepted without a write).
    #[must_use]
    pub const fn allowed_targets(self) -> &'static [Self] {
        match self {
            Self::Created => &[
                Self::PaymentSuccessful,
                Self::StockReserved,
                Self::PaymentFailed,
                Self::StockInsufficient,
                Self::Cancelled,
            ],
            // In the vocabulary but outside the event-driven flow: nothing
            // targets it and nothing is defined out of it.
            Self::PaymentPending => &[],
            Self::PaymentSuccessful => &[
                Self::StockReserved,
                Self::ReadyForShipping,
                Self::StockInsufficient,
                Self::Cancelled,
            ],
            Self::StockReserved => &[
                Self::PaymentSuccessful,
                Self::ReadyForShipping,
                Self::PaymentFailed,
                Self::Cancelled,
            ],
            Self::ReadyForShipping => &[Self::Shipped, Self::Cancelled],
            Self::Shipped => &[Self::Delivered, Self::Cancelled],
            Self::PaymentFailed | Self::StockInsufficient => &[Self::Cancelled],
            Self::Delivered | Self::Cancelled => &[],
        }
    }

    /// Whether moving to `target` is in the legal-transition table.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Whether the order has reached an end state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a status name from the database.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl EventType {
    /// The status an event drives the order toward, or `None` for events
    /// that carry no status semantics (unknown types are logged and acked).
    #[must_use]
    pub const fn target_status(self) -> Option<OrderStatus> {
        match self {
            Self::OrderCreated => Some(OrderStatus::Created),
            Self::PaymentSuccessful => Some(OrderStatus::PaymentSuccessful),
            Self::PaymentFailed => Some(OrderStatus::PaymentFailed),
            Self::StockReserved => Some(OrderStatus::StockReserved),
            Self::StockInsufficient => Some(OrderStatus::StockInsufficient),
            Self::OrderReadyForShipping => Some(OrderStatus::ReadyForShipping),
            Self::OrderShipped => Some(OrderStatus::Shipped),
            Self::OrderDelivered => Some(OrderStatus::Delivered),
            Self::OrderCancelled => Some(OrderStatus::Cancelled),
            Self::Unknown => None,
        }
    }
}

/// Outcome of evaluating one proposed status change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The change is legal and should be persisted with an audit row.
    Apply {
        /// Status before the transition.
        from: OrderStatus,
        /// Status after the transition.
        to: OrderStatus,
    },
    /// Target equals current. Accepted silently: ack, no write, no audit.
    ///
    /// At-least-once delivery makes duplicates routine; treating them as
    /// no-ops keeps replays convergent.
    SelfTransition(OrderStatus),
    /// The change is not in the legal table. Ack and leave state untouched.
    Rejected {
        /// Status the order is currently in.
        from: OrderStatus,
        /// Status the event asked for.
        to: OrderStatus,
    },
}

impl Transition {
    /// Evaluate a proposed move from `current` to `target`.
    #[must_use]
    pub fn evaluate(current: OrderStatus, target: OrderStatus) -> Self {
        if current == target {
            Self::SelfTransition(current)
        } else if current.can_transition_to(target) {
            Self::Apply {
                from: current,
                to: target,
            }
        } else {
            Self::Rejected {
                from: current,
                to: target,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_db_representation() {
        for status in [
            OrderStatus::Created,
            OrderStatus::PaymentPending,
            OrderStatus::PaymentSuccessful,
            OrderStatus::PaymentFailed,
            OrderStatus::StockReserved,
            OrderStatus::StockInsufficient,
            OrderStatus::ReadyForShipping,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Ok(status));
        }
        assert!(OrderStatus::parse("SHOPPING").is_err());
    }

    #[test]
    fn parallel_branches_commute() {
        // Payment first, then stock.
        assert!(OrderStatus::Created.can_transition_to(OrderStatus::PaymentSuccessful));
        assert!(OrderStatus::PaymentSuccessful.can_transition_to(OrderStatus::StockReserved));
        // Stock first, then payment.
        assert!(OrderStatus::Created.can_transition_to(OrderStatus::StockReserved));
        assert!(OrderStatus::StockReserved.can_transition_to(OrderStatus::PaymentSuccessful));
        // Both branches reach readiness.
        assert!(OrderStatus::PaymentSuccessful.can_transition_to(OrderStatus::ReadyForShipping));
        assert!(OrderStatus::StockReserved.can_transition_to(OrderStatus::ReadyForShipping));
    }

    #[test]
    fn failed_payment_does_not_accept_late_stock_reservation() {
        // A StockReserved event landing after PaymentFailed is stale; the
        // reservation row persists until expiry but the order stays failed.
        assert_eq!(
            Transition::evaluate(OrderStatus::PaymentFailed, OrderStatus::StockReserved),
            Transition::Rejected {
                from: OrderStatus::PaymentFailed,
                to: OrderStatus::StockReserved,
            }
        );
    }

    #[test]
    fn terminal_states_reject_everything() {
        for terminal in [OrderStatus::Delivered, OrderStatus::Cancelled] {
            assert!(terminal.is_terminal());
            for target in [
                OrderStatus::Created,
                OrderStatus::PaymentSuccessful,
                OrderStatus::Shipped,
                OrderStatus::Cancelled,
            ] {
                if target == terminal {
                    continue;
                }
                assert_eq!(
                    Transition::evaluate(terminal, target),
                    Transition::Rejected {
                        from: terminal,
                        to: target,
                    },
                    "{terminal} -> {target} must be rejected"
                );
            }
        }
    }

    #[test]
    fn duplicate_delivery_is_a_silent_self_transition() {
        assert_eq!(
            Transition::evaluate(
                OrderStatus::PaymentSuccessful,
                OrderStatus::PaymentSuccessful
            ),
            Transition::SelfTransition(OrderStatus::PaymentSuccessful)
        );
    }

    #[test]
    fn every_status_is_reachable_from_created() {
        // Breadth-first walk of the adjacency table. PAYMENT_PENDING is the
        // one vocabulary entry no event targets, so it is excluded.
        let mut reachable = vec![OrderStatus::Created];
        let mut frontier = vec![OrderStatus::Created];
        while let Some(status) = frontier.pop() {
            for &next in status.allowed_targets() {
                if !reachable.contains(&next) {
                    reachable.push(next);
                    frontier.push(next);
                }
            }
        }
        for status in [
            OrderStatus::PaymentSuccessful,
            OrderStatus::PaymentFailed,
            OrderStatus::StockReserved,
            OrderStatus::StockInsufficient,
            OrderStatus::ReadyForShipping,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert!(reachable.contains(&status), "{status} unreachable");
        }
    }

    #[test]
    fn event_target_map_covers_all_nine_events() {
        assert_eq!(
            EventType::OrderCreated.target_status(),
            Some(OrderStatus::Created)
        );
        assert_eq!(
            EventType::OrderReadyForShipping.target_status(),
            Some(OrderStatus::ReadyForShipping)
        );
        assert_eq!(
            EventType::OrderCancelled.target_status(),
            Some(OrderStatus::Cancelled)
        );
        assert_eq!(EventType::Unknown.target_status(), None);
    }

    #[test]
    fn status_serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&OrderStatus::ReadyForShipping).unwrap();
        assert_eq!(json, "\"READY_FOR_SHIPPING\"");
        let back: OrderStatus = serde_json::from_str("\"STOCK_INSUFFICIENT\"").unwrap();
        assert_eq!(back, OrderStatus::StockInsufficient);
    }
}
