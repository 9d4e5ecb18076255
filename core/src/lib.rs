//! # orderbus core
//!
//! Core types and contracts for the orderbus order-processing pipeline.
//!
//! This crate defines everything the workers and the transport agree on:
//!
//! - **Wire events** ([`event`]): the JSON envelope published to the fan-out
//!   exchange and the typed metadata payloads that ride in it.
//! - **Order status machine** ([`status`]): the canonical per-order statuses,
//!   the legal-transition table, and the pure [`status::Transition`]
//!   evaluation the status reducer applies under concurrency.
//! - **Domain model** ([`model`]): the persisted rows (orders, items,
//!   products, reservations, payments, shipments, audit history).
//! - **Bus contract** ([`event_bus`]): the [`event_bus::EventBus`] and
//!   [`event_bus::EventHandler`] traits with at-least-once, manual-ack
//!   delivery semantics.
//!
//! # Delivery model
//!
//! Every published event is fanned out to every bound queue; workers filter
//! by [`event::EventType`]. Delivery is at-least-once, so every handler in
//! this workspace is written to be idempotent: duplicates and reordering are
//! normal operating conditions, not errors.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod environment;
pub mod event;
pub mod event_bus;
pub mod model;
pub mod status;

pub use chrono::{DateTime, Utc};
