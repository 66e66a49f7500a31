//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by the supervisor, its
//! supervision tasks and its output drain tasks.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor` (register/start/stop), `watch::run` (crash and restart),
//!   `drain::run` (output failures), `SubscriberSet` workers (overflow/panic).
//! - **Consumer**: the listener spawned by `SupervisorBuilder::build`, which fans
//!   out to the [`SubscriberSet`](crate::SubscriberSet).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
