//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] used by the
//! supervisor, the supervision tasks and the drain tasks to publish lifecycle
//! events without ever blocking.
//!
//! ```text
//! Publishers (many):                 Subscriber (one):
//!   Supervisor ─────┐
//!   watch task N ───┼──────► Bus ───────► listener ────► SubscriberSet
//!   drain task N ───┘  (broadcast chan)  (in builder)
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` calls `broadcast::Sender::send` and returns.
//! - **Bounded capacity**: one ring buffer stores the most recent events for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no active receivers at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers; dropped if there are none.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that observes events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
