//! # Runtime events emitted by the supervisor.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Registry events**: a spec was registered or removed
//! - **Lifecycle events**: start/stop flow of one worker
//! - **Recovery events**: crash detection and automatic restart
//! - **Pipeline events**: output capture failures, channel overflow, subscriber failures
//!
//! The [`Event`] struct carries additional metadata such as timestamps, the worker
//! key, its PID and address, reasons and restart delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use procvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ProcessExited)
//!     .with_process("calc", "add1")
//!     .with_pid(4242)
//!     .with_reason("signal: 9 (SIGKILL)");
//!
//! assert_eq!(ev.kind, EventKind::ProcessExited);
//! assert_eq!(ev.key().as_deref(), Some("calc:add1"));
//! assert_eq!(ev.pid, Some(4242));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Registry ===
    /// A spec was stored (new handle, not running).
    ///
    /// Sets: `category`, `name`, `address`
    ProcessRegistered,

    /// A handle was removed from the registry.
    ///
    /// Sets: `category`, `name`
    ProcessUnregistered,

    // === Lifecycle ===
    /// The executable is being spawned.
    ///
    /// Sets: `category`, `name`, `address`
    ProcessStarting,

    /// The worker answered `ping` and is callable.
    ///
    /// Sets: `category`, `name`, `address`, `pid`
    ProcessStarted,

    /// `start` failed (spawn, timeout, early exit or dial failure).
    ///
    /// Sets: `category`, `name`, `reason`
    StartFailed,

    /// The worker was stopped on request and its transport reclaimed.
    ///
    /// Sets: `category`, `name`, `pid` (if it was running)
    ProcessStopped,

    /// `stop` finished with a termination or reclamation error.
    ///
    /// Sets: `category`, `name`, `reason`
    StopFailed,

    // === Recovery ===
    /// The worker exited without being asked to (crash).
    ///
    /// Sets: `category`, `name`, `pid`, `reason` (exit status)
    ProcessExited,

    /// A crash-triggered restart is about to run.
    ///
    /// Sets: `category`, `name`, `restarts` (count so far), `delay_ms` (if backoff is configured)
    RestartScheduled,

    /// The crash-triggered restart failed.
    ///
    /// Sets: `category`, `name`, `reason`
    RestartFailed,

    // === Pipelines ===
    /// Reading a worker's stdout/stderr failed.
    ///
    /// Sets: `category`, `name`, `reason`
    OutputFailed,

    /// A metrics event or process failure was dropped (channel full).
    ///
    /// Sets: `reason` (`"metrics"` or `"errors"`)
    ChannelOverflow,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason` (`subscriber=<name> reason=<full|closed>`)
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `reason` (panic message)
    SubscriberPanicked,

    // === Supervisor ===
    /// `shutdown` completed: every worker was stopped and the supervisor endpoint closed.
    SupervisorStopped,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Worker category, if applicable.
    pub category: Option<Arc<str>>,
    /// Worker name, if applicable.
    pub name: Option<Arc<str>>,
    /// OS process id.
    pub pid: Option<u32>,
    /// Textual transport address (`unix:..` / `tcp:..`).
    pub address: Option<Arc<str>>,
    /// Human-readable reason (errors, exit status, overflow details).
    pub reason: Option<Arc<str>>,
    /// Number of crash-triggered restarts the handle went through.
    pub restarts: Option<u32>,
    /// Delay before the restart in milliseconds (compact).
    pub delay_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            category: None,
            name: None,
            pid: None,
            address: None,
            reason: None,
            restarts: None,
            delay_ms: None,
        }
    }

    /// Attaches the worker key.
    #[inline]
    pub fn with_process(mut self, category: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        self.category = Some(category.into());
        self.name = Some(name.into());
        self
    }

    /// Attaches an OS process id.
    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches a transport address.
    #[inline]
    pub fn with_address(mut self, address: impl Into<Arc<str>>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches the restart counter.
    #[inline]
    pub fn with_restarts(mut self, n: u32) -> Self {
        self.restarts = Some(n);
        self
    }

    /// Attaches a restart delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Returns `category:name` when both are set.
    pub fn key(&self) -> Option<String> {
        match (&self.category, &self.name) {
            (Some(c), Some(n)) => Some(format!("{c}:{n}")),
            _ => None,
        }
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} panic={info}"))
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }
}
