//! # LogWriter: events as `tracing` records
//!
//! A subscriber that turns every [`Event`] into one structured `tracing` record.
//! Crash and failure events are logged at `warn`/`error`, the rest at `info`/`debug`.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO  procvisor: process started process="calc:add1" pid=4242 address="unix:/tmp/procvisor-….sock"
//! WARN  procvisor: process exited unexpectedly process="calc:add1" pid=4242 reason="signal: 9 (SIGKILL)"
//! INFO  procvisor: restart scheduled process="calc:add1" restarts=1 delay_ms=0
//! ```

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let process = e.key().unwrap_or_default();
        let reason = e.reason.as_deref().unwrap_or("");
        let address = e.address.as_deref().unwrap_or("");

        match e.kind {
            EventKind::ProcessRegistered => {
                debug!(target: "procvisor", %process, %address, "process registered");
            }
            EventKind::ProcessUnregistered => {
                debug!(target: "procvisor", %process, "process unregistered");
            }
            EventKind::ProcessStarting => {
                debug!(target: "procvisor", %process, %address, "process starting");
            }
            EventKind::ProcessStarted => {
                info!(target: "procvisor", %process, pid = ?e.pid, %address, "process started");
            }
            EventKind::StartFailed => {
                warn!(target: "procvisor", %process, %reason, "process start failed");
            }
            EventKind::ProcessStopped => {
                info!(target: "procvisor", %process, pid = ?e.pid, "process stopped");
            }
            EventKind::StopFailed => {
                warn!(target: "procvisor", %process, %reason, "process stop incomplete");
            }
            EventKind::ProcessExited => {
                warn!(target: "procvisor", %process, pid = ?e.pid, %reason, "process exited unexpectedly");
            }
            EventKind::RestartScheduled => {
                info!(target: "procvisor", %process, restarts = ?e.restarts, delay_ms = ?e.delay_ms, "restart scheduled");
            }
            EventKind::RestartFailed => {
                error!(target: "procvisor", %process, %reason, "restart failed");
            }
            EventKind::OutputFailed => {
                warn!(target: "procvisor", %process, %reason, "output capture failed");
            }
            EventKind::ChannelOverflow => {
                warn!(target: "procvisor", channel = %reason, "channel full, item dropped");
            }
            EventKind::SubscriberOverflow => {
                warn!(target: "procvisor", %reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                error!(target: "procvisor", %reason, "subscriber panicked");
            }
            EventKind::SupervisorStopped => {
                info!(target: "procvisor", "supervisor stopped");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
