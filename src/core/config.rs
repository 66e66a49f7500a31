//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the supervisor runtime.
//!
//! Config is consumed once, by `Supervisor::builder(config)`; the strategy
//! choices it holds (transport, bootstrap delivery) apply to the whole deployment.
//!
//! ## Sentinel values
//! - `start_attempts = 0` → treated as 1 (at least one readiness probe)
//! - `*_capacity = 0` → clamped to 1
//! - `restart_backoff = None` → crashed workers restart immediately

use std::path::PathBuf;
use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Which transport strategy allocates worker endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// Pathname Unix domain sockets created under `dir`.
    UnixSocket {
        /// Directory that holds the socket files.
        dir: PathBuf,
    },
    /// Ephemeral TCP ports on `127.0.0.1`.
    Loopback,
}

impl Default for TransportKind {
    /// Unix sockets under the system temporary directory.
    fn default() -> Self {
        TransportKind::UnixSocket {
            dir: std::env::temp_dir(),
        }
    }
}

/// How the bootstrap payload reaches a freshly spawned worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BootstrapMode {
    /// One JSON line written to the child's stdin, then stdin is closed.
    #[default]
    Stdin,
    /// `--address`, `--supervisor`, `--token` and `--config` (base64) flags.
    Args,
}

/// What a producer does when a bounded metrics/error channel is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the item and count it; never stall the producer.
    #[default]
    Drop,
    /// Wait for free capacity (back-pressure reaches the caller).
    ///
    /// Someone must drain the receivers: a full, unread channel stalls `call`
    /// and crash handling. Output read failures never wait and are dropped
    /// when the failure channel is full.
    Block,
}

/// Global configuration for the supervisor runtime.
///
/// Defines:
/// - **Transport**: socket or loopback endpoints, bootstrap delivery
/// - **Startup**: readiness polling budget
/// - **Supervision**: liveness poll, stop grace, optional restart backoff
/// - **Pipelines**: output drain interval, channel capacities and overflow behavior
///
/// ## Notes
/// All fields are public for flexibility. Prefer the helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Endpoint allocation strategy for workers and for the supervisor itself.
    pub transport: TransportKind,

    /// Delivery of the bootstrap payload to workers.
    pub bootstrap: BootstrapMode,

    /// Number of readiness probes before `start` gives up with `StartTimeout`.
    pub start_attempts: u32,

    /// Delay between two readiness probes.
    pub start_poll_interval: Duration,

    /// Period of the liveness fallback probe run by each supervision task.
    pub liveness_interval: Duration,

    /// Period at which captured output is flushed into the shared buffers.
    pub drain_interval: Duration,

    /// Time a worker gets to exit after SIGTERM before it is killed.
    pub stop_grace: Duration,

    /// Capacity of the metrics channel.
    pub metrics_capacity: usize,

    /// Capacity of the process error channel.
    pub errors_capacity: usize,

    /// Capacity of the event bus broadcast ring buffer.
    pub bus_capacity: usize,

    /// Behavior of the metrics and error channels when full.
    pub overflow: OverflowPolicy,

    /// Delay policy applied before a crash-triggered restart (`None` = immediate).
    pub restart_backoff: Option<BackoffPolicy>,
}

impl Config {
    /// Returns the readiness probe budget, at least 1.
    #[inline]
    pub fn start_attempts_clamped(&self) -> u32 {
        self.start_attempts.max(1)
    }

    /// Returns the metrics channel capacity clamped to a minimum of 1.
    #[inline]
    pub fn metrics_capacity_clamped(&self) -> usize {
        self.metrics_capacity.max(1)
    }

    /// Returns the error channel capacity clamped to a minimum of 1.
    #[inline]
    pub fn errors_capacity_clamped(&self) -> usize {
        self.errors_capacity.max(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the delay before restart number `restarts` (0-based), if backoff is configured.
    #[inline]
    pub fn restart_delay(&self, restarts: u32) -> Option<Duration> {
        self.restart_backoff.map(|b| b.next(restarts))
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `transport = UnixSocket { dir: temp_dir() }`
    /// - `bootstrap = Stdin`
    /// - `start_attempts = 50`, `start_poll_interval = 100ms`
    /// - `liveness_interval = 100ms`, `drain_interval = 100ms`
    /// - `stop_grace = 5s`
    /// - `metrics_capacity = errors_capacity = bus_capacity = 1024`
    /// - `overflow = Drop`
    /// - `restart_backoff = None`
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            bootstrap: BootstrapMode::default(),
            start_attempts: 50,
            start_poll_interval: Duration::from_millis(100),
            liveness_interval: Duration::from_millis(100),
            drain_interval: Duration::from_millis(100),
            stop_grace: Duration::from_secs(5),
            metrics_capacity: 1024,
            errors_capacity: 1024,
            bus_capacity: 1024,
            overflow: OverflowPolicy::default(),
            restart_backoff: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::JitterPolicy;

    #[test]
    fn sentinels_are_clamped() {
        let cfg = Config {
            start_attempts: 0,
            metrics_capacity: 0,
            errors_capacity: 0,
            bus_capacity: 0,
            ..Config::default()
        };
        assert_eq!(cfg.start_attempts_clamped(), 1);
        assert_eq!(cfg.metrics_capacity_clamped(), 1);
        assert_eq!(cfg.errors_capacity_clamped(), 1);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }

    #[test]
    fn restart_delay_follows_backoff() {
        let mut cfg = Config::default();
        assert_eq!(cfg.restart_delay(3), None);

        cfg.restart_backoff = Some(BackoffPolicy {
            first: Duration::from_millis(50),
            max: Duration::from_secs(1),
            factor: 2.0,
            jitter: JitterPolicy::None,
        });
        assert_eq!(cfg.restart_delay(0), Some(Duration::from_millis(50)));
        assert_eq!(cfg.restart_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(cfg.restart_delay(20), Some(Duration::from_secs(1)));
    }

    #[test]
    fn defaults_use_unix_sockets_and_stdin() {
        let cfg = Config::default();
        assert!(matches!(cfg.transport, TransportKind::UnixSocket { .. }));
        assert_eq!(cfg.bootstrap, BootstrapMode::Stdin);
        assert_eq!(cfg.overflow, OverflowPolicy::Drop);
    }
}
