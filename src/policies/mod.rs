//! Restart delay policies.
//!
//! Crash recovery restarts a worker as soon as its exit is observed. A worker
//! that keeps crashing therefore produces a restart storm unless the embedding
//! application configures a delay. These types are that extension point.
//!
//! ## Contents
//! - [`BackoffPolicy`] how the delay evolves with consecutive restarts (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization that keeps a fleet of crashing workers from restarting in lockstep
//!
//! ## Wiring
//! ```text
//! Config { restart_backoff: Option<BackoffPolicy>, .. }
//!      └─► supervision task on crash:
//!           - None        → restart immediately
//!           - Some(policy) → sleep(policy.next(handle.restarts)) (cancelled by stop) → restart
//! ```

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
