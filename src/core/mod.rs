//! Runtime core: registry, lifecycle and call routing.
//!
//! The public API of this module is [`Supervisor`] (built via
//! [`SupervisorBuilder`]) plus the value types it hands out.
//!
//! Internal modules:
//! - [`registry`]: category → name → handle map;
//! - [`lifecycle`]: launch, stop and teardown of one worker;
//! - [`watch`]: supervision task, crash detection and restart;
//! - [`drain`]: stdout/stderr capture into [`OutputBuffers`];
//! - [`metrics`]: bounded metrics/failure channels;
//! - [`router`]: URN parsing and argument encoding.

mod builder;
mod config;
mod drain;
mod lifecycle;
mod metrics;
mod output;
mod registry;
mod router;
mod supervisor;
mod watch;

pub use builder::SupervisorBuilder;
pub use config::{BootstrapMode, Config, OverflowPolicy, TransportKind};
pub use metrics::{FailureKind, MetricsEvent, ProcessFailure};
pub use output::{OutputBuffers, Stream};
pub use router::Urn;
pub use supervisor::Supervisor;
