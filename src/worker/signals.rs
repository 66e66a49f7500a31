//! Termination signals a worker reacts to.
//!
//! Listeners are registered up front so a signal that arrives while the
//! worker is still binding is not handled by the default disposition.

use std::io;

use tokio::signal::unix::{Signal, SignalKind, signal};

pub(crate) struct Termination {
    sigint: Signal,
    sigterm: Signal,
    sigquit: Signal,
}

impl Termination {
    pub(crate) fn register() -> io::Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    /// Completes with the name of the first signal received.
    pub(crate) async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigquit.recv() => "SIGQUIT",
        }
    }
}
