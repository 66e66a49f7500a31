//! # Supervisor-side record of one worker.
//!
//! The spec is immutable; everything that changes across runs lives in
//! [`HandleState`] behind the handle's own mutex, so workers never contend
//! with each other.
//!
//! ```text
//! Registered ─start─► Starting ─► Running ─stop─► Stopping ─► Registered
//!                                    │
//!                                    └─exit─► Crashed ─► Restarting ─► Running
//! ```

use std::io;

use tokio::process::Child;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ProcessSpec;
use crate::rpc::RpcClient;
use crate::transport::Address;

/// Who reaps the OS process of a run.
pub(crate) enum Reaper {
    /// The supervision task owns the child and reports how termination went.
    Watched(JoinHandle<io::Result<()>>),
    /// Nobody watches the child (its handshake failed); reaped on the next stop or start.
    Unwatched(Child),
}

/// Resources of one launched OS process.
pub(crate) struct Run {
    pub(crate) generation: u64,
    pub(crate) token: CancellationToken,
    pub(crate) drain: JoinHandle<()>,
    pub(crate) reaper: Reaper,
}

/// Mutable part of a handle.
pub(crate) struct HandleState {
    pub(crate) running: bool,
    pub(crate) address: Address,
    pub(crate) pid: Option<u32>,
    pub(crate) client: Option<RpcClient>,
    pub(crate) run: Option<Run>,
    /// Cancels a crash-triggered restart that is still waiting.
    pub(crate) pending_restart: Option<CancellationToken>,
    pub(crate) restarts: u32,
    /// Bumped on every launch and every explicit stop.
    pub(crate) generation: u64,
}

pub(crate) struct ProcessHandle {
    spec: ProcessSpec,
    /// The address came from the transport rather than from the spec.
    allocated: bool,
    state: Mutex<HandleState>,
}

impl ProcessHandle {
    pub(crate) fn new(spec: ProcessSpec, address: Address, allocated: bool) -> Self {
        Self {
            spec,
            allocated,
            state: Mutex::new(HandleState {
                running: false,
                address,
                pid: None,
                client: None,
                run: None,
                pending_restart: None,
                restarts: 0,
                generation: 0,
            }),
        }
    }

    pub(crate) fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub(crate) fn allocated(&self) -> bool {
        self.allocated
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().await
    }
}

impl HandleState {
    /// Clears everything tied to the current run and returns what must be torn down.
    pub(crate) fn detach(&mut self) -> (Option<RpcClient>, Option<Run>) {
        self.running = false;
        self.pid = None;
        self.generation += 1;
        (self.client.take(), self.run.take())
    }
}

/// Snapshot row returned by [`Supervisor::list`](crate::Supervisor::list).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessStatus {
    pub category: String,
    pub name: String,
    pub address: Address,
    pub running: bool,
    pub pid: Option<u32>,
    pub restarts: u32,
}
