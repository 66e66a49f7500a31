//! Transport allocation.
//!
//! A [`Transport`] hands out worker endpoints and guarantees that an address is
//! never handed out again while a handle still owns it. Two strategies exist,
//! selected per deployment by [`TransportKind`](crate::TransportKind):
//!
//! | Strategy            | Address                              | Reclaim                     |
//! |---------------------|--------------------------------------|-----------------------------|
//! | [`UnixSocketTransport`] | `<dir>/procvisor-<uuid>.sock`    | remove the socket file      |
//! | [`LoopbackTransport`]   | `127.0.0.1:<ephemeral port>`     | nothing (closes with listener) |
//!
//! ```text
//! register ──► allocate() ──► lease ─┬─► start ─► worker binds ─► stop ─► reclaim()
//!                                    └─► unregister / re-register ──────► release()
//! ```

mod address;
mod loopback;
mod unix;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

pub use address::{Address, Connection, Duplex, Listener};
pub use loopback::LoopbackTransport;
pub use unix::UnixSocketTransport;

use crate::core::TransportKind;
use crate::error::TransportError;

/// Endpoint allocation strategy.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Short strategy name (for logs).
    fn name(&self) -> &'static str;

    /// Produces a fresh address and leases it.
    async fn allocate(&self) -> Result<Address, TransportError>;

    /// Produces the address to use for the next run of an auto-allocated endpoint.
    ///
    /// Strategies whose addresses stay valid return `current` unchanged.
    async fn renew(&self, current: &Address) -> Result<Address, TransportError>;

    /// Leases a caller-supplied address; `false` if it is already leased.
    fn claim(&self, address: &Address) -> bool;

    /// Ends the lease of `address`.
    fn release(&self, address: &Address);

    /// Removes whatever the endpoint left behind once its listener is gone.
    async fn reclaim(&self, address: &Address) -> Result<(), TransportError> {
        address.reclaim().await
    }
}

/// Builds the transport selected by `kind`.
pub fn from_kind(kind: &TransportKind) -> Arc<dyn Transport> {
    match kind {
        TransportKind::UnixSocket { dir } => Arc::new(UnixSocketTransport::new(dir.clone())),
        TransportKind::Loopback => Arc::new(LoopbackTransport::new()),
    }
}

/// Set of addresses currently owned by a handle (or by the supervisor).
#[derive(Debug, Default)]
pub(crate) struct Leases {
    inner: Mutex<HashSet<Address>>,
}

impl Leases {
    /// Inserts `address`; `false` if it was already leased.
    pub(crate) fn insert(&self, address: Address) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address)
    }

    pub(crate) fn remove(&self, address: &Address) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address);
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, address: &Address) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(address)
    }
}
