//! Loopback-port strategy: ephemeral TCP ports on `127.0.0.1`.
//!
//! The port is discovered by binding port `0` and reading back what the OS
//! assigned. The probe listener is closed right away so the worker can bind
//! the same port; because another process may grab it in between, restarts
//! [`renew`](Transport::renew) the port instead of reusing it.

use std::net::{Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::TcpListener;

use super::{Address, Leases, Transport};
use crate::error::TransportError;

/// Upper bound on probes that return an already leased port.
const MAX_PROBES: usize = 64;

/// Allocates ephemeral loopback ports.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    leases: Leases,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn probe() -> Result<SocketAddr, TransportError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(TransportError::Allocate)?;
        listener.local_addr().map_err(TransportError::Allocate)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn allocate(&self) -> Result<Address, TransportError> {
        for _ in 0..MAX_PROBES {
            let address = Address::Tcp(Self::probe().await?);
            if self.leases.insert(address.clone()) {
                return Ok(address);
            }
        }
        Err(TransportError::Allocate(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            "every probed port is already leased",
        )))
    }

    async fn renew(&self, current: &Address) -> Result<Address, TransportError> {
        let next = self.allocate().await?;
        self.release(current);
        Ok(next)
    }

    fn claim(&self, address: &Address) -> bool {
        self.leases.insert(address.clone())
    }

    fn release(&self, address: &Address) {
        self.leases.remove(address);
    }
}
