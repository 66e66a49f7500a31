//! Domain-socket strategy: one socket file per endpoint under a fixed directory.

use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

use super::{Address, Leases, Transport};
use crate::error::TransportError;

/// Allocates `<dir>/procvisor-<uuid>.sock` paths.
#[derive(Debug)]
pub struct UnixSocketTransport {
    dir: PathBuf,
    leases: Leases,
}

impl UnixSocketTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            leases: Leases::default(),
        }
    }

    /// Directory holding the socket files.
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

#[async_trait]
impl Transport for UnixSocketTransport {
    fn name(&self) -> &'static str {
        "unix"
    }

    async fn allocate(&self) -> Result<Address, TransportError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(TransportError::Allocate)?;
        loop {
            let path = self.dir.join(format!("procvisor-{}.sock", Uuid::new_v4()));
            let address = Address::Unix(path);
            if address.artifact_exists() {
                continue;
            }
            if self.leases.insert(address.clone()) {
                return Ok(address);
            }
        }
    }

    async fn renew(&self, current: &Address) -> Result<Address, TransportError> {
        Ok(current.clone())
    }

    fn claim(&self, address: &Address) -> bool {
        self.leases.insert(address.clone())
    }

    fn release(&self, address: &Address) {
        self.leases.remove(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn allocates_unique_paths_under_dir() {
        let dir = tempfile::tempdir().unwrap();
        let t = UnixSocketTransport::new(dir.path().join("sockets"));

        let mut seen = HashSet::new();
        for _ in 0..64 {
            let addr = t.allocate().await.unwrap();
            match &addr {
                Address::Unix(p) => {
                    assert!(p.starts_with(t.dir()));
                    assert!(p.extension().is_some_and(|e| e == "sock"));
                }
                other => panic!("unexpected {other}"),
            }
            assert!(seen.insert(addr));
        }
        assert!(t.dir().is_dir());
    }

    #[tokio::test]
    async fn claim_rejects_leased_address_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let t = UnixSocketTransport::new(dir.path());
        let addr = t.allocate().await.unwrap();

        assert!(!t.claim(&addr));
        t.release(&addr);
        assert!(!t.leases.contains(&addr));
        assert!(t.claim(&addr));
        assert_eq!(t.renew(&addr).await.unwrap(), addr);
    }
}
