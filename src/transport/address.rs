//! # Endpoint addresses, listeners and connections.
//!
//! An [`Address`] is either a pathname Unix socket or a loopback TCP endpoint.
//! Its textual form travels in the bootstrap payload and in events:
//!
//! ```text
//! unix:/tmp/procvisor-0b7c….sock
//! tcp:127.0.0.1:40123
//! ```
//!
//! Both sides use the same type: the worker [`bind`](Address::bind)s, the
//! supervisor [`connect`](Address::connect)s and later [`reclaim`](Address::reclaim)s.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

use crate::error::TransportError;

/// Socket files are world-accessible so that supervisor and worker may run
/// under different users.
const SOCKET_MODE: u32 = 0o777;

/// Bidirectional byte stream carried by a transport.
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Duplex for T {}

/// Type-erased connection returned by [`Address::connect`] and [`Listener::accept`].
pub type Connection = Box<dyn Duplex>;

/// Addressable endpoint of a worker or of the supervisor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    /// Pathname Unix domain socket.
    Unix(PathBuf),
    /// TCP endpoint (loopback in practice).
    Tcp(SocketAddr),
}

impl Address {
    /// Starts listening on this address.
    ///
    /// Unix sockets get mode `0777` once bound.
    pub async fn bind(&self) -> Result<Listener, TransportError> {
        let bind_err = |source| TransportError::Bind {
            address: self.to_string(),
            source,
        };
        match self {
            Address::Unix(path) => {
                let listener = UnixListener::bind(path).map_err(bind_err)?;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))
                    .map_err(bind_err)?;
                Ok(Listener::Unix {
                    inner: listener,
                    address: self.clone(),
                })
            }
            Address::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
                let bound = listener.local_addr().map_err(bind_err)?;
                Ok(Listener::Tcp {
                    inner: listener,
                    address: Address::Tcp(bound),
                })
            }
        }
    }

    /// Dials this address.
    pub async fn connect(&self) -> Result<Connection, TransportError> {
        let connect_err = |source| TransportError::Connect {
            address: self.to_string(),
            source,
        };
        match self {
            Address::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(connect_err)?;
                Ok(Box::new(stream))
            }
            Address::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await.map_err(connect_err)?;
                stream.set_nodelay(true).map_err(connect_err)?;
                Ok(Box::new(stream))
            }
        }
    }

    /// Removes the endpoint's filesystem artifact, if any.
    ///
    /// A socket file that is already gone counts as reclaimed. TCP endpoints
    /// leave nothing behind once their listener closes.
    pub async fn reclaim(&self) -> Result<(), TransportError> {
        match self {
            Address::Unix(path) => match tokio::fs::remove_file(path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(source) => Err(TransportError::Reclaim {
                    address: self.to_string(),
                    source,
                }),
            },
            Address::Tcp(_) => Ok(()),
        }
    }

    /// True if a socket file exists for this address (always false for TCP).
    pub fn artifact_exists(&self) -> bool {
        match self {
            Address::Unix(path) => path.exists(),
            Address::Tcp(_) => false,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Unix(path) => write!(f, "unix:{}", path.display()),
            Address::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

impl FromStr for Address {
    type Err = TransportError;

    /// Parses `unix:<path>`, `tcp:<ip>:<port>` or a bare absolute path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TransportError::InvalidAddress(s.to_string());
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(Address::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            return addr.parse().map(Address::Tcp).map_err(|_| invalid());
        }
        if s.starts_with('/') {
            return Ok(Address::Unix(PathBuf::from(s)));
        }
        Err(invalid())
    }
}

/// Listening endpoint produced by [`Address::bind`].
pub enum Listener {
    Unix { inner: UnixListener, address: Address },
    Tcp { inner: TcpListener, address: Address },
}

impl Listener {
    /// Accepts the next connection.
    pub async fn accept(&self) -> io::Result<Connection> {
        match self {
            Listener::Unix { inner, .. } => {
                let (stream, _) = inner.accept().await?;
                Ok(Box::new(stream))
            }
            Listener::Tcp { inner, .. } => {
                let (stream, _) = inner.accept().await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
        }
    }

    /// The address actually bound (TCP port `0` resolved).
    pub fn address(&self) -> &Address {
        match self {
            Listener::Unix { address, .. } | Listener::Tcp { address, .. } => address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn parses_and_formats() {
        let a: Address = "unix:/tmp/x.sock".parse().unwrap();
        assert_eq!(a, Address::Unix(PathBuf::from("/tmp/x.sock")));
        assert_eq!(a.to_string(), "unix:/tmp/x.sock");

        let b: Address = "tcp:127.0.0.1:8080".parse().unwrap();
        assert_eq!(b.to_string(), "tcp:127.0.0.1:8080");

        let bare: Address = "/run/w.sock".parse().unwrap();
        assert_eq!(bare, Address::Unix(PathBuf::from("/run/w.sock")));
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "unix:", "tcp:localhost", "tcp:1.2.3.4", "relative.sock", "udp:1.2.3.4:5"] {
            assert!(
                matches!(bad.parse::<Address>(), Err(TransportError::InvalidAddress(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn unix_bind_sets_mode_and_reclaim_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let addr = Address::Unix(dir.path().join("w.sock"));
        let listener = addr.bind().await.unwrap();

        let mode = std::fs::metadata(dir.path().join("w.sock"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o777);

        let accept = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).await.unwrap();
            buf
        });
        let mut client = addr.connect().await.unwrap();
        client.write_all(b"ping").await.unwrap();
        assert_eq!(&accept.await.unwrap(), b"ping");

        assert!(addr.artifact_exists());
        addr.reclaim().await.unwrap();
        assert!(!addr.artifact_exists());
        // Idempotent.
        addr.reclaim().await.unwrap();
    }

    #[tokio::test]
    async fn tcp_bind_resolves_port_zero() {
        let addr: Address = "tcp:127.0.0.1:0".parse().unwrap();
        let listener = addr.bind().await.unwrap();
        match listener.address() {
            Address::Tcp(sa) => assert_ne!(sa.port(), 0),
            other => panic!("unexpected address {other}"),
        }
        assert!(!listener.address().artifact_exists());
    }
}
