//! # Multiplexing RPC client.
//!
//! One reader task routes replies to waiting callers by `id`; one writer task
//! serializes outgoing lines. When the connection ends, every pending call
//! (and every later one) fails with [`RpcError::Closed`].
//!
//! ```text
//! call() ─► pending[id] = oneshot ─► outbound ─► writer ─► socket
//!                 ▲                                          │
//!                 └──────── reader ◄─ {"id":..} ◄────────────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::wire::{self, LineReader, LineWriter, Request, Response};
use crate::error::RpcError;
use crate::transport::{Address, Connection};

type Reply = Result<Value, RpcError>;

/// Waiters keyed by request id; `open = false` once the connection is gone.
struct Pending {
    open: bool,
    waiters: HashMap<u64, oneshot::Sender<Reply>>,
}

struct Shared {
    pending: Mutex<Pending>,
}

impl Shared {
    fn fail_all(&self) {
        let waiters = {
            let mut p = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            p.open = false;
            std::mem::take(&mut p.waiters)
        };
        for (_, tx) in waiters {
            let _ = tx.send(Err(RpcError::Closed));
        }
    }

    fn complete(&self, resp: Response) {
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .waiters
            .remove(&resp.id);
        let Some(tx) = waiter else {
            tracing::debug!(id = resp.id, "reply without a pending call");
            return;
        };
        let reply = match resp.error {
            Some(e) => Err(RpcError::Remote(e)),
            None => Ok(resp.result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(reply);
    }
}

struct Inner {
    next_id: AtomicU64,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<String>,
    token: Option<String>,
    closed: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Handle to one RPC connection. Clones share the connection.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RpcClient {
    /// Dials `address` and starts the connection tasks.
    ///
    /// `token` is attached to every request.
    pub async fn connect(address: &Address, token: Option<String>) -> Result<Self, RpcError> {
        let conn = address.connect().await?;
        Ok(Self::from_connection(conn, token))
    }

    /// Wraps an established connection. Must be called inside a tokio runtime.
    pub fn from_connection(conn: Connection, token: Option<String>) -> Self {
        let (reader, writer) = wire::framed(conn);
        let (outbound, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending {
                open: true,
                waiters: HashMap::new(),
            }),
        });
        let closed = CancellationToken::new();

        tokio::spawn(read_loop(reader, Arc::clone(&shared), closed.clone()));
        tokio::spawn(write_loop(writer, rx, Arc::clone(&shared), closed.clone()));

        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                shared,
                outbound,
                token,
                closed,
            }),
        }
    }

    /// Invokes `method` with positional `params` and waits for the reply.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&Request {
            id,
            method: method.to_string(),
            params,
            token: self.inner.token.clone(),
        })?;

        let (tx, rx) = oneshot::channel();
        {
            let mut p = self
                .inner
                .shared
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !p.open {
                return Err(RpcError::Closed);
            }
            p.waiters.insert(id, tx);
        }

        if self.inner.outbound.send(line).is_err() {
            self.inner
                .shared
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .waiters
                .remove(&id);
            return Err(RpcError::Closed);
        }

        rx.await.map_err(|_| RpcError::Closed)?
    }

    /// Closes the connection; pending calls fail with [`RpcError::Closed`].
    pub fn close(&self) {
        self.inner.closed.cancel();
        self.inner.shared.fail_all();
    }

    /// True once the connection is closed (locally or by the peer).
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }
}

async fn read_loop(mut reader: LineReader, shared: Arc<Shared>, closed: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            next = reader.next() => match next {
                Some(Ok(line)) => match serde_json::from_str::<Response>(&line) {
                    Ok(resp) => shared.complete(resp),
                    Err(e) => tracing::warn!(error = %e, "malformed reply dropped"),
                },
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "rpc connection read failed");
                    break;
                }
                None => break,
            }
        }
    }
    closed.cancel();
    shared.fail_all();
}

async fn write_loop(
    mut writer: LineWriter,
    mut rx: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            line = rx.recv() => match line {
                Some(line) => {
                    if let Err(e) = writer.send(line).await {
                        tracing::debug!(error = %e, "rpc connection write failed");
                        break;
                    }
                }
                None => break,
            }
        }
    }
    closed.cancel();
    shared.fail_all();
    let _ = SinkExt::<String>::close(&mut writer).await;
}
