//! # RPC server.
//!
//! Accepts connections until cancelled; each connection gets a reader task and
//! a writer task, each request its own task, so a slow procedure never blocks
//! other calls on the same connection. Panicking procedures are caught and
//! answered with an error.

use std::sync::Arc;

use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::procedure::Procedures;
use super::wire::{self, Request, Response};
use crate::transport::{Connection, Listener};

/// Serves a [`Procedures`] table.
#[derive(Clone, Debug)]
pub struct RpcServer {
    procedures: Arc<Procedures>,
    token: Option<Arc<str>>,
}

impl RpcServer {
    pub fn new(procedures: Procedures) -> Self {
        Self {
            procedures: Arc::new(procedures),
            token: None,
        }
    }

    /// Requires every request to carry `token`; others get `unauthorized`.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty()).map(Arc::from);
        self
    }

    /// Accepts connections on `listener` until `shutdown` is cancelled.
    pub async fn serve(self, listener: Listener, shutdown: CancellationToken) {
        let address = listener.address().to_string();
        tracing::debug!(%address, "rpc server listening");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => {
                        tokio::spawn(self.clone().serve_connection(conn, shutdown.child_token()));
                    }
                    Err(e) => {
                        tracing::warn!(%address, error = %e, "accept failed");
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }
        }
        tracing::debug!(%address, "rpc server stopped");
    }

    /// Serves one connection until the peer hangs up or `shutdown` fires.
    pub async fn serve_connection(self, conn: Connection, shutdown: CancellationToken) {
        let (mut reader, mut writer) = wire::framed(conn);
        let (tx, mut rx) = mpsc::unbounded_channel::<Response>();

        let writer_task = tokio::spawn(async move {
            while let Some(resp) = rx.recv().await {
                let line = match serde_json::to_string(&resp) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(id = resp.id, error = %e, "reply not encodable");
                        continue;
                    }
                };
                if writer.send(line).await.is_err() {
                    break;
                }
            }
            let _ = SinkExt::<String>::close(&mut writer).await;
        });

        loop {
            let line = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = reader.next() => match next {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "rpc connection read failed");
                        break;
                    }
                    None => break,
                }
            };

            let req = match serde_json::from_str::<Request>(&line) {
                Ok(req) => req,
                Err(e) => {
                    let _ = tx.send(Response::err(0, format!("malformed request: {e}")));
                    continue;
                }
            };

            let me = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(me.dispatch(req).await);
            });
        }

        drop(tx);
        if shutdown.is_cancelled() {
            writer_task.abort();
        }
        let _ = writer_task.await;
    }

    async fn dispatch(&self, req: Request) -> Response {
        if let Some(expected) = &self.token {
            if req.token.as_deref() != Some(expected.as_ref()) {
                return Response::err(req.id, "unauthorized");
            }
        }
        let Some(procedure) = self.procedures.get(&req.method) else {
            return Response::err(req.id, format!("unknown method {:?}", req.method));
        };

        let fut = procedure.call(req.params);
        match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => Response::ok(req.id, value),
            Ok(Err(e)) => Response::err(req.id, e.to_string()),
            Err(_) => {
                tracing::error!(method = %req.method, "procedure panicked");
                Response::err(req.id, format!("procedure {:?} panicked", req.method))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProcedureError, RpcError};
    use crate::rpc::RpcClient;
    use serde_json::json;
    use std::time::Duration;

    fn calc() -> Procedures {
        let mut procs = Procedures::new();
        procs
            .register_fn("Add", |(a, b): (i64, i64)| async move { Ok(a + b) })
            .unwrap();
        procs
            .register_fn("Sleep", |ms: u64| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(ms)
            })
            .unwrap();
        procs
            .register_fn("Fail", |(): ()| async move {
                Err::<(), _>(ProcedureError::failed("boom"))
            })
            .unwrap();
        procs
            .register_fn("Panic", |(): ()| async move {
                if true {
                    panic!("kaboom");
                }
                Ok(())
            })
            .unwrap();
        procs
    }

    fn pair(server: RpcServer, token: Option<String>) -> (RpcClient, CancellationToken) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let stop = CancellationToken::new();
        tokio::spawn(server.serve_connection(Box::new(b), stop.clone()));
        (RpcClient::from_connection(Box::new(a), token), stop)
    }

    #[tokio::test]
    async fn calls_round_trip() {
        let (client, _stop) = pair(RpcServer::new(calc()), None);
        assert_eq!(client.call("ping", vec![]).await.unwrap(), json!("pong"));
        assert_eq!(
            client.call("Add", vec![json!(2), json!(3)]).await.unwrap(),
            json!(5)
        );
    }

    #[tokio::test]
    async fn errors_come_back_as_remote() {
        let (client, _stop) = pair(RpcServer::new(calc()), None);

        let err = client.call("Fail", vec![]).await.unwrap_err();
        assert!(matches!(&err, RpcError::Remote(m) if m == "boom"));

        let err = client.call("Nope", vec![]).await.unwrap_err();
        assert!(matches!(&err, RpcError::Remote(m) if m.contains("unknown method")));

        let err = client.call("Panic", vec![]).await.unwrap_err();
        assert!(matches!(&err, RpcError::Remote(m) if m.contains("panicked")));

        // The connection survives all of the above.
        assert_eq!(client.call("ping", vec![]).await.unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn concurrent_calls_are_multiplexed() {
        let (client, _stop) = pair(RpcServer::new(calc()), None);

        let slow = {
            let c = client.clone();
            tokio::spawn(async move { c.call("Sleep", vec![json!(200)]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let fast = tokio::time::timeout(Duration::from_millis(150), client.call("ping", vec![]))
            .await
            .expect("ping must not wait behind Sleep")
            .unwrap();
        assert_eq!(fast, json!("pong"));
        assert_eq!(slow.await.unwrap().unwrap(), json!(200));
    }

    #[tokio::test]
    async fn token_is_enforced() {
        let server = RpcServer::new(calc()).with_token(Some("secret".into()));

        let (bad, _s1) = pair(server.clone(), Some("wrong".into()));
        let err = bad.call("ping", vec![]).await.unwrap_err();
        assert!(matches!(&err, RpcError::Remote(m) if m == "unauthorized"));

        let (good, _s2) = pair(server, Some("secret".into()));
        assert_eq!(good.call("ping", vec![]).await.unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn pending_calls_fail_when_server_goes_away() {
        let (client, stop) = pair(RpcServer::new(calc()), None);

        let pending = {
            let c = client.clone();
            tokio::spawn(async move { c.call("Sleep", vec![json!(5_000)]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.cancel();

        let err = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("pending call must be released")
            .unwrap()
            .unwrap_err();
        assert!(err.is_disconnect());

        let err = client.call("ping", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Closed));
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn close_releases_local_callers() {
        let (client, _stop) = pair(RpcServer::new(calc()), None);
        client.close();
        assert!(matches!(
            client.call("ping", vec![]).await.unwrap_err(),
            RpcError::Closed
        ));
    }
}
