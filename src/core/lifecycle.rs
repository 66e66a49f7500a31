//! # Launch and teardown of worker processes.
//!
//! [`Context`] is the state shared by the supervisor, the supervision tasks and
//! the drain tasks. It implements the two halves of the lifecycle; callers hold
//! the handle's lock across each call so a worker never launches while its
//! previous run is still being torn down.
//!
//! ## Launch
//! ```text
//! reap leftovers ─► renew address ─► reclaim stale artifact ─► spawn child
//!   ─► bootstrap (stdin line | flags) ─► spawn drain task
//!   ─► poll address (start_attempts × start_poll_interval)
//!        ├─ child exited  → ExitedEarly
//!        └─ never ready   → kill child → StartTimeout
//!   ─► RpcClient + ping == "pong"
//!        ├─ ok   → spawn supervision task, running = true
//!        └─ fail → Dial (child kept, reaped by next stop/start)
//! ```
//!
//! ## Teardown
//! ```text
//! cancel token ─► supervision task: SIGTERM ─► wait stop_grace ─► SIGKILL ─► reap
//!              ─► drain task: final read + flush
//! ```

use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::config::{BootstrapMode, Config};
use super::drain::drain;
use super::metrics::{MetricsEvent, ProcessFailure, Sink};
use super::output::OutputBuffers;
use super::watch::supervise;
use crate::bootstrap::Bootstrap;
use crate::error::{RpcError, SupervisorError};
use crate::events::{Bus, Event, EventKind};
use crate::process::{HandleState, ProcessHandle, ProcessSpec, Reaper, Run};
use crate::rpc::{PING, RpcClient};
use crate::transport::{Address, Connection, Transport};

/// State shared by everything that launches, watches or stops workers.
pub(crate) struct Context {
    pub(crate) cfg: Config,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) bus: Bus,
    pub(crate) output: OutputBuffers,
    pub(crate) metrics: Sink<MetricsEvent>,
    pub(crate) failures: Sink<ProcessFailure>,
    pub(crate) supervisor_address: Option<Address>,
}

impl Context {
    /// Launches the worker of `handle`. `st` must be that handle's locked state.
    pub(crate) async fn launch(
        self: &Arc<Self>,
        handle: &Arc<ProcessHandle>,
        st: &mut HandleState,
    ) -> Result<(), SupervisorError> {
        let spec = handle.spec();
        if st.running {
            return Err(SupervisorError::already_running(spec.category(), spec.name()));
        }
        if let Some(pending) = st.pending_restart.take() {
            pending.cancel();
        }
        if let Some(stale) = st.run.take() {
            if let Err(e) = self.teardown(stale).await {
                tracing::warn!(key = %spec.key(), error = %e, "reaping previous run failed");
            }
        }
        if handle.allocated() && st.generation > 0 {
            st.address = self.transport.renew(&st.address).await?;
        }
        self.transport
            .reclaim(&st.address)
            .await
            .map_err(|source| SupervisorError::Reclaim {
                category: spec.category().to_string(),
                name: spec.name().to_string(),
                source,
            })?;

        self.bus.publish(
            Event::new(EventKind::ProcessStarting)
                .with_process(spec.category(), spec.name())
                .with_address(st.address.to_string()),
        );

        match self.launch_inner(handle, st).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.bus.publish(
                    Event::new(EventKind::StartFailed)
                        .with_process(spec.category(), spec.name())
                        .with_reason(format!("{}: {}", e.as_label(), e.as_message())),
                );
                Err(e)
            }
        }
    }

    async fn launch_inner(
        self: &Arc<Self>,
        handle: &Arc<ProcessHandle>,
        st: &mut HandleState,
    ) -> Result<(), SupervisorError> {
        let spec = handle.spec();
        let address = st.address.clone();
        let boot = Bootstrap::new(
            &address,
            self.supervisor_address.as_ref(),
            spec.config_payload(),
            spec.trust_token(),
        );
        let mut child = self.spawn(spec, &boot).await?;
        let pid = child.id();

        st.generation += 1;
        let generation = st.generation;
        let token = CancellationToken::new();
        let drain = tokio::spawn(drain(
            Arc::clone(self),
            Arc::from(spec.category()),
            Arc::from(spec.name()),
            child.stdout.take(),
            child.stderr.take(),
            token.clone(),
        ));

        let conn = match self.await_ready(spec, &mut child, &address).await {
            Ok(conn) => conn,
            Err(e) => {
                let _ = child.kill().await;
                token.cancel();
                let _ = drain.await;
                if let Err(re) = self.transport.reclaim(&address).await {
                    tracing::warn!(key = %spec.key(), error = %re, "reclaim after failed start");
                }
                return Err(e);
            }
        };

        st.pid = pid;
        let client = match self.handshake(spec, conn).await {
            Ok(client) => client,
            Err(source) => {
                st.run = Some(Run {
                    generation,
                    token,
                    drain,
                    reaper: Reaper::Unwatched(child),
                });
                return Err(SupervisorError::Dial {
                    category: spec.category().to_string(),
                    name: spec.name().to_string(),
                    address: address.to_string(),
                    source,
                });
            }
        };

        let watch = tokio::spawn(supervise(
            Arc::clone(self),
            Arc::clone(handle),
            child,
            token.clone(),
            generation,
        ));
        st.run = Some(Run {
            generation,
            token,
            drain,
            reaper: Reaper::Watched(watch),
        });
        st.client = Some(client);
        st.running = true;

        let mut ev = Event::new(EventKind::ProcessStarted)
            .with_process(spec.category(), spec.name())
            .with_address(address.to_string())
            .with_restarts(st.restarts);
        if let Some(pid) = pid {
            ev = ev.with_pid(pid);
        }
        self.bus.publish(ev);
        tracing::debug!(key = %spec.key(), %address, ?pid, "worker running");
        Ok(())
    }

    /// Spawns the child and delivers the bootstrap payload.
    async fn spawn(&self, spec: &ProcessSpec, boot: &Bootstrap) -> Result<Child, SupervisorError> {
        let spawn_err = |source| SupervisorError::Spawn {
            path: spec.executable_path().display().to_string(),
            source,
        };

        let mut cmd = Command::new(spec.executable_path());
        let line = match self.cfg.bootstrap {
            BootstrapMode::Stdin => {
                cmd.stdin(Stdio::piped());
                Some(boot.to_line().map_err(|e| spawn_err(io::Error::other(e)))?)
            }
            BootstrapMode::Args => {
                cmd.stdin(Stdio::null()).args(boot.to_args());
                None
            }
        };
        if self.cfg.bootstrap == BootstrapMode::Args && !spec.args().is_empty() {
            cmd.arg("--");
        }
        if !spec.environment().is_empty() {
            cmd.env_clear();
        }
        cmd.args(spec.args())
            .envs(spec.environment().iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(spawn_err)?;

        if let (Some(line), Some(mut stdin)) = (line, child.stdin.take()) {
            // A worker that dies before reading shows up as ExitedEarly.
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                tracing::debug!(key = %spec.key(), error = %e, "bootstrap write failed");
            }
            let _ = stdin.shutdown().await;
        }
        Ok(child)
    }

    /// Polls `address` until it accepts a connection.
    async fn await_ready(
        &self,
        spec: &ProcessSpec,
        child: &mut Child,
        address: &Address,
    ) -> Result<Connection, SupervisorError> {
        let attempts = self.cfg.start_attempts_clamped();
        let started = Instant::now();
        for attempt in 1..=attempts {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return Err(SupervisorError::ExitedEarly {
                        category: spec.category().to_string(),
                        name: spec.name().to_string(),
                        status: status.to_string(),
                    });
                }
                Ok(None) => {}
                Err(source) => {
                    return Err(SupervisorError::Spawn {
                        path: spec.executable_path().display().to_string(),
                        source,
                    });
                }
            }
            if let Ok(conn) = address.connect().await {
                return Ok(conn);
            }
            if attempt < attempts {
                tokio::time::sleep(self.cfg.start_poll_interval).await;
            }
        }
        Err(SupervisorError::StartTimeout {
            category: spec.category().to_string(),
            name: spec.name().to_string(),
            attempts,
            elapsed: started.elapsed(),
        })
    }

    /// Wraps the first connection in a client and checks `ping`.
    async fn handshake(&self, spec: &ProcessSpec, conn: Connection) -> Result<RpcClient, RpcError> {
        let token = (!spec.trust_token().is_empty()).then(|| spec.trust_token().to_string());
        let client = RpcClient::from_connection(conn, token);
        let budget = self.cfg.start_poll_interval * self.cfg.start_attempts_clamped();
        let reply = tokio::time::timeout(budget, client.call(PING, Vec::new()))
            .await
            .map_err(|_| RpcError::Unexpected(format!("no ping reply within {budget:?}")));
        match reply {
            Ok(Ok(serde_json::Value::String(s))) if s == "pong" => Ok(client),
            Ok(Ok(other)) => {
                client.close();
                Err(RpcError::Unexpected(format!("ping answered {other}")))
            }
            Ok(Err(e)) | Err(e) => {
                client.close();
                Err(e)
            }
        }
    }

    /// Stops the worker of `handle`. `st` must be that handle's locked state.
    ///
    /// The handle ends up not running even when an error is returned.
    pub(crate) async fn stop(&self, spec: &ProcessSpec, st: &mut HandleState) -> Result<(), SupervisorError> {
        if let Some(pending) = st.pending_restart.take() {
            pending.cancel();
        }
        let was_active = st.running || st.run.is_some();
        let pid = st.pid;
        let (client, run) = st.detach();
        if let Some(client) = client {
            client.close();
        }

        let mut result = Ok(());
        if let Some(run) = run {
            if let Err(source) = self.teardown(run).await {
                result = Err(SupervisorError::Terminate {
                    category: spec.category().to_string(),
                    name: spec.name().to_string(),
                    source,
                });
            }
        }
        if let Err(source) = self.transport.reclaim(&st.address).await {
            if result.is_ok() {
                result = Err(SupervisorError::Reclaim {
                    category: spec.category().to_string(),
                    name: spec.name().to_string(),
                    source,
                });
            }
        }

        match &result {
            Ok(()) if was_active => {
                let mut ev = Event::new(EventKind::ProcessStopped).with_process(spec.category(), spec.name());
                if let Some(pid) = pid {
                    ev = ev.with_pid(pid);
                }
                self.bus.publish(ev);
            }
            Ok(()) => {}
            Err(e) => self.bus.publish(
                Event::new(EventKind::StopFailed)
                    .with_process(spec.category(), spec.name())
                    .with_reason(e.as_message()),
            ),
        }
        result
    }

    /// Ends a run: cancels its token, terminates and reaps the child, joins both tasks.
    pub(crate) async fn teardown(&self, run: Run) -> io::Result<()> {
        run.token.cancel();
        let result = match run.reaper {
            Reaper::Watched(watch) => watch.await.unwrap_or_else(|e| Err(io::Error::other(e))),
            Reaper::Unwatched(mut child) => terminate(&mut child, self.cfg.stop_grace).await,
        };
        let _ = run.drain.await;
        result
    }
}

/// SIGTERM, then SIGKILL once `grace` elapses; always reaps.
pub(crate) async fn terminate(child: &mut Child, grace: Duration) -> io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(errno) => return Err(io::Error::from(errno)),
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.map(|_| ()),
        Err(_) => {
            tracing::warn!(pid, ?grace, "worker ignored SIGTERM, killing");
            child.kill().await
        }
    }
}
