//! # Supervision task: one per running worker.
//!
//! Races, in priority order:
//! 1. the run's termination token → explicit stop: terminate, reap, exit;
//! 2. the child's exit → crash: tear the run down and schedule a restart;
//! 3. a liveness tick (`liveness_interval`) → signal-0 probe as a fallback.
//!
//! ```text
//! loop {
//!   select! (biased) {
//!     token.cancelled()  ─► terminate(child, stop_grace) ─► return
//!     child.wait()       ─► on_exit() ─► return
//!     tick               ─► probe pid ─► gone? on_exit()
//!   }
//! }
//!
//! on_exit:  lock handle (or yield to a stop) ─► same generation & running?
//!           ├─ no  → a stop won the race, nothing to do
//!           └─ yes → detach, close client, join drain, reclaim,
//!                    ProcessExited + ProcessFailure(Exited),
//!                    RestartScheduled ─► spawn restart()
//! restart:  sleep backoff (cancellable) ─► lock ─► launch
//!           └─ failure → RestartFailed + ProcessFailure(RestartFailed)
//! ```

use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use nix::sys::signal;
use nix::unistd::Pid;
use tokio::process::Child;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::lifecycle::{Context, terminate};
use super::metrics::{FailureKind, ProcessFailure};
use crate::events::{Event, EventKind};
use crate::process::ProcessHandle;

pub(crate) async fn supervise(
    ctx: Arc<Context>,
    handle: Arc<ProcessHandle>,
    mut child: Child,
    token: CancellationToken,
    generation: u64,
) -> io::Result<()> {
    let pid = child.id();
    let mut tick = tokio::time::interval(ctx.cfg.liveness_interval.max(Duration::from_millis(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await;

    let status = loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return terminate(&mut child, ctx.cfg.stop_grace).await,
            status = child.wait() => break status,
            _ = tick.tick() => {
                if let Some(status) = probe(&mut child, pid) {
                    break status;
                }
            }
        }
    };

    on_exit(ctx, handle, token, generation, status).await;
    Ok(())
}

/// Fallback liveness check; `Some` once the process is known to be gone.
fn probe(child: &mut Child, pid: Option<u32>) -> Option<io::Result<ExitStatus>> {
    match child.try_wait() {
        Ok(Some(status)) => return Some(Ok(status)),
        Ok(None) => {}
        Err(e) => return Some(Err(e)),
    }
    let pid = pid?;
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Err(nix::errno::Errno::ESRCH) => Some(Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("pid {pid} no longer exists"),
        ))),
        _ => None,
    }
}

async fn on_exit(
    ctx: Arc<Context>,
    handle: Arc<ProcessHandle>,
    token: CancellationToken,
    generation: u64,
    status: io::Result<ExitStatus>,
) {
    let spec = handle.spec();
    let reason = match &status {
        Ok(s) => s.to_string(),
        Err(e) => format!("wait failed: {e}"),
    };

    // A stop holding the lock cancels the token before joining this task.
    let mut st = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        st = handle.lock() => st,
    };
    if st.generation != generation || !st.running {
        return;
    }

    let pid = st.pid;
    let (client, run) = st.detach();
    if let Some(client) = client {
        client.close();
    }
    if let Some(run) = run {
        run.token.cancel();
        let _ = run.drain.await;
    }
    let reclaim = ctx.transport.reclaim(&st.address).await;

    let restarts = st.restarts;
    st.restarts = st.restarts.saturating_add(1);
    let pending = CancellationToken::new();
    st.pending_restart = Some(pending.clone());
    drop(st);

    tracing::warn!(key = %spec.key(), ?pid, %reason, "worker exited unexpectedly");
    let mut ev = Event::new(EventKind::ProcessExited)
        .with_process(spec.category(), spec.name())
        .with_reason(reason.as_str());
    if let Some(pid) = pid {
        ev = ev.with_pid(pid);
    }
    ctx.bus.publish(ev);
    ctx.failures
        .push(ProcessFailure::new(spec.category(), spec.name(), FailureKind::Exited, reason))
        .await;

    if let Err(e) = reclaim {
        tracing::warn!(key = %spec.key(), error = %e, "reclaim after crash failed");
        ctx.failures
            .push(ProcessFailure::new(spec.category(), spec.name(), FailureKind::Reclaim, e.to_string()))
            .await;
    }

    let delay = ctx.cfg.restart_delay(restarts);
    let mut ev = Event::new(EventKind::RestartScheduled)
        .with_process(spec.category(), spec.name())
        .with_restarts(restarts + 1);
    if let Some(d) = delay {
        ev = ev.with_delay(d);
    }
    ctx.bus.publish(ev);

    tokio::spawn(restart(ctx, handle, pending, delay));
}

/// Boxed so the launch → supervise → restart cycle has a concrete `Send` type.
fn restart(
    ctx: Arc<Context>,
    handle: Arc<ProcessHandle>,
    pending: CancellationToken,
    delay: Option<Duration>,
) -> BoxFuture<'static, ()> {
    async move { restart_after(ctx, handle, pending, delay).await }.boxed()
}

async fn restart_after(
    ctx: Arc<Context>,
    handle: Arc<ProcessHandle>,
    pending: CancellationToken,
    delay: Option<Duration>,
) {
    if let Some(delay) = delay {
        tokio::select! {
            biased;
            _ = pending.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    let mut st = tokio::select! {
        biased;
        _ = pending.cancelled() => return,
        st = handle.lock() => st,
    };
    if pending.is_cancelled() || st.running {
        return;
    }
    st.pending_restart = None;

    let spec = handle.spec();
    if let Err(e) = ctx.launch(&handle, &mut st).await {
        drop(st);
        tracing::error!(key = %spec.key(), error = %e, "restart failed");
        ctx.bus.publish(
            Event::new(EventKind::RestartFailed)
                .with_process(spec.category(), spec.name())
                .with_reason(e.as_message()),
        );
        ctx.failures
            .push(ProcessFailure::new(
                spec.category(),
                spec.name(),
                FailureKind::RestartFailed,
                e.to_string(),
            ))
            .await;
    }
}
