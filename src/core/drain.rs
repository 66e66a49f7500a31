//! # Output drain task.
//!
//! One task per launched worker reads its stdout and stderr into local
//! buffers and moves them into the shared [`OutputBuffers`] every
//! `drain_interval`. On the termination token it reads whatever the pipes
//! still deliver within a short window, flushes, and exits.
//!
//! ```text
//! child stdout ─┐
//!               ├─► local buf ──tick──► OutputBuffers
//! child stderr ─┘        └──read error──► ProcessFailure(Output) + OutputFailed
//! ```

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::lifecycle::Context;
use super::metrics::{FailureKind, ProcessFailure};
use super::output::Stream;
use crate::events::{Event, EventKind};

/// Upper bound on the final read after cancellation.
const FINAL_READ: Duration = Duration::from_millis(50);

const CHUNK: usize = 8 * 1024;

struct Pipe<R> {
    stream: Stream,
    reader: Option<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> Pipe<R> {
    fn new(stream: Stream, reader: Option<R>) -> Self {
        Self {
            stream,
            reader,
            pending: Vec::new(),
        }
    }

    async fn read(&mut self, chunk: &mut [u8]) -> io::Result<usize> {
        match self.reader.as_mut() {
            Some(r) => r.read(chunk).await,
            None => std::future::pending().await,
        }
    }

    async fn read_rest(&mut self) {
        if let Some(mut r) = self.reader.take() {
            let _ = tokio::time::timeout(FINAL_READ, r.read_to_end(&mut self.pending)).await;
        }
    }
}

pub(crate) async fn drain(
    ctx: Arc<Context>,
    category: Arc<str>,
    name: Arc<str>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    token: CancellationToken,
) {
    let mut out = Pipe::new(Stream::Stdout, stdout);
    let mut err = Pipe::new(Stream::Stderr, stderr);
    let mut out_chunk = vec![0u8; CHUNK];
    let mut err_chunk = vec![0u8; CHUNK];

    let mut tick = tokio::time::interval(ctx.cfg.drain_interval.max(Duration::from_millis(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            r = out.read(&mut out_chunk) => on_read(&ctx, &category, &name, &mut out, &out_chunk, r),
            r = err.read(&mut err_chunk) => on_read(&ctx, &category, &name, &mut err, &err_chunk, r),
            _ = tick.tick() => {
                flush(&ctx, &mut out);
                flush(&ctx, &mut err);
            }
        }
    }

    out.read_rest().await;
    err.read_rest().await;
    flush(&ctx, &mut out);
    flush(&ctx, &mut err);
}

fn on_read<R: AsyncRead + Unpin>(
    ctx: &Context,
    category: &str,
    name: &str,
    pipe: &mut Pipe<R>,
    chunk: &[u8],
    result: io::Result<usize>,
) {
    match result {
        Ok(0) => pipe.reader = None,
        Ok(n) => pipe.pending.extend_from_slice(&chunk[..n]),
        Err(e) => {
            pipe.reader = None;
            let msg = format!("reading {} failed: {e}", pipe.stream.as_str());
            tracing::warn!(category, name, error = %e, stream = pipe.stream.as_str(), "output capture failed");
            ctx.bus.publish(
                Event::new(EventKind::OutputFailed)
                    .with_process(category, name)
                    .with_reason(msg.as_str()),
            );
            // `stop` joins this task while holding the handle lock.
            ctx.failures
                .offer(ProcessFailure::new(category, name, FailureKind::Output, msg));
        }
    }
}

fn flush<R>(ctx: &Context, pipe: &mut Pipe<R>) {
    if !pipe.pending.is_empty() {
        ctx.output.append(pipe.stream, &pipe.pending);
        pipe.pending.clear();
    }
}
