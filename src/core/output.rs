//! # Shared output buffers.
//!
//! Two append-only byte sinks (stdout, stderr) shared by every worker's drain
//! task. Readers take a copy ([`snapshot`](OutputBuffers::snapshot)) or move the
//! bytes out ([`drain`](OutputBuffers::drain)); neither blocks producers for long.

use std::sync::{Arc, Mutex, PoisonError};

/// Which captured stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// Captured worker output. Clones share the same buffers.
#[derive(Clone, Debug, Default)]
pub struct OutputBuffers {
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    fn buf(&self, stream: Stream) -> &Mutex<Vec<u8>> {
        match stream {
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        }
    }

    pub fn append(&self, stream: Stream, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.buf(stream)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
    }

    /// Copy of everything captured so far.
    pub fn snapshot(&self, stream: Stream) -> Vec<u8> {
        self.buf(stream)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Moves everything captured so far out of the buffer.
    pub fn drain(&self, stream: Stream) -> Vec<u8> {
        std::mem::take(&mut *self.buf(stream).lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Lossy UTF-8 snapshot, handy for logs and assertions.
    pub fn snapshot_string(&self, stream: Stream) -> String {
        String::from_utf8_lossy(&self.snapshot(stream)).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_are_independent() {
        let out = OutputBuffers::new();
        out.append(Stream::Stdout, b"hello ");
        out.append(Stream::Stdout, b"world");
        out.append(Stream::Stderr, b"oops");

        assert_eq!(out.snapshot(Stream::Stdout), b"hello world");
        assert_eq!(out.snapshot_string(Stream::Stderr), "oops");
    }

    #[test]
    fn drain_empties_and_clones_share() {
        let out = OutputBuffers::new();
        let shared = out.clone();
        shared.append(Stream::Stderr, b"x");

        assert_eq!(out.drain(Stream::Stderr), b"x");
        assert!(shared.snapshot(Stream::Stderr).is_empty());
    }
}
