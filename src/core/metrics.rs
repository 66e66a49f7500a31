//! # Metrics and failure channels.
//!
//! Every routed call yields one [`MetricsEvent`]; every supervision-side
//! problem that has no caller to return to yields one [`ProcessFailure`].
//! Both travel over bounded channels whose full-queue behavior is chosen by
//! [`OverflowPolicy`]:
//!
//! ```text
//! producer ─► Sink::push ─┬─ Drop:  try_send, on full count + ChannelOverflow event
//!                         └─ Block: send().await (back-pressure)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::core::config::OverflowPolicy;
use crate::events::{Bus, Event, EventKind};

/// Outcome of one `call`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricsEvent {
    pub urn: String,
    pub call_duration: Duration,
    pub error: bool,
}

/// What went wrong with a worker outside of any caller's request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The worker exited without being asked to.
    Exited,
    /// Relaunching a crashed worker failed.
    RestartFailed,
    /// Reading the worker's stdout/stderr failed.
    Output,
    /// The transport resource could not be removed.
    Reclaim,
}

impl FailureKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            FailureKind::Exited => "exited",
            FailureKind::RestartFailed => "restart_failed",
            FailureKind::Output => "output",
            FailureKind::Reclaim => "reclaim",
        }
    }
}

/// Record pushed onto the failure channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessFailure {
    pub category: String,
    pub name: String,
    pub kind: FailureKind,
    pub message: String,
}

impl ProcessFailure {
    pub(crate) fn new(category: &str, name: &str, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {}: {}",
            self.category,
            self.name,
            self.kind.as_label(),
            self.message
        )
    }
}

/// Producer side of a bounded channel plus its not-yet-claimed receiver.
pub(crate) struct Sink<T> {
    label: &'static str,
    tx: mpsc::Sender<T>,
    rx: Mutex<Option<mpsc::Receiver<T>>>,
    policy: OverflowPolicy,
    dropped: AtomicU64,
    bus: Bus,
}

impl<T> Sink<T> {
    pub(crate) fn new(label: &'static str, capacity: usize, policy: OverflowPolicy, bus: Bus) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            label,
            tx,
            rx: Mutex::new(Some(rx)),
            policy,
            dropped: AtomicU64::new(0),
            bus,
        }
    }

    /// Hands out the receiver; `None` after the first call.
    pub(crate) fn take_receiver(&self) -> Option<mpsc::Receiver<T>> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Items dropped because the channel was full.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) async fn push(&self, item: T) {
        match self.policy {
            OverflowPolicy::Drop => self.offer(item),
            OverflowPolicy::Block => {
                let _ = self.tx.send(item).await;
            }
        }
    }

    /// Enqueues without waiting whatever the policy; a full channel drops the item.
    ///
    /// For producers that must not stall while a caller waits on them.
    pub(crate) fn offer(&self, item: T) {
        match self.tx.try_send(item) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                self.bus.publish(
                    Event::new(EventKind::ChannelOverflow)
                        .with_reason(format!("{} channel full ({total} dropped)", self.label)),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(urn: &str) -> MetricsEvent {
        MetricsEvent {
            urn: urn.into(),
            call_duration: Duration::from_millis(1),
            error: false,
        }
    }

    #[tokio::test]
    async fn drop_policy_counts_and_reports_overflow() {
        let bus = Bus::new(16);
        let mut events = bus.subscribe();
        let sink = Sink::new("metrics", 1, OverflowPolicy::Drop, bus);

        sink.push(metric("a:b:c")).await;
        sink.push(metric("a:b:d")).await;
        assert_eq!(sink.dropped(), 1);

        let ev = events.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::ChannelOverflow);

        let mut rx = sink.take_receiver().unwrap();
        assert_eq!(rx.recv().await.unwrap().urn, "a:b:c");
        assert!(sink.take_receiver().is_none());
    }

    #[tokio::test]
    async fn block_policy_waits_for_room() {
        let sink = std::sync::Arc::new(Sink::new("metrics", 1, OverflowPolicy::Block, Bus::new(4)));
        let mut rx = sink.take_receiver().unwrap();

        sink.push(metric("a:b:1")).await;
        let pusher = {
            let sink = sink.clone();
            tokio::spawn(async move { sink.push(metric("a:b:2")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pusher.is_finished());

        assert_eq!(rx.recv().await.unwrap().urn, "a:b:1");
        pusher.await.unwrap();
        assert_eq!(rx.recv().await.unwrap().urn, "a:b:2");
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn offer_never_waits_under_block_policy() {
        let sink = Sink::new("failures", 1, OverflowPolicy::Block, Bus::new(4));
        sink.offer(metric("a:b:1"));
        sink.offer(metric("a:b:2"));
        assert_eq!(sink.dropped(), 1);

        let mut rx = sink.take_receiver().unwrap();
        assert_eq!(rx.recv().await.unwrap().urn, "a:b:1");
    }

    #[test]
    fn failure_display() {
        let f = ProcessFailure::new("calc", "add1", FailureKind::Exited, "exit status: 3");
        assert_eq!(f.to_string(), "calc:add1 exited: exit status: 3");
    }
}
