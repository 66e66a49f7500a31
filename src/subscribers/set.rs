//! # SubscriberSet: non-blocking fan-out over multiple subscribers
//!
//! [`SubscriberSet`] distributes each [`Event`](crate::Event) to every
//! subscriber **without awaiting** their processing.
//!
//! - `emit(&Event)` returns immediately.
//! - Per-subscriber FIFO (queue order), no ordering across subscribers.
//! - Panics inside subscribers are caught and reported as `SubscriberPanicked`.
//! - A full or closed queue drops the event for that subscriber and reports `SubscriberOverflow`.
//!
//! ```text
//!    emit(&Event)
//!        ├────────────────► [queue S1] ─► worker S1 ─► on_event()
//!        └────────────────► [queue SN] ─► worker SN ─► on_event()
//! ```

use std::any::Any;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::Subscribe;
use crate::events::{Bus, Event};

/// Queue feeding one subscriber's worker.
struct Lane {
    name: &'static str,
    queue: mpsc::Sender<Arc<Event>>,
}

/// Fan-out of supervisor events to subscribers, one bounded queue each.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let (lanes, workers) = subs
            .into_iter()
            .map(|sub| {
                let (queue, rx) = mpsc::channel(sub.queue_capacity().max(1));
                let lane = Lane {
                    name: sub.name(),
                    queue,
                };
                (lane, tokio::spawn(deliver(sub, rx, bus.clone())))
            })
            .unzip();
        Self { lanes, workers, bus }
    }

    /// Queues `event` for every subscriber without waiting on any of them.
    pub fn emit(&self, event: &Event) {
        let shared = Arc::new(event.clone());
        for lane in &self.lanes {
            let reason = match lane.queue.try_send(Arc::clone(&shared)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            // Overflow reports are never themselves reported.
            if !event.is_subscriber_overflow() {
                self.bus.publish(Event::subscriber_overflow(lane.name, reason));
            }
        }
    }

    /// Closes every queue and waits until each worker has drained its backlog.
    pub async fn shutdown(self) {
        drop(self.lanes);
        for worker in self.workers {
            let _ = worker.await;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }
}

async fn deliver(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>, bus: Bus) {
    while let Some(ev) = rx.recv().await {
        let handled = std::panic::AssertUnwindSafe(sub.on_event(&ev)).catch_unwind().await;
        if let Err(panic) = handled {
            bus.publish(Event::subscriber_panicked(sub.name(), panic_message(panic.as_ref())));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<EventKind>>);

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, ev: &Event) {
            self.0.lock().unwrap().push(ev.kind);
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Panicker;

    #[async_trait]
    impl Subscribe for Panicker {
        async fn on_event(&self, _ev: &Event) {
            panic!("subscriber exploded");
        }
        fn name(&self) -> &'static str {
            "panicker"
        }
    }

    #[tokio::test]
    async fn delivers_in_order_and_isolates_panics() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let rec = Arc::new(Recorder::default());
        let set = SubscriberSet::new(vec![rec.clone(), Arc::new(Panicker)], bus.clone());
        assert_eq!(set.len(), 2);

        set.emit(&Event::new(EventKind::ProcessStarting));
        set.emit(&Event::new(EventKind::ProcessStarted));

        let ev = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert!(ev.reason.as_deref().unwrap().contains("subscriber exploded"));

        set.shutdown().await;
        assert_eq!(
            *rec.0.lock().unwrap(),
            vec![EventKind::ProcessStarting, EventKind::ProcessStarted]
        );
    }
}
