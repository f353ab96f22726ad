//! # Event delivery to subscribers.
//!
//! The supervisor's bus listener hands every lifecycle event to
//! [`SubscriberSet::emit`], which never waits on a subscriber: each one owns a
//! bounded queue drained by its own worker task.
//!
//! - Events reach one subscriber in the order they were emitted.
//! - A full or closed queue drops the event for that subscriber only, with a warning.
//! - A panic in `on_event` is logged and the worker keeps going.
//! - [`SubscriberSet::shutdown`] returns once every queued event was handled,
//!   so `Terminated` is rendered before the process exits.
//!
//! ```text
//! bus listener ──► emit(&Event) ──┬──► queue ─► worker ─► LogWriter::on_event
//!                                 └──► queue ─► worker ─► <custom>::on_event
//! ```

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::events::Event;

use super::Subscribe;

struct Queue {
    subscriber: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
}

/// Subscribers of one supervisor run, each behind its own queue.
pub struct SubscriberSet {
    queues: Vec<Queue>,
    workers: Vec<JoinHandle<()>>,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber; call inside a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        let (queues, workers) = subs
            .into_iter()
            .map(|sub| {
                let (tx, rx) = mpsc::channel(sub.queue_capacity().max(1));
                let queue = Queue {
                    subscriber: sub.name(),
                    tx,
                };
                (queue, tokio::spawn(deliver(sub, rx)))
            })
            .unzip();
        Self { queues, workers }
    }

    /// Queues `event` for every subscriber without waiting.
    pub fn emit(&self, event: &Event) {
        let shared = Arc::new(event.clone());
        for queue in &self.queues {
            let reason = match queue.tx.try_send(Arc::clone(&shared)) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => "queue full",
                Err(TrySendError::Closed(_)) => "queue closed",
            };
            tracing::warn!(
                subscriber = queue.subscriber,
                kind = ?event.kind,
                reason,
                "event not delivered"
            );
        }
    }

    /// Closes every queue and waits until the workers have drained them.
    pub async fn shutdown(self) {
        drop(self.queues);
        for worker in self.workers {
            let _ = worker.await;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.len()
    }
}

async fn deliver(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>) {
    while let Some(ev) = rx.recv().await {
        let handled = std::panic::AssertUnwindSafe(sub.on_event(&ev))
            .catch_unwind()
            .await;
        if let Err(panic) = handled {
            tracing::error!(subscriber = sub.name(), info = ?panic, seq = ev.seq, "subscriber panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::subscribers::testing::Recorder;

    struct Panicky;

    #[async_trait::async_trait]
    impl Subscribe for Panicky {
        async fn on_event(&self, _event: &Event) {
            panic!("boom");
        }

        fn name(&self) -> &'static str {
            "panicky"
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_queues() {
        let rec = Recorder::new();
        let set = SubscriberSet::new(vec![rec.clone() as Arc<dyn Subscribe>]);
        set.emit(&Event::new(EventKind::UnitLaunched).with_unit("a"));
        set.emit(&Event::new(EventKind::UnitLaunched).with_unit("b"));
        set.shutdown().await;

        assert_eq!(rec.count(EventKind::UnitLaunched), 2);
    }

    #[tokio::test]
    async fn test_panicking_subscriber_is_isolated() {
        let rec = Recorder::new();
        let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(Panicky) as Arc<dyn Subscribe>, rec.clone()];
        let set = SubscriberSet::new(subs);
        assert_eq!(set.len(), 2);

        set.emit(&Event::new(EventKind::Terminated));
        set.emit(&Event::new(EventKind::Terminated));
        set.shutdown().await;

        assert_eq!(rec.count(EventKind::Terminated), 2);
    }
}
