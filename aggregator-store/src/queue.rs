//! The bounded in-process work queue between admission handlers and the
//! consumer worker (spec.md §4.C).
//!
//! A thin wrapper over `tokio::sync::mpsc`: many producers (one per
//! concurrent HTTP request), exactly one consumer. `send` suspends once the
//! channel is full, which is the backpressure mechanism spec.md calls for.

use tokio::sync::mpsc;

use crate::event::Event;

/// Queue capacity from spec.md §4.C.
pub const QUEUE_CAPACITY: usize = 10_000;

#[derive(Clone)]
pub struct QueueSender {
    inner: mpsc::Sender<Event>,
}

pub struct QueueReceiver {
    inner: mpsc::Receiver<Event>,
}

pub fn bounded(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (QueueSender { inner: tx }, QueueReceiver { inner: rx })
}

impl QueueSender {
    /// Enqueue one event, in the order the caller submitted it. Suspends if
    /// the queue is at capacity (backpressure).
    pub async fn enqueue(&self, event: Event) -> Result<(), Event> {
        self.inner.send(event).await.map_err(|e| e.0)
    }
}

impl QueueReceiver {
    /// Dequeue the next event in FIFO order. Resolves to `None` once every
    /// `QueueSender` clone has been dropped and the queue is empty — the
    /// signal the consumer uses to exit on graceful shutdown.
    pub async fn dequeue(&mut self) -> Option<Event> {
        self.inner.recv().await
    }
}
