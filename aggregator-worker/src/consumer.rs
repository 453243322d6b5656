//! The single-writer idempotent consumer (spec.md §4.D).
//!
//! Shaped like `hook_worker::worker::WebhookWorker`: a long-lived loop that
//! drains one queue and reports liveness on every iteration. Unlike the
//! webhook worker it is intentionally single-threaded and non-concurrent —
//! the database is the serialization point for dedup, and the worker never
//! needs to compete with itself for it.

use aggregator_store::{Event, PersistenceLayer, QueueReceiver, StoreError};
use health::HealthHandle;
use time::Duration;
use tracing::{debug, error, info, warn};

/// Liveness deadline registered for the consumer: it must report healthy more
/// often than this, which it does on every queue-poll iteration.
pub const LIVENESS_DEADLINE: Duration = Duration::seconds(30);

pub struct ConsumerWorker {
    store: PersistenceLayer,
    queue: QueueReceiver,
    liveness: HealthHandle,
}

impl ConsumerWorker {
    pub fn new(store: PersistenceLayer, queue: QueueReceiver, liveness: HealthHandle) -> Self {
        Self {
            store,
            queue,
            liveness,
        }
    }

    /// Drain the queue until every `QueueSender` has been dropped and the
    /// queue is empty. Returns once shutdown has fully drained the queue —
    /// events already accepted into the queue are never lost.
    pub async fn run(mut self) {
        loop {
            self.liveness.report_healthy().await;

            match self.queue.dequeue().await {
                Some(event) => self.process_one(event).await,
                None => {
                    info!("queue drained and closed, consumer exiting");
                    return;
                }
            }
        }
    }

    /// The per-event algorithm of spec.md §4.D. Isolated: any failure here is
    /// logged and counted, never propagated to stop the loop.
    async fn process_one(&self, event: Event) {
        debug!(topic = %event.topic, event_id = %event.event_id, "processing event");

        match self.store.is_processed(&event.topic, &event.event_id).await {
            Ok(true) => {
                self.credit(0, 0, 1, 0).await;
                info!(topic = %event.topic, event_id = %event.event_id, "duplicate dropped");
                return;
            }
            Ok(false) => {}
            Err(err) => {
                self.credit(0, 0, 0, 1).await;
                error!(topic = %event.topic, event_id = %event.event_id, "is_processed check failed: {err}");
                return;
            }
        }

        match self.store.mark_processed(&event).await {
            Ok(true) => {
                self.credit(0, 1, 0, 0).await;
                info!(topic = %event.topic, event_id = %event.event_id, "event processed");
            }
            Ok(false) => {
                // Lost the dedup insert race: another writer beat us to this
                // (topic, event_id) between our is_processed check and the
                // insert. Only reachable here if something other than this
                // worker writes to dedup_store.
                self.credit(0, 0, 1, 0).await;
                warn!(topic = %event.topic, event_id = %event.event_id, "event rejected as duplicate on insert race");
            }
            Err(StoreError::UniqueViolation(err)) => {
                self.credit(0, 0, 1, 0).await;
                warn!(topic = %event.topic, event_id = %event.event_id, "event rejected as duplicate: {err}");
            }
            Err(err) => {
                self.credit(0, 0, 0, 1).await;
                error!(topic = %event.topic, event_id = %event.event_id, "mark_processed failed: {err}");
            }
        }
    }

    async fn credit(&self, received: i64, unique: i64, duplicate: i64, errored: i64) {
        if let Err(err) = self
            .store
            .increment_stats(received, unique, duplicate, errored)
            .await
        {
            error!("failed to update stats counters: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggregator_store::{bounded, Event};
    use health::HealthRegistry;
    use serde_json::json;
    use sqlx::PgPool;

    fn event(topic: &str, event_id: &str) -> Event {
        Event {
            topic: topic.to_string(),
            event_id: event_id.to_string(),
            timestamp: "2026-07-31T00:00:00Z".to_string(),
            source: "test".to_string(),
            payload: json!({"k": "v"}),
        }
    }

    #[sqlx::test(migrations = "../aggregator-store/migrations")]
    async fn processes_unique_then_duplicate(db: PgPool) {
        let store = PersistenceLayer::from_pool(db);
        let (tx, rx) = bounded(8);
        let registry = HealthRegistry::new("liveness");
        let liveness = registry
            .register("consumer".to_string(), ::time::Duration::seconds(30))
            .await;

        let worker = ConsumerWorker::new(store.clone(), rx, liveness);
        let handle = tokio::spawn(worker.run());

        tx.enqueue(event("orders", "e1")).await.unwrap();
        tx.enqueue(event("orders", "e1")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.unique_processed, 1);
        assert_eq!(stats.duplicate_dropped, 1);
        assert_eq!(stats.event_errored, 0);
    }

    #[sqlx::test(migrations = "../aggregator-store/migrations")]
    async fn distinct_events_are_both_unique(db: PgPool) {
        let store = PersistenceLayer::from_pool(db);
        let (tx, rx) = bounded(8);
        let registry = HealthRegistry::new("liveness");
        let liveness = registry
            .register("consumer".to_string(), ::time::Duration::seconds(30))
            .await;

        let worker = ConsumerWorker::new(store.clone(), rx, liveness);
        let handle = tokio::spawn(worker.run());

        tx.enqueue(event("orders", "e1")).await.unwrap();
        tx.enqueue(event("orders", "e2")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.unique_processed, 2);
        assert_eq!(stats.duplicate_dropped, 0);
    }
}
