//! The persistence layer: durable storage for unique events, the dedup
//! store, and the stats counters (spec.md §4.B).
//!
//! Generalizes `hook_common::pgqueue::PgQueue`'s shape — a value type
//! wrapping a `sqlx::PgPool`, constructed once at startup and passed
//! explicitly to whoever needs it, rather than kept behind a process-wide
//! singleton (spec.md §9, "process-wide mutable pool handle").

use std::time::Duration;

use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::event::{Event, EventRecord};
use crate::error::StoreError;
use crate::retry::RetryPolicy;

/// Connection pool bounds from spec.md §4.B, overridable via `PoolConfig`.
const MIN_CONNECTIONS: u32 = 5;
const MAX_CONNECTIONS: u32 = 20;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const POOL_RETRY_ATTEMPTS: u32 = 10;
const POOL_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Bound on in-transaction retries for `mark_processed`/`increment_stats`
/// aborting due to a serialization conflict (spec.md §4.B, §5).
const TRANSACTION_RETRY_ATTEMPTS: u32 = 3;

/// Tunables for opening the pool, sourced from `DB_MIN_CONNECTIONS`/
/// `DB_MAX_CONNECTIONS`/`DB_POOL_RETRY_ATTEMPTS`/`DB_POOL_RETRY_INTERVAL_MS`
/// by `aggregator-server`'s config.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub retry_attempts: u32,
    pub retry_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: MIN_CONNECTIONS,
            max_connections: MAX_CONNECTIONS,
            retry_attempts: POOL_RETRY_ATTEMPTS,
            retry_interval: POOL_RETRY_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct Stats {
    pub received: i64,
    pub unique_processed: i64,
    pub duplicate_dropped: i64,
    /// Non-uniqueness persistence failures (spec.md §9 Open Question Q1).
    pub event_errored: i64,
}

#[derive(Clone)]
pub struct PersistenceLayer {
    pool: PgPool,
    tx_retry: RetryPolicy,
}

impl PersistenceLayer {
    /// Open the pool, retrying if the database is temporarily unreachable
    /// (spec.md §4.B: up to 10 attempts, 2s apart by default).
    pub async fn connect(database_url: &str, pool_config: PoolConfig) -> Result<Self, StoreError> {
        let pool_retry = RetryPolicy::constant(pool_config.retry_attempts, pool_config.retry_interval);
        let pool = pool_retry
            .retry_async("database pool connect", || async {
                PgPoolOptions::new()
                    .min_connections(pool_config.min_connections)
                    .max_connections(pool_config.max_connections)
                    .acquire_timeout(COMMAND_TIMEOUT)
                    .connect(database_url)
                    .await
            })
            .await
            .map_err(StoreError::Connection)?;

        info!("database pool initialized");

        Ok(Self {
            pool,
            tx_retry: RetryPolicy::constant(TRANSACTION_RETRY_ATTEMPTS, Duration::from_millis(5)),
        })
    }

    /// Wrap an already-open pool. Used by tests across the workspace that
    /// provision their own pool via `sqlx::test`.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            tx_retry: RetryPolicy::constant(TRANSACTION_RETRY_ATTEMPTS, Duration::from_millis(5)),
        }
    }

    /// Run the embedded schema migrations. A fatal startup error if it fails
    /// (spec.md §6 exit codes).
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(sqlx::Error::from(e)))?;
        Ok(())
    }

    pub async fn is_processed(&self, topic: &str, event_id: &str) -> Result<bool, StoreError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM dedup_store WHERE topic = $1 AND event_id = $2)",
        )
        .bind(topic)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Insert the dedup key and the event row inside one serializable
    /// transaction. Returns `persisted = true` iff the dedup insert created
    /// a new row (spec.md §4.B). Retries bounded serialization aborts.
    pub async fn mark_processed(&self, event: &Event) -> Result<bool, StoreError> {
        self.tx_retry
            .retry_async("mark_processed", || self.mark_processed_once(event))
            .await
            .map_err(|e| {
                if StoreError::is_unique_violation(&e) {
                    StoreError::UniqueViolation(e)
                } else if StoreError::is_serialization_failure(&e) {
                    StoreError::SerializationRetriesExhausted(e)
                } else {
                    StoreError::Query(e)
                }
            })
    }

    async fn mark_processed_once(&self, event: &Event) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let dedup_result = sqlx::query(
            "INSERT INTO dedup_store (topic, event_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(&event.topic)
        .bind(&event.event_id)
        .execute(&mut *tx)
        .await?;

        let persisted = dedup_result.rows_affected() == 1;

        if persisted {
            sqlx::query(
                "INSERT INTO processed_events (topic, event_id, timestamp, source, payload)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT DO NOTHING",
            )
            .bind(&event.topic)
            .bind(&event.event_id)
            .bind(&event.timestamp)
            .bind(&event.source)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(persisted)
    }

    /// Increment the singleton stats row by the given deltas, inside a
    /// serializable transaction using `col = col + delta` (spec.md §4.B).
    pub async fn increment_stats(
        &self,
        received: i64,
        unique: i64,
        duplicate: i64,
        errored: i64,
    ) -> Result<(), StoreError> {
        self.tx_retry
            .retry_async("increment_stats", || {
                self.increment_stats_once(received, unique, duplicate, errored)
            })
            .await
            .map_err(|e| {
                if StoreError::is_serialization_failure(&e) {
                    StoreError::SerializationRetriesExhausted(e)
                } else {
                    StoreError::Query(e)
                }
            })
    }

    async fn increment_stats_once(
        &self,
        received: i64,
        unique: i64,
        duplicate: i64,
        errored: i64,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE event_stats
             SET received = received + $1,
                 unique_processed = unique_processed + $2,
                 duplicate_dropped = duplicate_dropped + $3,
                 event_errored = event_errored + $4
             WHERE id = 1",
        )
        .bind(received)
        .bind(unique)
        .bind(duplicate)
        .bind(errored)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_stats(&self) -> Result<Stats, StoreError> {
        let stats: Stats = sqlx::query_as(
            "SELECT received, unique_processed, duplicate_dropped, event_errored
             FROM event_stats WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    pub async fn get_topics(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT topic FROM processed_events ORDER BY topic")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    pub async fn get_events_by_topic(
        &self,
        topic: Option<&str>,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let records = match topic {
            Some(topic) => {
                sqlx::query_as::<_, EventRecord>(
                    "SELECT topic, event_id, timestamp, source, payload, processed_at
                     FROM processed_events WHERE topic = $1 ORDER BY processed_at ASC",
                )
                .bind(topic)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, EventRecord>(
                    "SELECT topic, event_id, timestamp, source, payload, processed_at
                     FROM processed_events ORDER BY processed_at ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(records)
    }

    pub async fn get_event_count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM processed_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Truncate both event tables and reset counters. Used only by tests/admin
    /// (spec.md §4.B).
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("TRUNCATE processed_events, dedup_store")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE event_stats
             SET received = 0, unique_processed = 0, duplicate_dropped = 0, event_errored = 0
             WHERE id = 1",
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        warn!("all aggregator data cleared");
        Ok(())
    }
}

/// Derive rounded percentage rates for `/stats` (spec.md §4.F).
pub fn rates(stats: &Stats) -> (f64, f64) {
    if stats.received == 0 {
        return (0.0, 0.0);
    }
    let total = stats.received as f64;
    let unique_rate = (stats.unique_processed as f64 / total * 100.0 * 100.0).round() / 100.0;
    let duplicate_rate = (stats.duplicate_dropped as f64 / total * 100.0 * 100.0).round() / 100.0;
    (unique_rate, duplicate_rate)
}

/// Wall-clock timestamp helper shared by read handlers (spec.md §4.F `/info`).
pub fn now_iso8601() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .expect("RFC3339 formatting of OffsetDateTime::now_utc() cannot fail")
}
