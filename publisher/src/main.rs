//! Load generator that simulates multiple publishers sending event batches
//! to the aggregator, replaying a controlled fraction of previously-sent
//! events to exercise dedup. Restyled from `original_source/publisher/main.py`
//! onto the teacher's `tokio`/`reqwest`/`envconfig` stack.

use std::time::Duration;

use envconfig::Envconfig;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Envconfig, Clone)]
struct Config {
    #[envconfig(default = "http://localhost:3000")]
    aggregator_url: String,
    #[envconfig(default = "3")]
    publisher_workers: usize,
    #[envconfig(default = "50000")]
    event_count: usize,
    #[envconfig(default = "0.35")]
    duplicate_rate: f64,
}

const TOPICS: &[&str] = &[
    "logs.authentication",
    "logs.payment",
    "logs.inventory",
    "logs.user_service",
    "logs.notification",
    "logs.database",
    "logs.cache",
    "logs.api_gateway",
];

const SOURCES: &[&str] = &[
    "service-a",
    "service-b",
    "service-c",
    "worker-1",
    "worker-2",
    "scheduler",
    "batch-job",
];

const LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Event {
    topic: String,
    event_id: String,
    timestamp: String,
    source: String,
    payload: serde_json::Value,
}

fn generate_event() -> Event {
    let mut rng = rand::thread_rng();
    const STATUSES: &[&str] = &["success", "partial", "failed"];
    let status = *STATUSES.choose(&mut rng).unwrap();
    let level = *LOG_LEVELS.choose(&mut rng).unwrap();

    Event {
        topic: TOPICS.choose(&mut rng).unwrap().to_string(),
        event_id: Uuid::new_v4().to_string(),
        timestamp: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .expect("RFC3339 formatting cannot fail"),
        source: SOURCES.choose(&mut rng).unwrap().to_string(),
        payload: json!({
            "level": level,
            "message": format!("Log message {}", rng.gen_range(1..10_000)),
            "duration_ms": rng.gen_range(1..5_000),
            "status": status,
            "user_id": format!("user-{}", rng.gen_range(1..10_000)),
            "transaction_id": Uuid::new_v4().to_string(),
        }),
    }
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    accepted: usize,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    received: i64,
    unique_processed: i64,
    duplicate_dropped: i64,
    unique_rate: f64,
    duplicate_rate: f64,
    topics: Vec<String>,
}

async fn publish_batch(
    client: &reqwest::Client,
    aggregator_url: &str,
    events: &[Event],
    worker_id: usize,
) -> (usize, usize) {
    let response = client
        .post(format!("{aggregator_url}/publish"))
        .json(&json!({ "events": events }))
        .timeout(Duration::from_secs(30))
        .send()
        .await;

    match response {
        Ok(resp) if resp.status().is_success() => match resp.json::<PublishResponse>().await {
            Ok(body) => {
                debug!(worker_id, accepted = body.accepted, "published batch");
                (body.accepted, events.len() - body.accepted)
            }
            Err(err) => {
                error!(worker_id, "failed to decode publish response: {err}");
                (0, events.len())
            }
        },
        Ok(resp) => {
            error!(worker_id, status = %resp.status(), "publish failed");
            (0, events.len())
        }
        Err(err) => {
            error!(worker_id, "error publishing batch: {err}");
            (0, events.len())
        }
    }
}

async fn publisher_worker(config: Config, worker_id: usize, events_per_worker: usize) {
    info!(worker_id, "worker started");

    let client = reqwest::Client::new();
    let mut sent_events: Vec<Event> = Vec::new();
    let mut total_sent = 0usize;
    let mut total_failed = 0usize;

    for _ in 0..events_per_worker {
        let batch_size = rand::thread_rng().gen_range(5..=50);
        let mut batch = Vec::with_capacity(batch_size);

        for _ in 0..batch_size {
            let is_duplicate = !sent_events.is_empty()
                && rand::thread_rng().gen_bool(config.duplicate_rate.clamp(0.0, 1.0));

            if is_duplicate {
                let dup = sent_events.choose(&mut rand::thread_rng()).unwrap().clone();
                batch.push(dup);
            } else {
                let event = generate_event();
                sent_events.push(event.clone());
                batch.push(event);
            }
        }

        let (accepted, failed) =
            publish_batch(&client, &config.aggregator_url, &batch, worker_id).await;
        total_sent += accepted;
        total_failed += failed;

        let jitter_ms = rand::thread_rng().gen_range(10..=100);
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
    }

    info!(
        worker_id,
        total_sent,
        total_failed,
        unique_events_tracked = sent_events.len(),
        "worker finished"
    );
}

async fn wait_for_aggregator(client: &reqwest::Client, aggregator_url: &str) -> bool {
    info!("waiting for aggregator to be ready...");

    for attempt in 1..=30 {
        let health = client
            .get(format!("{aggregator_url}/health"))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        if matches!(&health, Ok(resp) if resp.status().is_success()) {
            info!("aggregator is ready");
            return true;
        }

        debug!(attempt, "aggregator not ready, retrying...");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    false
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid publisher configuration");

    info!(workers = config.publisher_workers, "starting publisher");
    info!(event_count = config.event_count, "total events to generate");
    info!(duplicate_rate = config.duplicate_rate, "duplicate rate");
    info!(aggregator_url = %config.aggregator_url, "target aggregator");

    let client = reqwest::Client::new();
    if !wait_for_aggregator(&client, &config.aggregator_url).await {
        error!("aggregator failed to start in time");
        return;
    }

    let start = tokio::time::Instant::now();
    let events_per_worker = config.event_count / config.publisher_workers.max(1);

    let mut handles = Vec::new();
    for worker_id in 0..config.publisher_workers {
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            publisher_worker(config, worker_id, events_per_worker).await;
        }));
    }

    for handle in handles {
        drop(handle.await);
    }

    let elapsed = start.elapsed().as_secs_f64();
    info!(elapsed_seconds = elapsed, "publisher completed");
    if elapsed > 0.0 {
        info!(
            throughput_events_per_second = config.event_count as f64 / elapsed,
            "throughput"
        );
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    match client
        .get(format!("{}/stats", config.aggregator_url))
        .send()
        .await
    {
        Ok(resp) => match resp.json::<StatsResponse>().await {
            Ok(stats) => {
                info!("final aggregator stats:");
                info!(received = stats.received, "received");
                info!(unique_processed = stats.unique_processed, "unique processed");
                info!(duplicate_dropped = stats.duplicate_dropped, "duplicates dropped");
                info!(unique_rate = stats.unique_rate, "unique rate");
                info!(duplicate_rate = stats.duplicate_rate, "duplicate rate");
                info!(topics = stats.topics.len(), "topics");
            }
            Err(err) => error!("failed to decode stats response: {err}"),
        },
        Err(err) => error!("error fetching stats: {err}"),
    }
}
