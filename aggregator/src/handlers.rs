use axum::extract::{Query, State};
use axum::Json;
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, warn};

use aggregator_store::PublishRequest;

use crate::api::{
    AggregatorError, ClearResponse, EventErrorDetail, HealthResponse, InfoResponse,
    PublishResponse, PublishStatus, StatsResponse, FEATURES,
};
use crate::router::State as AppState;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: aggregator_store::now_iso8601(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn liveness(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    state.health.get_status()
}

pub async fn readiness(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    state.health.get_status()
}

/// `POST /publish` and `POST /events` (original_source aliases the latter to
/// the former) — spec.md §4.E. Validates every event in input order,
/// increments `received` only for events that validate (Open Question Q3),
/// and enqueues them for the consumer.
pub async fn publish(
    State(state): State<AppState>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, AggregatorError> {
    let raw_events = request.into_events();
    let count = raw_events.len();
    let mut errors = Vec::new();
    let mut accepted = 0usize;

    for (index, raw_event) in raw_events.into_iter().enumerate() {
        let event_id = raw_event.event_id.clone();
        match raw_event.validate() {
            Ok(event) => {
                state.store.increment_stats(1, 0, 0, 0).await?;

                state
                    .queue
                    .enqueue(event)
                    .await
                    .map_err(|_| AggregatorError::QueueClosed)?;

                accepted += 1;
            }
            Err(err) => {
                warn!(index, "event rejected: {err}");
                errors.push(EventErrorDetail::new(index, event_id, &err));
            }
        }
    }

    counter!("aggregator_events_received_total").increment(accepted as u64);

    debug!(count, accepted, rejected = errors.len(), "publish request handled");

    Ok(Json(PublishResponse {
        status: PublishStatus::Accepted,
        count,
        accepted,
        rejected: errors.len(),
        errors,
    }))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub topic: Option<String>,
}

pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<aggregator_store::EventRecord>>, AggregatorError> {
    let records = state.store.get_events_by_topic(query.topic.as_deref()).await?;
    Ok(Json(records))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AggregatorError> {
    let stats = state.store.get_stats().await?;
    let topics = state.store.get_topics().await?;
    let (unique_rate, duplicate_rate) = aggregator_store::rates(&stats);

    Ok(Json(StatsResponse {
        received: stats.received,
        unique_processed: stats.unique_processed,
        duplicate_dropped: stats.duplicate_dropped,
        event_errored: stats.event_errored,
        topics,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        unique_rate,
        duplicate_rate,
    }))
}

pub async fn info(State(state): State<AppState>) -> Result<Json<InfoResponse>, AggregatorError> {
    let total_unique_events = state.store.get_event_count().await?;

    Ok(Json(InfoResponse {
        service: "aggregator",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        total_unique_events,
        database: "postgres",
        features: FEATURES.to_vec(),
    }))
}

pub async fn clear(State(state): State<AppState>) -> Result<Json<ClearResponse>, AggregatorError> {
    state.store.clear().await?;
    Ok(Json(ClearResponse {
        status: "ok",
        message: "all aggregator data cleared",
    }))
}

