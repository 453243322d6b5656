use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use aggregator_store::ValidationError;

#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("failed to decode request: {0}")]
    RequestDecodingError(String),

    #[error("persistence error: {0}")]
    StoreError(#[from] aggregator_store::StoreError),

    #[error("queue is closed")]
    QueueClosed,
}

impl IntoResponse for AggregatorError {
    fn into_response(self) -> Response {
        let status = match self {
            AggregatorError::RequestDecodingError(_) => StatusCode::BAD_REQUEST,
            AggregatorError::StoreError(_) | AggregatorError::QueueClosed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(ErrorBody { detail: self.to_string() })).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct EventErrorDetail {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub error: String,
}

impl EventErrorDetail {
    pub fn new(index: usize, event_id: Option<String>, error: &ValidationError) -> Self {
        Self {
            index,
            event_id,
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PublishStatus {
    #[serde(rename = "accepted")]
    Accepted,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub status: PublishStatus,
    pub count: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub errors: Vec<EventErrorDetail>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub received: i64,
    pub unique_processed: i64,
    pub duplicate_dropped: i64,
    pub event_errored: i64,
    pub topics: Vec<String>,
    pub uptime_seconds: u64,
    pub unique_rate: f64,
    pub duplicate_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub total_unique_events: i64,
    pub database: &'static str,
    pub features: Vec<&'static str>,
}

/// Informational feature list surfaced by original_source's `/info` handler —
/// not a behavioral contract, just identity.
pub const FEATURES: &[&str] = &[
    "idempotent consumer",
    "at-least-once delivery",
    "serializable isolation",
    "unique-constraint dedup",
    "concurrent processing",
    "event batching",
    "persistent dedup store",
];

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub status: &'static str,
    pub message: &'static str,
}
