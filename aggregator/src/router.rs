use std::future::ready;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use aggregator_store::{PersistenceLayer, QueueSender};
use health::HealthRegistry;

use crate::handlers;

#[derive(Clone)]
pub struct State {
    pub store: PersistenceLayer,
    pub queue: QueueSender,
    pub started_at: Arc<Instant>,
    pub health: Arc<HealthRegistry>,
}

/// Builds the HTTP surface of spec.md §6 plus the ambient health/metrics
/// endpoints, following `capture::router::router`'s shape: routes layered
/// with tracing and per-request metrics, `/metrics` attached only if asked.
pub fn router(state: State, export_prometheus: bool) -> Router {
    let router = Router::new()
        .route("/health", get(handlers::health))
        .route("/publish", post(handlers::publish))
        .route("/events", post(handlers::publish).get(handlers::get_events))
        .route("/stats", get(handlers::stats))
        .route("/info", get(handlers::info))
        .route("/admin/clear", post(handlers::clear))
        .route("/_liveness", get(handlers::liveness))
        .route("/_readiness", get(handlers::readiness))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(
            aggregator_store::metrics::track_metrics,
        ))
        .with_state(state);

    if export_prometheus {
        let recorder_handle = aggregator_store::metrics::setup_metrics_recorder();
        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}
