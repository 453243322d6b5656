use std::sync::Arc;
use std::time::Instant;

use envconfig::Envconfig;
use tokio::signal;

use aggregator::config::Config;
use aggregator::router::{self, State};
use aggregator_store::{bounded, PersistenceLayer};
use aggregator_worker::ConsumerWorker;
use health::HealthRegistry;

/// Waits for SIGTERM or SIGINT, ported from `capture_server::main::shutdown`.
async fn shutdown_signal() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("shutting down gracefully...");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");

    // Startup sequence (spec.md §4.G): pool (with retry) -> migrate -> queue
    // -> spawn consumer -> begin accepting HTTP.
    let store = PersistenceLayer::connect(&config.database_url, config.pool_config())
        .await
        .expect("failed to open database pool after retries");

    store.migrate().await.expect("failed to run database migrations");

    let (queue_tx, queue_rx) = bounded(config.queue_capacity);

    let health_registry = Arc::new(HealthRegistry::new("aggregator"));
    let consumer_liveness = health_registry
        .register("consumer".to_string(), aggregator_worker::LIVENESS_DEADLINE)
        .await;

    let consumer = ConsumerWorker::new(store.clone(), queue_rx, consumer_liveness);
    let consumer_handle = tokio::spawn(consumer.run());

    let state = State {
        store,
        queue: queue_tx,
        started_at: Arc::new(Instant::now()),
        health: health_registry,
    };

    let app = router::router(state, config.export_prometheus);

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .expect("failed to bind listener");

    tracing::info!(address = %config.bind_address(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Shutdown sequence (spec.md §4.G): stop accepting HTTP (axum::serve has
    // returned) -> drop the last QueueSender (dropping `app` releases the
    // clone held in its State) -> wait for the consumer to drain the queue.
    tracing::info!("draining queue before exit");
    consumer_handle
        .await
        .expect("consumer task panicked during drain");
}
