use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use moka::future::Cache;
use redis::aio::ConnectionManager;
use sea_orm::{ConnectOptions, Database};
use migration::MigratorTrait;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stablewatch_backend::config::{AppConfig, DB_MAX_CONNECTIONS};
use stablewatch_backend::handlers;
use stablewatch_backend::jobs::{
    aggregate_metrics_sync, catch_up_sync, stuck_recovery, worker,
};
use stablewatch_backend::services::processor::ContractProcessor;
use stablewatch_backend::services::queue::JobQueue;
use stablewatch_backend::services::rate_limiter::RateLimiterRegistry;
use stablewatch_backend::services::rollup::RollupEngine;
use stablewatch_backend::AppState;

/// Grace period between shutdown request and forced exit
const SHUTDOWN_GRACE_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stablewatch_backend=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();

    // Connect to database
    tracing::info!("Connecting to database...");
    let mut db_options = ConnectOptions::new(config.database_url());
    db_options.max_connections(DB_MAX_CONNECTIONS);
    let db = Database::connect(db_options)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    // Connect to Redis (queue + rate limiter share the connection manager)
    tracing::info!("Connecting to Redis...");
    let redis_client =
        redis::Client::open(config.redis_url()).expect("Invalid Redis configuration");
    let redis = ConnectionManager::new(redis_client)
        .await
        .expect("Failed to connect to Redis");
    let mut ping_conn = redis.clone();
    let pong: String = redis::cmd("PING")
        .query_async(&mut ping_conn)
        .await
        .expect("Redis PING failed");
    assert_eq!(pong, "PONG", "Unexpected Redis PING response");

    // Core services
    let shutdown = Arc::new(AtomicBool::new(false));
    let limiter = Arc::new(RateLimiterRegistry::new(redis.clone()));
    let queue = Arc::new(JobQueue::new(redis));
    let processor = Arc::new(ContractProcessor::new(
        db.clone(),
        limiter.clone(),
        shutdown.clone(),
    ));
    let rollup = Arc::new(RollupEngine::new(db.clone()));

    // Start background jobs
    worker::start_queue_worker(
        queue.clone(),
        processor.clone(),
        rollup.clone(),
        shutdown.clone(),
    )
    .await;
    catch_up_sync::start_catch_up_sync_job(db.clone(), queue.clone(), shutdown.clone()).await;
    stuck_recovery::start_stuck_recovery_job(db.clone(), queue.clone(), shutdown.clone()).await;
    aggregate_metrics_sync::start_aggregate_metrics_job(queue.clone(), shutdown.clone()).await;

    let state = AppState {
        db,
        queue: queue.clone(),
        limiter: limiter.clone(),
        processor,
        stablecoin_cache: Cache::builder()
            .max_capacity(1_000)
            .time_to_live(Duration::from_secs(300))
            .build(),
    };

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        .route("/api/contracts", get(handlers::contracts::list_contracts))
        .route("/api/contracts", post(handlers::contracts::create_contract))
        .route(
            "/api/contracts/{id}/sync",
            post(handlers::sync::trigger_sync),
        )
        .route(
            "/api/contracts/{id}/reset",
            post(handlers::sync::reset_contract),
        )
        .route(
            "/api/contracts/{id}/sync-status",
            get(handlers::sync::get_sync_status),
        )
        .route("/api/endpoints", get(handlers::endpoints::list_endpoints))
        .route("/api/endpoints", post(handlers::endpoints::create_endpoint))
        .route("/api/metrics/{ticker}", get(handlers::metrics::get_metrics))
        .layer(cors)
        .with_state(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.api_port))
        .await
        .expect("Failed to bind API port");
    tracing::info!("Server listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .expect("Server error");

    // The flag is set; pause the queue, release buckets and give in-flight
    // batches a moment to persist their cursors before forcing exit.
    tracing::info!("Shutting down: draining queue and rate limiter");
    if let Err(e) = queue.close().await {
        tracing::warn!(error = %e, "Queue close failed");
    }
    limiter.close().await;
    tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_SECS)).await;
    tracing::info!("Forced exit after grace period");
    std::process::exit(0);
}

async fn shutdown_signal(shutdown: Arc<AtomicBool>) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install shutdown signal handler");
    tracing::info!("Shutdown signal received");
    shutdown.store(true, Ordering::Relaxed);
}
