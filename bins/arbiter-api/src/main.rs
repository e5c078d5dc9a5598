mod config;
mod handlers;
mod ingest;
mod store;

use axum::routing::{get, post};
use axum::Router;
use redis::aio::ConnectionManager;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use arbiter_common::bus;

use crate::config::ApiConfig;
use crate::handlers::AppState;
use crate::store::SubmissionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Submission API booting...");

    let cfg = ApiConfig::from_env();

    let db = store::connect_db(&cfg.dsn()).await?;
    store::init_schema(&db).await?;
    info!("Connected to Postgres");

    let client = redis::Client::open(cfg.broker.url.as_str())?;
    let mut bus_conn = ConnectionManager::new(client.clone()).await?;
    // Dedicated connection for the blocking result reads.
    let ingest_conn = ConnectionManager::new(client.clone()).await?;
    let cache_conn = ConnectionManager::new(client).await?;
    info!(broker = %cfg.broker.url, "Connected to broker");

    bus::ensure_group(&mut bus_conn, &cfg.broker.result_topic, &cfg.result_group_id).await?;

    let submission_store = SubmissionStore::new(db, cache_conn, cfg.cache_ttl_seconds);

    tokio::spawn(ingest::consume_results(
        submission_store.clone(),
        ingest_conn,
        cfg.broker.result_topic.clone(),
        cfg.result_group_id.clone(),
        cfg.result_consumer_name.clone(),
    ));

    let state = AppState {
        store: submission_store,
        bus: bus_conn,
        submission_topic: cfg.broker.submission_topic.clone(),
    };

    let app = Router::new()
        .route("/submissions", post(handlers::create_submission))
        .route("/submissions/:id", get(handlers::get_submission))
        .route("/users/:user_id/submissions", get(handlers::get_user_submissions))
        .route("/healthz", get(handlers::healthz))
        .with_state(state);

    let listener = TcpListener::bind(&cfg.http_addr).await?;
    info!(addr = %cfg.http_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if signal::ctrl_c().await.is_err() {
                error!("Failed to install CTRL+C handler");
            }
            info!("Shutdown signal received");
        })
        .await?;

    info!("Submission API shutdown complete");
    Ok(())
}
