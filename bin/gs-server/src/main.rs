//! GraphSync Server
//!
//! Single-process deployment of the sync service: webhook ingestion API,
//! the scheduler tick loop, and stale event recovery, all over one SQLite
//! store.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GS_DB_URL` | - | SQLite connection URL (required) |
//! | `GS_HTTP_ADDR` | `0.0.0.0:8080` | HTTP listen address |
//! | `GS_TICK_INTERVAL_MS` | `5000` | Scheduler tick interval |
//! | `GS_BATCH_SIZE` | `50` | Max events claimed per tick |
//! | `GS_EVENT_TIMEOUT_SECS` | `30` | Per-event processing timeout |
//! | `GS_STALE_CHECK_INTERVAL_SECS` | `60` | Stale recovery check interval |
//! | `GS_STALE_THRESHOLD_SECS` | `300` | PROCESSING age before reclaim |
//! | `GS_GRAPH_BASE_URL` | `http://localhost:9000` | Knowledge-graph service URL |
//! | `GS_GRAPH_API_KEY` | - | Knowledge-graph API key (optional) |
//! | `RUST_LOG` | `info` | Log level |
//! | `LOG_FORMAT` | `text` | `json` or `text` |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

use gs_api::AppState;
use gs_pipeline::{
    HttpGraphPublisher, ManualRetryService, SchedulerConfig, StaleRecovery, StaleRecoveryConfig,
    SyncScheduler, WebhookReceiver,
};
use gs_store::{SqliteConfigProvider, SqliteSyncEventRepository, SyncEventRepository};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{} environment variable is required", key))
}

#[tokio::main]
async fn main() -> Result<()> {
    gs_common::logging::init_logging("gs-server");

    info!("Starting GraphSync server");

    let db_url = env_required("GS_DB_URL")?;
    let http_addr: SocketAddr = env_or("GS_HTTP_ADDR", "0.0.0.0:8080").parse()?;
    let tick_interval_ms: u64 = env_or_parse("GS_TICK_INTERVAL_MS", 5000);
    let batch_size: u32 = env_or_parse("GS_BATCH_SIZE", 50);
    let event_timeout_secs: u64 = env_or_parse("GS_EVENT_TIMEOUT_SECS", 30);
    let stale_check_secs: u64 = env_or_parse("GS_STALE_CHECK_INTERVAL_SECS", 60);
    let stale_threshold_secs: u64 = env_or_parse("GS_STALE_THRESHOLD_SECS", 300);
    let graph_base_url = env_or("GS_GRAPH_BASE_URL", "http://localhost:9000");
    let graph_api_key = std::env::var("GS_GRAPH_API_KEY").ok();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Store
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;
    let store = Arc::new(SqliteSyncEventRepository::new(pool.clone()));
    store.init_schema().await?;
    info!("SQLite store initialized: {}", db_url);

    let configs = Arc::new(SqliteConfigProvider::new(pool));
    let publisher = Arc::new(HttpGraphPublisher::new(
        graph_base_url.clone(),
        graph_api_key,
    ));
    info!("Publishing graph messages to {}", graph_base_url);

    // Scheduler
    let scheduler = Arc::new(SyncScheduler::new(
        SchedulerConfig {
            enabled: true,
            tick_interval: Duration::from_millis(tick_interval_ms),
            batch_size,
            event_timeout: Duration::from_secs(event_timeout_secs),
        },
        store.clone(),
        configs.clone(),
        publisher,
    ));
    scheduler.start().await;

    // Stale event recovery
    let recovery = StaleRecovery::new(
        StaleRecoveryConfig {
            enabled: true,
            check_interval: Duration::from_secs(stale_check_secs),
            stuck_threshold: Duration::from_secs(stale_threshold_secs),
            batch_size: 100,
        },
        store.clone(),
    );
    let recovery_handle = tokio::spawn(recovery.run(shutdown_tx.subscribe()));

    // HTTP API
    let state = AppState {
        receiver: Arc::new(WebhookReceiver::new(configs, store.clone())),
        retry: Arc::new(ManualRetryService::new(store.clone())),
        store,
    };
    let app = gs_api::router(state);

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    info!("HTTP API listening on http://{}", http_addr);

    let server_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        })
    };

    info!("GraphSync server started");
    info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received...");

    scheduler.stop().await;
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = server_handle.await;
        let _ = recovery_handle.await;
    })
    .await;

    info!("GraphSync server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
