use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subsync::cache::{CacheConfig, ResilienceCache, SystemClock};
use subsync::config::Config;
use subsync::db::{create_pool, init_db, queries, AppState};
use subsync::handlers;
use subsync::worker::spawn_ingest_workers;

#[derive(Parser, Debug)]
#[command(name = "subsync")]
#[command(about = "Webhook-driven subscription state reconciliation service")]
struct Cli {
    /// Delete the database and cache snapshot on exit (dev mode only,
    /// useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Spawns a background task that periodically purges webhook events past the
/// retention window. Housekeeping, not correctness: the event_id uniqueness
/// constraint is the real deduplication guard.
fn spawn_event_purge_task(state: AppState, retention_days: i64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(60 * 60); // hourly

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => match queries::purge_old_webhook_events(&conn, retention_days) {
                    Ok(count) => {
                        if count > 0 {
                            tracing::debug!("purged {} expired webhook event(s)", count);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("failed to purge webhook events: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("failed to get db connection for purge: {}", e);
                }
            }
        }
    });

    tracing::info!(
        "webhook event purge task started (retention: {} days)",
        retention_days
    );
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "subsync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    // Purge expired webhook events on startup, then hourly
    {
        let conn = db_pool.get().expect("Failed to get connection for purge");
        match queries::purge_old_webhook_events(&conn, config.event_retention_days) {
            Ok(count) if count > 0 => {
                tracing::info!(
                    "purged {} webhook event(s) older than {} days",
                    count,
                    config.event_retention_days
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("startup purge of webhook events failed: {}", e);
            }
        }
    }

    let cache = Arc::new(ResilienceCache::new(
        CacheConfig {
            snapshot_path: config.cache_snapshot_path.clone().into(),
            event_ttl_secs: config.event_retention_days * 86400,
            max_events: config.cache_max_events,
            sweep_interval: Duration::from_secs(config.cache_sweep_interval_secs),
            snapshot_interval: Duration::from_secs(config.cache_snapshot_interval_secs),
        },
        Arc::new(SystemClock),
    ));
    cache.start();

    let (jobs_tx, jobs_rx) = tokio::sync::mpsc::channel(config.ingest_queue_capacity);

    let state = AppState {
        db: db_pool,
        cache: Arc::clone(&cache),
        jobs: jobs_tx,
        webhook_token: config.webhook_token.clone(),
        ip_allowlist: Arc::new(config.ip_allowlist.clone()),
    };

    spawn_ingest_workers(state.clone(), jobs_rx, config.ingest_workers);
    spawn_event_purge_task(state.clone(), config.event_retention_days);

    let app = handlers::webhooks::router()
        .merge(handlers::entitlements::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    if cli.ephemeral && !config.dev_mode {
        tracing::warn!("--ephemeral flag ignored: not in dev mode (set SUBSYNC_ENV=dev)");
    }
    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database and cache snapshot will be deleted on exit");
    }

    tracing::info!("Subsync server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    // Final snapshot so a restart resumes from current cache state
    cache.stop();

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral state...");
        for path in [
            config.database_path.clone(),
            format!("{}-wal", config.database_path),
            format!("{}-shm", config.database_path),
            config.cache_snapshot_path.clone(),
        ] {
            let _ = std::fs::remove_file(&path);
        }
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
