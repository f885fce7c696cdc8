//! Test utilities and fixtures for Subsync integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub use subsync::cache::{CacheConfig, ResilienceCache, SystemClock};
pub use subsync::db::{init_db, queries, AppState, DbPool};
pub use subsync::handlers;
pub use subsync::models::*;
pub use subsync::worker::IngestJob;

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

pub fn test_cache(dir: &std::path::Path) -> Arc<ResilienceCache> {
    Arc::new(ResilienceCache::new(
        CacheConfig {
            snapshot_path: dir.join("cache.json"),
            event_ttl_secs: 30 * 86400,
            max_events: 1000,
            sweep_interval: Duration::from_secs(300),
            snapshot_interval: Duration::from_secs(60),
        },
        Arc::new(SystemClock),
    ))
}

/// App fixture for HTTP-level tests. Uses a file-backed pool so every pooled
/// connection sees the same database, and keeps the job receiver so tests
/// can drain and process enqueued work deterministically.
pub struct TestApp {
    pub state: AppState,
    pub jobs_rx: mpsc::Receiver<IngestJob>,
    _tmp: TempDir,
}

pub fn create_test_app() -> TestApp {
    create_test_app_with_pool(4, Duration::from_secs(5))
}

/// Variant with explicit pool sizing, for simulating datastore outages
/// (max_size 1 + a held connection + a short timeout = every further
/// checkout fails).
pub fn create_test_app_with_pool(max_size: u32, timeout: Duration) -> TestApp {
    let tmp = TempDir::new().expect("Failed to create tempdir");
    let db_path = tmp.path().join("subsync_test.db");

    let manager = SqliteConnectionManager::file(&db_path);
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(timeout)
        .build(manager)
        .expect("Failed to build test pool");
    {
        let conn = pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize schema");
    }

    let (jobs_tx, jobs_rx) = mpsc::channel(64);
    let state = AppState {
        db: pool,
        cache: test_cache(tmp.path()),
        jobs: jobs_tx,
        webhook_token: None,
        ip_allowlist: Arc::new(Vec::new()),
    };

    TestApp {
        state,
        jobs_rx,
        _tmp: tmp,
    }
}

/// Router with webhook and entitlement endpoints, as wired in main.
pub fn test_router(state: AppState) -> Router {
    handlers::webhooks::router()
        .merge(handlers::entitlements::router())
        .with_state(state)
}

pub fn create_test_customer(conn: &Connection, customer_id: &str, user_id: &str) {
    queries::create_customer(conn, customer_id, user_id).expect("Failed to create test customer");
}

pub fn create_test_subscription(
    conn: &Connection,
    subscription_id: &str,
    customer_id: &str,
    user_id: &str,
    status: SubscriptionStatus,
) -> SubscriptionRecord {
    queries::create_subscription(
        conn,
        &NewSubscription {
            subscription_id: subscription_id.to_string(),
            customer_id: customer_id.to_string(),
            user_id: user_id.to_string(),
            plan_id: None,
            status,
            last_event_type: "SUBSCRIPTION_CREATED".to_string(),
        },
    )
    .expect("Failed to create test subscription")
}

/// Get the current timestamp
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
