mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tokio::sync::mpsc;

use crate::cache::ResilienceCache;
use crate::worker::IngestJob;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state. Every component receives its store handle from here;
/// there are no implicit singletons.
#[derive(Clone)]
pub struct AppState {
    /// Primary datastore pool (ledger, subscriptions, projection)
    pub db: DbPool,
    /// Fallback store consulted when the primary datastore fails
    pub cache: Arc<ResilienceCache>,
    /// Hand-off channel to the ingest worker pool
    pub jobs: mpsc::Sender<IngestJob>,
    /// Shared-secret expected in the webhook token header (None = disabled)
    pub webhook_token: Option<String>,
    /// Source IPs allowed to deliver webhooks (empty = disabled)
    pub ip_allowlist: Arc<Vec<String>>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
