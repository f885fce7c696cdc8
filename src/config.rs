use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Shared secret the provider sends in the webhook token header.
    /// None disables the token check.
    pub webhook_token: Option<String>,
    /// Source IPs allowed to deliver webhooks. Empty disables the check.
    pub ip_allowlist: Vec<String>,
    pub cache_snapshot_path: String,
    /// Webhook events older than this are purged (ledger housekeeping, not
    /// correctness-critical).
    pub event_retention_days: i64,
    pub cache_max_events: usize,
    pub cache_sweep_interval_secs: u64,
    pub cache_snapshot_interval_secs: u64,
    pub ingest_workers: usize,
    pub ingest_queue_capacity: usize,
    pub dev_mode: bool,
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("SUBSYNC_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = parse_env("PORT", 3000);

        let ip_allowlist = env::var("WEBHOOK_IP_ALLOWLIST")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "subsync.db".to_string()),
            webhook_token: env::var("WEBHOOK_TOKEN").ok().filter(|t| !t.is_empty()),
            ip_allowlist,
            cache_snapshot_path: env::var("CACHE_SNAPSHOT_PATH")
                .unwrap_or_else(|_| "subsync_cache.json".to_string()),
            event_retention_days: parse_env("EVENT_RETENTION_DAYS", 30),
            cache_max_events: parse_env("CACHE_MAX_EVENTS", 10_000),
            cache_sweep_interval_secs: parse_env("CACHE_SWEEP_INTERVAL_SECS", 300),
            cache_snapshot_interval_secs: parse_env("CACHE_SNAPSHOT_INTERVAL_SECS", 60),
            ingest_workers: parse_env("INGEST_WORKERS", 4),
            ingest_queue_capacity: parse_env("INGEST_QUEUE_CAPACITY", 1024),
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
