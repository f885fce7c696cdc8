//! Resilience cache: in-memory, disk-backed fallback store used when the
//! primary datastore cannot service a read or write.
//!
//! Holds the same three logical entity types as the primary store (webhook
//! events, subscription records, projections), keyed identically. Snapshots
//! are written to a local file on every mutating write and on a fixed
//! interval; the most recent snapshot is loaded on construction. A periodic
//! sweep evicts cached webhook events past the retention window, and the
//! event map is capacity-bounded with oldest-first eviction.
//!
//! The cache never delays an acknowledgment: callers write to it after the
//! HTTP response is already committed. Divergence between cache and primary
//! store is resolved out-of-band, not here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::models::{SubscriptionProjection, SubscriptionRecord, WebhookEvent};

/// Injected time source so eviction and snapshotting are testable without
/// real timers.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub snapshot_path: PathBuf,
    /// Cached webhook events older than this are evicted by the sweep.
    pub event_ttl_secs: i64,
    /// Hard bound on the event map; oldest entries are evicted first.
    pub max_events: usize,
    pub sweep_interval: Duration,
    pub snapshot_interval: Duration,
}

/// Everything the cache holds, in snapshot form.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheState {
    events: HashMap<String, WebhookEvent>,
    subscriptions: HashMap<String, SubscriptionRecord>,
    projections: HashMap<String, SubscriptionProjection>,
}

pub struct ResilienceCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ResilienceCache {
    /// Construct the cache, loading the most recent snapshot if one exists.
    /// A missing or unreadable snapshot starts the cache empty.
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let state = match std::fs::read(&config.snapshot_path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(
                        "discarding corrupt cache snapshot {}: {}",
                        config.snapshot_path.display(),
                        e
                    );
                    CacheState::default()
                }
            },
            Err(_) => CacheState::default(),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            clock,
            state: Mutex::new(state),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Spawn the maintenance task (periodic sweep + snapshot). Idempotent
    /// with respect to `stop`: the task exits when `stop` is called.
    pub fn start(self: &Arc<Self>) {
        let cache = Arc::clone(self);
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(cache.config.sweep_interval);
            let mut snapshot = tokio::time::interval(cache.config.snapshot_interval);
            // both intervals fire immediately on the first tick
            sweep.tick().await;
            snapshot.tick().await;
            loop {
                tokio::select! {
                    _ = sweep.tick() => {
                        let evicted = cache.sweep();
                        if evicted > 0 {
                            tracing::debug!("cache sweep evicted {} expired event(s)", evicted);
                        }
                    }
                    _ = snapshot.tick() => {
                        if let Err(e) = cache.snapshot() {
                            tracing::warn!("periodic cache snapshot failed: {}", e);
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("resilience cache maintenance task stopped");
        });
    }

    /// Stop the maintenance task and write a final snapshot.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.snapshot() {
            tracing::warn!("final cache snapshot failed: {}", e);
        }
    }

    /// Record a webhook event. Write-once: a redelivered event never
    /// overwrites the cached original.
    pub fn record_event(&self, event: WebhookEvent) {
        {
            let mut state = self.lock_state();
            if !state.events.contains_key(&event.event_id) {
                state.events.insert(event.event_id.clone(), event);
                Self::enforce_event_bound(&mut state, self.config.max_events);
            }
        }
        self.persist();
    }

    pub fn put_subscription(&self, record: SubscriptionRecord) {
        {
            let mut state = self.lock_state();
            state
                .subscriptions
                .insert(record.subscription_id.clone(), record);
        }
        self.persist();
    }

    pub fn put_projection(&self, projection: SubscriptionProjection) {
        {
            let mut state = self.lock_state();
            state
                .projections
                .insert(projection.subscription_id.clone(), projection);
        }
        self.persist();
    }

    pub fn event(&self, event_id: &str) -> Option<WebhookEvent> {
        self.lock_state().events.get(event_id).cloned()
    }

    pub fn subscription(&self, subscription_id: &str) -> Option<SubscriptionRecord> {
        self.lock_state().subscriptions.get(subscription_id).cloned()
    }

    pub fn projection(&self, subscription_id: &str) -> Option<SubscriptionProjection> {
        self.lock_state().projections.get(subscription_id).cloned()
    }

    pub fn event_count(&self) -> usize {
        self.lock_state().events.len()
    }

    /// Evict webhook events older than the TTL. Returns the eviction count.
    pub fn sweep(&self) -> usize {
        let cutoff = self.clock.now() - self.config.event_ttl_secs;
        let evicted = {
            let mut state = self.lock_state();
            let before = state.events.len();
            state.events.retain(|_, ev| ev.received_at >= cutoff);
            before - state.events.len()
        };
        if evicted > 0 {
            self.persist();
        }
        evicted
    }

    /// Write the current state to the snapshot file atomically
    /// (temp file + rename).
    pub fn snapshot(&self) -> std::io::Result<()> {
        let bytes = {
            let state = self.lock_state();
            serde_json::to_vec(&*state).map_err(std::io::Error::other)?
        };
        let tmp = self.config.snapshot_path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.config.snapshot_path)?;
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.snapshot() {
            tracing::warn!("cache snapshot failed: {}", e);
        }
    }

    fn enforce_event_bound(state: &mut CacheState, max_events: usize) {
        while state.events.len() > max_events {
            let oldest = state
                .events
                .values()
                .min_by_key(|ev| ev.received_at)
                .map(|ev| ev.event_id.clone());
            match oldest {
                Some(event_id) => {
                    state.events.remove(&event_id);
                }
                None => break,
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CacheState> {
        // a poisoned lock still holds consistent data for this structure
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
