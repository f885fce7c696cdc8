//! Bounded worker pool for post-acknowledgment event processing.
//!
//! The delivery gateway hands jobs off after the HTTP response is committed.
//! There is no cancellation and no caller awaits completion: once started, a
//! job runs to completion or fails into the log. A panic inside a job is
//! caught and logged so the worker stays alive.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};

use crate::classifier::{self, Classification, CanonicalTransition, Subject};
use crate::db::AppState;
use crate::models::WebhookEvent;
use crate::provider::ProviderEvent;
use crate::reconciler::{self, ApplyOutcome};

/// Unit of work handed from the gateway to the pool.
#[derive(Debug, Clone)]
pub struct IngestJob {
    /// The event as recorded (or intended to be recorded) in the ledger.
    pub event: WebhookEvent,
    pub envelope: ProviderEvent,
}

/// Spawn `count` workers draining the shared job channel.
pub fn spawn_ingest_workers(state: AppState, rx: mpsc::Receiver<IngestJob>, count: usize) {
    let rx = Arc::new(Mutex::new(rx));
    for worker_id in 0..count {
        let state = state.clone();
        let rx = Arc::clone(&rx);
        tokio::spawn(async move {
            loop {
                // lock only to wait for the next job; processing runs unlocked
                let job = { rx.lock().await.recv().await };
                let Some(job) = job else { break };
                let event_id = job.event.event_id.clone();
                let result = AssertUnwindSafe(async { process_job(&state, &job) })
                    .catch_unwind()
                    .await;
                if result.is_err() {
                    tracing::error!(
                        "ingest worker {} panicked processing event {}",
                        worker_id,
                        event_id
                    );
                }
            }
            tracing::debug!("ingest worker {} stopped", worker_id);
        });
    }
    tracing::info!("started {} ingest worker(s)", count);
}

/// Classify and reconcile one delivery. Terminal: every failure ends in the
/// log, never in an HTTP response (that was already sent).
pub fn process_job(state: &AppState, job: &IngestJob) {
    let transition = match classifier::classify(&job.envelope) {
        Classification::Transition(t) => t,
        Classification::Unrecognized => {
            tracing::info!(
                "unrecognized event type {} (event {}), dropped",
                job.envelope.event,
                job.event.event_id
            );
            return;
        }
    };

    let conn = match state.db.get() {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!(
                "primary datastore unavailable for event {}: {}",
                job.event.event_id,
                e
            );
            fall_back_to_cache(state, job, &transition);
            return;
        }
    };

    match reconciler::apply(&conn, &transition) {
        Ok(ApplyOutcome::Applied {
            subscription_id,
            created,
        }) => {
            tracing::debug!(
                "event {} applied to subscription {} (created={})",
                job.event.event_id,
                subscription_id,
                created
            );
        }
        Ok(ApplyOutcome::FannedOut { updated }) => {
            tracing::debug!(
                "event {} fanned out to {} subscription(s)",
                job.event.event_id,
                updated
            );
        }
        // already logged as a warning inside the reconciler
        Ok(ApplyOutcome::Orphan) => {}
        Err(e) => {
            tracing::error!(
                "reconciliation failed for event {}: {}",
                job.event.event_id,
                e
            );
            if e.is_infrastructure() {
                fall_back_to_cache(state, job, &transition);
            }
        }
    }
}

/// Route a failed write to the resilience cache. The raw event is always
/// cached (it carries everything an out-of-band replay needs); the record
/// and projection are shadowed too when a prior cached copy exists to build
/// on. A customer fan-out cannot be expanded without the primary store, so
/// only the raw event is kept for that case.
fn fall_back_to_cache(state: &AppState, job: &IngestJob, transition: &CanonicalTransition) {
    state.cache.record_event(job.event.clone());

    if let Subject::Subscription { subscription_id } = &transition.subject {
        if let Some(mut record) = state.cache.subscription(subscription_id) {
            record.status = transition.target_status;
            record.last_event_type = transition.source_event_type.clone();
            record.updated_at = job.event.received_at;
            let projection =
                reconciler::projection_for(&record, &transition.context, job.event.received_at);
            state.cache.put_subscription(record);
            state.cache.put_projection(projection);
        }
    }

    tracing::warn!(
        "event {} deferred to resilience cache pending out-of-band reconciliation",
        job.event.event_id
    );
}
