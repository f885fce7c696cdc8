//! Delivery gateway: the HTTP boundary for billing-provider webhooks.
//!
//! The provider enforces a short response-time budget and blindly retries on
//! anything but a prompt 200, so the contract here is strict: 401 only for a
//! failed security gate, 400 only for a structurally invalid body, and 200
//! for every internally-classifiable outcome - including duplicates, orphans
//! and unrecognized event types. The only operation allowed to block the
//! response is the idempotency-ledger write; classification and
//! reconciliation run on the worker pool after the response is committed.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::db::{queries, AppState};
use crate::models::{EventCategory, WebhookEvent};
use crate::provider::ProviderEvent;
use crate::security;
use crate::worker::IngestJob;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook/billing", post(handle_billing_webhook))
}

pub async fn handle_billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // 1. Security gate. A persistent 401 needs operator attention, so this
    // is the one path where provider retries are acceptable.
    if let Err(denial) = security::authorize(
        &headers,
        state.webhook_token.as_deref(),
        &state.ip_allowlist,
    ) {
        tracing::warn!(
            "webhook rejected: {:?} (ip={:?})",
            denial,
            security::client_ip(&headers)
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"status": "error", "error": "unauthorized"})),
        )
            .into_response();
    }

    // 2. Parse. Malformed payloads are not worth a provider retry.
    let envelope: ProviderEvent = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!("malformed webhook body: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "error", "error": "invalid payload"})),
            )
                .into_response();
        }
    };
    if envelope.event.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "error": "missing event field"})),
        )
            .into_response();
    }

    let event = build_stored_event(&envelope, &body);

    // 3. Idempotency ledger: a single conditional insert, the only write
    // that may block the response.
    let is_new = match state.db.get() {
        Ok(conn) => match queries::try_record_webhook_event(&conn, &event) {
            Ok(is_new) => Some(is_new),
            Err(e) => {
                tracing::error!("ledger write failed for event {}: {}", event.event_id, e);
                None
            }
        },
        Err(e) => {
            tracing::error!("ledger unavailable for event {}: {}", event.event_id, e);
            None
        }
    };

    match is_new {
        Some(false) => {
            tracing::debug!("duplicate delivery of event {}", event.event_id);
            return (
                StatusCode::OK,
                Json(json!({"status": "success", "idempotent": true})),
            )
                .into_response();
        }
        Some(true) => {}
        None => {
            // Ledger unreachable: shadow the raw event into the resilience
            // cache and fall back to at-least-once semantics, guarded
            // downstream by the reconciler's idempotent transitions.
            state.cache.record_event(event.clone());
        }
    }

    // 4. Acknowledge now; classify and reconcile off the request path.
    enqueue(&state, IngestJob { event, envelope });
    (StatusCode::OK, Json(json!({"status": "success"}))).into_response()
}

fn build_stored_event(envelope: &ProviderEvent, body: &[u8]) -> WebhookEvent {
    // Without a provider-assigned ID there is nothing to deduplicate on; a
    // generated ID lets the event flow through, guarded by the reconciler's
    // state-level idempotence.
    let event_id = envelope
        .id
        .clone()
        .unwrap_or_else(|| format!("gen_{}", Uuid::new_v4().as_simple()));

    WebhookEvent {
        id: Uuid::new_v4().to_string(),
        event_id,
        category: EventCategory::from_event_type(&envelope.event),
        raw_type: envelope.event.clone(),
        payload: String::from_utf8_lossy(body).into_owned(),
        received_at: Utc::now().timestamp(),
    }
}

fn enqueue(state: &AppState, job: IngestJob) {
    // try_send keeps the gateway non-blocking. The response is already
    // committed to success, so a saturated queue loses this delivery's
    // processing but never its ledger row.
    if let Err(e) = state.jobs.try_send(job) {
        tracing::error!("failed to enqueue webhook for processing: {}", e);
    }
}
