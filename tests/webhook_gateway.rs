//! Delivery gateway HTTP tests: response contract, idempotency, security
//! gates, and acknowledgment independence from the primary datastore.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn post_webhook(
    state: &AppState,
    body: &str,
    extra_headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook/billing")
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in extra_headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();

    let response = test_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn get_json(state: &AppState, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = test_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn payment_confirmed(event_id: &str, subscription_id: &str, customer_id: &str) -> String {
    json!({
        "id": event_id,
        "event": "PAYMENT_CONFIRMED",
        "payment": {
            "subscription": subscription_id,
            "customer": customer_id
        }
    })
    .to_string()
}

#[tokio::test]
async fn test_malformed_body_returns_400_without_ledger_entry() {
    let app = create_test_app();

    // No event field at all
    let (status, _) = post_webhook(&app.state, "{}", &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Not JSON
    let (status, _) = post_webhook(&app.state, "not json", &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Empty event field
    let (status, _) = post_webhook(&app.state, r#"{"event": ""}"#, &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let conn = app.state.db.get().unwrap();
    assert_eq!(
        queries::count_webhook_events(&conn).unwrap(),
        0,
        "rejected deliveries must not create ledger entries"
    );
}

#[tokio::test]
async fn test_shared_secret_gate() {
    let app = create_test_app();
    let mut state = app.state.clone();
    state.webhook_token = Some("whsec_test".to_string());

    let body = payment_confirmed("evt_1", "sub_1", "cus_1");

    let (status, _) = post_webhook(&state, &body, &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "missing token");

    let (status, _) = post_webhook(&state, &body, &[("x-webhook-token", "wrong")]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "bad token");

    let (status, _) = post_webhook(&state, &body, &[("x-webhook-token", "whsec_test")]).await;
    assert_eq!(status, StatusCode::OK, "correct token");
}

#[tokio::test]
async fn test_ip_allowlist_gate() {
    let app = create_test_app();
    let mut state = app.state.clone();
    state.ip_allowlist = Arc::new(vec!["203.0.113.7".to_string()]);

    let body = payment_confirmed("evt_1", "sub_1", "cus_1");

    let (status, _) = post_webhook(&state, &body, &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "no source ip");

    let (status, _) = post_webhook(&state, &body, &[("x-forwarded-for", "198.51.100.1")]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "ip not in allowlist");

    let (status, _) = post_webhook(&state, &body, &[("x-forwarded-for", "203.0.113.7")]).await;
    assert_eq!(status, StatusCode::OK, "allowlisted ip");
}

#[tokio::test]
async fn test_valid_event_acknowledged_and_recorded() {
    let mut app = create_test_app();

    let (status, body) =
        post_webhook(&app.state, &payment_confirmed("evt_1", "sub_1", "cus_1"), &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let conn = app.state.db.get().unwrap();
    let event = queries::get_webhook_event(&conn, "evt_1")
        .unwrap()
        .expect("ledger entry should exist");
    assert_eq!(event.raw_type, "PAYMENT_CONFIRMED");
    assert_eq!(event.category, Some(EventCategory::Payment));

    // Exactly one job handed to the worker pool
    assert!(app.jobs_rx.try_recv().is_ok());
    assert!(app.jobs_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_duplicate_delivery_is_idempotent() {
    let mut app = create_test_app();
    let body = payment_confirmed("evt_dup", "sub_1", "cus_1");

    let (status, first) = post_webhook(&app.state, &body, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(first.get("idempotent").is_none());

    let (status, second) = post_webhook(&app.state, &body, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["idempotent"], true);

    let conn = app.state.db.get().unwrap();
    assert_eq!(queries::count_webhook_events(&conn).unwrap(), 1);

    // Only the first delivery reaches the worker pool
    assert!(app.jobs_rx.try_recv().is_ok());
    assert!(app.jobs_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_full_pipeline_creates_subscription_and_projection() {
    let mut app = create_test_app();
    {
        let conn = app.state.db.get().unwrap();
        create_test_customer(&conn, "cus_1", "user_1");
    }

    let (status, _) =
        post_webhook(&app.state, &payment_confirmed("evt_1", "sub_1", "cus_1"), &[]).await;
    assert_eq!(status, StatusCode::OK);

    // Drain the queue and run the worker's processing step synchronously
    let job = app.jobs_rx.try_recv().expect("job should be queued");
    subsync::worker::process_job(&app.state, &job);

    let conn = app.state.db.get().unwrap();
    let record = queries::get_subscription(&conn, "sub_1")
        .unwrap()
        .expect("subscription should be created");
    assert_eq!(record.status, SubscriptionStatus::Active);
    assert_eq!(record.user_id, "user_1");

    let projection = queries::get_user_subscription(&conn, "sub_1")
        .unwrap()
        .expect("projection should be created");
    assert_eq!(projection.status, record.status);
    drop(conn);

    // The entitlement read side serves the projection
    let (status, body) = get_json(&app.state, "/users/user_1/subscriptions").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().expect("array response");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["subscription_id"], "sub_1");
    assert_eq!(rows[0]["status"], "active");
}

#[tokio::test]
async fn test_redelivered_payload_processed_once() {
    let mut app = create_test_app();
    {
        let conn = app.state.db.get().unwrap();
        create_test_customer(&conn, "cus_1", "user_1");
    }
    let body = payment_confirmed("evt_1", "sub_1", "cus_1");

    post_webhook(&app.state, &body, &[]).await;
    post_webhook(&app.state, &body, &[]).await;

    while let Ok(job) = app.jobs_rx.try_recv() {
        subsync::worker::process_job(&app.state, &job);
    }

    let conn = app.state.db.get().unwrap();
    assert_eq!(queries::count_subscriptions(&conn).unwrap(), 1);
    assert_eq!(queries::count_webhook_events(&conn).unwrap(), 1);
}

#[tokio::test]
async fn test_ack_is_independent_of_datastore_availability() {
    // Pool of one connection with a short checkout timeout: holding the only
    // connection simulates a primary-store outage.
    let app = create_test_app_with_pool(1, Duration::from_millis(200));
    let _held = app.state.db.get().unwrap();

    let (status, body) =
        post_webhook(&app.state, &payment_confirmed("evt_1", "sub_1", "cus_1"), &[]).await;
    assert_eq!(
        status,
        StatusCode::OK,
        "delivery must be acknowledged even when the datastore is down"
    );
    assert_eq!(body["status"], "success");

    // The raw event was routed to the resilience cache instead
    assert_eq!(app.state.cache.event_count(), 1);
    assert!(app.state.cache.event("evt_1").is_some());
}

#[tokio::test]
async fn test_unrecognized_event_acknowledged_without_state_change() {
    let mut app = create_test_app();

    let body = json!({
        "id": "evt_x",
        "event": "PAYMENT_SPLIT_CREATED",
        "payment": {"subscription": "sub_1", "customer": "cus_1"}
    })
    .to_string();

    let (status, _) = post_webhook(&app.state, &body, &[]).await;
    assert_eq!(status, StatusCode::OK);

    let job = app.jobs_rx.try_recv().expect("job should be queued");
    subsync::worker::process_job(&app.state, &job);

    let conn = app.state.db.get().unwrap();
    assert_eq!(queries::count_subscriptions(&conn).unwrap(), 0);
    // The event is still in the ledger for audit
    assert_eq!(queries::count_webhook_events(&conn).unwrap(), 1);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();
    let (status, body) = get_json(&app.state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
