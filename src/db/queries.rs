use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    query_all, query_one, SUBSCRIPTION_COLS, USER_SUBSCRIPTION_COLS, WEBHOOK_EVENT_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Idempotency Ledger ============

/// Atomically record an inbound webhook event, returning true if this is the
/// first delivery. A redelivery of the same provider event ID inserts nothing
/// and returns false.
///
/// Uses INSERT OR IGNORE against the UNIQUE constraint on event_id so two
/// concurrent deliveries of the same event cannot both observe "not yet
/// recorded". This is the sole concurrency-control point of the ingest path.
pub fn try_record_webhook_event(conn: &Connection, event: &WebhookEvent) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (id, event_id, category, raw_type, payload, received_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.id,
            event.event_id,
            event.category.map(|c| c.as_ref().to_string()),
            event.raw_type,
            event.payload,
            event.received_at
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_webhook_event(conn: &Connection, event_id: &str) -> Result<Option<WebhookEvent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM webhook_events WHERE event_id = ?1",
            WEBHOOK_EVENT_COLS
        ),
        &[&event_id],
    )
}

pub fn count_webhook_events(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM webhook_events", [], |row| row.get(0))?;
    Ok(count)
}

/// Purge webhook events beyond the retention period. Housekeeping only:
/// the provider stops retrying long before the window closes, so deleting
/// old rows cannot reopen a deduplication hole that matters.
/// Returns the number of deleted records.
pub fn purge_old_webhook_events(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * 86400);
    let deleted = conn.execute(
        "DELETE FROM webhook_events WHERE received_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ Customers ============

/// Register a customer -> user mapping. In production this is written by the
/// external checkout collaborator; the reconciler only reads it.
pub fn create_customer(conn: &Connection, customer_id: &str, user_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO customers (customer_id, user_id, created_at) VALUES (?1, ?2, ?3)",
        params![customer_id, user_id, now()],
    )?;
    Ok(())
}

pub fn resolve_user_for_customer(conn: &Connection, customer_id: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT user_id FROM customers WHERE customer_id = ?1",
        params![customer_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

// ============ Subscriptions (authoritative) ============

pub fn create_subscription(conn: &Connection, input: &NewSubscription) -> Result<SubscriptionRecord> {
    let ts = now();
    conn.execute(
        "INSERT INTO subscriptions (subscription_id, customer_id, user_id, plan_id, status, last_event_type, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            input.subscription_id,
            input.customer_id,
            input.user_id,
            input.plan_id,
            input.status.as_ref(),
            input.last_event_type,
            ts,
            ts
        ],
    )?;
    Ok(SubscriptionRecord {
        subscription_id: input.subscription_id.clone(),
        customer_id: input.customer_id.clone(),
        user_id: input.user_id.clone(),
        plan_id: input.plan_id.clone(),
        status: input.status,
        last_event_type: input.last_event_type.clone(),
        created_at: ts,
        updated_at: ts,
    })
}

pub fn get_subscription(conn: &Connection, subscription_id: &str) -> Result<Option<SubscriptionRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE subscription_id = ?1",
            SUBSCRIPTION_COLS
        ),
        &[&subscription_id],
    )
}

/// Overwrite a subscription's status unconditionally (last write wins; the
/// provider gives no ordering guarantee to do better with).
pub fn update_subscription_status(
    conn: &Connection,
    subscription_id: &str,
    status: SubscriptionStatus,
    last_event_type: &str,
    updated_at: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE subscriptions SET status = ?1, last_event_type = ?2, updated_at = ?3 WHERE subscription_id = ?4",
        params![status.as_ref(), last_event_type, updated_at, subscription_id],
    )?;
    Ok(affected > 0)
}

pub fn count_subscriptions(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM subscriptions", [], |row| row.get(0))?;
    Ok(count)
}

/// All subscriptions owned by a customer (for the customer-deletion fan-out).
pub fn list_subscriptions_for_customer(
    conn: &Connection,
    customer_id: &str,
) -> Result<Vec<SubscriptionRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE customer_id = ?1 ORDER BY created_at",
            SUBSCRIPTION_COLS
        ),
        &[&customer_id],
    )
}

// ============ User Subscriptions (projection) ============

/// Insert-or-update the denormalized entitlement row for a subscription.
/// A NULL plan_type or next_due_date never clears a previously known value.
pub fn upsert_user_subscription(conn: &Connection, p: &SubscriptionProjection) -> Result<()> {
    conn.execute(
        "INSERT INTO user_subscriptions (subscription_id, user_id, customer_id, status, plan_type, next_due_date, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(subscription_id) DO UPDATE SET
             status = excluded.status,
             plan_type = COALESCE(excluded.plan_type, plan_type),
             next_due_date = COALESCE(excluded.next_due_date, next_due_date),
             updated_at = excluded.updated_at",
        params![
            p.subscription_id,
            p.user_id,
            p.customer_id,
            p.status.as_ref(),
            p.plan_type,
            p.next_due_date,
            p.updated_at
        ],
    )?;
    Ok(())
}

pub fn get_user_subscription(
    conn: &Connection,
    subscription_id: &str,
) -> Result<Option<SubscriptionProjection>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM user_subscriptions WHERE subscription_id = ?1",
            USER_SUBSCRIPTION_COLS
        ),
        &[&subscription_id],
    )
}

/// Entitlement lookup: all projected subscriptions for a user.
pub fn list_user_subscriptions(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<SubscriptionProjection>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM user_subscriptions WHERE user_id = ?1 ORDER BY updated_at DESC",
            USER_SUBSCRIPTION_COLS
        ),
        &[&user_id],
    )
}
