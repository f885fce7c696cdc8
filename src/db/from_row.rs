//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupt data.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const WEBHOOK_EVENT_COLS: &str = "id, event_id, category, raw_type, payload, received_at";

pub const SUBSCRIPTION_COLS: &str =
    "subscription_id, customer_id, user_id, plan_id, status, last_event_type, created_at, updated_at";

pub const USER_SUBSCRIPTION_COLS: &str =
    "subscription_id, user_id, customer_id, status, plan_type, next_due_date, updated_at";

// ============ FromRow Implementations ============

impl FromRow for WebhookEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        // category is NULL for event types with an unknown prefix
        let category = row
            .get::<_, Option<String>>(2)?
            .and_then(|s| s.parse().ok());
        Ok(WebhookEvent {
            id: row.get(0)?,
            event_id: row.get(1)?,
            category,
            raw_type: row.get(3)?,
            payload: row.get(4)?,
            received_at: row.get(5)?,
        })
    }
}

impl FromRow for SubscriptionRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(SubscriptionRecord {
            subscription_id: row.get(0)?,
            customer_id: row.get(1)?,
            user_id: row.get(2)?,
            plan_id: row.get(3)?,
            status: parse_enum(row, 4, "status")?,
            last_event_type: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

impl FromRow for SubscriptionProjection {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(SubscriptionProjection {
            subscription_id: row.get(0)?,
            user_id: row.get(1)?,
            customer_id: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            plan_type: row.get(4)?,
            next_due_date: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}
