//! Read side for entitlement checks: serves the denormalized projection.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::models::SubscriptionProjection;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/users/{user_id}/subscriptions", get(list_user_subscriptions))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Entitlement lookup by user. The projection is eventually consistent with
/// the authoritative record: callers must treat `status` accordingly.
async fn list_user_subscriptions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<SubscriptionProjection>>> {
    let conn = state.db.get()?;
    let subscriptions = queries::list_user_subscriptions(&conn, &user_id)?;
    Ok(Json(subscriptions))
}
