//! Applies canonical transitions to the authoritative subscription record
//! and propagates them to the denormalized entitlement projection.
//!
//! Transitions are idempotent at the state level: applying the same
//! transition for the same subject twice leaves both stores in the same
//! final state. Status writes are last-write-wins by design - the provider
//! gives no sequence number or ordering guarantee, so a late-arriving older
//! event can overwrite a newer status. That hazard is accepted, not fixed.

use chrono::Utc;
use rusqlite::Connection;

use crate::classifier::{CanonicalTransition, Subject, TransitionContext};
use crate::db::queries;
use crate::error::Result;
use crate::models::{NewSubscription, SubscriptionProjection, SubscriptionRecord};

/// Outcome of applying a transition. Orphans are successes, not errors:
/// the provider must not retry them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Authoritative record updated, or lazily created on first sight.
    Applied {
        subscription_id: String,
        created: bool,
    },
    /// Customer fan-out expanded into one update per owned subscription.
    FannedOut { updated: usize },
    /// Subject could not be resolved to an existing or creatable record.
    Orphan,
}

/// Apply a canonical transition against the primary datastore.
pub fn apply(conn: &Connection, transition: &CanonicalTransition) -> Result<ApplyOutcome> {
    match &transition.subject {
        Subject::Subscription { subscription_id } => {
            apply_to_subscription(conn, subscription_id, transition)
        }
        Subject::Customer { customer_id } => apply_fan_out(conn, customer_id, transition),
    }
}

fn apply_to_subscription(
    conn: &Connection,
    subscription_id: &str,
    transition: &CanonicalTransition,
) -> Result<ApplyOutcome> {
    let now = Utc::now().timestamp();

    match queries::get_subscription(conn, subscription_id)? {
        Some(existing) => {
            queries::update_subscription_status(
                conn,
                subscription_id,
                transition.target_status,
                &transition.source_event_type,
                now,
            )?;
            let updated = SubscriptionRecord {
                status: transition.target_status,
                last_event_type: transition.source_event_type.clone(),
                updated_at: now,
                ..existing
            };
            propagate_projection(conn, &updated, &transition.context, now);
            Ok(ApplyOutcome::Applied {
                subscription_id: subscription_id.to_string(),
                created: false,
            })
        }
        None => create_if_resolvable(conn, subscription_id, transition, now),
    }
}

/// Lazy creation on first sight of a subscription ID. Requires the payload
/// to carry a customer reference that resolves to a known user; otherwise
/// the event is an orphan and is dropped without creating a record.
fn create_if_resolvable(
    conn: &Connection,
    subscription_id: &str,
    transition: &CanonicalTransition,
    now: i64,
) -> Result<ApplyOutcome> {
    let Some(customer_id) = transition.context.customer_id.as_deref() else {
        tracing::warn!(
            "orphan event {}: subscription {} unknown and payload carries no customer",
            transition.source_event_type,
            subscription_id
        );
        return Ok(ApplyOutcome::Orphan);
    };

    let Some(user_id) = queries::resolve_user_for_customer(conn, customer_id)? else {
        tracing::warn!(
            "orphan event {}: subscription {} unknown and customer {} does not resolve to a user",
            transition.source_event_type,
            subscription_id,
            customer_id
        );
        return Ok(ApplyOutcome::Orphan);
    };

    let record = queries::create_subscription(
        conn,
        &NewSubscription {
            subscription_id: subscription_id.to_string(),
            customer_id: customer_id.to_string(),
            user_id,
            plan_id: transition.context.plan_id.clone(),
            status: transition.target_status,
            last_event_type: transition.source_event_type.clone(),
        },
    )?;
    propagate_projection(conn, &record, &transition.context, now);

    tracing::info!(
        "created subscription {} with status {} (customer {})",
        subscription_id,
        record.status.as_ref(),
        customer_id
    );
    Ok(ApplyOutcome::Applied {
        subscription_id: subscription_id.to_string(),
        created: true,
    })
}

/// Customer deletion: cancel every subscription the customer owns.
fn apply_fan_out(
    conn: &Connection,
    customer_id: &str,
    transition: &CanonicalTransition,
) -> Result<ApplyOutcome> {
    let subscriptions = queries::list_subscriptions_for_customer(conn, customer_id)?;
    if subscriptions.is_empty() {
        tracing::info!(
            "{} for customer {} matched no subscriptions",
            transition.source_event_type,
            customer_id
        );
        return Ok(ApplyOutcome::FannedOut { updated: 0 });
    }

    let now = Utc::now().timestamp();
    let mut updated = 0;
    for existing in subscriptions {
        queries::update_subscription_status(
            conn,
            &existing.subscription_id,
            transition.target_status,
            &transition.source_event_type,
            now,
        )?;
        let record = SubscriptionRecord {
            status: transition.target_status,
            last_event_type: transition.source_event_type.clone(),
            updated_at: now,
            ..existing
        };
        propagate_projection(conn, &record, &transition.context, now);
        updated += 1;
    }

    tracing::info!(
        "{} for customer {}: {} subscription(s) set to {}",
        transition.source_event_type,
        customer_id,
        updated,
        transition.target_status.as_ref()
    );
    Ok(ApplyOutcome::FannedOut { updated })
}

/// Second, independent write: mirror the record's status into the
/// entitlement projection. A failure here must not roll back the
/// authoritative write; it is logged and left for an out-of-band repair
/// sweep.
fn propagate_projection(
    conn: &Connection,
    record: &SubscriptionRecord,
    context: &TransitionContext,
    now: i64,
) {
    let projection = projection_for(record, context, now);
    if let Err(e) = queries::upsert_user_subscription(conn, &projection) {
        tracing::error!(
            "failed to propagate projection for subscription {}: {}",
            record.subscription_id,
            e
        );
    }
}

/// Derive the projection row for a subscription record.
pub fn projection_for(
    record: &SubscriptionRecord,
    context: &TransitionContext,
    now: i64,
) -> SubscriptionProjection {
    SubscriptionProjection {
        subscription_id: record.subscription_id.clone(),
        user_id: record.user_id.clone(),
        customer_id: record.customer_id.clone(),
        status: record.status,
        plan_type: record.plan_id.clone(),
        next_due_date: context.next_due_date.clone(),
        updated_at: now,
    }
}
