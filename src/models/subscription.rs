use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Subscription lifecycle status.
///
/// No transition between these is statically forbidden: the event stream is
/// external and occasionally out of order, so the reconciler overwrites the
/// previous status with whatever the classifier supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Overdue,
    Cancelled,
    Expired,
    Refunded,
    Inactive,
}

/// Authoritative subscription record. Owned exclusively by the reconciler;
/// all mutations go through the canonical transition path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Provider-assigned subscription ID (unique key).
    pub subscription_id: String,
    pub customer_id: String,
    pub user_id: String,
    pub plan_id: Option<String>,
    pub status: SubscriptionStatus,
    pub last_event_type: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Data required to lazily create a subscription on first sight.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub subscription_id: String,
    pub customer_id: String,
    pub user_id: String,
    pub plan_id: Option<String>,
    pub status: SubscriptionStatus,
    pub last_event_type: String,
}

/// Denormalized, read-optimized copy of a subscription for entitlement
/// lookups by user. Eventually consistent with [`SubscriptionRecord`]: the
/// two writes are not transactional, so readers must not assume atomicity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionProjection {
    pub subscription_id: String,
    pub user_id: String,
    pub customer_id: String,
    pub status: SubscriptionStatus,
    pub plan_type: Option<String>,
    /// Provider-format due date, passed through when the payload carries one.
    pub next_due_date: Option<String>,
    pub updated_at: i64,
}
