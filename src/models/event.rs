use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Broad category of a provider notification, derived from the event-type
/// prefix. Events with an unknown prefix are stored without a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventCategory {
    Payment,
    Subscription,
    Customer,
}

impl EventCategory {
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        if event_type.starts_with("PAYMENT_") {
            Some(Self::Payment)
        } else if event_type.starts_with("SUBSCRIPTION_") {
            Some(Self::Subscription)
        } else if event_type.starts_with("CUSTOMER_") {
            Some(Self::Customer)
        } else {
            None
        }
    }
}

/// Raw provider notification as persisted at ingestion time.
///
/// One row per distinct provider event ID; the row doubles as the
/// idempotency entry (the conditional insert on `event_id` is the
/// deduplication gate). Write-once; purged past the retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    /// Provider-assigned delivery identifier, unique across deliveries.
    pub event_id: String,
    pub category: Option<EventCategory>,
    /// Provider event-type string, e.g. `PAYMENT_CONFIRMED`.
    pub raw_type: String,
    /// Raw request body, kept for audit and out-of-band replay.
    pub payload: String,
    pub received_at: i64,
}
