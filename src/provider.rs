//! Wire-format types for the billing provider's webhook notifications.
//!
//! The provider posts a JSON envelope of the form
//! `{ "event": "...", "payment": {...}, "subscription": {...}, "customer": {...} }`
//! with exactly one nested object populated per event. Parsing is permissive:
//! unknown fields are ignored and every nested field is optional, so the
//! classifier decides what a given shape means rather than the deserializer.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    /// Provider-assigned delivery identifier, unique per event.
    #[serde(default)]
    pub id: Option<String>,
    /// Provider event-type string, e.g. `PAYMENT_CONFIRMED`.
    pub event: String,
    #[serde(default)]
    pub payment: Option<PaymentPayload>,
    #[serde(default)]
    pub subscription: Option<SubscriptionPayload>,
    #[serde(default)]
    pub customer: Option<CustomerPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    /// Subscription this payment belongs to. Absent for one-off charges,
    /// which the system does not track.
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub next_due_date: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}
