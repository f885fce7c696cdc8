//! Maps provider event-type strings and nested payload shapes onto canonical
//! subscription-state transitions.
//!
//! The mapping is a static lookup table: every recognized provider string
//! appears in [`lookup`], and anything else classifies as `Unrecognized`,
//! which callers log and drop without error. Payload shapes are validated in
//! one place here; nothing downstream probes dynamic fields.

use crate::models::{EventCategory, SubscriptionStatus};
use crate::provider::ProviderEvent;

/// What a transition applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// A single subscription, addressed by provider subscription ID.
    Subscription { subscription_id: String },
    /// Every subscription owned by a customer (fan-out: the reconciler
    /// expands this into one update per matching subscription).
    Customer { customer_id: String },
}

/// Payload context carried along for lazy record creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionContext {
    pub customer_id: Option<String>,
    pub plan_id: Option<String>,
    pub next_due_date: Option<String>,
}

/// Normalized instruction derived from a raw provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalTransition {
    pub category: EventCategory,
    pub subject: Subject,
    pub target_status: SubscriptionStatus,
    /// Original provider event type, for audit and `last_event_type`.
    pub source_event_type: String,
    pub context: TransitionContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Transition(CanonicalTransition),
    /// Event type not in the mapping table, or the payload lacks the subject
    /// reference the category requires (e.g. a payment with no subscription).
    Unrecognized,
}

/// Static event-type table.
fn lookup(event_type: &str) -> Option<(EventCategory, SubscriptionStatus)> {
    use EventCategory::*;
    use SubscriptionStatus::*;
    match event_type {
        "PAYMENT_CONFIRMED" | "PAYMENT_RECEIVED" | "PAYMENT_APPROVED" => Some((Payment, Active)),
        "PAYMENT_OVERDUE" | "PAYMENT_REJECTED" | "PAYMENT_DENIED" | "PAYMENT_CHARGEBACK" => {
            Some((Payment, Overdue))
        }
        "PAYMENT_DELETED" | "PAYMENT_REFUNDED" | "PAYMENT_CANCELLED" => Some((Payment, Cancelled)),
        "SUBSCRIPTION_CREATED" => Some((Subscription, Pending)),
        "SUBSCRIPTION_RENEWED" | "SUBSCRIPTION_UPDATED" | "SUBSCRIPTION_ACTIVATED" => {
            Some((Subscription, Active))
        }
        "SUBSCRIPTION_CANCELED" | "SUBSCRIPTION_CANCELLED" | "SUBSCRIPTION_DELETED" => {
            Some((Subscription, Cancelled))
        }
        "SUBSCRIPTION_EXPIRED" => Some((Subscription, Expired)),
        "CUSTOMER_DELETED" => Some((Customer, Cancelled)),
        _ => None,
    }
}

/// Classify a parsed provider envelope into a canonical transition.
///
/// Pure and synchronous; safe to call on the request path.
pub fn classify(envelope: &ProviderEvent) -> Classification {
    let Some((category, target_status)) = lookup(&envelope.event) else {
        return Classification::Unrecognized;
    };

    let transition = |subject: Subject, context: TransitionContext| {
        Classification::Transition(CanonicalTransition {
            category,
            subject,
            target_status,
            source_event_type: envelope.event.clone(),
            context,
        })
    };

    match category {
        EventCategory::Payment => {
            let Some(payment) = &envelope.payment else {
                return Classification::Unrecognized;
            };
            // Payments without a subscription reference are one-off charges;
            // only subscription-scoped state is tracked.
            let Some(subscription_id) = payment.subscription.clone() else {
                return Classification::Unrecognized;
            };
            transition(
                Subject::Subscription { subscription_id },
                TransitionContext {
                    customer_id: payment.customer.clone(),
                    plan_id: None,
                    next_due_date: payment.due_date.clone(),
                },
            )
        }
        EventCategory::Subscription => {
            let Some(subscription) = &envelope.subscription else {
                return Classification::Unrecognized;
            };
            let Some(subscription_id) = subscription.id.clone() else {
                return Classification::Unrecognized;
            };
            transition(
                Subject::Subscription { subscription_id },
                TransitionContext {
                    customer_id: subscription.customer.clone(),
                    plan_id: subscription.plan.clone(),
                    next_due_date: subscription.next_due_date.clone(),
                },
            )
        }
        EventCategory::Customer => {
            let Some(customer) = &envelope.customer else {
                return Classification::Unrecognized;
            };
            let Some(customer_id) = customer.id.clone() else {
                return Classification::Unrecognized;
            };
            transition(Subject::Customer { customer_id }, TransitionContext::default())
        }
    }
}
