//! Typed webhook events
//!
//! Only the fields reconciliation needs are decoded. Anything else in the
//! payload is ignored, so newer processor API versions keep parsing.

use std::collections::HashMap;

use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::gateway::CheckoutPurpose;
use crate::ledger::BillingPeriod;

pub mod event_types {
    pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
    pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
    pub const PAYMENT_INTENT_FAILED: &str = "payment_intent.payment_failed";
    pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
    pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";
    pub const INVOICE_PAYMENT_SUCCEEDED: &str = "invoice.payment_succeeded";
    pub const INVOICE_PAYMENT_FAILED: &str = "invoice.payment_failed";
}

/// Billing reason the processor puts on renewal invoices
pub const BILLING_REASON_SUBSCRIPTION_CYCLE: &str = "subscription_cycle";

#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub id: String,
    pub event_type: String,
    pub created: i64,
    pub kind: PaymentEventKind,
}

#[derive(Debug, Clone)]
pub enum PaymentEventKind {
    CheckoutCompleted(CompletedCheckout),
    PaymentSucceeded(SucceededPayment),
    PaymentFailed {
        payment_intent_id: String,
        failure_message: Option<String>,
    },
    SubscriptionUpdated {
        subscription_id: String,
        status: String,
        period: Option<BillingPeriod>,
    },
    SubscriptionDeleted {
        subscription_id: String,
    },
    RecurringPaymentSucceeded {
        subscription_id: Option<String>,
        billing_reason: Option<String>,
        period: Option<BillingPeriod>,
    },
    RecurringPaymentFailed {
        subscription_id: Option<String>,
    },
    Unhandled,
}

#[derive(Debug, Clone)]
pub struct CompletedCheckout {
    pub session_id: String,
    pub payment_intent_id: Option<String>,
    pub subscription_id: Option<String>,
    pub amount_total_cents: Option<i64>,
    pub purpose: Option<CheckoutPurpose>,
}

impl CompletedCheckout {
    /// Idempotency key shared with the matching `payment_intent.succeeded`.
    /// Falls back to the session id for sessions without a payment intent.
    pub fn transaction_id(&self) -> &str {
        self.payment_intent_id.as_deref().unwrap_or(&self.session_id)
    }
}

#[derive(Debug, Clone)]
pub struct SucceededPayment {
    pub payment_intent_id: String,
    pub amount_cents: i64,
    pub purpose: Option<CheckoutPurpose>,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: i64,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct RawCheckoutSession {
    id: String,
    payment_intent: Option<String>,
    subscription: Option<String>,
    amount_total: Option<i64>,
    metadata: Option<HashMap<String, String>>,
}

#[derive(Deserialize)]
struct RawPaymentIntent {
    id: String,
    #[serde(default)]
    amount: i64,
    amount_received: Option<i64>,
    metadata: Option<HashMap<String, String>>,
    last_payment_error: Option<RawPaymentError>,
}

#[derive(Deserialize)]
struct RawPaymentError {
    message: Option<String>,
}

#[derive(Deserialize)]
struct RawSubscription {
    id: String,
    #[serde(default)]
    status: String,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
}

#[derive(Deserialize)]
struct RawInvoice {
    subscription: Option<String>,
    billing_reason: Option<String>,
    lines: Option<RawInvoiceLines>,
}

#[derive(Deserialize)]
struct RawInvoiceLines {
    #[serde(default)]
    data: Vec<RawInvoiceLine>,
}

#[derive(Deserialize)]
struct RawInvoiceLine {
    period: Option<RawPeriod>,
}

#[derive(Deserialize)]
struct RawPeriod {
    start: i64,
    end: i64,
}

fn billing_period(start: Option<i64>, end: Option<i64>) -> Option<BillingPeriod> {
    Some(BillingPeriod {
        start: OffsetDateTime::from_unix_timestamp(start?).ok()?,
        end: OffsetDateTime::from_unix_timestamp(end?).ok()?,
    })
}

fn purpose(metadata: Option<&HashMap<String, String>>) -> Option<CheckoutPurpose> {
    metadata.and_then(CheckoutPurpose::from_metadata)
}

fn object<T: for<'de> Deserialize<'de>>(value: serde_json::Value) -> BillingResult<T> {
    serde_json::from_value(value).map_err(|e| BillingError::WebhookPayload(e.to_string()))
}

/// Decode a webhook payload. Unknown event types decode to
/// [`PaymentEventKind::Unhandled`] rather than failing.
pub fn parse_event(payload: &str) -> BillingResult<PaymentEvent> {
    use event_types::*;

    let raw: RawEvent = serde_json::from_str(payload)?;

    let kind = match raw.event_type.as_str() {
        CHECKOUT_SESSION_COMPLETED => {
            let session: RawCheckoutSession = object(raw.data.object)?;
            PaymentEventKind::CheckoutCompleted(CompletedCheckout {
                purpose: purpose(session.metadata.as_ref()),
                session_id: session.id,
                payment_intent_id: session.payment_intent,
                subscription_id: session.subscription,
                amount_total_cents: session.amount_total,
            })
        }
        PAYMENT_INTENT_SUCCEEDED => {
            let intent: RawPaymentIntent = object(raw.data.object)?;
            PaymentEventKind::PaymentSucceeded(SucceededPayment {
                purpose: purpose(intent.metadata.as_ref()),
                amount_cents: intent.amount_received.unwrap_or(intent.amount),
                payment_intent_id: intent.id,
            })
        }
        PAYMENT_INTENT_FAILED => {
            let intent: RawPaymentIntent = object(raw.data.object)?;
            PaymentEventKind::PaymentFailed {
                payment_intent_id: intent.id,
                failure_message: intent.last_payment_error.and_then(|e| e.message),
            }
        }
        SUBSCRIPTION_UPDATED => {
            let sub: RawSubscription = object(raw.data.object)?;
            PaymentEventKind::SubscriptionUpdated {
                period: billing_period(sub.current_period_start, sub.current_period_end),
                subscription_id: sub.id,
                status: sub.status,
            }
        }
        SUBSCRIPTION_DELETED => {
            let sub: RawSubscription = object(raw.data.object)?;
            PaymentEventKind::SubscriptionDeleted {
                subscription_id: sub.id,
            }
        }
        INVOICE_PAYMENT_SUCCEEDED => {
            let invoice: RawInvoice = object(raw.data.object)?;
            let period = invoice
                .lines
                .and_then(|lines| lines.data.into_iter().next())
                .and_then(|line| line.period)
                .and_then(|p| billing_period(Some(p.start), Some(p.end)));
            PaymentEventKind::RecurringPaymentSucceeded {
                subscription_id: invoice.subscription,
                billing_reason: invoice.billing_reason,
                period,
            }
        }
        INVOICE_PAYMENT_FAILED => {
            let invoice: RawInvoice = object(raw.data.object)?;
            PaymentEventKind::RecurringPaymentFailed {
                subscription_id: invoice.subscription,
            }
        }
        _ => PaymentEventKind::Unhandled,
    };

    Ok(PaymentEvent {
        id: raw.id,
        event_type: raw.event_type,
        created: raw.created,
        kind,
    })
}
