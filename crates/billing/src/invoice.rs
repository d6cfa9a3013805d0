//! Invoice types and the status state machine
//!
//! `DRAFT -> SENT -> PAID`, with `SENT`, `PARTIAL` and `OVERDUE` as the
//! interchangeable "awaiting payment" states and `CANCELLED` reachable from
//! every non-terminal state. `PAID` and `CANCELLED` are terminal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingError;
use crate::records::Client;

/// Net payment term applied to every generated invoice
pub const PAYMENT_TERM_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Partial,
    Overdue,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 6] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Sent,
        InvoiceStatus::Partial,
        InvoiceStatus::Overdue,
        InvoiceStatus::Paid,
        InvoiceStatus::Cancelled,
    ];

    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Partial => "partial",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses an admin may move an invoice to from this one.
    ///
    /// `Partial` is never a target; only a recorded payment puts an invoice
    /// there.
    pub fn allowed_transitions(&self) -> &'static [InvoiceStatus] {
        use InvoiceStatus::*;
        match self {
            Draft => &[Sent, Cancelled],
            Sent => &[Overdue, Paid, Cancelled],
            Partial => &[Sent, Overdue, Paid, Cancelled],
            Overdue => &[Sent, Paid, Cancelled],
            Paid | Cancelled => &[],
        }
    }

    /// Re-asserting the current status is accepted as a no-op.
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        *self == next || self.allowed_transitions().contains(&next)
    }

    /// Status after a payment brings the paid amount to `amount_paid_cents`.
    pub fn after_payment(amount_paid_cents: i64, total_cents: i64) -> InvoiceStatus {
        if amount_paid_cents >= total_cents {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::Partial
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

impl FromStr for InvoiceStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InvoiceStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| BillingError::InvalidInput(format!("Unknown invoice status: {}", s)))
    }
}

/// `INV-<year>-<seq>` numbering
pub struct InvoiceNumber;

impl InvoiceNumber {
    pub fn prefix(year: i32) -> String {
        format!("INV-{}-", year)
    }

    pub fn format(year: i32, seq: i32) -> String {
        format!("{}{:04}", Self::prefix(year), seq)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: Uuid,
    pub client_id: Uuid,
    pub invoice_number: String,
    pub period_start: Date,
    pub period_end: Date,
    pub issue_date: Date,
    pub due_date: Date,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub amount_paid_cents: i64,
    pub status: InvoiceStatus,
    pub notes: Option<String>,
    pub checkout_session_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub paid_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Invoice {
    pub fn amount_due_cents(&self) -> i64 {
        self.total_cents - self.amount_paid_cents
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    /// `None` for manually added lines
    pub service_record_id: Option<Uuid>,
    pub description: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub total_cents: i64,
}

/// Invoice with its client and lines, as returned to callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub client: Client,
    pub items: Vec<InvoiceItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount_cents: i64,
    pub method: String,
    pub status: String,
    pub external_transaction_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub paid_at: OffsetDateTime,
}

/// Line of an invoice that has not been written yet
#[derive(Debug, Clone)]
pub struct DraftItem {
    pub service_record_id: Option<Uuid>,
    pub description: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub total_cents: i64,
}

/// Everything needed to write an invoice and its items in one transaction.
/// The invoice number is assigned by the store from the `year` counter.
#[derive(Debug, Clone)]
pub struct InvoiceDraft {
    pub client_id: Uuid,
    pub year: i32,
    pub period_start: Date,
    pub period_end: Date,
    pub issue_date: Date,
    pub due_date: Date,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub notes: Option<String>,
    pub items: Vec<DraftItem>,
}

/// Field updates applied by the lifecycle manager
#[derive(Debug, Clone, Default)]
pub struct InvoiceChanges {
    pub status: Option<InvoiceStatus>,
    pub notes: Option<String>,
    pub due_date: Option<Date>,
    pub amount_paid_cents: Option<i64>,
    pub paid_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub client_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub exclude_drafts: bool,
}

impl InvoiceFilter {
    pub fn matches(&self, invoice: &Invoice) -> bool {
        self.client_id.is_none_or(|id| invoice.client_id == id)
            && self.status.is_none_or(|s| invoice.status == s)
            && !(self.exclude_drafts && invoice.status == InvoiceStatus::Draft)
    }
}

/// A payment confirmed by the gateway, ready to be applied to an invoice
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub invoice_id: Uuid,
    pub amount_cents: i64,
    pub method: String,
    pub external_transaction_id: String,
}

#[derive(Debug, Clone)]
pub enum PaymentApplication {
    Applied { invoice: Invoice, payment: Payment },
    /// A payment with this transaction id was already recorded
    Duplicate,
    InvoiceMissing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoice_number_format() {
        assert_eq!(InvoiceNumber::format(2024, 1), "INV-2024-0001");
        assert_eq!(InvoiceNumber::format(2024, 123), "INV-2024-0123");
        assert_eq!(InvoiceNumber::format(2025, 12345), "INV-2025-12345");
    }

    #[test]
    fn test_draft_transitions() {
        let draft = InvoiceStatus::Draft;
        assert!(draft.can_transition_to(InvoiceStatus::Sent));
        assert!(draft.can_transition_to(InvoiceStatus::Cancelled));
        assert!(!draft.can_transition_to(InvoiceStatus::Paid));
        assert!(!draft.can_transition_to(InvoiceStatus::Overdue));
    }

    #[test]
    fn test_awaiting_payment_states_interchange() {
        for from in [
            InvoiceStatus::Sent,
            InvoiceStatus::Partial,
            InvoiceStatus::Overdue,
        ] {
            for to in [
                InvoiceStatus::Sent,
                InvoiceStatus::Overdue,
                InvoiceStatus::Paid,
                InvoiceStatus::Cancelled,
            ] {
                assert!(from.can_transition_to(to), "{} -> {}", from, to);
            }
            assert!(!from.can_transition_to(InvoiceStatus::Draft));
        }
    }

    #[test]
    fn test_partial_is_only_reached_by_payment() {
        for from in InvoiceStatus::ALL {
            assert!(!from.allowed_transitions().contains(&InvoiceStatus::Partial));
        }
        assert!(!InvoiceStatus::Sent.can_transition_to(InvoiceStatus::Partial));
        assert!(!InvoiceStatus::Overdue.can_transition_to(InvoiceStatus::Partial));
        assert!(InvoiceStatus::Partial.can_transition_to(InvoiceStatus::Partial));
    }

    #[test]
    fn test_terminal_states_are_dead_ends() {
        for terminal in [InvoiceStatus::Paid, InvoiceStatus::Cancelled] {
            for to in InvoiceStatus::ALL {
                assert_eq!(terminal.can_transition_to(to), to == terminal);
            }
        }
        assert!(!InvoiceStatus::Cancelled.can_transition_to(InvoiceStatus::Paid));
    }

    #[test]
    fn test_status_round_trips_through_db_and_wire() {
        for status in InvoiceStatus::ALL {
            assert_eq!(status.as_str().parse::<InvoiceStatus>().unwrap(), status);
        }
        assert_eq!(
            serde_json::to_string(&InvoiceStatus::Partial).unwrap(),
            "\"PARTIAL\""
        );
        assert_eq!("SENT".parse::<InvoiceStatus>().unwrap(), InvoiceStatus::Sent);
        assert!("refunded".parse::<InvoiceStatus>().is_err());
    }

    #[test]
    fn test_after_payment() {
        assert_eq!(InvoiceStatus::after_payment(14000, 14000), InvoiceStatus::Paid);
        assert_eq!(InvoiceStatus::after_payment(5000, 14000), InvoiceStatus::Partial);
    }
}
