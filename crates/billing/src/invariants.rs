//! Billing Invariants Module
//!
//! Runnable consistency checks over invoices, payments and subscriptions.
//! They can be run after a webhook replay or on a schedule to confirm the
//! ledger is still in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Invoices, payments or users affected
    pub subject_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - a client may be charged or credited incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

impl InvariantCheckSummary {
    pub fn from_violations(
        checked_at: OffsetDateTime,
        checks_run: usize,
        violations: Vec<InvariantViolation>,
    ) -> Self {
        let checks_failed = violations
            .iter()
            .map(|v| v.invariant.as_str())
            .collect::<HashSet<_>>()
            .len();
        Self {
            checked_at,
            checks_run,
            checks_passed: checks_run.saturating_sub(checks_failed),
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OverpaidRow {
    invoice_id: Uuid,
    invoice_number: String,
    total_cents: i64,
    amount_paid_cents: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct TotalMismatchRow {
    invoice_id: Uuid,
    invoice_number: String,
    subtotal_cents: i64,
    tax_cents: i64,
    total_cents: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ItemSumMismatchRow {
    invoice_id: Uuid,
    invoice_number: String,
    subtotal_cents: i64,
    item_sum_cents: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct PaidWithoutTimestampRow {
    invoice_id: Uuid,
    invoice_number: String,
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleSubsRow {
    user_id: Uuid,
    sub_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct NegativePaymentRow {
    payment_id: Uuid,
    invoice_id: Uuid,
    amount_cents: i64,
}

/// Service for running billing invariant checks
#[derive(Clone)]
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        for name in Self::available_checks() {
            violations.extend(self.run_check(name).await?);
        }

        Ok(InvariantCheckSummary::from_violations(
            now,
            Self::available_checks().len(),
            violations,
        ))
    }

    /// Invariant 1: an invoice never records more paid than its total
    async fn check_amount_paid_within_total(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OverpaidRow> = sqlx::query_as(
            r#"
            SELECT id as invoice_id, invoice_number, total_cents, amount_paid_cents
            FROM invoices
            WHERE amount_paid_cents > total_cents
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "amount_paid_within_total".to_string(),
                subject_ids: vec![row.invoice_id],
                description: format!(
                    "Invoice {} has {} paid against a total of {}",
                    row.invoice_number, row.amount_paid_cents, row.total_cents
                ),
                context: serde_json::json!({
                    "total_cents": row.total_cents,
                    "amount_paid_cents": row.amount_paid_cents,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: `total = subtotal + tax`
    async fn check_total_matches_subtotal_plus_tax(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<TotalMismatchRow> = sqlx::query_as(
            r#"
            SELECT id as invoice_id, invoice_number, subtotal_cents, tax_cents, total_cents
            FROM invoices
            WHERE total_cents <> subtotal_cents + tax_cents
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "total_matches_subtotal_plus_tax".to_string(),
                subject_ids: vec![row.invoice_id],
                description: format!(
                    "Invoice {} total {} does not equal subtotal {} plus tax {}",
                    row.invoice_number, row.total_cents, row.subtotal_cents, row.tax_cents
                ),
                context: serde_json::json!({
                    "subtotal_cents": row.subtotal_cents,
                    "tax_cents": row.tax_cents,
                    "total_cents": row.total_cents,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: invoice lines add up to the subtotal
    async fn check_item_totals_match_subtotal(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ItemSumMismatchRow> = sqlx::query_as(
            r#"
            SELECT
                i.id as invoice_id,
                i.invoice_number,
                i.subtotal_cents,
                COALESCE(SUM(ii.total_cents), 0)::BIGINT as item_sum_cents
            FROM invoices i
            LEFT JOIN invoice_items ii ON ii.invoice_id = i.id
            GROUP BY i.id, i.invoice_number, i.subtotal_cents
            HAVING COALESCE(SUM(ii.total_cents), 0) <> i.subtotal_cents
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "item_totals_match_subtotal".to_string(),
                subject_ids: vec![row.invoice_id],
                description: format!(
                    "Invoice {} lines sum to {} but subtotal is {}",
                    row.invoice_number, row.item_sum_cents, row.subtotal_cents
                ),
                context: serde_json::json!({
                    "subtotal_cents": row.subtotal_cents,
                    "item_sum_cents": row.item_sum_cents,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: paid invoices carry the time they were paid
    async fn check_paid_invoice_has_paid_at(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PaidWithoutTimestampRow> = sqlx::query_as(
            r#"
            SELECT id as invoice_id, invoice_number
            FROM invoices
            WHERE status = 'paid' AND paid_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_invoice_has_paid_at".to_string(),
                subject_ids: vec![row.invoice_id],
                description: format!("Invoice {} is PAID but has no paid_at", row.invoice_number),
                context: serde_json::json!({ "invoice_number": row.invoice_number }),
                severity: ViolationSeverity::Low,
            })
            .collect())
    }

    /// Invariant 5: at most one active subscription per user
    ///
    /// Two active rows would mean the user was charged twice for the same
    /// access.
    async fn check_single_active_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleSubsRow> = sqlx::query_as(
            r#"
            SELECT user_id, COUNT(*) as sub_count
            FROM subscriptions
            WHERE status = 'active'
            GROUP BY user_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_active_subscription".to_string(),
                subject_ids: vec![row.user_id],
                description: format!(
                    "User has {} active subscriptions (expected 1)",
                    row.sub_count
                ),
                context: serde_json::json!({
                    "subscription_count": row.sub_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 6: recorded payments are positive
    async fn check_non_negative_payments(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<NegativePaymentRow> = sqlx::query_as(
            r#"
            SELECT id as payment_id, invoice_id, amount_cents
            FROM payments
            WHERE amount_cents <= 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "non_negative_payments".to_string(),
                subject_ids: vec![row.payment_id, row.invoice_id],
                description: format!("Payment recorded with amount {}", row.amount_cents),
                context: serde_json::json!({ "amount_cents": row.amount_cents }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "amount_paid_within_total" => self.check_amount_paid_within_total().await,
            "total_matches_subtotal_plus_tax" => {
                self.check_total_matches_subtotal_plus_tax().await
            }
            "item_totals_match_subtotal" => self.check_item_totals_match_subtotal().await,
            "paid_invoice_has_paid_at" => self.check_paid_invoice_has_paid_at().await,
            "single_active_subscription" => self.check_single_active_subscription().await,
            "non_negative_payments" => self.check_non_negative_payments().await,
            other => Err(BillingError::InvalidInput(format!(
                "Unknown invariant check: {}",
                other
            ))),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "amount_paid_within_total",
            "total_matches_subtotal_plus_tax",
            "item_totals_match_subtotal",
            "paid_invoice_has_paid_at",
            "single_active_subscription",
            "non_negative_payments",
        ]
    }
}
