//! Job bodies run by the scheduler

use kennel_billing::{InvariantCheckSummary, InvoiceLifecycle, ViolationSeverity};
use time::{Date, OffsetDateTime};
use tracing::{error, info, warn};

/// Flag unpaid invoices whose due date has passed. Returns how many changed.
pub async fn run_overdue_sweep(lifecycle: &InvoiceLifecycle, today: Date) -> usize {
    match lifecycle.mark_overdue_invoices(today).await {
        Ok(overdue) => {
            info!(count = overdue.len(), today = %today, "Overdue sweep complete");
            overdue.len()
        }
        Err(e) => {
            error!(error = %e, "Overdue sweep failed");
            0
        }
    }
}

pub fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}

/// Log every violation at a level matching its severity.
pub fn log_invariant_summary(summary: &InvariantCheckSummary) {
    for violation in &summary.violations {
        let subjects = violation
            .subject_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        match violation.severity {
            ViolationSeverity::Critical | ViolationSeverity::High => error!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                subjects = %subjects,
                "{}",
                violation.description
            ),
            ViolationSeverity::Medium | ViolationSeverity::Low => warn!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                subjects = %subjects,
                "{}",
                violation.description
            ),
        }
    }

    info!(
        checks_run = summary.checks_run,
        checks_passed = summary.checks_passed,
        checks_failed = summary.checks_failed,
        healthy = summary.healthy,
        "Billing invariant check complete"
    );
}
