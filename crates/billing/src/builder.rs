//! Invoice Builder
//!
//! Turns a client's uninvoiced service records, or a list of manual lines,
//! into a new `DRAFT` invoice. The invoice, its items and its number are
//! written by the store in one transaction.

use std::sync::Arc;

use kennel_shared::line_total_cents;
use serde::Deserialize;
use time::{Date, Duration, OffsetDateTime};
use uuid::Uuid;

use crate::access::Caller;
use crate::error::{BillingError, BillingResult};
use crate::invoice::{DraftItem, InvoiceDetail, InvoiceDraft, PAYMENT_TERM_DAYS};
use crate::records::ServicePeriod;
use crate::store::BillingStore;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateInvoice {
    pub client_id: Uuid,
    pub period_start: Option<Date>,
    pub period_end: Option<Date>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualLine {
    pub description: String,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    pub unit_price_cents: i64,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualInvoice {
    pub client_id: Uuid,
    pub lines: Vec<ManualLine>,
    pub period_start: Option<Date>,
    pub period_end: Option<Date>,
    pub due_date: Option<Date>,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct InvoiceBuilder {
    store: Arc<dyn BillingStore>,
}

impl InvoiceBuilder {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Bill every uninvoiced record for the client in the requested period.
    pub async fn generate_invoice(
        &self,
        caller: &Caller,
        request: GenerateInvoice,
    ) -> BillingResult<InvoiceDetail> {
        self.generate_invoice_on(caller, request, OffsetDateTime::now_utc().date())
            .await
    }

    /// [`Self::generate_invoice`] with an explicit issue date.
    pub async fn generate_invoice_on(
        &self,
        caller: &Caller,
        request: GenerateInvoice,
        today: Date,
    ) -> BillingResult<InvoiceDetail> {
        caller.require_admin()?;

        let period = ServicePeriod::new(request.period_start, request.period_end)?;
        self.store
            .find_client(request.client_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Client".to_string()))?;

        let records = self
            .store
            .list_uninvoiced_records(request.client_id, period)
            .await?;

        let (Some(first), Some(last)) = (
            records.iter().map(|r| r.record.service_date).min(),
            records.iter().map(|r| r.record.service_date).max(),
        ) else {
            tracing::info!(
                client_id = %request.client_id,
                "No uninvoiced service records to bill"
            );
            return Err(BillingError::NoEligibleRecords);
        };

        let items: Vec<DraftItem> = records
            .iter()
            .map(|billable| DraftItem {
                service_record_id: Some(billable.record.id),
                description: billable.description(),
                quantity: billable.record.quantity,
                unit_price_cents: billable.record.unit_price_cents,
                total_cents: billable.record.total_cents,
            })
            .collect();

        let draft = draft(
            request.client_id,
            today,
            request.period_start.unwrap_or(first),
            request.period_end.unwrap_or(last),
            None,
            None,
            items,
        );
        let detail = self.store.create_invoice(draft).await?;

        tracing::info!(
            invoice_id = %detail.invoice.id,
            invoice_number = %detail.invoice.invoice_number,
            client_id = %request.client_id,
            items = detail.items.len(),
            total_cents = detail.invoice.total_cents,
            "Generated draft invoice from service records"
        );

        Ok(detail)
    }

    /// Admin-authored invoice whose lines are not backed by service records.
    pub async fn create_manual_invoice(
        &self,
        caller: &Caller,
        request: ManualInvoice,
    ) -> BillingResult<InvoiceDetail> {
        self.create_manual_invoice_on(caller, request, OffsetDateTime::now_utc().date())
            .await
    }

    pub async fn create_manual_invoice_on(
        &self,
        caller: &Caller,
        request: ManualInvoice,
        today: Date,
    ) -> BillingResult<InvoiceDetail> {
        caller.require_admin()?;

        if request.lines.is_empty() {
            return Err(BillingError::InvalidInput(
                "An invoice needs at least one line".to_string(),
            ));
        }
        for line in &request.lines {
            if line.description.trim().is_empty() {
                return Err(BillingError::InvalidInput(
                    "Line description must not be empty".to_string(),
                ));
            }
            if line.quantity < 1 {
                return Err(BillingError::InvalidInput(
                    "Line quantity must be at least 1".to_string(),
                ));
            }
            if line.unit_price_cents < 0 {
                return Err(BillingError::InvalidInput(
                    "Line unit price must not be negative".to_string(),
                ));
            }
        }
        if request.due_date.is_some_and(|due| due < today) {
            return Err(BillingError::InvalidInput(
                "dueDate must not be before the issue date".to_string(),
            ));
        }
        let period_start = request.period_start.unwrap_or(today);
        let period_end = request.period_end.unwrap_or(period_start);
        ServicePeriod::new(Some(period_start), Some(period_end))?;

        self.store
            .find_client(request.client_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Client".to_string()))?;

        let items = request
            .lines
            .into_iter()
            .map(|line| DraftItem {
                service_record_id: None,
                total_cents: line_total_cents(line.unit_price_cents, line.quantity, 0),
                description: line.description.trim().to_string(),
                quantity: line.quantity,
                unit_price_cents: line.unit_price_cents,
            })
            .collect();

        let detail = self
            .store
            .create_invoice(draft(
                request.client_id,
                today,
                period_start,
                period_end,
                request.due_date,
                request.notes,
                items,
            ))
            .await?;

        tracing::info!(
            invoice_id = %detail.invoice.id,
            invoice_number = %detail.invoice.invoice_number,
            client_id = %detail.invoice.client_id,
            total_cents = detail.invoice.total_cents,
            "Created manual draft invoice"
        );

        Ok(detail)
    }
}

fn draft(
    client_id: Uuid,
    today: Date,
    period_start: Date,
    period_end: Date,
    due_date: Option<Date>,
    notes: Option<String>,
    items: Vec<DraftItem>,
) -> InvoiceDraft {
    let subtotal_cents = items
        .iter()
        .fold(0i64, |sum, item| sum.saturating_add(item.total_cents));
    // No tax engine; the column exists for a future flat rate.
    let tax_cents = 0;

    InvoiceDraft {
        client_id,
        year: today.year(),
        period_start,
        period_end,
        issue_date: today,
        due_date: due_date.unwrap_or(today + Duration::days(PAYMENT_TERM_DAYS)),
        subtotal_cents,
        tax_cents,
        total_cents: subtotal_cents + tax_cents,
        notes,
        items,
    }
}
