//! Invoice Lifecycle Manager
//!
//! Admin status changes go through the transition table on
//! [`InvoiceStatus`]. Writes are conditional on the status the change was
//! validated against, so a webhook landing between the read and the write
//! makes the update fail instead of silently overwriting the payment.

use std::sync::Arc;

use serde::Deserialize;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::access::Caller;
use crate::email::{self, Notifier};
use crate::error::{BillingError, BillingResult};
use crate::invoice::{Invoice, InvoiceChanges, InvoiceDetail, InvoiceFilter, InvoiceStatus, Payment};
use crate::store::BillingStore;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInvoice {
    pub status: Option<InvoiceStatus>,
    pub notes: Option<String>,
    pub due_date: Option<Date>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceQuery {
    pub client_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
}

#[derive(Clone)]
pub struct InvoiceLifecycle {
    store: Arc<dyn BillingStore>,
    notifier: Arc<dyn Notifier>,
}

impl InvoiceLifecycle {
    pub fn new(store: Arc<dyn BillingStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn update_invoice(
        &self,
        caller: &Caller,
        invoice_id: Uuid,
        update: UpdateInvoice,
    ) -> BillingResult<Invoice> {
        caller.require_admin()?;

        let detail = self.load(invoice_id).await?;
        let current = &detail.invoice;

        if let Some(next) = update.status {
            if !current.status.can_transition_to(next) {
                tracing::warn!(
                    invoice_id = %invoice_id,
                    from = %current.status,
                    to = %next,
                    "Rejected invoice status transition"
                );
                return Err(BillingError::InvalidTransition {
                    from: current.status,
                    to: next,
                });
            }
        }
        if let Some(due_date) = update.due_date {
            if due_date < current.issue_date {
                return Err(BillingError::InvalidInput(
                    "dueDate must not be before the issue date".to_string(),
                ));
            }
        }

        let mut changes = InvoiceChanges {
            status: update.status,
            notes: update.notes,
            due_date: update.due_date,
            ..Default::default()
        };
        // Marking paid always means paid in full.
        if update.status == Some(InvoiceStatus::Paid) {
            changes.amount_paid_cents = Some(current.total_cents);
            changes.paid_at = Some(current.paid_at.unwrap_or_else(OffsetDateTime::now_utc));
        }

        let updated = self
            .store
            .update_invoice(invoice_id, current.status, &changes)
            .await?
            .ok_or_else(|| {
                BillingError::InvalidState(
                    "Invoice was modified by another request, reload and try again".to_string(),
                )
            })?;

        tracing::info!(
            invoice_id = %invoice_id,
            from = %current.status,
            to = %updated.status,
            "Invoice updated"
        );

        if updated.status == InvoiceStatus::Sent && current.status == InvoiceStatus::Draft {
            email::notify(
                self.notifier.as_ref(),
                email::invoice_sent(&updated, &detail.client),
            )
            .await;
        }

        Ok(updated)
    }

    /// Only drafts can be deleted; the items go with the invoice and their
    /// service records become billable again.
    pub async fn delete_invoice(&self, caller: &Caller, invoice_id: Uuid) -> BillingResult<()> {
        caller.require_admin()?;

        let detail = self.load(invoice_id).await?;
        if detail.invoice.status != InvoiceStatus::Draft {
            return Err(BillingError::InvalidState(
                "Only draft invoices can be deleted".to_string(),
            ));
        }
        if !self.store.delete_draft_invoice(invoice_id).await? {
            return Err(BillingError::InvalidState(
                "Only draft invoices can be deleted".to_string(),
            ));
        }

        tracing::info!(
            invoice_id = %invoice_id,
            invoice_number = %detail.invoice.invoice_number,
            "Draft invoice deleted"
        );
        Ok(())
    }

    /// Clients see only their own non-draft invoices. Anything else is
    /// reported as not found.
    pub async fn get_invoice(&self, caller: &Caller, invoice_id: Uuid) -> BillingResult<InvoiceDetail> {
        let detail = self.load(invoice_id).await?;
        if caller.is_admin() {
            return Ok(detail);
        }

        let own_client = self.store.find_client_by_user(caller.user_id).await?;
        let visible = own_client.is_some_and(|c| c.id == detail.invoice.client_id)
            && detail.invoice.status != InvoiceStatus::Draft;
        if !visible {
            return Err(BillingError::NotFound("Invoice".to_string()));
        }
        Ok(detail)
    }

    pub async fn list_invoices(
        &self,
        caller: &Caller,
        query: InvoiceQuery,
    ) -> BillingResult<Vec<Invoice>> {
        let filter = if caller.is_admin() {
            InvoiceFilter {
                client_id: query.client_id,
                status: query.status,
                exclude_drafts: false,
            }
        } else {
            let Some(client) = self.store.find_client_by_user(caller.user_id).await? else {
                return Ok(Vec::new());
            };
            InvoiceFilter {
                client_id: Some(client.id),
                status: query.status,
                exclude_drafts: true,
            }
        };
        self.store.list_invoices(&filter).await
    }

    pub async fn list_payments(&self, caller: &Caller, invoice_id: Uuid) -> BillingResult<Vec<Payment>> {
        self.get_invoice(caller, invoice_id).await?;
        self.store.list_payments(invoice_id).await
    }

    /// Sweep `SENT`/`PARTIAL` invoices past their due date into `OVERDUE`.
    pub async fn mark_overdue_invoices(&self, today: Date) -> BillingResult<Vec<Invoice>> {
        let overdue = self.store.mark_overdue_invoices(today).await?;
        for invoice in &overdue {
            tracing::info!(
                invoice_id = %invoice.id,
                invoice_number = %invoice.invoice_number,
                due_date = %invoice.due_date,
                "Invoice marked overdue"
            );
        }
        Ok(overdue)
    }

    async fn load(&self, invoice_id: Uuid) -> BillingResult<InvoiceDetail> {
        self.store
            .find_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Invoice".to_string()))
    }
}
