//! Persistence boundary for the billing core
//!
//! Every multi-row write the webhook handlers and the invoice builder need is
//! a single method here so that implementations can run it in one
//! transaction.

mod postgres;

pub use postgres::PgBillingStore;

use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingResult;
use crate::invoice::{
    Invoice, InvoiceChanges, InvoiceDetail, InvoiceDraft, InvoiceFilter, InvoiceStatus,
    NewPayment, Payment, PaymentApplication,
};
use crate::ledger::{
    BillingPeriod, Subscription, SubscriptionActivation, SubscriptionStatus, Tier, TierPurchase,
};
use crate::records::{BillableRecord, Booking, Client, Dog, ServicePeriod, ServiceRecord, ServiceType};

#[async_trait]
pub trait BillingStore: Send + Sync {
    // Clients and catalogue

    async fn find_client(&self, client_id: Uuid) -> BillingResult<Option<Client>>;

    async fn find_client_by_user(&self, user_id: Uuid) -> BillingResult<Option<Client>>;

    async fn find_dog(&self, dog_id: Uuid) -> BillingResult<Option<Dog>>;

    async fn find_booking(&self, booking_id: Uuid) -> BillingResult<Option<Booking>>;

    async fn find_service_type(&self, service_type_id: Uuid) -> BillingResult<Option<ServiceType>>;

    async fn find_tier(&self, tier_id: Uuid) -> BillingResult<Option<Tier>>;

    // Service records

    async fn insert_service_record(&self, record: &ServiceRecord) -> BillingResult<()>;

    /// Records owned by the client (through the dog or the originating
    /// booking) with no invoice item, ordered by service date.
    async fn list_uninvoiced_records(
        &self,
        client_id: Uuid,
        period: ServicePeriod,
    ) -> BillingResult<Vec<BillableRecord>>;

    // Invoices

    /// Write the invoice and all of its items atomically, taking the next
    /// number from the per-year counter in the same transaction.
    async fn create_invoice(&self, draft: InvoiceDraft) -> BillingResult<InvoiceDetail>;

    async fn find_invoice(&self, invoice_id: Uuid) -> BillingResult<Option<InvoiceDetail>>;

    async fn list_invoices(&self, filter: &InvoiceFilter) -> BillingResult<Vec<Invoice>>;

    /// Apply `changes` only while the invoice still has `expected_status`.
    /// Returns `None` when the invoice is gone or its status moved.
    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        expected_status: InvoiceStatus,
        changes: &InvoiceChanges,
    ) -> BillingResult<Option<Invoice>>;

    /// Delete the invoice if, and only if, it is still a draft.
    async fn delete_draft_invoice(&self, invoice_id: Uuid) -> BillingResult<bool>;

    async fn set_invoice_checkout_session(
        &self,
        invoice_id: Uuid,
        session_id: &str,
    ) -> BillingResult<()>;

    /// Move `SENT`/`PARTIAL` invoices due before `today` to `OVERDUE`.
    async fn mark_overdue_invoices(&self, today: Date) -> BillingResult<Vec<Invoice>>;

    async fn list_payments(&self, invoice_id: Uuid) -> BillingResult<Vec<Payment>>;

    /// Insert the payment keyed by its transaction id and credit the invoice,
    /// together. A transaction id seen before yields `Duplicate` and no change.
    async fn apply_invoice_payment(&self, payment: NewPayment) -> BillingResult<PaymentApplication>;

    // Content purchases and subscriptions

    async fn find_tier_purchase(
        &self,
        user_id: Uuid,
        tier_id: Uuid,
    ) -> BillingResult<Option<TierPurchase>>;

    /// Returns `false` when the user already owns the tier.
    async fn record_tier_purchase(&self, purchase: &TierPurchase) -> BillingResult<bool>;

    /// Most recently created subscription row for the user
    async fn latest_subscription(&self, user_id: Uuid) -> BillingResult<Option<Subscription>>;

    /// Most recently created row carrying the external id
    async fn find_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>>;

    /// Reactivate the rows carrying the external id, or create one, and
    /// cancel any other active row the user still has.
    async fn activate_subscription(
        &self,
        activation: &SubscriptionActivation,
    ) -> BillingResult<Subscription>;

    /// Returns the number of rows touched.
    async fn set_subscription_status(
        &self,
        external_subscription_id: &str,
        status: SubscriptionStatus,
        period: Option<BillingPeriod>,
    ) -> BillingResult<u64>;

    /// Cancel every row carrying the external id. Returns the number touched.
    async fn cancel_subscriptions(
        &self,
        external_subscription_id: &str,
        cancelled_at: OffsetDateTime,
    ) -> BillingResult<u64>;

    // Webhook delivery ledger

    /// Atomically claim an event for processing. `false` means it was already
    /// processed or another delivery is working on it.
    async fn claim_webhook_event(&self, event_id: &str, event_type: &str) -> BillingResult<bool>;

    async fn finish_webhook_event(
        &self,
        event_id: &str,
        error_message: Option<&str>,
    ) -> BillingResult<()>;
}
