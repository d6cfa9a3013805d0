//! In-memory test doubles
//!
//! `MemoryBillingStore` mirrors the transactional behaviour of the Postgres
//! store by doing every multi-row write under one lock. `FakeGateway` signs
//! and verifies webhooks with a fixed secret and records checkout requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::macros::date;
use time::{Date, Duration, OffsetDateTime};
use uuid::Uuid;

use crate::email::{EmailMessage, Notifier};
use crate::error::{BillingError, BillingResult};
use crate::events::{parse_event, PaymentEvent};
use crate::gateway::{CheckoutRequest, CheckoutSession, PaymentGateway};
use crate::invoice::{
    DraftItem, Invoice, InvoiceChanges, InvoiceDetail, InvoiceDraft, InvoiceFilter, InvoiceItem,
    InvoiceNumber, InvoiceStatus, NewPayment, Payment, PaymentApplication,
};
use crate::ledger::{
    BillingPeriod, Subscription, SubscriptionActivation, SubscriptionStatus, Tier, TierPurchase,
};
use crate::records::{
    BillableRecord, Booking, Client, Dog, ServicePeriod, ServiceRecord, ServiceType,
};
use crate::signature::{sign_payload, verify_signature, DEFAULT_TOLERANCE_SECONDS};
use crate::store::BillingStore;

/// Secret shared by [`FakeGateway`] and [`sign`]
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

const STALE_PROCESSING: Duration = Duration::minutes(30);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Signature header for `payload` as the fake gateway expects it, timestamped now.
pub fn sign(payload: &str) -> String {
    sign_payload(
        payload,
        TEST_WEBHOOK_SECRET,
        OffsetDateTime::now_utc().unix_timestamp(),
    )
    .unwrap_or_default()
}

struct WebhookEventState {
    result: &'static str,
    started_at: OffsetDateTime,
}

#[derive(Default)]
struct State {
    clients: Vec<Client>,
    dogs: Vec<Dog>,
    bookings: Vec<Booking>,
    service_types: Vec<ServiceType>,
    tiers: Vec<Tier>,
    records: Vec<ServiceRecord>,
    invoices: Vec<Invoice>,
    items: Vec<InvoiceItem>,
    counters: HashMap<i32, i32>,
    payments: Vec<Payment>,
    tier_purchases: Vec<TierPurchase>,
    subscriptions: Vec<Subscription>,
    webhook_events: HashMap<String, WebhookEventState>,
}

impl State {
    /// Owned through the dog or through the booking.
    fn record_belongs_to(&self, record: &ServiceRecord, client_id: Uuid) -> bool {
        let via_dog = record
            .dog_id
            .and_then(|id| self.dogs.iter().find(|d| d.id == id))
            .is_some_and(|d| d.client_id == client_id);
        let via_booking = record
            .booking_id
            .and_then(|id| self.bookings.iter().find(|b| b.id == id))
            .is_some_and(|b| b.client_id == client_id);
        via_dog || via_booking
    }

    fn is_invoiced(&self, record_id: Uuid) -> bool {
        self.items
            .iter()
            .any(|item| item.service_record_id == Some(record_id))
    }

    fn detail(&self, invoice: &Invoice) -> Option<InvoiceDetail> {
        let client = self.clients.iter().find(|c| c.id == invoice.client_id)?;
        Some(InvoiceDetail {
            invoice: invoice.clone(),
            client: client.clone(),
            items: self
                .items
                .iter()
                .filter(|item| item.invoice_id == invoice.id)
                .cloned()
                .collect(),
        })
    }
}

#[derive(Default)]
pub struct MemoryBillingStore {
    state: Mutex<State>,
    fail_ledger_writes: AtomicBool,
}

impl MemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Make payment, purchase and subscription writes fail as if the
    /// database were down.
    pub fn fail_ledger_writes(&self, fail: bool) {
        self.fail_ledger_writes.store(fail, Ordering::SeqCst);
    }

    fn ledger_write(&self) -> BillingResult<()> {
        if self.fail_ledger_writes.load(Ordering::SeqCst) {
            return Err(BillingError::Database("connection refused".to_string()));
        }
        Ok(())
    }

    pub fn seed_client(&self, name: &str, email: &str, user_id: Option<Uuid>) -> Client {
        let client = Client {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            email: email.to_string(),
        };
        self.state().clients.push(client.clone());
        client
    }

    pub fn seed_dog(&self, client_id: Uuid, name: &str) -> Dog {
        let dog = Dog {
            id: Uuid::new_v4(),
            client_id,
            name: name.to_string(),
        };
        self.state().dogs.push(dog.clone());
        dog
    }

    pub fn seed_service_type(&self, name: &str, default_price_cents: i64) -> ServiceType {
        let service_type = ServiceType {
            id: Uuid::new_v4(),
            name: name.to_string(),
            default_price_cents,
        };
        self.state().service_types.push(service_type.clone());
        service_type
    }

    pub fn seed_booking(&self, client_id: Uuid, dog_id: Option<Uuid>) -> Booking {
        let booking = Booking {
            id: Uuid::new_v4(),
            client_id,
            dog_id,
        };
        self.state().bookings.push(booking.clone());
        booking
    }

    pub fn seed_tier(&self, name: &str, price_cents: i64) -> Tier {
        let tier = Tier {
            id: Uuid::new_v4(),
            name: name.to_string(),
            price_cents,
        };
        self.state().tiers.push(tier.clone());
        tier
    }

    /// Single-line invoice issued 2024-03-31, due 2024-04-30, forced into
    /// `status` with `amount_paid_cents` already credited.
    pub async fn seed_invoice(
        &self,
        client_id: Uuid,
        total_cents: i64,
        amount_paid_cents: i64,
        status: InvoiceStatus,
    ) -> Invoice {
        let issue_date = date!(2024 - 03 - 31);
        let draft = InvoiceDraft {
            client_id,
            year: issue_date.year(),
            period_start: date!(2024 - 03 - 01),
            period_end: issue_date,
            issue_date,
            due_date: issue_date + Duration::days(30),
            subtotal_cents: total_cents,
            tax_cents: 0,
            total_cents,
            notes: None,
            items: vec![DraftItem {
                service_record_id: None,
                description: "Private lesson".to_string(),
                quantity: 1,
                unit_price_cents: total_cents,
                total_cents,
            }],
        };
        let Ok(detail) = self.create_invoice(draft).await else {
            panic!("seed_invoice needs a seeded client");
        };

        let mut state = self.state();
        let Some(invoice) = state.invoices.iter_mut().find(|i| i.id == detail.invoice.id) else {
            panic!("seeded invoice vanished");
        };
        invoice.status = status;
        invoice.amount_paid_cents = amount_paid_cents;
        if status == InvoiceStatus::Paid {
            invoice.paid_at = Some(OffsetDateTime::now_utc());
        }
        invoice.clone()
    }

    pub fn invoice_count(&self) -> usize {
        self.state().invoices.len()
    }

    pub fn tier_purchase_count(&self, user_id: Uuid) -> usize {
        self.state()
            .tier_purchases
            .iter()
            .filter(|p| p.user_id == user_id)
            .count()
    }

    pub fn active_subscription_count(&self, user_id: Uuid) -> usize {
        self.state()
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.status == SubscriptionStatus::Active)
            .count()
    }

    pub fn webhook_event_seen(&self, event_id: &str) -> bool {
        self.state().webhook_events.contains_key(event_id)
    }
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn find_client(&self, client_id: Uuid) -> BillingResult<Option<Client>> {
        Ok(self.state().clients.iter().find(|c| c.id == client_id).cloned())
    }

    async fn find_client_by_user(&self, user_id: Uuid) -> BillingResult<Option<Client>> {
        Ok(self
            .state()
            .clients
            .iter()
            .find(|c| c.user_id == Some(user_id))
            .cloned())
    }

    async fn find_dog(&self, dog_id: Uuid) -> BillingResult<Option<Dog>> {
        Ok(self.state().dogs.iter().find(|d| d.id == dog_id).cloned())
    }

    async fn find_booking(&self, booking_id: Uuid) -> BillingResult<Option<Booking>> {
        Ok(self.state().bookings.iter().find(|b| b.id == booking_id).cloned())
    }

    async fn find_service_type(&self, service_type_id: Uuid) -> BillingResult<Option<ServiceType>> {
        Ok(self
            .state()
            .service_types
            .iter()
            .find(|t| t.id == service_type_id)
            .cloned())
    }

    async fn find_tier(&self, tier_id: Uuid) -> BillingResult<Option<Tier>> {
        Ok(self.state().tiers.iter().find(|t| t.id == tier_id).cloned())
    }

    async fn insert_service_record(&self, record: &ServiceRecord) -> BillingResult<()> {
        self.state().records.push(record.clone());
        Ok(())
    }

    async fn list_uninvoiced_records(
        &self,
        client_id: Uuid,
        period: ServicePeriod,
    ) -> BillingResult<Vec<BillableRecord>> {
        let state = self.state();
        let mut records: Vec<BillableRecord> = state
            .records
            .iter()
            .filter(|r| state.record_belongs_to(r, client_id))
            .filter(|r| !state.is_invoiced(r.id))
            .filter(|r| period.contains(r.service_date))
            .map(|r| {
                let dog_id = r.dog_id.or_else(|| {
                    r.booking_id
                        .and_then(|id| state.bookings.iter().find(|b| b.id == id))
                        .and_then(|b| b.dog_id)
                });
                BillableRecord {
                    record: r.clone(),
                    service_type_name: state
                        .service_types
                        .iter()
                        .find(|t| t.id == r.service_type_id)
                        .map(|t| t.name.clone())
                        .unwrap_or_default(),
                    dog_name: dog_id
                        .and_then(|id| state.dogs.iter().find(|d| d.id == id))
                        .map(|d| d.name.clone()),
                }
            })
            .collect();
        records.sort_by_key(|b| (b.record.service_date, b.record.created_at));
        Ok(records)
    }

    async fn create_invoice(&self, draft: InvoiceDraft) -> BillingResult<InvoiceDetail> {
        let mut state = self.state();

        if !state.clients.iter().any(|c| c.id == draft.client_id) {
            return Err(BillingError::NotFound("Client".to_string()));
        }
        if let Some(taken) = draft
            .items
            .iter()
            .filter_map(|i| i.service_record_id)
            .find(|id| state.is_invoiced(*id))
        {
            return Err(BillingError::InvalidState(format!(
                "Service record {} is already invoiced",
                taken
            )));
        }

        let seq = {
            let counter = state.counters.entry(draft.year).or_insert(0);
            *counter += 1;
            *counter
        };
        let now = OffsetDateTime::now_utc();
        let invoice = Invoice {
            id: Uuid::new_v4(),
            client_id: draft.client_id,
            invoice_number: InvoiceNumber::format(draft.year, seq),
            period_start: draft.period_start,
            period_end: draft.period_end,
            issue_date: draft.issue_date,
            due_date: draft.due_date,
            subtotal_cents: draft.subtotal_cents,
            tax_cents: draft.tax_cents,
            total_cents: draft.total_cents,
            amount_paid_cents: 0,
            status: InvoiceStatus::Draft,
            notes: draft.notes,
            checkout_session_id: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        for item in draft.items {
            state.items.push(InvoiceItem {
                id: Uuid::new_v4(),
                invoice_id: invoice.id,
                service_record_id: item.service_record_id,
                description: item.description,
                quantity: item.quantity,
                unit_price_cents: item.unit_price_cents,
                total_cents: item.total_cents,
            });
        }
        state.invoices.push(invoice.clone());

        state
            .detail(&invoice)
            .ok_or_else(|| BillingError::Internal("invoice client vanished".to_string()))
    }

    async fn find_invoice(&self, invoice_id: Uuid) -> BillingResult<Option<InvoiceDetail>> {
        let state = self.state();
        Ok(state
            .invoices
            .iter()
            .find(|i| i.id == invoice_id)
            .and_then(|i| state.detail(i)))
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> BillingResult<Vec<Invoice>> {
        let mut invoices: Vec<Invoice> = self
            .state()
            .invoices
            .iter()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invoices)
    }

    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        expected_status: InvoiceStatus,
        changes: &InvoiceChanges,
    ) -> BillingResult<Option<Invoice>> {
        let mut state = self.state();
        let Some(invoice) = state
            .invoices
            .iter_mut()
            .find(|i| i.id == invoice_id && i.status == expected_status)
        else {
            return Ok(None);
        };

        if let Some(status) = changes.status {
            invoice.status = status;
        }
        if let Some(notes) = &changes.notes {
            invoice.notes = Some(notes.clone());
        }
        if let Some(due_date) = changes.due_date {
            invoice.due_date = due_date;
        }
        if let Some(amount) = changes.amount_paid_cents {
            invoice.amount_paid_cents = amount;
        }
        if let Some(paid_at) = changes.paid_at {
            invoice.paid_at = Some(paid_at);
        }
        invoice.updated_at = OffsetDateTime::now_utc();
        Ok(Some(invoice.clone()))
    }

    async fn delete_draft_invoice(&self, invoice_id: Uuid) -> BillingResult<bool> {
        let mut state = self.state();
        let before = state.invoices.len();
        state
            .invoices
            .retain(|i| !(i.id == invoice_id && i.status == InvoiceStatus::Draft));
        if state.invoices.len() == before {
            return Ok(false);
        }
        state.items.retain(|item| item.invoice_id != invoice_id);
        Ok(true)
    }

    async fn set_invoice_checkout_session(
        &self,
        invoice_id: Uuid,
        session_id: &str,
    ) -> BillingResult<()> {
        let mut state = self.state();
        if let Some(invoice) = state.invoices.iter_mut().find(|i| i.id == invoice_id) {
            invoice.checkout_session_id = Some(session_id.to_string());
            invoice.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn mark_overdue_invoices(&self, today: Date) -> BillingResult<Vec<Invoice>> {
        let mut state = self.state();
        let now = OffsetDateTime::now_utc();
        let mut swept = Vec::new();
        for invoice in state.invoices.iter_mut() {
            if matches!(invoice.status, InvoiceStatus::Sent | InvoiceStatus::Partial)
                && invoice.due_date < today
            {
                invoice.status = InvoiceStatus::Overdue;
                invoice.updated_at = now;
                swept.push(invoice.clone());
            }
        }
        Ok(swept)
    }

    async fn list_payments(&self, invoice_id: Uuid) -> BillingResult<Vec<Payment>> {
        Ok(self
            .state()
            .payments
            .iter()
            .filter(|p| p.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn apply_invoice_payment(&self, payment: NewPayment) -> BillingResult<PaymentApplication> {
        self.ledger_write()?;
        let mut state = self.state();

        if state
            .payments
            .iter()
            .any(|p| p.external_transaction_id.as_deref() == Some(&payment.external_transaction_id))
        {
            return Ok(PaymentApplication::Duplicate);
        }

        let now = OffsetDateTime::now_utc();
        let Some(invoice) = state.invoices.iter_mut().find(|i| i.id == payment.invoice_id) else {
            return Ok(PaymentApplication::InvoiceMissing);
        };

        invoice.amount_paid_cents = invoice
            .amount_paid_cents
            .saturating_add(payment.amount_cents)
            .min(invoice.total_cents);
        if invoice.status != InvoiceStatus::Cancelled {
            invoice.status =
                InvoiceStatus::after_payment(invoice.amount_paid_cents, invoice.total_cents);
        }
        if invoice.status == InvoiceStatus::Paid && invoice.paid_at.is_none() {
            invoice.paid_at = Some(now);
        }
        invoice.updated_at = now;
        let invoice = invoice.clone();

        let recorded = Payment {
            id: Uuid::new_v4(),
            invoice_id: payment.invoice_id,
            amount_cents: payment.amount_cents,
            method: payment.method,
            status: "succeeded".to_string(),
            external_transaction_id: Some(payment.external_transaction_id),
            paid_at: now,
        };
        state.payments.push(recorded.clone());

        Ok(PaymentApplication::Applied {
            invoice,
            payment: recorded,
        })
    }

    async fn find_tier_purchase(
        &self,
        user_id: Uuid,
        tier_id: Uuid,
    ) -> BillingResult<Option<TierPurchase>> {
        Ok(self
            .state()
            .tier_purchases
            .iter()
            .find(|p| p.user_id == user_id && p.tier_id == tier_id)
            .cloned())
    }

    async fn record_tier_purchase(&self, purchase: &TierPurchase) -> BillingResult<bool> {
        self.ledger_write()?;
        let mut state = self.state();
        if state
            .tier_purchases
            .iter()
            .any(|p| p.user_id == purchase.user_id && p.tier_id == purchase.tier_id)
        {
            return Ok(false);
        }
        state.tier_purchases.push(purchase.clone());
        Ok(true)
    }

    async fn latest_subscription(&self, user_id: Uuid) -> BillingResult<Option<Subscription>> {
        Ok(self
            .state()
            .subscriptions
            .iter()
            .rev()
            .find(|s| s.user_id == user_id)
            .cloned())
    }

    async fn find_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        Ok(self
            .state()
            .subscriptions
            .iter()
            .rev()
            .find(|s| s.external_subscription_id.as_deref() == Some(external_subscription_id))
            .cloned())
    }

    async fn activate_subscription(
        &self,
        activation: &SubscriptionActivation,
    ) -> BillingResult<Subscription> {
        self.ledger_write()?;
        let mut state = self.state();
        let now = OffsetDateTime::now_utc();
        let external = activation.external_subscription_id.as_str();

        for sub in state.subscriptions.iter_mut() {
            if sub.user_id == activation.user_id
                && sub.status == SubscriptionStatus::Active
                && sub.external_subscription_id.as_deref() != Some(external)
            {
                sub.status = SubscriptionStatus::Cancelled;
                sub.cancelled_at = Some(now);
                sub.updated_at = now;
            }
        }

        let mut reactivated = None;
        for sub in state.subscriptions.iter_mut() {
            if sub.external_subscription_id.as_deref() == Some(external) {
                sub.status = SubscriptionStatus::Active;
                sub.current_period_start = Some(activation.period.start);
                sub.current_period_end = Some(activation.period.end);
                sub.cancelled_at = None;
                sub.updated_at = now;
                reactivated = Some(sub.clone());
            }
        }
        if let Some(sub) = reactivated {
            return Ok(sub);
        }

        let sub = Subscription {
            id: Uuid::new_v4(),
            user_id: activation.user_id,
            subscription_type: activation.subscription_type,
            status: SubscriptionStatus::Active,
            external_subscription_id: Some(external.to_string()),
            current_period_start: Some(activation.period.start),
            current_period_end: Some(activation.period.end),
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };
        state.subscriptions.push(sub.clone());
        Ok(sub)
    }

    async fn set_subscription_status(
        &self,
        external_subscription_id: &str,
        status: SubscriptionStatus,
        period: Option<BillingPeriod>,
    ) -> BillingResult<u64> {
        let mut state = self.state();
        let now = OffsetDateTime::now_utc();
        let mut touched = 0;
        for sub in state.subscriptions.iter_mut() {
            if sub.external_subscription_id.as_deref() != Some(external_subscription_id) {
                continue;
            }
            sub.status = status;
            if let Some(period) = period {
                sub.current_period_start = Some(period.start);
                sub.current_period_end = Some(period.end);
            }
            match status {
                SubscriptionStatus::Active => sub.cancelled_at = None,
                SubscriptionStatus::Cancelled => {
                    sub.cancelled_at.get_or_insert(now);
                }
                SubscriptionStatus::PastDue => {}
            }
            sub.updated_at = now;
            touched += 1;
        }
        Ok(touched)
    }

    async fn cancel_subscriptions(
        &self,
        external_subscription_id: &str,
        cancelled_at: OffsetDateTime,
    ) -> BillingResult<u64> {
        let mut state = self.state();
        let mut touched = 0;
        for sub in state.subscriptions.iter_mut() {
            if sub.external_subscription_id.as_deref() == Some(external_subscription_id) {
                sub.status = SubscriptionStatus::Cancelled;
                sub.cancelled_at = Some(cancelled_at);
                sub.updated_at = cancelled_at;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn claim_webhook_event(&self, event_id: &str, _event_type: &str) -> BillingResult<bool> {
        let mut state = self.state();
        let now = OffsetDateTime::now_utc();
        match state.webhook_events.get_mut(event_id) {
            None => {
                state.webhook_events.insert(
                    event_id.to_string(),
                    WebhookEventState {
                        result: "processing",
                        started_at: now,
                    },
                );
                Ok(true)
            }
            Some(existing)
                if existing.result == "error"
                    || (existing.result == "processing"
                        && existing.started_at < now - STALE_PROCESSING) =>
            {
                existing.result = "processing";
                existing.started_at = now;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    async fn finish_webhook_event(
        &self,
        event_id: &str,
        error_message: Option<&str>,
    ) -> BillingResult<()> {
        if let Some(existing) = self.state().webhook_events.get_mut(event_id) {
            existing.result = if error_message.is_some() { "error" } else { "success" };
        }
        Ok(())
    }
}

/// Gateway double: records checkout requests and cancellations, verifies
/// webhooks against [`TEST_WEBHOOK_SECRET`].
#[derive(Default)]
pub struct FakeGateway {
    checkouts: Mutex<Vec<CheckoutRequest>>,
    cancelled: Mutex<Vec<String>>,
    sessions: AtomicU64,
    fail_checkout: AtomicBool,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkout_requests(&self) -> Vec<CheckoutRequest> {
        lock(&self.checkouts).clone()
    }

    pub fn cancelled_subscriptions(&self) -> Vec<String> {
        lock(&self.cancelled).clone()
    }

    /// Make the next checkout calls fail as if the processor were down.
    pub fn fail_checkout(&self, fail: bool) {
        self.fail_checkout.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout(&self, request: CheckoutRequest) -> BillingResult<CheckoutSession> {
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(BillingError::Gateway("processor unavailable".to_string()));
        }
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.checkouts).push(request);
        let id = format!("cs_test_{}", n);
        Ok(CheckoutSession {
            url: format!("https://checkout.test/pay/{}", id),
            id,
        })
    }

    fn verify_webhook(&self, payload: &str, signature: &str) -> BillingResult<()> {
        verify_signature(
            payload,
            signature,
            TEST_WEBHOOK_SECRET,
            DEFAULT_TOLERANCE_SECONDS,
            OffsetDateTime::now_utc().unix_timestamp(),
        )
    }

    fn parse_event(&self, payload: &str) -> BillingResult<PaymentEvent> {
        parse_event(payload)
    }

    async fn cancel_subscription(&self, external_subscription_id: &str) -> BillingResult<()> {
        lock(&self.cancelled).push(external_subscription_id.to_string());
        Ok(())
    }
}

/// Notifier double that keeps every message it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<EmailMessage>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<EmailMessage> {
        lock(&self.messages).clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: EmailMessage) -> BillingResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BillingError::Internal("mail server down".to_string()));
        }
        lock(&self.messages).push(message);
        Ok(())
    }
}
