// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries transition context
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Kennel Desk Billing Module
//!
//! Turns logged training work into invoices and reconciles card payments.
//!
//! ## Features
//!
//! - **Service Records**: Append-only log of billable work per dog or booking
//! - **Invoice Builder**: Invoice uninvoiced records for a client and period
//! - **Invoice Lifecycle**: Status transitions, overdue sweep, deletion of drafts
//! - **Checkout**: Stripe-hosted payment pages for invoices, tiers and subscriptions
//! - **Webhooks**: Signed, idempotent reconciliation of Stripe events
//! - **Ledger**: Training-content tier purchases and the live-support subscription
//! - **Invariants**: Read-only consistency checks
//! - **Email Notifications**: Invoice sent, payment receipt, payment failed

pub mod access;
pub mod builder;
pub mod checkout;
pub mod client;
pub mod email;
pub mod error;
pub mod events;
pub mod gateway;
pub mod invariants;
pub mod invoice;
pub mod ledger;
pub mod lifecycle;
pub mod records;
pub mod signature;
pub mod store;
pub mod webhooks;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::sync::Arc;

use sqlx::PgPool;

// Access
pub use access::{Caller, Role};

// Builder
pub use builder::{GenerateInvoice, InvoiceBuilder, ManualInvoice, ManualLine};

// Checkout
pub use checkout::CheckoutService;

// Client
pub use client::{StripeConfig, StripeGateway};

// Email
pub use email::{EmailConfig, EmailMessage, LogNotifier, Notifier, ResendNotifier};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{PaymentEvent, PaymentEventKind};

// Gateway
pub use gateway::{
    CheckoutLine, CheckoutMode, CheckoutPurpose, CheckoutRequest, CheckoutSession,
    PaymentGateway,
};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Invoices
pub use invoice::{Invoice, InvoiceDetail, InvoiceItem, InvoiceStatus, Payment};

// Ledger
pub use ledger::{
    LedgerService, Subscription, SubscriptionStatus, SubscriptionType, SubscriptionView, Tier,
    TierAccess, TierPurchase,
};

// Lifecycle
pub use lifecycle::{InvoiceLifecycle, InvoiceQuery, UpdateInvoice};

// Service records
pub use records::{
    BillableRecord, NewServiceRecord, ServicePeriod, ServiceRecord, ServiceRecordService,
};

// Store
pub use store::{BillingStore, PgBillingStore};

// Webhooks
pub use webhooks::{WebhookHandler, WebhookOutcome};

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub records: ServiceRecordService,
    pub builder: InvoiceBuilder,
    pub lifecycle: InvoiceLifecycle,
    pub checkout: CheckoutService,
    pub webhooks: WebhookHandler,
    pub ledger: LedgerService,
}

impl BillingService {
    /// Wire every service over the same store, gateway and notifier
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        app_base_url: impl Into<String>,
    ) -> Self {
        Self {
            records: ServiceRecordService::new(store.clone()),
            builder: InvoiceBuilder::new(store.clone()),
            lifecycle: InvoiceLifecycle::new(store.clone(), notifier.clone()),
            checkout: CheckoutService::new(store.clone(), gateway.clone(), app_base_url),
            webhooks: WebhookHandler::new(store.clone(), gateway.clone(), notifier),
            ledger: LedgerService::new(store, gateway),
        }
    }

    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let gateway = StripeGateway::from_env()?;
        let app_base_url = gateway.config().app_base_url.clone();
        let notifier = EmailConfig::from_env().into_notifier();

        Ok(Self::new(
            Arc::new(PgBillingStore::new(pool)),
            Arc::new(gateway),
            notifier,
            app_base_url,
        ))
    }
}
