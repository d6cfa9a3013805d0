//! Payment webhook reconciliation
//!
//! Each delivery is verified, claimed in the webhook event ledger and then
//! dispatched by type. Handlers are idempotent on their own: invoice
//! payments are keyed by the external transaction id, tier purchases by
//! (user, tier), subscriptions by the external subscription id. The ledger
//! only saves repeated work.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::email::{self, Notifier};
use crate::error::{BillingError, BillingResult};
use crate::events::{
    CompletedCheckout, PaymentEvent, PaymentEventKind, SucceededPayment,
    BILLING_REASON_SUBSCRIPTION_CYCLE,
};
use crate::gateway::{CheckoutPurpose, PaymentGateway};
use crate::invoice::{NewPayment, PaymentApplication};
use crate::ledger::{
    BillingPeriod, SubscriptionActivation, SubscriptionStatus, SubscriptionType, TierPurchase,
};
use crate::store::BillingStore;

/// Payment method recorded for gateway-confirmed payments
pub const GATEWAY_PAYMENT_METHOD: &str = "stripe";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    /// Already processed, or being processed by another delivery
    Duplicate,
}

#[derive(Clone)]
pub struct WebhookHandler {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
}

impl WebhookHandler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
        }
    }

    /// Verify, parse and process one delivery.
    pub async fn handle(&self, payload: &str, signature: &str) -> BillingResult<WebhookOutcome> {
        self.gateway.verify_webhook(payload, signature)?;
        let event = self.gateway.parse_event(payload)?;
        self.handle_event(event).await
    }

    /// Process a verified event under the ledger claim.
    pub async fn handle_event(&self, event: PaymentEvent) -> BillingResult<WebhookOutcome> {
        let claimed = self
            .store
            .claim_webhook_event(&event.id, &event.event_type)
            .await
            .map_err(|e| {
                tracing::error!(
                    event_id = %event.id,
                    error = %e,
                    "Failed to claim webhook event for processing"
                );
                e
            })?;

        if !claimed {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Duplicate webhook event, skipping"
            );
            return Ok(WebhookOutcome::Duplicate);
        }

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Processing webhook event"
        );

        let result = self.process_event_internal(&event).await;
        let error_message = result.as_ref().err().map(ToString::to_string);

        if let Err(e) = self
            .store
            .finish_webhook_event(&event.id, error_message.as_deref())
            .await
        {
            tracing::warn!(
                event_id = %event.id,
                error = %e,
                "First attempt to record webhook result failed, retrying"
            );
            if let Err(retry_err) = self
                .store
                .finish_webhook_event(&event.id, error_message.as_deref())
                .await
            {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    first_error = %e,
                    retry_error = %retry_err,
                    "Failed to record webhook result; event stays in processing until it goes stale"
                );
            }
        }

        match result {
            Ok(()) => Ok(WebhookOutcome::Processed),
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Webhook event processing failed"
                );
                Err(e)
            }
        }
    }

    async fn process_event_internal(&self, event: &PaymentEvent) -> BillingResult<()> {
        match &event.kind {
            PaymentEventKind::CheckoutCompleted(checkout) => {
                self.handle_checkout_completed(checkout).await
            }
            PaymentEventKind::PaymentSucceeded(payment) => {
                self.handle_payment_succeeded(payment).await
            }
            PaymentEventKind::PaymentFailed {
                payment_intent_id,
                failure_message,
            } => {
                tracing::warn!(
                    payment_intent_id = %payment_intent_id,
                    failure_message = ?failure_message,
                    "Payment failed"
                );
                Ok(())
            }
            PaymentEventKind::SubscriptionUpdated {
                subscription_id,
                status,
                period,
            } => {
                self.handle_subscription_updated(subscription_id, status, *period)
                    .await
            }
            PaymentEventKind::SubscriptionDeleted { subscription_id } => {
                self.handle_subscription_deleted(subscription_id).await
            }
            PaymentEventKind::RecurringPaymentSucceeded {
                subscription_id,
                billing_reason,
                period,
            } => {
                self.handle_renewal_paid(subscription_id.as_deref(), billing_reason.as_deref(), *period)
                    .await
            }
            PaymentEventKind::RecurringPaymentFailed { subscription_id } => {
                self.handle_renewal_failed(subscription_id.as_deref()).await
            }
            PaymentEventKind::Unhandled => {
                tracing::info!(
                    event_type = %event.event_type,
                    event_id = %event.id,
                    "Received unhandled webhook event type"
                );
                Ok(())
            }
        }
    }

    async fn handle_checkout_completed(&self, checkout: &CompletedCheckout) -> BillingResult<()> {
        let Some(purpose) = &checkout.purpose else {
            tracing::warn!(
                session_id = %checkout.session_id,
                "Checkout completed without billing metadata, ignoring"
            );
            return Ok(());
        };

        match purpose {
            CheckoutPurpose::Invoice { invoice_id, .. } => {
                self.apply_invoice_payment(
                    *invoice_id,
                    checkout.amount_total_cents,
                    checkout.transaction_id(),
                )
                .await
            }
            CheckoutPurpose::Tier { tier_id, user_id } => {
                self.record_tier_purchase(
                    *user_id,
                    *tier_id,
                    checkout.amount_total_cents,
                    checkout.transaction_id(),
                )
                .await
            }
            CheckoutPurpose::Subscription {
                user_id,
                subscription_type,
            } => {
                let Some(subscription_id) = &checkout.subscription_id else {
                    tracing::warn!(
                        session_id = %checkout.session_id,
                        user_id = %user_id,
                        "Subscription checkout completed without a subscription id"
                    );
                    return Ok(());
                };
                self.activate_subscription(*user_id, *subscription_type, subscription_id)
                    .await
            }
        }
    }

    /// Second confirmation channel for one-off payments. The transaction id
    /// matches the one the checkout event used, so whichever arrives second
    /// is a no-op.
    async fn handle_payment_succeeded(&self, payment: &SucceededPayment) -> BillingResult<()> {
        match &payment.purpose {
            Some(CheckoutPurpose::Invoice { invoice_id, .. }) => {
                self.apply_invoice_payment(
                    *invoice_id,
                    Some(payment.amount_cents),
                    &payment.payment_intent_id,
                )
                .await
            }
            Some(CheckoutPurpose::Tier { tier_id, user_id }) => {
                self.record_tier_purchase(
                    *user_id,
                    *tier_id,
                    Some(payment.amount_cents),
                    &payment.payment_intent_id,
                )
                .await
            }
            Some(CheckoutPurpose::Subscription { .. }) => {
                tracing::debug!(
                    payment_intent_id = %payment.payment_intent_id,
                    "Subscription payment intent, handled by subscription events"
                );
                Ok(())
            }
            None => {
                tracing::info!(
                    payment_intent_id = %payment.payment_intent_id,
                    "Payment intent without billing metadata, ignoring"
                );
                Ok(())
            }
        }
    }

    async fn apply_invoice_payment(
        &self,
        invoice_id: Uuid,
        amount_cents: Option<i64>,
        transaction_id: &str,
    ) -> BillingResult<()> {
        let amount_cents = match amount_cents {
            Some(amount) if amount > 0 => amount,
            other => {
                tracing::warn!(
                    invoice_id = %invoice_id,
                    transaction_id = %transaction_id,
                    amount_cents = ?other,
                    "Ignoring invoice payment with non-positive amount"
                );
                return Ok(());
            }
        };

        let application = self
            .store
            .apply_invoice_payment(NewPayment {
                invoice_id,
                amount_cents,
                method: GATEWAY_PAYMENT_METHOD.to_string(),
                external_transaction_id: transaction_id.to_string(),
            })
            .await?;

        match application {
            PaymentApplication::Applied { invoice, payment } => {
                tracing::info!(
                    invoice_id = %invoice.id,
                    payment_id = %payment.id,
                    transaction_id = %transaction_id,
                    amount_cents = payment.amount_cents,
                    amount_paid_cents = invoice.amount_paid_cents,
                    status = %invoice.status,
                    "Invoice payment applied"
                );
                match self.store.find_client(invoice.client_id).await {
                    Ok(Some(client)) => {
                        email::notify(
                            self.notifier.as_ref(),
                            email::payment_receipt(&invoice, &client, payment.amount_cents),
                        )
                        .await
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not load client for payment receipt")
                    }
                }
            }
            PaymentApplication::Duplicate => {
                tracing::info!(
                    invoice_id = %invoice_id,
                    transaction_id = %transaction_id,
                    "Payment already recorded for this transaction"
                );
            }
            PaymentApplication::InvoiceMissing => {
                tracing::warn!(
                    invoice_id = %invoice_id,
                    transaction_id = %transaction_id,
                    "Payment received for unknown invoice"
                );
            }
        }
        Ok(())
    }

    async fn record_tier_purchase(
        &self,
        user_id: Uuid,
        tier_id: Uuid,
        amount_cents: Option<i64>,
        transaction_id: &str,
    ) -> BillingResult<()> {
        if self.store.find_tier(tier_id).await?.is_none() {
            tracing::warn!(
                user_id = %user_id,
                tier_id = %tier_id,
                transaction_id = %transaction_id,
                "Tier purchase names an unknown tier, acknowledging"
            );
            return Ok(());
        }

        let created = self
            .store
            .record_tier_purchase(&TierPurchase {
                id: Uuid::new_v4(),
                user_id,
                tier_id,
                amount_cents: amount_cents.unwrap_or(0).max(0),
                external_transaction_id: Some(transaction_id.to_string()),
                created_at: OffsetDateTime::now_utc(),
            })
            .await?;

        if created {
            tracing::info!(
                user_id = %user_id,
                tier_id = %tier_id,
                transaction_id = %transaction_id,
                "Tier purchase recorded"
            );
        } else {
            tracing::info!(
                user_id = %user_id,
                tier_id = %tier_id,
                "Tier already owned, purchase not recorded again"
            );
        }
        Ok(())
    }

    async fn activate_subscription(
        &self,
        user_id: Uuid,
        subscription_type: SubscriptionType,
        subscription_id: &str,
    ) -> BillingResult<()> {
        let subscription = self
            .store
            .activate_subscription(&SubscriptionActivation {
                user_id,
                subscription_type,
                external_subscription_id: subscription_id.to_string(),
                period: BillingPeriod::starting(OffsetDateTime::now_utc()),
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription_id,
            local_id = %subscription.id,
            "Subscription activated"
        );
        Ok(())
    }

    async fn handle_subscription_updated(
        &self,
        subscription_id: &str,
        gateway_status: &str,
        period: Option<BillingPeriod>,
    ) -> BillingResult<()> {
        let status = SubscriptionStatus::from_gateway(gateway_status);
        let touched = self
            .store
            .set_subscription_status(subscription_id, status, period)
            .await?;

        tracing::info!(
            subscription_id = %subscription_id,
            gateway_status = %gateway_status,
            status = %status,
            rows = touched,
            "Subscription updated"
        );
        Ok(())
    }

    async fn handle_subscription_deleted(&self, subscription_id: &str) -> BillingResult<()> {
        let touched = self
            .store
            .cancel_subscriptions(subscription_id, OffsetDateTime::now_utc())
            .await?;

        tracing::info!(
            subscription_id = %subscription_id,
            rows = touched,
            "Subscription cancelled by payment provider"
        );
        Ok(())
    }

    async fn handle_renewal_paid(
        &self,
        subscription_id: Option<&str>,
        billing_reason: Option<&str>,
        period: Option<BillingPeriod>,
    ) -> BillingResult<()> {
        if billing_reason != Some(BILLING_REASON_SUBSCRIPTION_CYCLE) {
            tracing::debug!(
                billing_reason = ?billing_reason,
                "Invoice payment is not a renewal, skipping"
            );
            return Ok(());
        }
        let Some(subscription_id) = subscription_id else {
            tracing::warn!("Renewal invoice without a subscription id");
            return Ok(());
        };

        let period = period.unwrap_or_else(|| BillingPeriod::starting(OffsetDateTime::now_utc()));
        let touched = self
            .store
            .set_subscription_status(subscription_id, SubscriptionStatus::Active, Some(period))
            .await?;

        tracing::info!(
            subscription_id = %subscription_id,
            period_end = %period.end,
            rows = touched,
            "Subscription renewed"
        );
        Ok(())
    }

    async fn handle_renewal_failed(&self, subscription_id: Option<&str>) -> BillingResult<()> {
        let Some(subscription_id) = subscription_id else {
            tracing::warn!("Failed invoice payment without a subscription id");
            return Ok(());
        };

        let touched = self
            .store
            .set_subscription_status(subscription_id, SubscriptionStatus::PastDue, None)
            .await?;

        tracing::warn!(
            subscription_id = %subscription_id,
            rows = touched,
            "Subscription is past due"
        );

        if let Some(subscription) = self
            .store
            .find_subscription_by_external_id(subscription_id)
            .await?
        {
            if let Some(client) = self.store.find_client_by_user(subscription.user_id).await? {
                email::notify(self.notifier.as_ref(), email::subscription_past_due(&client)).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::InvoiceStatus;
    use crate::testing::{sign, FakeGateway, MemoryBillingStore, RecordingNotifier};
    use serde_json::{json, Value};

    struct Fixture {
        store: Arc<MemoryBillingStore>,
        notifier: Arc<RecordingNotifier>,
        handler: WebhookHandler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryBillingStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        Fixture {
            handler: WebhookHandler::new(store.clone(), Arc::new(FakeGateway::new()), notifier.clone()),
            store,
            notifier,
        }
    }

    impl Fixture {
        async fn deliver(&self, event: &Value) -> BillingResult<WebhookOutcome> {
            let payload = event.to_string();
            self.handler.handle(&payload, &sign(&payload)).await
        }
    }

    fn event(id: &str, event_type: &str, object: Value) -> Value {
        json!({ "id": id, "type": event_type, "created": 1_700_000_000, "data": { "object": object } })
    }

    fn invoice_metadata(invoice_id: Uuid, client_id: Uuid) -> Value {
        json!({ "purpose": "invoice", "invoice_id": invoice_id, "client_id": client_id })
    }

    fn intent_succeeded(id: &str, intent: &str, amount: i64, metadata: Value) -> Value {
        event(
            id,
            "payment_intent.succeeded",
            json!({ "id": intent, "amount": amount, "amount_received": amount, "metadata": metadata }),
        )
    }

    #[tokio::test]
    async fn test_payment_intent_pays_invoice_once() {
        let f = fixture();
        let client = f.store.seed_client("Avery", "avery@example.com", None);
        let invoice = f.store.seed_invoice(client.id, 14000, 0, InvoiceStatus::Sent).await;
        let delivery = intent_succeeded("evt_1", "pi_123", 14000, invoice_metadata(invoice.id, client.id));

        assert_eq!(f.deliver(&delivery).await.unwrap(), WebhookOutcome::Processed);

        let paid = f.store.find_invoice(invoice.id).await.unwrap().unwrap().invoice;
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert_eq!(paid.amount_paid_cents, 14000);
        assert!(paid.paid_at.is_some());

        let payments = f.store.list_payments(invoice.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].external_transaction_id.as_deref(), Some("pi_123"));

        // Exact redelivery is stopped by the event ledger.
        assert_eq!(f.deliver(&delivery).await.unwrap(), WebhookOutcome::Duplicate);
        // A different event for the same transaction is stopped by the payment key.
        let replay = intent_succeeded("evt_2", "pi_123", 14000, invoice_metadata(invoice.id, client.id));
        assert_eq!(f.deliver(&replay).await.unwrap(), WebhookOutcome::Processed);

        assert_eq!(f.store.list_payments(invoice.id).await.unwrap().len(), 1);
        let after = f.store.find_invoice(invoice.id).await.unwrap().unwrap().invoice;
        assert_eq!(after.amount_paid_cents, 14000);
        assert_eq!(f.notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_checkout_and_intent_channels_credit_once() {
        let f = fixture();
        let client = f.store.seed_client("Avery", "avery@example.com", None);
        let invoice = f.store.seed_invoice(client.id, 14000, 0, InvoiceStatus::Sent).await;
        let metadata = invoice_metadata(invoice.id, client.id);

        let checkout = event(
            "evt_cs",
            "checkout.session.completed",
            json!({ "id": "cs_1", "payment_intent": "pi_9", "amount_total": 14000, "metadata": metadata }),
        );
        f.deliver(&checkout).await.unwrap();
        f.deliver(&intent_succeeded("evt_pi", "pi_9", 14000, metadata)).await.unwrap();

        assert_eq!(f.store.list_payments(invoice.id).await.unwrap().len(), 1);
        let after = f.store.find_invoice(invoice.id).await.unwrap().unwrap().invoice;
        assert_eq!(after.amount_paid_cents, 14000);
    }

    #[tokio::test]
    async fn test_partial_payment_accumulates_and_clamps() {
        let f = fixture();
        let client = f.store.seed_client("Avery", "avery@example.com", None);
        let invoice = f.store.seed_invoice(client.id, 14000, 0, InvoiceStatus::Sent).await;
        let metadata = invoice_metadata(invoice.id, client.id);

        f.deliver(&intent_succeeded("evt_a", "pi_a", 4000, metadata.clone())).await.unwrap();
        let partial = f.store.find_invoice(invoice.id).await.unwrap().unwrap().invoice;
        assert_eq!(partial.status, InvoiceStatus::Partial);
        assert_eq!(partial.amount_paid_cents, 4000);

        f.deliver(&intent_succeeded("evt_b", "pi_b", 20000, metadata)).await.unwrap();
        let paid = f.store.find_invoice(invoice.id).await.unwrap().unwrap().invoice;
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert_eq!(paid.amount_paid_cents, 14000);
    }

    #[tokio::test]
    async fn test_non_positive_amount_is_ignored() {
        let f = fixture();
        let client = f.store.seed_client("Avery", "avery@example.com", None);
        let invoice = f.store.seed_invoice(client.id, 14000, 0, InvoiceStatus::Sent).await;

        let outcome = f
            .deliver(&intent_succeeded("evt_neg", "pi_neg", -500, invoice_metadata(invoice.id, client.id)))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);
        assert!(f.store.list_payments(invoice.id).await.unwrap().is_empty());
        let after = f.store.find_invoice(invoice.id).await.unwrap().unwrap().invoice;
        assert_eq!(after.status, InvoiceStatus::Sent);
    }

    #[tokio::test]
    async fn test_bad_signature_changes_nothing() {
        let f = fixture();
        let client = f.store.seed_client("Avery", "avery@example.com", None);
        let invoice = f.store.seed_invoice(client.id, 14000, 0, InvoiceStatus::Sent).await;
        let payload =
            intent_succeeded("evt_1", "pi_1", 14000, invoice_metadata(invoice.id, client.id)).to_string();

        let result = f.handler.handle(&payload, "t=1,v1=deadbeef").await;
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
        assert!(f.store.list_payments(invoice.id).await.unwrap().is_empty());
        assert!(!f.store.webhook_event_seen("evt_1"));
    }

    #[tokio::test]
    async fn test_tier_purchase_dual_channel() {
        let f = fixture();
        let tier = f.store.seed_tier("Puppy foundations", 4900);
        let user_id = Uuid::new_v4();
        let metadata = json!({ "purpose": "tier", "tier_id": tier.id, "user_id": user_id });

        f.deliver(&intent_succeeded("evt_pi", "pi_t", 4900, metadata.clone()))
            .await
            .unwrap();
        f.deliver(&event(
            "evt_cs",
            "checkout.session.completed",
            json!({ "id": "cs_t", "payment_intent": "pi_t", "amount_total": 4900, "metadata": metadata }),
        ))
        .await
        .unwrap();

        assert_eq!(f.store.tier_purchase_count(user_id), 1);
        let purchase = f.store.find_tier_purchase(user_id, tier.id).await.unwrap().unwrap();
        assert_eq!(purchase.amount_cents, 4900);
        assert_eq!(purchase.external_transaction_id.as_deref(), Some("pi_t"));
    }

    #[tokio::test]
    async fn test_subscription_lifecycle_events() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        f.store.seed_client("Avery", "avery@example.com", Some(user_id));

        f.deliver(&event(
            "evt_1",
            "checkout.session.completed",
            json!({
                "id": "cs_sub",
                "subscription": "sub_1",
                "metadata": { "purpose": "subscription", "user_id": user_id, "subscription_type": "live_support" }
            }),
        ))
        .await
        .unwrap();
        let active = f.store.latest_subscription(user_id).await.unwrap().unwrap();
        assert_eq!(active.status, SubscriptionStatus::Active);
        assert!(active.grants_access(OffsetDateTime::now_utc()));

        f.deliver(&event(
            "evt_2",
            "invoice.payment_failed",
            json!({ "subscription": "sub_1" }),
        ))
        .await
        .unwrap();
        let past_due = f.store.latest_subscription(user_id).await.unwrap().unwrap();
        assert_eq!(past_due.status, SubscriptionStatus::PastDue);
        assert_eq!(f.notifier.messages().len(), 1);

        let start = OffsetDateTime::now_utc().unix_timestamp();
        let end = start + 30 * 86_400;
        f.deliver(&event(
            "evt_3",
            "invoice.payment_succeeded",
            json!({
                "subscription": "sub_1",
                "billing_reason": "subscription_cycle",
                "lines": { "data": [ { "period": { "start": start, "end": end } } ] }
            }),
        ))
        .await
        .unwrap();
        let renewed = f.store.latest_subscription(user_id).await.unwrap().unwrap();
        assert_eq!(renewed.status, SubscriptionStatus::Active);
        assert_eq!(renewed.current_period_end.unwrap().unix_timestamp(), end);

        f.deliver(&event(
            "evt_4",
            "customer.subscription.deleted",
            json!({ "id": "sub_1", "status": "canceled" }),
        ))
        .await
        .unwrap();
        let cancelled = f.store.latest_subscription(user_id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn test_initial_subscription_invoice_does_not_renew() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        f.store
            .activate_subscription(&SubscriptionActivation {
                user_id,
                subscription_type: SubscriptionType::LiveSupport,
                external_subscription_id: "sub_1".to_string(),
                period: BillingPeriod::starting(OffsetDateTime::now_utc()),
            })
            .await
            .unwrap();
        f.store
            .set_subscription_status("sub_1", SubscriptionStatus::PastDue, None)
            .await
            .unwrap();

        f.deliver(&event(
            "evt_1",
            "invoice.payment_succeeded",
            json!({ "subscription": "sub_1", "billing_reason": "subscription_create" }),
        ))
        .await
        .unwrap();

        let sub = f.store.latest_subscription(user_id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn test_subscription_updated_maps_status() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        f.store
            .activate_subscription(&SubscriptionActivation {
                user_id,
                subscription_type: SubscriptionType::LiveSupport,
                external_subscription_id: "sub_1".to_string(),
                period: BillingPeriod::starting(OffsetDateTime::now_utc()),
            })
            .await
            .unwrap();

        f.deliver(&event(
            "evt_1",
            "customer.subscription.updated",
            json!({ "id": "sub_1", "status": "unpaid" }),
        ))
        .await
        .unwrap();
        let sub = f.store.latest_subscription(user_id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);

        f.deliver(&event(
            "evt_2",
            "customer.subscription.updated",
            json!({ "id": "sub_1", "status": "active" }),
        ))
        .await
        .unwrap();
        let sub = f.store.latest_subscription(user_id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_unknown_and_failed_payment_events_are_acknowledged() {
        let f = fixture();
        let unknown = event("evt_1", "customer.created", json!({ "id": "cus_1" }));
        assert_eq!(f.deliver(&unknown).await.unwrap(), WebhookOutcome::Processed);

        let failed = event(
            "evt_2",
            "payment_intent.payment_failed",
            json!({ "id": "pi_1", "last_payment_error": { "message": "card declined" } }),
        );
        assert_eq!(f.deliver(&failed).await.unwrap(), WebhookOutcome::Processed);
    }

    #[tokio::test]
    async fn test_unknown_tier_purchase_is_acknowledged() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let delivery = intent_succeeded(
            "evt_1",
            "pi_1",
            4900,
            json!({ "purpose": "tier", "tier_id": Uuid::new_v4(), "user_id": user_id }),
        );

        assert_eq!(f.deliver(&delivery).await.unwrap(), WebhookOutcome::Processed);
        assert_eq!(f.store.tier_purchase_count(user_id), 0);
        assert_eq!(f.deliver(&delivery).await.unwrap(), WebhookOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_failed_event_can_be_redelivered() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let tier = f.store.seed_tier("Puppy foundations", 4900);
        let delivery = intent_succeeded(
            "evt_1",
            "pi_1",
            4900,
            json!({ "purpose": "tier", "tier_id": tier.id, "user_id": user_id }),
        );

        f.store.fail_ledger_writes(true);
        assert!(matches!(f.deliver(&delivery).await, Err(BillingError::Database(_))));
        assert_eq!(f.store.tier_purchase_count(user_id), 0);

        // The error was recorded, so the redelivery is claimed and runs again.
        f.store.fail_ledger_writes(false);
        assert_eq!(f.deliver(&delivery).await.unwrap(), WebhookOutcome::Processed);
        assert_eq!(f.store.tier_purchase_count(user_id), 1);
    }
}
