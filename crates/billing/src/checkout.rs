//! Checkout session creation for invoices, content tiers and subscriptions

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::access::Caller;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    CheckoutLine, CheckoutMode, CheckoutPurpose, CheckoutRequest, CheckoutSession, PaymentGateway,
};
use crate::invoice::{InvoiceDetail, InvoiceStatus};
use crate::ledger::SubscriptionType;
use crate::store::BillingStore;

#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
    app_base_url: String,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        app_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            app_base_url: app_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Start paying the outstanding balance of an invoice.
    pub async fn create_invoice_checkout(
        &self,
        caller: &Caller,
        invoice_id: Uuid,
    ) -> BillingResult<CheckoutSession> {
        let detail = self
            .store
            .find_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Invoice".to_string()))?;
        let invoice = &detail.invoice;

        if !caller.is_admin() {
            let owns = self
                .store
                .find_client_by_user(caller.user_id)
                .await?
                .is_some_and(|client| client.id == invoice.client_id);
            if !owns {
                return Err(BillingError::Forbidden);
            }
            if invoice.status == InvoiceStatus::Draft {
                return Err(BillingError::NotFound("Invoice".to_string()));
            }
        }

        match invoice.status {
            InvoiceStatus::Paid => return Err(BillingError::AlreadyPaid),
            InvoiceStatus::Cancelled => return Err(BillingError::Cancelled),
            InvoiceStatus::Draft => {
                return Err(BillingError::InvalidState(
                    "Invoice has not been sent yet".to_string(),
                ))
            }
            InvoiceStatus::Sent | InvoiceStatus::Partial | InvoiceStatus::Overdue => {}
        }
        if invoice.amount_due_cents() <= 0 {
            return Err(BillingError::NothingDue);
        }

        let url = format!("{}/invoices/{}", self.app_base_url, invoice.id);
        let session = self
            .gateway
            .create_checkout(CheckoutRequest {
                mode: CheckoutMode::Payment(invoice_lines(&detail)),
                purpose: CheckoutPurpose::Invoice {
                    invoice_id: invoice.id,
                    client_id: invoice.client_id,
                },
                customer_email: Some(detail.client.email.clone()),
                success_url: format!("{}?payment=success", url),
                cancel_url: format!("{}?payment=cancelled", url),
            })
            .await?;

        self.store
            .set_invoice_checkout_session(invoice.id, &session.id)
            .await?;

        tracing::info!(
            invoice_id = %invoice.id,
            session_id = %session.id,
            amount_due_cents = invoice.amount_due_cents(),
            "Created invoice checkout session"
        );

        Ok(session)
    }

    /// One-time purchase of a content tier.
    pub async fn create_tier_checkout(
        &self,
        caller: &Caller,
        tier_id: Uuid,
    ) -> BillingResult<CheckoutSession> {
        let tier = self
            .store
            .find_tier(tier_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Tier".to_string()))?;

        if self
            .store
            .find_tier_purchase(caller.user_id, tier_id)
            .await?
            .is_some()
        {
            return Err(BillingError::InvalidState(
                "You already have access to this tier".to_string(),
            ));
        }
        if tier.price_cents <= 0 {
            return Err(BillingError::NothingDue);
        }

        let customer_email = self
            .store
            .find_client_by_user(caller.user_id)
            .await?
            .map(|client| client.email);

        let session = self
            .gateway
            .create_checkout(CheckoutRequest {
                mode: CheckoutMode::Payment(vec![CheckoutLine {
                    name: tier.name.clone(),
                    unit_amount_cents: tier.price_cents,
                    quantity: 1,
                }]),
                purpose: CheckoutPurpose::Tier {
                    tier_id,
                    user_id: caller.user_id,
                },
                customer_email,
                success_url: format!("{}/training/tiers/{}?purchase=success", self.app_base_url, tier_id),
                cancel_url: format!("{}/training/tiers/{}?purchase=cancelled", self.app_base_url, tier_id),
            })
            .await?;

        tracing::info!(
            tier_id = %tier_id,
            user_id = %caller.user_id,
            session_id = %session.id,
            "Created tier checkout session"
        );

        Ok(session)
    }

    /// Start a live-support subscription.
    pub async fn create_subscription_checkout(
        &self,
        caller: &Caller,
    ) -> BillingResult<CheckoutSession> {
        let now = OffsetDateTime::now_utc();
        if self
            .store
            .latest_subscription(caller.user_id)
            .await?
            .is_some_and(|sub| sub.grants_access(now))
        {
            return Err(BillingError::SubscriptionAlreadyActive);
        }

        let customer_email = self
            .store
            .find_client_by_user(caller.user_id)
            .await?
            .map(|client| client.email);

        let subscription_type = SubscriptionType::LiveSupport;
        let session = self
            .gateway
            .create_checkout(CheckoutRequest {
                mode: CheckoutMode::Subscription(subscription_type),
                purpose: CheckoutPurpose::Subscription {
                    user_id: caller.user_id,
                    subscription_type,
                },
                customer_email,
                success_url: format!("{}/support?subscription=success", self.app_base_url),
                cancel_url: format!("{}/support?subscription=cancelled", self.app_base_url),
            })
            .await?;

        tracing::info!(
            user_id = %caller.user_id,
            session_id = %session.id,
            "Created subscription checkout session"
        );

        Ok(session)
    }
}

/// One gateway line per invoice item when the items add up to exactly what
/// is still owed; otherwise a single balance line. Partially paid invoices
/// and invoices with credit lines always take the balance path.
fn invoice_lines(detail: &InvoiceDetail) -> Vec<CheckoutLine> {
    let amount_due = detail.invoice.amount_due_cents();

    let itemized: Vec<CheckoutLine> = detail
        .items
        .iter()
        .map(|item| {
            let priced = item
                .unit_price_cents
                .saturating_mul(i64::from(item.quantity));
            if priced == item.total_cents && item.quantity > 0 {
                CheckoutLine {
                    name: item.description.clone(),
                    unit_amount_cents: item.unit_price_cents,
                    quantity: item.quantity as u64,
                }
            } else {
                // Adjusted line: charge its total as a single unit.
                CheckoutLine {
                    name: item.description.clone(),
                    unit_amount_cents: item.total_cents,
                    quantity: 1,
                }
            }
        })
        .collect();

    let all_positive = itemized.iter().all(|line| line.unit_amount_cents > 0);
    let sum = itemized
        .iter()
        .fold(0i64, |acc, line| acc.saturating_add(line.total_cents()));

    if !itemized.is_empty() && all_positive && sum == amount_due {
        itemized
    } else {
        vec![CheckoutLine {
            name: format!("Balance due for {}", detail.invoice.invoice_number),
            unit_amount_cents: amount_due,
            quantity: 1,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{BillingPeriod, SubscriptionActivation, TierPurchase};
    use crate::testing::{FakeGateway, MemoryBillingStore};

    struct Fixture {
        store: Arc<MemoryBillingStore>,
        gateway: Arc<FakeGateway>,
        checkout: CheckoutService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryBillingStore::new());
        let gateway = Arc::new(FakeGateway::new());
        Fixture {
            checkout: CheckoutService::new(store.clone(), gateway.clone(), "https://app.test/"),
            store,
            gateway,
        }
    }

    #[tokio::test]
    async fn test_invoice_checkout_itemizes_and_stores_session() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let client = f.store.seed_client("Avery", "avery@example.com", Some(user_id));
        let invoice = f.store.seed_invoice(client.id, 14000, 0, InvoiceStatus::Sent).await;

        let session = f
            .checkout
            .create_invoice_checkout(&Caller::client(user_id), invoice.id)
            .await
            .unwrap();

        let requests = f.gateway.checkout_requests();
        assert_eq!(requests.len(), 1);
        let CheckoutMode::Payment(lines) = &requests[0].mode else {
            panic!("expected payment mode");
        };
        assert_eq!(lines.iter().map(CheckoutLine::total_cents).sum::<i64>(), 14000);
        assert_eq!(requests[0].customer_email.as_deref(), Some("avery@example.com"));
        assert_eq!(
            requests[0].success_url,
            format!("https://app.test/invoices/{}?payment=success", invoice.id)
        );

        let stored = f.store.find_invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice.checkout_session_id, Some(session.id));
    }

    #[tokio::test]
    async fn test_partially_paid_invoice_charges_balance() {
        let f = fixture();
        let client = f.store.seed_client("Avery", "avery@example.com", None);
        let invoice = f.store.seed_invoice(client.id, 14000, 4000, InvoiceStatus::Partial).await;

        f.checkout
            .create_invoice_checkout(&Caller::admin(Uuid::new_v4()), invoice.id)
            .await
            .unwrap();

        let requests = f.gateway.checkout_requests();
        let CheckoutMode::Payment(lines) = &requests[0].mode else {
            panic!("expected payment mode");
        };
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].unit_amount_cents, 10000);
        assert!(lines[0].name.starts_with("Balance due for INV-"));
    }

    #[tokio::test]
    async fn test_invoice_checkout_rejections() {
        let f = fixture();
        let admin = Caller::admin(Uuid::new_v4());
        let client = f.store.seed_client("Avery", "avery@example.com", Some(Uuid::new_v4()));

        let paid = f.store.seed_invoice(client.id, 14000, 14000, InvoiceStatus::Paid).await;
        assert!(matches!(
            f.checkout.create_invoice_checkout(&admin, paid.id).await,
            Err(BillingError::AlreadyPaid)
        ));

        let cancelled = f.store.seed_invoice(client.id, 14000, 0, InvoiceStatus::Cancelled).await;
        assert!(matches!(
            f.checkout.create_invoice_checkout(&admin, cancelled.id).await,
            Err(BillingError::Cancelled)
        ));

        // Fully paid but not yet marked as such
        let settled = f.store.seed_invoice(client.id, 14000, 14000, InvoiceStatus::Sent).await;
        assert!(matches!(
            f.checkout.create_invoice_checkout(&admin, settled.id).await,
            Err(BillingError::NothingDue)
        ));

        let sent = f.store.seed_invoice(client.id, 14000, 0, InvoiceStatus::Sent).await;
        assert!(matches!(
            f.checkout
                .create_invoice_checkout(&Caller::client(Uuid::new_v4()), sent.id)
                .await,
            Err(BillingError::Forbidden)
        ));

        assert!(matches!(
            f.checkout.create_invoice_checkout(&admin, Uuid::new_v4()).await,
            Err(BillingError::NotFound(_))
        ));
        assert!(f.gateway.checkout_requests().is_empty());
    }

    #[tokio::test]
    async fn test_tier_checkout_refuses_owned_tier() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let tier = f.store.seed_tier("Puppy foundations", 4900);

        f.checkout
            .create_tier_checkout(&Caller::client(user_id), tier.id)
            .await
            .unwrap();
        assert_eq!(
            f.gateway.checkout_requests()[0].purpose,
            CheckoutPurpose::Tier {
                tier_id: tier.id,
                user_id
            }
        );

        f.store
            .record_tier_purchase(&TierPurchase {
                id: Uuid::new_v4(),
                user_id,
                tier_id: tier.id,
                amount_cents: 4900,
                external_transaction_id: Some("pi_1".to_string()),
                created_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();

        let again = f
            .checkout
            .create_tier_checkout(&Caller::client(user_id), tier.id)
            .await;
        assert!(matches!(again, Err(BillingError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_subscription_checkout_refuses_active_subscriber() {
        let f = fixture();
        let user_id = Uuid::new_v4();

        f.checkout
            .create_subscription_checkout(&Caller::client(user_id))
            .await
            .unwrap();
        assert!(matches!(
            f.gateway.checkout_requests()[0].mode,
            CheckoutMode::Subscription(SubscriptionType::LiveSupport)
        ));

        f.store
            .activate_subscription(&SubscriptionActivation {
                user_id,
                subscription_type: SubscriptionType::LiveSupport,
                external_subscription_id: "sub_1".to_string(),
                period: BillingPeriod::starting(OffsetDateTime::now_utc()),
            })
            .await
            .unwrap();

        let again = f
            .checkout
            .create_subscription_checkout(&Caller::client(user_id))
            .await;
        assert!(matches!(again, Err(BillingError::SubscriptionAlreadyActive)));
    }
}
