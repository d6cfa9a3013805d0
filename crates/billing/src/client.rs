//! Stripe adapter for [`PaymentGateway`]

use async_trait::async_trait;
use stripe::{
    CancelSubscription, CheckoutSession as StripeCheckoutSession, CheckoutSessionMode, Client,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData, CreateCheckoutSessionPaymentIntentData,
    CreateCheckoutSessionSubscriptionData, Currency, Subscription,
};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::events::{parse_event, PaymentEvent};
use crate::gateway::{CheckoutMode, CheckoutRequest, CheckoutSession, PaymentGateway};
use crate::ledger::SubscriptionType;
use crate::signature::{verify_signature, DEFAULT_TOLERANCE_SECONDS};

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    /// Recurring price backing the live-support subscription
    pub live_support_price_id: String,
    /// Base URL for checkout success/cancel redirects
    pub app_base_url: String,
    pub currency: String,
    pub webhook_tolerance_seconds: i64,
}

fn required_env(name: &str) -> BillingResult<String> {
    std::env::var(name).map_err(|_| BillingError::Config(format!("{} must be set", name)))
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let webhook_tolerance_seconds = match std::env::var("WEBHOOK_TOLERANCE_SECONDS") {
            Ok(value) => value.parse().map_err(|_| {
                BillingError::Config("WEBHOOK_TOLERANCE_SECONDS must be an integer".to_string())
            })?,
            Err(_) => DEFAULT_TOLERANCE_SECONDS,
        };

        Ok(Self {
            secret_key: required_env("STRIPE_SECRET_KEY")?,
            webhook_secret: required_env("STRIPE_WEBHOOK_SECRET")?,
            live_support_price_id: required_env("STRIPE_LIVE_SUPPORT_PRICE_ID")?,
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            currency: std::env::var("BILLING_CURRENCY")
                .unwrap_or_else(|_| "usd".to_string())
                .to_lowercase(),
            webhook_tolerance_seconds,
        })
    }

    pub fn currency(&self) -> BillingResult<Currency> {
        match self.currency.as_str() {
            "usd" => Ok(Currency::USD),
            "eur" => Ok(Currency::EUR),
            "gbp" => Ok(Currency::GBP),
            "cad" => Ok(Currency::CAD),
            "aud" => Ok(Currency::AUD),
            other => Err(BillingError::Config(format!(
                "Unsupported billing currency: {}",
                other
            ))),
        }
    }

    fn price_id(&self, subscription_type: SubscriptionType) -> &str {
        match subscription_type {
            SubscriptionType::LiveSupport => &self.live_support_price_id,
        }
    }
}

/// [`PaymentGateway`] backed by the Stripe API
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    config: StripeConfig,
    currency: Currency,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> BillingResult<Self> {
        let currency = config.currency()?;
        Ok(Self {
            client: Client::new(config.secret_key.clone()),
            config,
            currency,
        })
    }

    pub fn from_env() -> BillingResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout(&self, request: CheckoutRequest) -> BillingResult<CheckoutSession> {
        let metadata = request.purpose.to_metadata();

        let mut params = CreateCheckoutSession::new();
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.customer_email = request.customer_email.as_deref();
        params.metadata = Some(metadata.clone());

        match &request.mode {
            CheckoutMode::Payment(lines) => {
                params.mode = Some(CheckoutSessionMode::Payment);
                params.line_items = Some(
                    lines
                        .iter()
                        .map(|line| CreateCheckoutSessionLineItems {
                            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                                currency: self.currency,
                                unit_amount: Some(line.unit_amount_cents),
                                product_data: Some(
                                    CreateCheckoutSessionLineItemsPriceDataProductData {
                                        name: line.name.clone(),
                                        ..Default::default()
                                    },
                                ),
                                ..Default::default()
                            }),
                            quantity: Some(line.quantity),
                            ..Default::default()
                        })
                        .collect(),
                );
                // The payment intent carries the same metadata so that
                // payment_intent.succeeded can be routed on its own.
                params.payment_intent_data = Some(CreateCheckoutSessionPaymentIntentData {
                    metadata: Some(metadata),
                    ..Default::default()
                });
            }
            CheckoutMode::Subscription(subscription_type) => {
                params.mode = Some(CheckoutSessionMode::Subscription);
                params.line_items = Some(vec![CreateCheckoutSessionLineItems {
                    price: Some(self.config.price_id(*subscription_type).to_string()),
                    quantity: Some(1),
                    ..Default::default()
                }]);
                params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
                    metadata: Some(metadata),
                    ..Default::default()
                });
            }
        }

        let session = match StripeCheckoutSession::create(&self.client, params).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, "Stripe Checkout Session creation failed");
                return Err(e.into());
            }
        };

        let url = session.url.ok_or_else(|| {
            BillingError::Gateway("Checkout session URL missing".to_string())
        })?;

        tracing::info!(session_id = %session.id, "Created Stripe Checkout Session");

        Ok(CheckoutSession {
            id: session.id.to_string(),
            url,
        })
    }

    fn verify_webhook(&self, payload: &str, signature: &str) -> BillingResult<()> {
        verify_signature(
            payload,
            signature,
            &self.config.webhook_secret,
            self.config.webhook_tolerance_seconds,
            OffsetDateTime::now_utc().unix_timestamp(),
        )
    }

    fn parse_event(&self, payload: &str) -> BillingResult<PaymentEvent> {
        parse_event(payload)
    }

    async fn cancel_subscription(&self, external_subscription_id: &str) -> BillingResult<()> {
        let subscription_id = external_subscription_id
            .parse::<stripe::SubscriptionId>()
            .map_err(|_| {
                BillingError::InvalidInput(format!(
                    "Invalid subscription ID: {}",
                    external_subscription_id
                ))
            })?;

        Subscription::cancel(&self.client, &subscription_id, CancelSubscription::default())
            .await?;

        tracing::info!(
            subscription_id = %external_subscription_id,
            "Cancelled Stripe subscription"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(currency: &str) -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_xxx".to_string(),
            webhook_secret: "whsec_xxx".to_string(),
            live_support_price_id: "price_live".to_string(),
            app_base_url: "http://localhost:3000".to_string(),
            currency: currency.to_string(),
            webhook_tolerance_seconds: DEFAULT_TOLERANCE_SECONDS,
        }
    }

    #[test]
    fn test_currency_mapping() {
        assert_eq!(config("usd").currency().unwrap(), Currency::USD);
        assert_eq!(config("gbp").currency().unwrap(), Currency::GBP);
        assert!(matches!(
            config("doubloons").currency(),
            Err(BillingError::Config(_))
        ));
    }

    #[test]
    fn test_gateway_rejects_unsupported_currency() {
        assert!(StripeGateway::new(config("xyz")).is_err());
        assert!(StripeGateway::new(config("usd")).is_ok());
    }

    #[test]
    fn test_price_for_subscription_type() {
        assert_eq!(config("usd").price_id(SubscriptionType::LiveSupport), "price_live");
    }
}
