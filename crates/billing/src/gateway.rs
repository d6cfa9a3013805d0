//! Payment gateway boundary
//!
//! The billing services talk to the payment processor only through
//! [`PaymentGateway`]. The production adapter is [`crate::StripeGateway`];
//! tests substitute an in-memory fake.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::PaymentEvent;
use crate::ledger::SubscriptionType;

/// Metadata keys attached to every checkout session
pub mod metadata_keys {
    pub const PURPOSE: &str = "purpose";
    pub const INVOICE_ID: &str = "invoice_id";
    pub const CLIENT_ID: &str = "client_id";
    pub const TIER_ID: &str = "tier_id";
    pub const USER_ID: &str = "user_id";
    pub const SUBSCRIPTION_TYPE: &str = "subscription_type";
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a hosted checkout session and return its id and redirect URL.
    async fn create_checkout(&self, request: CheckoutRequest) -> BillingResult<CheckoutSession>;

    /// Check the signature header against the raw payload.
    fn verify_webhook(&self, payload: &str, signature: &str) -> BillingResult<()>;

    /// Decode a verified payload into a typed event.
    fn parse_event(&self, payload: &str) -> BillingResult<PaymentEvent>;

    async fn cancel_subscription(&self, external_subscription_id: &str) -> BillingResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutMode {
    /// One-off payment for the listed lines
    Payment(Vec<CheckoutLine>),
    /// Recurring plan; the gateway knows which price backs each type
    Subscription(SubscriptionType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLine {
    pub name: String,
    pub unit_amount_cents: i64,
    pub quantity: u64,
}

impl CheckoutLine {
    pub fn total_cents(&self) -> i64 {
        self.unit_amount_cents.saturating_mul(self.quantity as i64)
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub mode: CheckoutMode,
    pub purpose: CheckoutPurpose,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// What a checkout session pays for. Round-trips through session metadata so
/// webhook deliveries can be routed without a local lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutPurpose {
    Invoice {
        invoice_id: Uuid,
        client_id: Uuid,
    },
    Tier {
        tier_id: Uuid,
        user_id: Uuid,
    },
    Subscription {
        user_id: Uuid,
        subscription_type: SubscriptionType,
    },
}

impl CheckoutPurpose {
    pub fn to_metadata(&self) -> HashMap<String, String> {
        use metadata_keys::*;

        let mut metadata = HashMap::new();
        match self {
            CheckoutPurpose::Invoice {
                invoice_id,
                client_id,
            } => {
                metadata.insert(PURPOSE.to_string(), "invoice".to_string());
                metadata.insert(INVOICE_ID.to_string(), invoice_id.to_string());
                metadata.insert(CLIENT_ID.to_string(), client_id.to_string());
            }
            CheckoutPurpose::Tier { tier_id, user_id } => {
                metadata.insert(PURPOSE.to_string(), "tier".to_string());
                metadata.insert(TIER_ID.to_string(), tier_id.to_string());
                metadata.insert(USER_ID.to_string(), user_id.to_string());
            }
            CheckoutPurpose::Subscription {
                user_id,
                subscription_type,
            } => {
                metadata.insert(PURPOSE.to_string(), "subscription".to_string());
                metadata.insert(USER_ID.to_string(), user_id.to_string());
                metadata.insert(
                    SUBSCRIPTION_TYPE.to_string(),
                    subscription_type.as_str().to_string(),
                );
            }
        }
        metadata
    }

    /// Recover the purpose from session or payment-intent metadata.
    ///
    /// Sessions created before the `purpose` key existed carry only ids, so
    /// the key set is used as a fallback.
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Option<Self> {
        use metadata_keys::*;

        let uuid = |key: &str| metadata.get(key).and_then(|v| v.parse::<Uuid>().ok());

        let purpose = metadata.get(PURPOSE).map(String::as_str).or_else(|| {
            if metadata.contains_key(INVOICE_ID) {
                Some("invoice")
            } else if metadata.contains_key(TIER_ID) {
                Some("tier")
            } else if metadata.contains_key(SUBSCRIPTION_TYPE) {
                Some("subscription")
            } else {
                None
            }
        })?;

        match purpose {
            "invoice" => Some(CheckoutPurpose::Invoice {
                invoice_id: uuid(INVOICE_ID)?,
                client_id: uuid(CLIENT_ID)?,
            }),
            "tier" => Some(CheckoutPurpose::Tier {
                tier_id: uuid(TIER_ID)?,
                user_id: uuid(USER_ID)?,
            }),
            "subscription" => Some(CheckoutPurpose::Subscription {
                user_id: uuid(USER_ID)?,
                subscription_type: metadata
                    .get(SUBSCRIPTION_TYPE)
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(SubscriptionType::LiveSupport),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purpose_metadata_round_trip() {
        let purposes = [
            CheckoutPurpose::Invoice {
                invoice_id: Uuid::new_v4(),
                client_id: Uuid::new_v4(),
            },
            CheckoutPurpose::Tier {
                tier_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
            },
            CheckoutPurpose::Subscription {
                user_id: Uuid::new_v4(),
                subscription_type: SubscriptionType::LiveSupport,
            },
        ];
        for purpose in purposes {
            let metadata = purpose.to_metadata();
            assert_eq!(CheckoutPurpose::from_metadata(&metadata), Some(purpose));
        }
    }

    #[test]
    fn test_purpose_inferred_from_legacy_keys() {
        let tier_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let metadata = HashMap::from([
            ("tier_id".to_string(), tier_id.to_string()),
            ("user_id".to_string(), user_id.to_string()),
        ]);
        assert_eq!(
            CheckoutPurpose::from_metadata(&metadata),
            Some(CheckoutPurpose::Tier { tier_id, user_id })
        );
    }

    #[test]
    fn test_purpose_rejects_garbage() {
        let metadata = HashMap::from([
            ("purpose".to_string(), "invoice".to_string()),
            ("invoice_id".to_string(), "not-a-uuid".to_string()),
        ]);
        assert_eq!(CheckoutPurpose::from_metadata(&metadata), None);
        assert_eq!(CheckoutPurpose::from_metadata(&HashMap::new()), None);
    }
}
