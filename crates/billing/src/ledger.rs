//! Content purchase and subscription ledger
//!
//! Tier purchases are one-off and unique per (user, tier). Subscriptions are
//! driven by gateway webhooks plus an explicit cancel; when a user has more
//! than one row the most recently created one is authoritative.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::access::Caller;
use crate::error::{BillingError, BillingResult};
use crate::gateway::PaymentGateway;
use crate::store::BillingStore;

/// Length of a subscription period granted on activation or renewal when the
/// gateway does not tell us the real period
pub const SUBSCRIPTION_PERIOD_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    pub id: Uuid,
    pub name: String,
    pub price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierPurchase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier_id: Uuid,
    pub amount_cents: i64,
    pub external_transaction_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    /// Gateway status strings: `active` stays active, anything else is
    /// treated as cancelled.
    pub fn from_gateway(status: &str) -> Self {
        if status == "active" {
            SubscriptionStatus::Active
        } else {
            SubscriptionStatus::Cancelled
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(BillingError::Internal(format!(
                "Unknown subscription status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionType {
    LiveSupport,
}

impl SubscriptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionType::LiveSupport => "live_support",
        }
    }
}

impl FromStr for SubscriptionType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live_support" => Ok(SubscriptionType::LiveSupport),
            other => Err(BillingError::InvalidInput(format!(
                "Unknown subscription type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_type: SubscriptionType,
    pub status: SubscriptionStatus,
    pub external_subscription_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    /// Active and the paid-for period has not run out.
    pub fn grants_access(&self, now: OffsetDateTime) -> bool {
        self.status == SubscriptionStatus::Active
            && self.current_period_end.is_some_and(|end| end > now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl BillingPeriod {
    /// A fresh default-length period starting at `start`.
    pub fn starting(start: OffsetDateTime) -> Self {
        Self {
            start,
            end: start + Duration::days(SUBSCRIPTION_PERIOD_DAYS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionActivation {
    pub user_id: Uuid,
    pub subscription_type: SubscriptionType,
    pub external_subscription_id: String,
    pub period: BillingPeriod,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub has_subscription: bool,
    pub subscription: Option<Subscription>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierAccess {
    pub tier_id: Uuid,
    pub has_access: bool,
}

#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn BillingStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    pub async fn has_tier_access(&self, user_id: Uuid, tier_id: Uuid) -> BillingResult<bool> {
        Ok(self.store.find_tier_purchase(user_id, tier_id).await?.is_some())
    }

    pub async fn tier_access(&self, caller: &Caller, tier_id: Uuid) -> BillingResult<TierAccess> {
        self.store
            .find_tier(tier_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Tier".to_string()))?;
        Ok(TierAccess {
            tier_id,
            has_access: self.has_tier_access(caller.user_id, tier_id).await?,
        })
    }

    pub async fn has_active_subscription(&self, user_id: Uuid) -> BillingResult<bool> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .store
            .latest_subscription(user_id)
            .await?
            .is_some_and(|sub| sub.grants_access(now)))
    }

    pub async fn subscription_status(&self, user_id: Uuid) -> BillingResult<SubscriptionView> {
        let subscription = self.store.latest_subscription(user_id).await?;
        let now = OffsetDateTime::now_utc();
        Ok(SubscriptionView {
            has_subscription: subscription.as_ref().is_some_and(|s| s.grants_access(now)),
            subscription,
        })
    }

    /// Cancel the caller's current subscription at the gateway and locally.
    pub async fn cancel_subscription(&self, caller: &Caller) -> BillingResult<Subscription> {
        let subscription = self
            .store
            .latest_subscription(caller.user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Subscription".to_string()))?;

        if subscription.status == SubscriptionStatus::Cancelled {
            return Err(BillingError::InvalidState(
                "Subscription is already cancelled".to_string(),
            ));
        }
        let external_id = subscription.external_subscription_id.clone().ok_or_else(|| {
            BillingError::InvalidState("Subscription is not linked to the payment provider".to_string())
        })?;

        self.gateway.cancel_subscription(&external_id).await?;

        let cancelled_at = OffsetDateTime::now_utc();
        self.store
            .cancel_subscriptions(&external_id, cancelled_at)
            .await?;

        tracing::info!(
            user_id = %caller.user_id,
            subscription_id = %external_id,
            "Subscription cancelled by user"
        );

        Ok(Subscription {
            status: SubscriptionStatus::Cancelled,
            cancelled_at: Some(cancelled_at),
            updated_at: cancelled_at,
            ..subscription
        })
    }
}
