//! Billing notifications
//!
//! Delivery goes through [`Notifier`]. Callers treat delivery as best effort:
//! a failed send is logged and never fails the billing operation that
//! triggered it.

use std::time::Duration;

use async_trait::async_trait;
use kennel_shared::format_cents;
use serde::Serialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::error::{BillingError, BillingResult};
use crate::invoice::Invoice;
use crate::records::Client;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: EmailMessage) -> BillingResult<()>;
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// When unset, messages are logged instead of sent
    pub resend_api_key: Option<String>,
    pub from: String,
}

impl EmailConfig {
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY")
                .ok()
                .filter(|key| !key.is_empty()),
            from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Kennel Desk <billing@localhost>".to_string()),
        }
    }

    /// Resend-backed notifier when a key is configured, log-only otherwise.
    pub fn into_notifier(self) -> std::sync::Arc<dyn Notifier> {
        match self.resend_api_key {
            Some(api_key) => std::sync::Arc::new(ResendNotifier::new(api_key, self.from)),
            None => {
                tracing::warn!("Billing email not configured (missing RESEND_API_KEY)");
                std::sync::Arc::new(LogNotifier)
            }
        }
    }
}

#[derive(Serialize)]
struct ResendPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Sends through the Resend HTTP API with a short exponential retry.
#[derive(Clone)]
pub struct ResendNotifier {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl ResendNotifier {
    pub fn new(api_key: String, from: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            endpoint: RESEND_API_URL.to_string(),
            api_key,
            from,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn post(&self, message: &EmailMessage) -> Result<(), reqwest::Error> {
        self.http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&ResendPayload {
                from: &self.from,
                to: [&message.to],
                subject: &message.subject,
                html: &message.html,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send(&self, message: EmailMessage) -> BillingResult<()> {
        let strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);

        Retry::start(strategy, || self.post(&message))
            .await
            .map_err(|e| BillingError::Internal(format!("Email delivery failed: {}", e)))?;

        tracing::info!(to = %message.to, subject = %message.subject, "Billing email sent");
        Ok(())
    }
}

/// Development fallback
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: EmailMessage) -> BillingResult<()> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            "Email delivery disabled, message not sent"
        );
        Ok(())
    }
}

/// Send and swallow the error after logging it.
pub async fn notify(notifier: &dyn Notifier, message: EmailMessage) {
    let to = message.to.clone();
    if let Err(e) = notifier.send(message).await {
        tracing::error!(to = %to, error = %e, "Failed to send billing email");
    }
}

pub fn invoice_sent(invoice: &Invoice, client: &Client) -> EmailMessage {
    EmailMessage {
        to: client.email.clone(),
        subject: format!("Invoice {} from Kennel Desk", invoice.invoice_number),
        html: format!(
            "<p>Hi {},</p>\
             <p>Your invoice <strong>{}</strong> for ${} is ready. \
             Payment is due by {}.</p>",
            client.name,
            invoice.invoice_number,
            format_cents(invoice.amount_due_cents()),
            invoice.due_date
        ),
    }
}

pub fn payment_receipt(invoice: &Invoice, client: &Client, amount_cents: i64) -> EmailMessage {
    let balance = if invoice.amount_due_cents() > 0 {
        format!(
            " A balance of ${} remains.",
            format_cents(invoice.amount_due_cents())
        )
    } else {
        " The invoice is now paid in full.".to_string()
    };
    EmailMessage {
        to: client.email.clone(),
        subject: format!("Payment received for {}", invoice.invoice_number),
        html: format!(
            "<p>Hi {},</p><p>We received your payment of ${} for invoice {}.{}</p>",
            client.name,
            format_cents(amount_cents),
            invoice.invoice_number,
            balance
        ),
    }
}

pub fn subscription_past_due(client: &Client) -> EmailMessage {
    EmailMessage {
        to: client.email.clone(),
        subject: "Your live support subscription payment failed".to_string(),
        html: format!(
            "<p>Hi {},</p>\
             <p>We couldn't collect the latest payment for your live support \
             subscription. Please update your payment details to keep access.</p>",
            client.name
        ),
    }
}
