//! Billing error types

use thiserror::Error;

use crate::invoice::InvoiceStatus;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Not allowed to access this resource")]
    Forbidden,

    #[error("No uninvoiced service records found for this client and period")]
    NoEligibleRecords,

    #[error("Invoice is already paid")]
    AlreadyPaid,

    #[error("Invoice has been cancelled")]
    Cancelled,

    #[error("Nothing is due on this invoice")]
    NothingDue,

    #[error("{0}")]
    InvalidState(String),

    #[error("Cannot change invoice status from {from} to {to}")]
    InvalidTransition {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    #[error("An active subscription already exists")]
    SubscriptionAlreadyActive,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Malformed webhook payload: {0}")]
    WebhookPayload(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::Gateway(err.to_string())
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::WebhookPayload(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_message() {
        let err = BillingError::InvalidTransition {
            from: InvoiceStatus::Cancelled,
            to: InvoiceStatus::Paid,
        };
        assert_eq!(
            err.to_string(),
            "Cannot change invoice status from CANCELLED to PAID"
        );
    }
}
