//! API error type and its JSON rendering

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use kennel_billing::BillingError;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// One problem with a request field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        issues: Vec<FieldIssue>,
    },

    /// Expected business-rule outcome, shown to the user as-is
    #[error("{message}")]
    Rule { code: &'static str, message: String },

    #[error("{0}")]
    BadRequest(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Not allowed to access this resource")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn validation(field: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        ApiError::Validation {
            issues: vec![FieldIssue {
                field: field.map(String::from),
                message: message.clone(),
            }],
            message,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } | ApiError::Rule { .. } | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "validation_error",
            ApiError::Rule { code, .. } => code,
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let ApiError::Internal(detail) = &self {
            tracing::error!(error = %detail, "Request failed with internal error");
        }

        let mut body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        if let ApiError::Validation { issues, .. } = &self {
            body["issues"] = json!(issues);
        }

        (status, Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        let message = err.to_string();
        match err {
            BillingError::NotFound(what) => ApiError::NotFound(what),
            BillingError::Forbidden => ApiError::Forbidden,
            BillingError::InvalidInput(msg) => ApiError::validation(None, msg),
            BillingError::NoEligibleRecords => ApiError::Rule {
                code: "no_eligible_records",
                message,
            },
            BillingError::AlreadyPaid => ApiError::Rule {
                code: "already_paid",
                message,
            },
            BillingError::Cancelled => ApiError::Rule {
                code: "invoice_cancelled",
                message,
            },
            BillingError::NothingDue => ApiError::Rule {
                code: "nothing_due",
                message,
            },
            BillingError::InvalidState(_) => ApiError::Rule {
                code: "invalid_state",
                message,
            },
            BillingError::InvalidTransition { .. } => ApiError::Rule {
                code: "invalid_transition",
                message,
            },
            BillingError::SubscriptionAlreadyActive => ApiError::Rule {
                code: "subscription_already_active",
                message,
            },
            BillingError::WebhookSignatureInvalid | BillingError::WebhookPayload(_) => {
                ApiError::BadRequest(message)
            }
            BillingError::Gateway(_)
            | BillingError::Database(_)
            | BillingError::Config(_)
            | BillingError::Internal(_) => ApiError::Internal(message),
        }
    }
}

/// Split axum's `"...target type: <path>: <error>"` text into a field issue.
fn body_issue(text: &str) -> (Option<String>, String) {
    let detail = text
        .split_once("target type: ")
        .map(|(_, rest)| rest)
        .unwrap_or(text);

    if let Some((path, message)) = detail.split_once(": ") {
        if path != "." && !path.contains(' ') {
            return (Some(path.to_string()), message.to_string());
        }
    }

    // serde reports missing fields at the root: "missing field `clientId`"
    let missing = detail
        .split_once("missing field `")
        .and_then(|(_, rest)| rest.split_once('`'))
        .map(|(field, _)| field.to_string());
    let message = detail.strip_prefix(".: ").unwrap_or(detail).to_string();
    (missing, message)
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let text = rejection.body_text();
        match rejection {
            JsonRejection::JsonDataError(_) => {
                let (field, message) = body_issue(&text);
                ApiError::validation(field.as_deref(), message)
            }
            _ => ApiError::validation(None, text),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::validation(None, rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::validation(None, rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_rules_are_bad_requests() {
        let err = ApiError::from(BillingError::NoEligibleRecords);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "no_eligible_records");

        let err = ApiError::from(BillingError::SubscriptionAlreadyActive);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_infrastructure_errors_hide_detail() {
        let err = ApiError::from(BillingError::Database("connection reset".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Internal server error");
    }

    #[test]
    fn test_signature_failure_is_bad_request() {
        let err = ApiError::from(BillingError::WebhookSignatureInvalid);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_body_issue_extracts_field_path() {
        let (field, message) = body_issue(
            "Failed to deserialize the JSON body into the target type: clientId: invalid type: integer `5`, expected UUID at line 1 column 14",
        );
        assert_eq!(field.as_deref(), Some("clientId"));
        assert!(message.starts_with("invalid type"));

        let (field, _) = body_issue(
            "Failed to deserialize the JSON body into the target type: missing field `clientId` at line 1 column 2",
        );
        assert_eq!(field.as_deref(), Some("clientId"));
    }
}
