//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use kennel_billing::{Caller, Role};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use super::jwt::JwtManager;

/// Cookie set by the web app after login
const AUTH_COOKIE: &str = "kennel_auth_token";

/// Authenticated user extracted from the access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthUser {
    /// Identity handed to the billing services
    pub fn caller(&self) -> Caller {
        Caller {
            user_id: self.user_id,
            role: self.role,
        }
    }
}

fn extract_token_from_cookie(request: &Request) -> Option<String> {
    request
        .headers()
        .get(COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .map(str::trim)
                .find_map(|cookie| cookie.strip_prefix(AUTH_COOKIE)?.strip_prefix('='))
                .map(String::from)
        })
}

/// Bearer token from the Authorization header, falling back to the cookie
fn extract_bearer_token(request: &Request) -> Option<String> {
    if let Some(header) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }

    extract_token_from_cookie(request)
}

fn authenticate(jwt_manager: &JwtManager, request: &Request) -> Result<AuthUser, AuthError> {
    let token = extract_bearer_token(request).ok_or(AuthError::MissingAuth)?;
    let claims = jwt_manager.validate_access_token(&token).map_err(|e| {
        tracing::debug!(error = %e, "Access token rejected");
        AuthError::InvalidToken
    })?;

    Ok(AuthUser {
        user_id: claims.sub,
        role: claims.role,
    })
}

/// Middleware that requires authentication
pub async fn require_auth(
    State(jwt_manager): State<JwtManager>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    match authenticate(&jwt_manager, &request) {
        Ok(auth_user) => {
            tracing::debug!(
                path = %path,
                user_id = %auth_user.user_id,
                role = ?auth_user.role,
                "require_auth: authentication successful"
            );
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %path, error = ?err, "require_auth: authentication failed");
            err.into_response()
        }
    }
}

/// Middleware that requires an authenticated admin
pub async fn require_admin(
    State(jwt_manager): State<JwtManager>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&jwt_manager, &request) {
        Ok(auth_user) if auth_user.role == Role::Admin => {
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Ok(auth_user) => {
            tracing::warn!(user_id = %auth_user.user_id, "require_admin: caller is not an admin");
            AuthError::InsufficientPermissions.into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Insufficient permissions")]
    InsufficientPermissions,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            AuthError::MissingAuth | AuthError::InvalidToken => {
                (StatusCode::UNAUTHORIZED, "unauthorized")
            }
            AuthError::InsufficientPermissions => (StatusCode::FORBIDDEN, "forbidden"),
        };

        let body = Json(json!({
            "error": code,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(header: (&str, &str)) -> Request {
        Request::builder()
            .uri("/invoices")
            .header(header.0, header.1)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_bearer_header_preferred() {
        let request = request_with(("authorization", "Bearer abc.def.ghi"));
        assert_eq!(extract_bearer_token(&request).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_cookie_fallback() {
        let request = request_with(("cookie", "theme=dark; kennel_auth_token=tok123"));
        assert_eq!(extract_bearer_token(&request).as_deref(), Some("tok123"));

        let request = request_with(("cookie", "kennel_auth_token_old=nope"));
        assert_eq!(extract_bearer_token(&request), None);
    }

    #[test]
    fn test_auth_user_caller() {
        let user_id = Uuid::new_v4();
        let user = AuthUser {
            user_id,
            role: Role::Admin,
        };
        assert!(user.caller().is_admin());
        assert_eq!(user.caller().user_id, user_id);
    }
}
