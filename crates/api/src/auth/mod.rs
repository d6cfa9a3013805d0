//! Authentication module for Kennel Desk

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtManager};
pub use middleware::{require_admin, require_auth, AuthError, AuthUser};
