//! Session validator port - primary authentication port.
//!
//! Validates access tokens presented on the admission endpoint and returns
//! the authenticated user. The real-time layer never inspects tokens
//! itself.

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, AuthenticatedUser};

/// Validates access tokens.
///
/// # Contract
///
/// Implementations must:
/// - Return `AuthError::InvalidToken` for malformed tokens or bad signatures
/// - Return `AuthError::TokenExpired` for expired tokens
/// - Return `AuthError::ServiceUnavailable` for transient provider errors
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Validate a raw token (without "Bearer " prefix).
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}
