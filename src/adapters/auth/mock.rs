//! Mock session validator for tests and local runs.
//!
//! # Example
//!
//! ```ignore
//! let user_id = UserId::new();
//! let validator = MockSessionValidator::new().with_test_user("valid-token", user_id);
//!
//! let user = validator.validate("valid-token").await?;
//! assert_eq!(user.id, user_id);
//! ```

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, AuthenticatedUser, UserId};
use crate::ports::SessionValidator;

/// Stores a map of tokens to users. Tokens not in the map return
/// `InvalidToken`.
#[derive(Debug, Default)]
pub struct MockSessionValidator {
    tokens: RwLock<HashMap<String, AuthenticatedUser>>,
    /// Returned for every validation when set
    force_error: RwLock<Option<AuthError>>,
}

impl MockSessionValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a valid token that maps to a user.
    pub fn with_user(self, token: impl Into<String>, user: AuthenticatedUser) -> Self {
        self.add_token(token, user);
        self
    }

    /// Adds a valid token for a user with a generated display name.
    pub fn with_test_user(self, token: impl Into<String>, user_id: UserId) -> Self {
        let user = AuthenticatedUser::new(user_id, Some(format!("Test User {}", user_id)));
        self.with_user(token, user)
    }

    /// Forces all validations to return the specified error.
    pub fn with_error(self, error: AuthError) -> Self {
        *self
            .force_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
        self
    }

    /// Registers a new valid token at runtime.
    pub fn add_token(&self, token: impl Into<String>, user: AuthenticatedUser) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.into(), user);
    }

    /// Removes a token, making it invalid.
    pub fn remove_token(&self, token: &str) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
    }
}

#[async_trait]
impl SessionValidator for MockSessionValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        if let Some(error) = self
            .force_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(error);
        }

        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_user_for_registered_token() {
        let user_id = UserId::new();
        let validator = MockSessionValidator::new().with_test_user("valid-token", user_id);

        let user = validator.validate("valid-token").await.unwrap();
        assert_eq!(user.id, user_id);
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let validator = MockSessionValidator::new();
        assert_eq!(
            validator.validate("unknown-token").await,
            Err(AuthError::InvalidToken)
        );
    }

    #[tokio::test]
    async fn forced_error_wins() {
        let validator = MockSessionValidator::new()
            .with_test_user("valid-token", UserId::new())
            .with_error(AuthError::ServiceUnavailable("down".to_string()));

        assert!(matches!(
            validator.validate("valid-token").await,
            Err(AuthError::ServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn removed_token_stops_validating() {
        let validator = MockSessionValidator::new().with_test_user("t", UserId::new());
        validator.remove_token("t");
        assert!(validator.validate("t").await.is_err());
    }
}
