//! Authentication configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;
use super::server::Environment;

/// Minimum HS256 secret length accepted in production
const MIN_PRODUCTION_SECRET_BYTES: usize = 32;

/// Access token validation (HS256 JWT)
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared signing secret
    pub jwt_secret: SecretString,

    /// Expected `iss` claim, unchecked when absent
    #[serde(default)]
    pub issuer: Option<String>,

    /// Expected `aud` claim, unchecked when absent
    #[serde(default)]
    pub audience: Option<String>,
}

impl AuthConfig {
    /// Validate authentication configuration
    ///
    /// Production additionally requires a secret of at least 32 bytes.
    pub fn validate(&self, environment: &Environment) -> Result<(), ValidationError> {
        let secret = self.jwt_secret.expose_secret();
        if secret.is_empty() {
            return Err(ValidationError::MissingRequired("AUTH__JWT_SECRET"));
        }
        if *environment == Environment::Production && secret.len() < MIN_PRODUCTION_SECRET_BYTES {
            return Err(ValidationError::SecretTooShort);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_secret(secret: &str) -> AuthConfig {
        AuthConfig {
            jwt_secret: SecretString::new(secret.to_string()),
            issuer: None,
            audience: None,
        }
    }

    #[test]
    fn test_validation_missing_secret() {
        assert_eq!(
            with_secret("").validate(&Environment::Development),
            Err(ValidationError::MissingRequired("AUTH__JWT_SECRET"))
        );
    }

    #[test]
    fn test_validation_production_requires_long_secret() {
        let config = with_secret("dev-secret");
        // Allowed in development
        assert!(config.validate(&Environment::Development).is_ok());
        // Rejected in production
        assert_eq!(
            config.validate(&Environment::Production),
            Err(ValidationError::SecretTooShort)
        );
    }

    #[test]
    fn test_validation_valid_production_config() {
        let config = AuthConfig {
            issuer: Some("interview-platform".to_string()),
            ..with_secret("0123456789abcdef0123456789abcdef")
        };
        assert!(config.validate(&Environment::Production).is_ok());
    }
}
