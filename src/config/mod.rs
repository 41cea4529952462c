//! Application configuration module
//!
//! Type-safe configuration loaded from environment variables with the
//! `config` and `dotenvy` crates. Variables carry the `INTERVIEW_ROOMS`
//! prefix and nested values are separated by a double underscore.
//!
//! # Example
//!
//! ```no_run
//! use interview_rooms_realtime::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Server running on {}", config.server.socket_addr().unwrap());
//! ```

mod archiver;
mod auth;
mod database;
mod error;
mod realtime;
mod redis;
mod server;

pub use archiver::ArchiverConfig;
pub use auth::AuthConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use realtime::{BusBackend, HotStoreBackend, RealtimeConfig};
pub use redis::RedisConfig;
pub use server::{Environment, LogFormat, ServerConfig};

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
/// Only the auth section is required; everything else has defaults that
/// run a single process with in-memory backends.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (bind address, logging, CORS)
    #[serde(default)]
    pub server: ServerConfig,

    /// Connection tunables and backend selection
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Redis configuration (hot store and pub/sub bus)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Archive database (PostgreSQL)
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub archiver: ArchiverConfig,

    /// Access token validation
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `INTERVIEW_ROOMS` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `INTERVIEW_ROOMS__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `INTERVIEW_ROOMS__REALTIME__BUS=redis` -> `realtime.bus = redis`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or values
    /// cannot be parsed into the expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("INTERVIEW_ROOMS")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// Redis settings are checked only when a Redis backend is selected.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.realtime.validate()?;
        if self.realtime.needs_redis() {
            self.redis.validate()?;
        }
        self.database.validate()?;
        self.archiver.validate()?;
        self.auth.validate(&self.server.environment)?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
