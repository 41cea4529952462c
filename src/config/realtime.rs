//! Real-time layer configuration: connection tunables and backend choice

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::adapters::websocket::SessionConfig;

/// Hot event store backend
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HotStoreBackend {
    #[default]
    Memory,
    Redis,
    None,
}

/// Event bus backend
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// Single process, nothing crosses process boundaries
    #[default]
    None,
    Memory,
    Redis,
}

/// Real-time configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Outbound frames buffered per connection
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Upper bound for one connection listener callback, in milliseconds
    #[serde(default = "default_listener_timeout")]
    pub listener_timeout_ms: u64,

    /// Upper bound for the close handshake, in milliseconds
    #[serde(default = "default_close_timeout")]
    pub close_timeout_ms: u64,

    #[serde(default)]
    pub hot_store: HotStoreBackend,

    #[serde(default)]
    pub bus: BusBackend,

    /// Treat rooms missing from the directory as open rooms
    #[serde(default = "default_open_unknown_rooms")]
    pub open_unknown_rooms: bool,
}

impl RealtimeConfig {
    pub fn listener_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Settings consumed by the connection handler
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            listener_timeout: self.listener_timeout(),
            close_timeout: self.close_timeout(),
            outbound_capacity: self.outbound_capacity,
        }
    }

    /// Whether any selected backend talks to Redis
    pub fn needs_redis(&self) -> bool {
        self.hot_store == HotStoreBackend::Redis || self.bus == BusBackend::Redis
    }

    /// Validate real-time configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.outbound_capacity == 0 || self.outbound_capacity > 65_536 {
            return Err(ValidationError::InvalidCapacity);
        }
        if self.listener_timeout_ms == 0 {
            return Err(ValidationError::InvalidDuration("realtime.listener_timeout_ms"));
        }
        if self.close_timeout_ms == 0 {
            return Err(ValidationError::InvalidDuration("realtime.close_timeout_ms"));
        }
        Ok(())
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: default_outbound_capacity(),
            listener_timeout_ms: default_listener_timeout(),
            close_timeout_ms: default_close_timeout(),
            hot_store: HotStoreBackend::default(),
            bus: BusBackend::default(),
            open_unknown_rooms: default_open_unknown_rooms(),
        }
    }
}

fn default_outbound_capacity() -> usize {
    256
}

fn default_listener_timeout() -> u64 {
    5000
}

fn default_close_timeout() -> u64 {
    2000
}

fn default_open_unknown_rooms() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_config_defaults() {
        let config = RealtimeConfig::default();
        assert_eq!(config.outbound_capacity, 256);
        assert_eq!(config.listener_timeout(), Duration::from_secs(5));
        assert_eq!(config.hot_store, HotStoreBackend::Memory);
        assert_eq!(config.bus, BusBackend::None);
        assert!(!config.needs_redis());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_any_redis_backend_needs_redis() {
        let config = RealtimeConfig {
            bus: BusBackend::Redis,
            ..Default::default()
        };
        assert!(config.needs_redis());
    }

    #[test]
    fn test_validation_zero_capacity() {
        let config = RealtimeConfig {
            outbound_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidCapacity));
    }

    #[test]
    fn test_validation_zero_timeout() {
        let config = RealtimeConfig {
            close_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
