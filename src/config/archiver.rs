//! Archiver configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::application::ArchiverConfig as ArchiverSettings;

/// Background archiver configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiverConfig {
    /// Whether this process runs the archiver at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between cycles
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Minimum event age, in seconds, before it leaves the hot store
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// Events per archive write
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_max_events_per_cycle")]
    pub max_events_per_cycle: usize,
}

impl ArchiverConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Settings consumed by the archiver service
    pub fn settings(&self) -> ArchiverSettings {
        ArchiverSettings {
            interval: self.interval(),
            retention: self.retention(),
            chunk_size: self.chunk_size,
            max_events_per_cycle: self.max_events_per_cycle,
        }
    }

    /// Validate archiver configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_secs == 0 {
            return Err(ValidationError::InvalidDuration("archiver.interval_secs"));
        }
        if self.chunk_size == 0 || self.chunk_size > self.max_events_per_cycle {
            return Err(ValidationError::InvalidChunkSize);
        }
        Ok(())
    }
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval(),
            retention_secs: default_retention(),
            chunk_size: default_chunk_size(),
            max_events_per_cycle: default_max_events_per_cycle(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    120
}

fn default_retention() -> u64 {
    30 * 60
}

fn default_chunk_size() -> usize {
    200
}

fn default_max_events_per_cycle() -> usize {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_service_defaults() {
        let settings = ArchiverConfig::default().settings();
        let service = ArchiverSettings::default();
        assert_eq!(settings.interval, service.interval);
        assert_eq!(settings.retention, service.retention);
        assert_eq!(settings.chunk_size, service.chunk_size);
        assert_eq!(settings.max_events_per_cycle, service.max_events_per_cycle);
    }

    #[test]
    fn test_zero_retention_is_allowed() {
        let config = ArchiverConfig {
            retention_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_interval() {
        let config = ArchiverConfig {
            interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_chunk_larger_than_cycle() {
        let config = ArchiverConfig {
            chunk_size: 500,
            max_events_per_cycle: 100,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidChunkSize));
    }
}
