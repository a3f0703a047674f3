//! Router configuration with validation.
//!
//! The router keeps no on-disk state; the only external knobs are `PORT`
//! and `HOST` from the environment. Timeouts are constructor-visible so
//! boundary tests can shrink them.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3000;

/// Main router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 3000)
    pub port: u16,
    /// Timeout configuration
    pub timeouts: TimeoutConfig,
    /// Outbound sink channel capacity per connection
    pub sink_buffer: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: DEFAULT_PORT,
            timeouts: TimeoutConfig::default(),
            sink_buffer: 256,
        }
    }
}

impl RouterConfig {
    /// Read `PORT` and `HOST` from the environment, defaulting the rest.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("PORT") {
            config.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.clone()))?;
        }
        if let Ok(host) = std::env::var("HOST") {
            config.host = host
                .parse()
                .map_err(|_| ConfigError::InvalidHost(host.clone()))?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeouts.relay.is_zero() {
            return Err(ConfigError::InvalidTimeout("relay timeout cannot be 0".into()));
        }
        if self.timeouts.challenge_ttl.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "challenge TTL cannot be 0".into(),
            ));
        }
        if self.timeouts.session_ttl.is_zero() {
            return Err(ConfigError::InvalidTimeout("session TTL cannot be 0".into()));
        }
        if self.timeouts.cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "cleanup interval cannot be 0".into(),
            ));
        }
        if self.sink_buffer == 0 {
            return Err(ConfigError::InvalidLimit("sink_buffer cannot be 0".into()));
        }
        Ok(())
    }

    /// Listener bind address.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Timeout configuration. All pending requests share the same relay
/// deadline so correlation behavior stays testable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-pending-request deadline
    #[serde(with = "duration_secs")]
    pub relay: Duration,
    /// Challenge lifetime
    #[serde(with = "duration_secs")]
    pub challenge_ttl: Duration,
    /// Session lifetime from issuance
    #[serde(with = "duration_secs")]
    pub session_ttl: Duration,
    /// Idle session reaping threshold
    #[serde(with = "duration_secs")]
    pub session_idle: Duration,
    /// Bound on a single socket write
    #[serde(with = "duration_secs")]
    pub write: Duration,
    /// Cadence of the periodic cleanup task
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            relay: Duration::from_secs(30),
            challenge_ttl: Duration::from_secs(5 * 60),
            session_ttl: Duration::from_secs(60 * 60),
            session_idle: Duration::from_secs(30 * 60),
            write: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// PORT did not parse as u16
    #[error("invalid PORT value: {0}")]
    InvalidPort(String),
    /// HOST did not parse as an IP address
    #[error("invalid HOST value: {0}")]
    InvalidHost(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
