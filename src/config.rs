//! Server configuration module
//! Handles configuration parameters for the chat server

use crate::constants::{
    DEFAULT_BUCKET_LIMIT, DEFAULT_CHANNEL_INACTIVITY_SECS, DEFAULT_CHANNEL_SWEEP_SECS,
    DEFAULT_HOST, DEFAULT_MAX_AUTH_ATTEMPTS, DEFAULT_MAX_FRAME_BYTES, DEFAULT_PORT,
    DEFAULT_REFILL_INTERVAL_MS, DEFAULT_REFILL_RATE,
};
use crate::core::rate_limiter::BucketConfig;
use crate::error::{Result, RustyChatError};
use crate::protocol::WireEncoding;
use std::env;
use std::time::Duration;

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base64-wrap every frame on the wire
    pub encoding_enabled: bool,
    /// Per-connection token bucket
    pub bucket: BucketConfig,
    /// How often idle channels are swept
    pub channel_sweep_interval: Duration,
    /// Idle time after which a channel is removed
    pub channel_inactivity_threshold: Duration,
    /// Failed logins allowed before the connection is closed
    pub max_auth_attempts: u32,
    /// Longest accepted line, terminator excluded
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            encoding_enabled: false,
            bucket: BucketConfig::default(),
            channel_sweep_interval: Duration::from_secs(DEFAULT_CHANNEL_SWEEP_SECS),
            channel_inactivity_threshold: Duration::from_secs(DEFAULT_CHANNEL_INACTIVITY_SECS),
            max_auth_attempts: DEFAULT_MAX_AUTH_ATTEMPTS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(false)
}

impl ServerConfig {
    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let host = env::var("RUSTY_CHAT_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = env::var("RUSTY_CHAT_PORT")
            .or_else(|_| env::var("PORT"))
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let encoding_enabled = env_flag("RUSTY_CHAT_ENCODING");

        let bucket_limit = env::var("RUSTY_CHAT_BUCKET_LIMIT")
            .ok()
            .and_then(|b| b.parse().ok())
            .unwrap_or(DEFAULT_BUCKET_LIMIT);

        let refill_rate = env::var("RUSTY_CHAT_REFILL_RATE")
            .ok()
            .and_then(|r| r.parse().ok())
            .unwrap_or(DEFAULT_REFILL_RATE);

        let refill_interval_ms = env::var("RUSTY_CHAT_REFILL_INTERVAL_MS")
            .ok()
            .and_then(|r| r.parse().ok())
            .unwrap_or(DEFAULT_REFILL_INTERVAL_MS);

        let sweep_secs = env::var("RUSTY_CHAT_CHANNEL_SWEEP_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CHANNEL_SWEEP_SECS);

        let inactivity_secs = env::var("RUSTY_CHAT_CHANNEL_INACTIVITY_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CHANNEL_INACTIVITY_SECS);

        let max_auth_attempts = env::var("RUSTY_CHAT_MAX_AUTH_ATTEMPTS")
            .ok()
            .and_then(|a| a.parse().ok())
            .unwrap_or(DEFAULT_MAX_AUTH_ATTEMPTS);

        let max_frame_bytes = env::var("RUSTY_CHAT_MAX_FRAME_BYTES")
            .ok()
            .and_then(|f| f.parse().ok())
            .unwrap_or(DEFAULT_MAX_FRAME_BYTES);

        let config = Self {
            host,
            port,
            encoding_enabled,
            bucket: BucketConfig {
                refill_interval: Duration::from_millis(refill_interval_ms),
                refill_rate,
                bucket_limit,
            },
            channel_sweep_interval: Duration::from_secs(sweep_secs),
            channel_inactivity_threshold: Duration::from_secs(inactivity_secs),
            max_auth_attempts,
            max_frame_bytes,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bucket.bucket_limit == 0 {
            return Err(RustyChatError::ConfigError(
                "bucket limit must be greater than zero".to_string(),
            ));
        }
        if self.bucket.refill_interval.is_zero() {
            return Err(RustyChatError::ConfigError(
                "refill interval must be greater than zero".to_string(),
            ));
        }
        if self.channel_sweep_interval.is_zero() {
            return Err(RustyChatError::ConfigError(
                "channel sweep interval must be greater than zero".to_string(),
            ));
        }
        if self.max_auth_attempts == 0 {
            return Err(RustyChatError::ConfigError(
                "max auth attempts must be greater than zero".to_string(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(RustyChatError::ConfigError(
                "max frame size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn wire_encoding(&self) -> WireEncoding {
        if self.encoding_enabled {
            WireEncoding::Base64
        } else {
            WireEncoding::Plain
        }
    }

    /// `host:port` string for binding
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
