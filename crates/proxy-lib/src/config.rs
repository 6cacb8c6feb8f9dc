// ============================
// proxy-lib/src/config.rs
// ============================
//! Configuration management for the draft proxy.
//!
//! Settings are loaded from process environment variables with built-in
//! defaults, so a bare `PORT=3001` deployment works without a config file.
//! Invalid values (out-of-range port, negative timeouts) are startup
//! failures.

use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Deployment environment, equivalent to a `NODE_ENV` switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Development,
    Production,
    Test,
}

/// Server configuration, sourced from the environment.
///
/// Timeout fields are kept signed so that a negative value survives
/// deserialization and is rejected with a readable message by
/// [`Settings::validate`] instead of an opaque parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Listen port for the downstream WebSocket and status endpoints.
    pub port: i64,
    /// Upper bound on room draining during graceful shutdown, in ms.
    pub shutdown_timeout_ms: i64,
    /// Carried for operators; no automatic reconnection policy consults it.
    pub max_reconnect_attempts: i64,
    /// Upstream heartbeat period, in ms.
    pub heartbeat_interval: i64,
    /// Upstream dial (handshake) timeout, in ms.
    pub connection_timeout: i64,
    /// Default tracing filter directive.
    pub log_level: String,
    /// Deployment environment.
    pub app_env: AppEnv,
}

impl Settings {
    /// Load configuration from the environment with defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("port", 3001_i64)?
            .set_default("shutdown_timeout_ms", 30_000_i64)?
            .set_default("max_reconnect_attempts", 5_i64)?
            .set_default("heartbeat_interval", 30_000_i64)?
            .set_default("connection_timeout", 10_000_i64)?
            .set_default("log_level", "info")?
            .set_default("app_env", "development")?
            .add_source(Environment::default())
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would misconfigure the server at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port < 1 || self.port > 65_535 {
            return Err(ConfigError::Message(format!(
                "PORT must be between 1 and 65535, got {}",
                self.port
            )));
        }
        if self.shutdown_timeout_ms < 0 {
            return Err(ConfigError::Message(format!(
                "SHUTDOWN_TIMEOUT_MS must not be negative, got {}",
                self.shutdown_timeout_ms
            )));
        }
        if self.max_reconnect_attempts < 0 {
            return Err(ConfigError::Message(format!(
                "MAX_RECONNECT_ATTEMPTS must not be negative, got {}",
                self.max_reconnect_attempts
            )));
        }
        if self.heartbeat_interval <= 0 {
            return Err(ConfigError::Message(format!(
                "HEARTBEAT_INTERVAL must be positive, got {}",
                self.heartbeat_interval
            )));
        }
        if self.connection_timeout <= 0 {
            return Err(ConfigError::Message(format!(
                "CONNECTION_TIMEOUT must be positive, got {}",
                self.connection_timeout
            )));
        }
        Ok(())
    }

    pub fn listen_port(&self) -> u16 {
        // validate() bounds the field, so the cast is lossless
        self.port as u16
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms as u64)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval as u64)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout as u64)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 3001,
            shutdown_timeout_ms: 30_000,
            max_reconnect_attempts: 5,
            heartbeat_interval: 30_000,
            connection_timeout: 10_000,
            log_level: "info".to_string(),
            app_env: AppEnv::Development,
        }
    }
}
