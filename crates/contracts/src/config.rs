//! Sender configuration contracts

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConnectionOptions, ContractError};

/// Default submission queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default bound on the shutdown wait, in milliseconds
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 3000;

/// Default collector span port
pub const DEFAULT_COLLECTOR_PORT: u16 = 9993;

/// Data sender configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Sender name (worker task and log key)
    pub name: String,

    /// Collector host
    pub host: String,

    /// Collector port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bounded submission queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum time `stop()` waits for the worker
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_COLLECTOR_PORT
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

impl SenderConfig {
    /// Create config with default queue capacity and shutdown timeout
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }

    /// Override the queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Override the shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Options passed to the connection provider
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            sender_name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }

    /// Validate the configuration
    ///
    /// Returns the first error encountered.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.name.trim().is_empty() {
            return Err(ContractError::config_validation(
                "name",
                "sender name must not be empty",
            ));
        }
        if self.host.trim().is_empty() {
            return Err(ContractError::config_validation(
                "host",
                "host must not be empty",
            ));
        }
        if self.port == 0 {
            return Err(ContractError::config_validation("port", "port must be > 0"));
        }
        if self.queue_capacity == 0 {
            return Err(ContractError::config_validation(
                "queue_capacity",
                "queue_capacity must be > 0",
            ));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(ContractError::config_validation(
                "shutdown_timeout_ms",
                "shutdown_timeout_ms must be > 0",
            ));
        }
        Ok(())
    }
}
