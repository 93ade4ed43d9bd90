//! Group consumer configuration
//!
//! Configuration is read from a TOML document (or built in code) and
//! validated before the heartbeat engine starts.
//!
//! ## Example Configuration
//!
//! ```toml
//! group_id = "orders-processor"
//! subscription = ["orders", "refunds"]
//! heartbeat_interval_ms = 3000
//! session_timeout_ms = 45000
//! close_timeout_ms = 5000
//! fencing_interval_policy = "reset_to_default"
//! ```

pub mod defaults;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use defaults::*;

/// Heartbeat interval to use after the member has been fenced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FencingIntervalPolicy {
    /// Keep the interval last advertised by the coordinator
    #[default]
    Retain,
    /// Go back to the configured `heartbeat_interval_ms`
    ResetToDefault,
}

/// Configuration for a consumer taking part in a KIP-848 group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConsumerConfig {
    /// Consumer group ID
    pub group_id: String,

    /// Instance ID for static membership
    pub group_instance_id: Option<String>,

    /// Rack ID for rack-aware assignment
    pub rack_id: Option<String>,

    /// Topics subscribed at startup
    pub subscription: Vec<String>,

    /// Server-side assignor requested by this member
    pub server_assignor: Option<String>,

    /// Heartbeat interval used until the coordinator advertises one
    pub heartbeat_interval_ms: u64,

    /// Session timeout enforced by the coordinator
    pub session_timeout_ms: u64,

    /// Rebalance timeout hint sent with join heartbeats
    pub rebalance_timeout_ms: u64,

    /// Upper bound for one heartbeat round trip
    pub request_timeout_ms: u64,

    /// Upper bound for the leave heartbeat sent on close
    pub close_timeout_ms: u64,

    /// Interval handling after fencing
    pub fencing_interval_policy: FencingIntervalPolicy,
}

impl Default for GroupConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: String::new(),
            group_instance_id: None,
            rack_id: None,
            subscription: Vec::new(),
            server_assignor: None,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            rebalance_timeout_ms: DEFAULT_REBALANCE_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
            fencing_interval_policy: FencingIntervalPolicy::default(),
        }
    }
}

impl GroupConsumerConfig {
    /// Create a configuration for the given group with default timings
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..Default::default()
        }
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents)
            .map_err(|e| ConfigError::Message(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Message(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn with_subscription<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscription = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_group_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.group_instance_id = Some(instance_id.into());
        self
    }

    pub fn with_server_assignor(mut self, assignor: impl Into<String>) -> Self {
        self.server_assignor = Some(assignor.into());
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_fencing_interval_policy(mut self, policy: FencingIntervalPolicy) -> Self {
        self.fencing_interval_policy = policy;
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Rebalance timeout as carried on the wire
    pub fn rebalance_timeout_hint(&self) -> i32 {
        i32::try_from(self.rebalance_timeout_ms).unwrap_or(i32::MAX)
    }

    /// Validate the configuration before the engine starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_id.trim().is_empty() {
            return Err(ConfigError::missing("group_id"));
        }

        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::invalid_setting(
                "heartbeat_interval_ms",
                "must be greater than 0",
            ));
        }

        if self.session_timeout_ms <= self.heartbeat_interval_ms {
            return Err(ConfigError::invalid_setting(
                "session_timeout_ms",
                format!(
                    "must be greater than heartbeat_interval_ms ({})",
                    self.heartbeat_interval_ms
                ),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::invalid_setting(
                "request_timeout_ms",
                "must be greater than 0",
            ));
        }

        if self.close_timeout_ms == 0 {
            return Err(ConfigError::invalid_setting(
                "close_timeout_ms",
                "must be greater than 0",
            ));
        }

        if self.rebalance_timeout_ms > i32::MAX as u64 {
            return Err(ConfigError::invalid_setting(
                "rebalance_timeout_ms",
                format!("must not exceed {}", i32::MAX),
            ));
        }

        if let Some(topic) = self.subscription.iter().find(|t| t.trim().is_empty()) {
            return Err(ConfigError::invalid_setting(
                "subscription",
                format!("invalid topic name {:?}", topic),
            ));
        }

        if matches!(self.group_instance_id.as_deref(), Some(id) if id.trim().is_empty()) {
            return Err(ConfigError::invalid_setting(
                "group_instance_id",
                "must not be blank when set",
            ));
        }

        Ok(())
    }
}
