//! Client configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (`DASHPULSE_*`, nested keys separated by `__`,
//!   e.g. `DASHPULSE_CONNECTION__TIMEOUT_MS=5000`)

use anyhow::{Context, Result};
use dashpulse_core::{
    FilterSet, ResolverConfig, SubscriptionSpec, DEFAULT_BUFFER_CAPACITY,
    DEFAULT_LENGTH_CHANGE_THRESHOLD, DEFAULT_NOTIFICATION_CAPACITY,
};
use dashpulse_protocol::DashboardType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::ConnectionOptions;

/// Default config file locations, first match wins.
const CONFIG_PATHS: [&str; 3] = [
    "dashpulse.toml",
    "/etc/dashpulse/dashpulse.toml",
    "~/.config/dashpulse/dashpulse.toml",
];

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Connection and reconnect policy.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Data buffer configuration.
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Notification log configuration.
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Conflict resolver tuning.
    #[serde(default)]
    pub resolver: ResolverSettings,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Subscriptions opened by the binary on start.
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server endpoint.
    #[serde(default = "default_url")]
    pub url: String,

    /// Reconnect automatically after an unexpected loss.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Maximum automatic reconnect attempts.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Base reconnect delay in milliseconds, doubled per attempt.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Connection establishment timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Data buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Entries kept per (dashboard type, filter-set).
    #[serde(default = "default_buffer_capacity")]
    pub capacity: usize,

    /// Buffered-count refresh interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// Notification log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Notifications retained.
    #[serde(default = "default_notification_capacity")]
    pub capacity: usize,
}

/// Conflict resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverSettings {
    /// Relative sequence length change treated as a partial payload.
    #[serde(default = "default_length_change_threshold")]
    pub length_change_threshold: f64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// A subscription opened on start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub dashboard_type: DashboardType,

    #[serde(default = "default_filters")]
    pub filters: serde_json::Value,

    #[serde(default)]
    pub data_types: Vec<String>,

    /// Requested server refresh interval in milliseconds.
    #[serde(default)]
    pub refresh_interval_ms: Option<u64>,
}

// Default value functions
fn default_url() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}

fn default_true() -> bool {
    true
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay() -> u64 {
    1_000
}

fn default_timeout() -> u64 {
    10_000
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_poll_interval() -> u64 {
    5_000
}

fn default_notification_capacity() -> usize {
    DEFAULT_NOTIFICATION_CAPACITY
}

fn default_length_change_threshold() -> f64 {
    DEFAULT_LENGTH_CHANGE_THRESHOLD
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_filters() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            auto_reconnect: true,
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay(),
            timeout_ms: default_timeout(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_buffer_capacity(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capacity: default_notification_capacity(),
        }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            length_change_threshold: default_length_change_threshold(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl ClientConfig {
    /// Load from the first default path that exists, layered with
    /// `DASHPULSE_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        let path = CONFIG_PATHS
            .iter()
            .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
            .find(|p| p.exists());

        Self::layered(path.as_deref())
    }

    /// Load from an optional file plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be merged or deserialized.
    pub fn layered(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("DASHPULSE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let source = match path {
            Some(path) => path.display().to_string(),
            None => "environment".to_string(),
        };

        builder
            .build()
            .and_then(|c| c.try_deserialize::<ClientConfig>())
            .with_context(|| format!("Failed to load configuration from {}", source))
    }

    /// Load configuration from a specific TOML file, without overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ClientConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Runtime connection options.
    #[must_use]
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            auto_reconnect: self.connection.auto_reconnect,
            max_attempts: self.connection.reconnect_attempts,
            base_delay: Duration::from_millis(self.connection.reconnect_delay_ms),
            timeout: Duration::from_millis(self.connection.timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
        }
    }

    #[must_use]
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            length_change_threshold: self.resolver.length_change_threshold,
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.buffer.poll_interval_ms)
    }
}

impl SubscriptionConfig {
    /// The request this entry describes.
    #[must_use]
    pub fn to_spec(&self) -> SubscriptionSpec {
        let spec = SubscriptionSpec::new(
            self.dashboard_type,
            FilterSet::new(self.filters.clone()),
            self.data_types.clone(),
        );
        match self.refresh_interval_ms {
            Some(ms) => spec.with_refresh_interval(Duration::from_millis(ms)),
            None => spec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert!(config.connection.auto_reconnect);
        assert_eq!(config.connection.reconnect_attempts, 5);
        assert_eq!(config.connection.reconnect_delay_ms, 1000);
        assert_eq!(config.connection.timeout_ms, 10_000);
        assert_eq!(config.heartbeat.interval_ms, 30_000);
        assert_eq!(config.buffer.capacity, 10);
        assert_eq!(config.buffer.poll_interval_ms, 5000);
        assert_eq!(config.notifications.capacity, 100);
        assert!(!config.metrics.enabled);
        assert!(config.subscriptions.is_empty());
    }

    #[test]
    fn test_connection_options() {
        let options = ClientConfig::default().connection_options();
        assert_eq!(options.base_delay, Duration::from_secs(1));
        assert_eq!(options.timeout, Duration::from_secs(10));
        assert_eq!(options.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [connection]
            url = "wss://dash.example.com/ws"
            reconnect_attempts = 3

            [resolver]
            length_change_threshold = 0.8

            [[subscriptions]]
            dashboard_type = "financial"
            data_types = ["revenue", "costs"]
            refresh_interval_ms = 15000

            [subscriptions.filters]
            region = "eu"
        "#;

        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.url, "wss://dash.example.com/ws");
        assert_eq!(config.connection.reconnect_attempts, 3);
        assert_eq!(config.connection.timeout_ms, 10_000);
        assert_eq!(config.resolver_config().length_change_threshold, 0.8);

        let spec = config.subscriptions[0].to_spec();
        assert_eq!(spec.dashboard_type, DashboardType::Financial);
        assert_eq!(spec.filters.as_value()["region"], "eu");
        assert_eq!(spec.refresh_interval, Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_subscription_filters_default_to_empty() {
        let toml_str = r#"
            [[subscriptions]]
            dashboard_type = "executive"
        "#;

        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.subscriptions[0].to_spec().filters, FilterSet::empty());
    }
}
