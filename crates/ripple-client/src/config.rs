//! Client configuration.
//!
//! Configuration can be loaded from:
//! - A TOML file (`ripple.toml`, `/etc/ripple/ripple.toml`,
//!   `~/.config/ripple/ripple.toml`, first one found)
//! - Environment variables (`RIPPLE_*`, nested keys with `__`), which
//!   override the file

use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use ripple_core::ReconnectPolicy;
use ripple_transport::WebSocketConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What the outbound gateway does with frames sent while the link is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundPolicy {
    /// Hold frames and flush them in order after the next handshake.
    #[default]
    Queue,
    /// Drop frames with a warning.
    Drop,
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint (`ws://` or `wss://`).
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,

    /// Consecutive failed reconnects before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// First reconnect delay in milliseconds.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Reconnect delay cap in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Lifetime of a live interaction record in milliseconds.
    #[serde(default = "default_interaction_ttl_ms")]
    pub interaction_ttl_ms: u64,

    /// How often expired interaction records are evicted.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Handling of sends while disconnected.
    #[serde(default)]
    pub outbound_policy: OutboundPolicy,

    /// Queue bound for [`OutboundPolicy::Queue`]; the oldest frame is dropped
    /// on overflow.
    #[serde(default = "default_max_queued_frames")]
    pub max_queued_frames: usize,

    /// Handshake timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Install the Prometheus exporter (binary only).
    #[serde(default)]
    pub enabled: bool,

    /// Exporter port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_endpoint_url() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_interaction_ttl_ms() -> u64 {
    30_000
}

fn default_sweep_interval_ms() -> u64 {
    5_000
}

fn default_max_queued_frames() -> usize {
    1024
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url: default_endpoint_url(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            interaction_ttl_ms: default_interaction_ttl_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            outbound_policy: OutboundPolicy::default(),
            max_queued_frames: default_max_queued_frames(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_message_size: default_max_message_size(),
            metrics: MetricsConfig::default(),
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

const CONFIG_PATHS: [&str; 3] = [
    "ripple.toml",
    "/etc/ripple/ripple.toml",
    "~/.config/ripple/ripple.toml",
];

fn env_source() -> Environment {
    Environment::with_prefix("RIPPLE")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl ClientConfig {
    /// Load configuration from the first config file found, overlaid with
    /// `RIPPLE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// an environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let path = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        Self::build(path.as_deref(), env_source())
    }

    fn build(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        let config = builder
            .add_source(env)
            .build()
            .context("Failed to assemble configuration")?;

        config
            .try_deserialize()
            .context("Invalid client configuration")
    }

    /// Load configuration from a specific file, without environment overrides.
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

    /// Reconnection policy derived from the backoff settings.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_millis(self.base_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    #[must_use]
    pub fn interaction_ttl(&self) -> Duration {
        Duration::from_millis(self.interaction_ttl_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        // A zero period would make the ticker panic.
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    /// Settings for [`ripple_transport::WebSocketTransport`].
    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_message_size: self.max_message_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.base_backoff_ms, 1000);
        assert_eq!(config.interaction_ttl(), Duration::from_secs(30));
        assert_eq!(config.outbound_policy, OutboundPolicy::Queue);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            endpoint_url = "wss://example.com/ws"
            max_reconnect_attempts = 3
            outbound_policy = "drop"

            [metrics]
            enabled = true
        "#;

        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.endpoint_url, "wss://example.com/ws");
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.outbound_policy, OutboundPolicy::Drop);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);
        assert_eq!(config.max_backoff_ms, 30_000);
    }

    #[test]
    fn test_environment_overrides() {
        let mut vars = config::Map::new();
        vars.insert("RIPPLE_ENDPOINT_URL".to_string(), "ws://10.0.0.1/ws".to_string());
        vars.insert("RIPPLE_MAX_RECONNECT_ATTEMPTS".to_string(), "7".to_string());
        vars.insert("RIPPLE_OUTBOUND_POLICY".to_string(), "drop".to_string());
        vars.insert("RIPPLE_METRICS__PORT".to_string(), "9100".to_string());

        let config = ClientConfig::build(None, env_source().source(Some(vars))).unwrap();
        assert_eq!(config.endpoint_url, "ws://10.0.0.1/ws");
        assert_eq!(config.max_reconnect_attempts, 7);
        assert_eq!(config.outbound_policy, OutboundPolicy::Drop);
        assert_eq!(config.metrics.port, 9100);
        assert_eq!(config.base_backoff_ms, 1000);
    }

    #[test]
    fn test_reconnect_policy() {
        let config = ClientConfig {
            base_backoff_ms: 250,
            max_backoff_ms: 2_000,
            max_reconnect_attempts: 2,
            ..Default::default()
        };
        let policy = config.reconnect_policy();
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(10), Duration::from_millis(2_000));
        assert_eq!(policy.max_attempts, 2);
    }
}
