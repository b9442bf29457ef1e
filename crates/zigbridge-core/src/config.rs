//! Bridge configuration.
//!
//! Defaults live in the constant modules below. A [`BridgeConfig`] is loaded
//! from a TOML file when one is available and then selectively overridden
//! from environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Fixed table sizes and timing defaults.
pub mod limits {
    /// Address cache capacity.
    pub const MAX_DEVICES: usize = 64;
    /// Pending-command table capacity.
    pub const MAX_PENDING: usize = 16;
    /// Command confirmation timeout.
    pub const CMD_TIMEOUT_MS: u64 = 5000;
    /// Cadence of the pending-command sweep.
    pub const SWEEP_INTERVAL_MS: u64 = 1000;
    /// Handlers per event kind.
    pub const MAX_HANDLERS_PER_EVENT: usize = 10;
    /// Nested publishes allowed on one thread.
    pub const MAX_PUBLISH_DEPTH: usize = 8;
    /// Quirk table capacity.
    pub const MAX_QUIRKS: usize = 32;
    /// Corrective actions per quirk entry.
    pub const QUIRK_MAX_ACTIONS: usize = 4;
    /// Per-poller time budget within one scheduling pass.
    pub const POLLER_BUDGET_MS: u64 = 50;
}

/// Default endpoints and paths.
pub mod defaults {
    pub const CONFIG_FILE: &str = "zigbridge.toml";
    pub const MQTT_BASE_TOPIC: &str = "zigbee2mqtt";
    pub const STORAGE_PATH: &str = "data/zigbridge.redb";
}

/// Environment variable names.
pub mod env_vars {
    pub const CONFIG: &str = "ZIGBRIDGE_CONFIG";
    pub const CMD_TIMEOUT_MS: &str = "ZIGBRIDGE_CMD_TIMEOUT_MS";
    pub const MQTT_BASE_TOPIC: &str = "ZIGBRIDGE_MQTT_BASE_TOPIC";
    pub const STORAGE_PATH: &str = "ZIGBRIDGE_STORAGE_PATH";
    pub const LOG_JSON: &str = "ZIGBRIDGE_LOG_JSON";

    /// Command timeout from the environment, if set and numeric.
    pub fn cmd_timeout_ms() -> Option<u64> {
        std::env::var(CMD_TIMEOUT_MS)
            .ok()
            .and_then(|s| s.parse().ok())
    }

    pub fn mqtt_base_topic() -> Option<String> {
        std::env::var(MQTT_BASE_TOPIC).ok().filter(|s| !s.is_empty())
    }

    pub fn storage_path() -> Option<String> {
        std::env::var(STORAGE_PATH).ok().filter(|s| !s.is_empty())
    }

    /// Whether JSON log output was requested.
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    }
}

/// Southbound adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Address cache capacity.
    pub max_devices: usize,
    /// Pending-command table capacity.
    pub max_pending: usize,
    /// Command confirmation timeout in milliseconds.
    pub command_timeout_ms: u64,
    /// Pending-command sweep cadence in milliseconds.
    pub sweep_interval_ms: u64,
    /// Default transition time for level/colour commands, in tenths of a second.
    pub default_transition_ds: u16,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            max_devices: limits::MAX_DEVICES,
            max_pending: limits::MAX_PENDING,
            command_timeout_ms: limits::CMD_TIMEOUT_MS,
            sweep_interval_ms: limits::SWEEP_INTERVAL_MS,
            default_transition_ds: 0,
        }
    }
}

/// Event bus settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    pub max_handlers_per_event: usize,
    pub max_publish_depth: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_handlers_per_event: limits::MAX_HANDLERS_PER_EVENT,
            max_publish_depth: limits::MAX_PUBLISH_DEPTH,
        }
    }
}

/// Northbound MQTT mapping settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Topic prefix for every published and subscribed topic.
    pub base_topic: String,
    /// Publish availability topics as retained messages.
    pub retain_availability: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            base_topic: defaults::MQTT_BASE_TOPIC.to_string(),
            retain_availability: true,
        }
    }
}

/// Persistence collaborator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database path; `None` keeps configuration in memory only.
    pub path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: Some(defaults::STORAGE_PATH.to_string()),
        }
    }
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub adapter: AdapterConfig,
    pub event_bus: EventBusConfig,
    pub mqtt: MqttConfig,
    pub storage: StorageConfig,
    /// Extra quirk entries, registered after the built-in table.
    pub quirks: Vec<toml::Value>,
}

impl BridgeConfig {
    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration.
    ///
    /// Priority: explicit path > `ZIGBRIDGE_CONFIG` > `zigbridge.toml` in the
    /// working directory > defaults. Environment overrides apply last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(env_vars::CONFIG).ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                tracing::info!(category = "config", "Loading config from: {}", path.display());
                Self::from_toml_str(&content)?
            }
            None => match std::fs::read_to_string(defaults::CONFIG_FILE) {
                Ok(content) => {
                    tracing::info!(category = "config", "Loading config from: {}", defaults::CONFIG_FILE);
                    Self::from_toml_str(&content)?
                }
                Err(_) => {
                    tracing::info!(category = "config", "No config file, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply the supported environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(timeout) = env_vars::cmd_timeout_ms() {
            self.adapter.command_timeout_ms = timeout;
        }
        if let Some(topic) = env_vars::mqtt_base_topic() {
            self.mqtt.base_topic = topic;
        }
        if let Some(path) = env_vars::storage_path() {
            self.storage.path = Some(path);
        }
    }

    /// Reject configurations that would make a bounded table unusable.
    pub fn validate(&self) -> Result<()> {
        let a = &self.adapter;
        if a.max_devices == 0 || a.max_pending == 0 {
            return Err(Error::Config("table capacities must be non-zero".into()));
        }
        if a.command_timeout_ms == 0 || a.sweep_interval_ms == 0 {
            return Err(Error::Config(
                "command timeout and sweep interval must be non-zero".into(),
            ));
        }
        if self.event_bus.max_handlers_per_event == 0 || self.event_bus.max_publish_depth == 0 {
            return Err(Error::Config("event bus limits must be non-zero".into()));
        }
        if self.mqtt.base_topic.is_empty() || self.mqtt.base_topic.contains(['+', '#']) {
            return Err(Error::Config(format!(
                "invalid MQTT base topic: {:?}",
                self.mqtt.base_topic
            )));
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
