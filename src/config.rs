//! Node configuration: broker address, client identity, topics and the few
//! application constants the two binaries share.
//!
//! Configuration is loaded from a TOML file under the user config directory
//! (or an explicit path). A missing file is not an error; the defaults are
//! the values the nodes get bench-tested with.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const CONFIG_DIR: &str = "pubsub-node";
const CONFIG_FILE: &str = "node_config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Complete configuration for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NodeConfig {
    pub broker: BrokerConfig,
    pub topics: TopicConfig,
    pub publisher: PublisherConfig,
    pub subscriber: SubscriberConfig,
}

/// Broker endpoint and session identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Client identifier presented to the broker. Also the prefix of the
    /// announce message published on connect.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "ESP32testing1".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 5,
        }
    }
}

/// Fixed topic names. Topics are configuration, never created at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Announce messages land here after every successful connect.
    pub status: String,
    /// The publisher's counter topic.
    pub data: String,
    /// The subscriber's control topic.
    pub control: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            status: "ESP/status".to_string(),
            data: "ESP/test".to_string(),
            control: "ESP/led".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Period between counter publishes, in milliseconds.
    pub interval_ms: u32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self { interval_ms: 4000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// BCM number of the output pin driven by the control topic.
    pub led_pin: u8,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self { led_pin: 2 }
    }
}

impl NodeConfig {
    /// Loads the configuration from `path`, or from the default location when
    /// no path is given. A missing file falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(explicit) => Self::from_file(explicit),
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default),
                _ => {
                    info!("No config file found, using default configuration");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }
}
