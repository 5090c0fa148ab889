//! Configuration loading from TOML files
//!
//! Config file is selected via the --config command line argument
//! (default: config/hub.toml).
//!
//! The hub consumes configuration, it does not own it: binding tables and
//! filters are handed to the components that apply them.

use crate::services::batcher::{DEFAULT_BATCH_INTERVAL_MS, DEFAULT_TSP_BATCH_INTERVAL_MS};
use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// How a device identifier value should be matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    /// Adapter-assigned peripheral id
    Id,
    /// Advertised local name
    Name,
}

/// Device inclusion filter entry
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(rename = "type")]
    pub kind: IdentifierKind,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RuuviConfig {
    /// Discovery logging only, nothing published downstream
    #[serde(default)]
    pub scan_mode: bool,
    /// Service UUIDs handed to the scanning adapter
    #[serde(default)]
    pub service_uuids: Vec<String>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfluxSinkConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    #[serde(default = "default_measurement")]
    pub measurement: String,
    /// Static tags merged into every point
    #[serde(default)]
    pub default_tags: HashMap<String, String>,
    #[serde(default = "default_influx_interval_ms")]
    pub interval_ms: u64,
}

fn default_measurement() -> String {
    "ruuvi".to_string()
}

fn default_influx_interval_ms() -> u64 {
    DEFAULT_BATCH_INTERVAL_MS
}

/// Field-name -> output-tag binding (allow-list)
#[derive(Debug, Clone, Deserialize)]
pub struct TagBinding {
    #[serde(rename = "in")]
    pub input: String,
    pub out: String,
}

/// Device-identity -> location binding
#[derive(Debug, Clone, Deserialize)]
pub struct LocationBinding {
    #[serde(rename = "type")]
    pub kind: IdentifierKind,
    pub value: String,
    pub out: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TspSinkConfig {
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    #[serde(default = "default_tsp_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub tags: Vec<TagBinding>,
    #[serde(default)]
    pub locations: Vec<LocationBinding>,
}

fn default_api_key_header() -> String {
    "x-api-key".to_string()
}

fn default_tsp_interval_ms() -> u64 {
    DEFAULT_TSP_BATCH_INTERVAL_MS
}

/// Raw TOML layout
#[derive(Debug, Clone, Deserialize)]
struct TomlConfig {
    mqtt: MqttConfig,
    #[serde(default)]
    ruuvi: RuuviConfig,
    #[serde(default)]
    influx: Option<InfluxSinkConfig>,
    #[serde(default)]
    tsp: Option<TspSinkConfig>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    scan_mode: bool,
    service_uuids: Vec<String>,
    filters: Vec<FilterConfig>,
    influx: Option<InfluxSinkConfig>,
    tsp: Option<TspSinkConfig>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_topic: "ruuvi/+/advertisement".to_string(),
            mqtt_username: None,
            mqtt_password: None,
            scan_mode: false,
            service_uuids: Vec::new(),
            filters: Vec::new(),
            influx: None,
            tsp: None,
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            scan_mode: toml_config.ruuvi.scan_mode,
            service_uuids: toml_config.ruuvi.service_uuids,
            filters: toml_config.ruuvi.filters,
            influx: toml_config.influx,
            tsp: toml_config.tsp,
            config_file: path.display().to_string(),
        })
    }

    /// Startup validation: without a sink, the source must not be started
    /// unless scan-only mode was requested
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.influx.is_none() && self.tsp.is_none() && !self.scan_mode {
            bail!("no output sink configured and scan mode is disabled; refusing to start");
        }
        Ok(())
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn scan_mode(&self) -> bool {
        self.scan_mode
    }

    pub fn service_uuids(&self) -> &[String] {
        &self.service_uuids
    }

    pub fn filters(&self) -> &[FilterConfig] {
        &self.filters
    }

    pub fn influx(&self) -> Option<&InfluxSinkConfig> {
        self.influx.as_ref()
    }

    pub fn tsp(&self) -> Option<&TspSinkConfig> {
        self.tsp.as_ref()
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    #[cfg(test)]
    pub fn with_scan_mode(mut self, scan_mode: bool) -> Self {
        self.scan_mode = scan_mode;
        self
    }
}
