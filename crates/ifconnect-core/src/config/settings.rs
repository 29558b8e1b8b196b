use crate::Result;
use ifconnect_rpc::{DISCOVERY_PORT, OversizePolicy, TELEMETRY_PORT};
use ifconnect_types::{Category, HostEndpoint};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use tracing::warn;

/// Client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Explicit host address; together with `port` it skips discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Poll interval in milliseconds per category, keyed by wire type name
    #[serde(default)]
    pub intervals: BTreeMap<String, u32>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub frame: FrameConfig,
}

impl ClientConfig {
    /// Load config from file, or defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        super::validation::warn_unknown_fields(&content, "config.json");
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The configured host, when both address and port are given.
    #[must_use]
    pub fn explicit_endpoint(&self) -> Option<HostEndpoint> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) if !host.trim().is_empty() => {
                Some(HostEndpoint::new(host.trim(), port))
            }
            _ => None,
        }
    }

    /// Resolve `intervals` to categories. Unknown type names are warned about and skipped.
    #[must_use]
    pub fn poll_intervals(&self) -> HashMap<Category, u32> {
        resolve_intervals(&self.intervals)
    }
}

/// Map wire type names to categories, dropping names that are not categories.
#[must_use]
pub fn resolve_intervals<S: AsRef<str>>(intervals: &BTreeMap<S, u32>) -> HashMap<Category, u32> {
    intervals
        .iter()
        .filter_map(|(name, ms)| match name.as_ref().parse::<Category>() {
            Ok(category) => Some((category, *ms)),
            Err(e) => {
                warn!("Ignoring poll interval: {}", e);
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_port")]
    pub port: u16,

    /// Stop listening once a host is selected
    #[serde(default = "default_true")]
    pub close_on_discover: bool,

    /// Connect to a discovered host straight away
    #[serde(default = "default_true")]
    pub connect_on_discover: bool,
}

fn default_discovery_port() -> u16 {
    DISCOVERY_PORT
}
fn default_true() -> bool {
    true
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            close_on_discover: true,
            connect_on_discover: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_telemetry_port")]
    pub port: u16,
}

fn default_telemetry_port() -> u16 {
    TELEMETRY_PORT
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_telemetry_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub level: LogLevel,
}

impl LoggingConfig {
    /// Default `EnvFilter` directive for these settings.
    #[must_use]
    pub fn filter_directive(&self) -> String {
        if self.enabled {
            format!("ifconnect={}", self.level)
        } else {
            "off".to_string()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameConfig {
    #[serde(default)]
    pub oversize: OversizePolicy,
}
