//! Acquisition configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via COLACAM_CONFIG)
//! 3. Environment variables

use colacam_client::{ControlConfig, Dialect};
use colacam_stream::{DemuxConfig, GrabberConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Acquisition configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Control channel configuration.
    pub device: DeviceConfig,
    /// Streaming channel configuration.
    pub stream: StreamConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("COLACAM_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides looked up by variable name.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        self.device.apply_overrides(&var);
        self.stream.apply_overrides(&var);
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Control channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device host name or address.
    pub host: String,
    /// Control dialect, `cola-b` or `cola-2`.
    #[serde(with = "dialect_serde")]
    pub protocol: Dialect,
    /// Control port. Defaults to the dialect's port.
    pub control_port: Option<u16>,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Session timeout requested from the device, in milliseconds.
    pub session_timeout_ms: u64,
    /// Reconnect once when the device forgets the session.
    pub auto_reconnect: bool,
    /// Verify CoLa-B checksums on replies.
    pub verify_checksum: bool,
    /// Client name sent when opening a CoLa-2 session.
    pub client_id: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.10".to_string(),
            protocol: Dialect::Cola2,
            control_port: None,
            connect_timeout_ms: 5000,
            session_timeout_ms: 5000,
            auto_reconnect: true,
            verify_checksum: true,
            client_id: "colacam".to_string(),
        }
    }
}

impl DeviceConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("COLACAM_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }

        if let Some(protocol) = var("COLACAM_PROTOCOL") {
            if let Ok(dialect) = protocol.parse() {
                self.protocol = dialect;
            }
        }

        if let Some(port) = var("COLACAM_CONTROL_PORT") {
            if let Ok(port) = port.parse() {
                self.control_port = Some(port);
            }
        }

        if let Some(timeout) = var("COLACAM_CONNECT_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.connect_timeout_ms = ms;
            }
        }

        if let Some(timeout) = var("COLACAM_SESSION_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.session_timeout_ms = ms;
            }
        }

        if let Some(enabled) = var("COLACAM_AUTO_RECONNECT") {
            self.auto_reconnect = parse_flag(&enabled);
        }

        if let Some(enabled) = var("COLACAM_VERIFY_CHECKSUM") {
            self.verify_checksum = parse_flag(&enabled);
        }
    }

    /// Returns the control port, falling back to the dialect's default.
    pub fn control_port(&self) -> u16 {
        self.control_port
            .unwrap_or_else(|| self.protocol.default_port())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Builds the control connection settings.
    pub fn control_config(&self) -> ControlConfig {
        ControlConfig::new(self.host.clone(), self.protocol)
            .with_port(self.control_port())
            .with_connect_timeout(self.connect_timeout())
            .with_session_timeout(Duration::from_millis(self.session_timeout_ms))
            .with_auto_reconnect(self.auto_reconnect)
            .with_verify_checksum(self.verify_checksum)
            .with_client_id(self.client_id.clone())
    }
}

/// Streaming channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Streaming port.
    pub port: u16,
    /// How long the worker waits for a frame before logging a stall.
    pub frame_timeout_ms: u64,
    /// Fewest segments accepted in a blob. Values below 3 act as 3.
    pub min_segments: u16,
    /// Pause between streaming connection attempts.
    pub reconnect_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            port: colacam_protocol::STREAMING_PORT,
            frame_timeout_ms: 2000,
            min_segments: 3,
            reconnect_delay_ms: 1000,
        }
    }
}

impl StreamConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("COLACAM_STREAM_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }

        if let Some(timeout) = var("COLACAM_FRAME_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.frame_timeout_ms = ms;
            }
        }

        if let Some(min) = var("COLACAM_MIN_SEGMENTS") {
            if let Ok(n) = min.parse() {
                self.min_segments = n;
            }
        }
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    /// Builds the grabber settings.
    pub fn grabber_config(&self) -> GrabberConfig {
        GrabberConfig::default()
            .with_reconnect_delay(Duration::from_millis(self.reconnect_delay_ms))
            .with_demux(DemuxConfig::default().with_min_segments(self.min_segments))
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Dialect as a string in YAML.
mod dialect_serde {
    use colacam_client::Dialect;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dialect: &Dialect, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dialect.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Dialect, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
