use crate::bluetooth::DeviceAddress;
use crate::error::{BridgeError, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    let Ok(content) = fs::read_to_string(env_path) else {
        return;
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(&key).is_err() {
            // SAFETY: only called from the synchronous main, before the runtime exists
            unsafe { std::env::set_var(&key, &value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Find the first '=' and split there
        let Some(eq_pos) = line.find('=') else {
            continue;
        };
        let key = line[..eq_pos].trim();
        let mut value = line[eq_pos + 1..].trim();

        // Remove surrounding quotes if present
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = &value[1..value.len() - 1];
        }
        pairs.push((key.to_string(), value.to_string()));
    }
    pairs
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bluetooth: BluetoothConfig,
    pub poll: PollConfig,
    pub mqtt: MqttConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Scale addresses to coordinate from startup.
    pub devices: Vec<String>,
    pub adapter: String,
    /// Register every supported scale that advertises.
    pub auto_discover: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    /// Bound on connect + read of one poll.
    pub timeout_secs: u64,
    pub disconnect_grace_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Time between simulated advertisements.
    pub interval_ms: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            adapter: "hci0".to_string(),
            auto_discover: false,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            timeout_secs: 20,
            disconnect_grace_secs: 5,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "renpho-ble-bridge".to_string(),
            username: None,
            password: None,
            topic_prefix: "renpho".to_string(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { interval_ms: 2000 }
    }
}

impl Config {
    /// `<config_dir>/renpho-ble-bridge/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("renpho-ble-bridge").join("config.json"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Defaults, overlaid by the JSON file (explicit path, or the default
    /// path when it exists), overlaid by environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay values from `lookup`, keyed by environment variable name.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(devices) = lookup("RENPHO_DEVICES") {
            self.bluetooth.devices = devices
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(adapter) = lookup("RENPHO_ADAPTER") {
            self.bluetooth.adapter = adapter;
        }
        if let Some(value) = parsed(&lookup, "RENPHO_AUTO_DISCOVER") {
            self.bluetooth.auto_discover = value;
        }
        if let Some(value) = parsed(&lookup, "POLL_INTERVAL_SECS") {
            self.poll.interval_secs = value;
        }
        if let Some(value) = parsed(&lookup, "POLL_TIMEOUT_SECS") {
            self.poll.timeout_secs = value;
        }
        if let Some(value) = parsed(&lookup, "POLL_DISCONNECT_GRACE_SECS") {
            self.poll.disconnect_grace_secs = value;
        }

        // MQTT configuration
        if let Some(value) = parsed(&lookup, "MQTT_ENABLED") {
            self.mqtt.enabled = value;
        }
        if let Some(host) = lookup("MQTT_BROKER_HOST") {
            self.mqtt.broker_host = host;
        }
        if let Some(port) = parsed(&lookup, "MQTT_BROKER_PORT") {
            self.mqtt.broker_port = port;
        }
        if let Some(client_id) = lookup("MQTT_CLIENT_ID") {
            self.mqtt.client_id = client_id;
        }
        if let Some(username) = lookup("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Some(prefix) = lookup("MQTT_TOPIC_PREFIX") {
            self.mqtt.topic_prefix = prefix;
        }

        if let Some(value) = parsed(&lookup, "SIMULATION_INTERVAL_MS") {
            self.simulation.interval_ms = value;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll.interval_secs == 0 {
            return Err(BridgeError::InvalidConfig(
                "poll.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.poll.timeout_secs == 0 {
            return Err(BridgeError::InvalidConfig(
                "poll.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.poll.disconnect_grace_secs == 0 {
            return Err(BridgeError::InvalidConfig(
                "poll.disconnect_grace_secs must be greater than zero".to_string(),
            ));
        }
        if self.bluetooth.adapter.trim().is_empty() {
            return Err(BridgeError::InvalidConfig(
                "bluetooth.adapter must not be empty".to_string(),
            ));
        }
        if self.mqtt.enabled && self.mqtt.broker_host.trim().is_empty() {
            return Err(BridgeError::InvalidConfig(
                "mqtt.broker_host is required when MQTT is enabled".to_string(),
            ));
        }
        if self.simulation.interval_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "simulation.interval_ms must be greater than zero".to_string(),
            ));
        }
        self.device_addresses()?;
        Ok(())
    }

    pub fn device_addresses(&self) -> Result<Vec<DeviceAddress>> {
        self.bluetooth.devices.iter().map(|d| d.parse()).collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs)
    }

    pub fn poll_deadline(&self) -> Duration {
        Duration::from_secs(self.poll.timeout_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.poll.disconnect_grace_secs)
    }

    pub fn simulation_interval(&self) -> Duration {
        Duration::from_millis(self.simulation.interval_ms)
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}
