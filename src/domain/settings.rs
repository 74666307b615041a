use crate::domain::models::{ConnectParams, Qos};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the configuration file location.
pub const CONFIG_PATH_ENV: &str = "BLE2MQTT_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble2mqtt".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Broker connection and topic layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub qos: Qos,
    #[serde(default = "default_false")]
    pub retain: bool,
    #[serde(default = "default_get_suffix")]
    pub get_suffix: String,
    #[serde(default = "default_set_suffix")]
    pub set_suffix: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Delay before reconnecting after the broker connection drops, 0 = immediate
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            qos: Qos::default(),
            retain: default_false(),
            get_suffix: default_get_suffix(),
            set_suffix: default_set_suffix(),
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl MqttSettings {
    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "ble2mqtt".to_string()
}
fn default_get_suffix() -> String {
    "/Get".to_string()
}
fn default_set_suffix() -> String {
    "/Set".to_string()
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_reconnect_delay_ms() -> u64 {
    1000
}

/// Which peripherals to connect to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BleSettings {
    /// When non-empty, only these addresses are connected
    #[serde(default)]
    pub whitelist: Vec<String>,
    /// Addresses never connected (ignored while a whitelist is set)
    #[serde(default)]
    pub blacklist: Vec<String>,
    /// Stop scanning after this many seconds; 0 scans until told otherwise
    #[serde(default)]
    pub scan_duration_secs: u64,
}

impl BleSettings {
    pub fn scan_duration(&self) -> Option<Duration> {
        (self.scan_duration_secs > 0).then(|| Duration::from_secs(self.scan_duration_secs))
    }
}

/// Network reachability probing. On hosted platforms the OS joins the
/// network; the gateway only watches whether the broker is reachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Defaults to the MQTT host
    #[serde(default)]
    pub probe_host: Option<String>,
    /// Defaults to the MQTT port
    #[serde(default)]
    pub probe_port: Option<u16>,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            probe_host: None,
            probe_port: None,
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

fn default_probe_interval_secs() -> u64 {
    10
}
fn default_probe_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub ble: BleSettings,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Settings {
    /// Host and port the network monitor should probe.
    pub fn probe_target(&self) -> (String, u16) {
        (
            self.network
                .probe_host
                .clone()
                .unwrap_or_else(|| self.mqtt.host.clone()),
            self.network.probe_port.unwrap_or(self.mqtt.port),
        )
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from `$BLE2MQTT_CONFIG` or the per-user config directory,
    /// falling back to defaults when the file is missing or unreadable.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!(
                    "Using default settings, could not load {}: {:#}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("ble2mqtt");
        fs::create_dir_all(&path)
            .with_context(|| format!("Could not create {}", path.display()))?;
        path.push("config.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }
}
