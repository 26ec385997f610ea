use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
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
            file_logging_enabled: default_true(),
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
    "bt_bridge".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Extra consecutive ports tried when `port` is taken
    #[serde(default = "default_max_bind_retries")]
    pub max_bind_retries: u16,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_bind_retries: default_max_bind_retries(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    42123
}
fn default_max_bind_retries() -> u16 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    #[serde(default = "default_scan_duration_ms")]
    pub ble_scan_duration_ms: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            ble_scan_duration_ms: default_scan_duration_ms(),
        }
    }
}

fn default_scan_duration_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_classic_interval_ms")]
    pub classic_interval_ms: u64,
    #[serde(default = "default_ble_interval_ms")]
    pub ble_interval_ms: u64,
    /// Consecutive failed BLE probes before the link is declared lost
    #[serde(default = "default_ble_failure_threshold")]
    pub ble_failure_threshold: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            classic_interval_ms: default_classic_interval_ms(),
            ble_interval_ms: default_ble_interval_ms(),
            ble_failure_threshold: default_ble_failure_threshold(),
        }
    }
}

fn default_classic_interval_ms() -> u64 {
    5000
}
fn default_ble_interval_ms() -> u64 {
    3000
}
fn default_ble_failure_threshold() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendSettings {
    /// Cap applied to each embedded delay directive
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Cap on the summed delay of a single send; later delays are skipped
    #[serde(default = "default_max_total_delay_ms")]
    pub max_total_delay_ms: u64,
}

impl Default for SendSettings {
    fn default() -> Self {
        Self {
            max_delay_ms: default_max_delay_ms(),
            max_total_delay_ms: default_max_total_delay_ms(),
        }
    }
}

fn default_max_delay_ms() -> u64 {
    255
}
fn default_max_total_delay_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub send: SendSettings,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Settings {
    pub fn ble_scan_duration(&self) -> Duration {
        Duration::from_millis(self.discovery.ble_scan_duration_ms)
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory, falling back to defaults
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {:#}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BtBridge");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
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

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.gateway.port, 42123);
        assert_eq!(settings.gateway.max_bind_retries, 10);
        assert_eq!(settings.ble_scan_duration(), Duration::from_millis(5000));
        assert_eq!(settings.health.classic_interval_ms, 5000);
        assert_eq!(settings.health.ble_interval_ms, 3000);
        assert_eq!(settings.health.ble_failure_threshold, 2);
        assert_eq!(settings.send.max_delay_ms, 255);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"gateway": {"port": 9000}, "log_settings": {"level": "debug"}}"#)
            .unwrap();

        let service = SettingsService::from_path(path);
        let settings = service.get();
        assert_eq!(settings.gateway.port, 9000);
        assert_eq!(settings.gateway.host, "127.0.0.1");
        assert_eq!(settings.log_settings.level, "debug");
        assert!(settings.log_settings.console_logging_enabled);
        assert_eq!(settings.discovery.ble_scan_duration_ms, 5000);
    }

    #[test]
    fn test_unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let service = SettingsService::from_path(path);
        assert_eq!(service.get().gateway.port, 42123);
    }

    #[test]
    fn test_save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut service = SettingsService::from_path(path.clone());
        service.get_mut().health.ble_failure_threshold = 4;
        service.save().unwrap();

        let reloaded = SettingsService::from_path(path);
        assert_eq!(reloaded.get().health.ble_failure_threshold, 4);
    }
}
