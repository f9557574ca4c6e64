use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::error::AppError;
use crate::app::ui::catalog::StaticElement;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolSettings {
    pub state_path: String,
    pub freshness_ms: u64,
    pub boot_timeout_secs: u64,
    pub boot_poll_ms: u64,
    pub default_family: String,
    pub claim_ttl_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            state_path: String::new(),
            freshness_ms: 2_000,
            boot_timeout_secs: 30,
            boot_poll_ms: 500,
            default_family: "iPhone".to_string(),
            claim_ttl_secs: 1_800,
        }
    }
}

impl PoolSettings {
    pub fn resolved_state_path(&self) -> PathBuf {
        if !self.state_path.trim().is_empty() {
            return PathBuf::from(self.state_path.trim());
        }
        data_dir().join("device_pool.json")
    }

    pub fn freshness(&self) -> Duration {
        Duration::from_millis(self.freshness_ms)
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout_secs)
    }

    pub fn boot_poll_interval(&self) -> Duration {
        Duration::from_millis(self.boot_poll_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    pub ui_ttl_ms: u64,
    pub registry_ttl_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ui_ttl_ms: 3_000,
            registry_ttl_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UiSettings {
    pub stability_delay_ms: u64,
    pub settle_delay_ms: u64,
    pub occlusion_max_attempts: u32,
    pub probe_grid_points: u32,
    pub probe_concurrency: usize,
    pub wait_interval_ms: u64,
    /// Fixed-position elements eligible for the point-probe fast path.
    pub static_elements: Vec<StaticElement>,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            stability_delay_ms: 150,
            settle_delay_ms: 600,
            occlusion_max_attempts: 3,
            probe_grid_points: 6,
            probe_concurrency: 4,
            wait_interval_ms: 500,
            static_elements: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolSettings {
    pub xcrun_path: String,
    pub idb_path: String,
    pub idevice_id_path: String,
    pub ideviceinfo_path: String,
    pub ideviceinstaller_path: String,
    pub command_timeout_secs: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            xcrun_path: String::new(),
            idb_path: String::new(),
            idevice_id_path: String::new(),
            ideviceinfo_path: String::new(),
            ideviceinstaller_path: String::new(),
            command_timeout_secs: 30,
        }
    }
}

impl ToolSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub ui: UiSettings,
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".simfleet")
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SIMFLEET_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    data_dir().join("config.json")
}

pub fn load_config(trace_id: &str) -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path(), trace_id)
}

pub fn load_config_from_path(path: &Path, trace_id: &str) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), trace_id))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), trace_id))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(config: &AppConfig, path: &Path, trace_id: &str) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), trace_id))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), trace_id))?;
    Ok(())
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    let pool_defaults = PoolSettings::default();
    if config.pool.freshness_ms == 0 {
        config.pool.freshness_ms = pool_defaults.freshness_ms;
    }
    if config.pool.boot_timeout_secs == 0 {
        config.pool.boot_timeout_secs = pool_defaults.boot_timeout_secs;
    }
    if config.pool.boot_poll_ms < 50 {
        config.pool.boot_poll_ms = pool_defaults.boot_poll_ms;
    }
    if config.pool.default_family.trim().is_empty() {
        config.pool.default_family = pool_defaults.default_family;
    }
    if config.pool.claim_ttl_secs == 0 {
        config.pool.claim_ttl_secs = pool_defaults.claim_ttl_secs;
    }

    let ui_defaults = UiSettings::default();
    if config.ui.occlusion_max_attempts == 0 || config.ui.occlusion_max_attempts > 10 {
        config.ui.occlusion_max_attempts = ui_defaults.occlusion_max_attempts;
    }
    if !(2..=24).contains(&config.ui.probe_grid_points) {
        config.ui.probe_grid_points = ui_defaults.probe_grid_points;
    }
    if config.ui.probe_concurrency == 0 {
        config.ui.probe_concurrency = ui_defaults.probe_concurrency;
    }
    if config.ui.wait_interval_ms < 50 {
        config.ui.wait_interval_ms = ui_defaults.wait_interval_ms;
    }
    config
        .ui
        .static_elements
        .retain(|element| !element.identifier.trim().is_empty());

    if config.tools.command_timeout_secs == 0 {
        config.tools.command_timeout_secs = ToolSettings::default().command_timeout_secs;
    }
    if config.logging.log_level.trim().is_empty() {
        config.logging.log_level = LoggingSettings::default().log_level;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config_from_path(&dir.path().join("absent.json"), "trace").expect("load");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.pool.freshness_ms, 2_000);
        assert_eq!(config.pool.default_family, "iPhone");
    }

    #[test]
    fn partial_sections_keep_defaults_and_ignore_unknown_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"pool": {"boot_timeout_secs": 45}, "ui": {"probe_grid_points": 8}, "extra": true}"#,
        )
        .expect("write");
        let config = load_config_from_path(&path, "trace").expect("load");
        assert_eq!(config.pool.boot_timeout_secs, 45);
        assert_eq!(config.pool.boot_poll_ms, 500);
        assert_eq!(config.ui.probe_grid_points, 8);
        assert_eq!(config.cache.ui_ttl_ms, 3_000);
    }

    #[test]
    fn clamps_invalid_values() {
        let mut config = AppConfig::default();
        config.pool.freshness_ms = 0;
        config.pool.boot_poll_ms = 1;
        config.ui.occlusion_max_attempts = 99;
        config.ui.probe_grid_points = 1;
        config.ui.static_elements = vec![StaticElement {
            identifier: " ".to_string(),
            x: crate::app::ui::catalog::Offset::Start(10.0),
            y: crate::app::ui::catalog::Offset::End(10.0),
            tap_direct: false,
        }];
        config.tools.command_timeout_secs = 0;
        let validated = validate_config(config);
        assert_eq!(validated.pool.freshness_ms, 2_000);
        assert_eq!(validated.pool.boot_poll_ms, 500);
        assert_eq!(validated.ui.occlusion_max_attempts, 3);
        assert_eq!(validated.ui.probe_grid_points, 6);
        assert_eq!(validated.tools.command_timeout_secs, 30);
        assert!(validated.ui.static_elements.is_empty());
    }

    #[test]
    fn save_then_load_preserves_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.pool.state_path = "/tmp/pool.json".to_string();
        config.ui.static_elements = vec![StaticElement {
            identifier: "tab.home".to_string(),
            x: crate::app::ui::catalog::Offset::Fraction(0.125),
            y: crate::app::ui::catalog::Offset::End(58.0),
            tap_direct: true,
        }];
        save_config_to_path(&config, &path, "trace").expect("save");
        let loaded = load_config_from_path(&path, "trace").expect("load");
        assert_eq!(loaded.pool.resolved_state_path(), PathBuf::from("/tmp/pool.json"));
        assert_eq!(loaded.ui.static_elements, config.ui.static_elements);
    }
}
