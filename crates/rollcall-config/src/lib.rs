use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// SMS gateway connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    /// Provider API base URL.
    #[serde(default = "default_sms_base_url")]
    pub base_url: String,
    /// API key. Overridden by ROLLCALL_SMS_API_KEY when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Sender id used when a schedule does not carry one.
    #[serde(default = "default_sender")]
    pub default_sender: String,
    /// Request timeout in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_sms_base_url() -> String {
    "https://sms.example.com/v1".to_string()
}

fn default_sender() -> String {
    "RollCall".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            base_url: default_sms_base_url(),
            api_key: None,
            default_sender: default_sender(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

/// Attendance summary source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceConfig {
    /// Attendance API base URL.
    #[serde(default = "default_attendance_base_url")]
    pub base_url: String,
    /// API key. Overridden by ROLLCALL_ATTENDANCE_KEY when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_attendance_base_url() -> String {
    "https://attendance.example.com/api".to_string()
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            base_url: default_attendance_base_url(),
            api_key: None,
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

/// Sweep trigger and pacing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Hour of day (0-23) the daily sweep fires, in `timezone`.
    #[serde(default = "default_send_hour")]
    pub send_hour: u32,
    /// Minute of the hour (0-59).
    #[serde(default)]
    pub send_minute: u32,
    /// IANA timezone name the trigger time is interpreted in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Pause between consecutive sends within one sweep, in milliseconds.
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
    /// Default tenant country code for phone normalization.
    #[serde(default = "default_country_code")]
    pub country_code: String,
}

fn default_send_hour() -> u32 {
    7
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_stagger_ms() -> u64 {
    1500
}

fn default_country_code() -> String {
    "233".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            send_hour: default_send_hour(),
            send_minute: 0,
            timezone: default_timezone(),
            stagger_ms: default_stagger_ms(),
            country_code: default_country_code(),
        }
    }
}

/// Top-level rollcall configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollcallConfig {
    #[serde(default)]
    pub sms: SmsConfig,
    #[serde(default)]
    pub attendance: AttendanceConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// SQLite database path. Defaults to `<config dir>/rollcall.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

impl RollcallConfig {
    /// Resolve the database path, defaulting under the config dir.
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.db_path {
            Some(p) => Ok(p.clone()),
            None => Ok(ensure_config_dir()?.join("rollcall.db")),
        }
    }
}

/// Resolve the rollcall config directory (~/.rollcall/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".rollcall"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.rollcall/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
///
/// Loads `.env` first so secret overrides are visible.
pub fn load_config() -> Result<RollcallConfig, ConfigError> {
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<RollcallConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(apply_env_overrides(RollcallConfig::default()));
    }

    let content = std::fs::read_to_string(path)?;
    let config: RollcallConfig = json5::from_str(&content)?;
    Ok(apply_env_overrides(config))
}

/// Secrets come from the environment when set, beating the config file.
fn apply_env_overrides(mut config: RollcallConfig) -> RollcallConfig {
    if let Ok(key) = std::env::var("ROLLCALL_SMS_API_KEY") {
        config.sms.api_key = Some(key);
    }
    if let Ok(key) = std::env::var("ROLLCALL_ATTENDANCE_KEY") {
        config.attendance.api_key = Some(key);
    }
    config
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Save configuration to the default path.
pub fn save_config(config: &RollcallConfig) -> Result<(), ConfigError> {
    let dir = ensure_config_dir()?;
    let path = dir.join("config.json5");
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Io(std::io::Error::other(e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RollcallConfig::default();
        assert_eq!(config.scheduler.send_hour, 7);
        assert_eq!(config.scheduler.timezone, "UTC");
        assert_eq!(config.sms.default_sender, "RollCall");
        assert_eq!(config.sms.timeout_secs, 30);
    }

    #[test]
    fn test_json5_parse() {
        let json5_str = r#"{
            sms: {
                base_url: "https://gw.example.net/api",
                default_sender: "AcmeHR",
            },
            scheduler: {
                send_hour: 6,
                send_minute: 30,
                timezone: "Africa/Accra",
                stagger_ms: 500,
            },
        }"#;
        let config: RollcallConfig = json5::from_str(json5_str).unwrap();
        assert_eq!(config.sms.base_url, "https://gw.example.net/api");
        assert_eq!(config.sms.default_sender, "AcmeHR");
        assert_eq!(config.scheduler.send_hour, 6);
        assert_eq!(config.scheduler.send_minute, 30);
        assert_eq!(config.scheduler.timezone, "Africa/Accra");
        // Untouched sections keep their defaults.
        assert_eq!(config.attendance.timeout_secs, 30);
    }

    #[test]
    fn test_partial_sections_default() {
        let config: RollcallConfig = json5::from_str("{}").unwrap();
        assert_eq!(config.scheduler.stagger_ms, 1500);
        assert!(config.sms.api_key.is_none());
        assert!(config.db_path.is_none());
    }
}
