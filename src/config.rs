use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Error, Result};

const CONFIG_FILE_NAME: &str = "settings.json";

fn default_base_url() -> String {
    "https://api.example-rewards.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_daily_hour() -> u32 {
    9
}

fn default_jitter_max_minutes() -> u64 {
    30
}

fn default_followup_delay_hours() -> u64 {
    6
}

fn default_refresh_max_attempts() -> u32 {
    3
}

fn default_refresh_backoff_secs() -> u64 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the remote task/rewards service.
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Hour of day (0-23) the daily run fires, in the configured offset.
    pub daily_hour: u32,
    /// Fixed UTC offset, in hours, the daily hour is interpreted in.
    pub utc_offset_hours: i32,
    /// Upper bound of the uniform random delay added to the daily fire.
    pub jitter_max_minutes: u64,
    /// Hours after a completed batch before the follow-up batch runs.
    pub followup_delay_hours: u64,
    pub refresh_max_attempts: u32,
    /// Linear backoff base: attempt N sleeps N * this many seconds.
    pub refresh_backoff_secs: u64,
    /// Low-frequency token refresh independent of task runs; 0 disables it.
    pub token_warm_interval_minutes: u64,
    /// Root directory for the persisted state store; None means the
    /// platform data dir.
    pub data_dir: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            daily_hour: default_daily_hour(),
            utc_offset_hours: 8,
            jitter_max_minutes: default_jitter_max_minutes(),
            followup_delay_hours: default_followup_delay_hours(),
            refresh_max_attempts: default_refresh_max_attempts(),
            refresh_backoff_secs: default_refresh_backoff_secs(),
            token_warm_interval_minutes: 0,
            data_dir: None,
        }
    }
}

impl AppConfig {
    pub fn resolved_data_dir(&self) -> PathBuf {
        match self.data_dir.as_deref() {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir.trim()),
            _ => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("questd"),
        }
    }
}

fn is_valid_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

/// Clamp, trim, and sanitise every field so the rest of the engine can
/// trust it.
fn validate(mut cfg: AppConfig) -> AppConfig {
    let base = cfg.base_url.trim().trim_end_matches('/').to_string();
    if base.is_empty() || !is_valid_url(&base) {
        warn!("config: invalid base_url '{}', resetting to default", cfg.base_url);
        cfg.base_url = default_base_url();
    } else {
        cfg.base_url = base;
    }

    cfg.request_timeout_secs = cfg.request_timeout_secs.clamp(1, 300);

    if cfg.daily_hour > 23 {
        warn!("config: daily_hour {} out of range, resetting to default", cfg.daily_hour);
        cfg.daily_hour = default_daily_hour();
    }
    if !(-12..=14).contains(&cfg.utc_offset_hours) {
        warn!("config: utc_offset_hours {} out of range, resetting to 0", cfg.utc_offset_hours);
        cfg.utc_offset_hours = 0;
    }

    // -- schedule bounds --
    cfg.jitter_max_minutes = cfg.jitter_max_minutes.min(180);
    cfg.followup_delay_hours = cfg.followup_delay_hours.clamp(1, 23);
    cfg.refresh_max_attempts = cfg.refresh_max_attempts.clamp(1, 10);
    cfg.refresh_backoff_secs = cfg.refresh_backoff_secs.clamp(1, 60);
    cfg.token_warm_interval_minutes = cfg.token_warm_interval_minutes.min(1_440);

    cfg.data_dir = cfg.data_dir.and_then(|path| {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    });

    cfg
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

pub async fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        info!("no config file at {}, using defaults", path.display());
        return Ok(AppConfig::default());
    }

    debug!("loading config from {}", path.display());

    let content = fs::read_to_string(path)
        .await
        .map_err(|err| Error::Store(format!("failed to read config: {err}")))?;

    let parsed: AppConfig = serde_json::from_str(&content)
        .map_err(|err| Error::Store(format!("invalid config JSON: {err}")))?;

    Ok(validate(parsed))
}

pub async fn save_config(path: &Path, input: AppConfig) -> Result<AppConfig> {
    let validated = validate(input);

    info!("saving config to {}", path.display());

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| Error::Store(format!("failed to create config directory: {err}")))?;
    }

    let serialized = serde_json::to_string_pretty(&validated)
        .map_err(|err| Error::Store(format!("failed to serialize config: {err}")))?;

    fs::write(path, serialized)
        .await
        .map_err(|err| Error::Store(format!("failed to write config: {err}")))?;

    Ok(validated)
}
