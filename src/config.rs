use std::fmt;
use std::fs;
use std::path::Path;

use chrono_tz::Tz;
use serde::Deserialize;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "ROOMCLERK_CONFIG";
/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "./config/roomclerk.json";

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_DIGEST_HOUR: u32 = 8;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 5;

#[derive(Debug)]
pub enum ConfigError {
    Read(String, String),
    Parse(String),
    UnknownTimezone(String),
    BadDigestHour(u32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(path, e) => write!(f, "cannot read config file {path}: {e}"),
            ConfigError::Parse(e) => write!(f, "cannot parse config file: {e}"),
            ConfigError::UnknownTimezone(tz) => write!(f, "unknown timezone: {tz}"),
            ConfigError::BadDigestHour(hour) => {
                write!(f, "digest_hour must be 0..24, got {hour}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// On-disk shape of the config file. Secrets arrive here ready to use; any
/// missing or unparseable required field aborts startup.
#[derive(Debug, Deserialize)]
struct RawConfig {
    calendar_id: String,
    timezone: String,
    slash_token: String,
    slack_token: String,
    calendar_token: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    digest_hour: Option<u32>,
    #[serde(default)]
    sync_interval_secs: Option<u64>,
    #[serde(default)]
    metrics_port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub calendar_id: String,
    /// Display zone, captured once at startup.
    pub timezone: Tz,
    /// Shared secret the inbound webhook checks before any processing.
    pub slash_token: String,
    pub slack_token: String,
    pub calendar_token: String,
    pub port: u16,
    pub digest_hour: u32,
    pub sync_interval_secs: u64,
    pub metrics_port: Option<u16>,
}

impl Config {
    /// Load from `ROOMCLERK_CONFIG`, or the default path.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let buf = fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e.to_string()))?;
        let raw: RawConfig =
            serde_json::from_str(&buf).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let timezone: Tz = raw
            .timezone
            .parse()
            .map_err(|_| ConfigError::UnknownTimezone(raw.timezone.clone()))?;
        let digest_hour = raw.digest_hour.unwrap_or(DEFAULT_DIGEST_HOUR);
        if digest_hour >= 24 {
            return Err(ConfigError::BadDigestHour(digest_hour));
        }

        Ok(Config {
            calendar_id: raw.calendar_id,
            timezone,
            slash_token: raw.slash_token,
            slack_token: raw.slack_token,
            calendar_token: raw.calendar_token,
            port: raw.port.unwrap_or(DEFAULT_PORT),
            digest_hour,
            sync_interval_secs: raw.sync_interval_secs.unwrap_or(DEFAULT_SYNC_INTERVAL_SECS),
            metrics_port: raw.metrics_port,
        })
    }
}
