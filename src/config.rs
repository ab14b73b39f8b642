use crate::env::{
    self, INTERNAL_DIAGNOSTICS_ENV, LOGS_DIR_ENV, LOG_BATCH_SIZE_ENV, LOG_DRAIN_TIMEOUT_MS_ENV,
    LOG_FLUSH_INTERVAL_MS_ENV, LOG_FORMAT_ENV, LOG_LEVEL_ENV, LOG_QUEUE_CAPACITY_ENV, LOG_ROTATION_BACKUP_COUNT_ENV, LOG_ROTATION_INTERVAL_ENV, LOG_ROTATION_MAX_BYTES_ENV,
    LOG_ROTATION_TYPE_ENV, LOG_ROTATION_WHEN_ENV, REMOTE_ENDPOINT_ENV,
};
use crate::error::{Error, Result};
use crate::level::{Level, LogFormat};
use crate::rotation::{RotationPolicy, RotationWhen};
use crate::sink::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, DEFAULT_QUEUE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_ROTATION_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_ROTATION_BACKUP_COUNT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationType {
    Size,
    Time,
}

impl FromStr for RotationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "size" => Ok(RotationType::Size),
            "time" => Ok(RotationType::Time),
            other => Err(Error::invalid("rotation_type", format!("'{}' is not one of size, time", other))),
        }
    }
}

/// Static configuration consumed by [`LogSystem::start`](crate::lifecycle::LogSystem::start).
///
/// Every field has a default, so a partial TOML/JSON document or
/// `Settings::default()` with a few overrides is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Minimum severity accepted by the aggregate sinks.
    pub log_level: Level,
    /// Console output style.
    pub log_format: LogFormat,
    /// `None` resolves to the environment default at startup.
    pub logs_dir: Option<PathBuf>,
    /// Used when `logs_dir` cannot be created or opened.
    pub fallback_logs_dir: Option<PathBuf>,
    pub rotation_type: RotationType,
    pub rotation_max_bytes: u64,
    pub rotation_backup_count: u32,
    pub rotation_when: RotationWhen,
    pub rotation_interval: u32,
    /// Remote indexer base URL. `None` means no remote sink is built.
    pub remote_endpoint: Option<String>,
    pub remote_index: String,
    pub remote_timeout_ms: u64,
    pub enable_internal_diagnostics: bool,
    pub queue_capacity: usize,
    /// Records a sink worker delivers per batch.
    pub batch_size: usize,
    /// Longest a partial batch waits before delivery.
    pub flush_interval_ms: u64,
    pub drain_timeout_ms: u64,
    pub enable_console: bool,
    /// Minimum level of a per-logger file when the caller gives none.
    pub default_logger_level: Level,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            log_level: Level::Info,
            log_format: LogFormat::Json,
            logs_dir: None,
            fallback_logs_dir: None,
            rotation_type: RotationType::Size,
            rotation_max_bytes: DEFAULT_ROTATION_MAX_BYTES,
            rotation_backup_count: DEFAULT_ROTATION_BACKUP_COUNT,
            rotation_when: RotationWhen::Midnight,
            rotation_interval: 1,
            remote_endpoint: None,
            remote_index: "application-logs".to_string(),
            remote_timeout_ms: 5_000,
            enable_internal_diagnostics: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL.as_millis() as u64,
            drain_timeout_ms: 3_000,
            enable_console: true,
            default_logger_level: Level::Debug,
        }
    }
}

impl Settings {
    /// Build settings from the process environment.
    ///
    /// Unset or blank variables keep their defaults; set but malformed
    /// ones are an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env::env_opt)
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(v) = lookup(LOG_LEVEL_ENV) {
            settings.log_level = v.parse()?;
        }
        if let Some(v) = lookup(LOG_FORMAT_ENV) {
            settings.log_format = v.parse()?;
        }
        if let Some(v) = lookup(LOGS_DIR_ENV) {
            settings.logs_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(LOG_ROTATION_TYPE_ENV) {
            settings.rotation_type = v.parse()?;
        }
        if let Some(v) = lookup(LOG_ROTATION_MAX_BYTES_ENV) {
            settings.rotation_max_bytes = parse_number(LOG_ROTATION_MAX_BYTES_ENV, &v)?;
        }
        if let Some(v) = lookup(LOG_ROTATION_BACKUP_COUNT_ENV) {
            settings.rotation_backup_count = parse_number(LOG_ROTATION_BACKUP_COUNT_ENV, &v)?;
        }
        if let Some(v) = lookup(LOG_ROTATION_WHEN_ENV) {
            settings.rotation_when = v.parse()?;
        }
        if let Some(v) = lookup(LOG_ROTATION_INTERVAL_ENV) {
            settings.rotation_interval = parse_number(LOG_ROTATION_INTERVAL_ENV, &v)?;
        }
        settings.remote_endpoint = lookup(REMOTE_ENDPOINT_ENV);
        if let Some(v) = lookup(INTERNAL_DIAGNOSTICS_ENV) {
            settings.enable_internal_diagnostics = parse_bool(INTERNAL_DIAGNOSTICS_ENV, &v)?;
        }
        if let Some(v) = lookup(LOG_QUEUE_CAPACITY_ENV) {
            settings.queue_capacity = parse_number(LOG_QUEUE_CAPACITY_ENV, &v)?;
        }
        if let Some(v) = lookup(LOG_DRAIN_TIMEOUT_MS_ENV) {
            settings.drain_timeout_ms = parse_number(LOG_DRAIN_TIMEOUT_MS_ENV, &v)?;
        }
        if let Some(v) = lookup(LOG_BATCH_SIZE_ENV) {
            settings.batch_size = parse_number(LOG_BATCH_SIZE_ENV, &v)?;
        }
        if let Some(v) = lookup(LOG_FLUSH_INTERVAL_MS_ENV) {
            settings.flush_interval_ms = parse_number(LOG_FLUSH_INTERVAL_MS_ENV, &v)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::invalid("queue_capacity", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(Error::invalid("batch_size", "must be at least 1"));
        }
        if self.rotation_type == RotationType::Size && self.rotation_max_bytes == 0 {
            return Err(Error::invalid("rotation_max_bytes", "must be greater than zero for size rotation"));
        }
        if self.rotation_type == RotationType::Time && self.rotation_interval == 0 {
            return Err(Error::invalid("rotation_interval", "must be at least 1 for time rotation"));
        }
        if let Some(endpoint) = &self.remote_endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(Error::invalid("remote_endpoint", format!("'{}' is not an http(s) URL", endpoint)));
            }
        }
        Ok(())
    }

    pub fn rotation_policy(&self) -> RotationPolicy {
        match self.rotation_type {
            RotationType::Size => RotationPolicy::Size {
                max_bytes: self.rotation_max_bytes,
                max_backups: self.rotation_backup_count,
            },
            RotationType::Time => RotationPolicy::Time {
                when: self.rotation_when,
                interval: self.rotation_interval,
                max_backups: self.rotation_backup_count,
            },
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

fn parse_number<T: FromStr>(field: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::invalid(field, format!("'{}' is not a valid number", raw)))
}

fn parse_bool(field: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::invalid(field, format!("'{}' is not a boolean", raw))),
    }
}
