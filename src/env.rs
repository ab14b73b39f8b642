//! Environment variable names and process identity detection.
//!
//! These are helpers for the bundled configuration loader; the pipeline
//! itself only ever sees a [`Settings`](crate::config::Settings) value and a
//! [`HostIdentity`].

use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Minimum level accepted by the aggregate sinks.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Console output style, `JSON` or `TEXT`.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Directory for rotating log files.
pub const LOGS_DIR_ENV: &str = "LOGS_DIR";

/// `size` or `time`.
pub const LOG_ROTATION_TYPE_ENV: &str = "LOG_ROTATION_TYPE";
pub const LOG_ROTATION_MAX_BYTES_ENV: &str = "LOG_ROTATION_MAX_BYTES";
pub const LOG_ROTATION_BACKUP_COUNT_ENV: &str = "LOG_ROTATION_BACKUP_COUNT";
pub const LOG_ROTATION_WHEN_ENV: &str = "LOG_ROTATION_WHEN";
pub const LOG_ROTATION_INTERVAL_ENV: &str = "LOG_ROTATION_INTERVAL";

/// Remote indexer base URL, e.g. `http://127.0.0.1:9200`. Empty means no
/// remote sink.
pub const REMOTE_ENDPOINT_ENV: &str = "ELASTICSEARCH_HOST";

/// `true` enables the internal diagnostic channel.
pub const INTERNAL_DIAGNOSTICS_ENV: &str = "ENABLE_INTERNAL_LOGGER";

pub const LOG_QUEUE_CAPACITY_ENV: &str = "LOG_QUEUE_CAPACITY";
pub const LOG_DRAIN_TIMEOUT_MS_ENV: &str = "LOG_DRAIN_TIMEOUT_MS";
pub const LOG_BATCH_SIZE_ENV: &str = "LOG_BATCH_SIZE";
pub const LOG_FLUSH_INTERVAL_MS_ENV: &str = "LOG_FLUSH_INTERVAL_MS";

/// Forces container detection on or off.
pub const CONTAINER_OVERRIDE_ENV: &str = "IS_CONTAINER_OVERRIDE";

/// Deployment environment stamped on every record, lowercased.
pub const ENVIRONMENT_ENV: &str = "ENVIRONMENT";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read an environment variable, treating blank values as unset.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Process-wide identity copied by reference into every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub hostname: Arc<str>,
    pub container_id: Arc<str>,
    pub environment: Arc<str>,
    pub in_container: bool,
}

impl HostIdentity {
    /// Identity with fixed values, mostly for tests and embedding.
    pub fn new(hostname: &str, container_id: &str) -> Self {
        HostIdentity {
            hostname: Arc::from(hostname),
            container_id: Arc::from(container_id),
            environment: Arc::from("local"),
            in_container: container_id != "N/A",
        }
    }

    pub fn with_environment(mut self, environment: &str) -> Self {
        self.environment = Arc::from(normalize_environment(environment).as_str());
        self
    }

    /// The identity of the running process, resolved on first use.
    pub fn current() -> Arc<HostIdentity> {
        static CURRENT: Lazy<Arc<HostIdentity>> = Lazy::new(|| Arc::new(HostIdentity::detect()));
        Arc::clone(&CURRENT)
    }

    fn detect() -> Self {
        let in_container = is_running_in_container();
        let container_id = if in_container {
            read_container_id().unwrap_or_else(|| "N/A".to_string())
        } else {
            "N/A".to_string()
        };

        HostIdentity {
            hostname: Arc::from(detect_hostname().as_str()),
            container_id: Arc::from(container_id.as_str()),
            environment: Arc::from(normalize_environment(&env_or(ENVIRONMENT_ENV, "local")).as_str()),
            in_container,
        }
    }
}

fn normalize_environment(raw: &str) -> String {
    match raw.trim() {
        "" => "local".to_string(),
        value => value.to_lowercase(),
    }
}

fn detect_hostname() -> String {
    #[cfg(unix)]
    {
        if let Ok(name) = nix::unistd::gethostname() {
            if let Some(name) = name.to_str().filter(|n| !n.is_empty()) {
                return name.to_string();
            }
        }
    }

    env_opt("HOSTNAME")
        .or_else(|| env_opt("COMPUTERNAME"))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Container detection honours [`CONTAINER_OVERRIDE_ENV`] before probing
/// the filesystem.
pub fn is_running_in_container() -> bool {
    if let Some(value) = env_opt(CONTAINER_OVERRIDE_ENV) {
        return value.eq_ignore_ascii_case("true");
    }
    if Path::new("/.dockerenv").exists() {
        return true;
    }
    std::fs::read_to_string("/proc/1/cgroup")
        .map(|cgroup| cgroup.contains("docker"))
        .unwrap_or(false)
}

fn read_container_id() -> Option<String> {
    let cgroup = std::fs::read_to_string("/proc/self/cgroup").ok()?;
    parse_container_id(&cgroup)
}

fn parse_container_id(cgroup: &str) -> Option<String> {
    cgroup
        .lines()
        .last()?
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Where log files go when nothing is configured.
pub fn default_logs_dir(in_container: bool) -> PathBuf {
    match env_opt(LOGS_DIR_ENV) {
        Some(dir) => PathBuf::from(dir),
        None if in_container => PathBuf::from("/var/logs"),
        None => process_local_logs_dir(),
    }
}

/// `<cwd>/logs`, the last-resort writable location.
pub fn process_local_logs_dir() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("logs")
}
