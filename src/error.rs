use std::path::PathBuf;

/// Caller-visible errors. Only logger creation and system setup can fail;
/// emitting a record never does.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("logger name '{0}' is reserved for the aggregate stream")]
    ReservedName(String),

    #[error("invalid log level '{0}' (expected DEBUG, INFO, WARNING, ERROR or CRITICAL)")]
    InvalidLevel(String),

    #[error("invalid log format '{0}' (expected JSON or TEXT)")]
    InvalidFormat(String),

    #[error("invalid configuration value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("logging system is already initialized")]
    AlreadyInitialized,

    #[error("logging system is not initialized")]
    NotInitialized,

    #[error("logging system has been shut down")]
    ShutDown,

    #[error("failed to install global tracing subscriber: {0}")]
    SubscriberInstall(String),

    #[error("failed to spawn worker for sink '{sink}': {source}")]
    WorkerSpawn {
        sink: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Error::InvalidConfigValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure while formatting or delivering a single record.
///
/// These never reach producers: the sink worker counts them and reports
/// them to the diagnostic channel, then moves on to the next record.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to format record: {0}")]
    Format(String),

    #[error("remote backend rejected record: {0}")]
    Remote(String),

    #[error("no writable location for '{0}', sink is degraded")]
    Degraded(PathBuf),
}

#[cfg(feature = "remote")]
impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Remote(err.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Format(err.to_string())
    }
}
