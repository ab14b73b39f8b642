use crate::env::HostIdentity;
use crate::level::Level;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Flat, key-ordered metadata attached to a record.
pub type Metadata = BTreeMap<String, serde_json::Value>;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1
}

/// One log event. Built once by [`Record::build`] and never mutated; sinks
/// share it behind an `Arc`.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub logger_name: String,
    pub message: String,
    pub metadata: Metadata,
    pub hostname: Arc<str>,
    pub container_id: Arc<str>,
    pub environment: Arc<str>,
    pub thread_id: String,
    pub thread_name: Option<String>,
    /// Process-wide emission counter; breaks timestamp ties across producers.
    pub sequence: u64,
}

impl Record {
    /// Construct a record, merging `defaults` with `caller` metadata.
    ///
    /// **Parameters**
    /// - `logger_name`: name of the emitting logger.
    /// - `level`: severity of the event.
    /// - `message`: free-form message.
    /// - `defaults`: the logger's default metadata.
    /// - `caller`: per-call metadata; wins over `defaults` on key collision.
    /// - `identity`: hostname, container id and environment copied into
    ///   the record.
    ///
    /// Never blocks and never fails. Takes exactly one value from the
    /// process-wide sequence counter.
    pub fn build(
        logger_name: &str,
        level: Level,
        message: impl Into<String>,
        defaults: &Metadata,
        caller: Metadata,
        identity: &HostIdentity,
    ) -> Record {
        let metadata = merge_metadata(defaults, caller);
        let current = std::thread::current();

        Record {
            timestamp: Utc::now().trunc_subsecs(6),
            level,
            logger_name: logger_name.to_string(),
            message: message.into(),
            metadata,
            hostname: Arc::clone(&identity.hostname),
            container_id: Arc::clone(&identity.container_id),
            environment: Arc::clone(&identity.environment),
            thread_id: format!("{:?}", current.id()),
            thread_name: current.name().map(str::to_string),
            sequence: next_sequence(),
        }
    }
}

/// `defaults ⊕ caller`, caller wins. Nested mappings are kept as values.
pub fn merge_metadata(defaults: &Metadata, caller: Metadata) -> Metadata {
    if defaults.is_empty() {
        return caller;
    }
    let mut merged = defaults.clone();
    merged.extend(caller);
    merged
}

/// Convert any value into a metadata value.
///
/// Values that cannot be represented as JSON (non-string map keys, failing
/// `Serialize` impls) are stored as their `Debug` representation.
pub fn meta_value<T>(value: &T) -> serde_json::Value
where
    T: Serialize + fmt::Debug + ?Sized,
{
    serde_json::to_value(value).unwrap_or_else(|_| serde_json::Value::String(format!("{:?}", value)))
}

/// Build a [`Metadata`] map: `metadata! { "user_id" => 42, "role" => "admin" }`.
#[macro_export]
macro_rules! metadata {
    () => {
        $crate::record::Metadata::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::record::Metadata::new();
        $(
            map.insert(::std::string::ToString::to_string(&$key), $crate::record::meta_value(&$value));
        )+
        map
    }};
}
