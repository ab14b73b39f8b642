use crate::error::SinkError;
use crate::level::LogFormat;
use crate::record::{Metadata, Record};
use chrono::SecondsFormat;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;

/// Pure `Record -> bytes` conversion used by a sink worker.
///
/// Output is one complete line including the trailing newline.
pub trait Formatter: Send + Sync {
    fn format(&self, record: &Record) -> Result<Vec<u8>, SinkError>;
}

/// Formatter for the given console/file style.
pub fn formatter_for(format: LogFormat) -> Arc<dyn Formatter> {
    match format {
        LogFormat::Json => Arc::new(JsonFormatter),
        LogFormat::Text => Arc::new(TextFormatter),
    }
}

/// Wire shape of a JSON line. Field order here is the order on the wire.
#[derive(Serialize)]
struct WireRecord<'a> {
    timestamp: String,
    level: &'a str,
    service: &'a str,
    message: &'a str,
    hostname: &'a str,
    container_id: &'a str,
    environment: &'a str,
    metadata: &'a Metadata,
    sequence: u64,
}

impl<'a> WireRecord<'a> {
    fn from_record(record: &'a Record) -> Self {
        WireRecord {
            timestamp: record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            level: record.level.as_str(),
            service: &record.logger_name,
            message: &record.message,
            hostname: &record.hostname,
            container_id: &record.container_id,
            environment: &record.environment,
            metadata: &record.metadata,
            sequence: record.sequence,
        }
    }
}

/// Structured JSON lines, used by the aggregate file and the remote sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl JsonFormatter {
    /// The JSON document without the trailing newline.
    pub fn to_json(&self, record: &Record) -> Result<String, SinkError> {
        Ok(serde_json::to_string(&WireRecord::from_record(record))?)
    }
}

impl Formatter for JsonFormatter {
    fn format(&self, record: &Record) -> Result<Vec<u8>, SinkError> {
        let mut line = self.to_json(record)?;
        line.push('\n');
        Ok(line.into_bytes())
    }
}

/// Human-readable single line:
/// `<timestamp> - <logger> - <LEVEL> - <message> key=value ...`
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format(&self, record: &Record) -> Result<Vec<u8>, SinkError> {
        let mut line = String::with_capacity(96 + record.message.len());
        let _ = write!(
            line,
            "{} - {} - {} - {}",
            record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            record.logger_name,
            record.level,
            single_line(&record.message),
        );

        for (key, value) in &record.metadata {
            let rendered = match value {
                serde_json::Value::String(s) => quote_if_needed(&single_line(s)),
                other => other.to_string(),
            };
            let _ = write!(line, " {}={}", key, rendered);
        }
        line.push('\n');
        Ok(line.into_bytes())
    }
}

// Keeps every record on exactly one line.
fn single_line(s: &str) -> String {
    if s.contains(['\n', '\r']) {
        s.replace('\r', "\\r").replace('\n', "\\n")
    } else {
        s.to_string()
    }
}

fn quote_if_needed(s: &str) -> String {
    if s.is_empty() || s.contains([' ', '=', '"']) {
        format!("{:?}", s)
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::HostIdentity;
    use crate::level::Level;
    use crate::metadata;
    use serde_json::{json, Value};

    fn record(message: &str, meta: Metadata) -> Record {
        Record::build(
            "billing",
            Level::Warning,
            message,
            &Metadata::new(),
            meta,
            &HostIdentity::new("host-a", "N/A").with_environment(" Staging "),
        )
    }

    #[test]
    fn json_line_roundtrips_message_level_and_metadata() {
        let rec = record("card declined", metadata! { "user_id" => 42, "retry" => true });
        let bytes = JsonFormatter.format(&rec).unwrap();
        let line = String::from_utf8(bytes).unwrap();
        assert!(line.ends_with('\n'));

        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["message"], json!("card declined"));
        assert_eq!(value["level"], json!("WARNING"));
        assert_eq!(value["service"], json!("billing"));
        assert_eq!(value["hostname"], json!("host-a"));
        assert_eq!(value["container_id"], json!("N/A"));
        assert_eq!(value["environment"], json!("staging"));
        assert_eq!(value["metadata"]["user_id"], json!(42));
        assert_eq!(value["metadata"]["retry"], json!(true));
        assert_eq!(value["sequence"], json!(rec.sequence));
    }

    #[test]
    fn json_keys_follow_wire_order() {
        let line = JsonFormatter.to_json(&record("x", Metadata::new())).unwrap();
        let keys = [
            "\"timestamp\"",
            "\"level\"",
            "\"service\"",
            "\"message\"",
            "\"hostname\"",
            "\"container_id\"",
            "\"environment\"",
            "\"metadata\"",
            "\"sequence\"",
        ];
        let positions: Vec<usize> = keys.iter().map(|k| line.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{}", line);
    }

    #[test]
    fn json_timestamp_has_millis_and_z_suffix() {
        let rec = record("x", Metadata::new());
        let value: Value = serde_json::from_str(&JsonFormatter.to_json(&rec).unwrap()).unwrap();
        let ts = value["timestamp"].as_str().unwrap();
        assert!(ts.ends_with('Z'), "{}", ts);
        // 2024-01-01T00:00:00.000Z
        assert_eq!(ts.len(), 24, "{}", ts);
    }

    #[test]
    fn text_line_is_single_line_key_value() {
        let rec = record("first\nsecond", metadata! { "user" => "ada lovelace", "attempt" => 3 });
        let line = String::from_utf8(TextFormatter.format(&rec).unwrap()).unwrap();

        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.contains(" - billing - WARNING - first\\nsecond"), "{}", line);
        assert!(line.contains("attempt=3"), "{}", line);
        assert!(line.contains("user=\"ada lovelace\""), "{}", line);
    }
}
