use crate::env::HostIdentity;
use crate::level::Level;
use crate::record::{Metadata, Record};
use crate::sink::Sink;
use std::fmt;
use std::sync::Arc;

/// Handle for one named logger.
///
/// Obtained from the registry and shared behind an `Arc`; every lookup of
/// the same name yields the same handle. Emitting never blocks on I/O and
/// never fails: the record is built once and pushed onto the queue of each
/// attached sink whose minimum level it meets.
pub struct Logger {
    name: String,
    min_level: Level,
    default_metadata: Metadata,
    sinks: Vec<Arc<Sink>>,
    identity: Arc<HostIdentity>,
}

impl Logger {
    pub fn new(
        name: impl Into<String>,
        min_level: Level,
        default_metadata: Metadata,
        sinks: Vec<Arc<Sink>>,
        identity: Arc<HostIdentity>,
    ) -> Self {
        Logger {
            name: name.into(),
            min_level,
            default_metadata,
            sinks,
            identity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Level this logger was created with; applies to its own file.
    pub fn min_level(&self) -> Level {
        self.min_level
    }

    pub fn default_metadata(&self) -> &Metadata {
        &self.default_metadata
    }

    pub fn sinks(&self) -> &[Arc<Sink>] {
        &self.sinks
    }

    /// Whether a record at `level` would reach at least one sink.
    pub fn enabled(&self, level: Level) -> bool {
        self.sinks.iter().any(|sink| sink.accepts(level))
    }

    pub fn log(&self, level: Level, message: impl Into<String>) {
        self.log_with(level, message, Metadata::new());
    }

    /// Emit a record with per-call metadata merged over the defaults.
    pub fn log_with(&self, level: Level, message: impl Into<String>, metadata: Metadata) {
        if !self.enabled(level) {
            return;
        }

        let record = Arc::new(Record::build(
            &self.name,
            level,
            message,
            &self.default_metadata,
            metadata,
            &self.identity,
        ));
        for sink in self.sinks.iter().filter(|sink| sink.accepts(level)) {
            sink.submit(Arc::clone(&record));
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(Level::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message);
    }

    pub fn critical(&self, message: impl Into<String>) {
        self.log(Level::Critical, message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("min_level", &self.min_level)
            .field("sinks", &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::format::{JsonFormatter, TextFormatter};
    use crate::memory_sink::MemorySink;
    use crate::sink::{SinkConfig, SinkKind};
    use serde_json::Value;
    use std::time::Duration;

    fn memory_sink(name: &str, min_level: Level, memory: &MemorySink) -> Arc<Sink> {
        let config = SinkConfig::new(name, SinkKind::RotatingFile, Arc::new(JsonFormatter)).min_level(min_level);
        Arc::new(Sink::new(config, Box::new(memory.clone()), Diagnostics::disabled()))
    }

    #[test]
    fn each_sink_filters_by_its_own_level() {
        let aggregate = MemorySink::new();
        let own = MemorySink::new();
        let sinks = vec![
            memory_sink("aggregate", Level::Info, &aggregate),
            memory_sink("own", Level::Warning, &own),
        ];
        let logger = Logger::new(
            "svc",
            Level::Warning,
            Metadata::new(),
            sinks.clone(),
            Arc::new(HostIdentity::new("h", "N/A")),
        );

        logger.debug("nobody");
        logger.info("aggregate only");
        logger.error("both");
        for sink in &sinks {
            sink.stop(Duration::from_secs(5));
        }

        assert_eq!(aggregate.lines().len(), 2);
        assert_eq!(own.lines().len(), 1);
        assert!(!logger.enabled(Level::Debug));
        assert_eq!(sinks[0].stats().submitted, 2);
    }

    #[test]
    fn defaults_and_call_metadata_are_merged() {
        let memory = MemorySink::new();
        let sink = memory_sink("m", Level::Debug, &memory);
        let logger = Logger::new(
            "billing",
            Level::Debug,
            crate::metadata! { "service" => "billing", "region" => "eu" },
            vec![Arc::clone(&sink)],
            Arc::new(HostIdentity::new("h", "N/A")),
        );

        logger.log_with(Level::Info, "charged", crate::metadata! { "region" => "us", "amount" => 12 });
        sink.stop(Duration::from_secs(5));

        let line: Value = serde_json::from_str(&memory.lines()[0]).unwrap();
        assert_eq!(line["service"], "billing");
        assert_eq!(line["metadata"]["service"], "billing");
        assert_eq!(line["metadata"]["region"], "us");
        assert_eq!(line["metadata"]["amount"], 12);
    }

    #[test]
    fn one_record_is_shared_by_all_sinks() {
        let a = MemorySink::new();
        let b = MemorySink::new();
        let sink_a = memory_sink("a", Level::Debug, &a);
        let text = SinkConfig::new("b", SinkKind::Console, Arc::new(TextFormatter));
        let sink_b = Arc::new(Sink::new(text, Box::new(b.clone()), Diagnostics::disabled()));
        let logger = Logger::new(
            "svc",
            Level::Debug,
            Metadata::new(),
            vec![Arc::clone(&sink_a), Arc::clone(&sink_b)],
            Arc::new(HostIdentity::new("h", "N/A")),
        );

        logger.critical("boom");
        sink_a.stop(Duration::from_secs(5));
        sink_b.stop(Duration::from_secs(5));

        assert_eq!(a.sequences(), b.sequences());
        assert!(b.lines()[0].contains(" - svc - CRITICAL - boom"));
    }
}
