use crate::config::Settings;
use crate::console::ConsoleSink;
use crate::diagnostics::{Diagnostics, InternalErrorReport, InternalErrorSource, INTERNAL_TARGET};
use crate::env::{self, HostIdentity};
use crate::error::{Error, Result};
use crate::file::RotatingFileSink;
use crate::format::{formatter_for, JsonFormatter, TextFormatter};
use crate::level::{Level, LogFormat};
use crate::logger::Logger;
use crate::registry::{LoggerOptions, LoggerRegistry, RESERVED_NAME};
use crate::sink::{Sink, SinkConfig, SinkKind, SinkStatsSnapshot};
use parking_lot::Mutex;
use std::collections::hash_map::{Entry, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// File receiving every record from every logger, as JSON lines.
pub const AGGREGATE_FILE: &str = "app.log";

/// Owns the sinks, the logger registry and the diagnostic channel.
///
/// `start` builds the aggregate sinks and starts their workers; loggers
/// obtained afterwards get the aggregate sinks plus a text file of their
/// own. `shutdown` (or dropping the system) drains every sink under one
/// deadline: remote first, then files, then the console.
pub struct LogSystem {
    settings: Mutex<Settings>,
    identity: Arc<HostIdentity>,
    logs_dir: Option<PathBuf>,
    fallback_dir: PathBuf,
    aggregate: Vec<Arc<Sink>>,
    sinks: Mutex<Vec<Arc<Sink>>>,
    /// Per-logger file sinks by file stem. Names that map to the same file
    /// share one sink.
    file_sinks: Mutex<HashMap<String, Arc<Sink>>>,
    registry: LoggerRegistry,
    diagnostics: Diagnostics,
    reports: Mutex<Option<mpsc::Receiver<InternalErrorReport>>>,
    shut_down: AtomicBool,
}

impl LogSystem {
    pub fn start(settings: Settings) -> Result<Self> {
        Self::start_with_identity(settings, HostIdentity::current())
    }

    /// Start with an explicit identity instead of the detected one.
    pub fn start_with_identity(settings: Settings, identity: Arc<HostIdentity>) -> Result<Self> {
        settings.validate()?;

        let (diagnostics, reports) = if settings.enable_internal_diagnostics {
            let (diagnostics, rx) = Diagnostics::channel();
            (diagnostics, Some(rx))
        } else {
            (Diagnostics::disabled(), None)
        };

        let fallback_dir = settings
            .fallback_logs_dir
            .clone()
            .unwrap_or_else(env::process_local_logs_dir);
        let primary_dir = settings
            .logs_dir
            .clone()
            .unwrap_or_else(|| env::default_logs_dir(identity.in_container));
        let logs_dir = resolve_logs_dir(&primary_dir, &fallback_dir, &diagnostics);

        let mut system = LogSystem {
            settings: Mutex::new(settings),
            identity,
            logs_dir,
            fallback_dir,
            aggregate: Vec::new(),
            sinks: Mutex::new(Vec::new()),
            file_sinks: Mutex::new(HashMap::new()),
            registry: LoggerRegistry::new(),
            diagnostics,
            reports: Mutex::new(reports),
            shut_down: AtomicBool::new(false),
        };

        system.aggregate = system.build_aggregate_sinks();
        for sink in &system.aggregate {
            sink.start()?;
        }
        system.sinks.lock().extend(system.aggregate.iter().cloned());

        tracing::debug!(
            target: INTERNAL_TARGET,
            logs_dir = ?system.logs_dir,
            sinks = system.aggregate.len(),
            "logging system started"
        );
        Ok(system)
    }

    fn build_aggregate_sinks(&self) -> Vec<Arc<Sink>> {
        let settings = self.settings.lock().clone();
        let mut sinks = Vec::new();

        if settings.enable_console {
            let config = SinkConfig::new("console", SinkKind::Console, formatter_for(settings.log_format))
                .min_level(settings.log_level)
                .capacity(settings.queue_capacity)
                .batch_size(settings.batch_size)
                .flush_interval(settings.flush_interval());
            sinks.push(Arc::new(Sink::new(
                config,
                Box::new(ConsoleSink::stdout()),
                self.diagnostics.clone(),
            )));
        }

        let config = SinkConfig::new(RESERVED_NAME, SinkKind::RotatingFile, Arc::new(JsonFormatter))
            .min_level(settings.log_level)
            .capacity(settings.queue_capacity)
            .batch_size(settings.batch_size)
            .flush_interval(settings.flush_interval());
        sinks.push(Arc::new(Sink::new(
            config,
            Box::new(self.file_destination(AGGREGATE_FILE, &settings)),
            self.diagnostics.clone(),
        )));

        if let Some(endpoint) = settings.remote_endpoint.as_deref() {
            if let Some(sink) = self.remote_sink(endpoint, &settings) {
                sinks.push(sink);
            }
        }

        sinks
    }

    #[cfg(feature = "remote")]
    fn remote_sink(&self, endpoint: &str, settings: &Settings) -> Option<Arc<Sink>> {
        use crate::remote::{RemoteConfig, RemoteSink};

        let remote = RemoteConfig {
            endpoint: endpoint.to_string(),
            index: settings.remote_index.clone(),
            timeout: settings.remote_timeout(),
        };
        match RemoteSink::new(remote) {
            Ok(destination) => {
                let config = SinkConfig::new("remote", SinkKind::Remote, Arc::new(JsonFormatter))
                    .min_level(settings.log_level)
                    .capacity(settings.queue_capacity)
                    .batch_size(settings.batch_size)
                    .flush_interval(settings.flush_interval());
                Some(Arc::new(Sink::new(config, Box::new(destination), self.diagnostics.clone())))
            }
            Err(err) => {
                self.diagnostics.report(
                    InternalErrorSource::WorkerStartup {
                        sink: "remote".to_string(),
                    },
                    &err,
                    Some(endpoint.to_string()),
                );
                None
            }
        }
    }

    #[cfg(not(feature = "remote"))]
    fn remote_sink(&self, endpoint: &str, _settings: &Settings) -> Option<Arc<Sink>> {
        tracing::warn!(
            target: INTERNAL_TARGET,
            endpoint,
            "remote endpoint configured but the `remote` feature is disabled"
        );
        None
    }

    fn file_destination(&self, file_name: &str, settings: &Settings) -> RotatingFileSink {
        let policy = settings.rotation_policy();
        match &self.logs_dir {
            Some(dir) => RotatingFileSink::new(dir.join(file_name), policy)
                .with_fallback_dir(&self.fallback_dir)
                .with_diagnostics(self.diagnostics.clone()),
            None => RotatingFileSink::degraded(PathBuf::from(file_name), policy),
        }
    }

    /// Handle for `name` with default options.
    pub fn get_logger(&self, name: &str) -> Result<Arc<Logger>> {
        self.get_logger_with(name, LoggerOptions::default())
    }

    /// Handle for `name`, created with `options` on first lookup.
    ///
    /// **Errors**
    /// - [`Error::ReservedName`] for the aggregate name without
    ///   `options.internal`, and for any other name whose file would be
    ///   the aggregate file.
    /// - [`Error::ShutDown`] when creating a new logger after shutdown.
    pub fn get_logger_with(&self, name: &str, options: LoggerOptions) -> Result<Arc<Logger>> {
        self.registry
            .get_or_try_insert_with(name, &options, || self.build_logger(name, &options))
    }

    fn build_logger(&self, name: &str, options: &LoggerOptions) -> Result<Logger> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        let settings = self.settings.lock().clone();

        if name == RESERVED_NAME {
            return Ok(Logger::new(
                name,
                settings.log_level,
                options.metadata.clone(),
                self.aggregate.clone(),
                Arc::clone(&self.identity),
            ));
        }

        let stem = file_stem(name);
        if stem.eq_ignore_ascii_case(RESERVED_NAME) {
            return Err(Error::ReservedName(name.to_string()));
        }

        let min_level = options.min_level.unwrap_or(settings.default_logger_level);
        let own = match self.file_sinks.lock().entry(stem) {
            // The first logger's level stays in force for the shared file.
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let config = SinkConfig::new(entry.key().as_str(), SinkKind::RotatingFile, Arc::new(TextFormatter))
                    .min_level(min_level)
                    .capacity(settings.queue_capacity)
                    .batch_size(settings.batch_size)
                    .flush_interval(settings.flush_interval());
                let file_name = format!("{}.log", entry.key());
                let sink = Arc::new(Sink::new(
                    config,
                    Box::new(self.file_destination(&file_name, &settings)),
                    self.diagnostics.clone(),
                ));
                sink.start()?;
                self.sinks.lock().push(Arc::clone(&sink));
                Arc::clone(entry.insert(sink))
            }
        };

        let mut sinks = self.aggregate.clone();
        sinks.push(own);
        tracing::debug!(target: INTERNAL_TARGET, logger = name, level = %min_level, "logger created");
        Ok(Logger::new(
            name,
            min_level,
            options.metadata.clone(),
            sinks,
            Arc::clone(&self.identity),
        ))
    }

    /// Swap the aggregate minimum level and the console format on live sinks.
    pub fn apply_settings(&self, level: Level, format: LogFormat) {
        let mut settings = self.settings.lock();
        settings.log_level = level;
        settings.log_format = format;

        for sink in &self.aggregate {
            sink.set_min_level(level);
            if sink.kind() == SinkKind::Console {
                sink.set_formatter(formatter_for(format));
            }
        }
        tracing::debug!(target: INTERNAL_TARGET, level = %level, format = ?format, "logging settings applied");
    }

    pub fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    pub fn identity(&self) -> &Arc<HostIdentity> {
        &self.identity
    }

    /// Directory the file sinks write to, `None` when file output is degraded.
    pub fn logs_dir(&self) -> Option<&Path> {
        self.logs_dir.as_deref()
    }

    pub fn registry(&self) -> &LoggerRegistry {
        &self.registry
    }

    pub fn sinks(&self) -> Vec<Arc<Sink>> {
        self.sinks.lock().clone()
    }

    pub fn stats(&self) -> Vec<SinkStatsSnapshot> {
        self.sinks.lock().iter().map(|sink| sink.stats()).collect()
    }

    /// Receiver for internal error reports. `None` if diagnostics are
    /// disabled or the receiver was already taken.
    pub fn take_diagnostics(&self) -> Option<mpsc::Receiver<InternalErrorReport>> {
        self.reports.lock().take()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Drain and stop every sink within the configured drain timeout.
    pub fn shutdown(&self) {
        let timeout = self.settings.lock().drain_timeout();
        self.shutdown_with_timeout(timeout);
    }

    /// Drain and stop every sink, giving all of them together `timeout`.
    ///
    /// Idempotent; only the first call does any work.
    pub fn shutdown_with_timeout(&self, timeout: Duration) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let deadline = Instant::now() + timeout;

        let mut sinks = self.sinks.lock().clone();
        sinks.sort_by_key(|sink| sink.kind().shutdown_rank());
        for sink in &sinks {
            sink.stop_by(deadline);
        }

        let dropped: u64 = sinks.iter().map(|sink| sink.stats().dropped_total()).sum();
        tracing::debug!(target: INTERNAL_TARGET, sinks = sinks.len(), dropped, "logging system shut down");
    }
}

impl Drop for LogSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve_logs_dir(primary: &Path, fallback: &Path, diagnostics: &Diagnostics) -> Option<PathBuf> {
    for dir in [primary, fallback] {
        match std::fs::create_dir_all(dir) {
            Ok(()) => {
                if dir != primary {
                    tracing::warn!(
                        target: INTERNAL_TARGET,
                        primary = %primary.display(),
                        fallback = %dir.display(),
                        "logs directory not writable, using fallback"
                    );
                }
                return Some(dir.to_path_buf());
            }
            Err(err) => diagnostics.report(
                InternalErrorSource::FileOpen {
                    path: dir.display().to_string(),
                },
                &err,
                None,
            ),
        }
    }
    tracing::error!(target: INTERNAL_TARGET, "no writable logs directory, file sinks degraded to no-op");
    None
}

/// Logger names become file names; anything outside `[A-Za-z0-9._-]` is
/// replaced so a name can never escape the logs directory. Distinct names
/// can share a stem (`"a b"` and `"a_b"`).
fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    match stem.trim_matches('.') {
        "" => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn settings(dir: &Path) -> Settings {
        Settings {
            logs_dir: Some(dir.to_path_buf()),
            fallback_logs_dir: Some(dir.join("fallback")),
            enable_console: false,
            ..Settings::default()
        }
    }

    fn identity() -> Arc<HostIdentity> {
        Arc::new(HostIdentity::new("test-host", "N/A"))
    }

    #[test]
    fn file_stem_neutralizes_path_characters() {
        assert_eq!(file_stem("billing"), "billing");
        assert_eq!(file_stem("api.v2"), "api.v2");
        assert_eq!(file_stem("../etc/passwd"), "_etc_passwd");
        assert_eq!(file_stem("a b/c"), "a_b_c");
        assert_eq!(file_stem(".."), "_");
    }

    #[test]
    fn aggregate_sinks_without_remote_endpoint() {
        let dir = tempdir().unwrap();
        let system = LogSystem::start_with_identity(settings(dir.path()), identity()).unwrap();
        let kinds: Vec<SinkKind> = system.sinks().iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec![SinkKind::RotatingFile]);
        assert!(!kinds.contains(&SinkKind::Remote));
    }

    #[test]
    fn console_sink_is_attached_when_enabled() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            enable_console: true,
            ..settings(dir.path())
        };
        let system = LogSystem::start_with_identity(settings, identity()).unwrap();
        let kinds: Vec<SinkKind> = system.sinks().iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec![SinkKind::Console, SinkKind::RotatingFile]);
    }

    #[test]
    fn reserved_logger_is_aggregate_only() {
        let dir = tempdir().unwrap();
        let system = LogSystem::start_with_identity(settings(dir.path()), identity()).unwrap();

        assert!(matches!(system.get_logger("app"), Err(Error::ReservedName(_))));
        let app = system
            .get_logger_with("app", LoggerOptions::new().internal(true))
            .unwrap();
        assert_eq!(app.sinks().len(), 1);
        assert_eq!(system.sinks().len(), 1);
    }

    #[test]
    fn names_resolving_to_the_aggregate_file_are_reserved() {
        let dir = tempdir().unwrap();
        let system = LogSystem::start_with_identity(settings(dir.path()), identity()).unwrap();

        for name in ["app.", ".app", "APP", "..app.."] {
            assert!(
                matches!(system.get_logger(name), Err(Error::ReservedName(ref n)) if n == name),
                "{} was accepted",
                name
            );
        }
        assert!(system.get_logger("app2").is_ok());
        assert_eq!(system.sinks().len(), 2);
    }

    #[test]
    fn colliding_names_share_one_file_sink() {
        let dir = tempdir().unwrap();
        let system = LogSystem::start_with_identity(settings(dir.path()), identity()).unwrap();
        let spaced = system.get_logger("a b").unwrap();
        let underscored = system.get_logger("a_b").unwrap();
        assert!(!Arc::ptr_eq(&spaced, &underscored));

        let own = |logger: &Arc<Logger>| Arc::clone(logger.sinks().last().unwrap());
        assert!(Arc::ptr_eq(&own(&spaced), &own(&underscored)));
        assert_eq!(own(&spaced).name(), "a_b");
        assert_eq!(system.sinks().len(), 2);

        spaced.info("from spaced");
        underscored.info("from underscored");
        system.shutdown();

        let written = std::fs::read_to_string(dir.path().join("a_b.log")).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" - a b - INFO - from spaced"), "{}", lines[0]);
        assert!(lines[1].contains(" - a_b - INFO - from underscored"), "{}", lines[1]);
    }

    #[test]
    fn unused_logger_leaves_no_file() {
        let dir = tempdir().unwrap();
        let system = LogSystem::start_with_identity(settings(dir.path()), identity()).unwrap();
        let _quiet = system.get_logger("quiet").unwrap();
        system.shutdown();
        assert!(!dir.path().join("quiet.log").exists());
        assert!(!dir.path().join(AGGREGATE_FILE).exists());
    }

    #[test]
    fn unwritable_logs_dir_uses_fallback() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let fallback = dir.path().join("fallback");
        let settings = Settings {
            logs_dir: Some(blocker.join("logs")),
            fallback_logs_dir: Some(fallback.clone()),
            enable_console: false,
            ..Settings::default()
        };
        let system = LogSystem::start_with_identity(settings, identity()).unwrap();
        assert_eq!(system.logs_dir(), Some(fallback.as_path()));

        system.get_logger("svc").unwrap().info("hello");
        system.shutdown();
        assert!(fallback.join("svc.log").exists());
    }

    #[test]
    fn no_writable_dir_degrades_but_keeps_running() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let settings = Settings {
            logs_dir: Some(blocker.join("a")),
            fallback_logs_dir: Some(blocker.join("b")),
            enable_console: false,
            enable_internal_diagnostics: true,
            ..Settings::default()
        };
        let system = LogSystem::start_with_identity(settings, identity()).unwrap();
        assert!(system.logs_dir().is_none());
        let mut reports = system.take_diagnostics().unwrap();
        assert!(system.take_diagnostics().is_none());

        let logger = system.get_logger("svc").unwrap();
        logger.error("nowhere to go");
        system.shutdown();

        let stats = system.stats();
        assert!(stats.iter().all(|s| s.delivered == 0));
        assert_eq!(stats.iter().map(|s| s.failures).sum::<u64>(), 2);

        let mut opens = 0;
        while let Ok(report) = reports.try_recv() {
            if matches!(report.source, InternalErrorSource::FileOpen { .. }) {
                opens += 1;
            }
        }
        assert_eq!(opens, 2);
    }

    #[test]
    fn apply_settings_changes_aggregate_level_live() {
        let dir = tempdir().unwrap();
        let system = LogSystem::start_with_identity(settings(dir.path()), identity()).unwrap();
        let logger = system
            .get_logger_with("svc", LoggerOptions::new().min_level(Level::Critical))
            .unwrap();

        assert!(!logger.enabled(Level::Debug));
        system.apply_settings(Level::Debug, LogFormat::Text);
        assert!(logger.enabled(Level::Debug));
        assert_eq!(system.settings().log_format, LogFormat::Text);
        assert_eq!(logger.min_level(), Level::Critical);
    }

    #[test]
    fn shutdown_is_idempotent_and_blocks_new_loggers() {
        let dir = tempdir().unwrap();
        let system = LogSystem::start_with_identity(settings(dir.path()), identity()).unwrap();
        let existing = system.get_logger("svc").unwrap();
        system.shutdown();
        system.shutdown();

        assert!(system.is_shut_down());
        assert!(matches!(system.get_logger("late"), Err(Error::ShutDown)));
        assert!(Arc::ptr_eq(&existing, &system.get_logger("svc").unwrap()));

        existing.info("after shutdown");
        let own = system.stats().into_iter().find(|s| s.name == "svc").unwrap();
        assert_eq!(own.dropped, 1);
    }
}
