use crate::diagnostics::{Diagnostics, InternalErrorSource, INTERNAL_TARGET};
use crate::error::SinkError;
use crate::record::Record;
use crate::rotation::{RollingFile, Rollover, RotationPolicy};
use crate::sink::LogSink;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

enum FileState {
    /// Nothing written yet; no file exists on disk.
    Unopened,
    Open(RollingFile),
    /// No writable location; every record is counted as a failure.
    Degraded,
}

/// Rotating file destination.
///
/// The file is opened on the first write so that loggers which never emit
/// leave no empty files behind. If the primary path cannot be opened the
/// sink retries once under `fallback_dir`, and degrades to a no-op if that
/// fails too. A failed rollover is reported to diagnostics but does not
/// fail the record that triggered it.
pub struct RotatingFileSink {
    path: PathBuf,
    fallback_dir: Option<PathBuf>,
    policy: RotationPolicy,
    state: FileState,
    diagnostics: Diagnostics,
}

impl RotatingFileSink {
    pub fn new(path: impl Into<PathBuf>, policy: RotationPolicy) -> Self {
        RotatingFileSink {
            path: path.into(),
            fallback_dir: None,
            policy,
            state: FileState::Unopened,
            diagnostics: Diagnostics::disabled(),
        }
    }

    /// A sink with no usable location at all.
    pub fn degraded(path: impl Into<PathBuf>, policy: RotationPolicy) -> Self {
        RotatingFileSink {
            state: FileState::Degraded,
            ..Self::new(path, policy)
        }
    }

    pub fn with_fallback_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fallback_dir = Some(dir.into());
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&mut self) -> Option<&mut RollingFile> {
        if matches!(self.state, FileState::Unopened) {
            self.state = match self.open_first_writable() {
                Some(file) => FileState::Open(file),
                None => FileState::Degraded,
            };
        }
        match &mut self.state {
            FileState::Open(file) => Some(file),
            _ => None,
        }
    }

    fn open_first_writable(&self) -> Option<RollingFile> {
        let fallback = self.fallback_dir.as_ref().and_then(|dir| {
            let name = self.path.file_name()?;
            Some(dir.join(name))
        });

        for candidate in std::iter::once(self.path.clone()).chain(fallback) {
            if let Some(parent) = candidate.parent() {
                if let Err(err) = std::fs::create_dir_all(parent) {
                    self.report_open_failure(&candidate, err);
                    continue;
                }
            }
            match RollingFile::open(&candidate, self.policy.clone()) {
                Ok(file) => {
                    if candidate != self.path {
                        tracing::warn!(
                            target: INTERNAL_TARGET,
                            primary = %self.path.display(),
                            fallback = %candidate.display(),
                            "log file opened at fallback location"
                        );
                    }
                    return Some(file);
                }
                Err(err) => self.report_open_failure(&candidate, err),
            }
        }

        tracing::error!(target: INTERNAL_TARGET, path = %self.path.display(), "no writable log location, file sink degraded to no-op");
        None
    }

    fn report_open_failure(&self, path: &Path, err: std::io::Error) {
        self.diagnostics.report(
            InternalErrorSource::FileOpen {
                path: path.display().to_string(),
            },
            &err,
            None,
        );
    }

    /// Where records are actually going, once the file has been opened.
    pub fn active_path(&self) -> Option<&Path> {
        match &self.state {
            FileState::Open(file) => Some(file.state().current_path.as_path()),
            _ => None,
        }
    }
}

#[async_trait]
impl LogSink for RotatingFileSink {
    async fn send(&mut self, _record: &Record, payload: &[u8]) -> Result<(), SinkError> {
        let path = self.path.clone();
        let Some(file) = self.open() else {
            return Err(SinkError::Degraded(path));
        };
        if let Rollover::Failed(err) = file.write_record(payload)? {
            let active = file.state().current_path.display().to_string();
            self.diagnostics
                .report(InternalErrorSource::FileRotation { path: active }, &err, None);
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        if let FileState::Open(file) = &mut self.state {
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::HostIdentity;
    use crate::level::Level;
    use crate::record::Metadata;
    use tempfile::tempdir;

    fn policy() -> RotationPolicy {
        RotationPolicy::Size {
            max_bytes: 1024 * 1024,
            max_backups: 2,
        }
    }

    fn record() -> Record {
        Record::build("svc", Level::Info, "x", &Metadata::new(), Metadata::new(), &HostIdentity::new("h", "N/A"))
    }

    #[tokio::test]
    async fn file_is_created_lazily_on_first_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("svc.log");
        let mut sink = RotatingFileSink::new(&path, policy());
        assert!(!path.exists());
        assert!(sink.active_path().is_none());

        sink.send(&record(), b"hello\n").await.unwrap();
        sink.flush().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
        assert_eq!(sink.active_path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn unwritable_primary_falls_back() {
        let dir = tempdir().unwrap();
        // A regular file where the parent directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a dir").unwrap();
        let primary = blocker.join("svc.log");
        let fallback_dir = dir.path().join("fallback");

        let mut sink = RotatingFileSink::new(&primary, policy()).with_fallback_dir(&fallback_dir);
        sink.send(&record(), b"line\n").await.unwrap();
        sink.flush().await.unwrap();

        let expected = fallback_dir.join("svc.log");
        assert_eq!(sink.active_path(), Some(expected.as_path()));
        assert_eq!(std::fs::read_to_string(expected).unwrap(), "line\n");
    }

    #[tokio::test]
    async fn no_writable_location_degrades_to_failing_noop() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a dir").unwrap();

        let (diagnostics, mut reports) = Diagnostics::channel();
        let mut sink = RotatingFileSink::new(blocker.join("svc.log"), policy())
            .with_fallback_dir(blocker.join("also-blocked"))
            .with_diagnostics(diagnostics);

        assert!(matches!(sink.send(&record(), b"a\n").await, Err(SinkError::Degraded(_))));
        assert!(matches!(sink.send(&record(), b"b\n").await, Err(SinkError::Degraded(_))));
        // Two open attempts reported once; later records fail without retrying.
        let mut opens = 0;
        while let Ok(report) = reports.try_recv() {
            assert!(matches!(report.source, InternalErrorSource::FileOpen { .. }));
            opens += 1;
        }
        assert_eq!(opens, 2);
    }

    #[tokio::test]
    async fn rollover_failure_is_reported_not_failed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svc.log");
        let blocked_backup = dir.path().join("svc.log.1");
        std::fs::create_dir(&blocked_backup).unwrap();
        std::fs::write(blocked_backup.join("pinned"), "x").unwrap();

        let (diagnostics, mut reports) = Diagnostics::channel();
        let policy = RotationPolicy::Size {
            max_bytes: 4,
            max_backups: 1,
        };
        let mut sink = RotatingFileSink::new(&path, policy).with_diagnostics(diagnostics);

        sink.send(&record(), b"too long\n").await.unwrap();
        sink.flush().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "too long\n");

        let report = reports.try_recv().unwrap();
        assert_eq!(
            report.source,
            InternalErrorSource::FileRotation {
                path: path.display().to_string()
            }
        );
        assert!(reports.try_recv().is_err());
    }

    #[tokio::test]
    async fn explicitly_degraded_sink_never_touches_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svc.log");
        let mut sink = RotatingFileSink::degraded(&path, policy());
        assert!(sink.send(&record(), b"x\n").await.is_err());
        assert!(!path.exists());
    }
}
