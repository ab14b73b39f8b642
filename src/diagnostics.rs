//! Side channel for the facility's own failures.
//!
//! Sink failures go to `tracing` under [`INTERNAL_TARGET`] and, when enabled,
//! to a bounded channel of [`InternalErrorReport`]s. Nothing here is ever
//! routed back through the sinks that failed.

use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::mpsc;

/// `tracing` target used for every event the facility emits about itself.
pub const INTERNAL_TARGET: &str = "log_fanout::internal";

const REPORT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalErrorSource {
    SinkWrite { sink: String },
    RecordFormatting { sink: String },
    FileOpen { path: String },
    /// A record was written but the file could not be rolled over.
    FileRotation { path: String },
    WorkerStartup { sink: String },
}

impl fmt::Display for InternalErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InternalErrorSource::SinkWrite { sink } => write!(f, "SinkWrite {{ sink: \"{}\" }}", sink),
            InternalErrorSource::RecordFormatting { sink } => {
                write!(f, "RecordFormatting {{ sink: \"{}\" }}", sink)
            }
            InternalErrorSource::FileOpen { path } => write!(f, "FileOpen {{ path: \"{}\" }}", path),
            InternalErrorSource::FileRotation { path } => write!(f, "FileRotation {{ path: \"{}\" }}", path),
            InternalErrorSource::WorkerStartup { sink } => write!(f, "WorkerStartup {{ sink: \"{}\" }}", sink),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InternalErrorReport {
    pub source: InternalErrorSource,
    pub error_message: String,
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Cloneable handle given to every sink worker.
#[derive(Clone, Default)]
pub struct Diagnostics {
    tx: Option<mpsc::Sender<InternalErrorReport>>,
}

impl Diagnostics {
    /// A handle that only logs through `tracing`.
    pub fn disabled() -> Self {
        Diagnostics { tx: None }
    }

    /// A handle plus the receiving end of its report channel.
    pub fn channel() -> (Self, mpsc::Receiver<InternalErrorReport>) {
        let (tx, rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
        (Diagnostics { tx: Some(tx) }, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn report(&self, source: InternalErrorSource, error: &dyn std::error::Error, context: Option<String>) {
        tracing::warn!(
            target: INTERNAL_TARGET,
            source = %source,
            error = %error,
            context = context.as_deref().unwrap_or(""),
            "log sink failure"
        );

        if let Some(tx) = &self.tx {
            let report = InternalErrorReport {
                source,
                error_message: error.to_string(),
                context,
                timestamp: Utc::now(),
            };
            // A full report channel means nobody is reading; drop the report.
            let _ = tx.try_send(report);
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics").field("enabled", &self.is_enabled()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_channel_receives_reports() {
        let (diagnostics, mut rx) = Diagnostics::channel();
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        diagnostics.report(
            InternalErrorSource::SinkWrite { sink: "app".into() },
            &err,
            Some("seq=3".into()),
        );

        let report = rx.try_recv().unwrap();
        assert_eq!(report.source, InternalErrorSource::SinkWrite { sink: "app".into() });
        assert_eq!(report.error_message, "disk full");
        assert_eq!(report.context.as_deref(), Some("seq=3"));
    }

    #[test]
    fn disabled_handle_does_not_panic() {
        let diagnostics = Diagnostics::disabled();
        assert!(!diagnostics.is_enabled());
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        diagnostics.report(InternalErrorSource::FileOpen { path: "/x".into() }, &err, None);
    }

    #[test]
    fn full_channel_drops_reports() {
        let (diagnostics, mut rx) = Diagnostics::channel();
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        for _ in 0..(REPORT_CHANNEL_CAPACITY + 10) {
            diagnostics.report(InternalErrorSource::SinkWrite { sink: "s".into() }, &err, None);
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, REPORT_CHANNEL_CAPACITY);
    }
}
