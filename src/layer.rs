use crate::level::Level;
use crate::logger::Logger;
use crate::record::Metadata;
use crate::sink::in_sink_worker;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Targets under this prefix are the facility's own diagnostics and are
/// never fed back into the pipeline.
const SELF_TARGET_PREFIX: &str = "log_fanout";

/// Client and runtime crates whose events are capped at WARN by
/// [`noisy_target_filter`].
pub const NOISY_TARGETS: [&str; 7] = ["hyper", "h2", "reqwest", "rustls", "tower", "mio", "want"];

/// Per-target filter for a globally installed [`LoggerLayer`]: everything
/// passes except [`NOISY_TARGETS`] below WARN.
pub fn noisy_target_filter() -> Targets {
    Targets::new()
        .with_default(LevelFilter::TRACE)
        .with_targets(NOISY_TARGETS.iter().map(|target| (*target, LevelFilter::WARN)))
}

/// `tracing_subscriber` layer that turns `tracing` events into records of
/// one [`Logger`].
///
/// The event's fields become record metadata, its `message` field the
/// record message, and its target is kept under the `target` key. Nothing
/// here blocks: the logger only pushes onto sink queues. Events raised on a
/// sink worker thread are ignored, so a destination that itself emits
/// `tracing` events never feeds them back into a sink.
pub struct LoggerLayer {
    logger: Arc<Logger>,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Events forwarded to the logger.
    pub forwarded_events: Arc<AtomicU64>,
}

impl LoggerLayer {
    pub fn new(logger: Arc<Logger>) -> Self {
        LoggerLayer {
            logger,
            total_events: Arc::new(AtomicU64::new(0)),
            forwarded_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<S> Layer<S> for LoggerLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let meta = event.metadata();
        if meta.target().starts_with(SELF_TARGET_PREFIX) || in_sink_worker() {
            return;
        }
        let level = Level::from(*meta.level());
        if !self.logger.enabled(level) {
            return;
        }

        let mut fields = Metadata::new();
        let mut message: Option<String> = None;
        let mut visitor = FieldVisitor {
            fields: &mut fields,
            message: &mut message,
        };
        event.record(&mut visitor);
        fields
            .entry("target".to_string())
            .or_insert_with(|| serde_json::Value::String(meta.target().to_string()));

        self.logger.log_with(level, message.unwrap_or_default(), fields);
        self.forwarded_events.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct FieldVisitor<'a> {
    pub fields: &'a mut Metadata,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // `tracing` passes the formatted message through here.
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
        }
    }
}
