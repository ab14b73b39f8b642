use crate::error::SinkError;
use crate::record::Record;
use crate::sink::LogSink;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct Captured {
    lines: Vec<String>,
    sequences: Vec<u64>,
    flushes: usize,
}

/// A sink that keeps every delivered line in memory.
///
/// Clones share the same buffer, so a test can keep one clone and hand the
/// other to a [`Sink`](crate::sink::Sink).
#[derive(Clone, Default)]
pub struct MemorySink {
    captured: Arc<Mutex<Captured>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivered payloads without their trailing newline.
    pub fn lines(&self) -> Vec<String> {
        self.captured.lock().lines.clone()
    }

    /// Sequence numbers in delivery order.
    pub fn sequences(&self) -> Vec<u64> {
        self.captured.lock().sequences.clone()
    }

    pub fn flushes(&self) -> usize {
        self.captured.lock().flushes
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn send(&mut self, record: &Record, payload: &[u8]) -> Result<(), SinkError> {
        let line = String::from_utf8_lossy(payload).trim_end_matches('\n').to_string();
        let mut captured = self.captured.lock();
        captured.lines.push(line);
        captured.sequences.push(record.sequence);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.captured.lock().flushes += 1;
        Ok(())
    }
}
