use crate::error::SinkError;
use crate::record::Record;
use crate::sink::LogSink;
use async_trait::async_trait;

/// A sink that simply drops all records.
///
/// Useful for measuring the overhead of the pipeline itself without any
/// external I/O, and for unit tests that don't care about persistence.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl LogSink for NoopSink {
    async fn send(&mut self, _record: &Record, _payload: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }
}
