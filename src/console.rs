use crate::error::SinkError;
use crate::record::Record;
use crate::sink::LogSink;
use async_trait::async_trait;
use std::io::Write;

/// Writes each formatted line to a byte stream, standard output by default.
///
/// Writes are synchronous from the sink worker; the console never rotates.
pub struct ConsoleSink {
    out: Box<dyn Write + Send>,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        ConsoleSink {
            out: Box::new(std::io::stdout()),
        }
    }

    /// Write to an arbitrary stream instead of stdout.
    pub fn with_writer(out: impl Write + Send + 'static) -> Self {
        ConsoleSink { out: Box::new(out) }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::stdout()
    }
}

#[async_trait]
impl LogSink for ConsoleSink {
    async fn send(&mut self, _record: &Record, payload: &[u8]) -> Result<(), SinkError> {
        self.out.write_all(payload)?;
        self.out.flush()?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}
