use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log_fanout::diagnostics::Diagnostics;
use log_fanout::env::HostIdentity;
use log_fanout::format::JsonFormatter;
use log_fanout::{
    metadata, Level, LogSink, Logger, Metadata, Record, Sink, SinkConfig, SinkError, SinkKind,
};

/// Example of integrating a completely custom backend by implementing
/// the `LogSink` trait directly. Imagine this talks to some
/// proprietary DB for which this crate does not provide a built-in
/// sink.
struct MyCustomDbSink;

#[async_trait]
impl LogSink for MyCustomDbSink {
    async fn send(&mut self, record: &Record, payload: &[u8]) -> Result<(), SinkError> {
        // Here you would call your own client library for the target DB.
        // For the sake of example we just print the record.
        println!("[my-custom-db] seq={} {}", record.sequence, String::from_utf8_lossy(payload).trim_end());
        Ok(())
    }
}

fn main() {
    let config = SinkConfig::new("my-custom-db", SinkKind::Remote, Arc::new(JsonFormatter)).min_level(Level::Info);
    let sink = Arc::new(Sink::new(config, Box::new(MyCustomDbSink), Diagnostics::disabled()));
    sink.start().expect("start custom sink");

    let logger = Logger::new("custom", Level::Info, Metadata::new(), vec![Arc::clone(&sink)], HostIdentity::current());

    logger.info("custom backend example started");
    logger.log_with(Level::Error, "simulated error sent via custom backend", metadata! { "db" => "my-custom-db" });

    sink.stop(Duration::from_secs(1));
}
