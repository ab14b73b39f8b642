use std::sync::Arc;
use std::time::{Duration, Instant};

use log_fanout::diagnostics::Diagnostics;
use log_fanout::env::HostIdentity;
use log_fanout::format::JsonFormatter;
use log_fanout::noop_sink::NoopSink;
use log_fanout::record::Metadata;
use log_fanout::sink::{Sink, SinkConfig, SinkKind};
use log_fanout::{metadata, Level, Logger};

/// Measures the pipeline itself: four producer threads feed one logger
/// whose only sink discards everything.
fn main() {
    let config = SinkConfig::new("noop", SinkKind::RotatingFile, Arc::new(JsonFormatter)).capacity(50_000);
    let sink = Arc::new(Sink::new(config, Box::new(NoopSink), Diagnostics::disabled()));
    sink.start().expect("start sink");

    let logger = Arc::new(Logger::new(
        "load",
        Level::Debug,
        metadata! { "bench" => "custom_load" },
        vec![Arc::clone(&sink)],
        HostIdentity::current(),
    ));

    let per_thread: u64 = 25_000;
    let start = Instant::now();
    let producers: Vec<_> = (0..4)
        .map(|t| {
            let logger = Arc::clone(&logger);
            std::thread::spawn(move || {
                for i in 0..per_thread {
                    let mut meta = Metadata::new();
                    meta.insert("iteration".into(), i.into());
                    meta.insert("producer".into(), t.into());
                    logger.log_with(Level::Error, "custom load test error", meta);
                }
            })
        })
        .collect();
    for p in producers {
        p.join().expect("producer thread");
    }

    let elapsed = start.elapsed();
    let n = per_thread * 4;
    println!("custom config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    sink.stop(Duration::from_secs(2));
    let stats = sink.stats();
    println!("delivered={} dropped={} discarded={}", stats.delivered, stats.dropped, stats.discarded);
}
