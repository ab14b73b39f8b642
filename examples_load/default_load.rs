use std::time::Instant;
use tracing::error;

use log_fanout::config::Settings;
use log_fanout::init::{init_tracing, system};

fn main() {
    let settings = Settings {
        logs_dir: Some(std::env::temp_dir().join("log-fanout-load")),
        enable_console: false,
        ..Settings::default()
    };
    let guard = init_tracing(settings, "load").expect("init logging");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!("default config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    // Dropping the guard drains every sink.
    drop(guard);
    if let Some(system) = system() {
        for stats in system.stats() {
            println!("{:>10} delivered={} dropped={} failures={}",
                stats.name, stats.delivered, stats.dropped_total(), stats.failures);
        }
    }
}
