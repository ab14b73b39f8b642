use log_fanout::config::Settings;
use log_fanout::{metadata, Level, LogSystem};

/// Ship the aggregate stream to an Elasticsearch/OpenSearch node.
///
/// ```sh
/// ELASTICSEARCH_HOST=http://127.0.0.1:9200 cargo run --example remote_sink
/// ```
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = Settings::from_env()?;
    if settings.remote_endpoint.is_none() {
        settings.remote_endpoint = Some("http://127.0.0.1:9200".to_string());
    }
    settings.enable_internal_diagnostics = true;

    let system = LogSystem::start(settings)?;
    let mut reports = system.take_diagnostics();

    let logger = system.get_logger("orders")?;
    logger.info("remote sink example started");
    logger.log_with(Level::Error, "payment gateway timeout", metadata! { "order_id" => 1042, "attempt" => 3 });

    system.shutdown();

    for stats in system.stats() {
        println!("{:>8} delivered={} failures={}", stats.name, stats.delivered, stats.failures);
    }
    if let Some(reports) = reports.as_mut() {
        while let Ok(report) = reports.try_recv() {
            println!("internal error from {}: {}", report.source, report.error_message);
        }
    }
    Ok(())
}
