use crate::error::SinkError;
use crate::record::Record;
use crate::sink::LogSink;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Index used when none is configured.
pub const DEFAULT_REMOTE_INDEX: &str = "application-logs";

/// Configuration for [`RemoteSink`].
///
/// The sink talks to an Elasticsearch/OpenSearch compatible indexer over
/// HTTP, one document per record.
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    /// Base URL without path, e.g. "http://127.0.0.1:9200"
    pub endpoint: String,
    pub index: String,
    pub timeout: Duration,
}

impl RemoteConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        RemoteConfig {
            endpoint: endpoint.into(),
            index: DEFAULT_REMOTE_INDEX.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Remote indexer implementation of [`LogSink`] using the HTTP document API.
///
/// A failed send is retried once, immediately, and then reported as a
/// failure; there is no backoff loop, so a dead backend costs at most two
/// request timeouts per record.
#[derive(Clone)]
pub struct RemoteSink {
    client: Client,
    config: RemoteConfig,
}

impl RemoteSink {
    /// Construct a new sink instance using the provided configuration.
    ///
    /// **Parameters**
    /// - `config`: [`RemoteConfig`] describing the base URL, target index
    ///   and per-request timeout.
    ///
    /// **Returns**
    /// - A ready-to-use [`RemoteSink`], or the error from building the
    ///   HTTP client.
    pub fn new(config: RemoteConfig) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/{}/_doc", self.config.endpoint.trim_end_matches('/'), self.config.index)
    }

    async fn post(&self, url: &str, body: &[u8]) -> Result<(), SinkError> {
        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body.to_vec())
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(SinkError::Remote(format!("index request failed with status {}: {}", status, text)))
        }
    }
}

#[async_trait]
impl LogSink for RemoteSink {
    async fn send(&mut self, _record: &Record, payload: &[u8]) -> Result<(), SinkError> {
        let url = self.endpoint();
        let body = payload.strip_suffix(b"\n").unwrap_or(payload);
        match self.post(&url, body).await {
            Ok(()) => Ok(()),
            Err(_) => self.post(&url, body).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::env::HostIdentity;
    use crate::format::JsonFormatter;
    use crate::level::Level;
    use crate::record::Metadata;
    use crate::sink::{Sink, SinkConfig, SinkKind};
    use std::sync::Arc;

    fn record(message: &str) -> Arc<Record> {
        Arc::new(Record::build(
            "svc",
            Level::Error,
            message,
            &Metadata::new(),
            Metadata::new(),
            &HostIdentity::new("h", "N/A"),
        ))
    }

    fn remote_sink(endpoint: String) -> Sink {
        let mut config = RemoteConfig::new(endpoint);
        config.timeout = Duration::from_secs(2);
        let destination = RemoteSink::new(config).unwrap();
        Sink::new(
            SinkConfig::new("remote", SinkKind::Remote, Arc::new(JsonFormatter)),
            Box::new(destination),
            Diagnostics::disabled(),
        )
    }

    #[test]
    fn posts_one_json_document_per_record() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/application-logs/_doc")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"service":"svc","level":"ERROR"}"#.to_string(),
            ))
            .with_status(201)
            .expect(3)
            .create();

        let sink = remote_sink(server.url());
        sink.start().unwrap();
        for i in 0..3 {
            sink.submit(record(&format!("r{}", i)));
        }
        sink.stop(Duration::from_secs(10));

        mock.assert();
        let stats = sink.stats();
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.failures, 0);
    }

    #[test]
    fn rejected_record_is_retried_once_then_counted() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/application-logs/_doc")
            .with_status(503)
            .expect(2)
            .create();

        let sink = remote_sink(server.url());
        sink.start().unwrap();
        sink.submit(record("lost"));
        sink.stop(Duration::from_secs(10));

        mock.assert();
        let stats = sink.stats();
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn unreachable_backend_does_not_stop_the_worker() {
        // Port 9 (discard) is closed on test machines; connections are refused.
        let sink = remote_sink("http://127.0.0.1:9".to_string());
        sink.start().unwrap();
        sink.submit(record("a"));
        sink.submit(record("b"));
        sink.stop(Duration::from_secs(20));

        let stats = sink.stats();
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.discarded, 0);
    }

    #[test]
    fn silent_backend_cannot_hold_shutdown_past_its_deadline() {
        // Accepts connections and never answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming().flatten() {
                held.push(stream);
            }
        });

        let sink = remote_sink(format!("http://{}", addr));
        sink.start().unwrap();
        sink.submit(record("stuck"));
        sink.submit(record("queued"));

        let started = std::time::Instant::now();
        sink.stop(Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_secs(2), "stop took {:?}", started.elapsed());

        let stats = sink.stats();
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.discarded, 2);
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let mut config = RemoteConfig::new("http://es:9200/");
        config.index = "logs".into();
        let sink = RemoteSink::new(config).unwrap();
        assert_eq!(sink.endpoint(), "http://es:9200/logs/_doc");
    }
}
