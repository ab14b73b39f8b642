//! Start/finish/error logging around a function call.

use crate::level::Level;
use crate::logger::Logger;
use crate::record::Metadata;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

/// Argument names whose values are never logged, compared case-insensitively.
pub const SENSITIVE_KEYS: [&str; 5] = ["password", "token", "apikey", "access_key", "refresh_token"];

pub const MASK: &str = "***MASKED***";

/// Copy of `args` with every sensitive value replaced by [`MASK`].
///
/// Only top-level keys are inspected.
pub fn mask_arguments(args: &Metadata) -> Metadata {
    args.iter()
        .map(|(key, value)| {
            let lowered = key.to_ascii_lowercase();
            if SENSITIVE_KEYS.contains(&lowered.as_str()) {
                (key.clone(), Value::String(MASK.to_string()))
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect()
}

fn log_start(logger: &Logger, function: &str, args: &Metadata) {
    logger.log_with(
        Level::Info,
        "START Function Execution",
        crate::metadata! {
            "function" => function,
            "args" => mask_arguments(args),
        },
    );
}

fn log_outcome<T, E: Display>(logger: &Logger, function: &str, started: Instant, result: &Result<T, E>) {
    match result {
        Ok(_) => {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            logger.log_with(
                Level::Info,
                "FINISH Function Execution",
                crate::metadata! {
                    "function" => function,
                    "execution_time" => format!("{:.2}ms", elapsed_ms),
                    "return_type" => std::any::type_name::<T>(),
                },
            );
        }
        Err(err) => logger.log_with(
            Level::Error,
            "ERROR in Function Execution",
            crate::metadata! {
                "function" => function,
                "error" => err.to_string(),
            },
        ),
    }
}

/// Run `f`, logging its start, its completion time or its error through
/// `logger`. The result is returned unchanged.
pub fn trace_call<T, E, F>(logger: &Logger, function: &str, args: &Metadata, f: F) -> Result<T, E>
where
    E: Display,
    F: FnOnce() -> Result<T, E>,
{
    log_start(logger, function, args);
    let started = Instant::now();
    let result = f();
    log_outcome(logger, function, started, &result);
    result
}

/// Async counterpart of [`trace_call`].
pub async fn trace_call_async<T, E, Fut>(logger: &Logger, function: &str, args: &Metadata, fut: Fut) -> Result<T, E>
where
    E: Display,
    Fut: Future<Output = Result<T, E>>,
{
    log_start(logger, function, args);
    let started = Instant::now();
    let result = fut.await;
    log_outcome(logger, function, started, &result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::env::HostIdentity;
    use crate::format::JsonFormatter;
    use crate::memory_sink::MemorySink;
    use crate::sink::{Sink, SinkConfig, SinkKind};
    use std::sync::Arc;
    use std::time::Duration;

    fn traced_logger(memory: &MemorySink) -> (Logger, Arc<Sink>) {
        let config = SinkConfig::new("trace", SinkKind::RotatingFile, Arc::new(JsonFormatter));
        let sink = Arc::new(Sink::new(config, Box::new(memory.clone()), Diagnostics::disabled()));
        let logger = Logger::new(
            "trace",
            Level::Debug,
            Metadata::new(),
            vec![Arc::clone(&sink)],
            Arc::new(HostIdentity::new("h", "N/A")),
        );
        (logger, sink)
    }

    fn parsed(memory: &MemorySink) -> Vec<Value> {
        memory
            .lines()
            .iter()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn sensitive_keys_are_masked_case_insensitively() {
        let args = crate::metadata! {
            "username" => "user1",
            "Password" => "hunter2",
            "apikey" => "abc",
            "REFRESH_TOKEN" => "r",
            "email" => "user@example.com",
        };
        let masked = mask_arguments(&args);
        assert_eq!(masked["username"], "user1");
        assert_eq!(masked["Password"], MASK);
        assert_eq!(masked["apikey"], MASK);
        assert_eq!(masked["REFRESH_TOKEN"], MASK);
        assert_eq!(masked["email"], "user@example.com");
    }

    #[test]
    fn successful_call_logs_start_and_finish() {
        let memory = MemorySink::new();
        let (logger, sink) = traced_logger(&memory);

        let args = crate::metadata! { "a" => 3, "b" => 4, "password" => "should_be_masked" };
        let result: Result<i32, String> = trace_call(&logger, "math.add", &args, || Ok(3 + 4));
        assert_eq!(result, Ok(7));
        sink.stop(Duration::from_secs(5));

        let lines = parsed(&memory);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["message"], "START Function Execution");
        assert_eq!(lines[0]["metadata"]["function"], "math.add");
        assert_eq!(lines[0]["metadata"]["args"]["a"], 3);
        assert_eq!(lines[0]["metadata"]["args"]["password"], MASK);
        assert!(!memory.lines()[0].contains("should_be_masked"));

        assert_eq!(lines[1]["message"], "FINISH Function Execution");
        assert_eq!(lines[1]["metadata"]["return_type"], "i32");
        let elapsed = lines[1]["metadata"]["execution_time"].as_str().unwrap();
        assert!(elapsed.ends_with("ms"));
    }

    #[test]
    fn failing_call_logs_error_and_returns_it() {
        let memory = MemorySink::new();
        let (logger, sink) = traced_logger(&memory);

        let result: Result<(), String> = trace_call(&logger, "io.fail", &Metadata::new(), || Err("disk full".to_string()));
        assert_eq!(result, Err("disk full".to_string()));
        sink.stop(Duration::from_secs(5));

        let lines = parsed(&memory);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["level"], "ERROR");
        assert_eq!(lines[1]["message"], "ERROR in Function Execution");
        assert_eq!(lines[1]["metadata"]["error"], "disk full");
    }

    #[tokio::test]
    async fn async_call_is_traced() {
        let memory = MemorySink::new();
        let (logger, sink) = traced_logger(&memory);

        let args = crate::metadata! { "token" => "t0k" };
        let result: Result<u64, std::io::Error> = trace_call_async(&logger, "math.multiply", &args, async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(15)
        })
        .await;
        assert_eq!(result.unwrap(), 15);
        sink.stop(Duration::from_secs(5));

        let lines = parsed(&memory);
        assert_eq!(lines[0]["metadata"]["args"]["token"], MASK);
        assert_eq!(lines[1]["metadata"]["return_type"], "u64");
    }
}
