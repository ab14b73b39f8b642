//! Named structured loggers fanned out to console, rotating files and an
//! optional remote indexer.
//!
//! Producers never block on I/O: every sink owns a bounded queue and a
//! single background worker. See [`lifecycle::LogSystem`] for the owned
//! entry point and [`init`](init::init) for the process-global one.

pub mod config;
pub mod console;
pub mod diagnostics;
pub mod env;
pub mod error;
pub mod file;
pub mod format;
pub mod layer;
pub mod level;
pub mod lifecycle;
pub mod logger;
pub mod memory_sink;
pub mod noop_sink;
pub mod queue;
pub mod record;
pub mod registry;
pub mod rotation;
pub mod sink;
pub mod trace;

#[cfg(feature = "remote")]
pub mod remote;

pub mod init;

pub use config::{RotationType, Settings};
pub use diagnostics::{InternalErrorReport, InternalErrorSource};
pub use env::HostIdentity;
pub use error::{Error, Result, SinkError};
pub use init::{get_logger, get_logger_with, init, shutdown, LogGuard};
pub use layer::LoggerLayer;
pub use level::{Level, LogFormat};
pub use lifecycle::LogSystem;
pub use logger::Logger;
pub use record::{meta_value, Metadata, Record};
pub use registry::{LoggerOptions, RESERVED_NAME};
pub use rotation::{RotationPolicy, RotationWhen};
pub use sink::{LogSink, Sink, SinkConfig, SinkKind, SinkStatsSnapshot};
pub use trace::{mask_arguments, trace_call, trace_call_async};
