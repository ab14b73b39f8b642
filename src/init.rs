//! Process-global facade over a single [`LogSystem`].

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::layer::{noisy_target_filter, LoggerLayer};
use crate::lifecycle::LogSystem;
use crate::logger::Logger;
use crate::registry::LoggerOptions;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::Registry;

static SYSTEM: OnceCell<LogSystem> = OnceCell::new();

/// Shuts the global system down when dropped.
///
/// Keep it alive in `main`; dropping it at the end of `main` drains every
/// sink before the process exits.
#[must_use = "dropping the guard shuts logging down immediately"]
#[derive(Debug)]
pub struct LogGuard {
    _private: (),
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        shutdown();
    }
}

/// Start the process-global logging system.
///
/// **Errors**
/// - [`Error::AlreadyInitialized`] on every call after the first
///   successful one.
/// - Configuration errors from [`Settings::validate`].
pub fn init(settings: Settings) -> Result<LogGuard> {
    let mut started = false;
    SYSTEM.get_or_try_init(|| {
        started = true;
        LogSystem::start(settings)
    })?;
    if !started {
        return Err(Error::AlreadyInitialized);
    }
    Ok(LogGuard { _private: () })
}

/// [`init`] with settings read from the environment.
pub fn init_from_env() -> Result<LogGuard> {
    init(Settings::from_env()?)
}

/// Initialize logging and install a global `tracing` subscriber that
/// forwards `tracing` events to the logger `logger_name`.
///
/// Events from HTTP client and runtime crates below WARN are filtered out
/// (see [`noisy_target_filter`]).
pub fn init_tracing(settings: Settings, logger_name: &str) -> Result<LogGuard> {
    let guard = init(settings)?;
    let logger = get_logger(logger_name)?;
    let layer = LoggerLayer::new(logger).with_filter(noisy_target_filter());
    let subscriber = Registry::default().with(layer);
    tracing::subscriber::set_global_default(subscriber).map_err(|err| Error::SubscriberInstall(err.to_string()))?;
    Ok(guard)
}

/// The global system, if [`init`] has run.
pub fn system() -> Option<&'static LogSystem> {
    SYSTEM.get()
}

pub fn get_logger(name: &str) -> Result<Arc<Logger>> {
    get_logger_with(name, LoggerOptions::default())
}

pub fn get_logger_with(name: &str, options: LoggerOptions) -> Result<Arc<Logger>> {
    SYSTEM.get().ok_or(Error::NotInitialized)?.get_logger_with(name, options)
}

/// Drain and stop the global system. No-op if it was never started or
/// is already shut down.
pub fn shutdown() {
    if let Some(system) = SYSTEM.get() {
        system.shutdown();
    }
}
