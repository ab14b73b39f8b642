use crate::error::{Error, Result};
use crate::level::Level;
use crate::logger::Logger;
use crate::record::Metadata;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::collections::HashMap;
use std::sync::Arc;

/// Logger name reserved for the aggregate stream.
pub const RESERVED_NAME: &str = "app";

/// Configuration for a logger on its first lookup. Ignored afterwards.
#[derive(Debug, Clone, Default)]
pub struct LoggerOptions {
    pub metadata: Metadata,
    /// Minimum level of the logger's own file; the system default if unset.
    pub min_level: Option<Level>,
    /// Allows the reserved name. Only the aggregate wiring sets this.
    pub internal: bool,
}

impl LoggerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn min_level(mut self, level: Level) -> Self {
        self.min_level = Some(level);
        self
    }

    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }
}

/// Name to handle map. Lookups of existing names only take a read lock;
/// creation is serialized so concurrent first lookups build one handle.
#[derive(Default)]
pub struct LoggerRegistry {
    loggers: RwLock<HashMap<String, Arc<Logger>>>,
}

impl LoggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Logger>> {
        self.loggers.read().get(name).cloned()
    }

    /// Return the handle for `name`, building it with `build` on first use.
    ///
    /// **Errors**
    /// - [`Error::ReservedName`] for [`RESERVED_NAME`] without
    ///   `options.internal`.
    /// - Whatever `build` returns; nothing is registered in that case.
    pub fn get_or_try_insert_with<F>(&self, name: &str, options: &LoggerOptions, build: F) -> Result<Arc<Logger>>
    where
        F: FnOnce() -> Result<Logger>,
    {
        if name == RESERVED_NAME && !options.internal {
            return Err(Error::ReservedName(name.to_string()));
        }

        if let Some(logger) = self.get(name) {
            return Ok(logger);
        }

        let loggers = self.loggers.upgradable_read();
        if let Some(logger) = loggers.get(name) {
            return Ok(Arc::clone(logger));
        }
        let logger = Arc::new(build()?);
        let mut loggers = RwLockUpgradableReadGuard::upgrade(loggers);
        loggers.insert(name.to_string(), Arc::clone(&logger));
        Ok(logger)
    }

    pub fn len(&self) -> usize {
        self.loggers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.read().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loggers.read().keys().cloned().collect();
        names.sort();
        names
    }
}
