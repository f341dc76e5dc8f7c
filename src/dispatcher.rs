use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::context::AmbientContext;
use crate::destination::{DestinationKey, Registry};
use crate::emitter::{AsyncEmitter, StatsSnapshot};
use crate::error::EmitterError;
use crate::logger::Logger;
use crate::pipeline::Pipeline;
use crate::record::{Level, LogEvent};

static GLOBAL: OnceLock<Arc<Dispatcher>> = OnceLock::new();

/// Minimum level, enrichment pipeline and attached destinations for a group
/// of loggers. Most programs use the process-wide [`Dispatcher::global`].
pub struct Dispatcher {
    min_level: AtomicU8,
    pipeline: Pipeline,
    ambient: AmbientContext,
    registry: RwLock<Registry>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_pipeline(Pipeline::default())
    }

    pub fn with_pipeline(pipeline: Pipeline) -> Self {
        Self {
            min_level: AtomicU8::new(Level::Info.as_number()),
            pipeline,
            ambient: AmbientContext::default(),
            registry: RwLock::new(Registry::default()),
        }
    }

    pub fn global() -> Arc<Dispatcher> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Dispatcher::new())))
    }

    pub fn logger(self: &Arc<Self>, name: impl Into<String>) -> Logger {
        Logger::new(Arc::clone(self), name)
    }

    pub fn min_level(&self) -> Level {
        Level::from_number(u64::from(self.min_level.load(Ordering::Relaxed))).unwrap_or(Level::Info)
    }

    pub fn set_min_level(&self, level: Level) {
        self.min_level.store(level.as_number(), Ordering::Relaxed);
    }

    #[inline]
    pub fn is_enabled(&self, level: Level) -> bool {
        level.as_number() >= self.min_level.load(Ordering::Relaxed)
    }

    pub fn ambient(&self) -> &AmbientContext {
        &self.ambient
    }

    /// Enrich `event` once and queue it on every destination. Events below
    /// the minimum level are discarded before any work is done.
    pub fn dispatch(&self, event: LogEvent) {
        if !self.is_enabled(event.level) {
            return;
        }
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        if registry.is_empty() {
            return;
        }
        let record = {
            let ambient = self.ambient.read();
            Arc::new(self.pipeline.run(event, &ambient))
        };
        registry.emit_all(&record);
    }

    /// Attach a destination under `key` unless one is already attached.
    /// `build` only runs when the key is new, so no second file handle is
    /// ever opened for a path that is already being written.
    pub fn attach<F, E>(&self, key: DestinationKey, build: F) -> Result<bool, E>
    where
        F: FnOnce() -> Result<AsyncEmitter, E>,
    {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let attached = registry.register_with(key.clone(), build)?;
        if attached {
            tracing::debug!(destination = %key, "log destination attached");
        } else {
            tracing::debug!(destination = %key, "log destination already attached, skipping");
        }
        Ok(attached)
    }

    pub fn destinations(&self) -> Vec<DestinationKey> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).keys()
    }

    pub fn destination_count(&self) -> usize {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn stats(&self) -> Vec<(DestinationKey, StatsSnapshot)> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).stats()
    }

    /// Wait until everything dispatched so far has reached its sinks.
    pub fn flush(&self) {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).flush_all();
    }

    /// Drain and detach every destination. A later setup may attach again.
    pub fn close(&self) -> Result<(), EmitterError> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner).close_all()
    }
}
