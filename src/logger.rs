use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::context::BindingSet;
use crate::dispatcher::Dispatcher;
use crate::record::{ExceptionInfo, Fields, Level, LogEvent};

/// Cheap, cloneable logging handle: a name, a [`BindingSet`] and the
/// dispatcher it feeds.
///
/// `bind`/`unbind` return a new handle and leave `self` untouched.
#[derive(Clone)]
pub struct Logger {
    name: Arc<str>,
    bindings: BindingSet,
    dispatcher: Arc<Dispatcher>,
}

macro_rules! level_methods {
    ($($level:ident, $plain:ident, $with:ident;)+) => {
        $(
            pub fn $plain(&self, message: impl Into<String>) {
                self.emit(Level::$level, message, Fields::new());
            }

            pub fn $with(&self, message: impl Into<String>, fields: Fields) {
                self.emit(Level::$level, message, fields);
            }
        )+
    };
}

impl Logger {
    pub fn new(dispatcher: Arc<Dispatcher>, name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            bindings: BindingSet::new(),
            dispatcher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bindings(&self) -> &BindingSet {
        &self.bindings
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Same bindings under a different logger name.
    pub fn named(&self, name: impl Into<String>) -> Logger {
        Logger {
            name: Arc::from(name.into()),
            ..self.clone()
        }
    }

    pub fn bind(&self, fields: Fields) -> Logger {
        Logger {
            bindings: self.bindings.bind(fields),
            ..self.clone()
        }
    }

    pub fn unbind<I, K>(&self, keys: I) -> Logger
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        Logger {
            bindings: self.bindings.unbind(keys),
            ..self.clone()
        }
    }

    pub fn is_enabled(&self, level: Level) -> bool {
        self.dispatcher.is_enabled(level)
    }

    /// Log `message` with per-call `fields`, which win over bound ones.
    pub fn emit(&self, level: Level, message: impl Into<String>, fields: Fields) {
        if !self.dispatcher.is_enabled(level) {
            return;
        }
        let event = LogEvent::new(level, &*self.name, message, self.bindings.merged_with(fields));
        self.dispatcher.dispatch(event);
    }

    /// Like [`emit`](Self::emit), attaching `err` and its sources.
    pub fn emit_with_error(
        &self,
        level: Level,
        message: impl Into<String>,
        err: &(dyn Error + 'static),
        fields: Fields,
    ) {
        if !self.dispatcher.is_enabled(level) {
            return;
        }
        let event = LogEvent::new(level, &*self.name, message, self.bindings.merged_with(fields))
            .with_exception(ExceptionInfo::capture(err));
        self.dispatcher.dispatch(event);
    }

    /// Error-level event carrying `err` in the `exception` field.
    pub fn exception(&self, message: impl Into<String>, err: &(dyn Error + 'static), fields: Fields) {
        self.emit_with_error(Level::Error, message, err, fields);
    }

    level_methods! {
        Debug, debug, debug_with;
        Info, info, info_with;
        Warning, warning, warning_with;
        Error, error, error_with;
        Critical, critical, critical_with;
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}
