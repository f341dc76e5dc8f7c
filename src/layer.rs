use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use crate::dispatcher::Dispatcher;
use crate::record::{ExceptionInfo, Fields, Level, LogEvent};

/// Events from this crate's own diagnostics are never fed back in.
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

/// `tracing_subscriber` layer that sends `tracing` events through a
/// [`Dispatcher`], so third-party `tracing` output gets the same pipeline,
/// renderers and destinations as direct [`Logger`](crate::logger::Logger)
/// calls. The event target becomes the logger name.
pub struct StructuredLayer {
    dispatcher: Arc<Dispatcher>,
    /// Events seen by the layer (before level filtering).
    pub total_events: Arc<AtomicU64>,
    /// Events handed to the dispatcher.
    pub forwarded_events: Arc<AtomicU64>,
}

impl StructuredLayer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            total_events: Arc::new(AtomicU64::new(0)),
            forwarded_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

fn is_own_target(target: &str) -> bool {
    target
        .strip_prefix(OWN_TARGET)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

fn map_level(level: &tracing::Level) -> Level {
    match *level {
        tracing::Level::ERROR => Level::Error,
        tracing::Level::WARN => Level::Warning,
        tracing::Level::INFO => Level::Info,
        _ => Level::Debug,
    }
}

impl<S> Layer<S> for StructuredLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let meta = event.metadata();
        if is_own_target(meta.target()) {
            return;
        }
        let level = map_level(meta.level());
        if !self.dispatcher.is_enabled(level) {
            return;
        }

        let mut fields = Fields::new();
        let mut message: Option<String> = None;
        let mut exception: Option<ExceptionInfo> = None;
        event.record(&mut FieldVisitor {
            fields: &mut fields,
            message: &mut message,
            exception: &mut exception,
        });

        let mut record = LogEvent::new(level, meta.target(), message.unwrap_or_default(), fields);
        if let Some(exc) = exception {
            record = record.with_exception(exc);
        }
        self.dispatcher.dispatch(record);
        self.forwarded_events.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct FieldVisitor<'a> {
    pub fields: &'a mut Fields,
    pub message: &'a mut Option<String>,
    pub exception: &'a mut Option<ExceptionInfo>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let captured = ExceptionInfo::capture(value);
        self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
        if self.exception.is_none() {
            *self.exception = Some(captured);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // Formatted messages (`info!("x = {x}")`) arrive here as `fmt::Arguments`.
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), Value::String(format!("{:?}", value)));
        }
    }
}
