//! Enrichment chain that turns a [`LogEvent`] into the ordered field map the
//! structured renderers consume.

use chrono::SecondsFormat;
use serde_json::Value;

use crate::record::{Fields, LogEvent};

/// Key the message is written under when the chain has no
/// [`Processor::RenameEvent`].
pub const EVENT_KEY: &str = "event";
/// Stable key the message ends up under.
pub const MESSAGE_KEY: &str = "msg";
pub const LOGGER_KEY: &str = "logger";
pub const LEVEL_KEY: &str = "level";
pub const TIMESTAMP_KEY: &str = "timestamp";
pub const EXCEPTION_KEY: &str = "exception";

/// One enrichment step. Steps run in the order they appear in the
/// [`Pipeline`]; later steps see what earlier ones added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processor {
    /// Fill in process-wide ambient fields. Keys already present (bound or
    /// per-call) are left alone.
    MergeAmbient,
    AddLoggerName,
    AddLogLevel,
    /// ISO-8601 UTC timestamp, microsecond precision.
    TimeStamper,
    /// Render a captured error chain into the `exception` field.
    FormatExcInfo,
    /// Write the call's message under `to`. The message always comes from
    /// the event itself, so a caller field named `event` cannot replace it.
    RenameEvent { to: String },
}

impl Processor {
    fn apply(&self, event: &LogEvent, ambient: &Fields, dict: &mut Fields) {
        match self {
            Processor::MergeAmbient => {
                for (key, value) in ambient {
                    if !dict.contains_key(key) {
                        dict.insert(key.clone(), value.clone());
                    }
                }
            }
            Processor::AddLoggerName => {
                dict.insert(LOGGER_KEY.to_string(), Value::String(event.logger.clone()));
            }
            Processor::AddLogLevel => {
                dict.insert(LEVEL_KEY.to_string(), Value::String(event.level.as_str().to_string()));
            }
            Processor::TimeStamper => {
                let ts = event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
                dict.insert(TIMESTAMP_KEY.to_string(), Value::String(ts));
            }
            Processor::FormatExcInfo => {
                if let Some(exc) = &event.exception {
                    dict.insert(EXCEPTION_KEY.to_string(), Value::String(exc.format()));
                }
            }
            Processor::RenameEvent { to } => {
                dict.shift_remove(to.as_str());
                dict.insert(to.clone(), Value::String(event.message.clone()));
            }
        }
    }
}

/// Event plus its enriched field map, shared by every destination.
#[derive(Debug, Clone)]
pub struct EnrichedEvent {
    pub event: LogEvent,
    pub dict: Fields,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    processors: Vec<Processor>,
}

impl Default for Pipeline {
    /// ambient extras, logger name, level, timestamp, exception, then the
    /// message renamed to `msg`.
    fn default() -> Self {
        Self::new(vec![
            Processor::MergeAmbient,
            Processor::AddLoggerName,
            Processor::AddLogLevel,
            Processor::TimeStamper,
            Processor::FormatExcInfo,
            Processor::RenameEvent { to: MESSAGE_KEY.to_string() },
        ])
    }
}

impl Pipeline {
    pub fn new(processors: Vec<Processor>) -> Self {
        Self { processors }
    }

    pub fn processors(&self) -> &[Processor] {
        &self.processors
    }

    pub fn run(&self, event: LogEvent, ambient: &Fields) -> EnrichedEvent {
        let mut dict = event.fields.clone();
        for processor in &self.processors {
            processor.apply(&event, ambient, &mut dict);
        }
        let renamed = self
            .processors
            .iter()
            .any(|p| matches!(p, Processor::RenameEvent { .. }));
        if !renamed {
            dict.insert(EVENT_KEY.to_string(), Value::String(event.message.clone()));
        }
        EnrichedEvent { event, dict }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use crate::record::{ExceptionInfo, Level};

    #[test]
    fn default_chain_produces_stable_schema() {
        let event = LogEvent::new(Level::Warning, "trader", "order filled", fields! {"symbol" => "BTCUSDT"});
        let out = Pipeline::default().run(event, &Fields::new());
        let keys: Vec<&str> = out.dict.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["symbol", "logger", "level", "timestamp", "msg"]);
        assert_eq!(out.dict["msg"], "order filled");
        assert_eq!(out.dict["level"], "warning");
        assert_eq!(out.dict["logger"], "trader");
        assert!(out.dict["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn ambient_fields_do_not_override_explicit_ones() {
        let event = LogEvent::new(Level::Info, "root", "hello", fields! {"region" => "eu"});
        let ambient = fields! {"region" => "us", "host" => "node-1"};
        let out = Pipeline::default().run(event, &ambient);
        assert_eq!(out.dict["region"], "eu");
        assert_eq!(out.dict["host"], "node-1");
    }

    #[test]
    fn exception_is_formatted_into_field() {
        let exc = ExceptionInfo { chain: vec!["division by zero".to_string()] };
        let event = LogEvent::new(Level::Error, "root", "calculation failed", Fields::new()).with_exception(exc);
        let out = Pipeline::default().run(event, &Fields::new());
        assert_eq!(out.dict["exception"], "Error: division by zero");
    }

    #[test]
    fn caller_event_field_does_not_replace_message() {
        let event = LogEvent::new(Level::Info, "root", "user logged in", fields! {"event" => "login"});
        let out = Pipeline::default().run(event, &Fields::new());
        assert_eq!(out.dict["msg"], "user logged in");
        assert_eq!(out.dict["event"], "login");
    }

    #[test]
    fn chain_without_rename_keeps_event_key() {
        let pipeline = Pipeline::new(vec![Processor::AddLogLevel]);
        let event = LogEvent::new(Level::Info, "root", "hi", fields! {"event" => "shadow"});
        let out = pipeline.run(event, &Fields::new());
        assert_eq!(out.dict["event"], "hi");
        assert_eq!(out.dict["level"], "info");
    }

    #[test]
    fn custom_chain_runs_in_given_order() {
        let pipeline = Pipeline::new(vec![Processor::RenameEvent { to: "message".to_string() }]);
        let event = LogEvent::new(Level::Info, "root", "hi", Fields::new());
        let out = pipeline.run(event, &Fields::new());
        assert_eq!(out.dict.len(), 1);
        assert_eq!(out.dict["message"], "hi");
    }
}
