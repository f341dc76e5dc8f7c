use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::str::FromStr;

use crate::error::SetupError;

/// Ordered structured fields. Insertion order is kept (the `preserve_order`
/// feature of `serde_json`) so key=value output follows the caller's order.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Severity of a [`LogEvent`], ordered from least to most severe.
///
/// Numeric values follow the conventional 10/20/30/40/50 scale so that
/// configurations may give either the name or the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Level {
    Debug = 10,
    Info = 20,
    Warning = 30,
    Error = 40,
    Critical = 50,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Debug,
        Level::Info,
        Level::Warning,
        Level::Error,
        Level::Critical,
    ];

    /// Lowercase name used by the structured renderers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Critical => "critical",
        }
    }

    /// Uppercase name used by the plain-text `%(levelname)s` placeholder.
    pub fn name(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }

    pub fn as_number(&self) -> u8 {
        *self as u8
    }

    pub fn from_number(n: u64) -> Option<Level> {
        Level::ALL.into_iter().find(|l| u64::from(l.as_number()) == n)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARNING" | "WARN" => Ok(Level::Warning),
            "ERROR" => Ok(Level::Error),
            "CRITICAL" | "FATAL" => Ok(Level::Critical),
            other => match other.parse::<u64>() {
                Ok(n) => Level::from_number(n).ok_or_else(|| SetupError::InvalidLevel(s.to_string())),
                Err(_) => Err(SetupError::InvalidLevel(s.to_string())),
            },
        }
    }
}

/// A minimum level as written in configuration: either `"WARNING"` or `30`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LevelSpec {
    Number(u64),
    Name(String),
}

impl LevelSpec {
    pub fn resolve(&self) -> Result<Level, SetupError> {
        match self {
            LevelSpec::Number(n) => {
                Level::from_number(*n).ok_or_else(|| SetupError::InvalidLevel(n.to_string()))
            }
            LevelSpec::Name(name) => name.parse(),
        }
    }
}

impl From<Level> for LevelSpec {
    fn from(level: Level) -> Self {
        LevelSpec::Number(u64::from(level.as_number()))
    }
}

impl From<&str> for LevelSpec {
    fn from(name: &str) -> Self {
        LevelSpec::Name(name.to_string())
    }
}

impl From<u64> for LevelSpec {
    fn from(n: u64) -> Self {
        LevelSpec::Number(n)
    }
}

/// An error captured at emit time, rendered later as a traceback-like field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionInfo {
    /// `Display` of the error followed by each of its sources, outermost first.
    pub chain: Vec<String>,
}

impl ExceptionInfo {
    pub fn capture(err: &(dyn Error + 'static)) -> Self {
        let mut chain = vec![err.to_string()];
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self { chain }
    }

    /// Multi-line rendering: the error, then a numbered "Caused by" list.
    pub fn format(&self) -> String {
        let mut out = String::new();
        let mut iter = self.chain.iter();
        if let Some(head) = iter.next() {
            out.push_str("Error: ");
            out.push_str(head);
        }
        let causes: Vec<&String> = iter.collect();
        if !causes.is_empty() {
            out.push_str("\n\nCaused by:");
            for (i, cause) in causes.iter().enumerate() {
                out.push_str(&format!("\n    {}: {}", i, cause));
            }
        }
        out
    }
}

/// A single log call, frozen at creation.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub logger: String,
    pub message: String,
    /// Bound fields merged with the per-call fields (per-call wins).
    pub fields: Fields,
    pub exception: Option<ExceptionInfo>,
}

impl LogEvent {
    pub fn new(level: Level, logger: impl Into<String>, message: impl Into<String>, fields: Fields) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            logger: logger.into(),
            message: message.into(),
            fields,
            exception: None,
        }
    }

    pub fn with_exception(mut self, exception: ExceptionInfo) -> Self {
        self.exception = Some(exception);
        self
    }
}
