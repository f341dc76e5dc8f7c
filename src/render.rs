//! Renderers turning an [`EnrichedEvent`] into one line of output.

use chrono::Local;
use serde_json::Value;

use crate::error::{SetupError, SinkError};
use crate::pipeline::{EnrichedEvent, LEVEL_KEY, LOGGER_KEY, MESSAGE_KEY, TIMESTAMP_KEY};

/// Leading keys of every structured record, in output order.
pub const KEY_ORDER: [&str; 4] = [TIMESTAMP_KEY, LEVEL_KEY, MESSAGE_KEY, LOGGER_KEY];

pub const DEFAULT_LOG_FORMAT: &str = "%(asctime)s - %(name)s - %(levelname)s - %(message)s";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renderer {
    /// One JSON object per line.
    Json,
    /// `key=value` pairs separated by single spaces.
    KeyValue,
}

/// How a destination turns events into bytes. Chosen once per destination.
#[derive(Debug, Clone, PartialEq)]
pub enum Formatter {
    Structured(Renderer),
    /// Plain text from a `%(name)s` template. Structured fields are not shown.
    Plain(PlainTemplate),
}

impl Formatter {
    pub fn json() -> Self {
        Formatter::Structured(Renderer::Json)
    }

    pub fn key_value() -> Self {
        Formatter::Structured(Renderer::KeyValue)
    }

    pub fn plain(template: &str) -> Result<Self, SetupError> {
        Ok(Formatter::Plain(PlainTemplate::parse(template)?))
    }

    /// Short name used in the startup event.
    pub fn describe(&self) -> &'static str {
        match self {
            Formatter::Structured(Renderer::Json) => "json",
            Formatter::Structured(Renderer::KeyValue) => "key_value",
            Formatter::Plain(_) => "plain",
        }
    }

    pub fn format(&self, record: &EnrichedEvent) -> Result<Vec<u8>, SinkError> {
        match self {
            Formatter::Structured(Renderer::Json) => render_json(record),
            Formatter::Structured(Renderer::KeyValue) => Ok(render_key_value(record).into_bytes()),
            Formatter::Plain(template) => Ok(template.render(record).into_bytes()),
        }
    }
}

/// `(key, value)` pairs: [`KEY_ORDER`] first, then the rest in insertion order.
fn ordered(record: &EnrichedEvent) -> impl Iterator<Item = (&String, &Value)> {
    let leading = KEY_ORDER
        .iter()
        .filter_map(move |key| record.dict.get_key_value(*key));
    let rest = record
        .dict
        .iter()
        .filter(|(key, _)| !KEY_ORDER.contains(&key.as_str()));
    leading.chain(rest)
}

fn render_json(record: &EnrichedEvent) -> Result<Vec<u8>, SinkError> {
    let object: serde_json::Map<String, Value> = ordered(record)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Ok(serde_json::to_vec(&object)?)
}

fn render_key_value(record: &EnrichedEvent) -> String {
    let mut out = String::with_capacity(128);
    for (key, value) in ordered(record) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(key);
        out.push('=');
        push_kv_value(&mut out, value);
    }
    out
}

/// Bare strings stay bare unless they would break tokenisation, in which
/// case they are JSON-quoted. Everything else is written as JSON.
fn push_kv_value(out: &mut String, value: &Value) {
    match value {
        Value::String(s) if !needs_quoting(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty() || s.chars().any(|c| c.is_whitespace() || c.is_control() || c == '"' || c == '=')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attr {
    Asctime,
    Created,
    LevelName,
    LevelNo,
    Message,
    Name,
    Process,
}

impl Attr {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "asctime" => Attr::Asctime,
            "created" => Attr::Created,
            "levelname" => Attr::LevelName,
            "levelno" => Attr::LevelNo,
            "message" => Attr::Message,
            "name" => Attr::Name,
            "process" => Attr::Process,
            _ => return None,
        })
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Attr::Created | Attr::LevelNo | Attr::Process)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field {
        attr: Attr,
        left: bool,
        width: usize,
        precision: Option<usize>,
        conversion: char,
    },
}

/// Parsed `%(key)s` template. Supports `-`, a width, a `.precision` and the
/// `s`, `d`, `f` conversions; `%%` is a literal percent sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainTemplate {
    segments: Vec<Segment>,
}

impl PlainTemplate {
    pub fn parse(template: &str) -> Result<Self, SetupError> {
        let invalid = |why: &str| SetupError::InvalidFormat(format!("{why} in {template:?}"));
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => {
                    literal.push('%');
                    continue;
                }
                Some('(') => {}
                _ => return Err(invalid("expected '(' or '%' after '%'")),
            }

            let mut name = String::new();
            loop {
                match chars.next() {
                    Some(')') => break,
                    Some(ch) => name.push(ch),
                    None => return Err(invalid("unterminated placeholder")),
                }
            }
            let attr = Attr::parse(&name).ok_or_else(|| invalid(&format!("unknown key {name:?}")))?;

            let left = chars.next_if_eq(&'-').is_some();
            let mut width = 0usize;
            while let Some(d) = chars.next_if(char::is_ascii_digit) {
                width = width * 10 + d.to_digit(10).unwrap_or(0) as usize;
            }
            let mut precision = None;
            if chars.next_if_eq(&'.').is_some() {
                let mut p = 0usize;
                while let Some(d) = chars.next_if(char::is_ascii_digit) {
                    p = p * 10 + d.to_digit(10).unwrap_or(0) as usize;
                }
                precision = Some(p);
            }
            let conversion = match chars.next() {
                Some(conv @ ('s' | 'd' | 'f')) => conv,
                _ => return Err(invalid(&format!("missing conversion for {name:?}"))),
            };
            if conversion != 's' && !attr.is_numeric() {
                return Err(invalid(&format!("%{conversion} needs a numeric key, got {name:?}")));
            }

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Field { attr, left, width, precision, conversion });
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    pub fn render(&self, record: &EnrichedEvent) -> String {
        let event = &record.event;
        let mut out = String::with_capacity(128);
        for segment in &self.segments {
            let (attr, left, width, precision, conversion) = match segment {
                Segment::Literal(text) => {
                    out.push_str(text);
                    continue;
                }
                Segment::Field { attr, left, width, precision, conversion } => {
                    (*attr, *left, *width, *precision, *conversion)
                }
            };

            let created = event.timestamp.timestamp() as f64
                + f64::from(event.timestamp.timestamp_subsec_micros()) / 1_000_000.0;
            let value = match (attr, conversion) {
                (Attr::Created, 'd') => format!("{}", created.trunc() as i64),
                (Attr::Created, _) => format!("{:.*}", precision.unwrap_or(6), created),
                (Attr::LevelNo, 'f') => format!("{:.*}", precision.unwrap_or(6), f64::from(event.level.as_number())),
                (Attr::LevelNo, _) => event.level.as_number().to_string(),
                (Attr::Process, 'f') => format!("{:.*}", precision.unwrap_or(6), f64::from(std::process::id())),
                (Attr::Process, _) => std::process::id().to_string(),
                (Attr::Asctime, _) => event
                    .timestamp
                    .with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S,%3f")
                    .to_string(),
                (Attr::LevelName, _) => event.level.name().to_string(),
                (Attr::Name, _) => event.logger.clone(),
                (Attr::Message, _) => match &event.exception {
                    Some(exc) => format!("{}\n{}", event.message, exc.format()),
                    None => event.message.clone(),
                },
            };
            let value = match (conversion, precision) {
                ('s', Some(p)) => value.chars().take(p).collect(),
                _ => value,
            };

            if left {
                out.push_str(&format!("{value:<width$}"));
            } else {
                out.push_str(&format!("{value:>width$}"));
            }
        }
        out
    }
}
