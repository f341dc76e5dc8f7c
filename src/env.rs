//! Environment variable names used by this crate for configuring logging
//! from deployment manifests.
//!
//! These are purely helpers; [`LoggingConfig`] itself never reads the
//! environment unless asked to through [`LoggingConfig::from_env`].

use std::path::PathBuf;

use crate::init::LoggingConfig;
use crate::record::LevelSpec;

/// File name of the rotating log file.
pub const LOG_FILE_ENV: &str = "LOG_FILE";

/// Base directory for the log file.
pub const LOG_DIR_ENV: &str = "LOG_DIR";

/// Minimum level, by name or number.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Also print to the console (`1`/`true`/`yes`/`on`).
pub const LOG_PRINT_OUTPUT_ENV: &str = "LOG_PRINT_OUTPUT";

/// JSON renderer when true, key=value when false.
pub const LOG_JSON_ENV: &str = "LOG_JSON";

/// Structured pipeline when true, plain template when false.
pub const LOG_STRUCTURED_ENV: &str = "LOG_STRUCTURED";

/// Plain-text template.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Rollover unit (`S`, `M`, `H`, `D`, `MIDNIGHT`, `W0`..`W6`).
pub const LOG_WHEN_ENV: &str = "LOG_WHEN";

/// Number of rotated files to keep.
pub const LOG_BACKUP_COUNT_ENV: &str = "LOG_BACKUP_COUNT";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl LoggingConfig {
    /// Defaults overlaid with whatever `LOG_*` variables are set.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlay values found through `lookup`. Unparseable booleans and
    /// counts are ignored; level and rollover strings are kept as given and
    /// validated at setup.
    pub fn overlay<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(file) = lookup(LOG_FILE_ENV) {
            self.log_file = Some(file);
        }
        if let Some(dir) = lookup(LOG_DIR_ENV) {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup(LOG_LEVEL_ENV) {
            self.log_level = Some(match level.trim().parse::<u64>() {
                Ok(n) => LevelSpec::Number(n),
                Err(_) => LevelSpec::Name(level),
            });
        }
        if let Some(v) = lookup(LOG_PRINT_OUTPUT_ENV).as_deref().and_then(parse_bool) {
            self.print_output = v;
        }
        if let Some(v) = lookup(LOG_JSON_ENV).as_deref().and_then(parse_bool) {
            self.json_formatter = v;
        }
        if let Some(v) = lookup(LOG_STRUCTURED_ENV).as_deref().and_then(parse_bool) {
            self.structlog_enabled = v;
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV) {
            self.log_format = Some(format);
        }
        if let Some(when) = lookup(LOG_WHEN_ENV) {
            self.log_when = when;
        }
        match lookup(LOG_BACKUP_COUNT_ENV).map(|raw| raw.trim().parse::<usize>()) {
            Some(Ok(count)) => self.backup_count = count,
            Some(Err(e)) => tracing::warn!(error = %e, "ignoring invalid {LOG_BACKUP_COUNT_ENV}"),
            None => {}
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;
    use std::collections::HashMap;

    #[test]
    fn overlay_applies_known_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (LOG_FILE_ENV, "svc.log"),
            (LOG_LEVEL_ENV, "40"),
            (LOG_JSON_ENV, "off"),
            (LOG_WHEN_ENV, "H"),
            (LOG_BACKUP_COUNT_ENV, "7"),
        ]);
        let config = LoggingConfig::default().overlay(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.log_file.as_deref(), Some("svc.log"));
        assert_eq!(config.level().unwrap(), Level::Error);
        assert!(!config.json_formatter);
        assert_eq!(config.log_when, "H");
        assert_eq!(config.backup_count, 7);
    }

    #[test]
    fn overlay_ignores_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([(LOG_PRINT_OUTPUT_ENV, "maybe"), (LOG_BACKUP_COUNT_ENV, "x")]);
        let config = LoggingConfig::default().overlay(|k| vars.get(k).map(|v| v.to_string()));
        assert!(!config.print_output);
        assert_eq!(config.backup_count, 0);
    }
}
