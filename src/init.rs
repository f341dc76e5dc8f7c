use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::console::{ConsoleSink, ConsoleStream};
use crate::destination::DestinationKey;
use crate::dispatcher::Dispatcher;
use crate::emitter::{AsyncEmitter, QueuePolicy};
use crate::error::{EmitterError, SetupError};
use crate::file::TimedRotatingFile;
use crate::logger::Logger;
use crate::record::{Fields, Level, LevelSpec};
use crate::render::{Formatter, DEFAULT_LOG_FORMAT};
use crate::rollover::RolloverSchedule;

pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_LOGGER_NAME: &str = "root";
pub const DEFAULT_LOG_WHEN: &str = "D";

/// Logging setup options.
///
/// **Fields**
/// - `log_file`: file name under `log_dir`; `None` means no file destination.
/// - `log_dir`: base directory, created if missing. Defaults to `logs`.
/// - `log_level`: minimum level as a name (`"WARNING"`) or number (`30`).
///   Defaults to INFO.
/// - `print_output`: also write to `console_stream` (stderr by default).
/// - `json_formatter`: JSON lines when `true`, `key=value` otherwise.
/// - `structlog_enabled`: `false` switches to plain text from `log_format`.
/// - `log_when` / `log_interval` / `utc`: rollover unit, count and calendar.
/// - `backup_count`: rotated files to keep, `0` keeps all.
/// - `queue`: pending-queue policy for every destination.
/// - `binding_dict`: fields bound to the returned logger.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_file: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub log_level: Option<LevelSpec>,
    pub print_output: bool,
    pub console_stream: ConsoleStream,
    pub json_formatter: bool,
    pub structlog_enabled: bool,
    pub log_format: Option<String>,
    pub log_when: String,
    pub log_interval: u32,
    pub utc: bool,
    pub backup_count: usize,
    pub queue: QueuePolicy,
    pub logger_name: String,
    pub binding_dict: Fields,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            log_dir: None,
            log_level: None,
            print_output: false,
            console_stream: ConsoleStream::default(),
            json_formatter: true,
            structlog_enabled: true,
            log_format: None,
            log_when: DEFAULT_LOG_WHEN.to_string(),
            log_interval: 1,
            utc: false,
            backup_count: 0,
            queue: QueuePolicy::default(),
            logger_name: DEFAULT_LOGGER_NAME.to_string(),
            binding_dict: Fields::new(),
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Result<Level, SetupError> {
        match &self.log_level {
            Some(spec) => spec.resolve(),
            None => Ok(Level::Info),
        }
    }

    pub fn formatter(&self) -> Result<Formatter, SetupError> {
        if !self.structlog_enabled {
            return Formatter::plain(self.log_format.as_deref().unwrap_or(DEFAULT_LOG_FORMAT));
        }
        Ok(if self.json_formatter {
            Formatter::json()
        } else {
            Formatter::key_value()
        })
    }

    pub fn schedule(&self) -> Result<RolloverSchedule, SetupError> {
        RolloverSchedule::parse(&self.log_when, self.log_interval, self.utc)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
    }
}

/// A configured logging setup and the logger handle it produced.
///
/// Setting up again on the same dispatcher never duplicates a destination:
/// a file path or console stream that is already attached is reused with
/// its original formatter, while the minimum level and the bindings of the
/// latest setup take effect.
pub struct Logging {
    dispatcher: Arc<Dispatcher>,
    logger: Logger,
    log_file: Option<PathBuf>,
    formatter: &'static str,
}

impl Logging {
    /// Configure the process-wide [`Dispatcher::global`].
    pub fn setup(config: LoggingConfig) -> Result<Self, SetupError> {
        Self::setup_with(Dispatcher::global(), config)
    }

    /// Configure `dispatcher`. All options are validated before anything
    /// is attached, and the minimum level changes only once every
    /// destination is in place. If opening a destination fails, the ones
    /// attached before it stay attached and a retried setup reuses them.
    pub fn setup_with(dispatcher: Arc<Dispatcher>, config: LoggingConfig) -> Result<Self, SetupError> {
        let level = config.level()?;
        let formatter = config.formatter()?;
        let schedule = config.schedule()?;
        let file_key = match &config.log_file {
            Some(file) => Some(DestinationKey::for_file(&config.log_dir(), file)?),
            None => None,
        };

        let log_file = file_key.as_ref().and_then(DestinationKey::file_path).map(Path::to_path_buf);
        if let (Some(key), Some(path)) = (file_key, log_file.as_ref()) {
            dispatcher.attach(key, || -> Result<AsyncEmitter, SetupError> {
                let sink = TimedRotatingFile::open(path, schedule, config.backup_count)?;
                Ok(AsyncEmitter::spawn(path.display().to_string(), sink, formatter.clone(), config.queue)?)
            })?;
        }

        if config.print_output {
            let stream = config.console_stream;
            dispatcher.attach(DestinationKey::Console(stream), || {
                AsyncEmitter::spawn(stream.as_str(), ConsoleSink::new(stream), formatter.clone(), config.queue)
            })?;
        }

        dispatcher.set_min_level(level);

        let logger = dispatcher
            .logger(config.logger_name.as_str())
            .bind(config.binding_dict.clone());

        let shown = log_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string());
        if config.structlog_enabled {
            logger.info_with(
                "logging set up",
                crate::fields! {
                    "log_file" => shown,
                    "json" => config.json_formatter,
                },
            );
        } else {
            logger.info(format!("logging set up in {shown}"));
        }

        Ok(Self {
            dispatcher,
            logger,
            log_file,
            formatter: formatter.describe(),
        })
    }

    /// A handle carrying the configured bindings.
    pub fn logger(&self) -> Logger {
        self.logger.clone()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Resolved path of the file destination, if one was configured.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Renderer chosen by this setup: `json`, `key_value` or `plain`.
    pub fn formatter(&self) -> &'static str {
        self.formatter
    }

    /// Bind more fields to the handle returned by [`logger`](Self::logger).
    pub fn add_bindings(&mut self, fields: Fields) {
        self.logger = self.logger.bind(fields);
    }

    /// Remove bound keys; unknown keys are ignored.
    pub fn rm_bindings<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.logger = self.logger.unbind(keys);
    }

    pub fn flush(&self) {
        self.dispatcher.flush();
    }

    /// Drain and close every destination of the dispatcher.
    pub fn shutdown(self) -> Result<(), EmitterError> {
        self.dispatcher.close()
    }

    /// Route `tracing` events through this setup's dispatcher.
    #[cfg(feature = "tracing-layer")]
    pub fn install_tracing(&self) -> Result<(), SetupError> {
        install_tracing_layer(Arc::clone(&self.dispatcher))
    }
}

/// Install a global `tracing` subscriber whose only layer is a
/// [`StructuredLayer`](crate::layer::StructuredLayer) feeding `dispatcher`.
#[cfg(feature = "tracing-layer")]
pub fn install_tracing_layer(dispatcher: Arc<Dispatcher>) -> Result<(), SetupError> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    let subscriber = Registry::default().with(crate::layer::StructuredLayer::new(dispatcher));
    tracing::subscriber::set_global_default(subscriber).map_err(|e| SetupError::Subscriber(e.to_string()))
}

/// Handle named `name` on the process-wide dispatcher.
pub fn get_logger(name: impl Into<String>) -> Logger {
    Dispatcher::global().logger(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = LoggingConfig::default();
        assert!(config.json_formatter);
        assert!(config.structlog_enabled);
        assert_eq!(config.log_when, "D");
        assert_eq!(config.level().unwrap(), Level::Info);
        assert_eq!(config.formatter().unwrap().describe(), "json");
        assert_eq!(config.log_dir(), PathBuf::from("logs"));
    }

    #[test]
    fn deserializes_partial_config() {
        let config: LoggingConfig = serde_json::from_str(
            r#"{"log_file": "app.log", "log_level": 30, "json_formatter": false,
                "queue": {"kind": "bounded", "capacity": 64, "overflow": "drop_newest"}}"#,
        )
        .unwrap();
        assert_eq!(config.level().unwrap(), Level::Warning);
        assert_eq!(config.formatter().unwrap().describe(), "key_value");
        assert_eq!(config.log_when, "D");
        assert!(matches!(config.queue, QueuePolicy::Bounded { capacity: 64, .. }));
    }

    #[test]
    fn invalid_options_fail_before_attaching() {
        let dispatcher = Arc::new(Dispatcher::new());
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            log_file: Some("app.log".into()),
            log_dir: Some(dir.path().to_path_buf()),
            log_level: Some("LOUD".into()),
            ..LoggingConfig::default()
        };
        assert!(matches!(
            Logging::setup_with(Arc::clone(&dispatcher), config),
            Err(SetupError::InvalidLevel(_))
        ));

        let config = LoggingConfig {
            log_file: Some("app.log".into()),
            log_dir: Some(dir.path().to_path_buf()),
            log_when: "fortnightly".into(),
            ..LoggingConfig::default()
        };
        assert!(matches!(
            Logging::setup_with(Arc::clone(&dispatcher), config),
            Err(SetupError::InvalidRotation(_))
        ));
        assert_eq!(dispatcher.destination_count(), 0);
    }

    #[test]
    fn failed_open_keeps_previous_level() {
        let dispatcher = Arc::new(Dispatcher::new());
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("taken")).unwrap();
        let config = LoggingConfig {
            log_file: Some("taken".into()),
            log_dir: Some(dir.path().to_path_buf()),
            log_level: Some("ERROR".into()),
            ..LoggingConfig::default()
        };
        assert!(matches!(
            Logging::setup_with(Arc::clone(&dispatcher), config),
            Err(SetupError::OpenFile { .. })
        ));
        assert_eq!(dispatcher.min_level(), Level::Info);
        assert_eq!(dispatcher.destination_count(), 0);
    }
}
