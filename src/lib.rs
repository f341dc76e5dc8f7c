//! Non-blocking structured logging.
//!
//! Log calls are filtered by level, enriched into an ordered field map and
//! handed to one background writer per destination: a timed rotating file
//! and/or the console. See [`init::Logging`] for the one-call setup.

pub mod error;
pub mod record;
pub mod clock;
pub mod rollover;
pub mod sink;
pub mod file;
pub mod console;
pub mod emitter;
pub mod pipeline;
pub mod render;
pub mod context;
pub mod destination;
pub mod dispatcher;
pub mod logger;
pub mod init;
pub mod env;

#[cfg(feature = "tracing-layer")]
pub mod layer;

pub use context::{AmbientContext, BindingSet, LogTagging};
pub use dispatcher::Dispatcher;
pub use error::{EmitterError, SetupError, SinkError};
pub use init::{get_logger, Logging, LoggingConfig};
pub use logger::Logger;
pub use record::{Fields, Level, LevelSpec, LogEvent};

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}

/// Build [`Fields`] from `key => value` pairs, keeping their order.
///
/// ```
/// let fields = async_rotating_log::fields! {"symbol" => "BTCUSDT", "size" => 1.5};
/// assert_eq!(fields.keys().collect::<Vec<_>>(), ["symbol", "size"]);
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        $crate::Fields::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut fields = $crate::Fields::new();
        $(
            fields.insert(
                ::std::string::String::from($key),
                $crate::__private::serde_json::to_value(&$value)
                    .unwrap_or($crate::__private::serde_json::Value::Null),
            );
        )+
        fields
    }};
}
