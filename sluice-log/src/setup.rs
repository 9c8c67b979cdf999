use std::env;
use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt as tracing_fmt};

/// All crates of this workspace, which are logged at the configured level.
///
/// Third-party crates are capped at `INFO`.
const CRATE_NAMES: &[&str] = &[
    "sluice",
    "sluice_config",
    "sluice_log",
    "sluice_metrics",
    "sluice_server",
    "sluice_statsd",
];

/// Controls the log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO sluice::setup: launching sluice from config folder .sluice
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2020-12-04T12:10:32.481Z  INFO sluice::setup: launching sluice from config folder .sluice
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2020-12-04T12:11:08.729716Z","level":"INFO","target":"sluice::setup","message":"launching sluice from config folder .sluice"}
    /// ```
    Json,
}

/// The maximum level of log messages emitted by Sluice.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Only errors.
    Error,
    /// Errors and warnings.
    Warn,
    /// The default level.
    Info,
    /// Messages relevant to debugging.
    Debug,
    /// Everything.
    Trace,
    /// Disables logging entirely.
    Off,
}

impl Level {
    /// Returns the [`LevelFilter`] matching this level.
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Info => LevelFilter::INFO,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
            Level::Off => LevelFilter::OFF,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.level_filter().fmt(f)
    }
}

impl std::str::FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "error" => Level::Error,
            "warn" | "warning" => Level::Warn,
            "info" => Level::Info,
            "debug" => Level::Debug,
            "trace" => Level::Trace,
            "off" => Level::Off,
            _ => return Err(ParseLevelError),
        })
    }
}

/// An error returned when parsing an unknown [`Level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLevelError;

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid log level")
    }
}

impl std::error::Error for ParseLevelError {}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for Sluice.
    pub level: Level,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based on the TTY.
    pub format: LogFormat,

    /// When set to `true`, backtraces are forced on.
    ///
    /// Otherwise, backtraces can be enabled by setting the `RUST_BACKTRACE` variable to `full`.
    pub enable_backtraces: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: LogFormat::Auto,
            enable_backtraces: false,
        }
    }
}

/// Builds the filter directives for the given level.
fn default_directives(level: Level) -> String {
    let level = level.level_filter();

    // Third-party crates never log more verbose than INFO.
    let mut directives = std::cmp::min(level, LevelFilter::INFO).to_string();
    for name in CRATE_NAMES {
        write!(directives, ",{name}={level}").ok();
    }

    directives.to_lowercase()
}

/// Initialize the logging system.
///
/// If `RUST_LOG` is set, it takes precedence over the configured level.
///
/// # Example
///
/// ```
/// let log_config = sluice_log::LogConfig {
///     enable_backtraces: true,
///     ..Default::default()
/// };
///
/// sluice_log::init(&log_config);
/// ```
pub fn init(config: &LogConfig) {
    if config.enable_backtraces {
        // SAFETY: logging is initialized on the main thread before any other thread is spawned.
        unsafe { env::set_var("RUST_BACKTRACE", "full") };
    }

    let filter = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(default_directives(config.level)),
    };

    let format: Box<dyn Layer<Registry> + Send + Sync> =
        match (config.format, console::user_attended()) {
            (LogFormat::Auto, true) | (LogFormat::Pretty, _) => tracing_fmt::layer()
                .compact()
                .with_target(true)
                .with_ansi(true)
                .boxed(),
            (LogFormat::Auto, false) | (LogFormat::Simplified, _) => tracing_fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .boxed(),
            (LogFormat::Json, _) => tracing_fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_span_list(false)
                .boxed(),
        };

    tracing_subscriber::registry()
        .with(format.with_filter(filter))
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_roundtrip() {
        for level in ["error", "warn", "info", "debug", "trace", "off"] {
            let parsed: Level = level.parse().unwrap();
            assert_eq!(parsed.to_string().to_lowercase(), level);
        }
    }

    #[test]
    fn test_level_warning_alias() {
        assert_eq!("WARNING".parse::<Level>(), Ok(Level::Warn));
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn test_default_filter_caps_third_party() {
        let directives = default_directives(Level::Trace);
        assert!(directives.starts_with("info,"));
        assert!(directives.contains(",sluice_metrics=trace"));

        let directives = default_directives(Level::Warn);
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains(",sluice_server=warn"));
    }

    #[test]
    fn test_config_deserialize() {
        let config: LogConfig =
            serde_json::from_str(r#"{"level": "debug", "format": "json"}"#).unwrap();
        assert_eq!(config.level, Level::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert!(!config.enable_backtraces);
    }
}
