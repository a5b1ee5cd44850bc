//! Tracing setup for the trainer binary.
//!
//! Two layers share one filter directive from `[logging] filter`: a console
//! layer on stderr, which `RUST_LOG` overrides, and an optional rolling file
//! under `~/.local/share/mimic-trainer/logs/` by default. Episode and step
//! events are emitted at `debug`, so `filter = "info,mimic_trainer::episode=debug"`
//! traces every step of a run without flooding the rest.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `"warn,mimic_trainer=info"`.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Also write to a rolling log file.
    #[serde(default = "default_to_file")]
    pub to_file: bool,
    /// Log file directory. Defaults to the XDG data dir.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// File name prefix; the appender adds the date.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default)]
    pub rotation: LogRotation,
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_to_file() -> bool {
    true
}

fn default_file_prefix() -> String {
    "mimic-trainer.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            to_file: default_to_file(),
            dir: None,
            file_prefix: default_file_prefix(),
            rotation: LogRotation::default(),
        }
    }
}

impl LoggingConfig {
    /// Console-only logging with the given filter.
    #[must_use]
    pub fn console(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            to_file: false,
            ..Self::default()
        }
    }

    /// Writes log files into `dir`.
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self.to_file = true;
        self
    }

    /// Checks that the filter directive parses.
    ///
    /// # Errors
    ///
    /// Returns `LoggingError::invalid_filter` with the parser's message.
    pub fn validate(&self) -> Result<(), LoggingError> {
        EnvFilter::try_new(&self.filter)
            .map(|_| ())
            .map_err(|e| LoggingError::invalid_filter(&self.filter, e.to_string()))
    }

    /// Directory log files are written to.
    ///
    /// # Errors
    ///
    /// Returns an error if no directory is configured and the platform data
    /// directory is unknown.
    pub fn log_dir(&self) -> Result<PathBuf, LoggingError> {
        if let Some(dir) = &self.dir {
            return Ok(dir.clone());
        }
        dirs::data_local_dir()
            .map(|dir| dir.join("mimic-trainer").join("logs"))
            .ok_or_else(LoggingError::no_log_dir)
    }
}

/// How often the log file rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Keeps the background file writer alive. Dropping it flushes the file.
pub struct LoggingGuard {
    _writer: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingGuard")
            .field("file", &self._writer.is_some())
            .finish()
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingError {
    /// The specific error that occurred
    pub kind: LoggingErrorKind,
}

/// Specific logging error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggingErrorKind {
    /// The filter directive did not parse
    InvalidFilter {
        /// The configured directive
        directive: String,
        /// The parser's message
        reason: String,
    },
    /// No log directory configured and no platform default
    NoLogDir,
    /// The log directory could not be created
    CreateDir {
        /// The directory
        path: PathBuf,
        /// The OS error message
        reason: String,
    },
    /// A global subscriber was already installed
    AlreadyInstalled {
        /// The subscriber's message
        reason: String,
    },
}

impl LoggingError {
    /// Creates a new LoggingError with the given kind.
    #[must_use]
    pub fn new(kind: LoggingErrorKind) -> Self {
        Self { kind }
    }

    /// Creates an invalid filter error.
    #[must_use]
    pub fn invalid_filter(directive: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(LoggingErrorKind::InvalidFilter {
            directive: directive.into(),
            reason: reason.into(),
        })
    }

    /// Creates a missing log directory error.
    #[must_use]
    pub fn no_log_dir() -> Self {
        Self::new(LoggingErrorKind::NoLogDir)
    }

    /// Creates a directory creation error.
    #[must_use]
    pub fn create_dir(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::new(LoggingErrorKind::CreateDir {
            path: path.into(),
            reason: reason.into(),
        })
    }

    /// Creates an already-installed error.
    #[must_use]
    pub fn already_installed(reason: impl Into<String>) -> Self {
        Self::new(LoggingErrorKind::AlreadyInstalled {
            reason: reason.into(),
        })
    }
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LoggingErrorKind::InvalidFilter { directive, reason } => {
                write!(f, "invalid log filter '{}': {}", directive, reason)
            }
            LoggingErrorKind::NoLogDir => {
                write!(
                    f,
                    "could not determine a log directory; set logging.dir or XDG_DATA_HOME"
                )
            }
            LoggingErrorKind::CreateDir { path, reason } => {
                write!(
                    f,
                    "failed to create log directory '{}': {}",
                    path.display(),
                    reason
                )
            }
            LoggingErrorKind::AlreadyInstalled { reason } => {
                write!(f, "tracing subscriber already installed: {}", reason)
            }
        }
    }
}

impl std::error::Error for LoggingError {}

/// Installs the global subscriber.
///
/// Hold the returned guard until the process exits.
///
/// # Errors
///
/// Returns an error if the filter is invalid, the log directory cannot be
/// created, or a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    config.validate()?;

    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(&config.filter),
    };
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let (file, writer) = if config.to_file {
        let dir = config.log_dir()?;
        std::fs::create_dir_all(&dir).map_err(|e| LoggingError::create_dir(&dir, e.to_string()))?;

        let appender = RollingFileAppender::new(config.rotation.into(), &dir, &config.file_prefix);
        let (non_blocking, writer) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(EnvFilter::new(&config.filter));
        (Some(layer), Some(writer))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| LoggingError::already_installed(e.to_string()))?;

    Ok(LoggingGuard { _writer: writer })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_log_info_to_daily_file() {
        let config = LoggingConfig::default();
        assert_eq!(config.filter, "info");
        assert!(config.to_file);
        assert_eq!(config.rotation, LogRotation::Daily);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_partial_section() {
        let config: LoggingConfig =
            toml::from_str("filter = \"debug\"\nrotation = \"never\"").unwrap();
        assert_eq!(config.filter, "debug");
        assert_eq!(config.rotation, LogRotation::Never);
        assert_eq!(config.file_prefix, "mimic-trainer.log");
    }

    #[test]
    fn rejects_malformed_filter() {
        let config = LoggingConfig::console("mimic_trainer=notalevel");
        let error = config.validate().unwrap_err();
        assert!(matches!(error.kind, LoggingErrorKind::InvalidFilter { .. }));
        assert!(error.to_string().contains("notalevel"));
    }

    #[test]
    fn console_config_skips_file() {
        let config = LoggingConfig::console("warn");
        assert!(!config.to_file);
        assert!(config.with_dir("/tmp/x").to_file);
    }

    #[test]
    fn explicit_dir_wins() {
        let config = LoggingConfig::default().with_dir("/var/log/mimic");
        assert_eq!(config.log_dir().unwrap(), PathBuf::from("/var/log/mimic"));
    }

    #[test]
    fn default_dir_is_namespaced() {
        if let Ok(dir) = LoggingConfig::default().log_dir() {
            assert!(dir.ends_with("mimic-trainer/logs"));
        }
    }

    #[test]
    fn rotation_maps_to_appender() {
        assert_eq!(Rotation::from(LogRotation::Hourly), Rotation::HOURLY);
        assert_eq!(Rotation::from(LogRotation::Never), Rotation::NEVER);
    }
}
