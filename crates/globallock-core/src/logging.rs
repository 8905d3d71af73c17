//! Logging setup for applications embedding globallock.
//!
//! Builds a `tracing-subscriber` registry with a console layer and an
//! optional rolling `globallock.log` file. `RUST_LOG` overrides the
//! configured level for every layer.
//!
//! | Variable                  | Meaning                         | Default |
//! |---------------------------|---------------------------------|---------|
//! | `GLOBALLOCK_LOG_LEVEL`    | Minimum level                   | `info`  |
//! | `GLOBALLOCK_LOG_CONSOLE`  | Console output on/off           | `true`  |
//! | `GLOBALLOCK_LOG_ANSI`     | Colored console output          | `true`  |
//! | `GLOBALLOCK_LOG_DIR`      | Directory for `globallock.log`  | unset   |

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

const LOG_FILE_NAME: &str = "globallock.log";

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub console_output: bool,
    /// ANSI colors on the console layer
    pub ansi: bool,
    /// Show the event target (module path)
    pub with_target: bool,
    /// File logging is enabled when set
    pub log_dir: Option<PathBuf>,
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            console_output: true,
            ansi: true,
            with_target: true,
            log_dir: None,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        let flag = |name: &str, default: bool| {
            std::env::var(name)
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default)
        };

        let level = std::env::var("GLOBALLOCK_LOG_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Level::INFO);

        Self {
            level,
            console_output: flag("GLOBALLOCK_LOG_CONSOLE", true),
            ansi: flag("GLOBALLOCK_LOG_ANSI", true),
            with_target: true,
            log_dir: std::env::var("GLOBALLOCK_LOG_DIR").ok().map(PathBuf::from),
            rotation: LogRotation::Daily,
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
    }
}

/// Keeps the non-blocking file writer alive; flushes on drop.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed; callers that may run more
/// than once (tests, embedded use) can ignore that error.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, Box<dyn std::error::Error>> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut file_guard = None;

    if config.console_output {
        let console_layer = fmt::layer()
            .with_target(config.with_target)
            .with_ansi(config.ansi)
            .with_filter(config.filter());
        layers.push(Box::new(console_layer));
    }

    if let Some(log_dir) = &config.log_dir {
        std::fs::create_dir_all(log_dir)?;
        let appender = RollingFileAppender::new(config.rotation.into(), log_dir, LOG_FILE_NAME);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(config.with_target)
            .with_thread_names(true)
            .with_ansi(false)
            .with_filter(config.filter());
        layers.push(Box::new(file_layer));
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    if let Some(log_dir) = &config.log_dir {
        tracing::info!(log_dir = %log_dir.display(), "File logging initialized");
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert!(config.console_output);
        assert!(config.log_dir.is_none());
        assert_eq!(config.level, Level::INFO);
    }

    #[test]
    fn test_log_rotation_conversion() {
        assert!(matches!(Rotation::from(LogRotation::Daily), Rotation::DAILY));
        assert!(matches!(Rotation::from(LogRotation::Hourly), Rotation::HOURLY));
        assert!(matches!(Rotation::from(LogRotation::Never), Rotation::NEVER));
    }

    #[test]
    fn test_init_twice_fails_second_time() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            console_output: false,
            log_dir: Some(dir.path().join("logs")),
            ..Default::default()
        };

        let guard = init_logging(&config);
        assert!(guard.is_ok());
        assert!(dir.path().join("logs").is_dir());
        assert!(init_logging(&config).is_err());
    }
}
