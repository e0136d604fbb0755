//! Logger configuration using Figment.
//!
//! Configuration is layered from:
//! 1. built-in defaults (an absent file still yields a valid configuration)
//! 2. a TOML file (`config/envlog.toml` by default)
//! 3. environment variables prefixed with `ENVLOG_`, using `__` for nesting
//!
//! Durations are written in humantime form (`"250ms"`, `"1s"`, `"2m"`).
//!
//! # Example
//! ```no_run
//! use envlog::config::LoggerConfig;
//!
//! # fn main() -> envlog::error::AppResult<()> {
//! let config = LoggerConfig::load()?;
//! config.validate()?;
//! println!("Sampling every {:?}", config.sampling.period);
//! # Ok(())
//! # }
//! ```
//!
//! Override a single value from the environment:
//! `ENVLOG_SAMPLING__PERIOD=500ms envlog run`

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::coordination::SamplePeriod;
use crate::data::clock::CalendarTimestamp;
use crate::error::{AppResult, LoggerError, TimestampError};
use crate::tracing_setup::{parse_log_level, OutputFormat};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/envlog.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "ENVLOG_";

/// Smallest accepted control line length.
const MIN_LINE_LEN: usize = 8;

/// Top-level logger configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// `[application]`
    pub application: ApplicationConfig,
    /// `[buffer]`
    pub buffer: BufferConfig,
    /// `[sampling]`
    pub sampling: SamplingConfig,
    /// `[storage]`
    pub storage: StorageConfig,
    /// `[control]`
    pub control: ControlConfig,
    /// `[clock]`
    pub clock: ClockConfig,
}

/// Application-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Name reported in the startup trace.
    pub name: String,
    /// trace, debug, info, warn or error
    pub log_level: String,
    /// pretty, compact or json
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "envlog".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Telemetry buffer sizing and flush policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum number of records held in memory.
    pub capacity: usize,
    /// The buffer auto-flushes after roughly this much sampling time.
    #[serde(with = "humantime_serde")]
    pub consume_window: Duration,
    /// How long insert and drain wait for the buffer lock.
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 2000,
            consume_window: Duration::from_secs(60),
            lock_timeout: Duration::from_millis(250),
        }
    }
}

/// Sampling worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Initial sampling period, 100ms to 30s.
    #[serde(with = "humantime_serde")]
    pub period: Duration,
    /// Whether the admission gate starts open.
    pub start_enabled: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            start_enabled: true,
        }
    }
}

/// Removable storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory standing in for the card's mount point.
    pub mount_point: PathBuf,
    /// Log file name inside the mount point.
    pub file_name: String,
    /// Retry a failed mount this often. Unset: wait for `SD M`.
    #[serde(with = "humantime_serde")]
    pub retry_interval: Option<Duration>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from("sd"),
            file_name: "data.txt".to_string(),
            retry_interval: None,
        }
    }
}

/// Control plane settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Longer input lines are truncated.
    pub max_line_len: usize,
    /// Initial state of the `LOGGING` toggle.
    pub logging_enabled: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            max_line_len: 64,
            logging_enabled: false,
        }
    }
}

/// Real-time clock settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// `YYYY-MM-DD HH:MM:SS`; local time when unset.
    pub start: Option<String>,
}

impl ClockConfig {
    /// Timestamp the clock starts from.
    pub fn start_timestamp(&self) -> Result<CalendarTimestamp, TimestampError> {
        match &self.start {
            Some(text) => CalendarTimestamp::parse(text),
            None => Ok(CalendarTimestamp::now_local()),
        }
    }
}

impl LoggerConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(LoggerConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(LoggerError::Configuration(msg));

        parse_log_level(&self.application.log_level).map_err(LoggerError::Configuration)?;
        self.application
            .log_format
            .parse::<OutputFormat>()
            .map_err(LoggerError::Configuration)?;

        if self.buffer.capacity == 0 {
            return invalid("buffer.capacity must be at least 1".to_string());
        }
        if self.buffer.consume_window.is_zero() {
            return invalid("buffer.consume_window must be non-zero".to_string());
        }
        if self.buffer.lock_timeout.is_zero() {
            return invalid("buffer.lock_timeout must be non-zero".to_string());
        }
        if !SamplePeriod::in_range(self.sampling.period) {
            return invalid(format!(
                "sampling.period {:?} outside {:?}..={:?}",
                self.sampling.period,
                SamplePeriod::MIN,
                SamplePeriod::MAX
            ));
        }
        if self.storage.file_name.trim().is_empty() {
            return invalid("storage.file_name must not be empty".to_string());
        }
        if self.storage.retry_interval.is_some_and(|d| d.is_zero()) {
            return invalid("storage.retry_interval must be non-zero when set".to_string());
        }
        if self.control.max_line_len < MIN_LINE_LEN {
            return invalid(format!(
                "control.max_line_len {} is below the minimum of {MIN_LINE_LEN}",
                self.control.max_line_len
            ));
        }
        if let Some(start) = &self.clock.start {
            CalendarTimestamp::parse(start)
                .map_err(|e| LoggerError::Configuration(format!("clock.start: {e}")))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = LoggerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer.capacity, 2000);
        assert_eq!(config.sampling.period, Duration::from_secs(1));
        assert_eq!(config.storage.file_name, "data.txt");
    }

    #[test]
    #[serial]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggerConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, LoggerConfig::default());
    }

    #[test]
    #[serial]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[buffer]
capacity = 500
lock_timeout = "100ms"

[sampling]
period = "2s"

[storage]
mount_point = "/mnt/sd"
retry_interval = "30s"

[clock]
start = "2021-03-04 05:06:07"
"#
        )
        .unwrap();

        let config = LoggerConfig::load_from(file.path()).unwrap();
        assert_eq!(config.buffer.capacity, 500);
        assert_eq!(config.buffer.lock_timeout, Duration::from_millis(100));
        assert_eq!(config.buffer.consume_window, Duration::from_secs(60));
        assert_eq!(config.sampling.period, Duration::from_secs(2));
        assert_eq!(config.storage.mount_point, PathBuf::from("/mnt/sd"));
        assert_eq!(config.storage.retry_interval, Some(Duration::from_secs(30)));
        assert_eq!(
            config.clock.start_timestamp().unwrap().to_string(),
            "2021-03-04 05:06:07"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("ENVLOG_SAMPLING__PERIOD", "500ms");
        std::env::set_var("ENVLOG_CONTROL__LOGGING_ENABLED", "true");
        let config = LoggerConfig::load_from(dir.path().join("absent.toml"));
        std::env::remove_var("ENVLOG_SAMPLING__PERIOD");
        std::env::remove_var("ENVLOG_CONTROL__LOGGING_ENABLED");

        let config = config.unwrap();
        assert_eq!(config.sampling.period, Duration::from_millis(500));
        assert!(config.control.logging_enabled);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = LoggerConfig::default();
        config.sampling.period = Duration::from_millis(50);
        assert!(matches!(
            config.validate(),
            Err(LoggerError::Configuration(_))
        ));

        let mut config = LoggerConfig::default();
        config.buffer.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = LoggerConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = LoggerConfig::default();
        config.application.log_format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = LoggerConfig::default();
        config.control.max_line_len = 4;
        assert!(config.validate().is_err());

        let mut config = LoggerConfig::default();
        config.clock.start = Some("2021-02-30 00:00:00".to_string());
        assert!(config.validate().is_err());
    }
}
