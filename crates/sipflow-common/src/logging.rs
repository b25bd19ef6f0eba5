//! Logging configuration and initialization
//!
//! All sipflow binaries log through `tracing`. This module installs the global
//! subscriber from a [`LogConfig`], which is normally read from the
//! environment:
//!
//! - `LOG_LEVEL`: trace, debug, info, warn, error
//! - `LOG_OUTPUT`: console, file, both
//! - `LOG_FORMAT`: text, json
//! - `LOG_DIR` / `LOG_FILE_PREFIX`: daily rotated file location
//! - `LOG_FILTER`: extra directives such as `sqlx=warn,tower_http=debug`
//! - `LOG_INCLUDE_LOCATION`, `LOG_INCLUDE_THREAD_IDS`, `LOG_INCLUDE_TARGETS`
//!
//! Use structured fields rather than formatted strings:
//!
//! ```rust
//! use tracing::info;
//!
//! let sip_uuid = "0b0c7c5e-0d0e-4a8e-9f0a-7f4a0d9a6d61";
//! info!(sip = %sip_uuid, "SIP queued");
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    filter::Directive,
    EnvFilter, Layer, Registry,
};

use crate::env;

/// A `LOG_*` value outside the accepted names
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} {value:?}")]
pub struct UnknownValue {
    kind: &'static str,
    value: String,
}

/// Match `s` case-insensitively against a table of names.
fn choose<T: Copy>(
    kind: &'static str,
    s: &str,
    table: &[(&str, T)],
) -> std::result::Result<T, UnknownValue> {
    let needle = s.trim().to_ascii_lowercase();
    table
        .iter()
        .find(|(name, _)| *name == needle)
        .map(|(_, v)| *v)
        .ok_or_else(|| UnknownValue {
            kind,
            value: s.to_string(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = UnknownValue;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        choose(
            "log level",
            s,
            &[
                ("trace", LogLevel::Trace),
                ("debug", LogLevel::Debug),
                ("info", LogLevel::Info),
                ("warn", LogLevel::Warn),
                ("warning", LogLevel::Warn),
                ("error", LogLevel::Error),
            ],
        )
    }
}

/// Where records are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    fn console(self) -> bool {
        self != LogOutput::File
    }

    fn file(self) -> bool {
        self != LogOutput::Console
    }
}

impl FromStr for LogOutput {
    type Err = UnknownValue;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        choose(
            "log output",
            s,
            &[
                ("console", LogOutput::Console),
                ("stdout", LogOutput::Console),
                ("file", LogOutput::File),
                ("both", LogOutput::Both),
                ("all", LogOutput::Both),
            ],
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = UnknownValue;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        choose(
            "log format",
            s,
            &[
                ("text", LogFormat::Text),
                ("pretty", LogFormat::Text),
                ("json", LogFormat::Json),
            ],
        )
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,
    /// Directory for rotated log files, used when `output` includes a file.
    pub log_dir: PathBuf,
    /// File name prefix, e.g. "sipflow-server" -> "sipflow-server.2024-08-01".
    pub log_file_prefix: String,
    /// Additional `EnvFilter` directives, comma separated.
    pub filter_directives: Option<String>,
    pub include_location: bool,
    pub include_thread_ids: bool,
    pub include_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::for_service("sipflow")
    }
}

impl LogConfig {
    /// Defaults for a binary whose log files are named after `service`
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            level: LogLevel::default(),
            output: LogOutput::default(),
            format: LogFormat::default(),
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: service.into(),
            filter_directives: None,
            include_location: false,
            include_thread_ids: false,
            include_targets: true,
        }
    }

    pub fn with_filter(mut self, directives: impl Into<String>) -> Self {
        self.filter_directives = Some(directives.into());
        self
    }

    /// Load configuration from `LOG_*` variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Override fields of `self` with any `LOG_*` variable that is set
    pub fn merge_env(self) -> Result<Self> {
        Ok(Self {
            level: env::parse_or("LOG_LEVEL", self.level)?,
            output: env::parse_or("LOG_OUTPUT", self.output)?,
            format: env::parse_or("LOG_FORMAT", self.format)?,
            log_dir: env::var("LOG_DIR").map(PathBuf::from).unwrap_or(self.log_dir),
            log_file_prefix: env::var_or("LOG_FILE_PREFIX", &self.log_file_prefix),
            filter_directives: env::var("LOG_FILTER").or(self.filter_directives),
            include_location: env::parse_or("LOG_INCLUDE_LOCATION", self.include_location)?,
            include_thread_ids: env::parse_or("LOG_INCLUDE_THREAD_IDS", self.include_thread_ids)?,
            include_targets: env::parse_or("LOG_INCLUDE_TARGETS", self.include_targets)?,
        })
    }

    fn filter(&self) -> Result<EnvFilter> {
        let base = EnvFilter::from_default_env().add_directive(Level::from(self.level).into());

        self.filter_directives
            .iter()
            .flat_map(|d| d.split(','))
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .try_fold(base, |filter, directive| {
                let directive = directive
                    .parse::<Directive>()
                    .with_context(|| format!("invalid log filter directive {directive:?}"))?;
                Ok(filter.add_directive(directive))
            })
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn fmt_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(config.include_targets)
        .with_thread_ids(config.include_thread_ids)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(ansi);

    match config.format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Install the global tracing subscriber
///
/// Must be called once at startup. The file appender guard is leaked so the
/// background writer lives as long as the process.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.output.console() {
        layers.push(fmt_layer(config, std::io::stdout, true));
    }

    if config.output.file() {
        std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        std::mem::forget(guard);
        layers.push(fmt_layer(config, non_blocking, false));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(config.filter()?)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_choices() {
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!(" DEBUG ".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("stdout".parse::<LogOutput>().unwrap(), LogOutput::Console);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Text);

        let err = "loud".parse::<LogLevel>().unwrap_err();
        assert_eq!(err.to_string(), "unknown log level \"loud\"");
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_output_flags() {
        assert!(LogOutput::Console.console());
        assert!(!LogOutput::Console.file());
        assert!(!LogOutput::File.console());
        assert!(LogOutput::Both.console() && LogOutput::Both.file());
    }

    #[test]
    fn test_service_defaults() {
        let config = LogConfig::for_service("sipflow-test").with_filter("sqlx=warn, ,tower_http=debug");
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.output, LogOutput::Console);
        assert_eq!(config.log_file_prefix, "sipflow-test");
        assert!(config.filter().is_ok());
    }

    #[test]
    fn test_invalid_filter_directive() {
        let config = LogConfig::default().with_filter("sqlx=[");
        assert!(config.filter().is_err());
    }

    #[test]
    fn test_file_output_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            output: LogOutput::File,
            log_dir: dir.path().join("nested"),
            ..LogConfig::for_service("sipflow-test")
        };
        // Installing twice fails, but the directory is created first.
        let _ = init_logging(&config);
        assert!(dir.path().join("nested").is_dir());
    }
}
