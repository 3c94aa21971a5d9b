//! Subscriber setup for the kernel suite.
//!
//! Only `gg_quant::init` and the matmul driver emit events. JSON lines carry
//! the fields of the enclosing `quant_matmul` span (weight dtype, kernel
//! variant, shape) so each event can be tied to one multiply, and closing a
//! driver span records its busy time.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when no level is configured.
pub const DEFAULT_FILTER: &str = "gg_quant=info";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

impl LogFormat {
    /// Parse a format name case-insensitively; `None` if unrecognized.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
        }
    }
}

/// Where and how driver events are written.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives. Empty means [`DEFAULT_FILTER`].
    pub level: String,
    /// Append events to this file instead of stderr.
    pub output_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: DEFAULT_FILTER.to_string(),
            output_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
    #[error("Cannot open log file {0}")]
    FileOpen(String),
    #[error("Subscriber already initialized")]
    AlreadyInitialized,
}

fn build_filter(level: &str) -> Result<EnvFilter, LogError> {
    let directives = match level.trim() {
        "" => DEFAULT_FILTER,
        trimmed => trimmed,
    };
    EnvFilter::try_new(directives).map_err(|e| LogError::InvalidFilter(format!("{directives}: {e}")))
}

fn open_log_file(path: &Path) -> Result<File, LogError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LogError::FileOpen(format!("{}: {e}", path.display())))
}

/// Install the global subscriber. Fails if one is already installed.
///
/// The filter is validated and the file opened before anything is
/// installed, so a failed call leaves the process without a subscriber.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter = build_filter(&config.level)?;
    let to_terminal = config.output_path.is_none();
    let writer = match &config.output_path {
        Some(path) => BoxMakeWriter::new(Mutex::new(open_log_file(path)?)),
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(to_terminal)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(writer),
            )
            .try_init(),
    };
    installed.map_err(|_| LogError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" pretty "), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn blank_level_is_accepted() {
        assert!(build_filter("  ").is_ok());
        assert!(build_filter("").is_ok());
        assert!(build_filter("gg_quant=trace").is_ok());
    }

    #[test]
    fn bad_filter_names_the_directive() {
        let config = LogConfig {
            level: "gg_quant=notalevel".to_string(),
            ..LogConfig::default()
        };
        match init_logging(&config) {
            Err(LogError::InvalidFilter(msg)) => assert!(msg.contains("gg_quant=notalevel"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn log_file_is_opened_for_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernels.log");
        std::fs::write(&path, "earlier\n").unwrap();
        drop(open_log_file(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier\n");
    }
}
