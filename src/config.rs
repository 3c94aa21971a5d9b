//! Kernel-suite configuration loading from environment variables or TOML.
//!
//! All configuration values are loaded from `GG_QUANT_*` environment
//! variables with sensible defaults. Invalid values fall back to defaults
//! without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `GG_QUANT_LOG_LEVEL` | info | `EnvFilter` directive |
//! | `GG_QUANT_LOG_FORMAT` | json | `json` or `pretty` |
//! | `GG_QUANT_LOG_FILE` | unset | Log file path (stderr if unset) |
//! | `GG_QUANT_FORCE_SCALAR` | false | Run the blocked GEMV/GEMM on the scalar reference |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::telemetry::{LogConfig, LogFormat, DEFAULT_FILTER};

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub log_level: String,
    pub log_format: &'static str,
    pub log_file: Option<String>,
    pub force_scalar: bool,
}

/// Configuration for logging and kernel selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// `EnvFilter` directives, e.g. `gg_quant=debug`.
    pub log_level: String,
    pub log_format: LogFormat,
    /// Log file; stderr when `None`.
    pub log_file: Option<PathBuf>,
    /// Route the matmul driver through the scalar reference kernels.
    pub force_scalar: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_FILTER.to_string(),
            log_format: LogFormat::Json,
            log_file: None,
            force_scalar: false,
        }
    }
}

/// Parse a boolean env var (`1/0`, `true/false`, `yes/no`, `on/off`),
/// returning `default` on missing or invalid.
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Parse a non-empty string env var, returning `default` otherwise.
fn parse_string(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val.trim().to_string(),
        _ => default.to_string(),
    }
}

/// Load configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> KernelConfig {
    let defaults = KernelConfig::default();
    let log_format = std::env::var("GG_QUANT_LOG_FORMAT")
        .ok()
        .and_then(|v| LogFormat::parse(&v))
        .unwrap_or(defaults.log_format);
    let log_file = std::env::var("GG_QUANT_LOG_FILE")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from);

    KernelConfig {
        log_level: parse_string("GG_QUANT_LOG_LEVEL", &defaults.log_level),
        log_format,
        log_file,
        force_scalar: parse_bool("GG_QUANT_FORCE_SCALAR", defaults.force_scalar),
    }
}

impl KernelConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Logging settings derived from this configuration.
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            format: self.log_format,
            level: self.log_level.clone(),
            output_path: self.log_file.clone(),
        }
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            log_level: self.log_level.clone(),
            log_format: self.log_format.as_str(),
            log_file: self.log_file.as_ref().map(|p| p.display().to_string()),
            force_scalar: self.force_scalar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "GG_QUANT_LOG_LEVEL",
        "GG_QUANT_LOG_FORMAT",
        "GG_QUANT_LOG_FILE",
        "GG_QUANT_FORCE_SCALAR",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        assert_eq!(cfg, KernelConfig::default());
        assert_eq!(cfg.log_level, DEFAULT_FILTER);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert!(cfg.log_file.is_none());
        assert!(!cfg.force_scalar);
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("GG_QUANT_LOG_LEVEL", "gg_quant=debug");
        std::env::set_var("GG_QUANT_LOG_FORMAT", "Pretty");
        std::env::set_var("GG_QUANT_LOG_FILE", "/tmp/gg-quant.log");
        std::env::set_var("GG_QUANT_FORCE_SCALAR", "yes");
        let cfg = load();
        assert_eq!(cfg.log_level, "gg_quant=debug");
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert_eq!(cfg.log_file, Some(PathBuf::from("/tmp/gg-quant.log")));
        assert!(cfg.force_scalar);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("GG_QUANT_LOG_FORMAT", "xml");
        std::env::set_var("GG_QUANT_FORCE_SCALAR", "maybe");
        std::env::set_var("GG_QUANT_LOG_LEVEL", "   ");
        let cfg = load();
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert!(!cfg.force_scalar);
        assert_eq!(cfg.log_level, DEFAULT_FILTER);
        clear_env_vars();
    }

    #[test]
    fn test_toml_partial_document() {
        let cfg = KernelConfig::from_toml_str("force_scalar = true\nlog_format = \"pretty\"\n").unwrap();
        assert!(cfg.force_scalar);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert_eq!(cfg.log_level, DEFAULT_FILTER);
    }

    #[test]
    fn test_toml_rejects_bad_format() {
        let err = KernelConfig::from_toml_str("log_format = \"xml\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_effective_config_contains_all_fields() {
        let cfg = KernelConfig {
            log_file: Some(PathBuf::from("kernels.log")),
            ..KernelConfig::default()
        };
        let eff = cfg.effective_config();
        assert_eq!(eff.log_level, DEFAULT_FILTER);
        assert_eq!(eff.log_format, "json");
        assert_eq!(eff.log_file.as_deref(), Some("kernels.log"));
        assert!(!eff.force_scalar);
    }
}
