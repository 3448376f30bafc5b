// climeval-config - Unified configuration for the evaluation framework
//
// Supports configuration from multiple sources:
// 1. Environment variables with the REF_ prefix (highest priority)
// 2. Config file path from REF_CONFIG env var
// 3. Default config file locations (./climeval.toml, ./.climeval.toml)
// 4. Built-in defaults (lowest priority)

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

mod sources;
mod validation;

/// Top-level configuration
///
/// Unknown keys are rejected at load time; the parse error carries the
/// offending file and location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    // Scalar first so the TOML dump stays valid (values before tables)
    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub db: DbConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Active providers, in solve order
    #[serde(default)]
    pub diagnostic_providers: Vec<ProviderConfig>,
}

/// Directories used by the framework
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Where executions write their artifacts while running
    pub scratch: PathBuf,
    /// Where artifacts of successful executions are copied to
    pub results: PathBuf,
    /// Framework log files
    pub log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            scratch: PathBuf::from(".climeval/scratch"),
            results: PathBuf::from(".climeval/results"),
            log: PathBuf::from(".climeval/log"),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbConfig {
    /// Connection string; sqlite and postgres URLs are supported
    pub database_url: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://.climeval/climeval.db?mode=rwc".to_string(),
        }
    }
}

/// Executor selection plus free-form executor options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Name of a registered executor (`local`, `synchronous`, `broker`)
    pub executor: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, toml::Value>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            executor: "local".to_string(),
            config: BTreeMap::new(),
        }
    }
}

/// One active diagnostic provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Name of a registered provider factory
    pub provider: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(format!(
                "unknown log level: {}. Supported: DEBUG, INFO, WARNING, ERROR",
                s
            )),
        }
    }
}

impl Config {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Load configuration from an explicit file, then apply env overrides
    pub fn load_from_path(path: &Path) -> Result<Self> {
        sources::load_config_from_path(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Dump the resolved configuration as a TOML string
    pub fn dumps(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.executor.executor, "local");
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.diagnostic_providers.is_empty());
        assert!(config.db.database_url.starts_with("sqlite://"));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let parsed: Result<Config, _> = toml::from_str("unknown_key = 1\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_round_trip() {
        let config = Config::default();
        let dumped = config.dumps().unwrap();
        let parsed: Config = toml::from_str(&dumped).unwrap();
        assert_eq!(parsed.db.database_url, config.db.database_url);
        assert_eq!(parsed.paths.scratch, config.paths.scratch);
    }
}
