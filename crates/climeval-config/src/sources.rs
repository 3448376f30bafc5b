// Configuration source loading
//
// Loads configuration from multiple sources with priority:
// 1. REF_* environment variables (highest)
// 2. Config file from REF_CONFIG path
// 3. Default config files (./climeval.toml, ./.climeval.toml)
// 4. Built-in defaults (lowest)

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{Config, LogLevel, ProviderConfig};

const ENV_PREFIX: &str = "REF_";

/// Load configuration from all sources
pub fn load_config() -> Result<Config> {
    let mut config = match config_file()? {
        Some(path) => parse_file(&path)?,
        None => Config::default(),
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;

    Ok(config)
}

/// Load configuration from an explicit file
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let mut config = parse_file(path)?;
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Locate the configuration file, if any
fn config_file() -> Result<Option<PathBuf>> {
    if let Some(path) = get_env_string("CONFIG")? {
        return Ok(Some(PathBuf::from(path)));
    }
    for path in ["./climeval.toml", "./.climeval.toml"] {
        if Path::new(path).exists() {
            return Ok(Some(PathBuf::from(path)));
        }
    }
    Ok(None)
}

fn parse_file(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    // toml errors carry line/column, giving the source-location hint for
    // unknown or malformed keys
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// Apply environment variable overrides (highest priority)
///
/// Every config key has a fallback named after its underscored path, e.g.
/// `paths.scratch` is overridden by `REF_PATHS_SCRATCH`.
fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Some(path) = get_env_string("PATHS_SCRATCH")? {
        config.paths.scratch = PathBuf::from(path);
    }
    if let Some(path) = get_env_string("PATHS_RESULTS")? {
        config.paths.results = PathBuf::from(path);
    }
    if let Some(path) = get_env_string("PATHS_LOG")? {
        config.paths.log = PathBuf::from(path);
    }

    if let Some(url) = get_env_string("DB_DATABASE_URL")? {
        config.db.database_url = url;
    }

    if let Some(executor) = get_env_string("EXECUTOR_EXECUTOR")? {
        config.executor.executor = executor;
    }

    if let Some(providers) = get_env_string("DIAGNOSTIC_PROVIDERS")? {
        config.diagnostic_providers = providers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|name| ProviderConfig {
                provider: name.to_string(),
                config: Default::default(),
            })
            .collect();
    }

    if let Some(level) = get_env_string("LOG_LEVEL")? {
        config.log_level = level
            .parse::<LogLevel>()
            .map_err(anyhow::Error::msg)
            .context("invalid REF_LOG_LEVEL value")?;
    }

    Ok(())
}

/// Helper: Get environment variable as string
fn get_env_string(key: &str) -> Result<Option<String>> {
    let full_key = format!("{}{}", ENV_PREFIX, key);
    match env::var(&full_key) {
        Ok(val) if !val.is_empty() => Ok(Some(val)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read env var {}", full_key)),
    }
}
