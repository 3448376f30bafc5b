// Configuration validation
//
// Checks that run after all sources are merged, before anything touches the
// database or filesystem.

use anyhow::{bail, Result};

use crate::Config;

pub fn validate_config(config: &Config) -> Result<()> {
    validate_database_url(&config.db.database_url)?;

    if config.executor.executor.trim().is_empty() {
        bail!("executor.executor must not be empty");
    }

    for (index, provider) in config.diagnostic_providers.iter().enumerate() {
        if provider.provider.trim().is_empty() {
            bail!("diagnostic_providers[{}].provider must not be empty", index);
        }
    }

    for (name, path) in [
        ("paths.scratch", &config.paths.scratch),
        ("paths.results", &config.paths.results),
        ("paths.log", &config.paths.log),
    ] {
        if path.as_os_str().is_empty() {
            bail!("{} must not be empty", name);
        }
    }

    Ok(())
}

fn validate_database_url(url: &str) -> Result<()> {
    if url.starts_with("sqlite:") || url.starts_with("postgres:") || url.starts_with("postgresql:")
    {
        Ok(())
    } else {
        bail!(
            "unsupported db.database_url '{}'. Supported schemes: sqlite, postgres",
            url
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_bad_database_url() {
        let mut config = Config::default();
        config.db.database_url = "mysql://localhost/ref".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_empty_executor_rejected() {
        let mut config = Config::default();
        config.executor.executor = String::new();
        assert!(validate_config(&config).is_err());
    }
}
