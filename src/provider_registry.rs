//! Provider resolution
//!
//! Configuration refers to providers by name; implementations register a
//! factory at startup and the names are resolved here. An unknown name is
//! fatal (exit code 2), matching the configured-class policy.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Context;
use once_cell::sync::Lazy;
use tracing::debug;

use climeval_config::Config;
use climeval_core::error::InvalidProviderError;
use climeval_core::providers::{DiagnosticProvider, ProviderRegistry};
use climeval_db::Database;

type ProviderFactory = fn() -> DiagnosticProvider;

static FACTORIES: Lazy<RwLock<BTreeMap<String, ProviderFactory>>> =
    Lazy::new(|| RwLock::new(BTreeMap::new()));

/// Register a provider factory under a name usable in configuration
pub fn register_provider_factory(name: &str, factory: ProviderFactory) {
    FACTORIES
        .write()
        .expect("provider factory lock poisoned")
        .insert(name.to_string(), factory);
}

fn register_builtin_factories() {
    register_provider_factory("example", crate::testing::example_provider);
}

/// Instantiate a provider by its configured name
pub fn build_provider(name: &str) -> Result<DiagnosticProvider, InvalidProviderError> {
    register_builtin_factories();
    let factories = FACTORIES.read().expect("provider factory lock poisoned");
    let factory = factories.get(name).ok_or_else(|| InvalidProviderError {
        provider: name.to_string(),
        reason: format!(
            "no provider factory registered under this name. Known: {}",
            factories.keys().cloned().collect::<Vec<_>>().join(", ")
        ),
    })?;
    Ok(factory())
}

/// Build the active provider registry from configuration and record every
/// provider in the database
pub async fn build_registry(config: &Config, db: &Database) -> anyhow::Result<ProviderRegistry> {
    let mut providers = Vec::new();
    for entry in &config.diagnostic_providers {
        let provider = build_provider(&entry.provider)?;
        debug!(
            provider = provider.slug(),
            version = provider.version(),
            "loaded provider"
        );
        providers.push(provider);
    }

    let registry = db.registry();
    for provider in &providers {
        registry
            .register_provider(provider)
            .await
            .with_context(|| format!("failed to register provider '{}'", provider.slug()))?;
    }

    Ok(ProviderRegistry::new(providers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_example_provider() {
        let provider = build_provider("example").unwrap();
        assert_eq!(provider.slug(), "example");
        assert!(!provider.diagnostics().is_empty());
    }

    #[test]
    fn test_unknown_provider_is_invalid() {
        let err = build_provider("nope").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
