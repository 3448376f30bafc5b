//! Diagnostic providers
//!
//! A provider is a named, versioned collection of diagnostics. Providers are
//! registered at startup; executors resolve a diagnostic implementation
//! through its provider by slug.

use std::sync::Arc;

use crate::diagnostics::Diagnostic;
use crate::error::{InvalidDiagnosticError, InvalidProviderError};

/// A named collection of diagnostics, versioned as a unit
#[derive(Clone)]
pub struct DiagnosticProvider {
    slug: String,
    name: String,
    version: String,
    diagnostics: Vec<Arc<dyn Diagnostic>>,
}

impl DiagnosticProvider {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            slug: slugify(&name),
            name,
            version: version.into(),
            diagnostics: Vec::new(),
        }
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Register a diagnostic with this provider
    pub fn register(&mut self, diagnostic: impl Diagnostic + 'static) {
        self.diagnostics.push(Arc::new(diagnostic));
    }

    pub fn diagnostics(&self) -> &[Arc<dyn Diagnostic>] {
        &self.diagnostics
    }

    /// Resolve a diagnostic by slug
    pub fn diagnostic(&self, slug: &str) -> Result<Arc<dyn Diagnostic>, InvalidDiagnosticError> {
        self.diagnostics
            .iter()
            .find(|d| d.slug() == slug)
            .cloned()
            .ok_or_else(|| InvalidDiagnosticError {
                diagnostic: slug.to_string(),
                reason: format!("not registered with provider '{}'", self.slug),
            })
    }
}

impl std::fmt::Debug for DiagnosticProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticProvider")
            .field("slug", &self.slug)
            .field("version", &self.version)
            .field("diagnostics", &self.diagnostics.len())
            .finish()
    }
}

/// The currently active providers
///
/// Executors resolve a diagnostic implementation through the registry by
/// `(provider_slug, diagnostic_slug)`; cross-process workers do the same
/// lookup on their side of the broker.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<DiagnosticProvider>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<DiagnosticProvider>) -> Self {
        Self { providers }
    }

    pub fn providers(&self) -> &[DiagnosticProvider] {
        &self.providers
    }

    pub fn provider(&self, slug: &str) -> Result<&DiagnosticProvider, InvalidProviderError> {
        self.providers
            .iter()
            .find(|p| p.slug() == slug)
            .ok_or_else(|| InvalidProviderError {
                provider: slug.to_string(),
                reason: "provider is not active".to_string(),
            })
    }

    /// Resolve a diagnostic implementation
    pub fn resolve(
        &self,
        provider_slug: &str,
        diagnostic_slug: &str,
    ) -> Result<Arc<dyn Diagnostic>, InvalidProviderError> {
        let provider = self.provider(provider_slug)?;
        provider
            .diagnostic(diagnostic_slug)
            .map_err(|err| InvalidProviderError {
                provider: provider_slug.to_string(),
                reason: err.to_string(),
            })
    }
}

/// Derive a slug from a human readable name
///
/// Lowercases and replaces whitespace/underscore runs with single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Example Provider"), "example-provider");
        assert_eq!(slugify("ENSO_basic  metrics"), "enso-basic-metrics");
        assert_eq!(slugify("trailing "), "trailing");
    }

    #[test]
    fn test_unknown_diagnostic() {
        let provider = DiagnosticProvider::new("Example", "1.0.0");
        assert!(provider.diagnostic("missing").is_err());
    }
}
