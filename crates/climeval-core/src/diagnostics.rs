//! The diagnostic contract
//!
//! A diagnostic is opaque to the core: it declares its data requirements and
//! exposes an execution entry point which is pure with respect to its
//! definition input and its declared output directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::datasets::ExecutionDatasetCollection;
use crate::error::ExecutionError;
use crate::requirements::DataRequirement;

/// Everything a worker needs to run one diagnostic execution
///
/// This is pure data: cross-process executors marshal it and resolve the
/// diagnostic implementation by `(provider_slug, diagnostic_slug)` inside
/// the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDefinition {
    pub provider_slug: String,
    pub diagnostic_slug: String,
    /// Human-readable key of the execution group
    pub key: String,
    pub datasets: ExecutionDatasetCollection,
    /// Root directory artifacts are written under while the execution runs
    pub root_directory: PathBuf,
    /// Per-execution subdirectory fragment,
    /// `{provider_slug}/{diagnostic_slug}/{group_key}/{attempt_index}`
    pub output_fragment: PathBuf,
}

impl ExecutionDefinition {
    /// Absolute directory this execution writes its artifacts to
    pub fn output_directory(&self) -> PathBuf {
        self.root_directory.join(&self.output_fragment)
    }

    /// Identifier used in log messages and task names
    pub fn execution_slug(&self) -> String {
        format!(
            "{}/{}/{}",
            self.provider_slug, self.diagnostic_slug, self.key
        )
    }

    /// Resolve a bundle filename relative to the output directory
    pub fn to_output_path(&self, filename: &Path) -> PathBuf {
        self.output_directory().join(filename)
    }
}

/// Name of the per-execution log file inside the output directory
pub const OUT_LOG_FILENAME: &str = "out.log";

/// Default filename of the metric bundle inside the output directory
pub const METRIC_BUNDLE_FILENAME: &str = "diagnostic.json";

/// Default filename of the output bundle inside the output directory
pub const OUTPUT_BUNDLE_FILENAME: &str = "output.json";

/// Conventional filename for series-valued outputs, when a diagnostic
/// produces them
pub const SERIES_VALUES_FILENAME: &str = "series.json";

/// Outcome of one diagnostic run, as reported by the entry point
///
/// Bundle paths are relative to the definition's output directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub successful: bool,
    pub output_bundle_filename: Option<PathBuf>,
    pub metric_bundle_filename: Option<PathBuf>,
}

impl ExecutionResult {
    /// A successful result referencing the conventional bundle filenames
    pub fn build() -> Self {
        Self {
            successful: true,
            output_bundle_filename: Some(PathBuf::from(OUTPUT_BUNDLE_FILENAME)),
            metric_bundle_filename: Some(PathBuf::from(METRIC_BUNDLE_FILENAME)),
        }
    }

    pub fn build_from_failure() -> Self {
        Self {
            successful: false,
            output_bundle_filename: None,
            metric_bundle_filename: None,
        }
    }
}

/// An analysis routine producing a metric bundle from one or more datasets
///
/// Implementations are registered on a provider at startup. The entry point
/// must confine its filesystem effects to the definition's output directory.
pub trait Diagnostic: Send + Sync {
    /// Unique (per provider) identifier of the diagnostic
    fn slug(&self) -> &str;

    /// Human readable name
    fn name(&self) -> &str;

    /// Declarative description of the datasets this diagnostic consumes
    fn data_requirements(&self) -> &[DataRequirement];

    /// Dimension names this diagnostic's metric values use
    fn facets(&self) -> &[String];

    /// Execute the diagnostic
    fn run(&self, definition: &ExecutionDefinition) -> Result<ExecutionResult, ExecutionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::ExecutionDatasetCollection;
    use std::collections::BTreeMap;

    #[test]
    fn test_output_directory_joins_fragment() {
        let definition = ExecutionDefinition {
            provider_slug: "example".to_string(),
            diagnostic_slug: "global-mean".to_string(),
            key: "tas_historical".to_string(),
            datasets: ExecutionDatasetCollection::new(BTreeMap::new()),
            root_directory: PathBuf::from("/scratch"),
            output_fragment: PathBuf::from("example/global-mean/tas_historical/0"),
        };
        assert_eq!(
            definition.output_directory(),
            PathBuf::from("/scratch/example/global-mean/tas_historical/0")
        );
        assert_eq!(definition.execution_slug(), "example/global-mean/tas_historical");
    }
}
