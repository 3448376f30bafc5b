//! Outcome handling shared by every executor
//!
//! When an execution finishes, its bundles are validated against the active
//! controlled vocabulary, artifacts are copied from the scratch area into
//! the results area, and the outcome is recorded in the registry. Validation
//! failures become Failure outcomes; the raw output stays in the scratch
//! directory for inspection.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::{error, info, warn};

use climeval_config::Config;
use climeval_core::diagnostics::{ExecutionDefinition, ExecutionResult, OUT_LOG_FILENAME, SERIES_VALUES_FILENAME};
use climeval_core::executor::ExecutionHandle;
use climeval_core::{Cv, MetricBundle, OutputBundle, SeriesMetricValue};
use climeval_db::{ExecutionOutcome, ExecutionRegistry, OutputArtifact};

/// Validates results and persists outcomes
#[derive(Clone)]
pub struct OutcomeHandler {
    scratch: PathBuf,
    results: PathBuf,
    registry: ExecutionRegistry,
    cv: Cv,
}

impl OutcomeHandler {
    pub fn new(config: &Config, registry: ExecutionRegistry, cv: Cv) -> Self {
        Self {
            scratch: config.paths.scratch.clone(),
            results: config.paths.results.clone(),
            registry,
            cv,
        }
    }

    /// Handle the result of one execution
    ///
    /// Never fails: problems are converted into a Failure outcome, and a
    /// registry error is logged (the group then stays dirty and is retried
    /// by a later solve).
    pub async fn handle(
        &self,
        handle: ExecutionHandle,
        definition: &ExecutionDefinition,
        result: &ExecutionResult,
    ) {
        let outcome = self.build_outcome(definition, result);
        match &outcome {
            ExecutionOutcome::Success { .. } => {
                info!("'{}' successful", definition.execution_slug());
            }
            ExecutionOutcome::Failure { reason } => {
                info!("'{}' failed: {reason}", definition.execution_slug());
            }
        }
        if let Err(err) = self.registry.record_outcome(handle.execution_id, &outcome).await {
            error!(
                execution_id = handle.execution_id,
                "failed to record outcome: {err}"
            );
        }
    }

    fn build_outcome(
        &self,
        definition: &ExecutionDefinition,
        result: &ExecutionResult,
    ) -> ExecutionOutcome {
        if !result.successful {
            return ExecutionOutcome::Failure {
                reason: "diagnostic reported failure".to_string(),
            };
        }
        match self.validate_and_collect(definition, result) {
            Ok(outcome) => outcome,
            Err(err) => {
                // Artifacts stay in the scratch directory for inspection
                warn!(
                    "invalid result for '{}': {err:#}",
                    definition.execution_slug()
                );
                ExecutionOutcome::Failure {
                    reason: format!("{err:#}"),
                }
            }
        }
    }

    fn validate_and_collect(
        &self,
        definition: &ExecutionDefinition,
        result: &ExecutionResult,
    ) -> anyhow::Result<ExecutionOutcome> {
        let Some(metric_filename) = &result.metric_bundle_filename else {
            bail!("successful result is missing a metric bundle");
        };
        let Some(output_filename) = &result.output_bundle_filename else {
            bail!("successful result is missing an output bundle");
        };

        let output_directory = definition.output_directory();

        let metric_bundle = MetricBundle::load_from_json(&output_directory.join(metric_filename))?;
        let metric_values = metric_bundle.scalar_values()?;
        for value in &metric_values {
            self.cv.validate_scalar(value)?;
        }

        let series_path = output_directory.join(SERIES_VALUES_FILENAME);
        if series_path.exists() {
            for series in SeriesMetricValue::load_from_json(&series_path)? {
                self.cv.validate_series(&series)?;
            }
        }

        let output_bundle = OutputBundle::load_from_json(&output_directory.join(output_filename))?;

        let outputs = self.copy_artifacts(definition, result, &output_bundle)?;
        Ok(ExecutionOutcome::Success {
            outputs,
            metric_values,
        })
    }

    /// Copy every artifact of a successful execution into the results tree
    ///
    /// The destination is derived from the execution's output fragment and
    /// never collides with another execution.
    fn copy_artifacts(
        &self,
        definition: &ExecutionDefinition,
        result: &ExecutionResult,
        output_bundle: &OutputBundle,
    ) -> anyhow::Result<Vec<OutputArtifact>> {
        let mut artifacts = vec![OutputArtifact {
            output_type: "log".to_string(),
            filename: OUT_LOG_FILENAME.to_string(),
            long_name: None,
            description: None,
        }];
        if let Some(filename) = &result.metric_bundle_filename {
            artifacts.push(OutputArtifact {
                output_type: "metrics".to_string(),
                filename: filename.to_string_lossy().into_owned(),
                long_name: Some("Metric bundle".to_string()),
                description: None,
            });
        }
        if let Some(filename) = &result.output_bundle_filename {
            artifacts.push(OutputArtifact {
                output_type: "data".to_string(),
                filename: filename.to_string_lossy().into_owned(),
                long_name: Some("Output bundle".to_string()),
                description: None,
            });
        }
        for (kind, file) in output_bundle.artifacts() {
            artifacts.push(OutputArtifact {
                output_type: kind.to_string(),
                filename: file.filename.clone(),
                long_name: Some(file.long_name.clone()),
                description: Some(file.description.clone()),
            });
        }

        for artifact in &artifacts {
            self.copy_file_to_results(&definition.output_fragment, Path::new(&artifact.filename))?;
        }

        Ok(artifacts)
    }

    fn copy_file_to_results(&self, fragment: &Path, filename: &Path) -> anyhow::Result<()> {
        let source = self.scratch.join(fragment).join(filename);
        if !source.exists() {
            bail!("could not find {} in {}", filename.display(), self.scratch.join(fragment).display());
        }

        let destination = self.results.join(fragment).join(filename);
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::copy(&source, &destination)
            .with_context(|| format!("failed to copy {} into results", filename.display()))?;
        Ok(())
    }
}
