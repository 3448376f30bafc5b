//! Test fixtures
//!
//! A small bundled provider whose diagnostics write real bundles, used by
//! the integration tests and available as the `example` provider in
//! configuration.

use serde_json::json;

use climeval_core::datasets::SourceDatasetType;
use climeval_core::diagnostics::{
    Diagnostic, ExecutionDefinition, ExecutionResult, METRIC_BUNDLE_FILENAME,
    OUTPUT_BUNDLE_FILENAME, OUT_LOG_FILENAME,
};
use climeval_core::error::ExecutionError;
use climeval_core::providers::DiagnosticProvider;
use climeval_core::requirements::{DataRequirement, FacetFilter};
use climeval_core::{DataCatalog, DatasetPartition, DatasetRow, MetricBundle, OutputBundle};

/// A diagnostic that "computes" a global mean and writes well-formed bundles
pub struct GlobalMeanDiagnostic {
    requirements: Vec<DataRequirement>,
    facets: Vec<String>,
}

impl Default for GlobalMeanDiagnostic {
    fn default() -> Self {
        Self {
            requirements: vec![DataRequirement::new(SourceDatasetType::Cmip6)
                .with_filter(FacetFilter::keeping([("variable_id", ["tas", "rsut"])]))
                .group_by(["variable_id", "experiment_id"])],
            facets: vec!["region".to_string(), "statistic".to_string()],
        }
    }
}

impl Diagnostic for GlobalMeanDiagnostic {
    fn slug(&self) -> &str {
        "global-mean"
    }

    fn name(&self) -> &str {
        "Global mean"
    }

    fn data_requirements(&self) -> &[DataRequirement] {
        &self.requirements
    }

    fn facets(&self) -> &[String] {
        &self.facets
    }

    fn run(&self, definition: &ExecutionDefinition) -> Result<ExecutionResult, ExecutionError> {
        let output_directory = definition.output_directory();

        let bundle = MetricBundle::new(
            vec!["region".to_string(), "statistic".to_string()],
            json!({"global": {"mean": 287.5}}),
        );
        bundle
            .dump_to_json(&output_directory.join(METRIC_BUNDLE_FILENAME))
            .map_err(|err| ExecutionError(err.to_string()))?;

        let modeldata = definition
            .datasets
            .items()
            .flat_map(|(_, collection)| collection.paths())
            .map(|path| path.to_string_lossy().into_owned())
            .collect();
        let output = OutputBundle::build(modeldata, OUT_LOG_FILENAME);
        output
            .dump_to_json(&output_directory.join(OUTPUT_BUNDLE_FILENAME))
            .map_err(|err| ExecutionError(err.to_string()))?;

        Ok(ExecutionResult::build())
    }
}

/// A diagnostic whose entry point always raises
pub struct FailingDiagnostic {
    requirements: Vec<DataRequirement>,
    facets: Vec<String>,
}

impl Default for FailingDiagnostic {
    fn default() -> Self {
        Self {
            requirements: vec![DataRequirement::new(SourceDatasetType::Cmip6)
                .with_filter(FacetFilter::keeping([("variable_id", ["tas"])]))
                .group_by(["variable_id", "experiment_id"])],
            facets: Vec::new(),
        }
    }
}

impl Diagnostic for FailingDiagnostic {
    fn slug(&self) -> &str {
        "always-fails"
    }

    fn name(&self) -> &str {
        "Always fails"
    }

    fn data_requirements(&self) -> &[DataRequirement] {
        &self.requirements
    }

    fn facets(&self) -> &[String] {
        &self.facets
    }

    fn run(&self, _definition: &ExecutionDefinition) -> Result<ExecutionResult, ExecutionError> {
        Err(ExecutionError("deliberate failure".to_string()))
    }
}

/// The provider bundled for tests and demos
pub fn example_provider() -> DiagnosticProvider {
    let mut provider = DiagnosticProvider::new("Example", "1.0.0");
    provider.register(GlobalMeanDiagnostic::default());
    provider.register(FailingDiagnostic::default());
    provider
}

/// A five-dataset CMIP6 catalog: variables {tas, rsut} over two experiments
/// (plus one unrelated variable), one variant each
pub fn sample_catalog() -> DataCatalog {
    DataCatalog::new().with_partition(DatasetPartition::from_rows(
        SourceDatasetType::Cmip6,
        sample_rows(),
    ))
}

/// The rows behind [`sample_catalog`], for tests that ingest them
pub fn sample_rows() -> Vec<DatasetRow> {
    fn row(instance_id: &str, variable: &str, experiment: &str) -> DatasetRow {
        DatasetRow::new(instance_id, format!("/data/{instance_id}.nc"))
            .with_facet("variable_id", variable)
            .with_facet("experiment_id", experiment)
            .with_facet("source_id", "ACCESS-ESM1-5")
            .with_facet("variant_label", "r1i1p1f1")
    }

    vec![
        row("CMIP6.tas.historical.r1i1p1f1.v1", "tas", "historical"),
        row("CMIP6.tas.ssp126.r1i1p1f1.v1", "tas", "ssp126"),
        row("CMIP6.rsut.historical.r1i1p1f1.v1", "rsut", "historical"),
        row("CMIP6.rsut.ssp126.r1i1p1f1.v1", "rsut", "ssp126"),
        row("CMIP6.pr.historical.r1i1p1f1.v1", "pr", "historical"),
    ]
}
