// climeval-core - Executor-agnostic core logic
//
// This crate contains the pure domain logic of the evaluation framework:
// dataset catalogs, data requirements, the requirement evaluator, the
// diagnostic and provider contracts, and result validation. No database,
// no runtime wiring - those live in the sibling crates.

pub mod catalog;
pub mod cv;
pub mod datasets;
pub mod diagnostics;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod metric_values;
pub mod output;
pub mod providers;
pub mod requirements;

// Re-export the types nearly every consumer needs
pub use catalog::{DataCatalog, DatasetPartition};
pub use cv::{Cv, Dimension, DimensionValue};
pub use datasets::{
    DatasetCollection, DatasetRow, ExecutionDatasetCollection, Selector, SourceDatasetType,
};
pub use metric_values::{ScalarMetricValue, SeriesMetricValue};
pub use output::{MetricBundle, OutputBundle, OutputFile};
pub use diagnostics::{Diagnostic, ExecutionDefinition, ExecutionResult};
pub use error::{
    ConstraintNotSatisfied, EvaluatorError, ExecutionError, ExecutorError, InvalidDiagnosticError,
    InvalidExecutorError, InvalidProviderError, ResultValidationError,
};
pub use executor::{ExecutionHandle, Executor};
pub use providers::{DiagnosticProvider, ProviderRegistry};
pub use requirements::{DataRequirement, FacetFilter, GroupConstraint, GroupOperation, GroupValidator};
