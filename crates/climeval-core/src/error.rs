//! Error types shared across the evaluation framework

use std::time::Duration;

use thiserror::Error;

use crate::datasets::SourceDatasetType;

/// Errors raised while evaluating a data requirement against a catalog
///
/// An evaluator error aborts the current diagnostic's solve; other
/// diagnostics continue.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    /// A filter or group-by referenced a facet that is not a column of the
    /// catalog partition
    #[error("unknown facet '{facet}' for source type '{source_type}'")]
    UnknownFacet {
        source_type: SourceDatasetType,
        facet: String,
    },
}

/// A group operation could not complete its invariant
///
/// The affected group is discarded and logged at WARNING; evaluation of the
/// remaining groups continues.
#[derive(Debug, Error)]
#[error("constraint '{constraint}' not satisfied: {reason}")]
pub struct ConstraintNotSatisfied {
    pub constraint: String,
    pub reason: String,
}

impl ConstraintNotSatisfied {
    pub fn new(constraint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            constraint: constraint.into(),
            reason: reason.into(),
        }
    }
}

/// A configured provider could not be resolved or failed its type check
///
/// Fatal at startup.
#[derive(Debug, Error)]
#[error("invalid provider '{provider}': {reason}")]
pub struct InvalidProviderError {
    pub provider: String,
    pub reason: String,
}

/// A configured executor could not be resolved
///
/// Fatal at startup.
#[derive(Debug, Error)]
#[error("invalid executor '{executor}': {reason}")]
pub struct InvalidExecutorError {
    pub executor: String,
    pub reason: String,
}

/// A diagnostic slug could not be resolved within a provider
#[derive(Debug, Error)]
#[error("invalid diagnostic '{diagnostic}': {reason}")]
pub struct InvalidDiagnosticError {
    pub diagnostic: String,
    pub reason: String,
}

/// Errors surfaced by an executor
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Not all submissions produced outcomes within the timeout.
    /// Outstanding work keeps running; it is not cancelled by `join`.
    #[error("{outstanding} execution(s) still outstanding after {timeout:?}")]
    JoinTimeout {
        timeout: Duration,
        outstanding: usize,
    },

    /// The message broker was unreachable after bounded retries
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// A submission could not be dispatched
    #[error("failed to submit execution: {0}")]
    Submit(String),
}

/// A diagnostic entry point raised; converted to a Failure outcome
#[derive(Debug, Error)]
#[error("execution failed: {0}")]
pub struct ExecutionError(pub String);

/// An output bundle violated the controlled vocabulary or numeric rules
///
/// Converted to a Failure outcome; the raw artifacts are retained for
/// inspection.
#[derive(Debug, Error)]
pub enum ResultValidationError {
    #[error("unknown dimension: '{0}'")]
    UnknownDimension(String),

    #[error("unknown value '{value}' for dimension '{dimension}'")]
    UnknownValue { dimension: String, value: String },

    #[error("metric value for {dimensions:?} is not numeric")]
    NonNumericValue { dimensions: Vec<String> },

    #[error("series index length ({index_len}) does not match values length ({values_len})")]
    IndexLengthMismatch {
        index_len: usize,
        values_len: usize,
    },

    #[error("NaN or Inf values are not allowed in a series index")]
    NonFiniteIndex,

    #[error("malformed metric bundle: {0}")]
    MalformedBundle(String),
}
