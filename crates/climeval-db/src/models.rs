//! Row types for the persisted schema
//!
//! Cyclic references (diagnostic -> provider, execution -> group ->
//! diagnostic) are represented as integer foreign keys; nothing here owns
//! anything else.

use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct ProviderRecord {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub version: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct DiagnosticRecord {
    pub id: i64,
    pub provider_id: i64,
    pub slug: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct DatasetRecord {
    pub id: i64,
    pub source_type: String,
    pub instance_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// The persistent identity of "this diagnostic applied to this selector"
///
/// Flags are stored as 0/1 integers; the sqlx Any driver has no boolean
/// representation shared by both backends.
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionGroupRecord {
    pub id: i64,
    pub diagnostic_id: i64,
    pub group_key: String,
    /// JSON map of source type to selector pairs
    pub selectors: String,
    pub dirty: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl ExecutionGroupRecord {
    /// Whether the group needs a re-run
    pub fn is_dirty(&self) -> bool {
        self.dirty != 0
    }
}

/// One attempt at running an execution group
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRecord {
    pub id: i64,
    pub execution_group_id: i64,
    /// Hash of the dataset collection at submission time; never updated -
    /// a re-run creates a new attempt instead
    pub dataset_hash: String,
    pub output_fragment: String,
    /// NULL while the attempt is in flight
    pub successful: Option<i64>,
    pub retracted: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl ExecutionRecord {
    /// The recorded outcome: None while in flight
    pub fn succeeded(&self) -> Option<bool> {
        self.successful.map(|flag| flag != 0)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ExecutionOutputRecord {
    pub id: i64,
    pub execution_id: i64,
    pub output_type: String,
    pub filename: String,
    pub long_name: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct MetricValueRecord {
    pub id: i64,
    pub execution_id: i64,
    pub value: f64,
    pub attributes: Option<String>,
    pub created_at: String,
}
