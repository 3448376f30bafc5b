//! Execution registry
//!
//! Persists execution groups and their historical attempts, decides which
//! groups are stale, and records outcomes. Updates to any one group are
//! serialized by running each mutation in a single short transaction.

use std::collections::BTreeMap;

use sqlx::AnyPool;
use tracing::{debug, info, warn};

use climeval_core::datasets::{DatasetRow, Selector, SourceDatasetType};
use climeval_core::providers::DiagnosticProvider;
use climeval_core::{DataCatalog, DatasetPartition, ScalarMetricValue};

use crate::models::{
    DatasetRecord, DiagnosticRecord, ExecutionGroupRecord, ExecutionRecord, ProviderRecord,
};
use crate::{now, DbError};

/// An artifact to persist against an execution, taken from its output bundle
#[derive(Debug, Clone)]
pub struct OutputArtifact {
    /// data | plots | html | metrics | log
    pub output_type: String,
    /// Relative to the execution's results directory
    pub filename: String,
    pub long_name: Option<String>,
    pub description: Option<String>,
}

/// The recorded end state of one execution attempt
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Success {
        outputs: Vec<OutputArtifact>,
        metric_values: Vec<ScalarMetricValue>,
    },
    Failure {
        reason: String,
    },
}

/// Joined listing row used by the CLI
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GroupListing {
    pub id: i64,
    pub provider_slug: String,
    pub diagnostic_slug: String,
    pub group_key: String,
    pub dirty: i64,
    pub attempts: i64,
}

impl GroupListing {
    pub fn is_dirty(&self) -> bool {
        self.dirty != 0
    }
}

/// Registry view over the evaluation database
#[derive(Debug, Clone)]
pub struct ExecutionRegistry {
    pool: AnyPool,
}

impl ExecutionRegistry {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    // ----- providers and diagnostics -------------------------------------

    /// Upsert a provider and its diagnostics, keyed by slug
    ///
    /// Changing a provider's version does not invalidate history; the new
    /// version is simply recorded.
    pub async fn register_provider(
        &self,
        provider: &DiagnosticProvider,
    ) -> Result<ProviderRecord, DbError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<ProviderRecord> = sqlx::query_as(
            "SELECT id, slug, name, version, created_at, updated_at FROM provider WHERE slug = $1",
        )
        .bind(provider.slug())
        .fetch_optional(&mut *tx)
        .await?;

        let provider_id = match existing {
            Some(record) => {
                if record.version != provider.version() {
                    info!(
                        provider = provider.slug(),
                        old = record.version,
                        new = provider.version(),
                        "provider version changed"
                    );
                    sqlx::query("UPDATE provider SET version = $1, updated_at = $2 WHERE id = $3")
                        .bind(provider.version())
                        .bind(now())
                        .bind(record.id)
                        .execute(&mut *tx)
                        .await?;
                }
                record.id
            }
            None => {
                info!(provider = provider.slug(), "created provider");
                let ts = now();
                sqlx::query_scalar(
                    "INSERT INTO provider (slug, name, version, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5) RETURNING id",
                )
                .bind(provider.slug())
                .bind(provider.name())
                .bind(provider.version())
                .bind(&ts)
                .bind(&ts)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        for diagnostic in provider.diagnostics() {
            let existing: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM diagnostic WHERE provider_id = $1 AND slug = $2",
            )
            .bind(provider_id)
            .bind(diagnostic.slug())
            .fetch_optional(&mut *tx)
            .await?;

            if existing.is_none() {
                info!(diagnostic = diagnostic.slug(), "created diagnostic");
                let ts = now();
                sqlx::query(
                    "INSERT INTO diagnostic (provider_id, slug, name, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(provider_id)
                .bind(diagnostic.slug())
                .bind(diagnostic.name())
                .bind(&ts)
                .bind(&ts)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        let record: ProviderRecord = sqlx::query_as(
            "SELECT id, slug, name, version, created_at, updated_at FROM provider WHERE id = $1",
        )
        .bind(provider_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    /// Resolve a diagnostic's database id by `(provider_slug, diagnostic_slug)`
    pub async fn diagnostic_id(
        &self,
        provider_slug: &str,
        diagnostic_slug: &str,
    ) -> Result<Option<i64>, DbError> {
        Ok(sqlx::query_scalar(
            "SELECT d.id FROM diagnostic d \
             JOIN provider p ON p.id = d.provider_id \
             WHERE p.slug = $1 AND d.slug = $2",
        )
        .bind(provider_slug)
        .bind(diagnostic_slug)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn diagnostic(&self, diagnostic_id: i64) -> Result<DiagnosticRecord, DbError> {
        Ok(sqlx::query_as(
            "SELECT id, provider_id, slug, name, created_at, updated_at \
             FROM diagnostic WHERE id = $1",
        )
        .bind(diagnostic_id)
        .fetch_one(&self.pool)
        .await?)
    }

    // ----- execution groups ----------------------------------------------

    /// Fetch or create the group identified by `(diagnostic_id, key)`
    ///
    /// Returns the record and whether it was newly created.
    pub async fn get_or_create_group(
        &self,
        diagnostic_id: i64,
        key: &str,
        selectors: &BTreeMap<String, Selector>,
    ) -> Result<(ExecutionGroupRecord, bool), DbError> {
        if let Some(record) = self.find_group(diagnostic_id, key).await? {
            return Ok((record, false));
        }

        let ts = now();
        let selectors_json = serde_json::to_string(selectors)?;
        sqlx::query(
            "INSERT INTO execution_group \
             (diagnostic_id, group_key, selectors, dirty, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(diagnostic_id)
        .bind(key)
        .bind(&selectors_json)
        .bind(1_i64)
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;

        let record = self
            .find_group(diagnostic_id, key)
            .await?
            .ok_or_else(|| DbError::Invalid(format!("group '{}' vanished after insert", key)))?;
        Ok((record, true))
    }

    async fn find_group(
        &self,
        diagnostic_id: i64,
        key: &str,
    ) -> Result<Option<ExecutionGroupRecord>, DbError> {
        Ok(sqlx::query_as(
            "SELECT id, diagnostic_id, group_key, selectors, dirty, created_at, updated_at \
             FROM execution_group WHERE diagnostic_id = $1 AND group_key = $2",
        )
        .bind(diagnostic_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn group(&self, group_id: i64) -> Result<ExecutionGroupRecord, DbError> {
        Ok(sqlx::query_as(
            "SELECT id, diagnostic_id, group_key, selectors, dirty, created_at, updated_at \
             FROM execution_group WHERE id = $1",
        )
        .bind(group_id)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Force a group to be re-solved on the next run
    pub async fn mark_group_dirty(&self, group_id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE execution_group SET dirty = $1, updated_at = $2 WHERE id = $3")
            .bind(1_i64)
            .bind(now())
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Joined listing of all groups, for presentation
    pub async fn list_groups(&self) -> Result<Vec<GroupListing>, DbError> {
        Ok(sqlx::query_as(
            "SELECT g.id AS id, p.slug AS provider_slug, d.slug AS diagnostic_slug, \
                    g.group_key AS group_key, g.dirty AS dirty, \
                    (SELECT COUNT(*) FROM execution e WHERE e.execution_group_id = g.id) AS attempts \
             FROM execution_group g \
             JOIN diagnostic d ON d.id = g.diagnostic_id \
             JOIN provider p ON p.id = d.provider_id \
             ORDER BY p.slug, d.slug, g.group_key",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    // ----- executions ----------------------------------------------------

    /// Whether a new attempt is needed for a group
    ///
    /// True when the group has no attempts, is dirty, or its most recent
    /// attempt ran against a different dataset collection. An attempt whose
    /// outcome has not been recorded yet blocks new submissions, keeping at
    /// most one attempt in flight per group.
    pub async fn should_run(&self, group_id: i64, candidate_hash: &str) -> Result<bool, DbError> {
        let latest = self.latest_execution(group_id).await?;
        let Some(latest) = latest else {
            return Ok(true);
        };
        if latest.successful.is_none() {
            debug!(group_id, "previous attempt still in flight");
            return Ok(false);
        }

        let group = self.group(group_id).await?;
        if group.is_dirty() {
            return Ok(true);
        }
        Ok(latest.dataset_hash != candidate_hash)
    }

    /// Most recent attempt of a group, if any
    pub async fn latest_execution(
        &self,
        group_id: i64,
    ) -> Result<Option<ExecutionRecord>, DbError> {
        Ok(sqlx::query_as(
            "SELECT id, execution_group_id, dataset_hash, output_fragment, successful, \
                    retracted, created_at, updated_at \
             FROM execution WHERE execution_group_id = $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// All attempts of a group, oldest first
    pub async fn executions(&self, group_id: i64) -> Result<Vec<ExecutionRecord>, DbError> {
        Ok(sqlx::query_as(
            "SELECT id, execution_group_id, dataset_hash, output_fragment, successful, \
                    retracted, created_at, updated_at \
             FROM execution WHERE execution_group_id = $1 ORDER BY id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Number of attempts recorded for a group; doubles as the next attempt
    /// index
    pub async fn attempt_count(&self, group_id: i64) -> Result<i64, DbError> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM execution WHERE execution_group_id = $1",
        )
        .bind(group_id)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Create a new attempt for a group
    ///
    /// The dataset hash is fixed at creation; it is never updated afterwards.
    pub async fn create_execution(
        &self,
        group_id: i64,
        dataset_hash: &str,
        output_fragment: &str,
    ) -> Result<ExecutionRecord, DbError> {
        let ts = now();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO execution \
             (execution_group_id, dataset_hash, output_fragment, retracted, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(group_id)
        .bind(dataset_hash)
        .bind(output_fragment)
        .bind(0_i64)
        .bind(&ts)
        .bind(&ts)
        .fetch_one(&self.pool)
        .await?;

        Ok(ExecutionRecord {
            id,
            execution_group_id: group_id,
            dataset_hash: dataset_hash.to_string(),
            output_fragment: output_fragment.to_string(),
            successful: None,
            retracted: 0,
            created_at: ts.clone(),
            updated_at: ts,
        })
    }

    pub async fn execution(&self, execution_id: i64) -> Result<ExecutionRecord, DbError> {
        Ok(sqlx::query_as(
            "SELECT id, execution_group_id, dataset_hash, output_fragment, successful, \
                    retracted, created_at, updated_at \
             FROM execution WHERE id = $1",
        )
        .bind(execution_id)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Record the outcome of an attempt in one transaction
    ///
    /// On success the group's dirty flag is cleared, but only if this
    /// execution is still the latest attempt of its group. On failure the
    /// group stays dirty so the next solve retries it.
    pub async fn record_outcome(
        &self,
        execution_id: i64,
        outcome: &ExecutionOutcome,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        let execution: ExecutionRecord = sqlx::query_as(
            "SELECT id, execution_group_id, dataset_hash, output_fragment, successful, \
                    retracted, created_at, updated_at \
             FROM execution WHERE id = $1",
        )
        .bind(execution_id)
        .fetch_one(&mut *tx)
        .await?;

        match outcome {
            ExecutionOutcome::Success {
                outputs,
                metric_values,
            } => {
                sqlx::query("UPDATE execution SET successful = $1, updated_at = $2 WHERE id = $3")
                    .bind(1_i64)
                    .bind(now())
                    .bind(execution_id)
                    .execute(&mut *tx)
                    .await?;

                for output in outputs {
                    sqlx::query(
                        "INSERT INTO execution_output \
                         (execution_id, output_type, filename, long_name, description, created_at) \
                         VALUES ($1, $2, $3, $4, $5, $6)",
                    )
                    .bind(execution_id)
                    .bind(&output.output_type)
                    .bind(&output.filename)
                    .bind(&output.long_name)
                    .bind(&output.description)
                    .bind(now())
                    .execute(&mut *tx)
                    .await?;
                }

                for value in metric_values {
                    // sqlite cannot store NaN in a NOT NULL REAL column;
                    // missing values are simply not persisted
                    if value.value.is_nan() {
                        debug!(dimensions = ?value.dimensions, "skipping NaN metric value");
                        continue;
                    }
                    let attributes = value
                        .attributes
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?;
                    let metric_value_id: i64 = sqlx::query_scalar(
                        "INSERT INTO metric_value (execution_id, value, attributes, created_at) \
                         VALUES ($1, $2, $3, $4) RETURNING id",
                    )
                    .bind(execution_id)
                    .bind(value.value)
                    .bind(attributes)
                    .bind(now())
                    .fetch_one(&mut *tx)
                    .await?;

                    for (name, dimension_value) in &value.dimensions {
                        sqlx::query(
                            "INSERT INTO metric_value_dimension \
                             (metric_value_id, dimension_name, dimension_value) \
                             VALUES ($1, $2, $3)",
                        )
                        .bind(metric_value_id)
                        .bind(name)
                        .bind(dimension_value)
                        .execute(&mut *tx)
                        .await?;
                    }
                }

                let latest_id: i64 = sqlx::query_scalar(
                    "SELECT MAX(id) FROM execution WHERE execution_group_id = $1",
                )
                .bind(execution.execution_group_id)
                .fetch_one(&mut *tx)
                .await?;

                if latest_id == execution_id {
                    sqlx::query(
                        "UPDATE execution_group SET dirty = $1, updated_at = $2 WHERE id = $3",
                    )
                    .bind(0_i64)
                    .bind(now())
                    .bind(execution.execution_group_id)
                    .execute(&mut *tx)
                    .await?;
                } else {
                    debug!(
                        execution_id,
                        latest_id, "outcome is not the latest attempt; group stays dirty"
                    );
                }
            }
            ExecutionOutcome::Failure { reason } => {
                warn!(execution_id, reason = %reason, "recording failed execution");
                sqlx::query("UPDATE execution SET successful = $1, updated_at = $2 WHERE id = $3")
                    .bind(0_i64)
                    .bind(now())
                    .bind(execution_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("UPDATE execution_group SET dirty = $1, updated_at = $2 WHERE id = $3")
                    .bind(1_i64)
                    .bind(now())
                    .bind(execution.execution_group_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    // ----- datasets ------------------------------------------------------

    /// Upsert the logical datasets behind a set of file rows
    ///
    /// Returns the dataset id for each distinct `instance_id`. Facet and
    /// file rows are replaced wholesale, keeping re-ingestion idempotent.
    pub async fn register_dataset_rows(
        &self,
        source_type: SourceDatasetType,
        rows: &[DatasetRow],
    ) -> Result<BTreeMap<String, i64>, DbError> {
        let mut by_instance: BTreeMap<&str, Vec<&DatasetRow>> = BTreeMap::new();
        for row in rows {
            by_instance.entry(&row.instance_id).or_default().push(row);
        }

        let mut ids = BTreeMap::new();
        let mut tx = self.pool.begin().await?;
        for (instance_id, rows) in by_instance {
            let existing: Option<i64> =
                sqlx::query_scalar("SELECT id FROM dataset WHERE instance_id = $1")
                    .bind(instance_id)
                    .fetch_optional(&mut *tx)
                    .await?;

            let dataset_id = match existing {
                Some(id) => {
                    sqlx::query("DELETE FROM dataset_facet WHERE dataset_id = $1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query("DELETE FROM dataset_file WHERE dataset_id = $1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                    id
                }
                None => {
                    let ts = now();
                    sqlx::query_scalar(
                        "INSERT INTO dataset (source_type, instance_id, created_at, updated_at) \
                         VALUES ($1, $2, $3, $4) RETURNING id",
                    )
                    .bind(source_type.as_str())
                    .bind(instance_id)
                    .bind(&ts)
                    .bind(&ts)
                    .fetch_one(&mut *tx)
                    .await?
                }
            };

            // Facets are shared by every file row of the dataset
            if let Some(first) = rows.first() {
                for (key, value) in &first.facets {
                    sqlx::query(
                        "INSERT INTO dataset_facet (dataset_id, facet_key, facet_value) \
                         VALUES ($1, $2, $3)",
                    )
                    .bind(dataset_id)
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
                }
            }

            for row in rows {
                sqlx::query(
                    "INSERT INTO dataset_file (dataset_id, path, start_time, end_time) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(dataset_id)
                .bind(row.path.to_string_lossy().as_ref())
                .bind(row.facet("start_time"))
                .bind(row.facet("end_time"))
                .execute(&mut *tx)
                .await?;
            }

            ids.insert(instance_id.to_string(), dataset_id);
        }
        tx.commit().await?;
        Ok(ids)
    }

    /// Link an execution to the datasets it consumed
    pub async fn link_execution_datasets(
        &self,
        execution_id: i64,
        dataset_ids: impl IntoIterator<Item = i64>,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for dataset_id in dataset_ids {
            sqlx::query(
                "INSERT INTO execution_dataset (execution_id, dataset_id) VALUES ($1, $2)",
            )
            .bind(execution_id)
            .bind(dataset_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn dataset(&self, instance_id: &str) -> Result<Option<DatasetRecord>, DbError> {
        Ok(sqlx::query_as(
            "SELECT id, source_type, instance_id, created_at, updated_at \
             FROM dataset WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Build an in-memory data catalog from the persisted datasets
    ///
    /// One catalog row is produced per dataset file, carrying the dataset's
    /// facets plus the file's time range.
    pub async fn load_data_catalog(&self) -> Result<DataCatalog, DbError> {
        #[derive(sqlx::FromRow)]
        struct FileRow {
            dataset_id: i64,
            source_type: String,
            instance_id: String,
            path: String,
            start_time: Option<String>,
            end_time: Option<String>,
        }

        #[derive(sqlx::FromRow)]
        struct FacetRow {
            dataset_id: i64,
            facet_key: String,
            facet_value: String,
        }

        let files: Vec<FileRow> = sqlx::query_as(
            "SELECT d.id AS dataset_id, d.source_type AS source_type, \
                    d.instance_id AS instance_id, f.path AS path, \
                    f.start_time AS start_time, f.end_time AS end_time \
             FROM dataset d JOIN dataset_file f ON f.dataset_id = d.id \
             ORDER BY d.instance_id, f.path",
        )
        .fetch_all(&self.pool)
        .await?;

        let facets: Vec<FacetRow> = sqlx::query_as(
            "SELECT dataset_id, facet_key, facet_value FROM dataset_facet",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut facets_by_dataset: BTreeMap<i64, BTreeMap<String, String>> = BTreeMap::new();
        for facet in facets {
            facets_by_dataset
                .entry(facet.dataset_id)
                .or_default()
                .insert(facet.facet_key, facet.facet_value);
        }

        let mut rows_by_source: BTreeMap<SourceDatasetType, Vec<DatasetRow>> = BTreeMap::new();
        for file in files {
            let source_type: SourceDatasetType = file
                .source_type
                .parse()
                .map_err(DbError::Invalid)?;
            let mut row = DatasetRow::new(file.instance_id, file.path);
            if let Some(facets) = facets_by_dataset.get(&file.dataset_id) {
                row.facets.extend(facets.clone());
            }
            if let Some(start) = file.start_time {
                row.facets.insert("start_time".to_string(), start);
            }
            if let Some(end) = file.end_time {
                row.facets.insert("end_time".to_string(), end);
            }
            rows_by_source.entry(source_type).or_default().push(row);
        }

        let mut catalog = DataCatalog::new();
        for (source_type, rows) in rows_by_source {
            catalog = catalog.with_partition(DatasetPartition::from_rows(source_type, rows));
        }
        Ok(catalog)
    }
}
