//! The solver
//!
//! Determines which diagnostic executions are required. For each diagnostic
//! the requirement evaluator produces candidate groups per requirement; the
//! solver combines them by Cartesian product into execution dataset
//! collections, asks the registry which of those are stale, and submits the
//! stale ones to the executor.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info};

use climeval_config::Config;
use climeval_core::datasets::{DatasetCollection, ExecutionDatasetCollection, SourceDatasetType};
use climeval_core::diagnostics::ExecutionDefinition;
use climeval_core::error::EvaluatorError;
use climeval_core::evaluator::evaluate;
use climeval_core::executor::{ExecutionHandle, Executor};
use climeval_core::providers::{DiagnosticProvider, ProviderRegistry};
use climeval_core::{DataCatalog, Diagnostic};
use climeval_db::Database;

/// One possible execution of a diagnostic, before consulting the registry
#[derive(Debug, Clone)]
pub struct ExecutionCandidate {
    pub provider_slug: String,
    pub diagnostic_slug: String,
    pub datasets: ExecutionDatasetCollection,
}

impl ExecutionCandidate {
    pub fn key(&self) -> String {
        self.datasets.key()
    }

    pub fn dataset_hash(&self) -> String {
        self.datasets.hash()
    }
}

/// Lazy Cartesian product over per-requirement candidate groups
///
/// The whole product can be large; elements are produced one at a time and
/// only the per-requirement group lists are held in memory.
struct CrossProduct {
    lists: Vec<(SourceDatasetType, Vec<DatasetCollection>)>,
    indices: Vec<usize>,
    done: bool,
}

impl CrossProduct {
    fn new(lists: Vec<(SourceDatasetType, Vec<DatasetCollection>)>) -> Self {
        let done = lists.iter().any(|(_, groups)| groups.is_empty());
        let indices = vec![0; lists.len()];
        Self {
            lists,
            indices,
            done,
        }
    }
}

impl Iterator for CrossProduct {
    type Item = ExecutionDatasetCollection;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut collections = BTreeMap::new();
        for ((source_type, groups), index) in self.lists.iter().zip(&self.indices) {
            collections.insert(*source_type, groups[*index].clone());
        }

        // Odometer increment, rightmost requirement fastest
        let mut position = self.lists.len();
        loop {
            if position == 0 {
                self.done = true;
                break;
            }
            position -= 1;
            self.indices[position] += 1;
            if self.indices[position] < self.lists[position].1.len() {
                break;
            }
            self.indices[position] = 0;
        }

        Some(ExecutionDatasetCollection::new(collections))
    }
}

/// Enumerate the candidate executions of one diagnostic
///
/// Yields lazily so the caller can inspect partial results without paying
/// for the full cross product.
pub fn solve_executions<'a>(
    catalog: &DataCatalog,
    provider: &'a DiagnosticProvider,
    diagnostic: &'a Arc<dyn Diagnostic>,
) -> Result<impl Iterator<Item = ExecutionCandidate> + 'a, EvaluatorError> {
    let mut lists = Vec::new();
    for requirement in diagnostic.data_requirements() {
        let groups = evaluate(catalog, requirement)?;
        debug!(
            diagnostic = diagnostic.slug(),
            source_type = %requirement.source_type,
            groups = groups.len(),
            "evaluated data requirement"
        );
        lists.push((requirement.source_type, groups));
    }

    let provider_slug = provider.slug().to_string();
    let diagnostic_slug = diagnostic.slug().to_string();
    Ok(CrossProduct::new(lists).map(move |datasets| ExecutionCandidate {
        provider_slug: provider_slug.clone(),
        diagnostic_slug: diagnostic_slug.clone(),
        datasets,
    }))
}

/// Optional provider/diagnostic slug allowlists
#[derive(Debug, Clone, Default)]
pub struct SolveFilters {
    pub providers: Option<Vec<String>>,
    pub diagnostics: Option<Vec<String>>,
}

impl SolveFilters {
    fn includes_provider(&self, slug: &str) -> bool {
        self.providers
            .as_ref()
            .map(|allowed| allowed.iter().any(|s| s == slug))
            .unwrap_or(true)
    }

    fn includes_diagnostic(&self, slug: &str) -> bool {
        self.diagnostics
            .as_ref()
            .map(|allowed| allowed.iter().any(|s| s == slug))
            .unwrap_or(true)
    }
}

/// What a solve run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolveSummary {
    /// Candidate executions considered across all diagnostics
    pub candidates: usize,
    /// Execution groups created for the first time
    pub groups_created: usize,
    /// New attempts required (submitted unless this was a dry run)
    pub required: usize,
}

/// Determine and dispatch all required executions
///
/// Walks the active providers, solves each diagnostic against the catalog,
/// creates execution groups and attempts as needed, submits the new
/// attempts, and finally waits for the executor to drain.
///
/// An evaluator error aborts only the affected diagnostic; the remaining
/// diagnostics still solve.
#[allow(clippy::too_many_arguments)]
pub async fn solve_required(
    config: &Config,
    db: &Database,
    providers: &ProviderRegistry,
    catalog: &DataCatalog,
    executor: &dyn Executor,
    filters: &SolveFilters,
    dry_run: bool,
    timeout: Duration,
) -> anyhow::Result<SolveSummary> {
    let registry = db.registry();
    let mut summary = SolveSummary::default();

    for provider in providers.providers() {
        if !filters.includes_provider(provider.slug()) {
            continue;
        }
        registry
            .register_provider(provider)
            .await
            .with_context(|| format!("failed to register provider '{}'", provider.slug()))?;

        for diagnostic in provider.diagnostics() {
            if !filters.includes_diagnostic(diagnostic.slug()) {
                continue;
            }

            let diagnostic_id = registry
                .diagnostic_id(provider.slug(), diagnostic.slug())
                .await?
                .context("diagnostic vanished after registration")?;

            let candidates = match solve_executions(catalog, provider, diagnostic) {
                Ok(candidates) => candidates,
                Err(err) => {
                    // Fail fast for this diagnostic, keep solving the others
                    error!(
                        diagnostic = diagnostic.slug(),
                        "cannot solve diagnostic: {err}"
                    );
                    continue;
                }
            };

            for candidate in candidates {
                summary.candidates += 1;

                let key = candidate.key();
                let (group, created) = registry
                    .get_or_create_group(diagnostic_id, &key, &candidate.datasets.selectors())
                    .await?;
                if created {
                    info!(
                        diagnostic = diagnostic.slug(),
                        key = %key,
                        "created execution group"
                    );
                    summary.groups_created += 1;
                }

                let dataset_hash = candidate.dataset_hash();
                if !registry.should_run(group.id, &dataset_hash).await? {
                    debug!(key = %key, "group is up to date");
                    continue;
                }
                summary.required += 1;

                if dry_run {
                    info!(key = %key, "would create a new execution (dry run)");
                    continue;
                }

                let attempt = registry.attempt_count(group.id).await?;
                let output_fragment = format!(
                    "{}/{}/{}/{}",
                    provider.slug(),
                    diagnostic.slug(),
                    key,
                    attempt
                );
                let execution = registry
                    .create_execution(group.id, &dataset_hash, &output_fragment)
                    .await?;

                link_datasets(&registry, execution.id, &candidate.datasets).await?;

                let definition = ExecutionDefinition {
                    provider_slug: provider.slug().to_string(),
                    diagnostic_slug: diagnostic.slug().to_string(),
                    key,
                    datasets: candidate.datasets,
                    root_directory: config.paths.scratch.clone(),
                    output_fragment: PathBuf::from(output_fragment),
                };
                executor
                    .submit(
                        definition,
                        Some(ExecutionHandle {
                            execution_id: execution.id,
                            group_id: group.id,
                        }),
                    )
                    .await?;
            }
        }
    }

    executor.join(timeout).await?;
    Ok(summary)
}

/// Associate an execution with the persisted datasets it consumes
///
/// Datasets that were never ingested into the database are skipped; the
/// catalog is allowed to be purely in-memory.
async fn link_datasets(
    registry: &climeval_db::ExecutionRegistry,
    execution_id: i64,
    datasets: &ExecutionDatasetCollection,
) -> anyhow::Result<()> {
    let mut dataset_ids = Vec::new();
    for (_, collection) in datasets.items() {
        for instance_id in collection.instance_ids() {
            if let Some(record) = registry.dataset(instance_id).await? {
                dataset_ids.push(record.id);
            }
        }
    }
    dataset_ids.sort_unstable();
    dataset_ids.dedup();
    registry
        .link_execution_datasets(execution_id, dataset_ids)
        .await?;
    Ok(())
}
