// End-to-end solver scenarios
//
// Each test drives the full loop: catalog -> evaluator -> registry ->
// executor -> outcome recording, against a real sqlite database and a
// synchronous executor.

use std::time::Duration;

use climeval::testing::{example_provider, sample_catalog, sample_rows, GlobalMeanDiagnostic};
use climeval::{solve_executions, solve_required, SolveFilters, SolveSummary};
use climeval_config::{Config, LogLevel};
use climeval_core::datasets::{DatasetRow, SourceDatasetType};
use climeval_core::providers::{DiagnosticProvider, ProviderRegistry};
use climeval_core::requirements::{DataRequirement, FacetFilter, RequireFacets};
use climeval_core::{Cv, DataCatalog, DatasetPartition};
use climeval_db::Database;
use climeval_executor::{OutcomeHandler, SynchronousExecutor};

struct TestContext {
    _dir: tempfile::TempDir,
    config: Config,
    db: Database,
    providers: ProviderRegistry,
}

async fn context_with(providers: Vec<DiagnosticProvider>) -> TestContext {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.paths.scratch = dir.path().join("scratch");
    config.paths.results = dir.path().join("results");
    config.paths.log = dir.path().join("log");
    config.db.database_url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("climeval.db").display()
    );

    let db = Database::connect(&config.db.database_url).await.unwrap();
    TestContext {
        _dir: dir,
        config,
        db,
        providers: ProviderRegistry::new(providers),
    }
}

async fn context() -> TestContext {
    context_with(vec![example_provider()]).await
}

fn global_mean_only() -> SolveFilters {
    SolveFilters {
        providers: None,
        diagnostics: Some(vec!["global-mean".to_string()]),
    }
}

async fn solve(ctx: &TestContext, catalog: &DataCatalog, filters: &SolveFilters) -> SolveSummary {
    let executor = SynchronousExecutor::new(
        ctx.providers.clone(),
        OutcomeHandler::new(&ctx.config, ctx.db.registry(), Cv::default_cv()),
        LogLevel::Info,
    );
    solve_required(
        &ctx.config,
        &ctx.db,
        &ctx.providers,
        catalog,
        &executor,
        filters,
        false,
        Duration::from_secs(60),
    )
    .await
    .unwrap()
}

// S1: five CMIP6 datasets, filter {tas, rsut}, group by (variable, experiment)
// => four executions; a second run with no changes does nothing.
#[tokio::test]
async fn test_s1_solve_and_idempotent_rerun() {
    let ctx = context().await;
    let catalog = sample_catalog();

    let first = solve(&ctx, &catalog, &global_mean_only()).await;
    assert_eq!(first.candidates, 4);
    assert_eq!(first.groups_created, 4);
    assert_eq!(first.required, 4);

    // Artifacts of every successful execution are copied into results
    for group in ctx.db.registry().list_groups().await.unwrap() {
        assert!(!group.is_dirty());
        let fragment = format!(
            "{}/{}/{}/0",
            group.provider_slug, group.diagnostic_slug, group.group_key
        );
        assert!(ctx
            .config
            .paths
            .results
            .join(&fragment)
            .join("diagnostic.json")
            .exists());
        assert!(ctx
            .config
            .paths
            .results
            .join(&fragment)
            .join("out.log")
            .exists());
    }

    let second = solve(&ctx, &catalog, &global_mean_only()).await;
    assert_eq!(second.candidates, 4);
    assert_eq!(second.groups_created, 0);
    assert_eq!(second.required, 0);
}

// S2: replacing one dataset with a new version re-runs exactly that group.
#[tokio::test]
async fn test_s2_new_dataset_version_reruns_one_group() {
    let ctx = context().await;
    solve(&ctx, &sample_catalog(), &global_mean_only()).await;

    let mut rows = sample_rows();
    for row in &mut rows {
        if row.instance_id == "CMIP6.tas.ssp126.r1i1p1f1.v1" {
            row.instance_id = "CMIP6.tas.ssp126.r1i1p1f1.v2".to_string();
        }
    }
    let updated = DataCatalog::new()
        .with_partition(DatasetPartition::from_rows(SourceDatasetType::Cmip6, rows));

    let summary = solve(&ctx, &updated, &global_mean_only()).await;
    assert_eq!(summary.groups_created, 0);
    assert_eq!(summary.required, 1);
}

// S3: a RequireFacets validator discards groups missing a required value.
#[test]
fn test_s3_require_facets_discards_group() {
    let mut provider = DiagnosticProvider::new("Example", "1.0.0");
    provider.register(GlobalMeanDiagnostic::default());

    struct PiControlDiagnostic {
        requirements: Vec<DataRequirement>,
        facets: Vec<String>,
    }
    impl climeval_core::Diagnostic for PiControlDiagnostic {
        fn slug(&self) -> &str {
            "needs-picontrol"
        }
        fn name(&self) -> &str {
            "Needs piControl"
        }
        fn data_requirements(&self) -> &[DataRequirement] {
            &self.requirements
        }
        fn facets(&self) -> &[String] {
            &self.facets
        }
        fn run(
            &self,
            _definition: &climeval_core::ExecutionDefinition,
        ) -> Result<climeval_core::ExecutionResult, climeval_core::ExecutionError> {
            Ok(climeval_core::ExecutionResult::build())
        }
    }

    let diagnostic: std::sync::Arc<dyn climeval_core::Diagnostic> =
        std::sync::Arc::new(PiControlDiagnostic {
            requirements: vec![DataRequirement::new(SourceDatasetType::Cmip6)
                .with_filter(FacetFilter::keeping([("variable_id", ["tas"])]))
                .group_by(["variable_id"])
                .validated_by(RequireFacets::new(
                    "experiment_id",
                    ["historical", "piControl"],
                ))],
            facets: Vec::new(),
        });

    // The sample catalog has historical and ssp126 but no piControl
    let candidates: Vec<_> = solve_executions(&sample_catalog(), &provider, &diagnostic)
        .unwrap()
        .collect();
    assert!(candidates.is_empty());
}

// S4: the same selector under two providers yields two distinct groups.
#[tokio::test]
async fn test_s4_same_selector_different_providers() {
    let mut second = DiagnosticProvider::new("Example Two", "1.0.0");
    second.register(GlobalMeanDiagnostic::default());

    let ctx = context_with(vec![example_provider(), second]).await;
    let summary = solve(&ctx, &sample_catalog(), &global_mean_only()).await;
    assert_eq!(summary.groups_created, 8);

    let groups = ctx.db.registry().list_groups().await.unwrap();
    let mut keys: Vec<_> = groups
        .iter()
        .map(|g| (g.provider_slug.clone(), g.group_key.clone()))
        .collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 8);
}

// S5: a raising diagnostic leaves the group dirty; the next solve creates a
// new attempt with an incremented index.
#[tokio::test]
async fn test_s5_failure_creates_new_attempt_on_next_solve() {
    let ctx = context().await;
    let catalog = sample_catalog();
    let filters = SolveFilters {
        providers: None,
        diagnostics: Some(vec!["always-fails".to_string()]),
    };

    let first = solve(&ctx, &catalog, &filters).await;
    assert_eq!(first.required, 2);

    let registry = ctx.db.registry();
    let groups = registry.list_groups().await.unwrap();
    assert_eq!(groups.len(), 2);
    for group in &groups {
        assert!(group.is_dirty());
        let latest = registry.latest_execution(group.id).await.unwrap().unwrap();
        assert_eq!(latest.succeeded(), Some(false));
    }

    // Identical failures are not suppressed: every solve adds an attempt row
    let second = solve(&ctx, &catalog, &filters).await;
    assert_eq!(second.required, 2);
    for group in &groups {
        assert_eq!(registry.attempt_count(group.id).await.unwrap(), 2);
        let latest = registry.latest_execution(group.id).await.unwrap().unwrap();
        assert!(latest.output_fragment.ends_with("/1"));
    }
}

// Hash stability: the collection hash depends on instance ids, not row order
// or paths (covered at the unit level too; this guards the solver wiring).
#[tokio::test]
async fn test_dirtiness_is_monotonic_across_solves() {
    let ctx = context().await;
    let catalog = sample_catalog();

    solve(&ctx, &catalog, &global_mean_only()).await;
    for _ in 0..3 {
        let summary = solve(&ctx, &catalog, &global_mean_only()).await;
        assert_eq!(summary.required, 0);
        for group in ctx.db.registry().list_groups().await.unwrap() {
            assert!(!group.is_dirty());
        }
    }
}

// Dry runs enumerate work without creating execution rows.
#[tokio::test]
async fn test_dry_run_creates_no_executions() {
    let ctx = context().await;
    let catalog = sample_catalog();

    let executor = SynchronousExecutor::new(
        ctx.providers.clone(),
        OutcomeHandler::new(&ctx.config, ctx.db.registry(), Cv::default_cv()),
        LogLevel::Info,
    );
    let summary = solve_required(
        &ctx.config,
        &ctx.db,
        &ctx.providers,
        &catalog,
        &executor,
        &global_mean_only(),
        true,
        Duration::from_secs(60),
    )
    .await
    .unwrap();

    assert_eq!(summary.required, 4);
    let registry = ctx.db.registry();
    for group in registry.list_groups().await.unwrap() {
        assert_eq!(registry.attempt_count(group.id).await.unwrap(), 0);
    }
}

// Datasets registered in the database get linked to the executions that
// consumed them.
#[tokio::test]
async fn test_executions_link_registered_datasets() {
    let ctx = context().await;
    let registry = ctx.db.registry();
    registry
        .register_dataset_rows(SourceDatasetType::Cmip6, &sample_rows())
        .await
        .unwrap();

    // The persisted datasets round-trip into an equivalent catalog
    let catalog = registry.load_data_catalog().await.unwrap();
    let summary = solve(&ctx, &catalog, &global_mean_only()).await;
    assert_eq!(summary.required, 4);

    let linked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM execution_dataset")
        .fetch_one(ctx.db.pool())
        .await
        .unwrap();
    assert_eq!(linked, 4);
}

// A group operation that cannot be satisfied discards the group but leaves
// the rest of the solve untouched.
#[test]
fn test_unsatisfied_operation_discards_only_its_group() {
    use climeval_core::requirements::AddSupplementaryDataset;

    let mut rows = sample_rows();
    // Cell-area field exists for the historical rows' grid only
    rows.push(
        DatasetRow::new("CMIP6.areacella.v1", "/data/areacella.nc")
            .with_facet("variable_id", "areacella")
            .with_facet("experiment_id", "historical")
            .with_facet("source_id", "ACCESS-ESM1-5")
            .with_facet("variant_label", "r1i1p1f1"),
    );
    let catalog = DataCatalog::new()
        .with_partition(DatasetPartition::from_rows(SourceDatasetType::Cmip6, rows));

    let requirement = DataRequirement::new(SourceDatasetType::Cmip6)
        .with_filter(FacetFilter::keeping([("variable_id", ["tas"])]))
        .group_by(["variable_id", "experiment_id"])
        .transformed_by(AddSupplementaryDataset::new(
            SourceDatasetType::Cmip6,
            [("variable_id", "areacella"), ("experiment_id", "historical")],
            ["source_id"],
        ));

    let groups = climeval_core::evaluator::evaluate(&catalog, &requirement).unwrap();
    // Both (tas, historical) and (tas, ssp126) match the source_id, so both
    // survive and gain the supplementary dataset
    assert_eq!(groups.len(), 2);
    for group in &groups {
        assert!(group
            .rows()
            .iter()
            .any(|r| r.instance_id == "CMIP6.areacella.v1"));
    }
}
