//! Requirement evaluator
//!
//! Applies one data requirement against the catalog: filter, group, then
//! constrain. The output is the ordered sequence of candidate groups that
//! survived every constraint.

use tracing::{debug, warn};

use crate::catalog::DataCatalog;
use crate::datasets::DatasetCollection;
use crate::error::EvaluatorError;
use crate::requirements::{DataRequirement, GroupConstraint};

/// Evaluate a data requirement against the catalog
///
/// Returns the candidate groups in a deterministic order: groups appear in
/// first-appearance order of their group-by key tuple, and rows within each
/// group are normalised by `(instance_id, path)`.
///
/// An unknown facet in a filter or the group-by fails fast with
/// `EvaluatorError::UnknownFacet`, aborting this requirement. A constraint
/// that cannot be satisfied only discards the affected group.
pub fn evaluate(
    catalog: &DataCatalog,
    requirement: &DataRequirement,
) -> Result<Vec<DatasetCollection>, EvaluatorError> {
    let Some(partition) = catalog.partition(requirement.source_type) else {
        debug!(source_type = %requirement.source_type, "no catalog partition; yielding nothing");
        return Ok(Vec::new());
    };
    if partition.is_empty() {
        return Ok(Vec::new());
    }

    // Filters compose by intersection
    let mut filtered = partition.clone();
    for filter in &requirement.filters {
        filtered = filtered.apply_filter(filter)?;
    }
    if filtered.is_empty() {
        debug!(source_type = %requirement.source_type, "all rows filtered out");
        return Ok(Vec::new());
    }

    let mut candidates = Vec::new();
    'groups: for (selector, mut rows) in filtered.group_by(&requirement.group_by)? {
        for constraint in &requirement.constraints {
            match constraint {
                GroupConstraint::Operation(operation) => {
                    match operation.apply(rows, &selector, catalog) {
                        Ok(enlarged) => rows = enlarged,
                        Err(err) => {
                            warn!(selector = %selector, error = %err, "discarding group");
                            continue 'groups;
                        }
                    }
                }
                GroupConstraint::Validator(validator) => {
                    if !validator.validate(&rows) {
                        debug!(
                            selector = %selector,
                            validator = validator.name(),
                            "group failed validation"
                        );
                        continue 'groups;
                    }
                }
            }
        }
        candidates.push(DatasetCollection::new(rows, selector));
    }

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DatasetPartition;
    use crate::datasets::{DatasetRow, SourceDatasetType};
    use crate::requirements::{FacetFilter, RequireFacets};

    fn cmip6_row(instance_id: &str, variable: &str, experiment: &str) -> DatasetRow {
        DatasetRow::new(instance_id, format!("/data/{}.nc", instance_id))
            .with_facet("variable_id", variable)
            .with_facet("experiment_id", experiment)
    }

    fn catalog() -> DataCatalog {
        DataCatalog::new().with_partition(DatasetPartition::from_rows(
            SourceDatasetType::Cmip6,
            vec![
                cmip6_row("tas-hist", "tas", "historical"),
                cmip6_row("tas-ssp126", "tas", "ssp126"),
                cmip6_row("rsut-hist", "rsut", "historical"),
                cmip6_row("rsut-ssp126", "rsut", "ssp126"),
                cmip6_row("pr-hist", "pr", "historical"),
            ],
        ))
    }

    fn requirement() -> DataRequirement {
        DataRequirement::new(SourceDatasetType::Cmip6)
            .with_filter(FacetFilter::keeping([("variable_id", ["tas", "rsut"])]))
            .group_by(["variable_id", "experiment_id"])
    }

    #[test]
    fn test_evaluate_groups() {
        let groups = evaluate(&catalog(), &requirement()).unwrap();
        assert_eq!(groups.len(), 4);
        for group in &groups {
            assert_eq!(group.len(), 1);
            assert!(!group.selector().is_empty());
        }
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let first = evaluate(&catalog(), &requirement()).unwrap();
        let second = evaluate(&catalog(), &requirement()).unwrap();
        let selectors = |groups: &[DatasetCollection]| {
            groups
                .iter()
                .map(|g| g.selector().clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(selectors(&first), selectors(&second));
    }

    #[test]
    fn test_evaluate_missing_partition_yields_nothing() {
        let requirement = DataRequirement::new(SourceDatasetType::Obs4Mips);
        assert!(evaluate(&catalog(), &requirement).unwrap().is_empty());
    }

    #[test]
    fn test_evaluate_unknown_facet_aborts() {
        let requirement = DataRequirement::new(SourceDatasetType::Cmip6)
            .with_filter(FacetFilter::keeping([("member_id", ["r1i1p1f1"])]));
        assert!(matches!(
            evaluate(&catalog(), &requirement),
            Err(EvaluatorError::UnknownFacet { .. })
        ));
    }

    #[test]
    fn test_evaluate_validator_discards_group() {
        // Group by variable; only variables with both experiments survive
        let requirement = DataRequirement::new(SourceDatasetType::Cmip6)
            .group_by(["variable_id"])
            .validated_by(RequireFacets::new("experiment_id", ["historical", "ssp126"]));
        let groups = evaluate(&catalog(), &requirement).unwrap();
        let variables: Vec<_> = groups
            .iter()
            .map(|g| g.selector().get("variable_id").unwrap().to_string())
            .collect();
        assert_eq!(variables, vec!["tas", "rsut"]);
    }

    #[test]
    fn test_evaluate_empty_group_by_single_group() {
        let requirement = DataRequirement::new(SourceDatasetType::Cmip6);
        let groups = evaluate(&catalog(), &requirement).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 5);
        assert!(groups[0].selector().is_empty());
    }

    #[test]
    fn test_duplicate_rows_are_preserved() {
        let rows = vec![
            cmip6_row("tas-hist", "tas", "historical"),
            cmip6_row("tas-hist", "tas", "historical"),
        ];
        let catalog = DataCatalog::new()
            .with_partition(DatasetPartition::from_rows(SourceDatasetType::Cmip6, rows));
        let requirement = DataRequirement::new(SourceDatasetType::Cmip6);
        let groups = evaluate(&catalog, &requirement).unwrap();
        assert_eq!(groups[0].len(), 2);
    }
}
