//! Declarative data requirements
//!
//! Each diagnostic declares which datasets it needs as a sequence of facet
//! filters, a group-by, and per-group constraints. The requirement evaluator
//! applies these against the catalog to produce candidate execution groups.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use crate::catalog::DataCatalog;
use crate::datasets::{DatasetRow, Selector, SourceDatasetType};
use crate::error::ConstraintNotSatisfied;

/// A filter to apply to a catalog partition
///
/// A row matches iff, for every facet key, the row's value is one of the
/// given values. `keep` decides whether matching rows are retained or
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetFilter {
    pub facets: BTreeMap<String, BTreeSet<String>>,
    pub keep: bool,
}

impl FacetFilter {
    fn build<F, K, V, I>(facets: F, keep: bool) -> Self
    where
        F: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoIterator<Item = I>,
        I: Into<String>,
    {
        Self {
            facets: facets
                .into_iter()
                .map(|(k, v)| (k.into(), v.into_iter().map(Into::into).collect()))
                .collect(),
            keep,
        }
    }

    /// Retain rows matching all facet constraints
    pub fn keeping<F, K, V, I>(facets: F) -> Self
    where
        F: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoIterator<Item = I>,
        I: Into<String>,
    {
        Self::build(facets, true)
    }

    /// Drop rows matching all facet constraints
    pub fn dropping<F, K, V, I>(facets: F) -> Self
    where
        F: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoIterator<Item = I>,
        I: Into<String>,
    {
        Self::build(facets, false)
    }

    /// Whether a row matches every facet constraint of this filter
    pub fn matches(&self, row: &DatasetRow) -> bool {
        self.facets.iter().all(|(facet, values)| {
            row.facet(facet)
                .map(|value| values.contains(value))
                .unwrap_or(false)
        })
    }
}

/// Transforms a candidate group, possibly attaching additional rows
///
/// If the operation cannot satisfy its invariant the group is discarded
/// (logged at WARNING) and evaluation continues with the next group.
pub trait GroupOperation: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn apply(
        &self,
        rows: Vec<DatasetRow>,
        selector: &Selector,
        catalog: &DataCatalog,
    ) -> Result<Vec<DatasetRow>, ConstraintNotSatisfied>;
}

/// Predicate over a candidate group; the group is discarded if it fails
pub trait GroupValidator: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn validate(&self, rows: &[DatasetRow]) -> bool;
}

/// One constraint of a data requirement, applied to each group in order
#[derive(Debug, Clone)]
pub enum GroupConstraint {
    Operation(Arc<dyn GroupOperation>),
    Validator(Arc<dyn GroupValidator>),
}

impl GroupConstraint {
    pub fn name(&self) -> &str {
        match self {
            GroupConstraint::Operation(op) => op.name(),
            GroupConstraint::Validator(v) => v.name(),
        }
    }
}

/// The datasets one diagnostic draws from a single catalog partition
#[derive(Debug, Clone)]
pub struct DataRequirement {
    pub source_type: SourceDatasetType,
    /// Applied conjunctively, in order
    pub filters: Vec<FacetFilter>,
    /// Facets the post-filter rows are partitioned by; empty means a single
    /// group containing all rows
    pub group_by: Vec<String>,
    pub constraints: Vec<GroupConstraint>,
}

impl DataRequirement {
    pub fn new(source_type: SourceDatasetType) -> Self {
        Self {
            source_type,
            filters: Vec::new(),
            group_by: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: FacetFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn group_by(mut self, facets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.group_by = facets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_constraint(mut self, constraint: GroupConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn validated_by(mut self, validator: impl GroupValidator + 'static) -> Self {
        self.constraints
            .push(GroupConstraint::Validator(Arc::new(validator)));
        self
    }

    pub fn transformed_by(mut self, operation: impl GroupOperation + 'static) -> Self {
        self.constraints
            .push(GroupConstraint::Operation(Arc::new(operation)));
        self
    }
}

/// Validator requiring a group to cover a set of facet values
///
/// Typical use: require both the `historical` and `piControl` experiments to
/// be present before an anomaly diagnostic can run.
#[derive(Debug, Clone)]
pub struct RequireFacets {
    facet: String,
    required: BTreeSet<String>,
}

impl RequireFacets {
    pub fn new(
        facet: impl Into<String>,
        required: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            facet: facet.into(),
            required: required.into_iter().map(Into::into).collect(),
        }
    }
}

impl GroupValidator for RequireFacets {
    fn name(&self) -> &str {
        "require_facets"
    }

    fn validate(&self, rows: &[DatasetRow]) -> bool {
        let present: BTreeSet<&str> = rows.iter().filter_map(|r| r.facet(&self.facet)).collect();
        self.required.iter().all(|v| present.contains(v.as_str()))
    }
}

/// Maximum gap tolerated between consecutive file rows of one dataset
const MAX_TIMERANGE_GAP_DAYS: i64 = 31;

fn parse_time(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Validator requiring the file rows of each dataset to form a contiguous
/// time range
///
/// Rows are sub-grouped by `group_by` (usually `instance_id`), ordered by
/// their `start_time` facet, and rejected when consecutive rows leave a gap
/// of more than a month. Rows without parseable time facets are treated as
/// timeless and ignored.
#[derive(Debug, Clone)]
pub struct RequireContiguousTimerange {
    group_by: Vec<String>,
}

impl RequireContiguousTimerange {
    pub fn new(group_by: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            group_by: group_by.into_iter().map(Into::into).collect(),
        }
    }
}

impl GroupValidator for RequireContiguousTimerange {
    fn name(&self) -> &str {
        "require_contiguous_timerange"
    }

    fn validate(&self, rows: &[DatasetRow]) -> bool {
        let mut subgroups: BTreeMap<Vec<&str>, Vec<&DatasetRow>> = BTreeMap::new();
        for row in rows {
            let key: Option<Vec<&str>> = self.group_by.iter().map(|f| row.facet(f)).collect();
            let Some(key) = key else { continue };
            subgroups.entry(key).or_default().push(row);
        }

        for rows in subgroups.values_mut() {
            let mut spans: Vec<(NaiveDateTime, NaiveDateTime)> = rows
                .iter()
                .filter_map(|row| {
                    let start = row.facet("start_time").and_then(parse_time)?;
                    let end = row.facet("end_time").and_then(parse_time)?;
                    Some((start, end))
                })
                .collect();
            spans.sort();

            for pair in spans.windows(2) {
                let gap = pair[1].0 - pair[0].1;
                if gap.num_days() > MAX_TIMERANGE_GAP_DAYS {
                    tracing::debug!(
                        gap_days = gap.num_days(),
                        "rejecting group with non-contiguous time range"
                    );
                    return false;
                }
            }
        }
        true
    }
}

/// Operation attaching supplementary datasets (for example cell-area fields)
/// to a group
///
/// Rows of the same partition matching `supplementary_facets` are candidates;
/// of those, rows sharing the group's values for every `matching_facets`
/// entry are attached. The group is discarded when no supplementary dataset
/// matches.
#[derive(Debug, Clone)]
pub struct AddSupplementaryDataset {
    supplementary_facets: BTreeMap<String, BTreeSet<String>>,
    matching_facets: Vec<String>,
    source_type: SourceDatasetType,
}

impl AddSupplementaryDataset {
    pub fn new<F, K, V, M, S>(
        source_type: SourceDatasetType,
        supplementary_facets: F,
        matching_facets: M,
    ) -> Self
    where
        F: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
        M: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            supplementary_facets: supplementary_facets
                .into_iter()
                .map(|(k, v)| (k.into(), BTreeSet::from([v.into()])))
                .collect(),
            matching_facets: matching_facets.into_iter().map(Into::into).collect(),
            source_type,
        }
    }
}

impl GroupOperation for AddSupplementaryDataset {
    fn name(&self) -> &str {
        "add_supplementary_dataset"
    }

    fn apply(
        &self,
        mut rows: Vec<DatasetRow>,
        _selector: &Selector,
        catalog: &DataCatalog,
    ) -> Result<Vec<DatasetRow>, ConstraintNotSatisfied> {
        let Some(partition) = catalog.partition(self.source_type) else {
            return Err(ConstraintNotSatisfied::new(
                self.name(),
                format!("no catalog partition for '{}'", self.source_type),
            ));
        };

        // Values the group exhibits for each matching facet
        let mut group_values: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for facet in &self.matching_facets {
            let values = rows.iter().filter_map(|r| r.facet(facet)).collect();
            group_values.insert(facet.as_str(), values);
        }

        let supplementary_filter = FacetFilter {
            facets: self.supplementary_facets.clone(),
            keep: true,
        };

        let present: BTreeSet<&str> = rows.iter().map(|r| r.instance_id.as_str()).collect();
        let mut attached = Vec::new();
        for candidate in partition.rows() {
            if !supplementary_filter.matches(candidate) {
                continue;
            }
            if present.contains(candidate.instance_id.as_str()) {
                continue;
            }
            let shares_group = self.matching_facets.iter().all(|facet| {
                match (candidate.facet(facet), group_values.get(facet.as_str())) {
                    (Some(value), Some(values)) => values.contains(value),
                    _ => false,
                }
            });
            if shares_group {
                attached.push(candidate.clone());
            }
        }

        if attached.is_empty() {
            return Err(ConstraintNotSatisfied::new(
                self.name(),
                format!(
                    "no supplementary dataset matching {:?} shares facets {:?} with the group",
                    self.supplementary_facets, self.matching_facets
                ),
            ));
        }

        rows.extend(attached);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DatasetPartition;

    fn row(instance_id: &str, variable: &str, experiment: &str) -> DatasetRow {
        DatasetRow::new(instance_id, format!("/data/{}.nc", instance_id))
            .with_facet("variable_id", variable)
            .with_facet("experiment_id", experiment)
    }

    #[test]
    fn test_facet_filter_matches_all_keys() {
        let filter = FacetFilter::keeping([
            ("variable_id", vec!["tas"]),
            ("experiment_id", vec!["historical", "ssp126"]),
        ]);
        assert!(filter.matches(&row("a", "tas", "historical")));
        assert!(filter.matches(&row("a", "tas", "ssp126")));
        assert!(!filter.matches(&row("a", "rsut", "historical")));
    }

    #[test]
    fn test_facet_filter_missing_facet_never_matches() {
        let filter = FacetFilter::keeping([("member_id", vec!["r1i1p1f1"])]);
        assert!(!filter.matches(&row("a", "tas", "historical")));
    }

    #[test]
    fn test_require_facets() {
        let validator = RequireFacets::new("experiment_id", ["historical", "piControl"]);
        let complete = vec![
            row("a", "tas", "historical"),
            row("b", "tas", "piControl"),
        ];
        let incomplete = vec![row("a", "tas", "historical")];
        assert!(validator.validate(&complete));
        assert!(!validator.validate(&incomplete));
    }

    #[test]
    fn test_contiguous_timerange() {
        let contiguous = vec![
            DatasetRow::new("a", "/data/a1.nc")
                .with_facet("start_time", "2000-01-01")
                .with_facet("end_time", "2009-12-31"),
            DatasetRow::new("a", "/data/a2.nc")
                .with_facet("start_time", "2010-01-01")
                .with_facet("end_time", "2019-12-31"),
        ];
        let gapped = vec![
            DatasetRow::new("a", "/data/a1.nc")
                .with_facet("start_time", "2000-01-01")
                .with_facet("end_time", "2004-12-31"),
            DatasetRow::new("a", "/data/a2.nc")
                .with_facet("start_time", "2010-01-01")
                .with_facet("end_time", "2019-12-31"),
        ];
        let validator = RequireContiguousTimerange::new(["instance_id"]);
        // instance_id is not a facet; sub-group on a facet both rows carry
        let validator_all = RequireContiguousTimerange::new(Vec::<String>::new());
        assert!(validator.validate(&contiguous));
        assert!(validator_all.validate(&contiguous));
        assert!(!validator_all.validate(&gapped));
    }

    #[test]
    fn test_add_supplementary_dataset() {
        let area = DatasetRow::new("areacella-m1", "/data/areacella.nc")
            .with_facet("variable_id", "areacella")
            .with_facet("source_id", "m1");
        let catalog = DataCatalog::new().with_partition(DatasetPartition::from_rows(
            SourceDatasetType::Cmip6,
            vec![
                row("a", "tas", "historical").with_facet("source_id", "m1"),
                area.clone(),
            ],
        ));

        let operation = AddSupplementaryDataset::new(
            SourceDatasetType::Cmip6,
            [("variable_id", "areacella")],
            ["source_id"],
        );

        let group = vec![row("a", "tas", "historical").with_facet("source_id", "m1")];
        let enlarged = operation
            .apply(group.clone(), &Selector::empty(), &catalog)
            .unwrap();
        assert_eq!(enlarged.len(), 2);
        assert!(enlarged.iter().any(|r| r.instance_id == "areacella-m1"));

        // A group from a different model finds no matching cell-area field
        let other = vec![row("b", "tas", "historical").with_facet("source_id", "m2")];
        assert!(operation.apply(other, &Selector::empty(), &catalog).is_err());
    }
}
