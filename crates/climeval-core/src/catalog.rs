//! Tabular store of dataset rows, keyed by source dataset type
//!
//! The catalog is assembled outside the core (ingestion is an external
//! concern) and is read-only within a solver invocation.

use std::collections::{BTreeMap, BTreeSet};

use crate::datasets::{DatasetRow, Selector, SourceDatasetType};
use crate::error::EvaluatorError;
use crate::requirements::FacetFilter;

/// One partition of the catalog: the rows of a single source dataset type
/// together with the facet columns they are described by
#[derive(Debug, Clone)]
pub struct DatasetPartition {
    source_type: SourceDatasetType,
    columns: BTreeSet<String>,
    rows: Vec<DatasetRow>,
}

impl DatasetPartition {
    /// Build a partition with an explicit column set
    pub fn new(
        source_type: SourceDatasetType,
        columns: impl IntoIterator<Item = impl Into<String>>,
        rows: Vec<DatasetRow>,
    ) -> Self {
        Self {
            source_type,
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    /// Build a partition inferring the column set from the rows' facets
    pub fn from_rows(source_type: SourceDatasetType, rows: Vec<DatasetRow>) -> Self {
        let columns = rows
            .iter()
            .flat_map(|r| r.facets.keys().cloned())
            .collect();
        Self {
            source_type,
            columns,
            rows,
        }
    }

    pub fn source_type(&self) -> SourceDatasetType {
        self.source_type
    }

    pub fn rows(&self) -> &[DatasetRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    fn require_column(&self, name: &str) -> Result<(), EvaluatorError> {
        if self.has_column(name) {
            Ok(())
        } else {
            Err(EvaluatorError::UnknownFacet {
                source_type: self.source_type,
                facet: name.to_string(),
            })
        }
    }

    /// Apply a facet filter, returning the retained rows
    ///
    /// Every facet key referenced by the filter must be a column of this
    /// partition; otherwise the filter fails fast with `UnknownFacet`.
    pub fn apply_filter(&self, filter: &FacetFilter) -> Result<DatasetPartition, EvaluatorError> {
        for facet in filter.facets.keys() {
            self.require_column(facet)?;
        }
        let rows = self
            .rows
            .iter()
            .filter(|row| filter.matches(row) == filter.keep)
            .cloned()
            .collect();
        Ok(DatasetPartition {
            source_type: self.source_type,
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Partition the rows into groups sharing the `group_by` facet values
    ///
    /// Groups appear in first-appearance order of each distinct key tuple,
    /// which keeps two evaluations of the same catalog deterministic. Rows
    /// that lack one of the group-by facets are skipped. An empty `group_by`
    /// yields a single group with an empty selector.
    pub fn group_by(
        &self,
        group_by: &[String],
    ) -> Result<Vec<(Selector, Vec<DatasetRow>)>, EvaluatorError> {
        for facet in group_by {
            self.require_column(facet)?;
        }

        if group_by.is_empty() {
            return Ok(vec![(Selector::empty(), self.rows.clone())]);
        }

        let mut order: Vec<Selector> = Vec::new();
        let mut groups: BTreeMap<Selector, Vec<DatasetRow>> = BTreeMap::new();
        for row in &self.rows {
            let mut pairs = Vec::with_capacity(group_by.len());
            let mut complete = true;
            for facet in group_by {
                match row.facet(facet) {
                    Some(value) => pairs.push((facet.clone(), value.to_string())),
                    None => {
                        tracing::debug!(
                            instance_id = %row.instance_id,
                            facet = %facet,
                            "skipping row without group-by facet"
                        );
                        complete = false;
                        break;
                    }
                }
            }
            if !complete {
                continue;
            }
            let selector = Selector::new(pairs);
            if !groups.contains_key(&selector) {
                order.push(selector.clone());
            }
            groups.entry(selector).or_default().push(row.clone());
        }

        Ok(order
            .into_iter()
            .map(|selector| {
                let rows = groups.remove(&selector).unwrap_or_default();
                (selector, rows)
            })
            .collect())
    }

    /// Distinct values of a column, in first-appearance order
    pub fn unique_values(&self, column: &str) -> Result<Vec<String>, EvaluatorError> {
        self.require_column(column)?;
        let mut seen = BTreeSet::new();
        let mut values = Vec::new();
        for row in &self.rows {
            if let Some(value) = row.facet(column) {
                if seen.insert(value.to_string()) {
                    values.push(value.to_string());
                }
            }
        }
        Ok(values)
    }
}

/// Mapping from source dataset type to its partition of dataset rows
#[derive(Debug, Clone, Default)]
pub struct DataCatalog {
    partitions: BTreeMap<SourceDatasetType, DatasetPartition>,
}

impl DataCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a partition
    pub fn with_partition(mut self, partition: DatasetPartition) -> Self {
        self.partitions.insert(partition.source_type(), partition);
        self
    }

    pub fn partition(&self, source_type: SourceDatasetType) -> Option<&DatasetPartition> {
        self.partitions.get(&source_type)
    }

    pub fn source_types(&self) -> impl Iterator<Item = SourceDatasetType> + '_ {
        self.partitions.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.values().all(DatasetPartition::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmip6_row(instance_id: &str, variable: &str, experiment: &str) -> DatasetRow {
        DatasetRow::new(instance_id, format!("/data/{}.nc", instance_id))
            .with_facet("variable_id", variable)
            .with_facet("experiment_id", experiment)
    }

    fn partition() -> DatasetPartition {
        DatasetPartition::from_rows(
            SourceDatasetType::Cmip6,
            vec![
                cmip6_row("tas-hist", "tas", "historical"),
                cmip6_row("tas-ssp126", "tas", "ssp126"),
                cmip6_row("rsut-hist", "rsut", "historical"),
            ],
        )
    }

    #[test]
    fn test_filter_keeps_matches() {
        let filter = FacetFilter::keeping([("variable_id", BTreeSet::from(["tas".to_string()]))]);
        let filtered = partition().apply_filter(&filter).unwrap();
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_filter_drop_removes_matches() {
        let filter = FacetFilter::dropping([("experiment_id", BTreeSet::from(["ssp126".to_string()]))]);
        let filtered = partition().apply_filter(&filter).unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.rows().iter().all(|r| r.facet("experiment_id") != Some("ssp126")));
    }

    #[test]
    fn test_filter_unknown_facet_fails_fast() {
        let filter = FacetFilter::keeping([("member_id", BTreeSet::from(["r1i1p1f1".to_string()]))]);
        let err = partition().apply_filter(&filter).unwrap_err();
        assert!(matches!(err, EvaluatorError::UnknownFacet { .. }));
    }

    #[test]
    fn test_group_by_first_appearance_order() {
        let groups = partition().group_by(&["variable_id".to_string()]).unwrap();
        let keys: Vec<_> = groups
            .iter()
            .map(|(selector, _)| selector.get("variable_id").unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["tas", "rsut"]);
    }

    #[test]
    fn test_group_by_empty_yields_single_group() {
        let groups = partition().group_by(&[]).unwrap();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].0.is_empty());
        assert_eq!(groups[0].1.len(), 3);
    }

    #[test]
    fn test_unique_values() {
        let values = partition().unique_values("experiment_id").unwrap();
        assert_eq!(values, vec!["historical", "ssp126"]);
    }
}
