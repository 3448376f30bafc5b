//! Dataset identity, selectors and execution collections
//!
//! A dataset row is an immutable record describing one logical dataset (or
//! one file of it). Rows are grouped by facet values into collections, and a
//! diagnostic execution consumes one collection per source dataset type.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Types of supported source datasets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceDatasetType {
    Climatology,
    Cmip6,
    Obs4Mips,
}

impl SourceDatasetType {
    /// String representation used in config files, queue names and the db
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceDatasetType::Climatology => "climatology",
            SourceDatasetType::Cmip6 => "cmip6",
            SourceDatasetType::Obs4Mips => "obs4mips",
        }
    }

    /// All source types, ordered alphabetically by their wire value
    ///
    /// Iteration order matters: the dataset-collection hash and the selector
    /// map are built in this order so they are reproducible.
    pub fn ordered() -> [SourceDatasetType; 3] {
        [
            SourceDatasetType::Climatology,
            SourceDatasetType::Cmip6,
            SourceDatasetType::Obs4Mips,
        ]
    }
}

impl fmt::Display for SourceDatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceDatasetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "climatology" => Ok(SourceDatasetType::Climatology),
            "cmip6" => Ok(SourceDatasetType::Cmip6),
            "obs4mips" => Ok(SourceDatasetType::Obs4Mips),
            _ => Err(format!("unknown source dataset type: {}", s)),
        }
    }
}

/// One file row of a logical dataset
///
/// A logical dataset may comprise multiple rows sharing the same
/// `instance_id`. Rows are never mutated after ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRow {
    /// Globally unique identifier of the logical dataset this row belongs to
    pub instance_id: String,
    /// Physical location of the file
    pub path: PathBuf,
    /// Faceted metadata (variable, experiment, source, variant, grid, ...)
    pub facets: BTreeMap<String, String>,
}

impl DatasetRow {
    pub fn new(instance_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            instance_id: instance_id.into(),
            path: path.into(),
            facets: BTreeMap::new(),
        }
    }

    /// Add a facet value, builder style
    pub fn with_facet(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.facets.insert(key.into(), value.into());
        self
    }

    /// Look up a facet value by name
    pub fn facet(&self, name: &str) -> Option<&str> {
        self.facets.get(name).map(String::as_str)
    }
}

/// The canonical identifier of an execution group
///
/// A sorted sequence of `(facet_name, facet_value)` pairs derived from the
/// group-by. Equality is value based and the sorted order makes the selector
/// usable as a map key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Selector(Vec<(String, String)>);

impl Selector {
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut pairs: Vec<_> = pairs.into_iter().collect();
        pairs.sort();
        Self(pairs)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Value for a facet name, if the selector constrains it
    pub fn get(&self, facet: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == facet)
            .map(|(_, v)| v.as_str())
    }

    /// Merge two selectors; on conflicting facet names the existing value wins
    pub fn merged_with(&self, other: &Selector) -> Selector {
        let mut map: BTreeMap<String, String> = self.0.iter().cloned().collect();
        for (k, v) in &other.0 {
            map.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Selector::new(map)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", k, v)?;
            first = false;
        }
        Ok(())
    }
}

/// Group of datasets selected for one source dataset type of an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetCollection {
    rows: Vec<DatasetRow>,
    selector: Selector,
}

impl DatasetCollection {
    /// Build a collection, normalising the row order
    ///
    /// Row order within a group carries no meaning but must be deterministic,
    /// so rows are sorted by `(instance_id, path)`.
    pub fn new(mut rows: Vec<DatasetRow>, selector: Selector) -> Self {
        rows.sort_by(|a, b| {
            a.instance_id
                .cmp(&b.instance_id)
                .then_with(|| a.path.cmp(&b.path))
        });
        Self { rows, selector }
    }

    pub fn rows(&self) -> &[DatasetRow] {
        &self.rows
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Sorted set of distinct instance ids in this collection
    pub fn instance_ids(&self) -> BTreeSet<&str> {
        self.rows.iter().map(|r| r.instance_id.as_str()).collect()
    }

    /// Paths of every file row, in normalised order
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.rows.iter().map(|r| &r.path)
    }
}

/// The complete set of datasets required for one diagnostic execution
///
/// Covers one `DatasetCollection` per source dataset type involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionDatasetCollection {
    collections: BTreeMap<SourceDatasetType, DatasetCollection>,
}

impl ExecutionDatasetCollection {
    pub fn new(collections: BTreeMap<SourceDatasetType, DatasetCollection>) -> Self {
        Self { collections }
    }

    pub fn get(&self, source_type: SourceDatasetType) -> Option<&DatasetCollection> {
        self.collections.get(&source_type)
    }

    pub fn contains(&self, source_type: SourceDatasetType) -> bool {
        self.collections.contains_key(&source_type)
    }

    pub fn items(&self) -> impl Iterator<Item = (SourceDatasetType, &DatasetCollection)> {
        self.collections.iter().map(|(k, v)| (*k, v))
    }

    /// Stable content hash of the collection
    ///
    /// A SHA-1 digest over the sorted distinct `instance_id` lists of each
    /// source type, iterated in `SourceDatasetType::ordered` order. The hash
    /// depends only on which logical datasets are present, not on row order
    /// or file paths, and is used to detect whether an execution group's
    /// inputs have changed.
    pub fn hash(&self) -> String {
        let mut hasher = Sha1::new();
        for source_type in SourceDatasetType::ordered() {
            let Some(collection) = self.collections.get(&source_type) else {
                continue;
            };
            hasher.update(source_type.as_str().as_bytes());
            for instance_id in collection.instance_ids() {
                hasher.update(b"\0");
                hasher.update(instance_id.as_bytes());
            }
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Selectors per source type, keyed by the wire value for persistence
    pub fn selectors(&self) -> BTreeMap<String, Selector> {
        let mut selectors = BTreeMap::new();
        for source_type in SourceDatasetType::ordered() {
            if let Some(collection) = self.collections.get(&source_type) {
                selectors.insert(source_type.as_str().to_string(), collection.selector().clone());
            }
        }
        selectors
    }

    /// Human-readable group key derived from the selectors
    ///
    /// Selector values are joined with `_` in `(source_type, facet_name)`
    /// order. An execution with no selector facets falls back to the literal
    /// `all` so the key is never empty.
    pub fn key(&self) -> String {
        let mut parts = Vec::new();
        for source_type in SourceDatasetType::ordered() {
            if let Some(collection) = self.collections.get(&source_type) {
                for (_, value) in collection.selector().iter() {
                    parts.push(value.to_string());
                }
            }
        }
        if parts.is_empty() {
            "all".to_string()
        } else {
            parts.join("_")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(instance_id: &str, path: &str) -> DatasetRow {
        DatasetRow::new(instance_id, path)
    }

    fn collection(ids: &[&str]) -> ExecutionDatasetCollection {
        let rows = ids
            .iter()
            .map(|id| row(id, &format!("/data/{}.nc", id)))
            .collect();
        let mut collections = BTreeMap::new();
        collections.insert(
            SourceDatasetType::Cmip6,
            DatasetCollection::new(rows, Selector::empty()),
        );
        ExecutionDatasetCollection::new(collections)
    }

    #[test]
    fn test_source_type_round_trip() {
        for source_type in SourceDatasetType::ordered() {
            let parsed: SourceDatasetType = source_type.as_str().parse().unwrap();
            assert_eq!(parsed, source_type);
        }
        assert!("cmip9".parse::<SourceDatasetType>().is_err());
    }

    #[test]
    fn test_selector_sorts_pairs() {
        let selector = Selector::new([
            ("variable_id".to_string(), "tas".to_string()),
            ("experiment_id".to_string(), "historical".to_string()),
        ]);
        let pairs: Vec<_> = selector.iter().collect();
        assert_eq!(
            pairs,
            vec![("experiment_id", "historical"), ("variable_id", "tas")]
        );
    }

    #[test]
    fn test_collection_rows_are_sorted() {
        let collection = DatasetCollection::new(
            vec![row("b", "/data/b.nc"), row("a", "/data/a2.nc"), row("a", "/data/a1.nc")],
            Selector::empty(),
        );
        let ids: Vec<_> = collection.rows().iter().map(|r| r.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "a", "b"]);
    }

    #[test]
    fn test_hash_ignores_row_order() {
        let forwards = collection(&["a", "b", "c"]);
        let backwards = collection(&["c", "b", "a"]);
        assert_eq!(forwards.hash(), backwards.hash());
    }

    #[test]
    fn test_hash_changes_with_instance_ids() {
        assert_ne!(collection(&["a", "b"]).hash(), collection(&["a", "c"]).hash());
    }

    #[test]
    fn test_key_falls_back_when_selector_empty() {
        assert_eq!(collection(&["a"]).key(), "all");
    }

    #[test]
    fn test_key_joins_selector_values() {
        let rows = vec![row("a", "/data/a.nc")];
        let selector = Selector::new([
            ("variable_id".to_string(), "tas".to_string()),
            ("experiment_id".to_string(), "ssp126".to_string()),
        ]);
        let mut collections = BTreeMap::new();
        collections.insert(
            SourceDatasetType::Cmip6,
            DatasetCollection::new(rows, selector),
        );
        let collection = ExecutionDatasetCollection::new(collections);
        assert_eq!(collection.key(), "ssp126_tas");
    }
}
