//! Scalar and series metric values
//!
//! The leaves of a metric bundle. Each value carries the dimensions that
//! identify it for faceted search; the dimensions are validated against the
//! controlled vocabulary before an outcome is recorded.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ResultValidationError;

/// Unstructured attributes attached to a metric value but not part of the
/// controlled vocabulary
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// A scalar value with its identifying dimensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarMetricValue {
    /// Key, value pairs that identify the dimensions of the metric
    pub dimensions: BTreeMap<String, String>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

/// An entry of a series index; strings and numbers are both permitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexValue {
    Number(f64),
    Text(String),
}

impl IndexValue {
    pub fn is_finite(&self) -> bool {
        match self {
            IndexValue::Number(n) => n.is_finite(),
            IndexValue::Text(_) => true,
        }
    }
}

fn deserialize_values<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    // Missing observations arrive as nulls; store them as NaN
    let raw: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// A 1-d array with an associated index and identifying dimensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMetricValue {
    pub dimensions: BTreeMap<String, String>,
    #[serde(deserialize_with = "deserialize_values")]
    pub values: Vec<f64>,
    pub index: Vec<IndexValue>,
    /// Presentation name of the index; not part of the controlled vocabulary
    pub index_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

impl SeriesMetricValue {
    /// Check the structural rules for series values
    ///
    /// The index must have the same length as the values and contain no
    /// NaN/Inf entries.
    pub fn validate(&self) -> Result<(), ResultValidationError> {
        if self.index.len() != self.values.len() {
            return Err(ResultValidationError::IndexLengthMismatch {
                index_len: self.index.len(),
                values_len: self.values.len(),
            });
        }
        if self.index.iter().any(|v| !v.is_finite()) {
            return Err(ResultValidationError::NonFiniteIndex);
        }
        Ok(())
    }

    /// Load a sequence of series values from a JSON file
    pub fn load_from_json(path: &Path) -> anyhow::Result<Vec<SeriesMetricValue>> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read series values from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse series values in {}", path.display()))
    }

    /// Write a sequence of series values to a JSON file
    pub fn dump_to_json(path: &Path, series: &[SeriesMetricValue]) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(series)?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write series values to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: Vec<f64>, index: Vec<IndexValue>) -> SeriesMetricValue {
        SeriesMetricValue {
            dimensions: BTreeMap::from([("metric".to_string(), "amoc".to_string())]),
            values,
            index,
            index_name: "year".to_string(),
            attributes: None,
        }
    }

    #[test]
    fn test_series_length_mismatch() {
        let s = series(vec![1.0, 2.0], vec![IndexValue::Number(2000.0)]);
        assert!(matches!(
            s.validate(),
            Err(ResultValidationError::IndexLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_series_non_finite_index() {
        let s = series(
            vec![1.0, 2.0],
            vec![IndexValue::Number(2000.0), IndexValue::Number(f64::NAN)],
        );
        assert!(matches!(
            s.validate(),
            Err(ResultValidationError::NonFiniteIndex)
        ));
    }

    #[test]
    fn test_series_valid() {
        let s = series(
            vec![1.0, f64::NAN],
            vec![IndexValue::Text("a".to_string()), IndexValue::Text("b".to_string())],
        );
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_null_values_become_nan() {
        let parsed: SeriesMetricValue = serde_json::from_str(
            r#"{
                "dimensions": {"metric": "amoc"},
                "values": [1.0, null],
                "index": [2000, 2001],
                "index_name": "year"
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.values[0], 1.0);
        assert!(parsed.values[1].is_nan());
    }
}
