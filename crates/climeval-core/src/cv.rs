//! Controlled vocabulary
//!
//! The CV enumerates the dimensions a metric value may be described by and,
//! for closed dimensions, the permitted values. Every outcome is validated
//! against the active CV before it is recorded.

use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::error::ResultValidationError;
use crate::metric_values::{ScalarMetricValue, SeriesMetricValue};
use crate::output::MetricBundle;

/// Names reserved for internal use; they collide with bundle bookkeeping and
/// persistence columns and may not appear as dimension names
pub const RESERVED_DIMENSION_NAMES: [&str; 6] = [
    "attributes",
    "json_structure",
    "created_at",
    "updated_at",
    "value",
    "id",
];

/// An allowed value for a dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DimensionValue {
    pub name: String,
    pub long_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

/// Description of one dimension of the controlled vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dimension {
    /// Short identifier; used as a key in metric bundles
    pub name: String,
    /// Longer name used for presentation
    pub long_name: String,
    pub description: String,
    /// Whether values outside `values` are accepted, for dimensions whose
    /// values are not all known up front (for example the model dimension)
    pub allow_extra_values: bool,
    /// Whether executions must specify this dimension
    pub required: bool,
    #[serde(default)]
    pub values: Vec<DimensionValue>,
}

impl Dimension {
    fn allows(&self, value: &str) -> bool {
        self.allow_extra_values || self.values.iter().any(|v| v.name == value)
    }
}

/// A collection of controlled dimensions and values used to validate
/// execution outcomes
///
/// A metric bundle does not have to specify all dimensions, but dimensions
/// absent from the CV are not permitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cv {
    dimensions: Vec<Dimension>,
}

impl Cv {
    /// Build a CV, rejecting duplicate and reserved dimension names
    pub fn new(dimensions: Vec<Dimension>) -> anyhow::Result<Self> {
        let mut seen = std::collections::BTreeSet::new();
        for dimension in &dimensions {
            if RESERVED_DIMENSION_NAMES.contains(&dimension.name.as_str()) {
                bail!("reserved dimension name: '{}'", dimension.name);
            }
            if !seen.insert(dimension.name.as_str()) {
                bail!("duplicate dimension name: '{}'", dimension.name);
            }
        }
        Ok(Self { dimensions })
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// Load a CV from a JSON file
    pub fn load_from_json(path: &Path) -> anyhow::Result<Cv> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read CV from {}", path.display()))?;
        Self::from_json_str(&contents)
            .with_context(|| format!("invalid CV in {}", path.display()))
    }

    pub fn from_json_str(contents: &str) -> anyhow::Result<Cv> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct RawCv {
            dimensions: Vec<Dimension>,
        }
        let raw: RawCv = serde_json::from_str(contents).context("failed to parse CV")?;
        Self::new(raw.dimensions)
    }

    /// The CV shipped with the framework
    pub fn default_cv() -> Cv {
        Self::from_json_str(include_str!("default_cv.json"))
            .expect("embedded default CV must be valid")
    }

    fn validate_dimensions(
        &self,
        dimensions: &std::collections::BTreeMap<String, String>,
    ) -> Result<(), ResultValidationError> {
        for (name, value) in dimensions {
            let dimension = self
                .dimension(name)
                .ok_or_else(|| ResultValidationError::UnknownDimension(name.clone()))?;
            if !dimension.allows(value) {
                return Err(ResultValidationError::UnknownValue {
                    dimension: name.clone(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    /// Validate a single scalar metric value against the CV
    pub fn validate_scalar(&self, value: &ScalarMetricValue) -> Result<(), ResultValidationError> {
        self.validate_dimensions(&value.dimensions)?;
        if !value.value.is_finite() && !value.value.is_nan() {
            // Inf is rejected; NaN encodes a missing value
            return Err(ResultValidationError::NonNumericValue {
                dimensions: value.dimensions.keys().cloned().collect(),
            });
        }
        Ok(())
    }

    /// Validate a single series metric value against the CV
    pub fn validate_series(&self, value: &SeriesMetricValue) -> Result<(), ResultValidationError> {
        self.validate_dimensions(&value.dimensions)?;
        value.validate()
    }

    /// Validate every leaf of a metric bundle
    pub fn validate_bundle(&self, bundle: &MetricBundle) -> Result<(), ResultValidationError> {
        for value in bundle.scalar_values()? {
            self.validate_scalar(&value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn dimension(name: &str, allow_extra: bool, values: &[&str]) -> Dimension {
        Dimension {
            name: name.to_string(),
            long_name: name.to_string(),
            description: String::new(),
            allow_extra_values: allow_extra,
            required: false,
            values: values
                .iter()
                .map(|v| DimensionValue {
                    name: v.to_string(),
                    long_name: v.to_string(),
                    description: None,
                    units: None,
                })
                .collect(),
        }
    }

    fn cv() -> Cv {
        Cv::new(vec![
            dimension("statistic", false, &["mean", "rmse"]),
            dimension("source_id", true, &[]),
        ])
        .unwrap()
    }

    fn scalar(dimensions: &[(&str, &str)]) -> ScalarMetricValue {
        ScalarMetricValue {
            dimensions: dimensions
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            value: 1.0,
            attributes: None,
        }
    }

    #[test]
    fn test_reserved_dimension_rejected() {
        assert!(Cv::new(vec![dimension("value", true, &[])]).is_err());
    }

    #[test]
    fn test_duplicate_dimension_rejected() {
        assert!(Cv::new(vec![
            dimension("statistic", false, &[]),
            dimension("statistic", true, &[]),
        ])
        .is_err());
    }

    #[test]
    fn test_unknown_dimension_rejected() {
        let err = cv().validate_scalar(&scalar(&[("region", "global")])).unwrap_err();
        assert!(matches!(err, ResultValidationError::UnknownDimension(_)));
    }

    #[test]
    fn test_closed_dimension_value_rejected() {
        let err = cv()
            .validate_scalar(&scalar(&[("statistic", "median")]))
            .unwrap_err();
        assert!(matches!(err, ResultValidationError::UnknownValue { .. }));
    }

    #[test]
    fn test_open_dimension_accepts_any_value() {
        assert!(cv()
            .validate_scalar(&scalar(&[("source_id", "ACCESS-ESM1-5")]))
            .is_ok());
        assert!(cv().validate_scalar(&scalar(&[("statistic", "mean")])).is_ok());
    }

    #[test]
    fn test_default_cv_loads() {
        let cv = Cv::default_cv();
        assert!(cv.dimension("statistic").is_some());
    }

    #[test]
    fn test_series_validation_goes_through_cv() {
        let series = SeriesMetricValue {
            dimensions: BTreeMap::from([("statistic".to_string(), "mean".to_string())]),
            values: vec![1.0],
            index: vec![crate::metric_values::IndexValue::Number(2000.0)],
            index_name: "year".to_string(),
            attributes: None,
        };
        assert!(cv().validate_series(&series).is_ok());
    }
}
