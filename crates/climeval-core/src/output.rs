//! Metric and output bundles
//!
//! A metric bundle is a nested mapping whose leaves are scalar metric
//! values, following the CMEC metric bundle layout (`DIMENSIONS` with a
//! `json_structure`, `RESULTS` nested by dimension value). An output bundle
//! is the manifest of artifacts (plots, data files, HTML) an execution
//! produced.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ResultValidationError;
use crate::metric_values::ScalarMetricValue;

/// The `DIMENSIONS` block of a metric bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleDimensions {
    /// Dimension names, outermost first; the nesting depth of `RESULTS`
    pub json_structure: Vec<String>,
    /// Optional per-dimension value descriptions, keyed by dimension name
    #[serde(flatten)]
    pub described_values: BTreeMap<String, Value>,
}

/// A CMEC-style metric bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBundle {
    #[serde(rename = "DIMENSIONS")]
    pub dimensions: BundleDimensions,
    #[serde(rename = "RESULTS")]
    pub results: Value,
}

impl MetricBundle {
    pub fn new(json_structure: Vec<String>, results: Value) -> Self {
        Self {
            dimensions: BundleDimensions {
                json_structure,
                described_values: BTreeMap::new(),
            },
            results,
        }
    }

    /// Load a metric bundle from a JSON file
    pub fn load_from_json(path: &Path) -> anyhow::Result<MetricBundle> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read metric bundle from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse metric bundle in {}", path.display()))
    }

    /// Write the bundle to a JSON file
    pub fn dump_to_json(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write metric bundle to {}", path.display()))
    }

    /// Flatten the nested results into scalar metric values
    ///
    /// The nesting depth must equal the length of `json_structure` and every
    /// leaf must be numeric.
    pub fn scalar_values(&self) -> Result<Vec<ScalarMetricValue>, ResultValidationError> {
        let mut values = Vec::new();
        let mut path = Vec::new();
        walk_results(
            &self.results,
            &self.dimensions.json_structure,
            &mut path,
            &mut values,
        )?;
        Ok(values)
    }
}

fn walk_results(
    node: &Value,
    structure: &[String],
    path: &mut Vec<(String, String)>,
    out: &mut Vec<ScalarMetricValue>,
) -> Result<(), ResultValidationError> {
    if structure.is_empty() {
        let value = node.as_f64().ok_or_else(|| ResultValidationError::NonNumericValue {
            dimensions: path.iter().map(|(k, _)| k.clone()).collect(),
        })?;
        out.push(ScalarMetricValue {
            dimensions: path.iter().cloned().collect(),
            value,
            attributes: None,
        });
        return Ok(());
    }

    let Value::Object(map) = node else {
        return Err(ResultValidationError::MalformedBundle(format!(
            "expected an object at dimension '{}'",
            structure[0]
        )));
    };
    for (key, child) in map {
        // An "attributes" sibling carries metadata, not a dimension value
        if key == "attributes" {
            continue;
        }
        path.push((structure[0].clone(), key.clone()));
        walk_results(child, &structure[1..], path, out)?;
        path.pop();
    }
    Ok(())
}

/// Description of one artifact referenced by an output bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    /// Filename relative to the execution's output directory
    pub filename: String,
    pub long_name: String,
    pub description: String,
}

/// Provenance block of an output bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputProvenance {
    /// Relevant environment variables at execution time
    pub environment: BTreeMap<String, Option<String>>,
    /// Paths of the model data consumed
    pub modeldata: Value,
    /// Short names and versions of observational datasets consumed
    pub obsdata: Value,
    /// Filename of the free-format execution log
    pub log: String,
}

/// Manifest of the artifacts produced by one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputBundle {
    /// Artifact to open first when browsing the bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    pub provenance: OutputProvenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, OutputFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plots: Option<BTreeMap<String, OutputFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<BTreeMap<String, OutputFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BTreeMap<String, OutputFile>>,
}

impl OutputBundle {
    /// An empty bundle with the given provenance inputs
    pub fn build(modeldata: Vec<String>, log: impl Into<String>) -> Self {
        Self {
            index: None,
            provenance: OutputProvenance {
                environment: BTreeMap::new(),
                modeldata: Value::from(modeldata),
                obsdata: Value::Object(Default::default()),
                log: log.into(),
            },
            data: None,
            plots: None,
            html: None,
            metrics: None,
        }
    }

    pub fn load_from_json(path: &Path) -> anyhow::Result<OutputBundle> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read output bundle from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse output bundle in {}", path.display()))
    }

    pub fn dump_to_json(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write output bundle to {}", path.display()))
    }

    /// Every artifact filename referenced by the bundle, grouped by kind
    pub fn artifacts(&self) -> Vec<(&'static str, &OutputFile)> {
        let mut artifacts = Vec::new();
        for (kind, group) in [
            ("data", &self.data),
            ("plots", &self.plots),
            ("html", &self.html),
            ("metrics", &self.metrics),
        ] {
            if let Some(group) = group {
                artifacts.extend(group.values().map(|f| (kind, f)));
            }
        }
        artifacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle() -> MetricBundle {
        MetricBundle::new(
            vec!["region".to_string(), "statistic".to_string()],
            json!({
                "global": {"mean": 287.5, "rmse": 1.2},
                "tropics": {"mean": 299.1, "rmse": 0.8}
            }),
        )
    }

    #[test]
    fn test_scalar_values_flatten() {
        let values = bundle().scalar_values().unwrap();
        assert_eq!(values.len(), 4);
        let global_mean = values
            .iter()
            .find(|v| v.dimensions["region"] == "global" && v.dimensions["statistic"] == "mean")
            .unwrap();
        assert_eq!(global_mean.value, 287.5);
    }

    #[test]
    fn test_non_numeric_leaf_rejected() {
        let bundle = MetricBundle::new(
            vec!["region".to_string()],
            json!({"global": "not-a-number"}),
        );
        assert!(matches!(
            bundle.scalar_values(),
            Err(ResultValidationError::NonNumericValue { .. })
        ));
    }

    #[test]
    fn test_shallow_nesting_rejected() {
        let bundle = MetricBundle::new(
            vec!["region".to_string(), "statistic".to_string()],
            json!({"global": 1.0}),
        );
        assert!(matches!(
            bundle.scalar_values(),
            Err(ResultValidationError::MalformedBundle(_))
        ));
    }

    #[test]
    fn test_bundle_round_trips_through_json() {
        let serialized = serde_json::to_string(&bundle()).unwrap();
        assert!(serialized.contains("DIMENSIONS"));
        let parsed: MetricBundle = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed, bundle());
    }

    #[test]
    fn test_output_bundle_artifacts() {
        let mut bundle = OutputBundle::build(vec!["/data/tas.nc".to_string()], "out.log");
        bundle.plots = Some(BTreeMap::from([(
            "timeseries".to_string(),
            OutputFile {
                filename: "timeseries.png".to_string(),
                long_name: "Annual mean timeseries".to_string(),
                description: "Global annual mean".to_string(),
            },
        )]));
        let artifacts = bundle.artifacts();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].0, "plots");
        assert_eq!(artifacts[0].1.filename, "timeseries.png");
    }
}
