//! Wire messages exchanged with workers
//!
//! Everything is pure data serialized as JSON; the worker resolves the
//! diagnostic implementation by `(provider_slug, diagnostic_slug)` on its
//! side.

use serde::{Deserialize, Serialize};

use climeval_config::LogLevel;
use climeval_core::diagnostics::{ExecutionDefinition, ExecutionResult};
use climeval_core::executor::ExecutionHandle;

/// One execution request, published to a provider's task subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub definition: ExecutionDefinition,
    /// Absent for fire-and-forget submissions
    pub handle: Option<ExecutionHandle>,
    pub log_level: LogLevel,
}

/// The outcome of one execution, published to the results subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMessage {
    pub handle: Option<ExecutionHandle>,
    pub definition: ExecutionDefinition,
    pub result: ExecutionResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use climeval_core::datasets::ExecutionDatasetCollection;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    fn test_task_message_round_trip() {
        let message = TaskMessage {
            definition: ExecutionDefinition {
                provider_slug: "example".to_string(),
                diagnostic_slug: "global-mean".to_string(),
                key: "tas_historical".to_string(),
                datasets: ExecutionDatasetCollection::new(BTreeMap::new()),
                root_directory: PathBuf::from("/scratch"),
                output_fragment: PathBuf::from("example/global-mean/tas_historical/0"),
            },
            handle: Some(ExecutionHandle {
                execution_id: 7,
                group_id: 3,
            }),
            log_level: LogLevel::Info,
        };

        let encoded = serde_json::to_vec(&message).unwrap();
        let decoded: TaskMessage = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded.definition.diagnostic_slug, "global-mean");
        assert_eq!(decoded.handle.unwrap().execution_id, 7);
    }
}
