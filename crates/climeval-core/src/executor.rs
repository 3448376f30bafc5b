//! Executor contract
//!
//! An executor is responsible for running diagnostic executions, either
//! in-process, in a worker pool, or on remote workers behind a message
//! broker. The solver only ever blocks in `join`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::diagnostics::ExecutionDefinition;
use crate::error::ExecutorError;

/// Opaque token associating a submission with its persistent execution record
///
/// Executors thread the handle through to outcome recording; an absent handle
/// means fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub execution_id: i64,
    pub group_id: i64,
}

impl std::fmt::Debug for dyn Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").field("name", &self.name()).finish()
    }
}

/// Schedules diagnostic executions and waits for their outcomes
#[async_trait]
pub trait Executor: Send + Sync {
    /// Short name used in configuration and log messages
    fn name(&self) -> &'static str;

    /// Accept an execution definition for processing
    ///
    /// Returns as soon as the work is queued; outcomes are recorded
    /// asynchronously against the handle.
    async fn submit(
        &self,
        definition: ExecutionDefinition,
        handle: Option<ExecutionHandle>,
    ) -> Result<(), ExecutorError>;

    /// Block until all outstanding submissions have produced outcomes
    ///
    /// Fails with `ExecutorError::JoinTimeout` if the timeout elapses first.
    /// In-flight work is not cancelled by `join`; a caller that wants hard
    /// cancellation must tear down the executor.
    async fn join(&self, timeout: Duration) -> Result<(), ExecutorError>;
}
