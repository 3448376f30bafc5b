//! Worker-pool executor
//!
//! Runs each submission on a blocking thread, with a fixed number of
//! diagnostics in flight at once. Scheduling is FIFO: permits are handed out
//! in submission order, completion order is unordered.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use climeval_config::LogLevel;
use climeval_core::diagnostics::{ExecutionDefinition, ExecutionResult};
use climeval_core::error::ExecutorError;
use climeval_core::executor::{ExecutionHandle, Executor};
use climeval_core::providers::ProviderRegistry;

use crate::outcome::OutcomeHandler;
use crate::run::execute_locally;

/// Executor backed by a fixed-size pool of blocking workers
pub struct LocalExecutor {
    providers: ProviderRegistry,
    handler: OutcomeHandler,
    log_level: LogLevel,
    semaphore: Arc<Semaphore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalExecutor {
    /// `pool_size` defaults to the host core count
    pub fn new(
        providers: ProviderRegistry,
        handler: OutcomeHandler,
        log_level: LogLevel,
        pool_size: Option<usize>,
    ) -> Self {
        let pool_size = pool_size.unwrap_or_else(num_cpus::get).max(1);
        debug!(pool_size, "starting local executor");
        Self {
            providers,
            handler,
            log_level,
            semaphore: Arc::new(Semaphore::new(pool_size)),
            tasks: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn submit(
        &self,
        definition: ExecutionDefinition,
        handle: Option<ExecutionHandle>,
    ) -> Result<(), ExecutorError> {
        let diagnostic = self
            .providers
            .resolve(&definition.provider_slug, &definition.diagnostic_slug)
            .map_err(|err| ExecutorError::Submit(err.to_string()))?;

        let semaphore = Arc::clone(&self.semaphore);
        let handler = self.handler.clone();
        let log_level = self.log_level;

        let task = tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("executor semaphore closed");

            let worker = tokio::task::spawn_blocking(move || {
                let result = execute_locally(diagnostic.as_ref(), &definition, log_level);
                (definition, result)
            });

            let (definition, result) = match worker.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    // execute_locally catches panics itself; reaching this
                    // point means the worker task was torn down
                    error!("worker failed: {err}");
                    return;
                }
            };

            if let Some(handle) = handle {
                handler.handle(handle, &definition, &result).await;
            }
        });

        self.tasks.lock().push(task);
        Ok(())
    }

    async fn join(&self, timeout: Duration) -> Result<(), ExecutorError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let next = self.tasks.lock().pop();
            let Some(mut task) = next else {
                return Ok(());
            };

            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    // The dispatch task itself never panics; log and move on
                    error!("dispatch task failed: {err}");
                }
                Err(_) => {
                    // Put the unfinished task back; it keeps running and a
                    // later join can still await it
                    let mut tasks = self.tasks.lock();
                    tasks.push(task);
                    return Err(ExecutorError::JoinTimeout {
                        timeout,
                        outstanding: tasks.len(),
                    });
                }
            }
        }
    }
}

/// Dispatch a result without going through a worker pool
///
/// Used by the synchronous executor and the broker worker, which both run
/// the diagnostic on the calling task.
pub(crate) async fn record_result(
    handler: &OutcomeHandler,
    handle: Option<ExecutionHandle>,
    definition: &ExecutionDefinition,
    result: &ExecutionResult,
) {
    if let Some(handle) = handle {
        handler.handle(handle, definition, result).await;
    }
}
