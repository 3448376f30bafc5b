//! Inline executor
//!
//! Runs every submission to completion before `submit` returns. Mainly
//! useful for debugging and tests; `join` always returns immediately.

use std::time::Duration;

use async_trait::async_trait;

use climeval_config::LogLevel;
use climeval_core::diagnostics::ExecutionDefinition;
use climeval_core::error::ExecutorError;
use climeval_core::executor::{ExecutionHandle, Executor};
use climeval_core::providers::ProviderRegistry;

use crate::local::record_result;
use crate::outcome::OutcomeHandler;
use crate::run::execute_locally;

pub struct SynchronousExecutor {
    providers: ProviderRegistry,
    handler: OutcomeHandler,
    log_level: LogLevel,
}

impl SynchronousExecutor {
    pub fn new(providers: ProviderRegistry, handler: OutcomeHandler, log_level: LogLevel) -> Self {
        Self {
            providers,
            handler,
            log_level,
        }
    }
}

#[async_trait]
impl Executor for SynchronousExecutor {
    fn name(&self) -> &'static str {
        "synchronous"
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

        let log_level = self.log_level;
        let worker = tokio::task::spawn_blocking(move || {
            let result = execute_locally(diagnostic.as_ref(), &definition, log_level);
            (definition, result)
        });
        let (definition, result) = worker
            .await
            .map_err(|err| ExecutorError::Submit(err.to_string()))?;

        record_result(&self.handler, handle, &definition, &result).await;
        Ok(())
    }

    async fn join(&self, _timeout: Duration) -> Result<(), ExecutorError> {
        // Submissions run to completion inline; there is never outstanding
        // work to wait for
        Ok(())
    }
}
