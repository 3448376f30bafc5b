//! Broker-backed executor
//!
//! `submit` publishes a task message and remembers the execution handle;
//! `join` polls the outstanding set at a fixed refresh interval while a
//! background listener records outcomes as workers publish them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use climeval_config::LogLevel;
use climeval_core::diagnostics::ExecutionDefinition;
use climeval_core::error::ExecutorError;
use climeval_core::executor::{ExecutionHandle, Executor};
use climeval_executor::OutcomeHandler;

use crate::messages::{ResultMessage, TaskMessage};
use crate::{results_subject, task_subject};

/// Time to wait between checks for completed executions
const REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Consecutive broker failures tolerated inside `join` before escalating
const MAX_BROKER_FAILURES: u32 = 3;

pub struct BrokerExecutor {
    client: async_nats::Client,
    subject_prefix: String,
    log_level: LogLevel,
    outstanding: Arc<Mutex<HashSet<i64>>>,
    // Held so the results listener lives as long as the executor
    _listener: tokio::task::JoinHandle<()>,
}

impl BrokerExecutor {
    /// Connect to the broker and start the results listener
    pub async fn connect(
        broker_url: &str,
        subject_prefix: impl Into<String>,
        handler: OutcomeHandler,
        log_level: LogLevel,
    ) -> anyhow::Result<BrokerExecutor> {
        let subject_prefix = subject_prefix.into();
        let client = async_nats::connect(broker_url).await?;
        let mut results = client.subscribe(results_subject(&subject_prefix)).await?;

        let outstanding: Arc<Mutex<HashSet<i64>>> = Arc::new(Mutex::new(HashSet::new()));
        let listener_outstanding = Arc::clone(&outstanding);

        let listener = tokio::spawn(async move {
            while let Some(message) = results.next().await {
                let parsed: ResultMessage = match serde_json::from_slice(&message.payload) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        warn!("discarding malformed result message: {err}");
                        continue;
                    }
                };
                let Some(handle) = parsed.handle else {
                    debug!(
                        "fire-and-forget result for '{}'",
                        parsed.definition.execution_slug()
                    );
                    continue;
                };
                handler.handle(handle, &parsed.definition, &parsed.result).await;
                listener_outstanding.lock().remove(&handle.execution_id);
            }
        });

        Ok(BrokerExecutor {
            client,
            subject_prefix,
            log_level,
            outstanding,
            _listener: listener,
        })
    }
}

#[async_trait]
impl Executor for BrokerExecutor {
    fn name(&self) -> &'static str {
        "broker"
    }

    async fn submit(
        &self,
        definition: ExecutionDefinition,
        handle: Option<ExecutionHandle>,
    ) -> Result<(), ExecutorError> {
        let subject = task_subject(&self.subject_prefix, &definition.provider_slug);
        let message = TaskMessage {
            definition,
            handle,
            log_level: self.log_level,
        };
        let payload =
            serde_json::to_vec(&message).map_err(|err| ExecutorError::Submit(err.to_string()))?;

        self.client
            .publish(subject, payload.into())
            .await
            .map_err(|err| ExecutorError::Submit(err.to_string()))?;

        if let Some(handle) = handle {
            self.outstanding.lock().insert(handle.execution_id);
        }
        debug!(
            "submitted '{}' to broker",
            message.definition.execution_slug()
        );
        Ok(())
    }

    async fn join(&self, timeout: Duration) -> Result<(), ExecutorError> {
        // Everything published so far should be on the wire before we start
        // waiting
        if let Err(err) = self.client.flush().await {
            return Err(ExecutorError::BrokerUnavailable(err.to_string()));
        }

        let total = self.outstanding.lock().len() as u64;
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{msg} {bar:30} {pos}/{len}")
                .expect("static progress template is valid"),
        );
        bar.set_message("waiting for executions");

        let deadline = tokio::time::Instant::now() + timeout;
        let mut broker_failures: u32 = 0;

        loop {
            let remaining = self.outstanding.lock().len() as u64;
            bar.set_position(total.saturating_sub(remaining));
            if remaining == 0 {
                bar.finish_and_clear();
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                bar.abandon();
                // Handles stay registered; the work remains runnable on the
                // workers and a later join can still drain it
                return Err(ExecutorError::JoinTimeout {
                    timeout,
                    outstanding: remaining as usize,
                });
            }

            tokio::time::sleep(REFRESH_INTERVAL).await;

            // Transient broker outages are retried a bounded number of times
            match self.client.flush().await {
                Ok(()) => broker_failures = 0,
                Err(err) => {
                    broker_failures += 1;
                    warn!(attempt = broker_failures, "broker ping failed: {err}");
                    if broker_failures >= MAX_BROKER_FAILURES {
                        bar.abandon();
                        error!("broker unreachable after {MAX_BROKER_FAILURES} attempts");
                        return Err(ExecutorError::BrokerUnavailable(err.to_string()));
                    }
                }
            }
        }
    }
}
