//! Worker loop
//!
//! A worker serves exactly one provider: it subscribes to the provider's
//! task subject (inside a queue group, so tasks are load balanced across
//! workers), runs each diagnostic, and publishes the outcome to the results
//! subject. Outcome recording happens on the submitting side.

use anyhow::Context;
use futures::StreamExt;
use tracing::{error, info, warn};

use climeval_core::diagnostics::ExecutionResult;
use climeval_core::providers::DiagnosticProvider;
use climeval_executor::execute_locally;

use crate::messages::{ResultMessage, TaskMessage};
use crate::{results_subject, task_subject, worker_queue_group};

/// Serve one provider's task queue until the subscription closes
pub async fn run_worker(
    broker_url: &str,
    subject_prefix: &str,
    provider: DiagnosticProvider,
) -> anyhow::Result<()> {
    let client = async_nats::connect(broker_url)
        .await
        .with_context(|| format!("failed to connect to broker at {broker_url}"))?;

    let subject = task_subject(subject_prefix, provider.slug());
    let mut tasks = client
        .queue_subscribe(subject.clone(), worker_queue_group(provider.slug()))
        .await
        .with_context(|| format!("failed to subscribe to {subject}"))?;

    info!(
        provider = provider.slug(),
        subject = %subject,
        diagnostics = provider.diagnostics().len(),
        "worker ready"
    );

    let results = results_subject(subject_prefix);
    while let Some(message) = tasks.next().await {
        let task: TaskMessage = match serde_json::from_slice(&message.payload) {
            Ok(task) => task,
            Err(err) => {
                warn!("discarding malformed task message: {err}");
                continue;
            }
        };

        info!("running '{}'", task.definition.execution_slug());

        let result = match provider.diagnostic(&task.definition.diagnostic_slug) {
            Ok(diagnostic) => {
                let definition = task.definition.clone();
                let log_level = task.log_level;
                tokio::task::spawn_blocking(move || {
                    execute_locally(diagnostic.as_ref(), &definition, log_level)
                })
                .await
                .unwrap_or_else(|err| {
                    error!("worker task failed: {err}");
                    ExecutionResult::build_from_failure()
                })
            }
            Err(err) => {
                error!("cannot resolve diagnostic: {err}");
                ExecutionResult::build_from_failure()
            }
        };

        let reply = ResultMessage {
            handle: task.handle,
            definition: task.definition,
            result,
        };
        match serde_json::to_vec(&reply) {
            Ok(payload) => {
                if let Err(err) = client.publish(results.clone(), payload.into()).await {
                    error!("failed to publish result: {err}");
                }
            }
            Err(err) => error!("failed to encode result: {err}"),
        }
    }

    Ok(())
}
