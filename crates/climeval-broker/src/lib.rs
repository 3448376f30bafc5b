// climeval-broker - Asynchronous execution over a message broker
//
// Workers live in separate processes reachable via NATS. The executor
// publishes task messages onto a per-provider subject; a queue group makes
// sure one worker picks each task up. Workers publish outcomes to a central
// results subject, where a background listener records them.
//
// Tasks that are still queued when the submitting process goes away remain
// runnable on the workers; their outcomes are simply not recorded.

mod executor;
mod messages;
mod worker;

pub use executor::BrokerExecutor;
pub use messages::{ResultMessage, TaskMessage};
pub use worker::run_worker;

/// Subject a provider's workers listen on
pub fn task_subject(prefix: &str, provider_slug: &str) -> String {
    format!("{}.tasks.{}", prefix, provider_slug)
}

/// Subject outcomes are published to
pub fn results_subject(prefix: &str) -> String {
    format!("{}.results", prefix)
}

/// Queue group name, one per provider so tasks are load balanced across its
/// workers
pub fn worker_queue_group(provider_slug: &str) -> String {
    format!("{}-workers", provider_slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_naming() {
        assert_eq!(task_subject("climeval", "example"), "climeval.tasks.example");
        assert_eq!(results_subject("climeval"), "climeval.results");
        assert_eq!(worker_queue_group("example"), "example-workers");
    }
}
