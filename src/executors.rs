//! Executor resolution
//!
//! Configuration selects an executor by name (`executor.executor`), with
//! executor-specific options under `executor.config`. An unknown name is
//! fatal at startup.

use anyhow::Result;

use climeval_config::Config;
use climeval_core::error::InvalidExecutorError;
use climeval_core::executor::Executor;
use climeval_core::providers::ProviderRegistry;
use climeval_core::Cv;
use climeval_db::Database;
use climeval_executor::{LocalExecutor, OutcomeHandler, SynchronousExecutor};

/// Default NATS endpoint for the broker executor
pub const DEFAULT_BROKER_URL: &str = "nats://localhost:4222";

/// Default subject prefix shared by executor and workers
pub const DEFAULT_SUBJECT_PREFIX: &str = "climeval";

fn option_str<'a>(config: &'a Config, key: &str) -> Option<&'a str> {
    config.executor.config.get(key).and_then(|v| v.as_str())
}

fn option_usize(config: &Config, key: &str) -> Option<usize> {
    config
        .executor
        .config
        .get(key)
        .and_then(|v| v.as_integer())
        .and_then(|v| usize::try_from(v).ok())
}

/// Build the configured executor
pub async fn build_executor(
    config: &Config,
    db: &Database,
    providers: &ProviderRegistry,
) -> Result<Box<dyn Executor>> {
    let handler = OutcomeHandler::new(config, db.registry(), Cv::default_cv());

    match config.executor.executor.as_str() {
        "local" => Ok(Box::new(LocalExecutor::new(
            providers.clone(),
            handler,
            config.log_level,
            option_usize(config, "pool_size"),
        ))),
        "synchronous" => Ok(Box::new(SynchronousExecutor::new(
            providers.clone(),
            handler,
            config.log_level,
        ))),
        "broker" => {
            let broker_url = option_str(config, "broker_url").unwrap_or(DEFAULT_BROKER_URL);
            let prefix = option_str(config, "subject_prefix").unwrap_or(DEFAULT_SUBJECT_PREFIX);
            let executor = climeval_broker::BrokerExecutor::connect(
                broker_url,
                prefix,
                handler,
                config.log_level,
            )
            .await?;
            Ok(Box::new(executor))
        }
        other => Err(InvalidExecutorError {
            executor: other.to_string(),
            reason: "no executor registered under this name. Known: local, synchronous, broker"
                .to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_executor_is_invalid() {
        let mut config = Config::default();
        config.executor.executor = "slurm".to_string();

        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let db = Database::connect(&url).await.unwrap();
        let providers = ProviderRegistry::default();

        let err = build_executor(&config, &db, &providers).await.unwrap_err();
        assert!(err.downcast_ref::<InvalidExecutorError>().is_some());
    }

    #[tokio::test]
    async fn test_local_executor_resolves() {
        let config = Config::default();
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let db = Database::connect(&url).await.unwrap();
        let providers = ProviderRegistry::default();

        let executor = build_executor(&config, &db, &providers).await.unwrap();
        assert_eq!(executor.name(), "local");
    }
}
