//! The chunk of work every executor runs per submission

use std::fs::File;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};

use climeval_config::LogLevel;
use climeval_core::diagnostics::{ExecutionDefinition, ExecutionResult, OUT_LOG_FILENAME};
use climeval_core::Diagnostic;

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Warning => LevelFilter::WARN,
        LogLevel::Error => LevelFilter::ERROR,
    }
}

/// Run one diagnostic execution on the current thread
///
/// Prepares a clean output directory, redirects log output into
/// `out.log` inside it, and invokes the diagnostic entry point. Errors and
/// panics are captured as a failure result rather than propagated, so a
/// broken diagnostic never takes the worker down.
pub fn execute_locally(
    diagnostic: &dyn Diagnostic,
    definition: &ExecutionDefinition,
    log_level: LogLevel,
) -> ExecutionResult {
    info!("executing '{}'", definition.execution_slug());

    let output_directory = definition.output_directory();
    if output_directory.exists() {
        warn!(
            "output directory {} already exists, removing it",
            output_directory.display()
        );
        if let Err(err) = std::fs::remove_dir_all(&output_directory) {
            error!("failed to clear output directory: {err}");
            return ExecutionResult::build_from_failure();
        }
    }
    if let Err(err) = std::fs::create_dir_all(&output_directory) {
        error!(
            "failed to create output directory {}: {err}",
            output_directory.display()
        );
        return ExecutionResult::build_from_failure();
    }

    let log_file = match File::create(output_directory.join(OUT_LOG_FILENAME)) {
        Ok(file) => file,
        Err(err) => {
            error!("failed to create out.log: {err}");
            return ExecutionResult::build_from_failure();
        }
    };

    let subscriber = tracing_subscriber::fmt()
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .with_max_level(level_filter(log_level))
        .finish();

    let outcome = tracing::subscriber::with_default(subscriber, || {
        catch_unwind(AssertUnwindSafe(|| diagnostic.run(definition)))
    });

    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            error!("error running '{}': {err}", definition.execution_slug());
            ExecutionResult::build_from_failure()
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(
                "diagnostic '{}' panicked: {message}",
                definition.execution_slug()
            );
            ExecutionResult::build_from_failure()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use climeval_core::datasets::ExecutionDatasetCollection;
    use climeval_core::error::ExecutionError;
    use climeval_core::requirements::DataRequirement;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    struct PanickingDiagnostic;

    impl Diagnostic for PanickingDiagnostic {
        fn slug(&self) -> &str {
            "panics"
        }
        fn name(&self) -> &str {
            "Panicking diagnostic"
        }
        fn data_requirements(&self) -> &[DataRequirement] {
            &[]
        }
        fn facets(&self) -> &[String] {
            &[]
        }
        fn run(
            &self,
            _definition: &ExecutionDefinition,
        ) -> Result<climeval_core::ExecutionResult, ExecutionError> {
            panic!("deliberate panic")
        }
    }

    fn definition(root: PathBuf) -> ExecutionDefinition {
        ExecutionDefinition {
            provider_slug: "example".to_string(),
            diagnostic_slug: "panics".to_string(),
            key: "all".to_string(),
            datasets: ExecutionDatasetCollection::new(BTreeMap::new()),
            root_directory: root,
            output_fragment: PathBuf::from("example/panics/all/0"),
        }
    }

    #[test]
    fn test_panic_becomes_failure() {
        let dir = tempfile::tempdir().unwrap();
        let definition = definition(dir.path().to_path_buf());
        let result = execute_locally(&PanickingDiagnostic, &definition, LogLevel::Info);
        assert!(!result.successful);
        // The output directory and log file are still created
        assert!(definition.output_directory().join(OUT_LOG_FILENAME).exists());
    }
}
