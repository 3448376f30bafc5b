// Environment override tests
//
// These mutate the process environment, so they live in their own test
// binary and serialize on a shared lock.

use std::sync::Mutex;

use climeval_config::{Config, LogLevel};

static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn test_ref_env_overrides_win_over_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();

    std::env::set_var("REF_PATHS_SCRATCH", "/tmp/ref-scratch");
    std::env::set_var("REF_DB_DATABASE_URL", "sqlite:///tmp/ref-test.db");
    std::env::set_var("REF_LOG_LEVEL", "WARNING");
    std::env::set_var("REF_EXECUTOR_EXECUTOR", "synchronous");
    std::env::set_var("REF_DIAGNOSTIC_PROVIDERS", "example");

    let config = Config::load().unwrap();
    assert_eq!(
        config.paths.scratch,
        std::path::PathBuf::from("/tmp/ref-scratch")
    );
    assert_eq!(config.db.database_url, "sqlite:///tmp/ref-test.db");
    assert_eq!(config.log_level, LogLevel::Warning);
    assert_eq!(config.executor.executor, "synchronous");
    assert_eq!(config.diagnostic_providers.len(), 1);
    assert_eq!(config.diagnostic_providers[0].provider, "example");

    for key in [
        "REF_PATHS_SCRATCH",
        "REF_DB_DATABASE_URL",
        "REF_LOG_LEVEL",
        "REF_EXECUTOR_EXECUTOR",
        "REF_DIAGNOSTIC_PROVIDERS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn test_missing_explicit_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();

    std::env::set_var("REF_CONFIG", "/nonexistent/climeval.toml");
    let err = Config::load().unwrap_err();
    assert!(format!("{err:#}").contains("/nonexistent/climeval.toml"));
    std::env::remove_var("REF_CONFIG");
}
