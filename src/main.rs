use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use climeval::{build_executor, build_registry, solve_required, SolveFilters};
use climeval_config::{Config, LogLevel};
use climeval_db::Database;

/// Incremental evaluation engine for climate-model diagnostics
#[derive(Parser)]
#[command(name = "climeval")]
#[command(version)]
#[command(about = "Incremental evaluation engine for climate-model diagnostics", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level: DEBUG, INFO, WARNING, ERROR (overrides config file)
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Determine and run the executions that are out of date
    Solve {
        /// Log what would run without creating executions
        #[arg(long)]
        dry_run: bool,

        /// Maximum time to wait for executions to finish, in seconds
        #[arg(long, value_name = "SEC", default_value_t = 3600)]
        timeout: u64,

        /// Only solve these providers (repeatable)
        #[arg(long = "provider", value_name = "SLUG")]
        providers: Vec<String>,

        /// Only solve these diagnostics (repeatable)
        #[arg(long = "diagnostic", value_name = "SLUG")]
        diagnostics: Vec<String>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Inspect execution history
    Executions {
        #[command(subcommand)]
        command: ExecutionsCommand,
    },

    /// Run a broker worker serving one provider's task queue
    Worker {
        /// Provider to serve
        #[arg(long, value_name = "SLUG")]
        provider: String,

        /// Broker endpoint (defaults to the configured executor's broker_url)
        #[arg(long, value_name = "URL")]
        broker_url: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the resolved configuration as TOML
    List,
}

#[derive(Subcommand)]
enum ExecutionsCommand {
    /// List execution groups and their state
    ListGroups,
}

/// Failures split by exit code: configuration problems exit with 2,
/// everything else with 1
enum CliError {
    Config(anyhow::Error),
    Run(anyhow::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Config(err)) => {
            eprintln!("configuration error: {err:#}");
            ExitCode::from(2)
        }
        Err(CliError::Run(err)) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn async_main(cli: Cli) -> Result<(), CliError> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .map_err(CliError::Config)?;

    if let Some(level) = &cli.log_level {
        config.log_level = level
            .parse::<LogLevel>()
            .map_err(anyhow::Error::msg)
            .map_err(CliError::Config)?;
    }

    init_tracing(&config);

    match cli.command {
        Command::Solve {
            dry_run,
            timeout,
            providers,
            diagnostics,
        } => {
            prepare_directories(&config).map_err(CliError::Config)?;

            let db = Database::connect(&config.db.database_url)
                .await
                .context("failed to open the database")
                .map_err(CliError::Run)?;

            // Provider and executor resolution failures are fatal startup
            // configuration errors
            let providers_registry = build_registry(&config, &db)
                .await
                .map_err(CliError::Config)?;
            let executor = build_executor(&config, &db, &providers_registry)
                .await
                .map_err(CliError::Config)?;

            let catalog = db
                .registry()
                .load_data_catalog()
                .await
                .context("failed to load the data catalog")
                .map_err(|err| CliError::Run(err.into()))?;

            let filters = SolveFilters {
                providers: if providers.is_empty() {
                    None
                } else {
                    Some(providers)
                },
                diagnostics: if diagnostics.is_empty() {
                    None
                } else {
                    Some(diagnostics)
                },
            };

            let summary = solve_required(
                &config,
                &db,
                &providers_registry,
                &catalog,
                executor.as_ref(),
                &filters,
                dry_run,
                Duration::from_secs(timeout),
            )
            .await
            .map_err(CliError::Run)?;

            println!(
                "{} candidate(s), {} new group(s), {} execution(s) {}",
                summary.candidates,
                summary.groups_created,
                summary.required,
                if dry_run {
                    "required (dry run)"
                } else {
                    "submitted"
                }
            );
            Ok(())
        }

        Command::Config { command } => match command {
            ConfigCommand::List => {
                let dumped = config.dumps().map_err(CliError::Config)?;
                println!("{dumped}");
                Ok(())
            }
        },

        Command::Executions { command } => match command {
            ExecutionsCommand::ListGroups => {
                let db = Database::connect(&config.db.database_url)
                    .await
                    .context("failed to open the database")
                    .map_err(CliError::Run)?;
                let groups = db
                    .registry()
                    .list_groups()
                    .await
                    .map_err(|err| CliError::Run(anyhow::Error::new(err)))?;
                for group in groups {
                    println!(
                        "{}/{}/{}  dirty={}  attempts={}",
                        group.provider_slug,
                        group.diagnostic_slug,
                        group.group_key,
                        group.is_dirty(),
                        group.attempts
                    );
                }
                Ok(())
            }
        },

        Command::Worker {
            provider,
            broker_url,
        } => {
            let provider = climeval::provider_registry::build_provider(&provider)
                .map_err(|err| CliError::Config(err.into()))?;

            let executor_options = &config.executor.config;
            let broker_url = broker_url
                .or_else(|| {
                    executor_options
                        .get("broker_url")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| climeval::executors::DEFAULT_BROKER_URL.to_string());
            let prefix = executor_options
                .get("subject_prefix")
                .and_then(|v| v.as_str())
                .unwrap_or(climeval::executors::DEFAULT_SUBJECT_PREFIX);

            climeval_broker::run_worker(&broker_url, prefix, provider)
                .await
                .map_err(CliError::Run)
        }
    }
}

/// Initialize tracing from the resolved configuration
fn init_tracing(config: &Config) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();
}

fn prepare_directories(config: &Config) -> Result<()> {
    for path in [
        &config.paths.scratch,
        &config.paths.results,
        &config.paths.log,
    ] {
        std::fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory {}", path.display()))?;
    }
    Ok(())
}
