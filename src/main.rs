use clap::Parser;
use colored::Colorize;
use ess_registry::cli::{Cli, OutputFormat};
use ess_registry::core::error::{ErrorKind, RegistryError};
use ess_registry::core::store::Store;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "ess_registry=info";

fn init_tracing(config_filter: Option<&str>) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config_filter.unwrap_or(DEFAULT_LOG_FILTER))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing init failed: {}", e))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ess_registry::resolve_config(&cli)?;
    init_tracing(config.log_filter.as_deref())?;
    let store = Store::open(&config)?;
    ess_registry::dispatch(&store, cli)?;
    Ok(())
}

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::NotFound => 3,
        ErrorKind::Conflict => 4,
        ErrorKind::InvalidInput => 2,
        ErrorKind::Internal => 1,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = cli.format;

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<RegistryError>() {
            Some(registry_err) => {
                match format {
                    OutputFormat::Json => eprintln!("{}", registry_err.to_json()),
                    OutputFormat::Text => {
                        eprintln!("{} {}", "error:".bright_red().bold(), registry_err)
                    }
                }
                ExitCode::from(exit_code(registry_err.kind()))
            }
            None => {
                eprintln!("{} {:#}", "error:".bright_red().bold(), err);
                ExitCode::FAILURE
            }
        },
    }
}
