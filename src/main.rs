//! azcollection - Azure Resource Manager modules with an Ansible-compatible interface
//!
//! This is the main entry point for the azcollection CLI.

mod cli;

use anyhow::Result;
use azcollection::config::{Config, LoggingConfig};
use cli::commands::CommandContext;
use cli::{Cli, Commands};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load configuration first: it carries the default log level
    let (config, config_error) = match Config::load(cli.config.as_ref()) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    init_logging(cli.verbosity(), &config.logging);

    if let Some(e) = config_error {
        tracing::warn!("Failed to load config, using defaults: {:#}", e);
    }
    if cli.verbosity() >= 2 {
        tracing::debug!("azcollection v{}", VERSION);
    }

    let ctx = CommandContext::new(&cli, config);

    let exit_code = match &cli.command {
        Commands::Run(args) => args.execute(&ctx).await,
        Commands::Exec(args) => args.execute(&ctx).await,
        Commands::List(args) => args.execute(&ctx),
        Commands::Doc(args) => args.execute(&ctx),
    };

    std::process::exit(exit_code);
}

/// Initialize logging based on verbosity level and configuration.
///
/// Logs go to stderr so stdout only ever carries the module result.
fn init_logging(verbosity: u8, logging: &LoggingConfig) {
    let filter = match verbosity {
        0 => logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(verbosity >= 3),
            )
            .with(env_filter)
            .init();
    }
}
