//! Cache Relay CLI application
//!
//! Serves a disk-cached copy of a slow backend resource over HTTP and keeps
//! it refreshed in the background.

use std::process;

use tracing::{info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, EnvFilter};

use cache_relay::cli::{handle_config, handle_fetch, handle_serve, Cli, Commands};
use cache_relay::config::{AppConfig, LoggingConfig};
use cache_relay::constants::build;
use cache_relay::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Missing .env files are fine
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();
    let config = AppConfig::load(cli.global.config.clone()).await?;

    init_logging(cli.log_level(), &config.logging);

    info!(
        "Cache Relay v{} starting (commit {}, tag {})",
        env!("CARGO_PKG_VERSION"),
        build::COMMIT_SHA,
        build::COMMIT_TAG
    );

    match cli.command {
        Commands::Serve(args) => {
            info!("Executing serve command");
            handle_serve(args, config).await
        }
        Commands::Fetch(args) => {
            info!("Executing fetch command");
            handle_fetch(args, config).await
        }
        Commands::Config(args) => handle_config(args, config).await,
    }
}

/// Initialize logging from CLI flags, falling back to the configured level
///
/// `RUST_LOG` directives are honoured for other crates.
fn init_logging(cli_level: Option<Level>, logging: &LoggingConfig) {
    let level = cli_level
        .map(|level| level.to_string().to_lowercase())
        .unwrap_or_else(|| logging.level.clone());

    let mut filter = EnvFilter::from_default_env();
    match format!("cache_relay={}", level).parse::<Directive>() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring invalid log level {:?}: {}", level, e),
    }

    if logging.json {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }
}
