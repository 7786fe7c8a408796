//! Command-line argument parsing for Cache Relay
//!
//! Defines the CLI using clap derive macros. Flags given here override the
//! configuration file and environment for a single run.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::AppConfig;

/// Cache Relay - keep one slow backend resource warm on disk and serve it fast
#[derive(Parser, Debug)]
#[command(
    name = "cache_relay",
    version,
    about = "Serve a disk-cached copy of a slow, rate-limited backend resource",
    long_about = "Keeps a single backend resource cached on disk, refreshes it in the background with
Fibonacci backoff, and serves it to any number of concurrent HTTP clients."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server with background refresh
    Serve(ServeArgs),

    /// Run a single refresh cycle and exit
    Fetch(FetchArgs),

    /// Inspect or create the configuration file
    Config(ConfigArgs),
}

/// Overrides for where the resource comes from and where it is kept
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Path of the cached file
    #[arg(long, value_name = "FILE")]
    pub cache_path: Option<PathBuf>,

    /// Backend URL to fetch from
    #[arg(long, value_name = "URL")]
    pub backend_url: Option<String>,
}

/// Arguments for the serve command
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    #[command(flatten)]
    pub source: SourceArgs,
}

/// Arguments for the fetch command
#[derive(Args, Debug, Clone, Default)]
pub struct FetchArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

/// Arguments for configuration management
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Write a default configuration file
    Init {
        /// Where to write the file (defaults to the user config directory)
        #[arg(long, value_name = "FILE")]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Logging level requested on the command line, if any
    ///
    /// `None` means the configured level applies.
    pub fn log_level(&self) -> Option<tracing::Level> {
        if self.global.quiet {
            Some(tracing::Level::ERROR)
        } else if self.global.very_verbose {
            Some(tracing::Level::DEBUG)
        } else if self.global.verbose {
            Some(tracing::Level::INFO)
        } else {
            None
        }
    }
}

impl SourceArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(path) = &self.cache_path {
            config.cache.path = path.clone();
        }
        if let Some(url) = &self.backend_url {
            config.backend.url = url.clone();
        }
    }
}

impl ServeArgs {
    /// Apply listener and source overrides to `config`
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        self.source.apply(config);
    }
}
