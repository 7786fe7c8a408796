//! Command-line interface components
//!
//! Argument parsing and the command handlers that wire configuration into
//! the core components.

pub mod args;
pub mod commands;

pub use args::{
    Cli, Commands, ConfigAction, ConfigArgs, FetchArgs, GlobalArgs, ServeArgs, SourceArgs,
};
pub use commands::{handle_config, handle_fetch, handle_serve};
