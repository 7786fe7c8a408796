//! Cache Relay Library
//!
//! Keeps a single slow, rate-limited backend resource cached on disk and
//! serves it to many concurrent HTTP clients. Refreshes run in one background
//! loop with Fibonacci backoff; requests never reach the backend directly.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
