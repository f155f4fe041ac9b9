//! modbridge bridge framework
//!
//! Plumbing shared by modbridge bridges that sit between a field device and Zenoh.
//!
//! # Overview
//!
//! This crate provides:
//! - [`BridgeConfig`] trait for JSON5 configuration loading and validation
//! - [`BridgeRunner`] for the bridge lifecycle (logging, Zenoh connection, workers, shutdown)
//! - [`retry`] with a configurable [`RetryPolicy`] for startup connections
//! - [`BridgeArgs`] for common CLI arguments
//! - [`BridgeStatus`] for standardized status reporting
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use modbridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[derive(Parser)]
//! struct Cli {
//!     #[command(flatten)]
//!     bridge: BridgeArgs,
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = Cli::parse().bridge;
//!     let config = MyBridgeConfig::load(args.config_path("mybridge.json5"))?;
//!
//!     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args)).await?;
//!     runner.spawn("worker", my_worker(runner.session().clone()));
//!
//!     // Run until Ctrl+C or until a worker stops
//!     runner.run().await?;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod error;
mod retry;
mod runner;
mod session;
mod status;

pub use args::BridgeArgs;
pub use config::{BridgeConfig, LogFormat, LoggingConfig, RetryPolicy, TlsConfig, ZenohConfig};
pub use error::{BridgeError, Result};
pub use retry::retry;
pub use runner::BridgeRunner;
pub use session::connect;
pub use status::BridgeStatus;

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level when it is set.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let initialized = match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .try_init(),
    };

    initialized.map_err(|e| BridgeError::config(format!("Failed to initialize tracing: {}", e)))
}
