//! CLI argument parsing for bridges.

use std::path::PathBuf;

/// Common CLI arguments for all bridges.
///
/// Bridges embed this in their own parser with `#[command(flatten)]` and add
/// protocol-specific flags next to it.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct BridgeArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl BridgeArgs {
    /// The configuration path given on the command line, or `default` when absent.
    pub fn config_path(&self, default: &str) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(default))
    }
}
