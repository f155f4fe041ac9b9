//! Zenoh session setup.

use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{BridgeError, Result};

/// Connect to Zenoh using the provided configuration.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    let zenoh_config = build_config(config)?;

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Connecting to Zenoh"
    );

    zenoh::open(zenoh_config)
        .await
        .map_err(|e| BridgeError::ZenohConnection(e.to_string()))
}

/// Translate a [`ZenohConfig`] into a native Zenoh configuration.
///
/// Starts from `config_file` when one is given, then applies the mode,
/// endpoints and TLS settings.
fn build_config(config: &ZenohConfig) -> Result<zenoh::Config> {
    let mut zenoh_config = match &config.config_file {
        Some(path) => zenoh::Config::from_file(path).map_err(|e| {
            BridgeError::config(format!(
                "Failed to load Zenoh config {}: {}",
                path.display(),
                e
            ))
        })?,
        None => zenoh::Config::default(),
    };

    let mode = match config.mode.as_str() {
        "client" | "peer" | "router" => format!("\"{}\"", config.mode),
        other => {
            return Err(BridgeError::config(format!(
                "Invalid Zenoh mode: '{}'. Expected 'client', 'peer', or 'router'",
                other
            )));
        }
    };

    zenoh_config
        .insert_json5("mode", &mode)
        .map_err(|e| BridgeError::config(format!("Failed to set mode: {}", e)))?;

    if !config.connect.is_empty() {
        let endpoints = serde_json::to_string(&config.connect)?;
        zenoh_config
            .insert_json5("connect/endpoints", &endpoints)
            .map_err(|e| BridgeError::config(format!("Failed to set connect endpoints: {}", e)))?;
    }

    if !config.listen.is_empty() {
        let endpoints = serde_json::to_string(&config.listen)?;
        zenoh_config
            .insert_json5("listen/endpoints", &endpoints)
            .map_err(|e| BridgeError::config(format!("Failed to set listen endpoints: {}", e)))?;
    }

    if let Some(tls) = &config.tls {
        if let Some(ca) = &tls.root_ca_certificate {
            let ca = serde_json::to_string(&ca.display().to_string())?;
            zenoh_config
                .insert_json5("transport/link/tls/root_ca_certificate", &ca)
                .map_err(|e| BridgeError::config(format!("Failed to set TLS CA: {}", e)))?;
        }

        if tls.insecure {
            tracing::warn!("TLS certificate name verification disabled");
            zenoh_config
                .insert_json5("transport/link/tls/verify_name_on_connect", "false")
                .map_err(|e| {
                    BridgeError::config(format!("Failed to disable TLS name check: {}", e))
                })?;
        }
    }

    Ok(zenoh_config)
}
