//! Bridge status reporting.

use serde::{Deserialize, Serialize};
use zenoh::Session;

use crate::error::{BridgeError, Result};

/// Bridge status information, published as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name (e.g., "modbridge").
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("running", "offline", "error").
    pub status: String,
    /// Additional metadata (bridge-specific).
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    /// Create a new status with "running" state.
    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_state(bridge, version, "running")
    }

    /// Create a status with "offline" state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_state(bridge, version, "offline")
    }

    /// Create a status with "error" state.
    pub fn error(
        bridge: impl Into<String>,
        version: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::with_state(bridge, version, "error")
            .with_metadata(serde_json::json!({ "error": error.into() }))
    }

    fn with_state(
        bridge: impl Into<String>,
        version: impl Into<String>,
        status: &str,
    ) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: status.to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Key expression the status of a bridge is published on.
    ///
    /// `<key_prefix>/@/status`, or `<bridge>/@/status` when the prefix is empty.
    pub fn key(key_prefix: &str, bridge: &str) -> String {
        if key_prefix.is_empty() {
            format!("{}/@/status", bridge)
        } else {
            format!("{}/@/status", key_prefix)
        }
    }

    /// Publish this status to Zenoh.
    pub async fn publish(&self, session: &Session, key_prefix: &str) -> Result<()> {
        let key = Self::key(key_prefix, &self.bridge);
        let payload = serde_json::to_vec(self)?;

        session
            .put(&key, payload)
            .await
            .map_err(|e| BridgeError::Publish {
                key,
                message: e.to_string(),
            })
    }
}
