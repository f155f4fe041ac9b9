//! Bridge runner for lifecycle management.

use std::future::Future;
use std::sync::Arc;

use tokio::signal;
use tokio::task::JoinSet;

use crate::BridgeArgs;
use crate::config::{BridgeConfig, LoggingConfig};
use crate::error::{BridgeError, Result};
use crate::retry::retry;
use crate::session::connect;
use crate::status::BridgeStatus;

/// Bridge runner that manages the lifecycle of a protocol bridge.
///
/// Handles:
/// - Logging initialization
/// - Zenoh connection (retried per the configured startup policy)
/// - Worker spawning and supervision
/// - Graceful shutdown on Ctrl+C
/// - Status publishing (optional)
///
/// Workers are expected to run forever. If one returns or panics, the runner
/// shuts the bridge down and [`run`](Self::run) returns an error.
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging and status.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Zenoh session.
    session: Arc<zenoh::Session>,
    /// Whether to publish running/offline status.
    publish_status: bool,
    /// Spawned workers.
    tasks: JoinSet<()>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner.
    pub async fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None).await
    }

    /// Create a new bridge runner with CLI args for log level override.
    ///
    /// This will:
    /// 1. Initialize logging based on config (with optional CLI override)
    /// 2. Connect to Zenoh, retrying per the startup policy
    pub async fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let log_config = match args.and_then(|a| a.log_level.clone()) {
            Some(level) => LoggingConfig {
                level,
                ..config.logging().clone()
            },
            None => config.logging().clone(),
        };
        crate::init_tracing(&log_config)?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        let session = retry(config.startup(), "zenoh", || connect(config.zenoh())).await?;
        let session = Arc::new(session);

        tracing::info!(zid = %session.zid(), "Connected to Zenoh");

        Ok(Self {
            name,
            version,
            config,
            session,
            publish_status: false,
            tasks: JoinSet::new(),
        })
    }

    /// Report the bridge's own version instead of the framework's.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Enable status publishing.
    ///
    /// When enabled, the runner publishes status messages on startup and shutdown.
    pub fn with_status_publishing(mut self) -> Self {
        self.publish_status = true;
        self
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get a reference to the Zenoh session.
    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Spawn a worker task.
    ///
    /// The worker is tracked and aborted on shutdown. An error returned by the
    /// worker is logged and stops the bridge.
    pub fn spawn<F, E>(&mut self, worker: impl Into<String>, future: F)
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let worker = worker.into();
        self.tasks.spawn(async move {
            match future.await {
                Ok(()) => tracing::warn!(worker = %worker, "Worker stopped"),
                Err(e) => tracing::error!(worker = %worker, error = %e, "Worker failed"),
            }
        });
    }

    /// Run the bridge until Ctrl+C is received or a worker stops.
    pub async fn run(self) -> Result<()> {
        self.run_with_metadata(None).await
    }

    /// Run the bridge with custom status metadata.
    ///
    /// This will:
    /// 1. Publish "running" status (if enabled)
    /// 2. Wait for Ctrl+C or for a worker to stop
    /// 3. Abort all workers
    /// 4. Publish "offline" or "error" status (if enabled)
    /// 5. Close the Zenoh session
    pub async fn run_with_metadata(mut self, metadata: Option<serde_json::Value>) -> Result<()> {
        if self.publish_status {
            let mut status = BridgeStatus::running(&self.name, &self.version);
            if let Some(meta) = metadata {
                status = status.with_metadata(meta);
            }
            self.publish(status).await;
        }

        tracing::info!(
            bridge = %self.name,
            workers = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        let outcome = tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
                tracing::info!(bridge = %self.name, "Received shutdown signal");
                Ok(())
            }
            Some(joined) = self.tasks.join_next() => {
                let reason = match joined {
                    Ok(()) => "a worker stopped unexpectedly".to_string(),
                    Err(e) => format!("a worker panicked: {}", e),
                };
                tracing::error!(bridge = %self.name, reason = %reason, "Shutting down");
                Err(BridgeError::worker(reason))
            }
        };

        self.tasks.shutdown().await;

        if self.publish_status {
            let status = match &outcome {
                Ok(()) => BridgeStatus::offline(&self.name, &self.version),
                Err(e) => BridgeStatus::error(&self.name, &self.version, e.to_string()),
            };
            self.publish(status).await;
        }

        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "Error closing Zenoh session");
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        outcome
    }

    async fn publish(&self, status: BridgeStatus) {
        if let Err(e) = status
            .publish(&self.session, self.config.key_prefix())
            .await
        {
            tracing::warn!(status = %status.status, error = %e, "Failed to publish status");
        }
    }
}
