//! Zenoh bridge for Modbus coils and discrete inputs.
//!
//! Polls the configured device, publishes edge triggers to Zenoh and writes
//! coils on command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use modbridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, retry};
use zenoh_bridge_coil::bus::{TopicScheme, TopicSubscriber, ZenohPublisher, ZenohSubscriber};
use zenoh_bridge_coil::command::CommandRouter;
use zenoh_bridge_coil::config::CoilBridgeConfig;
use zenoh_bridge_coil::fieldbus::ModbusFieldBus;
use zenoh_bridge_coil::group::{MAX_BITS_PER_READ, SignalGroup, build_groups_with_limit};
use zenoh_bridge_coil::scheduler::PollScheduler;

const DEFAULT_CONFIG: &str = "modbridge.json5";

/// Zenoh bridge for Modbus coils and discrete inputs.
#[derive(Parser, Debug)]
#[command(name = "zenoh-bridge-coil")]
#[command(about = "Publishes Modbus coil edges to Zenoh and writes coils on command")]
#[command(version)]
struct Args {
    #[command(flatten)]
    bridge: BridgeArgs,

    /// Override the poll interval in milliseconds.
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let path = args.bridge.config_path(DEFAULT_CONFIG);
    let mut config = CoilBridgeConfig::load(&path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;

    if let Some(ms) = args.poll_interval_ms {
        config.modbridge.poll_interval_ms = ms;
        config.validate().context("Invalid --poll-interval-ms")?;
    }

    let settings = config.modbridge.clone();
    let mut runner = BridgeRunner::new_with_args("modbridge", config, Some(&args.bridge))
        .await?
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_status_publishing();

    tracing::info!(config = ?path, coils = settings.coils.len(), "Loaded configuration");

    let fieldbus = retry(runner.config().startup(), "modbus device", || {
        ModbusFieldBus::connect(&settings.device)
    })
    .await?;
    let fieldbus = Arc::new(fieldbus);

    let topics = TopicScheme::new(&settings.key_prefix);

    // Commands
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let mut subscriber = ZenohSubscriber::new(runner.session().clone());
    for slug in settings.writable_slugs() {
        subscriber
            .subscribe(&topics.topic(slug), inbound_tx.clone())
            .await?;
    }
    drop(inbound_tx);

    let writable = subscriber.len();
    if !subscriber.is_empty() {
        let router = Arc::new(CommandRouter::new(
            settings.command_map(),
            fieldbus.clone(),
            topics.clone(),
        ));
        runner.spawn("commands", async move {
            let _subscriptions = subscriber;
            router.run(inbound_rx).await
        });
    }

    // Polling
    let groups = build_groups_with_limit(settings.polled_signals(), MAX_BITS_PER_READ);
    let group_count = groups.len();
    let signal_count: usize = groups.iter().map(SignalGroup::len).sum();

    if groups.is_empty() {
        tracing::info!("No polled coils configured, poller not started");
    } else {
        let publisher = Arc::new(ZenohPublisher::new(runner.session().clone()));
        let scheduler = PollScheduler::new(groups, fieldbus, publisher)
            .with_payload(settings.trigger_payload)
            .with_topics(topics)
            .with_interval(Duration::from_millis(settings.poll_interval_ms));
        runner.spawn("poller", scheduler.run());
    }

    let metadata = serde_json::json!({
        "register_type": settings.device.register_type.as_str(),
        "groups": group_count,
        "signals": signal_count,
        "writable": writable,
    });

    runner.run_with_metadata(Some(metadata)).await?;
    Ok(())
}
