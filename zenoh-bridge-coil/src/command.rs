//! Inbound commands: bus message in, single-coil write out.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::bus::{InboundMessage, ON, TopicScheme};
use crate::fieldbus::{COIL_OFF, COIL_ON, CoilWriter};

/// Slug to coil address lookup, fixed at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandMap {
    addresses: HashMap<String, u16>,
}

impl CommandMap {
    /// Address the slug is mapped to, if any.
    pub fn resolve(&self, slug: &str) -> Option<u16> {
        self.addresses.get(slug).copied()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn slugs(&self) -> impl Iterator<Item = &str> {
        self.addresses.keys().map(String::as_str)
    }
}

impl FromIterator<(String, u16)> for CommandMap {
    fn from_iter<I: IntoIterator<Item = (String, u16)>>(iter: I) -> Self {
        Self {
            addresses: iter.into_iter().collect(),
        }
    }
}

/// Coil value requested by a command payload.
///
/// Only the exact bytes `ON` set the coil; anything else clears it.
pub fn coil_value(payload: &[u8]) -> u16 {
    if payload == ON { COIL_ON } else { COIL_OFF }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The topic does not map to a known coil.
    Ignored,
    /// The write succeeded.
    Written { address: u16, value: u16 },
    /// The write failed; the failure has been logged.
    Failed { address: u16, value: u16 },
}

/// Turns inbound bus messages into coil writes.
pub struct CommandRouter<W> {
    map: CommandMap,
    writer: Arc<W>,
    topics: TopicScheme,
}

impl<W: CoilWriter> CommandRouter<W> {
    pub fn new(map: CommandMap, writer: Arc<W>, topics: TopicScheme) -> Self {
        Self {
            map,
            writer,
            topics,
        }
    }

    pub fn map(&self) -> &CommandMap {
        &self.map
    }

    /// Handle one message: at most one write, never retried.
    pub async fn handle(&self, topic: &str, payload: &[u8]) -> CommandOutcome {
        let Some((slug, address)) = self
            .topics
            .slug(topic)
            .and_then(|slug| self.map.resolve(slug).map(|address| (slug, address)))
        else {
            tracing::trace!(topic = %topic, "No coil mapped to topic");
            return CommandOutcome::Ignored;
        };

        let value = coil_value(payload);

        match self.writer.write_coil(address, value).await {
            Ok(()) => {
                tracing::debug!(slug = %slug, address, value, "Coil written");
                CommandOutcome::Written { address, value }
            }
            Err(e) => {
                tracing::warn!(slug = %slug, address, value, error = %e, "Coil write failed");
                CommandOutcome::Failed { address, value }
            }
        }
    }

    /// Drain the channel, handling every message in its own task.
    ///
    /// Returns once every sender is gone and the in-flight writes have finished.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    ) -> Result<(), CommandChannelClosed> {
        let mut in_flight = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                message = inbound.recv() => {
                    let Some(message) = message else { break };
                    let router = Arc::clone(&self);
                    in_flight.spawn(async move {
                        router.handle(&message.topic, &message.payload).await;
                    });
                }
                Some(joined) = in_flight.join_next() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Command handler panicked");
                    }
                }
            }
        }

        while in_flight.join_next().await.is_some() {}

        Err(CommandChannelClosed)
    }
}

/// The inbound command channel closed, so no further commands can arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Command channel closed")]
pub struct CommandChannelClosed;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FakeFieldBus;

    fn router(prefix: &str, bus: Arc<FakeFieldBus>) -> CommandRouter<FakeFieldBus> {
        let map = [("digital-output-1-1".to_string(), 0), ("relay".to_string(), 7)]
            .into_iter()
            .collect();
        CommandRouter::new(map, bus, TopicScheme::new(prefix))
    }

    #[test]
    fn test_coil_value() {
        assert_eq!(coil_value(b"ON"), 0xFF00);
        assert_eq!(coil_value(b"OFF"), 0x0000);
        assert_eq!(coil_value(b"on"), 0x0000);
        assert_eq!(coil_value(b""), 0x0000);
        assert_eq!(coil_value(b"ON "), 0x0000);
    }

    #[tokio::test]
    async fn test_on_writes_ff00() {
        let bus = Arc::new(FakeFieldBus::new());
        let outcome = router("", bus.clone())
            .handle("digital-output-1-1", b"ON")
            .await;

        assert_eq!(
            outcome,
            CommandOutcome::Written {
                address: 0,
                value: 0xFF00
            }
        );
        assert_eq!(bus.writes(), vec![(0, 0xFF00)]);
    }

    #[tokio::test]
    async fn test_other_payload_writes_zero() {
        let bus = Arc::new(FakeFieldBus::new());
        let router = router("", bus.clone());
        router.handle("relay", b"OFF").await;
        router.handle("relay", b"garbage").await;

        assert_eq!(bus.writes(), vec![(7, 0x0000), (7, 0x0000)]);
    }

    #[tokio::test]
    async fn test_unknown_topic_ignored() {
        let bus = Arc::new(FakeFieldBus::new());
        let outcome = router("", bus.clone()).handle("nobody", b"ON").await;

        assert_eq!(outcome, CommandOutcome::Ignored);
        assert!(bus.writes().is_empty());
    }

    #[tokio::test]
    async fn test_prefixed_topics() {
        let bus = Arc::new(FakeFieldBus::new());
        let router = router("plant", bus.clone());

        assert_eq!(router.handle("relay", b"ON").await, CommandOutcome::Ignored);
        assert_eq!(
            router.handle("plant/relay", b"ON").await,
            CommandOutcome::Written {
                address: 7,
                value: 0xFF00
            }
        );
    }

    #[tokio::test]
    async fn test_write_failure_is_not_retried() {
        let bus = Arc::new(FakeFieldBus::new());
        bus.fail_writes_to(7);
        let router = router("", bus.clone());

        assert_eq!(
            router.handle("relay", b"ON").await,
            CommandOutcome::Failed {
                address: 7,
                value: 0xFF00
            }
        );
        assert_eq!(bus.write_attempts(), 1);

        assert!(matches!(
            router.handle("digital-output-1-1", b"ON").await,
            CommandOutcome::Written { .. }
        ));
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let bus = Arc::new(FakeFieldBus::new());
        let router = Arc::new(router("", bus.clone()));
        let (tx, rx) = mpsc::unbounded_channel();

        for (topic, payload) in [("relay", "ON"), ("unknown", "ON"), ("digital-output-1-1", "OFF")] {
            tx.send(InboundMessage {
                topic: topic.to_string(),
                payload: payload.as_bytes().to_vec(),
            })
            .unwrap();
        }
        drop(tx);

        assert_eq!(router.run(rx).await, Err(CommandChannelClosed));

        let mut writes = bus.writes();
        writes.sort_unstable();
        assert_eq!(writes, vec![(0, 0x0000), (7, 0xFF00)]);
    }

    #[test]
    fn test_command_map() {
        let map: CommandMap = [("a".to_string(), 1), ("b".to_string(), 2)]
            .into_iter()
            .collect();
        assert_eq!(map.len(), 2);
        assert_eq!(map.resolve("b"), Some(2));
        assert_eq!(map.resolve("c"), None);
        let mut slugs: Vec<&str> = map.slugs().collect();
        slugs.sort_unstable();
        assert_eq!(slugs, vec!["a", "b"]);
    }
}
