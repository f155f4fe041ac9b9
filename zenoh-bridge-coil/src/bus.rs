//! Publish/subscribe side of the bridge.
//!
//! The scheduler and the command router only see [`TopicPublisher`] and
//! [`TopicSubscriber`]; [`ZenohPublisher`] and [`ZenohSubscriber`] implement
//! them on a shared Zenoh session.
//!
//! # Topics
//!
//! ```text
//! <slug>                 (empty key prefix)
//! <key_prefix>/<slug>
//! ```

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use zenoh::Session;
use zenoh::pubsub::Subscriber;
use zenoh::sample::{Locality, SampleKind};

use modbridge_framework::BridgeError;

use crate::error::TransactionError;
use crate::signal::Edge;

/// Literal payload published on a trigger in [`TriggerPayload::Marker`] mode.
pub const TRIGGER_MARKER: &[u8] = b"trigger";

/// Payload meaning "set" on the command path, and "now true" in state mode.
pub const ON: &[u8] = b"ON";

/// Payload meaning "now false" in state mode.
pub const OFF: &[u8] = b"OFF";

/// What a trigger publishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerPayload {
    /// The literal `trigger`.
    #[default]
    Marker,
    /// `ON` or `OFF`, the value the signal just transitioned to.
    State,
}

impl TriggerPayload {
    /// Payload for a trigger on the given edge.
    pub fn encode(self, edge: Edge) -> &'static [u8] {
        match self {
            TriggerPayload::Marker => TRIGGER_MARKER,
            TriggerPayload::State if edge.state() => ON,
            TriggerPayload::State => OFF,
        }
    }
}

/// Maps slugs to topics and back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicScheme {
    prefix: Arc<str>,
}

impl TopicScheme {
    /// Create a scheme; an empty prefix publishes on the bare slug.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: Arc::from(prefix.trim_end_matches('/')),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Topic a slug is published and subscribed on.
    pub fn topic(&self, slug: &str) -> String {
        if self.prefix.is_empty() {
            slug.to_string()
        } else {
            format!("{}/{}", self.prefix, slug)
        }
    }

    /// Slug addressed by a topic, if the topic lives under this scheme's prefix.
    pub fn slug<'a>(&self, topic: &'a str) -> Option<&'a str> {
        if self.prefix.is_empty() {
            return Some(topic);
        }
        topic
            .strip_prefix(&*self.prefix)
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Fire-and-forget publishing.
pub trait TopicPublisher: Send + Sync + 'static {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransactionError>> + Send;
}

/// Topic subscriptions that forward every message into a channel.
pub trait TopicSubscriber {
    fn subscribe(
        &mut self,
        topic: &str,
        sink: mpsc::UnboundedSender<InboundMessage>,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;
}

/// Publishes on a shared Zenoh session.
#[derive(Clone, Debug)]
pub struct ZenohPublisher {
    session: Arc<Session>,
}

impl ZenohPublisher {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

impl TopicPublisher for ZenohPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransactionError> {
        self.session
            .put(topic, payload)
            .await
            .map_err(|e| TransactionError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }
}

/// Declares callback subscribers on a shared Zenoh session.
///
/// Subscriptions stay active for as long as this value lives. Only samples
/// from other sessions are delivered: triggers are published on the same
/// keys as commands and must not be read back as commands.
pub struct ZenohSubscriber {
    session: Arc<Session>,
    subscribers: Vec<Subscriber<()>>,
}

impl ZenohSubscriber {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            subscribers: Vec::new(),
        }
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl TopicSubscriber for ZenohSubscriber {
    async fn subscribe(
        &mut self,
        topic: &str,
        sink: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<(), BridgeError> {
        let subscriber = self
            .session
            .declare_subscriber(topic)
            .allowed_origin(Locality::Remote)
            .callback(move |sample| {
                if sample.kind() == SampleKind::Delete {
                    return;
                }
                let message = InboundMessage {
                    topic: sample.key_expr().as_str().to_string(),
                    payload: sample.payload().to_bytes().into_owned(),
                };
                if sink.send(message).is_err() {
                    tracing::debug!(key = %sample.key_expr(), "Command receiver gone, dropping message");
                }
            })
            .await
            .map_err(|e| BridgeError::Subscribe {
                key: topic.to_string(),
                message: e.to_string(),
            })?;

        tracing::debug!(key = %topic, "Subscribed");
        self.subscribers.push(subscriber);
        Ok(())
    }
}
