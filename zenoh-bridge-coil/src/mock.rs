//! In-memory field-bus and bus fakes.
//!
//! These implement the capability traits without a device or a Zenoh session,
//! so the scheduler and the router can be driven tick by tick.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use modbridge_framework::BridgeError;

use crate::bus::{InboundMessage, TopicPublisher, TopicSubscriber};
use crate::error::TransactionError;
use crate::fieldbus::{COIL_ON, CoilReader, CoilWriter, pack_bits};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct DeviceState {
    bits: HashMap<u16, bool>,
    failing_reads: HashSet<u16>,
    short_reads: HashSet<u16>,
    panicking_reads: HashSet<u16>,
    failing_writes: HashSet<u16>,
    reads: Vec<(u16, u16)>,
    writes: Vec<(u16, u16)>,
    write_attempts: usize,
}

/// A device whose bit table lives in memory.
///
/// Bits default to `false`. Successful writes update the table, so a written
/// coil reads back on the next poll.
#[derive(Debug, Default)]
pub struct FakeFieldBus {
    state: Mutex<DeviceState>,
    read_delay: Option<Duration>,
}

impl FakeFieldBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every read, to keep several group reads in flight at once.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Set the value a read of `address` returns.
    pub fn set(&self, address: u16, value: bool) {
        lock(&self.state).bits.insert(address, value);
    }

    pub fn get(&self, address: u16) -> bool {
        lock(&self.state)
            .bits
            .get(&address)
            .copied()
            .unwrap_or(false)
    }

    /// Make reads starting at `offset` fail until [`heal`](Self::heal) is called.
    pub fn fail_reads_at(&self, offset: u16) {
        lock(&self.state).failing_reads.insert(offset);
    }

    /// Make reads starting at `offset` return one byte less than required.
    pub fn short_reads_at(&self, offset: u16) {
        lock(&self.state).short_reads.insert(offset);
    }

    /// Make reads starting at `offset` panic.
    pub fn panic_reads_at(&self, offset: u16) {
        lock(&self.state).panicking_reads.insert(offset);
    }

    /// Clear every read fault at `offset`.
    pub fn heal(&self, offset: u16) {
        let mut state = lock(&self.state);
        state.failing_reads.remove(&offset);
        state.short_reads.remove(&offset);
        state.panicking_reads.remove(&offset);
    }

    /// Make writes to `address` fail.
    pub fn fail_writes_to(&self, address: u16) {
        lock(&self.state).failing_writes.insert(address);
    }

    /// Every read requested so far, as `(offset, count)`.
    pub fn reads(&self) -> Vec<(u16, u16)> {
        lock(&self.state).reads.clone()
    }

    /// Every successful write so far, as `(address, value)`.
    pub fn writes(&self) -> Vec<(u16, u16)> {
        lock(&self.state).writes.clone()
    }

    /// Number of writes attempted, failed ones included.
    pub fn write_attempts(&self) -> usize {
        lock(&self.state).write_attempts
    }
}

impl CoilReader for FakeFieldBus {
    async fn read_bits(&self, offset: u16, count: u16) -> Result<Vec<u8>, TransactionError> {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        state.reads.push((offset, count));

        if state.panicking_reads.contains(&offset) {
            drop(state);
            panic!("fake device crashed reading at {}", offset);
        }

        if state.failing_reads.contains(&offset) {
            return Err(TransactionError::Read {
                offset,
                count,
                message: "fake device unreachable".to_string(),
            });
        }

        let bits: Vec<bool> = (0..count)
            .map(|i| {
                offset
                    .checked_add(i)
                    .and_then(|address| state.bits.get(&address).copied())
                    .unwrap_or(false)
            })
            .collect();

        let mut bytes = pack_bits(&bits);
        if state.short_reads.contains(&offset) {
            bytes.pop();
        }
        Ok(bytes)
    }
}

impl CoilWriter for FakeFieldBus {
    async fn write_coil(&self, address: u16, value: u16) -> Result<(), TransactionError> {
        let mut state = lock(&self.state);
        state.write_attempts += 1;

        if state.failing_writes.contains(&address) {
            return Err(TransactionError::Write {
                address,
                value,
                message: "fake device rejected write".to_string(),
            });
        }

        state.bits.insert(address, value == COIL_ON);
        state.writes.push((address, value));
        Ok(())
    }
}

/// A publisher that records every message.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make publishes to `topic` fail.
    pub fn fail_topic(&self, topic: &str) {
        lock(&self.failing).insert(topic.to_string());
    }

    /// Every successful publish so far, as `(topic, payload)`.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.published).clone()
    }

    /// Topics published so far, in order.
    pub fn topics(&self) -> Vec<String> {
        lock(&self.published)
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.published).clear();
    }
}

impl TopicPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransactionError> {
        if lock(&self.failing).contains(topic) {
            return Err(TransactionError::Publish {
                topic: topic.to_string(),
                message: "fake bus rejected publish".to_string(),
            });
        }
        lock(&self.published).push((topic.to_string(), payload));
        Ok(())
    }
}

/// A subscriber that hands messages to its sinks on demand.
#[derive(Debug, Default)]
pub struct LoopbackSubscriber {
    sinks: Vec<(String, mpsc::UnboundedSender<InboundMessage>)>,
}

impl LoopbackSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribed topics, in subscription order.
    pub fn topics(&self) -> Vec<&str> {
        self.sinks.iter().map(|(topic, _)| topic.as_str()).collect()
    }

    /// Deliver a message as if it arrived on the bus.
    ///
    /// Returns `false` if nothing is subscribed to `topic`.
    pub fn inject(&self, topic: &str, payload: &[u8]) -> bool {
        let mut delivered = false;
        for (_, sink) in self.sinks.iter().filter(|(t, _)| t == topic) {
            delivered |= sink
                .send(InboundMessage {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                })
                .is_ok();
        }
        delivered
    }
}

impl TopicSubscriber for LoopbackSubscriber {
    async fn subscribe(
        &mut self,
        topic: &str,
        sink: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<(), BridgeError> {
        self.sinks.push((topic.to_string(), sink));
        Ok(())
    }
}
