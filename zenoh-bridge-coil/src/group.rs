//! Partitioning signals into contiguous read groups and decoding their replies.
//!
//! A group is a run of consecutive addresses read with one bulk request. Index
//! `i` of a group is address `offset + i` and bit `i` of the bit-packed reply.

use crate::error::TransactionError;
use crate::signal::{Edge, Signal, TriggerDecision};

/// Maximum number of coils or discrete inputs one Modbus read may request.
pub const MAX_BITS_PER_READ: usize = 2000;

/// A contiguous run of signals polled with a single bulk read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalGroup {
    offset: u16,
    signals: Vec<Signal>,
}

/// A trigger raised while applying a read to a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub address: u16,
    pub slug: String,
    pub edge: Edge,
}

impl SignalGroup {
    fn starting_with(signal: Signal) -> Self {
        Self {
            offset: signal.address,
            signals: vec![signal],
        }
    }

    /// Address of the first signal.
    pub fn offset(&self) -> u16 {
        self.offset
    }

    /// Number of signals in the group.
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Bit count to request from the device.
    pub fn count(&self) -> u16 {
        self.signals.len() as u16
    }

    /// Signals ordered by address.
    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Slugs of the signals, in address order.
    pub fn slugs(&self) -> Vec<&str> {
        self.signals.iter().map(|s| s.slug.as_str()).collect()
    }

    /// One past the last address, widened so a run ending at `u16::MAX` does not wrap.
    fn end(&self) -> u32 {
        u32::from(self.offset) + self.signals.len() as u32
    }

    /// Feed one decoded sample to every signal, in order.
    ///
    /// `bits` must hold exactly one value per signal.
    pub fn apply(&mut self, bits: &[bool]) -> Vec<Trigger> {
        debug_assert_eq!(bits.len(), self.signals.len());

        self.signals
            .iter_mut()
            .zip(bits)
            .filter_map(|(signal, &raw)| match signal.update(raw) {
                TriggerDecision::Fire(edge) => Some(Trigger {
                    address: signal.address,
                    slug: signal.slug.clone(),
                    edge,
                }),
                TriggerDecision::Quiet => None,
            })
            .collect()
    }
}

/// Partition signals into maximal runs of consecutive addresses.
///
/// Addresses must be unique; duplicates are rejected by configuration
/// validation before signals get here. A run never exceeds `u16::MAX` signals
/// so its length always fits a read request.
pub fn build_groups(signals: Vec<Signal>) -> Vec<SignalGroup> {
    build_groups_with_limit(signals, usize::from(u16::MAX))
}

/// Like [`build_groups`], but also closes a group once it holds `max_len` signals.
pub fn build_groups_with_limit(mut signals: Vec<Signal>, max_len: usize) -> Vec<SignalGroup> {
    let max_len = max_len.clamp(1, usize::from(u16::MAX));
    signals.sort_by_key(|s| s.address);

    let mut groups: Vec<SignalGroup> = Vec::new();
    for signal in signals {
        match groups.last_mut() {
            Some(open) if open.len() < max_len && open.end() == u32::from(signal.address) => {
                open.signals.push(signal);
            }
            _ => groups.push(SignalGroup::starting_with(signal)),
        }
    }

    groups
}

/// Unpack `count` bits from a bit-packed read reply.
///
/// Bit `k` is bit `k % 8` of byte `k / 8`, least significant bit first.
pub fn decode_bits(bytes: &[u8], count: usize) -> Result<Vec<bool>, TransactionError> {
    let expected = count.div_ceil(8);
    if bytes.len() < expected {
        return Err(TransactionError::ShortReply {
            expected,
            actual: bytes.len(),
        });
    }

    Ok((0..count)
        .map(|k| bytes[k / 8] & (1 << (k % 8)) != 0)
        .collect())
}
