//! Error types for steady-state bridge operation.

use std::time::Duration;

use thiserror::Error;

/// A single field-bus or bus transaction that failed during steady-state operation.
///
/// These are recovered locally: the caller logs them and moves on to the next
/// tick or the next inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// The device could not be reached to send the request.
    #[error("Device unreachable: {0}")]
    Connect(String),

    /// A bulk bit read failed.
    #[error("Read of {count} bit(s) at {offset} failed: {message}")]
    Read {
        offset: u16,
        count: u16,
        message: String,
    },

    /// The device answered with fewer bytes than the requested bit count needs.
    #[error("Reply too short: expected {expected} byte(s), got {actual}")]
    ShortReply { expected: usize, actual: usize },

    /// A single-coil write failed.
    #[error("Write of {value:#06x} to {address} failed: {message}")]
    Write {
        address: u16,
        value: u16,
        message: String,
    },

    /// The device answered with a Modbus exception.
    #[error("Modbus exception: {0}")]
    Exception(String),

    /// The request did not complete within the transport timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Publishing to the bus failed.
    #[error("Publish to '{topic}' failed: {message}")]
    Publish { topic: String, message: String },
}

/// Errors that stop the poll scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A group worker panicked or was cancelled; its signal state is gone.
    #[error("{lost} group worker(s) terminated abnormally")]
    WorkerLost { lost: usize },
}
