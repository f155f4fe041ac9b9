//! Zenoh bridge for Modbus coils and discrete inputs.
//!
//! This bridge polls a Modbus device (TCP or RTU/serial) in contiguous
//! address groups, publishes a message whenever an input takes its
//! triggering edge, and turns messages on writable topics into single-coil
//! writes.
//!
//! # Key Expressions
//!
//! ```text
//! <slug>                  (no key prefix)
//! <key_prefix>/<slug>
//! <key_prefix>/@/status   (or modbridge/@/status without a prefix)
//! ```
//!
//! Triggers carry `trigger`, or `ON`/`OFF` in state mode. Commands set the
//! coil when the payload is exactly `ON` and clear it otherwise.

pub mod bus;
pub mod command;
pub mod config;
pub mod error;
pub mod fieldbus;
pub mod group;
pub mod mock;
pub mod scheduler;
pub mod signal;
