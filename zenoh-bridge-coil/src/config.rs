//! Configuration for the coil bridge.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use modbridge_framework::{
    BridgeConfig, BridgeError, LoggingConfig, Result, RetryPolicy, ZenohConfig,
};

use crate::bus::TriggerPayload;
use crate::command::CommandMap;
use crate::signal::{Polarity, Signal};

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoilBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Retry policy for the Zenoh and Modbus connections at startup
    #[serde(default)]
    pub startup: RetryPolicy,

    /// Bridge settings and the coil map
    pub modbridge: ModbridgeConfig,
}

/// Bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbridgeConfig {
    /// Prefix prepended to every slug to form its topic (default: none)
    #[serde(default)]
    pub key_prefix: String,

    /// Time between the starts of two poll ticks, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// What a trigger publishes: "marker" (`trigger`) or "state" (`ON`/`OFF`)
    #[serde(default)]
    pub trigger_payload: TriggerPayload,

    /// The device holding the coils
    pub device: DeviceConfig,

    /// Coil / discrete input map
    pub coils: Vec<CoilConfig>,
}

fn default_poll_interval_ms() -> u64 {
    20
}

/// Configuration for the Modbus device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Connection type and address
    pub connection: ConnectionConfig,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connection and request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Which bit table the poller reads
    #[serde(default)]
    pub register_type: RegisterKind,
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

/// Connection configuration (TCP or RTU).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Modbus TCP connection
    Tcp {
        /// Host address (IP or hostname)
        host: String,
        /// TCP port (default: 502)
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// Modbus RTU (serial) connection
    Rtu {
        /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
        port: String,
        /// Baud rate (default: 9600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Data bits (default: 8)
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// Parity: "none", "even", or "odd" (default: "none")
        #[serde(default = "default_parity")]
        parity: String,
        /// Stop bits: 1 or 2 (default: 1)
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
}

fn default_modbus_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

/// Bit tables a poll can read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    /// Discrete output coils (read/write, 1-bit)
    #[default]
    Coil,
    /// Discrete input contacts (read-only, 1-bit)
    Discrete,
}

impl RegisterKind {
    /// Return the string name for this register kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterKind::Coil => "coil",
            RegisterKind::Discrete => "discrete",
        }
    }
}

/// Access mode of a coil map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    /// Polled, never written
    #[serde(rename = "R")]
    ReadOnly,
    /// Polled and writable
    #[serde(rename = "RW")]
    ReadWrite,
    /// Writable only; not polled
    #[serde(rename = "W")]
    WriteOnly,
}

impl AccessMode {
    pub fn is_polled(self) -> bool {
        !matches!(self, AccessMode::WriteOnly)
    }

    pub fn is_writable(self) -> bool {
        !matches!(self, AccessMode::ReadOnly)
    }
}

/// One entry of the coil map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoilConfig {
    /// Coil / discrete input address (0-based)
    pub address: u16,

    /// "R", "RW" or "W"
    pub mode: AccessMode,

    /// Topic name of this coil
    pub slug: String,

    /// Which edge triggers: "no" (rising, default) or "nc" (falling)
    #[serde(default)]
    pub polarity: Polarity,
}

impl CoilConfig {
    fn to_signal(&self) -> Signal {
        Signal::new(
            self.address,
            self.slug.clone(),
            self.polarity,
            self.mode.is_writable(),
        )
    }
}

/// Check that a slug or key prefix can be used inside a Zenoh key expression.
fn validate_key_chunk(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(BridgeError::validation(format!("{} cannot be empty", what)));
    }
    if value.starts_with('/') || value.ends_with('/') || value.contains("//") {
        return Err(BridgeError::validation(format!(
            "{} '{}' has an empty path segment",
            what, value
        )));
    }
    if let Some(c) = value
        .chars()
        .find(|c| matches!(c, '*' | '$' | '?' | '#') || c.is_whitespace())
    {
        return Err(BridgeError::validation(format!(
            "{} '{}' contains '{}', which is not allowed in a key expression",
            what, value, c
        )));
    }
    Ok(())
}

impl ModbridgeConfig {
    /// Signals to poll: every entry that is not write-only.
    pub fn polled_signals(&self) -> Vec<Signal> {
        self.coils
            .iter()
            .filter(|c| c.mode.is_polled())
            .map(CoilConfig::to_signal)
            .collect()
    }

    /// Slug to address lookup over the whole coil map.
    pub fn command_map(&self) -> CommandMap {
        self.coils
            .iter()
            .map(|c| (c.slug.clone(), c.address))
            .collect()
    }

    /// Slugs that accept commands.
    pub fn writable_slugs(&self) -> impl Iterator<Item = &str> {
        self.coils
            .iter()
            .filter(|c| c.mode.is_writable())
            .map(|c| c.slug.as_str())
    }

    /// Validate the bridge settings and the coil map.
    pub fn validate(&self) -> Result<()> {
        if self.coils.is_empty() {
            return Err(BridgeError::validation(
                "At least one coil must be configured",
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(BridgeError::validation(
                "poll_interval_ms must be greater than 0",
            ));
        }

        if !self.key_prefix.is_empty() {
            validate_key_chunk("key_prefix", &self.key_prefix)?;
        }

        if !(1..=247).contains(&self.device.unit_id) {
            return Err(BridgeError::validation(format!(
                "device.unit_id must be 1-247, got {}",
                self.device.unit_id
            )));
        }

        if self.device.timeout_ms == 0 {
            return Err(BridgeError::validation(
                "device.timeout_ms must be greater than 0",
            ));
        }

        if let ConnectionConfig::Rtu {
            parity,
            data_bits,
            stop_bits,
            ..
        } = &self.device.connection
        {
            match parity.to_lowercase().as_str() {
                "none" | "even" | "odd" => {}
                _ => {
                    return Err(BridgeError::validation(format!(
                        "invalid parity '{}' (use none, even, or odd)",
                        parity
                    )));
                }
            }

            if !(5..=8).contains(data_bits) {
                return Err(BridgeError::validation(format!(
                    "invalid data_bits {} (use 5, 6, 7, or 8)",
                    data_bits
                )));
            }

            if !(1..=2).contains(stop_bits) {
                return Err(BridgeError::validation(format!(
                    "invalid stop_bits {} (use 1 or 2)",
                    stop_bits
                )));
            }
        }

        let mut by_address: HashMap<u16, &str> = HashMap::new();
        let mut by_slug: HashMap<&str, u16> = HashMap::new();

        for coil in &self.coils {
            validate_key_chunk("slug", &coil.slug)?;

            if let Some(other) = by_address.insert(coil.address, &coil.slug) {
                return Err(BridgeError::validation(format!(
                    "address {} is assigned to both '{}' and '{}'",
                    coil.address, other, coil.slug
                )));
            }

            if let Some(other) = by_slug.insert(&coil.slug, coil.address) {
                return Err(BridgeError::validation(format!(
                    "slug '{}' is used by both address {} and address {}",
                    coil.slug, other, coil.address
                )));
            }
        }

        Ok(())
    }
}

impl BridgeConfig for CoilBridgeConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn startup(&self) -> &RetryPolicy {
        &self.startup
    }

    fn key_prefix(&self) -> &str {
        &self.modbridge.key_prefix
    }

    fn validate(&self) -> Result<()> {
        self.startup.validate()?;
        self.modbridge.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"{
        zenoh: { mode: "client", connect: ["tcp/mqtt:7447"] },
        modbridge: {
            device: {
                connection: { type: "tcp", host: "modbus" },
            },
            coils: [
                { address: 0, mode: "W", slug: "digital-output-1-1" },
                { address: 10, mode: "R", slug: "digital-input-1-1" },
                { address: 11, mode: "RW", slug: "relay-1", polarity: "nc" },
            ],
        },
    }"#;

    fn example() -> CoilBridgeConfig {
        CoilBridgeConfig::parse(EXAMPLE).unwrap()
    }

    #[test]
    fn test_parse_example() {
        let config = example();
        let bridge = &config.modbridge;

        assert_eq!(config.zenoh.mode, "client");
        assert_eq!(bridge.coils.len(), 3);
        assert_eq!(bridge.poll_interval_ms, 20);
        assert_eq!(bridge.trigger_payload, TriggerPayload::Marker);
        assert_eq!(bridge.key_prefix, "");
        assert_eq!(bridge.device.unit_id, 1);
        assert_eq!(bridge.device.register_type, RegisterKind::Coil);
        assert_eq!(bridge.coils[0].mode, AccessMode::WriteOnly);
        assert_eq!(bridge.coils[1].polarity, Polarity::NormallyOpen);
        assert_eq!(bridge.coils[2].polarity, Polarity::NormallyClosed);

        if let ConnectionConfig::Tcp { host, port } = &bridge.device.connection {
            assert_eq!(host, "modbus");
            assert_eq!(*port, 502);
        } else {
            panic!("Expected TCP connection");
        }
    }

    #[test]
    fn test_parse_rtu_discrete() {
        let config = CoilBridgeConfig::parse(
            r#"{
                modbridge: {
                    trigger_payload: "state",
                    device: {
                        connection: { type: "rtu", port: "/dev/ttyUSB0", baud_rate: 19200, parity: "even" },
                        unit_id: 5,
                        register_type: "discrete",
                    },
                    coils: [{ address: 100, mode: "R", slug: "door" }],
                },
            }"#,
        )
        .unwrap();
        let bridge = &config.modbridge;

        assert_eq!(bridge.trigger_payload, TriggerPayload::State);
        assert_eq!(bridge.device.unit_id, 5);
        assert_eq!(bridge.device.register_type, RegisterKind::Discrete);
        if let ConnectionConfig::Rtu {
            port,
            baud_rate,
            parity,
            ..
        } = &bridge.device.connection
        {
            assert_eq!(port, "/dev/ttyUSB0");
            assert_eq!(*baud_rate, 19200);
            assert_eq!(parity, "even");
        } else {
            panic!("Expected RTU connection");
        }
    }

    #[test]
    fn test_polled_signals_skip_write_only() {
        let signals = example().modbridge.polled_signals();
        let addresses: Vec<u16> = signals.iter().map(|s| s.address).collect();
        assert_eq!(addresses, vec![10, 11]);
        assert!(!signals[0].writable);
        assert!(signals[1].writable);
    }

    #[test]
    fn test_command_map_covers_all_entries() {
        let map = example().modbridge.command_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map.resolve("digital-output-1-1"), Some(0));
        assert_eq!(map.resolve("digital-input-1-1"), Some(10));
        assert_eq!(map.resolve("relay-1"), Some(11));
    }

    #[test]
    fn test_writable_slugs() {
        let config = example();
        let slugs: Vec<&str> = config.modbridge.writable_slugs().collect();
        assert_eq!(slugs, vec!["digital-output-1-1", "relay-1"]);
    }

    fn with_coils(coils: &str) -> Result<CoilBridgeConfig> {
        CoilBridgeConfig::parse(&format!(
            r#"{{
                modbridge: {{
                    device: {{ connection: {{ type: "tcp", host: "modbus" }} }},
                    coils: {},
                }},
            }}"#,
            coils
        ))
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let result = with_coils(
            r#"[{ address: 3, mode: "R", slug: "a" }, { address: 3, mode: "R", slug: "b" }]"#,
        );
        match result {
            Err(BridgeError::ConfigValidation(msg)) => assert!(msg.contains("address 3")),
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_slug_rejected() {
        let result = with_coils(
            r#"[{ address: 1, mode: "R", slug: "a" }, { address: 2, mode: "W", slug: "a" }]"#,
        );
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_empty_coils_rejected() {
        assert!(matches!(
            with_coils("[]"),
            Err(BridgeError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_bad_slug_rejected() {
        for slug in ["", "a/*", "/a", "a b", "x//y"] {
            let coils = format!(r#"[{{ address: 1, mode: "R", slug: "{}" }}]"#, slug);
            assert!(
                matches!(with_coils(&coils), Err(BridgeError::ConfigValidation(_))),
                "slug {:?} should be rejected",
                slug
            );
        }
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let result = with_coils(r#"[{ address: 1, mode: "X", slug: "a" }]"#);
        assert!(matches!(result, Err(BridgeError::ConfigParse(_))));
    }

    #[test]
    fn test_missing_device_rejected() {
        let result = CoilBridgeConfig::parse(r#"{ modbridge: { coils: [] } }"#);
        assert!(matches!(result, Err(BridgeError::ConfigParse(_))));
    }

    fn with_device(device: &str) -> Result<CoilBridgeConfig> {
        CoilBridgeConfig::parse(&format!(
            r#"{{
                modbridge: {{
                    device: {},
                    coils: [{{ address: 1, mode: "R", slug: "a" }}],
                }},
            }}"#,
            device
        ))
    }

    #[test]
    fn test_unit_id_range() {
        for unit_id in [0, 248, 255] {
            let device = format!(
                r#"{{ connection: {{ type: "tcp", host: "modbus" }}, unit_id: {} }}"#,
                unit_id
            );
            assert!(
                matches!(with_device(&device), Err(BridgeError::ConfigValidation(_))),
                "unit_id {} should be rejected",
                unit_id
            );
        }

        let device = r#"{ connection: { type: "tcp", host: "modbus" }, unit_id: 247 }"#;
        assert_eq!(with_device(device).unwrap().modbridge.device.unit_id, 247);
    }

    #[test]
    fn test_serial_framing_validated() {
        for connection in [
            r#"{ type: "rtu", port: "/dev/ttyUSB0", data_bits: 9 }"#,
            r#"{ type: "rtu", port: "/dev/ttyUSB0", data_bits: 4 }"#,
            r#"{ type: "rtu", port: "/dev/ttyUSB0", stop_bits: 0 }"#,
            r#"{ type: "rtu", port: "/dev/ttyUSB0", stop_bits: 3 }"#,
            r#"{ type: "rtu", port: "/dev/ttyUSB0", parity: "mark" }"#,
        ] {
            let device = format!("{{ connection: {} }}", connection);
            assert!(
                matches!(with_device(&device), Err(BridgeError::ConfigValidation(_))),
                "{} should be rejected",
                connection
            );
        }

        let device =
            r#"{ connection: { type: "rtu", port: "/dev/ttyUSB0", data_bits: 7, stop_bits: 2 } }"#;
        assert!(with_device(device).is_ok());
    }

    #[test]
    fn test_access_modes() {
        assert!(AccessMode::ReadOnly.is_polled());
        assert!(!AccessMode::ReadOnly.is_writable());
        assert!(AccessMode::ReadWrite.is_polled());
        assert!(AccessMode::ReadWrite.is_writable());
        assert!(!AccessMode::WriteOnly.is_polled());
        assert!(AccessMode::WriteOnly.is_writable());
    }
}
