//! Field-bus side of the bridge.
//!
//! The core reads and writes through [`CoilReader`] and [`CoilWriter`].
//! [`ModbusFieldBus`] implements both over a `tokio-modbus` client (TCP or
//! RTU). The client context cannot serve concurrent requests, so calls are
//! serialized by a mutex here rather than in the scheduler or router.
//!
//! A transport error or timeout leaves the link in an unknown state (a
//! cancelled request may still be answered later), so the context is dropped
//! and the next request opens a fresh connection.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::error::Elapsed;
use tokio_modbus::client::{Context, Reader, Writer};
use tokio_modbus::prelude::*;

use modbridge_framework::BridgeError;

use crate::config::{ConnectionConfig, DeviceConfig, RegisterKind};
use crate::error::TransactionError;

/// Single-coil write value that sets the coil.
pub const COIL_ON: u16 = 0xFF00;

/// Single-coil write value that clears the coil.
pub const COIL_OFF: u16 = 0x0000;

/// Bulk read of contiguous bits.
pub trait CoilReader: Send + Sync + 'static {
    /// Read `count` bits starting at `offset`, bit-packed least significant bit first.
    fn read_bits(
        &self,
        offset: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u8>, TransactionError>> + Send;
}

/// Single-coil writes.
pub trait CoilWriter: Send + Sync + 'static {
    /// Write [`COIL_ON`] or [`COIL_OFF`] to one coil.
    fn write_coil(
        &self,
        address: u16,
        value: u16,
    ) -> impl Future<Output = Result<(), TransactionError>> + Send;
}

/// Pack booleans into bytes, bit `k` at bit `k % 8` of byte `k / 8`.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (k, _) in bits.iter().enumerate().filter(|(_, bit)| **bit) {
        bytes[k / 8] |= 1 << (k % 8);
    }
    bytes
}

/// A Modbus device reached over TCP or a serial line.
pub struct ModbusFieldBus {
    device: DeviceConfig,
    ctx: Mutex<Option<Context>>,
    timeout: Duration,
}

impl ModbusFieldBus {
    /// Connect to the configured device.
    pub async fn connect(device: &DeviceConfig) -> Result<Self, BridgeError> {
        let timeout = Duration::from_millis(device.timeout_ms);
        let ctx = open(device, timeout).await?;

        tracing::info!(
            connection = ?device.connection,
            unit_id = device.unit_id,
            register_type = device.register_type.as_str(),
            "Connected to Modbus device"
        );

        Ok(Self {
            device: device.clone(),
            ctx: Mutex::new(Some(ctx)),
            timeout,
        })
    }

    /// Whether a connection is currently open.
    pub async fn is_connected(&self) -> bool {
        self.ctx.lock().await.is_some()
    }

    /// The open context, reconnecting first if the previous one was dropped.
    async fn context<'a>(
        &self,
        slot: &'a mut Option<Context>,
    ) -> Result<&'a mut Context, TransactionError> {
        let ctx = match slot.take() {
            Some(ctx) => ctx,
            None => {
                let ctx = open(&self.device, self.timeout)
                    .await
                    .map_err(|e| TransactionError::Connect(e.to_string()))?;
                tracing::info!(connection = ?self.device.connection, "Reconnected to Modbus device");
                ctx
            }
        };
        Ok(slot.insert(ctx))
    }

    /// Map a request outcome, dropping the connection when the link is suspect.
    fn settle<T>(
        &self,
        slot: &mut Option<Context>,
        outcome: Result<tokio_modbus::Result<T>, Elapsed>,
        transport: impl FnOnce(String) -> TransactionError,
    ) -> Result<T, TransactionError> {
        let err = match outcome {
            Ok(Ok(Ok(value))) => return Ok(value),
            Ok(Ok(Err(exception))) => {
                return Err(TransactionError::Exception(format!("{:?}", exception)));
            }
            Ok(Err(e)) => transport(e.to_string()),
            Err(_) => TransactionError::Timeout(self.timeout),
        };

        if slot.take().is_some() {
            tracing::warn!(error = %err, "Dropping Modbus connection");
        }
        Err(err)
    }
}

/// Open a client context for the device.
async fn open(device: &DeviceConfig, timeout: Duration) -> Result<Context, BridgeError> {
    let slave = Slave(device.unit_id);

    match &device.connection {
        ConnectionConfig::Tcp { host, port } => {
            let addr = tokio::net::lookup_host((host.as_str(), *port))
                .await
                .map_err(|e| {
                    BridgeError::FieldBusConnection(format!(
                        "Cannot resolve {}:{}: {}",
                        host, port, e
                    ))
                })?
                .next()
                .ok_or_else(|| {
                    BridgeError::FieldBusConnection(format!(
                        "No address found for {}:{}",
                        host, port
                    ))
                })?;

            tokio::time::timeout(timeout, tcp::connect_slave(addr, slave))
                .await
                .map_err(|_| {
                    BridgeError::FieldBusConnection(format!("Connection to {} timed out", addr))
                })?
                .map_err(|e| BridgeError::FieldBusConnection(e.to_string()))
        }
        ConnectionConfig::Rtu {
            port,
            baud_rate,
            data_bits,
            parity,
            stop_bits,
        } => {
            let parity = match parity.to_lowercase().as_str() {
                "even" => tokio_serial::Parity::Even,
                "odd" => tokio_serial::Parity::Odd,
                _ => tokio_serial::Parity::None,
            };

            let stop_bits = match stop_bits {
                2 => tokio_serial::StopBits::Two,
                _ => tokio_serial::StopBits::One,
            };

            let data_bits = match data_bits {
                5 => tokio_serial::DataBits::Five,
                6 => tokio_serial::DataBits::Six,
                7 => tokio_serial::DataBits::Seven,
                _ => tokio_serial::DataBits::Eight,
            };

            let builder = tokio_serial::new(port, *baud_rate)
                .parity(parity)
                .stop_bits(stop_bits)
                .data_bits(data_bits);

            let serial = tokio_serial::SerialStream::open(&builder).map_err(|e| {
                BridgeError::FieldBusConnection(format!("Serial open of {} failed: {}", port, e))
            })?;

            Ok(rtu::attach_slave(serial, slave))
        }
    }
}

impl CoilReader for ModbusFieldBus {
    async fn read_bits(&self, offset: u16, count: u16) -> Result<Vec<u8>, TransactionError> {
        let mut slot = self.ctx.lock().await;

        let outcome = {
            let ctx = self.context(&mut slot).await?;
            let request = async {
                match self.device.register_type {
                    RegisterKind::Coil => ctx.read_coils(offset, count).await,
                    RegisterKind::Discrete => ctx.read_discrete_inputs(offset, count).await,
                }
            };
            tokio::time::timeout(self.timeout, request).await
        };

        let bits = self.settle(&mut slot, outcome, |message| TransactionError::Read {
            offset,
            count,
            message,
        })?;

        Ok(pack_bits(&bits))
    }
}

impl CoilWriter for ModbusFieldBus {
    async fn write_coil(&self, address: u16, value: u16) -> Result<(), TransactionError> {
        let mut slot = self.ctx.lock().await;

        let outcome = {
            let ctx = self.context(&mut slot).await?;
            tokio::time::timeout(self.timeout, ctx.write_single_coil(address, value == COIL_ON))
                .await
        };

        self.settle(&mut slot, outcome, |message| TransactionError::Write {
            address,
            value,
            message,
        })
    }
}
