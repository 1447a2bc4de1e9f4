//! Paired-device lookup and socket construction.
//!
//! The platform pairing database is external; this crate sees paired
//! printers through the binding table in the bridge config (address, name,
//! bound port). How a socket is opened on that port is decided once at
//! startup by [`SocketStrategy::detect`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::bluetooth::address::normalize_address;
use crate::bluetooth::transport::{DeviceFileTransport, PrinterTransport, SerialTransport};
use crate::config::{BridgeConfig, DeviceBinding, SocketStrategySetting};
use crate::error::TransportError;

/// Device type reported for classic (BR/EDR) devices.
pub const DEVICE_TYPE_CLASSIC: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedDevice {
    #[serde(rename = "type")]
    pub device_type: i32,
    pub address: String,
    pub name: String,
}

/// Platform Bluetooth access used by the session.
pub trait BluetoothAdapter: Send + Sync {
    /// Whether a Bluetooth adapter exists on this host.
    fn is_available(&self) -> bool;

    /// Already-paired devices, in platform enumeration order.
    fn paired_devices(&self) -> Result<Vec<PairedDevice>, TransportError>;

    /// Build an unconnected transport to the device at `address`.
    fn open_socket(&self, address: &str) -> Result<Box<dyn PrinterTransport>, TransportError>;
}

// ---------------------------------------------------------------------------
// Socket strategy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStrategy {
    /// Full duplex serial port with read timeouts.
    Serial,
    /// Write-only device file.
    DeviceFile,
}

impl SocketStrategy {
    /// Resolve the configured strategy. `Auto` probes serial port
    /// enumeration once; hosts where it is unavailable fall back to files.
    pub fn detect(setting: SocketStrategySetting) -> Self {
        match setting {
            SocketStrategySetting::Serial => SocketStrategy::Serial,
            SocketStrategySetting::DeviceFile => SocketStrategy::DeviceFile,
            SocketStrategySetting::Auto => match serialport::available_ports() {
                Ok(ports) => {
                    debug!(count = ports.len(), "Serial port enumeration available");
                    SocketStrategy::Serial
                }
                Err(e) => {
                    info!(error = %e, "Serial ports unavailable, using device files");
                    SocketStrategy::DeviceFile
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// RFCOMM adapter
// ---------------------------------------------------------------------------

/// Adapter over RFCOMM ports bound to paired printers.
pub struct RfcommAdapter {
    bindings: Vec<DeviceBinding>,
    strategy: SocketStrategy,
    baud_rate: u32,
    read_timeout: Duration,
}

impl RfcommAdapter {
    pub fn new(config: &BridgeConfig, strategy: SocketStrategy) -> Self {
        Self {
            bindings: config.bindings.clone(),
            strategy,
            baud_rate: config.baud_rate,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        }
    }

    fn binding_for(&self, address: &str) -> Option<&DeviceBinding> {
        let wanted = normalize_address(address);
        self.bindings
            .iter()
            .find(|b| normalize_address(&b.address) == wanted)
    }
}

impl BluetoothAdapter for RfcommAdapter {
    fn is_available(&self) -> bool {
        host_has_bluetooth()
    }

    fn paired_devices(&self) -> Result<Vec<PairedDevice>, TransportError> {
        Ok(self
            .bindings
            .iter()
            .map(|b| PairedDevice {
                device_type: DEVICE_TYPE_CLASSIC,
                address: normalize_address(&b.address),
                name: b.name.clone(),
            })
            .collect())
    }

    fn open_socket(&self, address: &str) -> Result<Box<dyn PrinterTransport>, TransportError> {
        let binding = self
            .binding_for(address)
            .ok_or_else(|| TransportError::UnknownDevice(address.to_string()))?;
        debug!(address = %address, port = %binding.port, strategy = ?self.strategy, "Creating printer socket");
        let transport: Box<dyn PrinterTransport> = match self.strategy {
            SocketStrategy::Serial => Box::new(SerialTransport::new(
                &binding.port,
                self.baud_rate,
                self.read_timeout,
            )),
            SocketStrategy::DeviceFile => Box::new(DeviceFileTransport::new(&binding.port)),
        };
        Ok(transport)
    }
}

#[cfg(target_os = "linux")]
fn host_has_bluetooth() -> bool {
    std::fs::read_dir("/sys/class/bluetooth")
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn host_has_bluetooth() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
