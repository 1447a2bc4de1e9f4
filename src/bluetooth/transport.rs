//! Byte-level transport to a Bluetooth printer.
//!
//! Printers are reached over the Serial Port Profile: the RFCOMM channel is
//! bound to a local port (`/dev/rfcommN`, `COMn`, `/dev/tty.*`) and opened
//! either as a serial port or, where the port cannot be configured as one,
//! as a plain write-only device file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::TransportError;

// ---------------------------------------------------------------------------
// Transport state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Abstract byte-level transport for printer devices.
pub trait PrinterTransport: Send {
    /// Establish the connection.
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Tear down the connection. Safe to call when already closed.
    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Send raw bytes. Returns number of bytes written.
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Receive whatever arrives within `timeout`. An empty vec means nothing
    /// arrived; link failures are errors.
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    fn is_connected(&self) -> bool;

    fn state(&self) -> TransportState;

    /// Human-readable description of the connection target.
    fn description(&self) -> String;
}

// ---------------------------------------------------------------------------
// Serial transport
// ---------------------------------------------------------------------------

/// Bound RFCOMM port opened through the `serialport` crate.
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn serialport::SerialPort>>,
    state: TransportState,
}

impl SerialTransport {
    pub fn new(port_name: &str, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            timeout,
            port: None,
            state: TransportState::Disconnected,
        }
    }
}

impl PrinterTransport for SerialTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.state = TransportState::Connecting;
        info!(port = %self.port_name, baud = self.baud_rate, "Opening printer port");

        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| {
                self.state = TransportState::Error;
                TransportError::Open {
                    target: self.port_name.clone(),
                    reason: e.to_string(),
                }
            })?;

        self.port = Some(port);
        self.state = TransportState::Connected;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            info!(port = %self.port_name, "Printer port closed");
        }
        self.state = TransportState::Disconnected;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        debug!("Serial TX ({} bytes): {:02X?}", data.len(), data);
        let result = port.write_all(data).and_then(|_| port.flush());
        if let Err(e) = result {
            self.state = TransportState::Error;
            return Err(e.into());
        }
        Ok(data.len())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        port.set_timeout(timeout).map_err(|e| TransportError::Open {
            target: self.port_name.clone(),
            reason: e.to_string(),
        })?;

        let mut buf = vec![0u8; 256];
        match port.read(&mut buf) {
            Ok(0) => {
                warn!(port = %self.port_name, "Printer port closed by peer");
                self.state = TransportState::Error;
                Err(TransportError::Closed)
            }
            Ok(n) => {
                buf.truncate(n);
                debug!("Serial RX ({n} bytes): {:02X?}", &buf);
                Ok(buf)
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(Vec::new())
            }
            Err(e) => {
                self.state = TransportState::Error;
                Err(e.into())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.state == TransportState::Connected && self.port.is_some()
    }

    fn state(&self) -> TransportState {
        self.state
    }

    fn description(&self) -> String {
        format!("Serial({}@{})", self.port_name, self.baud_rate)
    }
}

// ---------------------------------------------------------------------------
// Device file transport
// ---------------------------------------------------------------------------

/// Write-only fallback: the bound port is opened as a file. Nothing is ever
/// read back, so status queries and the protocol handshake see silence.
pub struct DeviceFileTransport {
    path: String,
    file: Option<File>,
    state: TransportState,
}

impl DeviceFileTransport {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            file: None,
            state: TransportState::Disconnected,
        }
    }
}

impl PrinterTransport for DeviceFileTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.state = TransportState::Connecting;
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| {
                self.state = TransportState::Error;
                TransportError::Open {
                    target: self.path.clone(),
                    reason: e.to_string(),
                }
            })?;
        self.file = Some(file);
        self.state = TransportState::Connected;
        info!(path = %self.path, "Printer device file opened");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.file = None;
        self.state = TransportState::Disconnected;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let file = self.file.as_mut().ok_or(TransportError::NotConnected)?;
        debug!("File TX ({} bytes)", data.len());
        if let Err(e) = file.write_all(data).and_then(|_| file.flush()) {
            self.state = TransportState::Error;
            return Err(e.into());
        }
        Ok(data.len())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if self.file.is_none() {
            return Err(TransportError::NotConnected);
        }
        std::thread::sleep(timeout);
        Ok(Vec::new())
    }

    fn is_connected(&self) -> bool {
        self.state == TransportState::Connected && self.file.is_some()
    }

    fn state(&self) -> TransportState {
        self.state
    }

    fn description(&self) -> String {
        format!("File({})", self.path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
