//! serialport-based channel implementation.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{SerialPort, SerialPortType};
use tracing::{debug, info, instrument};

use super::traits::{Channel, ChannelError};
use crate::protocol::constants::DEFAULT_BAUD_RATE;

/// Timeout the port is opened with; every read overrides it.
const OPEN_TIMEOUT: Duration = Duration::from_millis(100);

/// Timeout for writes. Restored before each write since reads shrink it.
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// A port the OS reports, as shown to a user picking a hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub path: String,
    pub kind: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// List every serial port the OS knows about. No filtering is applied.
pub fn list_ports() -> Result<Vec<PortInfo>, ChannelError> {
    let ports = serialport::available_ports()
        .map_err(|e| ChannelError::ReadFailed(format!("Failed to enumerate ports: {e}")))?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let (kind, manufacturer, product) = match p.port_type {
                SerialPortType::UsbPort(usb) => ("USB".to_string(), usb.manufacturer, usb.product),
                SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None, None),
                SerialPortType::PciPort => ("PCI".to_string(), None, None),
                SerialPortType::Unknown => ("Unknown".to_string(), None, None),
            };
            PortInfo {
                path: p.port_name,
                kind,
                manufacturer,
                product,
            }
        })
        .collect())
}

/// Channel over a local serial port.
pub struct SerialChannel {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialChannel {
    /// Open `path` at the hub's default baud rate.
    pub fn open(path: &str) -> Result<Self, ChannelError> {
        Self::open_with_baud(path, DEFAULT_BAUD_RATE)
    }

    #[instrument(level = "info")]
    pub fn open_with_baud(path: &str, baud_rate: u32) -> Result<Self, ChannelError> {
        let port = serialport::new(path, baud_rate)
            .timeout(OPEN_TIMEOUT)
            .open()
            .map_err(|e| ChannelError::OpenFailed {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        info!(path = %path, baud_rate, "Serial port opened");

        Ok(Self {
            path: path.to_string(),
            port: Some(port),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, ChannelError> {
        self.port.as_mut().ok_or(ChannelError::Closed)
    }
}

/// Errors that mean the device went away rather than a transient failure.
fn is_hangup(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::UnexpectedEof
    )
}

impl Channel for SerialChannel {
    fn name(&self) -> &str {
        &self.path
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write_all(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        let port = self.port()?;
        port.set_timeout(WRITE_TIMEOUT)
            .map_err(|e| ChannelError::WriteFailed(e.to_string()))?;
        port.write_all(data).map_err(|e| {
            if is_hangup(e.kind()) {
                ChannelError::Closed
            } else {
                ChannelError::WriteFailed(e.to_string())
            }
        })?;
        debug!(bytes_written = data.len(), "Write complete");
        Ok(())
    }

    fn drain(&mut self) -> Result<(), ChannelError> {
        // flush() waits for the OS transmit queue on serial ports (tcdrain).
        self.port()?
            .flush()
            .map_err(|e| ChannelError::DrainFailed(e.to_string()))
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ChannelError> {
        let port = self.port()?;
        port.set_timeout(timeout)
            .map_err(|e| ChannelError::ReadFailed(e.to_string()))?;

        match port.read(buf) {
            // Serial ports report a hangup as end of file.
            Ok(0) => Err(ChannelError::Closed),
            Ok(n) => {
                debug!(bytes_read = n, "Read complete");
                Ok(n)
            }
            Err(ref e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) if is_hangup(e.kind()) => Err(ChannelError::Closed),
            Err(e) => Err(ChannelError::ReadFailed(e.to_string())),
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        if self.port.take().is_some() {
            info!(path = %self.path, "Serial port closed");
        }
        Ok(())
    }
}
