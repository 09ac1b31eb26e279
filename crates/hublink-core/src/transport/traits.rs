//! Byte channel abstraction.
//!
//! Defines the `Channel` trait for the duplex serial stream to the hub,
//! allowing different implementations (serialport, mock, etc.).

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Port does not exist or cannot be opened: {path}: {message}")]
    OpenFailed { path: String, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Drain failed: {0}")]
    DrainFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Channel closed")]
    Closed,
}

/// Abstract duplex byte channel to a hub.
///
/// Every method takes `&mut self`: whoever holds the mutable borrow owns the
/// line, so two exchanges can never interleave on one channel.
pub trait Channel: Send {
    /// Human readable name of the endpoint (usually the port path).
    fn name(&self) -> &str;

    /// Queue all of `data` for transmission.
    fn write_all(&mut self, data: &[u8]) -> Result<(), ChannelError>;

    /// Block until every queued byte has been handed to the wire.
    fn drain(&mut self) -> Result<(), ChannelError>;

    /// Read whatever is available, waiting at most `timeout`.
    ///
    /// `Ok(0)` means nothing arrived in time. A closed channel is reported as
    /// `ChannelError::Closed`, never as an empty read.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ChannelError>;

    /// Check if the channel is still open.
    fn is_open(&self) -> bool;

    /// Close the channel. Closing twice is not an error.
    fn close(&mut self) -> Result<(), ChannelError>;
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        (**self).write_all(data)
    }

    fn drain(&mut self) -> Result<(), ChannelError> {
        (**self).drain()
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ChannelError> {
        (**self).read(buf, timeout)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        (**self).close()
    }
}
