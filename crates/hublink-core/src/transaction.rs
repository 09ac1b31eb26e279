//! Transaction engine: one send, one terminal answer.
//!
//! A transaction writes a message and its `\r` terminator, drains the
//! channel, then feeds inbound text to a resolver until the resolver settles
//! the exchange, the deadline passes, or the channel closes.
//!
//! Holding `&mut` on the channel for the whole exchange is what guarantees
//! that at most one transaction is bound to a channel at any time.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use crate::protocol::DeviceError;
use crate::protocol::constants::TERMINATOR;
use crate::transport::{Channel, ChannelError};

/// Size of a single read from the channel.
const READ_CHUNK: usize = 1024;

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Channel error: {0}")]
    Channel(ChannelError),

    #[error("Timeout while processing message '{message}'")]
    Timeout { message: String, timeout_ms: u64 },

    #[error("Channel closed while processing message '{message}'")]
    Closed { message: String },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransactionError {
    fn from_channel(err: ChannelError, message: &str) -> Self {
        match err {
            ChannelError::Closed => TransactionError::Closed {
                message: message.to_string(),
            },
            other => TransactionError::Channel(other),
        }
    }
}

/// Verdict of a resolver on the text seen so far.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    /// Keep reading.
    Pending,
    /// The exchange is complete.
    Resolved(T),
}

impl<T> From<Option<T>> for Resolution<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Resolution::Resolved(v),
            None => Resolution::Pending,
        }
    }
}

/// Buffers raw bytes and releases them as text, holding back a trailing
/// multi-byte sequence that was cut by a chunk boundary.
#[derive(Debug, Default)]
struct Utf8Accumulator {
    carry: Vec<u8>,
}

impl Utf8Accumulator {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let mut text = String::new();
        let mut start = 0;

        while start < self.carry.len() {
            match std::str::from_utf8(&self.carry[start..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    start = self.carry.len();
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.carry[start..valid_end]));
                    match e.error_len() {
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + bad;
                        }
                        // Truncated sequence at the end: keep it for the next chunk.
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.carry.drain(..start);
        text
    }
}

/// Send `message` and wait until `resolver` settles the exchange.
///
/// `resolver` is called with each decoded inbound chunk, in order. It may
/// fail with a [`DeviceError`], which ends the exchange with that error.
/// The deadline is measured from the moment this function is called.
#[instrument(skip(channel, message, resolver), fields(channel = %channel.name(), len = message.len()))]
pub fn send_and_process<C, T, F>(
    channel: &mut C,
    message: &[u8],
    mut resolver: F,
    timeout: Duration,
) -> Result<T, TransactionError>
where
    C: Channel + ?Sized,
    F: FnMut(&str) -> Result<Resolution<T>, DeviceError>,
{
    let deadline = Instant::now() + timeout;
    let message_text = String::from_utf8_lossy(message).into_owned();

    channel
        .write_all(message)
        .map_err(|e| TransactionError::from_channel(e, &message_text))?;
    channel
        .write_all(TERMINATOR)
        .map_err(|e| TransactionError::from_channel(e, &message_text))?;
    // Inbound data is only looked at once our own bytes are on the wire.
    channel
        .drain()
        .map_err(|e| TransactionError::from_channel(e, &message_text))?;
    debug!(message = %message_text, "TX");

    let mut accumulator = Utf8Accumulator::default();
    let mut buf = [0u8; READ_CHUNK];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(message = %message_text, "No answer before deadline");
            return Err(TransactionError::Timeout {
                message: message_text,
                timeout_ms: timeout.as_millis() as u64,
            });
        }

        let n = channel
            .read(&mut buf, remaining)
            .map_err(|e| TransactionError::from_channel(e, &message_text))?;
        if n == 0 {
            continue;
        }

        let text = accumulator.push(&buf[..n]);
        if text.is_empty() {
            continue;
        }
        trace!(chunk = %text, "RX");

        if let Resolution::Resolved(value) = resolver(&text)? {
            debug!(message = %message_text, "Transaction resolved");
            return Ok(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockChannel;

    const SHORT: Duration = Duration::from_millis(30);

    fn resolve_on_ok(data: &str) -> Result<Resolution<&'static str>, DeviceError> {
        if data == "OK" {
            Ok(Resolution::Resolved("Success"))
        } else {
            Ok(Resolution::Pending)
        }
    }

    #[test]
    fn test_sends_message_and_processes_reply() {
        let mut mock = MockChannel::new("/dev/mock");
        mock.queue_str("OK");

        let response = send_and_process(&mut mock, b"Test Message", resolve_on_ok, SHORT).unwrap();

        assert_eq!(response, "Success");
        assert_eq!(mock.recording_str(), "Test Message\r");
        assert_eq!(mock.get_writes().len(), 2);
        assert_eq!(mock.drain_count(), 1);
    }

    #[test]
    fn test_resolver_sees_echo() {
        let mut mock = MockChannel::echo("/dev/echo");
        let mut seen = Vec::new();

        let response = send_and_process(
            &mut mock,
            b"test message",
            |data| {
                seen.push(data.to_string());
                Ok(Resolution::Resolved("This is the answer"))
            },
            SHORT,
        )
        .unwrap();

        assert_eq!(response, "This is the answer");
        assert_eq!(seen, vec!["test message".to_string()]);
    }

    #[test]
    fn test_resolver_error_rejects() {
        let mut mock = MockChannel::new("/dev/mock");
        mock.queue_str("anything");

        let err = send_and_process::<_, (), _>(
            &mut mock,
            b"Test Message",
            |_| Err(DeviceError::new("Error")),
            SHORT,
        )
        .unwrap_err();

        assert!(matches!(err, TransactionError::Device(_)));
        assert_eq!(err.to_string(), "Error");
    }

    #[test]
    fn test_times_out() {
        let mut mock = MockChannel::new("/dev/mute");
        let mut calls = 0;

        let err = send_and_process::<_, (), _>(
            &mut mock,
            b"test message",
            |_| {
                calls += 1;
                Ok(Resolution::Pending)
            },
            SHORT,
        )
        .unwrap_err();

        assert_eq!(calls, 0);
        assert_eq!(mock.recording_str(), "test message\r");
        assert_eq!(err.to_string(), "Timeout while processing message 'test message'");
        assert!(matches!(err, TransactionError::Timeout { timeout_ms: 30, .. }));
    }

    #[test]
    fn test_pending_forever_times_out() {
        let mut mock = MockChannel::new("/dev/mock");
        mock.queue_str("noise\r");
        mock.queue_str("more noise\r");

        let err = send_and_process::<_, (), _>(&mut mock, b"msg", |_| Ok(Resolution::Pending), SHORT)
            .unwrap_err();
        assert!(matches!(err, TransactionError::Timeout { .. }));
    }

    #[test]
    fn test_late_data_is_not_consumed() {
        let mut mock = MockChannel::new("/dev/mock");
        mock.queue_str("OK");
        mock.queue_str("late");

        send_and_process(&mut mock, b"first", resolve_on_ok, SHORT).unwrap();

        let mut buf = [0u8; 8];
        let n = mock.read(&mut buf, SHORT).unwrap();
        assert_eq!(&buf[..n], b"late");
    }

    #[test]
    fn test_write_error_rejects_without_reading() {
        let mut mock = MockChannel::new("/dev/mock");
        mock.set_fail_writes(true);
        mock.queue_str("OK");

        let err = send_and_process(&mut mock, b"msg", resolve_on_ok, SHORT).unwrap_err();
        assert!(matches!(err, TransactionError::Channel(ChannelError::WriteFailed(_))));
    }

    #[test]
    fn test_drain_error_rejects() {
        let mut mock = MockChannel::new("/dev/mock");
        mock.set_fail_drain(true);

        let err = send_and_process(&mut mock, b"msg", resolve_on_ok, SHORT).unwrap_err();
        assert!(matches!(err, TransactionError::Channel(ChannelError::DrainFailed(_))));
    }

    #[test]
    fn test_channel_closed_mid_wait_rejects_immediately() {
        let mut mock = MockChannel::new("/dev/mock");
        mock.queue_str("partial");
        mock.queue_close();

        let started = Instant::now();
        let err = send_and_process(&mut mock, b"msg", resolve_on_ok, Duration::from_secs(10))
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(err.to_string(), "Channel closed while processing message 'msg'");
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let mut mock = MockChannel::new("/dev/mock");
        let bytes = "é!".as_bytes();
        mock.queue_inbound(&bytes[..1]);
        mock.queue_inbound(&bytes[1..]);
        let mut seen = String::new();

        send_and_process(
            &mut mock,
            b"msg",
            |data| {
                seen.push_str(data);
                Ok(Resolution::from(seen.ends_with('!').then_some(())))
            },
            SHORT,
        )
        .unwrap();

        assert_eq!(seen, "é!");
    }

    #[test]
    fn test_utf8_accumulator_replaces_invalid_bytes() {
        let mut acc = Utf8Accumulator::default();
        assert_eq!(acc.push(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
        assert_eq!(acc.push(&[0xE6]), "");
        assert_eq!(acc.push(&[0x97, 0xA5]), "日");
    }

    #[test]
    fn test_utf8_accumulator_keeps_partial_char_after_invalid_byte() {
        let mut acc = Utf8Accumulator::default();
        assert_eq!(acc.push(&[0xFF, 0xE6]), "\u{FFFD}");
        assert_eq!(acc.push(&[0x97, 0xA5]), "日");
    }

    #[test]
    fn test_utf8_accumulator_multiple_invalid_runs() {
        let mut acc = Utf8Accumulator::default();
        assert_eq!(acc.push(&[0xFF, b'x', 0xFE, b'y', 0xE6, 0x97]), "\u{FFFD}x\u{FFFD}y");
        assert_eq!(acc.push(&[0xA5, b'!']), "日!");
    }

    #[test]
    fn test_terminator_write_error_rejects_without_reading() {
        let mut mock = MockChannel::new("/dev/mock");
        mock.fail_writes_after(1);
        mock.queue_str("OK");

        let err = send_and_process(&mut mock, b"msg", resolve_on_ok, SHORT).unwrap_err();

        assert!(matches!(err, TransactionError::Channel(ChannelError::WriteFailed(_))));
        assert_eq!(mock.recording_str(), "msg");
        assert_eq!(mock.drain_count(), 0);
        // The queued reply was never read.
        let mut buf = [0u8; 8];
        let n = mock.read(&mut buf, SHORT).unwrap();
        assert_eq!(&buf[..n], b"OK");
    }
}
