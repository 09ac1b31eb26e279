//! Mock channel for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use super::traits::{Channel, ChannelError};

/// Longest a read on an empty mock will sleep before reporting no data.
const IDLE_READ_SLICE: Duration = Duration::from_millis(5);

/// Callback that plays the device: receives each complete outbound line
/// (without its `\r`) and may answer with inbound text.
pub type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

enum Inbound {
    Data(Vec<u8>),
    Close,
}

#[derive(Default)]
struct MockState {
    /// Queued inbound chunks, delivered one per read.
    inbound: VecDeque<Inbound>,
    /// Every write, as issued.
    write_log: Vec<Vec<u8>>,
    /// Outbound bytes not yet terminated by `\r`.
    partial_line: Vec<u8>,
    responder: Option<Responder>,
    echo: bool,
    closed: bool,
    fail_writes: bool,
    /// Writes left before every further write fails.
    writes_left: Option<usize>,
    fail_drain: bool,
    fail_close: bool,
    drains: usize,
}

/// Scriptable in-memory channel.
///
/// Clones share state, so a test can hand one clone to the code under test
/// and keep another to queue replies and inspect what was written.
#[derive(Clone)]
pub struct MockChannel {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Mock that loops every written byte back as inbound data.
    pub fn echo(name: impl Into<String>) -> Self {
        let mock = Self::new(name);
        mock.lock().echo = true;
        mock
    }

    /// Mock whose device side is driven by `responder`.
    pub fn with_responder<F>(name: impl Into<String>, responder: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        let mock = Self::new(name);
        mock.set_responder(responder);
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not take the other clones down with it.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
    }

    /// Queue one inbound chunk, returned whole by the next read.
    pub fn queue_inbound(&self, data: &[u8]) {
        self.lock().inbound.push_back(Inbound::Data(data.to_vec()));
    }

    /// Queue inbound text.
    pub fn queue_str(&self, text: &str) {
        self.queue_inbound(text.as_bytes());
    }

    /// Queue a hang-up: the read that reaches it closes the channel.
    pub fn queue_close(&self) {
        self.lock().inbound.push_back(Inbound::Close);
    }

    /// Everything written so far, concatenated.
    pub fn recording(&self) -> Vec<u8> {
        self.lock().write_log.concat()
    }

    /// Recording as text.
    pub fn recording_str(&self) -> String {
        String::from_utf8_lossy(&self.recording()).into_owned()
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.lock().write_log.clone()
    }

    /// Complete outbound lines, terminators stripped.
    pub fn written_lines(&self) -> Vec<String> {
        let recording = self.recording_str();
        let mut lines: Vec<String> = recording.split('\r').map(str::to_string).collect();
        // Text after the last terminator is not a complete line.
        lines.pop();
        lines
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        let mut state = self.lock();
        state.write_log.clear();
        state.partial_line.clear();
    }

    /// Number of successful drains.
    pub fn drain_count(&self) -> usize {
        self.lock().drains
    }

    /// Simulate the device going away.
    pub fn disconnect(&self) {
        self.lock().closed = true;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Let the next `n` writes through, then fail every write.
    pub fn fail_writes_after(&self, n: usize) {
        self.lock().writes_left = Some(n);
    }

    pub fn set_fail_drain(&self, fail: bool) {
        self.lock().fail_drain = fail;
    }

    /// Make `close` report an error. The channel still ends up closed.
    pub fn set_fail_close(&self, fail: bool) {
        self.lock().fail_close = fail;
    }
}

impl MockState {
    fn feed_responder(&mut self, data: &[u8]) {
        for &byte in data {
            if byte != b'\r' {
                self.partial_line.push(byte);
                continue;
            }
            let line = String::from_utf8_lossy(&self.partial_line).into_owned();
            self.partial_line.clear();
            if let Some(responder) = self.responder.as_mut()
                && let Some(reply) = responder(&line)
            {
                self.inbound.push_back(Inbound::Data(reply.into_bytes()));
            }
        }
    }
}

impl Channel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        let mut state = self.lock();
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if state.fail_writes || state.writes_left == Some(0) {
            return Err(ChannelError::WriteFailed("simulated write failure".into()));
        }
        if let Some(left) = state.writes_left.as_mut() {
            *left -= 1;
        }
        state.write_log.push(data.to_vec());
        if state.echo {
            state.inbound.push_back(Inbound::Data(data.to_vec()));
        }
        state.feed_responder(data);
        Ok(())
    }

    fn drain(&mut self) -> Result<(), ChannelError> {
        let mut state = self.lock();
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if state.fail_drain {
            return Err(ChannelError::DrainFailed("simulated drain failure".into()));
        }
        state.drains += 1;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ChannelError> {
        let next = {
            let mut state = self.lock();
            if state.closed {
                return Err(ChannelError::Closed);
            }
            state.inbound.pop_front()
        };

        match next {
            Some(Inbound::Data(mut chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    let rest = chunk.split_off(n);
                    self.lock().inbound.push_front(Inbound::Data(rest));
                }
                Ok(n)
            }
            Some(Inbound::Close) => {
                self.lock().closed = true;
                Err(ChannelError::Closed)
            }
            None => {
                thread::sleep(timeout.min(IDLE_READ_SLICE));
                Ok(0)
            }
        }
    }

    fn is_open(&self) -> bool {
        !self.lock().closed
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        let mut state = self.lock();
        state.closed = true;
        if state.fail_close {
            return Err(ChannelError::WriteFailed("simulated close failure".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(10);

    #[test]
    fn test_mock_inbound_queue() {
        let mut mock = MockChannel::new("/dev/mock");
        mock.queue_str("first");
        mock.queue_str("second");

        let mut buf = [0u8; 64];
        let n = mock.read(&mut buf, WAIT).unwrap();
        assert_eq!(&buf[..n], b"first");
        let n = mock.read(&mut buf, WAIT).unwrap();
        assert_eq!(&buf[..n], b"second");

        // Queue is empty now
        assert_eq!(mock.read(&mut buf, WAIT).unwrap(), 0);
    }

    #[test]
    fn test_mock_splits_chunks_larger_than_buffer() {
        let mut mock = MockChannel::new("/dev/mock");
        mock.queue_str("abcdef");

        let mut buf = [0u8; 4];
        let n = mock.read(&mut buf, WAIT).unwrap();
        assert_eq!(&buf[..n], b"abcd");
        let n = mock.read(&mut buf, WAIT).unwrap();
        assert_eq!(&buf[..n], b"ef");
    }

    #[test]
    fn test_mock_write_capture() {
        let mut mock = MockChannel::new("/dev/mock");
        mock.write_all(b"Hello").unwrap();
        mock.write_all(b"\r").unwrap();
        mock.write_all(b"World").unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(mock.recording_str(), "Hello\rWorld");
        assert_eq!(mock.written_lines(), vec!["Hello".to_string()]);
    }

    #[test]
    fn test_mock_echo() {
        let mut mock = MockChannel::echo("/dev/echo");
        mock.write_all(b"ping\r").unwrap();

        let mut buf = [0u8; 16];
        let n = mock.read(&mut buf, WAIT).unwrap();
        assert_eq!(&buf[..n], b"ping\r");
    }

    #[test]
    fn test_mock_responder_sees_complete_lines() {
        let mut mock = MockChannel::with_responder("/dev/mock", |line| {
            Some(format!("got {line}\r"))
        });
        mock.write_all(b"par").unwrap();
        mock.write_all(b"tial\r").unwrap();

        let mut buf = [0u8; 32];
        let n = mock.read(&mut buf, WAIT).unwrap();
        assert_eq!(&buf[..n], b"got partial\r");
    }

    #[test]
    fn test_mock_fail_writes_after() {
        let mut mock = MockChannel::new("/dev/mock");
        mock.fail_writes_after(1);

        mock.write_all(b"first").unwrap();
        assert!(matches!(mock.write_all(b"second"), Err(ChannelError::WriteFailed(_))));
        assert!(matches!(mock.write_all(b"third"), Err(ChannelError::WriteFailed(_))));
        assert_eq!(mock.recording_str(), "first");
    }

    #[test]
    fn test_mock_disconnect() {
        let mut mock = MockChannel::new("/dev/mock");
        assert!(mock.is_open());

        mock.disconnect();
        assert!(!mock.is_open());
        assert!(matches!(mock.write_all(b"test"), Err(ChannelError::Closed)));
    }

    #[test]
    fn test_mock_queued_close() {
        let mut mock = MockChannel::new("/dev/mock");
        mock.queue_close();

        let mut buf = [0u8; 8];
        assert!(matches!(mock.read(&mut buf, WAIT), Err(ChannelError::Closed)));
        assert!(!mock.is_open());
    }
}
