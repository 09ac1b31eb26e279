//! Request correlation on top of the transaction engine.
//!
//! Every structured request carries a short random id. Inbound text is cut
//! into lines and the first line echoing that id settles the request, unless
//! the hub reports an error first.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::protocol::constants::{
    CORRELATION_ID_LEN, DEFAULT_REQUEST_TIMEOUT, READY_MARKER, READY_PROBE, SYSTEM_EXIT_MARKER,
};
use crate::protocol::{DeviceError, LineBuffer, LineOutcome, classify_line, encode_request};
use crate::transaction::{Resolution, TransactionError, send_and_process};
use crate::transport::Channel;
use crate::utils::random_id;

/// Per-line decision function that replaces id matching.
pub type LineResolver<'a> = Box<dyn FnMut(&str) -> Result<Resolution<Value>, DeviceError> + 'a>;

/// A structured request ready to be sent.
pub struct Request<'a> {
    method: String,
    params: Value,
    timeout: Duration,
    id: Option<String>,
    line_resolver: Option<LineResolver<'a>>,
}

impl<'a> Request<'a> {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            id: None,
            line_resolver: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a fixed correlation id instead of a random one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Settle the request with `resolver` instead of id matching.
    pub fn with_line_resolver<F>(mut self, resolver: F) -> Self
    where
        F: FnMut(&str) -> Result<Resolution<Value>, DeviceError> + 'a,
    {
        self.line_resolver = Some(Box::new(resolver));
        self
    }

    /// Send over `channel` and wait for the result.
    #[instrument(skip_all, fields(method = %self.method))]
    pub fn send<C: Channel + ?Sized>(self, channel: &mut C) -> Result<Value, TransactionError> {
        let id = self.id.unwrap_or_else(|| random_id(CORRELATION_ID_LEN));
        let message = encode_request(&self.method, &self.params, &id)?;
        debug!(id = %id, "Sending request");

        let mut lines = LineBuffer::new();
        match self.line_resolver {
            Some(mut custom) => send_and_process(
                channel,
                message.as_bytes(),
                |chunk| {
                    for line in lines.push(chunk) {
                        if let Resolution::Resolved(value) = custom(&line)? {
                            return Ok(Resolution::Resolved(value));
                        }
                    }
                    Ok(Resolution::Pending)
                },
                self.timeout,
            ),
            None => send_and_process(
                channel,
                message.as_bytes(),
                |chunk| {
                    for line in lines.push(chunk) {
                        match classify_line(&line, &id) {
                            LineOutcome::Reply(value) => return Ok(Resolution::Resolved(value)),
                            LineOutcome::Error(err) => return Err(err),
                            LineOutcome::Unrelated => {}
                        }
                    }
                    Ok(Resolution::Pending)
                },
                self.timeout,
            ),
        }
    }
}

/// Send `method` with `params` and return the hub's `r` value.
pub fn send_request<C: Channel + ?Sized>(
    channel: &mut C,
    method: &str,
    params: Value,
    timeout: Duration,
) -> Result<Value, TransactionError> {
    Request::new(method, params).timeout(timeout).send(channel)
}

/// Ask the hub to enter structured mode and wait for its ready marker.
#[instrument(skip(channel))]
pub fn wait_ready<C: Channel + ?Sized>(
    channel: &mut C,
    timeout: Duration,
) -> Result<(), TransactionError> {
    let mut seen = String::new();
    send_and_process(
        channel,
        READY_PROBE,
        |chunk| {
            seen.push_str(chunk);
            if seen
                .split(['\r', '\n'])
                .any(|line| line.starts_with(READY_MARKER))
            {
                return Ok(Resolution::Resolved(()));
            }
            // Only the unterminated tail can still grow into a marker.
            if let Some(pos) = seen.rfind(['\r', '\n']) {
                seen.drain(..=pos);
            }
            Ok(Resolution::Pending)
        },
        timeout,
    )
}

/// Line resolver that settles once the hub prints a `SystemExit:` line.
///
/// The resolved value is the line itself.
pub fn system_exit_resolver() -> impl FnMut(&str) -> Result<Resolution<Value>, DeviceError> {
    |line: &str| {
        Ok(if line.contains(SYSTEM_EXIT_MARKER) {
            Resolution::Resolved(Value::String(line.to_string()))
        } else {
            Resolution::Pending
        })
    }
}
