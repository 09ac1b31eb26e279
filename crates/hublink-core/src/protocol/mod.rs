//! Hub protocol definitions.

pub mod constants;
pub mod envelope;
pub mod lines;

pub use envelope::{DeviceError, LineOutcome, classify_line, decode_device_error, encode_request};
pub use lines::{LineBuffer, Terminator};
