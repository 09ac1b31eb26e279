//! Payload handling module.
//!
//! Provides chunking for program uploads.

pub mod program;

pub use program::{BlockIterator, ProgramError, ProgramImage, TransferGrant};
