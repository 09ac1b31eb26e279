//! Program upload payloads.
//!
//! A program is sent as raw bytes cut into blocks of the size the hub
//! negotiates in its `start_write_program` reply. Each block travels base64
//! encoded inside a `write_package` request.

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::protocol::constants::PYTHON_PROGRAM_TYPE;
use crate::utils::{encode_base64, encode_base64_bytes};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    #[error("Hub negotiated an invalid block size: {0}")]
    InvalidBlockSize(u64),
}

/// Reply to `start_write_program`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransferGrant {
    pub blocksize: u64,
    pub transferid: String,
}

/// A program ready to be written to a slot.
#[derive(Debug, Clone)]
pub struct ProgramImage {
    name: String,
    data: Vec<u8>,
}

impl ProgramImage {
    pub fn new(name: impl Into<String>, text: &str) -> Self {
        Self {
            name: name.into(),
            data: text.as_bytes().to_vec(),
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Slot metadata for `start_write_program`.
    pub fn meta(&self, project_id: &str, now_ms: i64) -> Value {
        json!({
            "created": now_ms,
            "modified": now_ms,
            "name": encode_base64(&self.name),
            "project_id": project_id,
            "type": PYTHON_PROGRAM_TYPE,
        })
    }

    /// Iterate the payload in `block_size` pieces.
    pub fn blocks(&self, block_size: u64) -> Result<BlockIterator<'_>, ProgramError> {
        let chunk_size = usize::try_from(block_size)
            .ok()
            .filter(|&size| size > 0)
            .ok_or(ProgramError::InvalidBlockSize(block_size))?;
        Ok(BlockIterator::new(&self.data, chunk_size))
    }
}

/// Iterator over upload blocks, already base64 encoded.
pub struct BlockIterator<'a> {
    data: &'a [u8],
    chunk_size: usize,
    offset: usize,
    current_chunk: usize,
    total_chunks: usize,
}

impl<'a> BlockIterator<'a> {
    fn new(data: &'a [u8], chunk_size: usize) -> Self {
        Self {
            data,
            chunk_size,
            offset: 0,
            current_chunk: 0,
            total_chunks: data.len().div_ceil(chunk_size),
        }
    }

    /// Total number of blocks.
    pub fn total(&self) -> usize {
        self.total_chunks
    }
}

impl Iterator for BlockIterator<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        let end = (self.offset + self.chunk_size).min(self.data.len());
        let block = encode_base64_bytes(&self.data[self.offset..end]);
        self.offset = end;
        self.current_chunk += 1;

        Some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total_chunks - self.current_chunk;
        (left, Some(left))
    }
}
