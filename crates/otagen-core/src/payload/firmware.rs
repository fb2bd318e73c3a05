//! Firmware buffer threaded through the image pipeline.
//!
//! Every transform takes the buffer by value and hands back the result, so a
//! stage never holds on to bytes another stage is working on.

use thiserror::Error;

use crate::protocol::constants::{ALIGNMENT, FW_LENGTH_OFFSET, FW_LENGTH_SIZE, PAD_BYTE};

#[derive(Error, Debug)]
pub enum FirmwareError {
    #[error("Firmware too small for length slot: {actual} bytes, minimum {minimum}")]
    TooShort { actual: usize, minimum: usize },
    #[error("Firmware length {0} does not fit in the 32-bit length slot")]
    TooLarge(usize),
}

/// Owned firmware bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareBuffer {
    data: Vec<u8>,
}

impl FirmwareBuffer {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Write the buffer's own length into the length slot at offset 40.
    ///
    /// The signature covers the patched bytes, so this runs before signing.
    pub fn patch_length(mut self) -> Result<Self, FirmwareError> {
        let minimum = FW_LENGTH_OFFSET + FW_LENGTH_SIZE;
        if self.data.len() < minimum {
            return Err(FirmwareError::TooShort {
                actual: self.data.len(),
                minimum,
            });
        }
        let len = u32::try_from(self.data.len())
            .map_err(|_| FirmwareError::TooLarge(self.data.len()))?;
        self.data[FW_LENGTH_OFFSET..minimum].copy_from_slice(&len.to_le_bytes());
        Ok(self)
    }

    /// Pad with `0xFF` up to the next 256-byte boundary.
    pub fn align(mut self) -> Self {
        let padding = padding_len(self.data.len());
        self.data.resize(self.data.len() + padding, PAD_BYTE);
        self
    }

    /// Append raw bytes (signature footer).
    pub fn append(mut self, bytes: &[u8]) -> Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn is_aligned(&self) -> bool {
        self.data.len() % ALIGNMENT == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for FirmwareBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::from_bytes(data)
    }
}

impl AsRef<[u8]> for FirmwareBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Fill bytes needed to reach the next boundary; 0 when already aligned.
pub fn padding_len(len: usize) -> usize {
    (ALIGNMENT - len % ALIGNMENT) % ALIGNMENT
}
