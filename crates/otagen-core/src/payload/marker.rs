//! System info block lookup.
//!
//! The application links a 16-byte system info record that starts with the
//! `M_425` marker. The record is copied verbatim into the OTA header.

use std::fmt;

use thiserror::Error;

use crate::protocol::constants::{SYSTEMINFO_MARKER, SYSTEMINFO_SIZE};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MarkerError {
    #[error("System info marker \"M_425\" not found")]
    NotFound,
    #[error("System info at offset {offset} truncated: {available} of 16 bytes")]
    Truncated { offset: usize, available: usize },
}

/// 16-byte system info block, marker included.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SystemInfo {
    /// Offset of the marker in the source binary.
    pub offset: usize,
    bytes: [u8; SYSTEMINFO_SIZE],
}

impl SystemInfo {
    /// Locate the marker and copy the block that starts there.
    ///
    /// Must run on the untouched input, before any stage patches it.
    pub fn locate(data: &[u8]) -> Result<Self, MarkerError> {
        let offset = data
            .windows(SYSTEMINFO_MARKER.len())
            .position(|w| w == SYSTEMINFO_MARKER)
            .ok_or(MarkerError::NotFound)?;

        let block = data
            .get(offset..offset + SYSTEMINFO_SIZE)
            .ok_or(MarkerError::Truncated {
                offset,
                available: data.len() - offset,
            })?;

        let mut bytes = [0u8; SYSTEMINFO_SIZE];
        bytes.copy_from_slice(block);
        Ok(Self { offset, bytes })
    }

    pub fn as_bytes(&self) -> &[u8; SYSTEMINFO_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for SystemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SystemInfo@{:#x}(", self.offset)?;
        for b in self.bytes.iter() {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}
