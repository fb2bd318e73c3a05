//! DER decoder for ECDSA signatures.
//!
//! openssl emits `SEQUENCE { INTEGER r, INTEGER s }`. DER integers are
//! big-endian and signed, so a value with its high bit set carries a leading
//! 0x00 and is 33 bytes long. The bootloader wants each scalar as exactly 32
//! little-endian bytes.
//!
//! The encoding uses the following ASN.1 DER tags:
//! - 0x02: INTEGER
//! - 0x30: SEQUENCE

use thiserror::Error;

use crate::protocol::RawSignature;
use crate::protocol::constants::{RAW_SIGNATURE_SIZE, SIGNATURE_COMPONENT_SIZE};

/// DER tag for INTEGER
const DER_TAG_INTEGER: u8 = 0x02;

/// DER tag for SEQUENCE
const DER_TAG_SEQUENCE: u8 = 0x30;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DerError {
    #[error("DER data truncated at offset {0}")]
    Truncated(usize),
    #[error("Unexpected DER tag at offset {offset}: expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedTag {
        offset: usize,
        expected: u8,
        actual: u8,
    },
    #[error("Unsupported DER length encoding 0x{0:02X}")]
    UnsupportedLength(u8),
    #[error("Integer of {0} bytes does not fit a 32-byte scalar")]
    IntegerTooLong(usize),
    #[error("Empty DER integer")]
    EmptyInteger,
    #[error("{0} trailing bytes after signature")]
    TrailingBytes(usize),
}

struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8, DerError> {
        let b = *self.data.get(self.pos).ok_or(DerError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DerError> {
        let end = self.pos.checked_add(len).ok_or(DerError::Truncated(self.pos))?;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(DerError::Truncated(self.pos))?;
        self.pos = end;
        Ok(bytes)
    }

    fn expect_tag(&mut self, expected: u8) -> Result<(), DerError> {
        let offset = self.pos;
        let actual = self.read_u8()?;
        if actual != expected {
            return Err(DerError::UnexpectedTag {
                offset,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Short form, or long form with up to two length bytes.
    fn read_length(&mut self) -> Result<usize, DerError> {
        let first = self.read_u8()?;
        match first {
            0x00..=0x7F => Ok(first as usize),
            0x81 => Ok(self.read_u8()? as usize),
            0x82 => {
                let hi = self.read_u8()? as usize;
                let lo = self.read_u8()? as usize;
                Ok((hi << 8) | lo)
            }
            other => Err(DerError::UnsupportedLength(other)),
        }
    }

    /// Read one INTEGER and return it as a 32-byte little-endian scalar.
    fn read_scalar(&mut self) -> Result<[u8; SIGNATURE_COMPONENT_SIZE], DerError> {
        self.expect_tag(DER_TAG_INTEGER)?;
        let len = self.read_length()?;
        let mut value = self.read_bytes(len)?;
        if value.is_empty() {
            return Err(DerError::EmptyInteger);
        }

        // 33 bytes: sign padding in front of a 32-byte value
        while value.len() > SIGNATURE_COMPONENT_SIZE && value[0] == 0 {
            value = &value[1..];
        }
        if value.len() > SIGNATURE_COMPONENT_SIZE {
            return Err(DerError::IntegerTooLong(len));
        }

        let mut scalar = [0u8; SIGNATURE_COMPONENT_SIZE];
        scalar[SIGNATURE_COMPONENT_SIZE - value.len()..].copy_from_slice(value);
        scalar.reverse();
        Ok(scalar)
    }
}

/// Decode a DER ECDSA signature into raw little-endian `r || s`.
pub fn decode_der_signature(der: &[u8]) -> Result<RawSignature, DerError> {
    let mut outer = DerReader::new(der);
    outer.expect_tag(DER_TAG_SEQUENCE)?;
    let len = outer.read_length()?;
    let body = outer.read_bytes(len)?;
    if outer.remaining() != 0 {
        return Err(DerError::TrailingBytes(outer.remaining()));
    }

    let mut reader = DerReader::new(body);
    let r = reader.read_scalar()?;
    let s = reader.read_scalar()?;
    if reader.remaining() != 0 {
        return Err(DerError::TrailingBytes(reader.remaining()));
    }

    let mut raw = [0u8; RAW_SIGNATURE_SIZE];
    raw[..SIGNATURE_COMPONENT_SIZE].copy_from_slice(&r);
    raw[SIGNATURE_COMPONENT_SIZE..].copy_from_slice(&s);
    Ok(RawSignature(raw))
}

/// Encode big-endian scalars as a DER signature. Inverse of
/// [`decode_der_signature`]; used to build fixed signatures for test signers.
pub fn encode_der_signature(r: &[u8], s: &[u8]) -> Vec<u8> {
    fn encode_integer(out: &mut Vec<u8>, value: &[u8]) {
        // zero (or empty) still needs one content byte
        let value = match value.iter().position(|&b| b != 0) {
            Some(first) => &value[first..],
            None => &[0u8][..],
        };
        out.push(DER_TAG_INTEGER);
        if value[0] & 0x80 != 0 {
            out.push(value.len() as u8 + 1);
            out.push(0x00);
        } else {
            out.push(value.len() as u8);
        }
        out.extend_from_slice(value);
    }

    let mut body = Vec::with_capacity(2 * (SIGNATURE_COMPONENT_SIZE + 3));
    encode_integer(&mut body, r);
    encode_integer(&mut body, s);

    let mut der = Vec::with_capacity(body.len() + 3);
    der.push(DER_TAG_SEQUENCE);
    if body.len() > 0x7F {
        der.push(0x81);
    }
    der.push(body.len() as u8);
    der.extend_from_slice(&body);
    der
}
