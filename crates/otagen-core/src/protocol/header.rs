//! Wire structures consumed by the bootloader: image header, option field and
//! signature footer.

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{Cursor, Read};
use thiserror::Error;

use super::constants::{
    ALIGNMENT, FW_LENGTH_OFFSET, FW_LENGTH_SIZE, IMAGE_HEADER_SIZE, LOAD_BASE, OPTION_COMPRESSED,
    OPTION_SIGNED, OPTION_SIZE_MAX, RAW_SIGNATURE_SIZE, SIGNATURE_COMPONENT_SIZE,
    SIGNATURE_FOOTER_SIZE, SIGNATURE_MAGIC, SYSTEMINFO_SIZE,
};

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Invalid magic: expected 0x{expected:08X}, got 0x{actual:08X}")]
    InvalidMagic { expected: u32, actual: u32 },
    #[error("{field} value {value:#x} does not fit in {max:#x}")]
    FieldOverflow {
        field: &'static str,
        value: u64,
        max: u64,
    },
    #[error("Invalid option field 0x{0:08X}")]
    InvalidOption(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Option bits carried in the image header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionFlags(u8);

impl OptionFlags {
    pub const NONE: Self = Self(0);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_compressed(&self) -> bool {
        self.0 & OPTION_COMPRESSED != 0
    }

    pub fn is_signed(&self) -> bool {
        self.0 & OPTION_SIGNED != 0
    }

    pub fn set_compressed(&mut self) {
        self.0 |= OPTION_COMPRESSED;
    }

    pub fn set_signed(&mut self) {
        self.0 |= OPTION_SIGNED;
    }

    /// Compressed and signed images pack a 3-byte size behind the flag byte.
    pub fn is_packed(&self) -> bool {
        self.is_compressed() && self.is_signed()
    }
}

impl fmt::Display for OptionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_compressed(), self.is_signed()) {
            (false, false) => write!(f, "plain"),
            (true, false) => write!(f, "compressed"),
            (false, true) => write!(f, "signed"),
            (true, true) => write!(f, "compressed+signed"),
        }
    }
}

/// ECDSA P-256 signature as the bootloader consumes it: r then s, each
/// little-endian.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RawSignature(pub [u8; RAW_SIGNATURE_SIZE]);

impl RawSignature {
    pub fn r(&self) -> &[u8] {
        &self.0[..SIGNATURE_COMPONENT_SIZE]
    }

    pub fn s(&self) -> &[u8] {
        &self.0[SIGNATURE_COMPONENT_SIZE..]
    }

    pub fn as_bytes(&self) -> &[u8; RAW_SIGNATURE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for RawSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawSignature(")?;
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// Signature footer (72 bytes), appended after an aligned payload.
///
/// Layout: `magic:4 BE | size:4 LE | r:32 LE | s:32 LE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureFooter {
    /// Length of the signed bytes, before alignment padding.
    pub size: u32,
    pub signature: RawSignature,
}

impl SignatureFooter {
    pub const SIZE: usize = SIGNATURE_FOOTER_SIZE;

    pub fn new(size: u32, signature: RawSignature) -> Self {
        Self { size, signature }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&SIGNATURE_MAGIC.to_be_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(self.signature.as_bytes());
        buf
    }

    pub fn parse(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<BigEndian>()?;
        if magic != SIGNATURE_MAGIC {
            return Err(HeaderError::InvalidMagic {
                expected: SIGNATURE_MAGIC,
                actual: magic,
            });
        }
        let size = cursor.read_u32::<LittleEndian>()?;
        let mut raw = [0u8; RAW_SIGNATURE_SIZE];
        cursor.read_exact(&mut raw)?;
        Ok(Self {
            size,
            signature: RawSignature(raw),
        })
    }
}

/// OTA image header (32 bytes), followed by the payload.
///
/// Layout: `systeminfo:16 | crc32:4 | load_start:4 | load_end:4 | option:4`,
/// all little-endian. The option field is either a plain u32 of flags or,
/// when compressed and signed, one flag byte plus a 3-byte size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub systeminfo: [u8; SYSTEMINFO_SIZE],
    pub crc32: u32,
    pub load_start: u32,
    pub load_end: u32,
    pub options: OptionFlags,
    /// Compressed stream length before its signature pass. Zero unless
    /// `options.is_packed()`.
    pub packed_size: u32,
}

impl ImageHeader {
    pub const SIZE: usize = IMAGE_HEADER_SIZE;

    pub fn new(
        systeminfo: [u8; SYSTEMINFO_SIZE],
        crc32: u32,
        payload_len: usize,
        options: OptionFlags,
        packed_size: usize,
    ) -> Result<Self, HeaderError> {
        let max = u64::from(u32::MAX - LOAD_BASE);
        if payload_len as u64 > max {
            return Err(HeaderError::FieldOverflow {
                field: "load_end",
                value: payload_len as u64,
                max,
            });
        }
        if options.is_packed() && packed_size > OPTION_SIZE_MAX as usize {
            return Err(HeaderError::FieldOverflow {
                field: "option size",
                value: packed_size as u64,
                max: u64::from(OPTION_SIZE_MAX),
            });
        }
        Ok(Self {
            systeminfo,
            crc32,
            load_start: LOAD_BASE,
            load_end: LOAD_BASE + payload_len as u32,
            options,
            packed_size: if options.is_packed() {
                packed_size as u32
            } else {
                0
            },
        })
    }

    /// Payload length implied by the load window.
    pub fn payload_len(&self) -> usize {
        self.load_end.saturating_sub(self.load_start) as usize
    }

    /// Offset of the outermost signature footer within `payload`, `None` when
    /// the image is unsigned.
    ///
    /// A packed image is signed over its compressed stream (`packed_size`);
    /// otherwise the signed length is the value patched into the length slot.
    pub fn footer_offset(&self, payload: &[u8]) -> Result<Option<usize>, HeaderError> {
        if !self.options.is_signed() {
            return Ok(None);
        }
        let signed_len = if self.options.is_compressed() {
            self.packed_size as usize
        } else {
            let slot = payload
                .get(FW_LENGTH_OFFSET..FW_LENGTH_OFFSET + FW_LENGTH_SIZE)
                .ok_or(HeaderError::BufferTooSmall {
                    expected: FW_LENGTH_OFFSET + FW_LENGTH_SIZE,
                    actual: payload.len(),
                })?;
            LittleEndian::read_u32(slot) as usize
        };
        Ok(Some(signed_len.next_multiple_of(ALIGNMENT)))
    }

    /// Decode the outermost signature footer of `payload`.
    pub fn signature_footer(&self, payload: &[u8]) -> Result<Option<SignatureFooter>, HeaderError> {
        match self.footer_offset(payload)? {
            Some(offset) => {
                let tail = payload.get(offset..).unwrap_or_default();
                SignatureFooter::parse(tail).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.systeminfo);
        buf.write_u32::<LittleEndian>(self.crc32).unwrap();
        buf.write_u32::<LittleEndian>(self.load_start).unwrap();
        buf.write_u32::<LittleEndian>(self.load_end).unwrap();
        if self.options.is_packed() {
            buf.write_u8(self.options.bits()).unwrap();
            buf.write_u24::<LittleEndian>(self.packed_size).unwrap();
        } else {
            buf.write_u32::<LittleEndian>(u32::from(self.options.bits()))
                .unwrap();
        }
        buf
    }

    pub fn parse(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let mut systeminfo = [0u8; SYSTEMINFO_SIZE];
        cursor.read_exact(&mut systeminfo)?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let load_start = cursor.read_u32::<LittleEndian>()?;
        let load_end = cursor.read_u32::<LittleEndian>()?;
        let option = cursor.read_u32::<LittleEndian>()?;

        let options = OptionFlags::from_bits(option as u8);
        let packed_size = if options.is_packed() {
            option >> 8
        } else if option > 0xFF {
            return Err(HeaderError::InvalidOption(option));
        } else {
            0
        };

        Ok(Self {
            systeminfo,
            crc32,
            load_start,
            load_end,
            options,
            packed_size,
        })
    }
}

impl fmt::Display for ImageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "OTA Image Header:")?;
        write!(f, "  System info: ")?;
        for b in self.systeminfo.iter() {
            write!(f, "{:02X}", b)?;
        }
        writeln!(f, " ({})", String::from_utf8_lossy(&self.systeminfo[..5]))?;
        writeln!(f, "  CRC32:       0x{:08X}", self.crc32)?;
        writeln!(f, "  Load start:  0x{:08X}", self.load_start)?;
        writeln!(f, "  Load end:    0x{:08X}", self.load_end)?;
        writeln!(
            f,
            "  Payload:     {:>8} bytes ({:.2} KB)",
            self.payload_len(),
            self.payload_len() as f64 / 1024.0
        )?;
        write!(f, "  Options:     0x{:02X} ({})", self.options.bits(), self.options)?;
        if self.options.is_packed() {
            write!(f, ", compressed size {} bytes", self.packed_size)?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn systeminfo() -> [u8; SYSTEMINFO_SIZE] {
        let mut info = [0u8; SYSTEMINFO_SIZE];
        info[..5].copy_from_slice(b"M_425");
        info[5..].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
        info
    }

    #[test]
    fn test_plain_option_field() {
        let header = ImageHeader::new(systeminfo(), 0xDEADBEEF, 0x100, OptionFlags::NONE, 0)
            .unwrap();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), ImageHeader::SIZE);
        assert_eq!(&bytes[..16], &systeminfo());
        assert_eq!(&bytes[16..20], &0xDEADBEEFu32.to_le_bytes());
        assert_eq!(&bytes[20..24], &0x8000u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &0x8100u32.to_le_bytes());
        assert_eq!(&bytes[28..32], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_packed_option_field() {
        let mut options = OptionFlags::NONE;
        options.set_compressed();
        options.set_signed();
        let header = ImageHeader::new(systeminfo(), 0, 0x400, options, 0x012345).unwrap();
        let bytes = header.to_bytes();
        assert_eq!(&bytes[28..32], &[0x03, 0x45, 0x23, 0x01]);

        let parsed = ImageHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.payload_len(), 0x400);
    }

    #[test]
    fn test_signed_only_uses_plain_field() {
        let mut options = OptionFlags::NONE;
        options.set_signed();
        let header = ImageHeader::new(systeminfo(), 0, 0x200, options, 0x1234).unwrap();
        assert_eq!(&header.to_bytes()[28..32], &[0x02, 0, 0, 0]);
    }

    #[test]
    fn test_packed_size_overflow() {
        let options = OptionFlags::from_bits(OPTION_COMPRESSED | OPTION_SIGNED);
        let err = ImageHeader::new(systeminfo(), 0, 0x100, options, 0x0100_0000).unwrap_err();
        assert!(matches!(err, HeaderError::FieldOverflow { .. }));
    }

    #[test]
    fn test_parse_rejects_garbage_option() {
        let header = ImageHeader::new(systeminfo(), 0, 0x10, OptionFlags::NONE, 0).unwrap();
        let mut bytes = header.to_bytes();
        bytes[30] = 0x7F;
        assert!(matches!(
            ImageHeader::parse(&bytes),
            Err(HeaderError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_footer_layout() {
        let mut raw = [0u8; RAW_SIGNATURE_SIZE];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = i as u8;
        }
        let footer = SignatureFooter::new(0x1234, RawSignature(raw));
        let bytes = footer.to_bytes();
        assert_eq!(bytes.len(), 72);
        assert_eq!(&bytes[..4], &[0x53, 0x4E, 0xBF, 0x58]);
        assert_eq!(&bytes[4..8], &[0x34, 0x12, 0, 0]);
        assert_eq!(&bytes[8..], &raw);

        let parsed = SignatureFooter::parse(&bytes).unwrap();
        assert_eq!(parsed, footer);
    }

    #[test]
    fn test_footer_offset() {
        let header = ImageHeader::new(systeminfo(), 0, 0x200, OptionFlags::NONE, 0).unwrap();
        assert_eq!(header.footer_offset(&[]).unwrap(), None);

        let options = OptionFlags::from_bits(OPTION_SIGNED);
        let signed = ImageHeader::new(systeminfo(), 0, 0x200, options, 0).unwrap();
        let mut payload = vec![0u8; 0x200];
        payload[40..44].copy_from_slice(&300u32.to_le_bytes());
        assert_eq!(signed.footer_offset(&payload).unwrap(), Some(512));
        payload[40..44].copy_from_slice(&256u32.to_le_bytes());
        assert_eq!(signed.footer_offset(&payload).unwrap(), Some(256));
        assert!(matches!(
            signed.footer_offset(&payload[..20]),
            Err(HeaderError::BufferTooSmall { .. })
        ));

        let packed = OptionFlags::from_bits(OPTION_COMPRESSED | OPTION_SIGNED);
        let header = ImageHeader::new(systeminfo(), 0, 0x300, packed, 0x1F0).unwrap();
        assert_eq!(header.footer_offset(&[]).unwrap(), Some(0x200));
    }

    #[test]
    fn test_signature_footer_missing() {
        let options = OptionFlags::from_bits(OPTION_SIGNED);
        let signed = ImageHeader::new(systeminfo(), 0, 0x100, options, 0).unwrap();
        let mut payload = vec![0xFFu8; 0x100];
        payload[40..44].copy_from_slice(&0x80u32.to_le_bytes());
        assert!(matches!(
            signed.signature_footer(&payload),
            Err(HeaderError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_footer_bad_magic() {
        let bytes = [0u8; SIGNATURE_FOOTER_SIZE];
        assert!(matches!(
            SignatureFooter::parse(&bytes),
            Err(HeaderError::InvalidMagic { .. })
        ));
    }
}
