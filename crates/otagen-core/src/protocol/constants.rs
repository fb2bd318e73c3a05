//! Image layout constants shared by every pipeline stage.
//!
//! The bootloader reads these offsets from the same table, so any change here
//! is a change to the on-device format.

// ============================================================================
// System Info Marker
// ============================================================================

/// Marker embedded in the application binary where the system info block starts.
pub const SYSTEMINFO_MARKER: &[u8] = b"M_425"; // 0x4D5F343235

/// System info block size (marker included).
pub const SYSTEMINFO_SIZE: usize = 16;

// ============================================================================
// Length Patch
// ============================================================================

/// Offset of the firmware length slot inside the application binary.
pub const FW_LENGTH_OFFSET: usize = 40;

/// Width of the firmware length slot (u32 LE).
pub const FW_LENGTH_SIZE: usize = 4;

// ============================================================================
// Alignment
// ============================================================================

/// Flash page the bootloader expects payloads and footers to be aligned on.
pub const ALIGNMENT: usize = 256;

/// Fill byte for alignment padding (erased flash).
pub const PAD_BYTE: u8 = 0xFF;

// ============================================================================
// Signature Footer
// ============================================================================

/// Footer magic, written big-endian.
pub const SIGNATURE_MAGIC: u32 = 0x534E_BF58;

/// Raw signature length (r || s, 32 bytes each).
pub const RAW_SIGNATURE_SIZE: usize = 64;

/// One ECDSA P-256 scalar.
pub const SIGNATURE_COMPONENT_SIZE: usize = 32;

/// magic(4) + size(4) + raw signature(64)
pub const SIGNATURE_FOOTER_SIZE: usize = 8 + RAW_SIGNATURE_SIZE;

// ============================================================================
// Compression
// ============================================================================

/// LZMA dictionary size.
pub const LZMA_DICT_SIZE: u32 = 1 << 16; // 64 KiB

/// LZMA preset the encoder options start from before overriding the dictionary.
pub const LZMA_PRESET: u32 = 6;

/// Offset of the uncompressed-size field in an LZMA alone header.
pub const LZMA_SIZE_OFFSET: usize = 5;

/// Width of the uncompressed-size field (u64 LE).
pub const LZMA_SIZE_FIELD: usize = 8;

/// props(1) + dict_size(4) + uncompressed_size(8)
pub const LZMA_ALONE_HEADER_SIZE: usize = 13;

// ============================================================================
// Image Header
// ============================================================================

/// Load address of the application slot.
pub const LOAD_BASE: u32 = 0x8000;

/// systeminfo(16) + crc32(4) + load_start(4) + load_end(4) + option(4)
pub const IMAGE_HEADER_SIZE: usize = SYSTEMINFO_SIZE + 16;

/// Option bit: payload is LZMA compressed.
pub const OPTION_COMPRESSED: u8 = 0x01;

/// Option bit: payload carries a signature footer.
pub const OPTION_SIGNED: u8 = 0x02;

/// Largest value of the 3-byte size that follows the option byte.
pub const OPTION_SIZE_MAX: u32 = 0x00FF_FFFF;
