//! LZMA1 "alone" compression.
//!
//! The bootloader decompresses with a 64 KiB window, so the dictionary is
//! pinned to that size. liblzma writes an unknown size (all ones) into the
//! alone header; the bootloader needs the real uncompressed length there.

use std::io::Write;

use thiserror::Error;
use tracing::debug;
use xz2::stream::{Action, LzmaOptions, Status, Stream};
use xz2::write::XzEncoder;

use crate::payload::FirmwareBuffer;
use crate::protocol::constants::{
    LZMA_ALONE_HEADER_SIZE, LZMA_DICT_SIZE, LZMA_PRESET, LZMA_SIZE_FIELD, LZMA_SIZE_OFFSET,
};

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("LZMA error: {0}")]
    Lzma(#[from] xz2::stream::Error),
    #[error("LZMA stream too short: {0} bytes")]
    Truncated(usize),
    #[error("Decompressed {actual} bytes, header says {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn encoder_options() -> Result<LzmaOptions, CompressError> {
    let mut options = LzmaOptions::new_preset(LZMA_PRESET)?;
    options.dict_size(LZMA_DICT_SIZE);
    Ok(options)
}

/// Compress into an alone stream and store the uncompressed length at offset 5.
pub fn compress(buffer: FirmwareBuffer) -> Result<FirmwareBuffer, CompressError> {
    let original_len = buffer.len();
    let stream = Stream::new_lzma_encoder(&encoder_options()?)?;
    let mut encoder = XzEncoder::new_stream(Vec::with_capacity(original_len / 2), stream);
    encoder.write_all(buffer.as_slice())?;
    let mut out = encoder.finish()?;

    if out.len() < LZMA_ALONE_HEADER_SIZE {
        return Err(CompressError::Truncated(out.len()));
    }
    out[LZMA_SIZE_OFFSET..LZMA_SIZE_OFFSET + LZMA_SIZE_FIELD]
        .copy_from_slice(&(original_len as u64).to_le_bytes());

    debug!(
        original = original_len,
        compressed = out.len(),
        "LZMA compressed"
    );
    Ok(FirmwareBuffer::from_bytes(out))
}

/// Uncompressed length recorded in an alone header.
pub fn uncompressed_len(stream: &[u8]) -> Result<u64, CompressError> {
    let field = stream
        .get(LZMA_SIZE_OFFSET..LZMA_SIZE_OFFSET + LZMA_SIZE_FIELD)
        .ok_or(CompressError::Truncated(stream.len()))?;
    let mut bytes = [0u8; LZMA_SIZE_FIELD];
    bytes.copy_from_slice(field);
    Ok(u64::from_le_bytes(bytes))
}

/// Decompress a stream produced by [`compress`]. Bytes after the end-of-stream
/// marker (a signature footer, padding) are ignored.
pub fn decompress(stream: &[u8]) -> Result<Vec<u8>, CompressError> {
    let expected = uncompressed_len(stream)?;

    // decode as the encoder wrote it: size unknown, terminated by the end marker
    let mut restored = stream.to_vec();
    restored[LZMA_SIZE_OFFSET..LZMA_SIZE_OFFSET + LZMA_SIZE_FIELD].fill(0xFF);

    let mut decoder = Stream::new_lzma_decoder(u64::MAX)?;
    let mut out = Vec::with_capacity(expected as usize + 1);
    loop {
        if out.len() == out.capacity() {
            out.reserve(LZMA_DICT_SIZE as usize);
        }
        let in_before = decoder.total_in();
        let out_before = out.len();
        let status = decoder.process_vec(&restored[in_before as usize..], &mut out, Action::Run)?;
        if status == Status::StreamEnd {
            break;
        }
        if decoder.total_in() == in_before && out.len() == out_before {
            return Err(CompressError::Truncated(stream.len()));
        }
    }

    if out.len() as u64 != expected {
        return Err(CompressError::SizeMismatch {
            expected,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}
