//! Protocol module - bootloader image format definitions.

pub mod constants;
pub mod header;

pub use constants::*;
pub use header::{HeaderError, ImageHeader, OptionFlags, RawSignature, SignatureFooter};
