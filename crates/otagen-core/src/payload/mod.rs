//! Payload handling module.
//!
//! Provides system info lookup and the in-place firmware transforms.

pub mod firmware;
pub mod marker;

pub use firmware::{FirmwareBuffer, FirmwareError, padding_len};
pub use marker::{MarkerError, SystemInfo};
