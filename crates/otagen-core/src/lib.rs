//! OTAGen-Core: bootloader OTA image generation in Rust.
//!
//! Turns a raw application binary into the image the bootloader accepts for
//! over-the-air upgrade: optionally signed with ECDSA P-256, optionally LZMA
//! compressed, padded to 256-byte pages and prefixed with a 32-byte header.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, image header and signature footer layouts
//! - **Payload**: System info lookup, length patching, page alignment
//! - **Signing**: Signer abstraction (openssl, mock) and DER decoding
//! - **Compress**: LZMA "alone" streams with the bootloader's length field
//! - **Events**: Observer pattern for progress reporting
//! - **Pipeline**: Stage-by-stage image builder
//! - **Session**: File I/O and configuration around the builder
//!
//! # Example
//!
//! ```no_run
//! use otagen_core::session::{BuildConfig, BuildSession};
//!
//! let config = BuildConfig {
//!     input: Some("app.bin".into()),
//!     output: Some("app.ota".into()),
//!     compress: true,
//!     sign_key: Some("private.pem".into()),
//!     ..Default::default()
//! };
//!
//! let session = BuildSession::new(&config).expect("incomplete config");
//! session.run().expect("image build failed");
//! ```

pub mod checksum;
pub mod compress;
pub mod events;
pub mod payload;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod signing;

// Re-exports for convenience
pub use checksum::crc32;
pub use events::{BuildEvent, BuildObserver, BuildStage, NullObserver, TracingObserver};
pub use payload::{FirmwareBuffer, SystemInfo};
pub use pipeline::{BuildError, BuildOptions, BuiltImage, ImageBuilder};
pub use protocol::{ImageHeader, OptionFlags, SignatureFooter};
pub use session::{BuildConfig, BuildSession};
pub use signing::{KeyHandle, MockSigner, OpensslSigner, Signer, SignerError};
