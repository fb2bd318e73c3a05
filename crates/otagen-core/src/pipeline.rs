//! OTA image pipeline.
//!
//! Stages run strictly left to right on one owned buffer:
//!
//! ```text
//! locate marker → [patch length → sign] → align → [compress → [sign]] → crc → header
//! ```
//!
//! Bracketed stages depend on the build options. Any failure aborts the whole
//! build; nothing is produced from a partial run.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::checksum::crc32;
use crate::compress::{self, CompressError};
use crate::events::{BuildEvent, BuildObserver, BuildStage, TracingObserver};
use crate::payload::{FirmwareBuffer, FirmwareError, MarkerError, SystemInfo};
use crate::protocol::{HeaderError, ImageHeader, OptionFlags};
use crate::signing::{KeyHandle, SignatureEngine, Signer, SignerError};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("System info lookup failed: {0}")]
    MarkerNotFound(#[from] MarkerError),

    #[error("Signing failed: {0}")]
    SigningFailure(#[from] SignerError),

    #[error("IO error on {}: {source}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Compression failed: {0}")]
    Compression(#[from] CompressError),

    #[error("Header error: {0}")]
    Header(#[from] HeaderError),

    #[error("Firmware error: {0}")]
    Firmware(#[from] FirmwareError),

    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),
}

/// What to do with the input binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// LZMA-compress the payload.
    pub compress: bool,
    /// Sign with this key.
    pub sign_key: Option<KeyHandle>,
    /// Emit the payload alone, without the OTA header.
    pub bin_only: bool,
}

/// Result of a build: the OTA header (absent in binary-only mode) and the
/// final payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    pub header: Option<ImageHeader>,
    pub payload: Vec<u8>,
    pub options: OptionFlags,
    pub crc32: u32,
}

impl BuiltImage {
    /// Bytes to write to disk.
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.header {
            Some(header) => {
                let mut out = Vec::with_capacity(ImageHeader::SIZE + self.payload.len());
                out.extend_from_slice(&header.to_bytes());
                out.extend_from_slice(&self.payload);
                out
            }
            None => self.payload.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.header.as_ref().map_or(0, |_| ImageHeader::SIZE) + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tracks the current stage and reports transitions to the observer.
struct StageTracker<'a, O: BuildObserver> {
    stage: BuildStage,
    observer: &'a O,
}

impl<'a, O: BuildObserver> StageTracker<'a, O> {
    fn new(observer: &'a O) -> Self {
        Self {
            stage: BuildStage::Start,
            observer,
        }
    }

    fn goto_stage(&mut self, to: BuildStage, len: usize) {
        debug!(from = %self.stage, to = %to, len, "Stage transition");
        self.observer.on_event(&BuildEvent::StageChanged {
            from: self.stage,
            to,
            len,
        });
        self.stage = to;
    }

    fn skip(&self, stage: BuildStage) {
        self.observer.on_event(&BuildEvent::StageSkipped { stage });
    }

    fn emit(&self, event: BuildEvent) {
        self.observer.on_event(&event);
    }
}

/// Builds OTA images from application binaries.
pub struct ImageBuilder<S: Signer, O: BuildObserver = TracingObserver> {
    signer: S,
    observer: O,
    options: BuildOptions,
}

impl<S: Signer> ImageBuilder<S, TracingObserver> {
    /// Create a builder that logs progress through tracing.
    pub fn new(signer: S, options: BuildOptions) -> Self {
        Self::with_observer(signer, options, TracingObserver)
    }
}

impl<S: Signer, O: BuildObserver> ImageBuilder<S, O> {
    /// Create a builder with a custom observer.
    pub fn with_observer(signer: S, options: BuildOptions, observer: O) -> Self {
        Self {
            signer,
            observer,
            options,
        }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Run every requested stage on `input`.
    #[instrument(
        skip_all,
        fields(
            input_len = input.len(),
            compress = self.options.compress,
            sign = self.options.sign_key.is_some(),
            bin_only = self.options.bin_only
        )
    )]
    pub fn build(&self, input: Vec<u8>) -> Result<BuiltImage, BuildError> {
        let mut tracker = StageTracker::new(&self.observer);
        let ota = !self.options.bin_only;

        // Read the system info before anything patches the input.
        let systeminfo = if ota {
            let info = SystemInfo::locate(&input)?;
            debug!(offset = info.offset, "System info located");
            tracker.goto_stage(BuildStage::MarkerLocated, input.len());
            Some(info)
        } else {
            tracker.skip(BuildStage::MarkerLocated);
            None
        };

        let mut options = OptionFlags::NONE;
        let mut buffer = FirmwareBuffer::from_bytes(input);

        if let Some(key) = &self.options.sign_key {
            buffer = buffer.patch_length()?;
            tracker.goto_stage(BuildStage::Patched, buffer.len());

            let signed_len = buffer.len();
            let (signed, _) = SignatureEngine::new(&self.signer, key).sign(buffer)?;
            buffer = signed;
            options.set_signed();
            tracker.emit(BuildEvent::Signed {
                stage: BuildStage::Signed,
                signed_len,
            });
            tracker.goto_stage(BuildStage::Signed, buffer.len());
        } else {
            tracker.skip(BuildStage::Patched);
            tracker.skip(BuildStage::Signed);
        }

        // Binary-only output ends right after the footer.
        if ota {
            buffer = buffer.align();
            tracker.goto_stage(BuildStage::Aligned, buffer.len());
        } else {
            tracker.skip(BuildStage::Aligned);
        }

        let mut packed_size = 0;
        if self.options.compress {
            let original = buffer.len();
            buffer = compress::compress(buffer)?;
            options.set_compressed();
            tracker.emit(BuildEvent::Compressed {
                original,
                compressed: buffer.len(),
            });
            tracker.goto_stage(BuildStage::Compressed, buffer.len());

            if let Some(key) = &self.options.sign_key {
                packed_size = buffer.len();
                let (signed, _) = SignatureEngine::new(&self.signer, key).sign(buffer)?;
                buffer = if ota { signed.align() } else { signed };
                tracker.emit(BuildEvent::Signed {
                    stage: BuildStage::CompressedSigned,
                    signed_len: packed_size,
                });
                tracker.goto_stage(BuildStage::CompressedSigned, buffer.len());
            } else {
                tracker.skip(BuildStage::CompressedSigned);
            }
        } else {
            tracker.skip(BuildStage::Compressed);
            tracker.skip(BuildStage::CompressedSigned);
        }

        let payload = buffer.into_inner();
        let crc32 = crc32(&payload);
        tracker.goto_stage(BuildStage::Checksummed, payload.len());

        let header = match systeminfo {
            Some(info) => {
                let header =
                    ImageHeader::new(*info.as_bytes(), crc32, payload.len(), options, packed_size)?;
                tracker.goto_stage(BuildStage::Assembled, ImageHeader::SIZE + payload.len());
                Some(header)
            }
            None => {
                tracker.skip(BuildStage::Assembled);
                None
            }
        };

        let image = BuiltImage {
            header,
            payload,
            options,
            crc32,
        };
        tracker.goto_stage(BuildStage::Done, image.len());
        tracker.emit(BuildEvent::Complete {
            len: image.len(),
            crc32,
        });
        info!(
            len = image.len(),
            options = %options,
            crc32 = %format!("{:08X}", crc32),
            "Image built"
        );
        Ok(image)
    }
}
