//! Event system for UI decoupling.
//!
//! Allows the CLI (or anything else driving a build) to follow pipeline
//! progress without the core knowing how it is displayed.

use std::fmt;

/// Pipeline stages, in the only order they can occur.
///
/// `Start → MarkerLocated → [Patched → Signed] → Aligned → [Compressed →
/// [CompressedSigned]] → Checksummed → Assembled → Done`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildStage {
    /// Input loaded, nothing done yet.
    Start,
    /// System info block extracted.
    MarkerLocated,
    /// Length slot overwritten.
    Patched,
    /// Footer appended to the plain payload.
    Signed,
    /// Footer padded out to the page boundary.
    Aligned,
    /// LZMA stream produced.
    Compressed,
    /// Footer appended to the compressed payload.
    CompressedSigned,
    /// CRC computed over the final payload.
    Checksummed,
    /// Header and payload joined.
    Assembled,
    /// Image complete.
    Done,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStage::Start => write!(f, "START"),
            BuildStage::MarkerLocated => write!(f, "MARKER_LOCATED"),
            BuildStage::Patched => write!(f, "PATCHED"),
            BuildStage::Signed => write!(f, "SIGNED"),
            BuildStage::Aligned => write!(f, "ALIGNED"),
            BuildStage::Compressed => write!(f, "COMPRESSED"),
            BuildStage::CompressedSigned => write!(f, "COMPRESSED_SIGNED"),
            BuildStage::Checksummed => write!(f, "CHECKSUMMED"),
            BuildStage::Assembled => write!(f, "ASSEMBLED"),
            BuildStage::Done => write!(f, "DONE"),
        }
    }
}

/// Events emitted while building an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// Stage finished; `len` is the buffer length afterwards.
    StageChanged {
        from: BuildStage,
        to: BuildStage,
        len: usize,
    },
    /// Optional stage not requested.
    StageSkipped { stage: BuildStage },
    /// Signature footer appended.
    Signed { stage: BuildStage, signed_len: usize },
    /// Payload compressed.
    Compressed { original: usize, compressed: usize },
    /// Image finished.
    Complete { len: usize, crc32: u32 },
}

/// Observer trait for receiving build events.
pub trait BuildObserver {
    /// Called when an event occurs.
    fn on_event(&self, event: &BuildEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl BuildObserver for NullObserver {
    fn on_event(&self, _event: &BuildEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl BuildObserver for TracingObserver {
    fn on_event(&self, event: &BuildEvent) {
        match event {
            BuildEvent::StageChanged { from, to, len } => {
                tracing::debug!(from = %from, to = %to, len = len, "Stage transition");
            }
            BuildEvent::StageSkipped { stage } => {
                tracing::trace!(stage = %stage, "Stage skipped");
            }
            BuildEvent::Signed { stage, signed_len } => {
                tracing::info!(stage = %stage, signed_len = signed_len, "Signature appended");
            }
            BuildEvent::Compressed {
                original,
                compressed,
            } => {
                let pct = if *original > 0 {
                    (*compressed * 100) / *original
                } else {
                    0
                };
                tracing::info!(
                    original = original,
                    compressed = compressed,
                    ratio = %format!("{}%", pct),
                    "Payload compressed"
                );
            }
            BuildEvent::Complete { len, crc32 } => {
                tracing::info!(len = len, crc32 = %format!("{:08X}", crc32), "Image complete");
            }
        }
    }
}

impl<O: BuildObserver + ?Sized> BuildObserver for &O {
    fn on_event(&self, event: &BuildEvent) {
        (**self).on_event(event)
    }
}

/// Observer that keeps every event, for tests and summaries.
#[derive(Default)]
pub struct RecordingObserver {
    events: std::sync::Mutex<Vec<BuildEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BuildEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Stages entered, in order.
    pub fn stages(&self) -> Vec<BuildStage> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BuildEvent::StageChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }
}

impl BuildObserver for RecordingObserver {
    fn on_event(&self, event: &BuildEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
