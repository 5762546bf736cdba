//! Observable events emitted by the append log
//!
//! Events are explicit and typed; each maps to a stable uppercase code.

use std::fmt;

use super::logger::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Writer
    /// A frame was appended to the active segment
    AppendComplete,
    /// The active segment was fsynced after an append
    FrameFsync,
    /// Session metadata JSON was rejected and dropped
    MetadataIgnored,

    // Rotation
    /// Active segment renamed to a sealed segment
    SegmentSealed,
    /// Sealed segment handed to the queue collaborator
    SegmentQueued,
    /// Queue collaborator rejected the sealed segment
    SegmentQueueFailed,
    /// Another writer holds the rotation lock
    RotationContended,
    /// Active segment disappeared before the locked re-check
    RotationVanished,

    // Sequencing
    /// Counter lock unavailable, scanned the active segment instead
    SeqLockFallback,
    /// Best-effort seq scan hit an I/O error
    SeqScanFailed,

    // Reader
    /// Fewer than four trailing bytes after the last frame
    PartialHeader,
    /// Declared frame length exceeds the remaining bytes
    FrameTruncated,
    /// Frame payload could not be decoded
    FrameCorrupt,
    /// A read stream was exhausted
    ReadComplete,

    // Configuration
    /// Configuration file loaded and validated
    ConfigLoaded,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::AppendComplete => "APPEND_COMPLETE",
            Event::FrameFsync => "FRAME_FSYNC",
            Event::MetadataIgnored => "METADATA_IGNORED",
            Event::SegmentSealed => "SEGMENT_SEALED",
            Event::SegmentQueued => "SEGMENT_QUEUED",
            Event::SegmentQueueFailed => "SEGMENT_QUEUE_FAILED",
            Event::RotationContended => "ROTATION_CONTENDED",
            Event::RotationVanished => "ROTATION_VANISHED",
            Event::SeqLockFallback => "SEQ_LOCK_FALLBACK",
            Event::SeqScanFailed => "SEQ_SCAN_FAILED",
            Event::PartialHeader => "PARTIAL_HEADER",
            Event::FrameTruncated => "FRAME_TRUNCATED",
            Event::FrameCorrupt => "FRAME_CORRUPT",
            Event::ReadComplete => "READ_COMPLETE",
            Event::ConfigLoaded => "CONFIG_LOADED",
        }
    }

    /// Default severity this event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::PartialHeader => Severity::Trace,
            Event::MetadataIgnored
            | Event::SegmentQueueFailed
            | Event::SeqLockFallback
            | Event::SeqScanFailed
            | Event::FrameTruncated
            | Event::FrameCorrupt => Severity::Warn,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
