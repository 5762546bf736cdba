//! Append log error types
//!
//! Error codes:
//! - SLOG_IO_FAILED (FATAL severity)
//! - SLOG_FSYNC_FAILED (FATAL severity)
//! - SLOG_LOCK_FAILED (ERROR severity)
//! - SLOG_QUEUE_FAILED (ERROR severity, retryable)
//! - SLOG_ENCODE_FAILED (ERROR severity)
//! - SLOG_FRAME_TRUNCATED (ERROR severity)
//! - SLOG_FRAME_CORRUPT (ERROR severity)
//! - SLOG_CONFIG_INVALID (ERROR severity)
//!
//! Lock contention is not an error: it surfaces as a value
//! (`RotationOutcome::Contended`, `RegionLock::try_acquire` returning `None`).

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::observability::Severity;

/// Stable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogErrorCode {
    /// Filesystem read/write/rename failed
    IoFailed,
    /// Explicitly requested fsync failed
    FsyncFailed,
    /// Advisory lock failed for a reason other than contention
    LockFailed,
    /// Segment sealed but the queue hand-off failed in strict mode
    QueueFailed,
    /// Frame could not be serialized
    EncodeFailed,
    /// Strict read hit a truncated frame
    FrameTruncated,
    /// Strict read hit an undecodable frame
    FrameCorrupt,
    /// Configuration rejected
    ConfigInvalid,
}

impl LogErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            LogErrorCode::IoFailed => "SLOG_IO_FAILED",
            LogErrorCode::FsyncFailed => "SLOG_FSYNC_FAILED",
            LogErrorCode::LockFailed => "SLOG_LOCK_FAILED",
            LogErrorCode::QueueFailed => "SLOG_QUEUE_FAILED",
            LogErrorCode::EncodeFailed => "SLOG_ENCODE_FAILED",
            LogErrorCode::FrameTruncated => "SLOG_FRAME_TRUNCATED",
            LogErrorCode::FrameCorrupt => "SLOG_FRAME_CORRUPT",
            LogErrorCode::ConfigInvalid => "SLOG_CONFIG_INVALID",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            LogErrorCode::IoFailed | LogErrorCode::FsyncFailed => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for LogErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Append log error
#[derive(Debug, Error)]
pub enum LogError {
    /// Filesystem failure (disk full, permission denied, missing file)
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Durability request failed; the frame may not be on stable storage
    #[error("{context}: {source}")]
    Fsync {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Lock could not be taken for a reason other than contention
    #[error("lock on {} failed: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The segment was sealed and is on disk, but the hand-off failed and the
    /// caller asked for strict queueing. The frame was not appended.
    #[error("segment {} sealed but queue hand-off failed: {reason}", sealed.display())]
    QueueFailed { sealed: PathBuf, reason: String },

    /// Frame serialization failed
    #[error("frame encode failed: {0}")]
    Encode(String),

    /// Declared frame length exceeds the bytes remaining in the segment
    #[error(
        "truncated frame in {} at byte offset {offset}: declared {declared} bytes, {available} available",
        path.display()
    )]
    Truncated {
        path: PathBuf,
        offset: u64,
        declared: u64,
        available: u64,
    },

    /// Well-formed header followed by an undecodable payload
    #[error("corrupt frame in {} at byte offset {offset}: {reason}", path.display())]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Configuration rejected during validation
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LogError {
    /// I/O failure with context
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        LogError::Io {
            context: context.into(),
            source,
        }
    }

    /// fsync failure with context
    pub fn fsync(context: impl Into<String>, source: io::Error) -> Self {
        LogError::Fsync {
            context: context.into(),
            source,
        }
    }

    /// Returns the error code
    pub fn code(&self) -> LogErrorCode {
        match self {
            LogError::Io { .. } => LogErrorCode::IoFailed,
            LogError::Fsync { .. } => LogErrorCode::FsyncFailed,
            LogError::Lock { .. } => LogErrorCode::LockFailed,
            LogError::QueueFailed { .. } => LogErrorCode::QueueFailed,
            LogError::Encode(_) => LogErrorCode::EncodeFailed,
            LogError::Truncated { .. } => LogErrorCode::FrameTruncated,
            LogError::Corrupt { .. } => LogErrorCode::FrameCorrupt,
            LogError::Config(_) => LogErrorCode::ConfigInvalid,
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code().severity()
    }

    /// Returns whether data may be at risk
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Returns whether retrying the same operation later is meaningful.
    ///
    /// Only a strict queue failure qualifies: the disk state is consistent
    /// and the next append will start a fresh active segment.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LogError::QueueFailed { .. })
    }
}

/// Result type for append log operations
pub type LogResult<T> = Result<T, LogError>;
