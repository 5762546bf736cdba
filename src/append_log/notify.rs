//! Sealed-segment notification
//!
//! When a segment is sealed its path is handed to a queueing collaborator.
//! The hand-off is one-way and never touches the segment itself: a failed
//! notification leaves the sealed file exactly as it was.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use super::frame::now_rfc3339;
use crate::observability::{log_event, Event};

/// Hand-off failure reported by a notifier
#[derive(Debug, Error)]
#[error("{message}")]
pub struct NotifyError {
    message: String,
    #[source]
    source: Option<io::Error>,
}

impl NotifyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            message: message.into(),
            source: Some(source),
        }
    }
}

/// Receives sealed segment paths.
pub trait SegmentNotifier: Send + Sync {
    /// Hands `sealed` to the downstream queue.
    fn segment_sealed(&self, sealed: &Path) -> Result<(), NotifyError>;
}

/// Logs the seal and reports success. Used when no queue is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl SegmentNotifier for LogNotifier {
    fn segment_sealed(&self, sealed: &Path) -> Result<(), NotifyError> {
        let path = sealed.display().to_string();
        log_event(Event::SegmentQueued, &[("sealed", path.as_str()), ("queue", "none")]);
        Ok(())
    }
}

/// Appends one JSON line per sealed segment to a local spool file.
///
/// An external relay can tail the spool and forward entries to a broker.
/// Each entry is synced before the call returns.
#[derive(Debug, Clone)]
pub struct SpoolNotifier {
    path: PathBuf,
}

impl SpoolNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Spool file location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SegmentNotifier for SpoolNotifier {
    fn segment_sealed(&self, sealed: &Path) -> Result<(), NotifyError> {
        let entry = serde_json::json!({
            "segment": sealed.display().to_string(),
            "time": now_rfc3339(),
        });

        let append = || -> io::Result<()> {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            file.write_all(format!("{}\n", entry).as_bytes())?;
            file.sync_all()
        };

        append().map_err(|e| {
            NotifyError::with_source(format!("spool {} unavailable", self.path.display()), e)
        })?;

        let path = sealed.display().to_string();
        let spool = self.path.display().to_string();
        log_event(
            Event::SegmentQueued,
            &[("sealed", path.as_str()), ("queue", spool.as_str())],
        );
        Ok(())
    }
}

/// Keeps sealed paths in memory. A `failing` notifier rejects every hand-off.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sealed: Mutex<Vec<PathBuf>>,
    fail: bool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose queue is always down.
    pub fn failing() -> Self {
        Self {
            sealed: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Paths received so far, in order.
    pub fn sealed(&self) -> Vec<PathBuf> {
        match self.sealed.lock() {
            Ok(sealed) => sealed.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl SegmentNotifier for MemoryNotifier {
    fn segment_sealed(&self, sealed: &Path) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::new("queue unavailable"));
        }
        match self.sealed.lock() {
            Ok(mut list) => list.push(sealed.to_path_buf()),
            Err(poisoned) => poisoned.into_inner().push(sealed.to_path_buf()),
        }
        Ok(())
    }
}
