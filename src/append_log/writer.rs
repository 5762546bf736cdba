//! Frame appends
//!
//! One append is one `write` of a fully encoded frame to a file opened with
//! O_APPEND. On local filesystems the kernel places each such write at the
//! current end of file, so frames from concurrent writers never interleave.
//! Segment data is never locked; the optional lock only serializes rotation
//! and sequence allocation.
//!
//! Durability is per append:
//!
//! | Mode        | fsync                                  |
//! |-------------|----------------------------------------|
//! | `None`      | never, data reaches the page cache     |
//! | `Always`    | after every frame                      |
//! | `EveryN(n)` | after frames whose seq is a multiple of n |

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::codec::encode;
use super::errors::{LogError, LogResult};
use super::frame::{Frame, FrameFields};
use super::notify::{LogNotifier, SegmentNotifier};
use super::paths::SessionPaths;
use super::rotation::{maybe_rotate, RotationOutcome, RotationPolicy};
use super::sequence::SeqStrategy;
use crate::observability::{log_event, Event};

/// When an append is followed by fsync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    #[default]
    None,
    Always,
    /// Sync when the frame's seq is divisible by `n`. Frames without a seq
    /// are never synced in this mode.
    EveryN(u64),
}

impl Durability {
    /// Whether a frame with `seq` must be synced.
    pub fn should_sync(&self, seq: Option<u64>) -> bool {
        match self {
            Durability::None => false,
            Durability::Always => true,
            Durability::EveryN(n) => match seq {
                Some(seq) if *n > 0 => seq % n == 0,
                _ => false,
            },
        }
    }
}

/// Per-append settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendOptions {
    pub rotation: RotationPolicy,
    pub durability: Durability,
    pub sequencing: SeqStrategy,
    /// Serialize rotation and seq allocation through advisory locks
    pub use_lock: bool,
    /// Fail the append when the sealed-segment notification fails
    pub strict_queue: bool,
}

/// What an append did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    /// Sanitized session id
    pub session_id: String,
    pub seq: Option<u64>,
    /// Segment the frame was written to
    pub segment: PathBuf,
    /// Segment size right after the write
    pub segment_size: u64,
    /// Rotation check that ran before the write
    pub rotation: RotationOutcome,
    /// Whether the frame was fsynced
    pub synced: bool,
}

/// Appends frames to session logs under one directory.
///
/// Holds no per-session state: every append resolves paths and checks
/// rotation from the filesystem, so any number of writers, in any number of
/// processes, can share a directory.
pub struct LogWriter<N = LogNotifier> {
    dir: PathBuf,
    notifier: N,
}

impl LogWriter<LogNotifier> {
    /// Writer whose sealed segments are only logged.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, LogNotifier)
    }
}

impl<N: SegmentNotifier> LogWriter<N> {
    pub fn new(dir: impl Into<PathBuf>, notifier: N) -> Self {
        Self {
            dir: dir.into(),
            notifier,
        }
    }

    /// The log directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Paths of a session in this writer's directory.
    pub fn paths(&self, session_id: &str) -> SessionPaths {
        SessionPaths::resolve(&self.dir, session_id)
    }

    /// Appends one frame to the session's active segment.
    ///
    /// Rotation is checked first. If the rotation lock was taken it stays
    /// held until the frame is written, so the fresh segment always receives
    /// this writer's frame before anyone else can seal it.
    ///
    /// # Errors
    ///
    /// - `QueueFailed` when `strict_queue` is set and the notifier failed;
    ///   the segment was sealed but the frame was not appended
    /// - `Fsync` when a requested sync failed; the frame may or may not be
    ///   on disk
    /// - `Io`, `Lock`, `Encode` for everything else
    pub fn append(
        &self,
        session_id: &str,
        fields: FrameFields,
        options: &AppendOptions,
    ) -> LogResult<AppendReceipt> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            LogError::io(format!("failed to create log directory {}", self.dir.display()), e)
        })?;

        let paths = self.paths(session_id);
        let (rotation, guard) = maybe_rotate(
            &paths,
            &options.rotation,
            options.use_lock,
            &self.notifier,
            options.strict_queue,
        )?
        .into_parts();

        let mut file = open_segment(&paths.active)?;
        let seq = options.sequencing.resolve(&paths, options.use_lock)?;

        let frame = Frame::new(paths.session_id(), fields, seq);
        let bytes = encode(&frame).map_err(|e| LogError::Encode(e.to_string()))?;

        file.write_all(&bytes).map_err(|e| {
            LogError::io(format!("failed to append to {}", paths.active.display()), e)
        })?;

        let synced = options.durability.should_sync(seq);
        if synced {
            file.sync_all().map_err(|e| {
                LogError::fsync(format!("failed to sync {}", paths.active.display()), e)
            })?;
        }

        // Size of the inode just written, even if another writer has since
        // renamed it
        let segment_size = file
            .metadata()
            .map_err(|e| LogError::io(format!("failed to stat {}", paths.active.display()), e))?
            .len();

        drop(file);
        drop(guard);

        let seq_str = seq.map_or_else(|| "null".to_string(), |s| s.to_string());
        let size_str = segment_size.to_string();
        if synced {
            log_event(
                Event::FrameFsync,
                &[("session_id", paths.session_id()), ("seq", seq_str.as_str())],
            );
        }
        log_event(
            Event::AppendComplete,
            &[
                ("session_id", paths.session_id()),
                ("seq", seq_str.as_str()),
                ("segment_size", size_str.as_str()),
                ("rotation", rotation.as_str()),
            ],
        );

        Ok(AppendReceipt {
            session_id: paths.session_id().to_string(),
            seq,
            segment: paths.active.clone(),
            segment_size,
            rotation,
            synced,
        })
    }
}

fn open_segment(path: &Path) -> LogResult<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    options
        .open(path)
        .map_err(|e| LogError::io(format!("failed to open segment {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::append_log::codec::{Decoded, FrameDecoder};
    use crate::append_log::notify::MemoryNotifier;
    use std::time::Duration;
    use tempfile::TempDir;

    fn read_all(path: &Path) -> Vec<Frame> {
        let bytes = fs::read(path).unwrap();
        let mut decoder = FrameDecoder::new(bytes.as_slice());
        let mut frames = Vec::new();
        while let Decoded::Frame { frame, .. } = decoder.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_durability_every_n() {
        let every3 = Durability::EveryN(3);
        assert!(every3.should_sync(Some(0)));
        assert!(!every3.should_sync(Some(1)));
        assert!(every3.should_sync(Some(6)));
        assert!(!every3.should_sync(None));
        assert!(!Durability::EveryN(0).should_sync(Some(0)));
        assert!(Durability::Always.should_sync(None));
        assert!(!Durability::None.should_sync(Some(0)));
    }

    #[test]
    fn test_append_writes_frame() {
        let temp_dir = TempDir::new().unwrap();
        let writer = LogWriter::open(temp_dir.path());

        let receipt = writer
            .append(
                "s1",
                FrameFields::new("alice", "hello").with_role("assistant"),
                &AppendOptions::default(),
            )
            .unwrap();

        assert_eq!(receipt.session_id, "s1");
        assert_eq!(receipt.seq, None);
        assert_eq!(receipt.rotation, RotationOutcome::None);
        assert!(!receipt.synced);
        assert_eq!(receipt.segment_size, fs::metadata(&receipt.segment).unwrap().len());

        let frames = read_all(&receipt.segment);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].user_id, "alice");
        assert_eq!(frames[0].role, "assistant");
        assert_eq!(frames[0].content, "hello");
        assert_eq!(frames[0].session_id, "s1");
        assert!(frames[0].timestamp().is_some());
    }

    #[test]
    fn test_append_sanitizes_session_id() {
        let temp_dir = TempDir::new().unwrap();
        let writer = LogWriter::open(temp_dir.path());

        let receipt = writer
            .append("../../etc/passwd", FrameFields::new("u", "x"), &AppendOptions::default())
            .unwrap();

        assert_eq!(receipt.session_id, "etc-passwd");
        assert_eq!(receipt.segment, temp_dir.path().join("session_etc-passwd.logtmp"));
        assert_eq!(read_all(&receipt.segment)[0].session_id, "etc-passwd");
    }

    #[test]
    fn test_allocated_seq_and_every_n_sync() {
        let temp_dir = TempDir::new().unwrap();
        let writer = LogWriter::open(temp_dir.path());
        let options = AppendOptions {
            sequencing: SeqStrategy::Allocated,
            durability: Durability::EveryN(2),
            use_lock: true,
            ..Default::default()
        };

        let synced: Vec<(Option<u64>, bool)> = (0..4)
            .map(|_| {
                let r = writer.append("s1", FrameFields::new("u", "x"), &options).unwrap();
                (r.seq, r.synced)
            })
            .collect();

        assert_eq!(
            synced,
            vec![(Some(0), true), (Some(1), false), (Some(2), true), (Some(3), false)]
        );
    }

    #[test]
    fn test_rotation_then_fresh_segment() {
        let temp_dir = TempDir::new().unwrap();
        let writer = LogWriter::new(temp_dir.path(), MemoryNotifier::new());
        let options = AppendOptions {
            rotation: RotationPolicy::new(1, Duration::from_secs(3600)),
            use_lock: true,
            ..Default::default()
        };

        let first = writer.append("s1", FrameFields::new("u", "one"), &options).unwrap();
        assert_eq!(first.rotation, RotationOutcome::None);

        let second = writer.append("s1", FrameFields::new("u", "two"), &options).unwrap();
        let sealed = second.rotation.sealed().unwrap().to_path_buf();

        assert_eq!(writer.notifier().sealed(), vec![sealed.clone()]);
        assert_eq!(read_all(&sealed)[0].content, "one");
        let active = read_all(&second.segment);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "two");
    }

    #[test]
    fn test_strict_queue_failure_skips_append() {
        let temp_dir = TempDir::new().unwrap();
        let writer = LogWriter::new(temp_dir.path(), MemoryNotifier::failing());
        let options = AppendOptions {
            rotation: RotationPolicy::new(1, Duration::from_secs(3600)),
            strict_queue: true,
            ..Default::default()
        };

        writer.append("s1", FrameFields::new("u", "one"), &options).unwrap();
        let err = writer
            .append("s1", FrameFields::new("u", "two"), &options)
            .unwrap_err();

        assert!(matches!(err, LogError::QueueFailed { .. }));
        assert!(err.is_retryable());
        assert!(!writer.paths("s1").active.exists());
    }

    #[test]
    fn test_lenient_queue_failure_appends() {
        let temp_dir = TempDir::new().unwrap();
        let writer = LogWriter::new(temp_dir.path(), MemoryNotifier::failing());
        let options = AppendOptions {
            rotation: RotationPolicy::new(1, Duration::from_secs(3600)),
            ..Default::default()
        };

        writer.append("s1", FrameFields::new("u", "one"), &options).unwrap();
        let receipt = writer.append("s1", FrameFields::new("u", "two"), &options).unwrap();

        assert!(matches!(receipt.rotation, RotationOutcome::Rotated(_)));
        assert_eq!(read_all(&receipt.segment)[0].content, "two");
    }

    #[test]
    fn test_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a/b/c");
        let writer = LogWriter::open(&nested);

        writer
            .append("s1", FrameFields::new("u", "x"), &AppendOptions::default())
            .unwrap();
        assert!(nested.join("session_s1.logtmp").exists());
    }
}
