//! Sequence numbering
//!
//! Three ways to number a frame, by increasing guarantee:
//!
//! | Strategy    | Source                            | Concurrent writers            |
//! |-------------|-----------------------------------|-------------------------------|
//! | `Explicit`  | caller                            | whatever the caller ensures   |
//! | `Scanned`   | highest seq in the active segment | may hand out duplicates       |
//! | `Allocated` | locked counter file, fsynced      | unique, while locking works   |
//!
//! The allocator degrades to a scan when the counter file cannot be locked.
//! That fallback has the same weakness as `Scanned` and is logged as
//! `SEQ_LOCK_FALLBACK` whenever it is taken.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::codec::{Decoded, FrameDecoder};
use super::errors::{LogError, LogResult};
use super::lock::RegionLock;
use super::paths::SessionPaths;
use crate::observability::{log_event, Event};

/// How the writer numbers a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeqStrategy {
    /// `seq` is written as null
    #[default]
    Unsequenced,
    /// Caller-supplied value, written as given
    Explicit(u64),
    /// One past the highest seq found in the active segment
    Scanned,
    /// Next value of the session's durable counter
    Allocated,
}

impl SeqStrategy {
    /// Produces the seq for the next frame of the session.
    pub fn resolve(&self, paths: &SessionPaths, use_lock: bool) -> LogResult<Option<u64>> {
        Ok(match self {
            SeqStrategy::Unsequenced => None,
            SeqStrategy::Explicit(seq) => Some(*seq),
            SeqStrategy::Scanned => Some(next_after(scan_last_seq(&paths.active))),
            SeqStrategy::Allocated => Some(allocate(paths, use_lock)?.seq),
        })
    }

    /// Whether concurrent writers using this strategy never share a seq.
    pub fn is_multi_writer_safe(&self) -> bool {
        matches!(self, SeqStrategy::Allocated)
    }
}

/// Where an allocated seq came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqSource {
    /// The counter file, under lock when locking was requested
    Counter,
    /// Scan of the active segment after the counter lock failed
    ScanFallback,
}

/// An allocated sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub seq: u64,
    pub source: SeqSource,
}

/// Allocates the next seq from the session's counter file.
///
/// With `use_lock`, the read-modify-write happens under an exclusive lock on
/// the counter file and the new value is fsynced before the lock is
/// released. Without it, the counter is still persisted but two writers can
/// read the same value.
pub fn allocate(paths: &SessionPaths, use_lock: bool) -> LogResult<Allocation> {
    if let Some(parent) = paths.seq.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            LogError::io(format!("failed to create log directory {}", parent.display()), e)
        })?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&paths.seq)
        .map_err(|e| {
            LogError::io(format!("failed to open sequence file {}", paths.seq.display()), e)
        })?;

    if !use_lock {
        let mut file = file;
        let seq = bump_counter(&mut file, &paths.seq)?;
        return Ok(Allocation {
            seq,
            source: SeqSource::Counter,
        });
    }

    match RegionLock::lock_file(&paths.seq, file) {
        Ok(mut guard) => {
            let seq = bump_counter(guard.file_mut(), &paths.seq)?;
            guard.release();
            Ok(Allocation {
                seq,
                source: SeqSource::Counter,
            })
        }
        Err((_file, e)) => Ok(lock_failed(paths, &e)),
    }
}

/// Allocation when the counter cannot be locked: logged, then a scan.
fn lock_failed(paths: &SessionPaths, e: &io::Error) -> Allocation {
    let reason = e.to_string();
    log_event(
        Event::SeqLockFallback,
        &[
            ("session_id", paths.session_id()),
            ("reason", reason.as_str()),
        ],
    );
    Allocation {
        seq: next_after(scan_last_seq(&paths.active)),
        source: SeqSource::ScanFallback,
    }
}

/// Reads the stored counter, writes `counter + 1` over it, and syncs.
fn bump_counter(file: &mut File, path: &Path) -> LogResult<u64> {
    let mut raw = Vec::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut raw))
        .map_err(|e| LogError::io(format!("failed to read sequence file {}", path.display()), e))?;

    let next = next_after(parse_counter(&String::from_utf8_lossy(&raw)));

    let rewrite = |file: &mut File| -> io::Result<()> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(next.to_string().as_bytes())?;
        file.flush()
    };
    rewrite(file).map_err(|e| {
        LogError::io(format!("failed to write sequence file {}", path.display()), e)
    })?;

    file.sync_all().map_err(|e| {
        LogError::fsync(format!("failed to sync sequence file {}", path.display()), e)
    })?;

    Ok(next)
}

/// Stored counter value; anything but a plain decimal number counts as absent.
pub fn parse_counter(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

fn next_after(last: Option<u64>) -> u64 {
    last.map_or(0, |s| s.saturating_add(1))
}

/// Highest non-null seq in a segment, best effort.
///
/// Stops quietly at the first truncated or corrupt frame. A missing or empty
/// segment yields `None`. Not safe against concurrent writers: two callers
/// can observe the same value.
pub fn scan_last_seq(segment: &Path) -> Option<u64> {
    let file = match File::open(segment) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            log_scan_failure(segment, &e);
            return None;
        }
    };

    let mut decoder = FrameDecoder::new(BufReader::new(file));
    let mut highest: Option<u64> = None;
    loop {
        match decoder.next_frame() {
            Ok(Decoded::Frame { frame, .. }) => {
                if let Some(seq) = frame.seq {
                    highest = Some(highest.map_or(seq, |h| h.max(seq)));
                }
            }
            Ok(_) => break,
            Err(e) => {
                log_scan_failure(segment, &e);
                break;
            }
        }
    }
    highest
}

fn log_scan_failure(segment: &Path, e: &io::Error) {
    let path = segment.display().to_string();
    let reason = e.to_string();
    log_event(
        Event::SeqScanFailed,
        &[("path", path.as_str()), ("reason", reason.as_str())],
    );
}
