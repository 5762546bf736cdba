//! Segment rotation
//!
//! Rotation seals the active segment by moving it to a `.log` name and
//! hands the sealed path to the notifier. The next append creates a fresh
//! active segment.
//!
//! The decision is double-checked:
//!
//! 1. An unlocked size/age look at the active segment. Most appends stop
//!    here and never touch the lock.
//! 2. With locking enabled, a non-blocking try on the rotation lock. If some
//!    other writer holds it, that writer is rotating and this one skips.
//! 3. Under the lock, the same look again. The segment may already be gone
//!    (rotated by the previous holder) or replaced by a small fresh one.
//!
//! Sealing never overwrites, even between writers that skip the lock: a name
//! collision moves on to a timestamped and then counted name.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use super::errors::{LogError, LogResult};
use super::lock::RegionLock;
use super::notify::SegmentNotifier;
use super::paths::SessionPaths;
use crate::observability::{log_event, Event};

/// Default size threshold: 64 MiB
pub const DEFAULT_MAX_SIZE: u64 = 64 * 1024 * 1024;
/// Default age threshold: 10 minutes
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);

/// When the active segment is due for sealing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Seal once the segment holds at least this many bytes
    pub max_size: u64,
    /// Seal once the segment was last modified at least this long ago
    pub max_age: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

impl RotationPolicy {
    pub fn new(max_size: u64, max_age: Duration) -> Self {
        Self { max_size, max_age }
    }

    /// Whether a segment of `size` bytes last modified `age` ago is due.
    pub fn is_due(&self, size: u64, age: Duration) -> bool {
        size >= self.max_size || age >= self.max_age
    }
}

/// What the rotation check did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// Nothing to do
    None,
    /// The active segment was sealed under this path
    Rotated(PathBuf),
    /// Rotation looked due but another writer holds the rotation lock
    Contended,
    /// Rotation looked due but the active segment was gone on re-check
    Vanished,
}

impl RotationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationOutcome::None => "none",
            RotationOutcome::Rotated(_) => "rotated",
            RotationOutcome::Contended => "contended",
            RotationOutcome::Vanished => "vanished",
        }
    }

    /// Sealed path, when a seal happened.
    pub fn sealed(&self) -> Option<&Path> {
        match self {
            RotationOutcome::Rotated(path) => Some(path),
            _ => None,
        }
    }
}

/// Outcome plus the rotation lock, if it was taken.
///
/// The writer keeps the guard until its append is done so no other writer
/// seals the fresh segment before its first frame lands.
#[derive(Debug)]
pub struct RotationDecision {
    pub outcome: RotationOutcome,
    guard: Option<RegionLock>,
}

impl RotationDecision {
    fn unlocked(outcome: RotationOutcome) -> Self {
        Self {
            outcome,
            guard: None,
        }
    }

    /// Whether the rotation lock is held.
    pub fn holds_lock(&self) -> bool {
        self.guard.is_some()
    }

    pub fn into_parts(self) -> (RotationOutcome, Option<RegionLock>) {
        (self.outcome, self.guard)
    }
}

/// Size and age of an existing segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SegmentState {
    size: u64,
    age: Duration,
}

fn inspect(active: &Path) -> LogResult<Option<SegmentState>> {
    let metadata = match fs::metadata(active) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(LogError::io(
                format!("failed to stat active segment {}", active.display()),
                e,
            ))
        }
    };

    let age = metadata
        .modified()
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
        .unwrap_or(Duration::ZERO);

    Ok(Some(SegmentState {
        size: metadata.len(),
        age,
    }))
}

/// Seals the active segment if the policy says it is due.
///
/// A notifier failure is logged and ignored unless `strict_queue` is set, in
/// which case it is returned as [`LogError::QueueFailed`] after the seal has
/// already happened. The sealed file stays on disk either way.
pub fn maybe_rotate<N: SegmentNotifier + ?Sized>(
    paths: &SessionPaths,
    policy: &RotationPolicy,
    use_lock: bool,
    notifier: &N,
    strict_queue: bool,
) -> LogResult<RotationDecision> {
    match inspect(&paths.active)? {
        Some(state) if policy.is_due(state.size, state.age) => {}
        _ => return Ok(RotationDecision::unlocked(RotationOutcome::None)),
    }

    let mut guard = None;
    if use_lock {
        let Some(mut lock) = RegionLock::try_acquire(&paths.lock)? else {
            log_event(Event::RotationContended, &[("session_id", paths.session_id())]);
            return Ok(RotationDecision::unlocked(RotationOutcome::Contended));
        };
        // Diagnostic only
        let _ = lock.stamp_holder();

        match inspect(&paths.active)? {
            None => {
                log_event(Event::RotationVanished, &[("session_id", paths.session_id())]);
                return Ok(RotationDecision {
                    outcome: RotationOutcome::Vanished,
                    guard: Some(lock),
                });
            }
            Some(state) if !policy.is_due(state.size, state.age) => {
                return Ok(RotationDecision {
                    outcome: RotationOutcome::None,
                    guard: Some(lock),
                });
            }
            Some(_) => guard = Some(lock),
        }
    }

    let Some(sealed) = seal(paths)? else {
        log_event(Event::RotationVanished, &[("session_id", paths.session_id())]);
        return Ok(RotationDecision {
            outcome: RotationOutcome::Vanished,
            guard,
        });
    };

    let sealed_str = sealed.display().to_string();
    log_event(
        Event::SegmentSealed,
        &[("session_id", paths.session_id()), ("sealed", sealed_str.as_str())],
    );

    if let Err(e) = notifier.segment_sealed(&sealed) {
        let reason = e.to_string();
        log_event(
            Event::SegmentQueueFailed,
            &[
                ("sealed", sealed_str.as_str()),
                ("reason", reason.as_str()),
                ("strict", if strict_queue { "true" } else { "false" }),
            ],
        );
        if strict_queue {
            drop(guard);
            return Err(LogError::QueueFailed { sealed, reason });
        }
    }

    Ok(RotationDecision {
        outcome: RotationOutcome::Rotated(sealed),
        guard,
    })
}

/// Moves the active segment to the first free sealed name.
///
/// Two steps, both safe without the rotation lock:
///
/// 1. Rename the active segment to a name private to this call. Exactly one
///    of several racing writers gets a given active segment.
/// 2. Hard-link the private name to a sealed candidate. `link` refuses an
///    existing target, so a taken name moves on to the next candidate.
///
/// Returns `None` if the active segment disappeared before step 1, which
/// happens when an unlocked writer loses a rotation race.
pub fn seal(paths: &SessionPaths) -> LogResult<Option<PathBuf>> {
    let claimed = paths.sealing_name(&Uuid::new_v4().simple().to_string());
    match fs::rename(&paths.active, &claimed) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(LogError::io(
                format!("failed to claim {} for sealing", paths.active.display()),
                e,
            ))
        }
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    for attempt in 0u32.. {
        let candidate = paths.sealed_candidate(now, attempt);
        match fs::hard_link(&claimed, &candidate) {
            Ok(()) => {
                fs::remove_file(&claimed).map_err(|e| {
                    LogError::io(format!("failed to remove {}", claimed.display()), e)
                })?;
                sync_dir(paths.dir())?;
                return Ok(Some(candidate));
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(LogError::io(
                    format!(
                        "failed to seal {} as {}",
                        claimed.display(),
                        candidate.display()
                    ),
                    e,
                ))
            }
        }
    }

    Err(LogError::io(
        format!("no free sealed name for {}", paths.active.display()),
        io::Error::from(io::ErrorKind::AlreadyExists),
    ))
}

/// Makes a rename in `dir` durable.
fn sync_dir(dir: &Path) -> LogResult<()> {
    #[cfg(unix)]
    {
        let handle = File::open(dir).map_err(|e| {
            LogError::io(format!("failed to open log directory {}", dir.display()), e)
        })?;
        handle.sync_all().map_err(|e| {
            LogError::fsync(format!("failed to sync log directory {}", dir.display()), e)
        })?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
