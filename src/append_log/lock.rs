//! Exclusive region guard backed by an advisory file lock
//!
//! The guard protects side-state decisions only (rotation, counter
//! read-modify-write). It never protects segment data: appends rely on
//! O_APPEND. Advisory locks are cooperative, so a process that does not ask
//! for the lock is not stopped by it.
//!
//! The guard is not reentrant. Locks are held per open file description, so
//! a second `acquire` on the same path from the same process blocks (and a
//! second `try_acquire` reports contention) exactly as it would from another
//! process.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use super::errors::{LogError, LogResult};
use super::frame::now_rfc3339;

/// An exclusive, process-wide-visible lock on one file. Unlocks on drop.
#[derive(Debug)]
pub struct RegionLock {
    path: PathBuf,
    file: File,
}

impl RegionLock {
    /// Blocks until the lock on `path` is held. Creates the file if needed.
    pub fn acquire(path: &Path) -> LogResult<Self> {
        let file = open_lock_file(path)?;
        FileExt::lock_exclusive(&file).map_err(|source| LogError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::held(path, file))
    }

    /// Takes the lock if it is free.
    ///
    /// Returns `Ok(None)` when another holder has it. Errors are reserved for
    /// failures other than contention (for example, no lock support).
    pub fn try_acquire(path: &Path) -> LogResult<Option<Self>> {
        let file = open_lock_file(path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self::held(path, file))),
            Err(e) if is_contended(&e) => Ok(None),
            Err(source) => Err(LogError::Lock {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Wraps an already-open file after locking it, for callers that need to
    /// read and write the locked file itself (the sequence counter).
    pub(crate) fn lock_file(path: &Path, file: File) -> Result<Self, (File, io::Error)> {
        match FileExt::lock_exclusive(&file) {
            Ok(()) => Ok(Self::held(path, file)),
            Err(e) => Err((file, e)),
        }
    }

    fn held(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            file,
        }
    }

    /// Records the holder's pid and time in the lock file for diagnosis.
    pub fn stamp_holder(&mut self) -> LogResult<()> {
        let stamp = serde_json::json!({
            "pid": std::process::id(),
            "time": now_rfc3339(),
        });
        let rewrite = |file: &mut File| -> io::Result<()> {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            writeln!(file, "{}", stamp)?;
            file.flush()
        };
        rewrite(&mut self.file).map_err(|e| {
            LogError::io(format!("failed to stamp lock file {}", self.path.display()), e)
        })
    }

    /// Path of the locked file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The locked file handle.
    pub(crate) fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Releases the lock now instead of at drop.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for RegionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs4::lock_contended_error().raw_os_error()
}

fn open_lock_file(path: &Path) -> LogResult<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| LogError::io(format!("failed to open lock file {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_try_acquire_reports_contention() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("session_a.lock");

        let held = RegionLock::try_acquire(&path).unwrap().expect("lock is free");
        assert!(RegionLock::try_acquire(&path).unwrap().is_none());

        held.release();
        assert!(RegionLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_only_contention_maps_to_none() {
        assert!(is_contended(&fs4::lock_contended_error()));
        assert!(is_contended(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_contended(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn test_drop_releases() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("session_b.lock");

        {
            let _guard = RegionLock::acquire(&path).unwrap();
            assert!(RegionLock::try_acquire(&path).unwrap().is_none());
        }
        assert!(RegionLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_stamp_holder_writes_pid() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("session_c.lock");

        let mut guard = RegionLock::acquire(&path).unwrap();
        guard.stamp_holder().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["pid"], std::process::id());
        assert_eq!(guard.path(), path.as_path());
    }

    #[test]
    fn test_acquire_creates_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fresh.lock");
        assert!(!path.exists());

        let _guard = RegionLock::acquire(&path).unwrap();
        assert!(path.exists());
    }
}
