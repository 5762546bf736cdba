//! Session path resolution
//!
//! Every writer derives the same file names from the same raw session id, so
//! independent processes agree on the active segment, lock file and sequence
//! counter without talking to each other.
//!
//! Layout inside the log directory, for sanitized id `<id>`:
//!
//! ```text
//! session_<id>.logtmp          active segment (appendable)
//! session_<id>.log             sealed segment
//! session_<id>_<unix>.log      sealed segment, name collision
//! session_<id>_<unix>_<n>.log  sealed segment, repeated collision
//! session_<id>.lock            rotation lock
//! session_<id>.seq             sequence counter
//! .session_<id>.<tok>.sealing  segment claimed by a seal in progress
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Suffix of the appendable segment
pub const ACTIVE_SUFFIX: &str = "logtmp";
/// Suffix of immutable, rotated-out segments
pub const SEALED_SUFFIX: &str = "log";
/// Suffix of the rotation lock file
pub const LOCK_SUFFIX: &str = "lock";
/// Suffix of the sequence counter file
pub const SEQ_SUFFIX: &str = "seq";
/// Extension of a segment claimed by an in-progress seal
pub const SEALING_SUFFIX: &str = "sealing";

/// Id used when sanitization leaves nothing
pub const DEFAULT_SESSION_ID: &str = "session";
/// Upper bound on a sanitized id, in characters
pub const MAX_SESSION_ID_LEN: usize = 120;

static UNSAFE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static regex"));
static DOT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{2,}").expect("static regex"));
static DASH_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-{2,}").expect("static regex"));

/// Maps an arbitrary session id onto a bounded, filesystem-safe name.
///
/// The result only contains `[A-Za-z0-9._-]`, never contains `..`, never
/// starts or ends with `-`, is at most 120 characters, and is a fixed point:
/// sanitizing it again returns it unchanged.
pub fn sanitize_session_id(raw: &str) -> String {
    let cleaned = UNSAFE_RUN.replace_all(raw, "-");
    let cleaned = DOT_RUN.replace_all(&cleaned, "-");
    let cleaned = DASH_RUN.replace_all(&cleaned, "-");
    let trimmed = cleaned.trim_matches('-');

    // Only ASCII survives the first pass, so byte slicing is char-aligned
    let bounded = &trimmed[..trimmed.len().min(MAX_SESSION_ID_LEN)];
    let bounded = bounded.trim_end_matches('-');

    if bounded.is_empty() {
        DEFAULT_SESSION_ID.to_string()
    } else {
        bounded.to_string()
    }
}

/// The files belonging to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    session_id: String,
    dir: PathBuf,
    /// Active segment
    pub active: PathBuf,
    /// Rotation lock
    pub lock: PathBuf,
    /// Sequence counter
    pub seq: PathBuf,
}

impl SessionPaths {
    /// Sanitizes `raw_session_id` and derives the session's paths under `dir`.
    pub fn resolve(dir: &Path, raw_session_id: &str) -> Self {
        let session_id = sanitize_session_id(raw_session_id);
        let stem = format!("session_{}", session_id);

        Self {
            active: dir.join(format!("{}.{}", stem, ACTIVE_SUFFIX)),
            lock: dir.join(format!("{}.{}", stem, LOCK_SUFFIX)),
            seq: dir.join(format!("{}.{}", stem, SEQ_SUFFIX)),
            dir: dir.to_path_buf(),
            session_id,
        }
    }

    /// The sanitized session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The log directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Hidden name a seal moves the active segment to before linking it.
    pub fn sealing_name(&self, token: &str) -> PathBuf {
        self.dir.join(format!(
            ".session_{}.{}.{}",
            self.session_id, token, SEALING_SUFFIX
        ))
    }

    /// Candidate name for the `attempt`-th seal try at `unix_secs`.
    ///
    /// Attempt 0 is the plain sealed name, attempt 1 adds the timestamp,
    /// later attempts add a counter as well.
    pub fn sealed_candidate(&self, unix_secs: u64, attempt: u32) -> PathBuf {
        let stem = format!("session_{}", self.session_id);
        let name = match attempt {
            0 => format!("{}.{}", stem, SEALED_SUFFIX),
            1 => format!("{}_{}.{}", stem, unix_secs, SEALED_SUFFIX),
            n => format!("{}_{}_{}.{}", stem, unix_secs, n - 1, SEALED_SUFFIX),
        };
        self.dir.join(name)
    }
}
