//! Append-only session log
//!
//! Each chat session gets its own directory-local segment file. Independent
//! writer processes append length-prefixed frames to it without coordinating,
//! and an active segment is sealed under a new name once it grows too large
//! or too old. Sealed segment paths go to a queue collaborator for
//! downstream ingestion.
//!
//! # Guarantees
//!
//! - One `write` per frame on an O_APPEND handle: frames never interleave
//! - No writer opens a sealed segment. A writer that opened the active
//!   segment just before it was sealed may still land its frame there.
//! - Sealing never overwrites an existing sealed segment
//! - Readers stop cleanly at a torn tail and report where it is
//! - With the allocator and locking, seq values per session are unique
//!
//! # Not guaranteed
//!
//! - Durability without an fsync mode
//! - Atomic appends on network filesystems
//! - Unique seq values from `Scanned` numbering under concurrency

mod codec;
mod emit;
mod errors;
mod frame;
mod lock;
mod notify;
mod paths;
mod reader;
mod rotation;
mod sequence;
mod writer;

pub use codec::{decode_at, decode_payload, encode, encode_payload, Decoded, FrameDecoder, FrameError, HEADER_LEN};
pub use emit::{FrameEmitter, OutputFormat};
pub use errors::{LogError, LogErrorCode, LogResult};
pub use frame::{now_rfc3339, parse_timestamp, Frame, FrameFields, DEFAULT_ROLE, FRAME_VERSION};
pub use lock::RegionLock;
pub use notify::{LogNotifier, MemoryNotifier, NotifyError, SegmentNotifier, SpoolNotifier};
pub use paths::{sanitize_session_id, SessionPaths, MAX_SESSION_ID_LEN};
pub use reader::{
    Diagnostic, DiagnosticKind, FrameFilter, GapTracker, LogStream, ReadMode, ReadSummary,
    SegmentReader, SeqGap,
};
pub use rotation::{maybe_rotate, seal, RotationDecision, RotationOutcome, RotationPolicy};
pub use sequence::{allocate, scan_last_seq, Allocation, SeqSource, SeqStrategy};
pub use writer::{AppendOptions, AppendReceipt, Durability, LogWriter};
