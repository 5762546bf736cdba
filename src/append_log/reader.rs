//! Segment reading
//!
//! Readers take no locks and may run while writers append. A frame that is
//! still being written looks like a truncated tail and ends the file.
//!
//! Damage handling depends on [`ReadMode`]:
//!
//! | Mode      | Truncated tail      | Corrupt frame           |
//! |-----------|---------------------|-------------------------|
//! | `Stop`    | stop file, diagnose | stop file, diagnose     |
//! | `Lenient` | stop file, diagnose | skip frame, diagnose    |
//! | `Strict`  | `LogError::Truncated` | `LogError::Corrupt`   |
//!
//! A truncated tail is never skipped: the length prefix is the only framing,
//! so nothing after it can be located.

use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::codec::{Decoded, FrameDecoder};
use super::errors::{LogError, LogResult};
use super::frame::Frame;
use crate::observability::{log_event, Event};

/// How damaged frames are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    #[default]
    Stop,
    Lenient,
    Strict,
}

/// Frame selection. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameFilter {
    /// Inclusive lower time bound
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper time bound
    pub until: Option<DateTime<Utc>>,
    pub session: Option<String>,
    pub user: Option<String>,
    pub role: Option<String>,
}

impl FrameFilter {
    /// Whether `frame` passes every set criterion.
    ///
    /// Frames whose time cannot be parsed are kept regardless of the time
    /// bounds.
    pub fn matches(&self, frame: &Frame) -> bool {
        if self.since.is_some() || self.until.is_some() {
            if let Some(ts) = frame.timestamp() {
                if self.since.is_some_and(|since| ts < since) {
                    return false;
                }
                if self.until.is_some_and(|until| ts > until) {
                    return false;
                }
            }
        }
        if self.session.as_deref().is_some_and(|s| frame.session_id != s) {
            return false;
        }
        if self.user.as_deref().is_some_and(|u| frame.user_id != u) {
            return false;
        }
        if self.role.as_deref().is_some_and(|r| frame.role != r) {
            return false;
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A break in a file's seq progression
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeqGap {
    pub file: PathBuf,
    pub previous: u64,
    pub current: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Truncated,
    Corrupt,
}

/// A damaged frame found while reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub file: PathBuf,
    /// Offset of the damaged frame's header
    pub offset: u64,
    pub kind: DiagnosticKind,
    pub detail: String,
    /// Whether reading continued past it
    pub skipped: bool,
}

/// Counters for a read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadSummary {
    /// Frames that passed the filter
    pub frames: u64,
    /// Frames per session id
    pub sessions: BTreeMap<String, u64>,
    pub gaps: Vec<SeqGap>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ReadSummary {
    pub fn distinct_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn record(&mut self, frame: &Frame) {
        self.frames += 1;
        *self.sessions.entry(frame.session_id.clone()).or_insert(0) += 1;
    }
}

/// Tracks the last non-null seq of one file.
#[derive(Debug, Default)]
pub struct GapTracker {
    previous: Option<u64>,
}

impl GapTracker {
    /// Feeds the next seq and returns `(previous, current)` on a break.
    /// Null seqs are ignored.
    pub fn observe(&mut self, seq: Option<u64>) -> Option<(u64, u64)> {
        let current = seq?;
        let gap = match self.previous {
            Some(previous) if previous.checked_add(1) != Some(current) => {
                Some((previous, current))
            }
            _ => None,
        };
        self.previous = Some(current);
        gap
    }
}

/// Frames of one segment, with damage handled per [`ReadMode`].
pub struct SegmentReader<R> {
    path: PathBuf,
    decoder: FrameDecoder<R>,
    mode: ReadMode,
    diagnostics: Vec<Diagnostic>,
    done: bool,
}

impl SegmentReader<BufReader<File>> {
    /// Opens a segment file for reading from its start.
    pub fn open(path: &Path, mode: ReadMode) -> LogResult<Self> {
        let file = File::open(path)
            .map_err(|e| LogError::io(format!("failed to open segment {}", path.display()), e))?;
        Ok(Self::new(path, BufReader::new(file), mode))
    }
}

impl<R: Read> SegmentReader<R> {
    /// Reads segment bytes from `reader`, labelled `path` in diagnostics.
    pub fn new(path: impl Into<PathBuf>, reader: R, mode: ReadMode) -> Self {
        Self {
            path: path.into(),
            decoder: FrameDecoder::new(reader),
            mode,
            diagnostics: Vec::new(),
            done: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Moves out the diagnostics collected so far.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    fn diagnose(&mut self, kind: DiagnosticKind, offset: u64, detail: String, skipped: bool) {
        let file = self.path.display().to_string();
        let offset_str = offset.to_string();
        let event = match kind {
            DiagnosticKind::Truncated => Event::FrameTruncated,
            DiagnosticKind::Corrupt => Event::FrameCorrupt,
        };
        log_event(
            event,
            &[
                ("path", file.as_str()),
                ("offset", offset_str.as_str()),
                ("detail", detail.as_str()),
            ],
        );
        self.diagnostics.push(Diagnostic {
            file: self.path.clone(),
            offset,
            kind,
            detail,
            skipped,
        });
    }
}

impl<R: Read> Iterator for SegmentReader<R> {
    type Item = LogResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            let step = match self.decoder.next_frame() {
                Ok(step) => step,
                Err(e) => {
                    self.done = true;
                    return Some(Err(LogError::io(
                        format!("failed to read segment {}", self.path.display()),
                        e,
                    )));
                }
            };

            match step {
                Decoded::Frame { frame, .. } => return Some(Ok(frame)),
                Decoded::Eof { partial_header } => {
                    self.done = true;
                    if partial_header > 0 {
                        let file = self.path.display().to_string();
                        let bytes = partial_header.to_string();
                        log_event(
                            Event::PartialHeader,
                            &[("path", file.as_str()), ("bytes", bytes.as_str())],
                        );
                    }
                    return None;
                }
                Decoded::Truncated {
                    offset,
                    declared,
                    available,
                } => {
                    self.done = true;
                    if self.mode == ReadMode::Strict {
                        return Some(Err(LogError::Truncated {
                            path: self.path.clone(),
                            offset,
                            declared,
                            available,
                        }));
                    }
                    let detail = format!("declared {} bytes, {} available", declared, available);
                    self.diagnose(DiagnosticKind::Truncated, offset, detail, false);
                    return None;
                }
                Decoded::Corrupt { offset, reason, .. } => match self.mode {
                    ReadMode::Strict => {
                        self.done = true;
                        return Some(Err(LogError::Corrupt {
                            path: self.path.clone(),
                            offset,
                            reason,
                        }));
                    }
                    ReadMode::Stop => {
                        self.done = true;
                        self.diagnose(DiagnosticKind::Corrupt, offset, reason, false);
                        return None;
                    }
                    ReadMode::Lenient => {
                        self.diagnose(DiagnosticKind::Corrupt, offset, reason, true);
                    }
                },
            }
        }
    }
}

/// Filtered frames across a list of segment files, in the given order.
///
/// Lazy and single-pass. A file that cannot be opened yields one error item
/// and the stream moves on to the next path.
pub struct LogStream {
    pending: VecDeque<PathBuf>,
    current: Option<SegmentReader<BufReader<File>>>,
    filter: FrameFilter,
    mode: ReadMode,
    detect_gaps: bool,
    gaps: GapTracker,
    summary: ReadSummary,
    completed: bool,
}

impl LogStream {
    pub fn open<I, P>(paths: I, filter: FrameFilter, mode: ReadMode, detect_gaps: bool) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            pending: paths.into_iter().map(Into::into).collect(),
            current: None,
            filter,
            mode,
            detect_gaps,
            gaps: GapTracker::default(),
            summary: ReadSummary::default(),
            completed: false,
        }
    }

    /// Counters for everything yielded so far.
    pub fn summary(&self) -> &ReadSummary {
        &self.summary
    }

    pub fn into_summary(self) -> ReadSummary {
        self.summary
    }

    fn complete(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let frames = self.summary.frames.to_string();
        let gaps = self.summary.gaps.len().to_string();
        let diagnostics = self.summary.diagnostics.len().to_string();
        log_event(
            Event::ReadComplete,
            &[
                ("frames", frames.as_str()),
                ("gaps", gaps.as_str()),
                ("diagnostics", diagnostics.as_str()),
            ],
        );
    }
}

impl Iterator for LogStream {
    type Item = LogResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                let Some(path) = self.pending.pop_front() else {
                    self.complete();
                    return None;
                };
                self.gaps = GapTracker::default();
                match SegmentReader::open(&path, self.mode) {
                    Ok(reader) => self.current = Some(reader),
                    Err(e) => return Some(Err(e)),
                }
            }

            let reader = self.current.as_mut()?;
            let item = reader.next();

            let frame = match item {
                Some(Ok(frame)) => frame,
                other => {
                    self.summary.diagnostics.extend(reader.take_diagnostics());
                    self.current = None;
                    match other {
                        Some(Err(e)) => return Some(Err(e)),
                        _ => continue,
                    }
                }
            };

            if !self.filter.matches(&frame) {
                continue;
            }

            if self.detect_gaps {
                if let Some((previous, current)) = self.gaps.observe(frame.seq) {
                    let file = reader.path().to_path_buf();
                    self.summary.gaps.push(SeqGap {
                        file,
                        previous,
                        current,
                    });
                }
            }

            self.summary.record(&frame);
            return Some(Ok(frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::append_log::codec::encode;
    use crate::append_log::frame::FrameFields;
    use std::fs;
    use tempfile::TempDir;

    fn frame(session: &str, user: &str, role: &str, seq: Option<u64>, time: &str) -> Frame {
        let mut frame = Frame::new(session, FrameFields::new(user, "c").with_role(role), seq);
        frame.time = time.to_string();
        frame
    }

    fn seq_frame(seq: Option<u64>) -> Frame {
        frame("s1", "u", "user", seq, "2024-05-01T00:00:00+00:00")
    }

    fn write_segment(path: &Path, frames: &[Frame]) {
        let mut buf = Vec::new();
        for f in frames {
            buf.extend_from_slice(&encode(f).unwrap());
        }
        fs::write(path, buf).unwrap();
    }

    fn corrupt_record() -> Vec<u8> {
        let mut buf = 3u32.to_be_bytes().to_vec();
        buf.extend_from_slice(&[0xff, 0xff, 0xff]);
        buf
    }

    #[test]
    fn test_gap_tracker() {
        let mut tracker = GapTracker::default();
        let gaps: Vec<_> = [Some(0), Some(1), None, Some(3), Some(4)]
            .into_iter()
            .filter_map(|s| tracker.observe(s))
            .collect();
        assert_eq!(gaps, vec![(1, 3)]);
    }

    #[test]
    fn test_detects_gaps_with_and_without_nulls() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.log");
        let b = temp_dir.path().join("b.log");
        write_segment(&a, &[0, 1, 3, 4].map(|s| seq_frame(Some(s))));
        write_segment(
            &b,
            &[Some(0), Some(1), None, Some(3)].map(seq_frame),
        );

        for path in [&a, &b] {
            let mut stream = LogStream::open([path], FrameFilter::default(), ReadMode::Stop, true);
            let frames: Vec<_> = stream.by_ref().collect::<LogResult<_>>().unwrap();
            assert_eq!(frames.len(), 4);
            let summary = stream.into_summary();
            assert_eq!(
                summary.gaps,
                vec![SeqGap {
                    file: path.clone(),
                    previous: 1,
                    current: 3
                }]
            );
        }
    }

    #[test]
    fn test_gap_tracking_resets_per_file() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.log");
        let b = temp_dir.path().join("b.log");
        write_segment(&a, &[0, 1].map(|s| seq_frame(Some(s))));
        write_segment(&b, &[7, 8].map(|s| seq_frame(Some(s))));

        let mut stream = LogStream::open([&a, &b], FrameFilter::default(), ReadMode::Stop, true);
        assert_eq!(stream.by_ref().count(), 4);
        assert!(stream.summary().gaps.is_empty());
    }

    #[test]
    fn test_filters() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mixed.log");
        write_segment(
            &path,
            &[
                frame("s1", "alice", "user", Some(0), "2024-05-01T10:00:00+00:00"),
                frame("s1", "bot", "assistant", Some(1), "2024-05-01T11:00:00Z"),
                frame("s2", "alice", "user", Some(0), "2024-05-02T10:00:00+00:00"),
                frame("s2", "alice", "user", Some(1), "not a time"),
            ],
        );

        let read = |filter: FrameFilter| -> Vec<Frame> {
            LogStream::open([&path], filter, ReadMode::Stop, false)
                .collect::<LogResult<_>>()
                .unwrap()
        };

        assert_eq!(read(FrameFilter::default()).len(), 4);

        let by_user = read(FrameFilter {
            user: Some("alice".into()),
            ..Default::default()
        });
        assert_eq!(by_user.len(), 3);

        let by_role_and_session = read(FrameFilter {
            session: Some("s1".into()),
            role: Some("assistant".into()),
            ..Default::default()
        });
        assert_eq!(by_role_and_session.len(), 1);
        assert_eq!(by_role_and_session[0].user_id, "bot");

        // Inclusive bounds; the unparseable time is kept
        let window = read(FrameFilter {
            since: crate::append_log::frame::parse_timestamp("2024-05-01T11:00:00Z"),
            until: crate::append_log::frame::parse_timestamp("2024-05-01T23:59:59"),
            ..Default::default()
        });
        let seqs: Vec<_> = window.iter().map(|f| (f.session_id.as_str(), f.seq)).collect();
        assert_eq!(seqs, vec![("s1", Some(1)), ("s2", Some(1))]);
    }

    #[test]
    fn test_summary_counts_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("s.log");
        write_segment(
            &path,
            &[
                frame("s1", "u", "user", None, "2024-05-01T00:00:00Z"),
                frame("s2", "u", "user", None, "2024-05-01T00:00:00Z"),
                frame("s1", "u", "user", None, "2024-05-01T00:00:00Z"),
            ],
        );

        let mut stream = LogStream::open([&path], FrameFilter::default(), ReadMode::Stop, false);
        stream.by_ref().for_each(drop);
        let summary = stream.into_summary();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.distinct_sessions(), 2);
        assert_eq!(summary.sessions["s1"], 2);
    }

    #[test]
    fn test_corrupt_frame_per_mode() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("c.log");
        let mut bytes = encode(&seq_frame(Some(0))).unwrap();
        let corrupt_offset = bytes.len() as u64;
        bytes.extend_from_slice(&corrupt_record());
        bytes.extend_from_slice(&encode(&seq_frame(Some(1))).unwrap());
        fs::write(&path, &bytes).unwrap();

        let mut stop = LogStream::open([&path], FrameFilter::default(), ReadMode::Stop, false);
        assert_eq!(stop.by_ref().filter_map(Result::ok).count(), 1);
        let diags = stop.into_summary().diagnostics;
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].offset, corrupt_offset);
        assert!(!diags[0].skipped);

        let mut lenient = LogStream::open([&path], FrameFilter::default(), ReadMode::Lenient, false);
        let seqs: Vec<_> = lenient.by_ref().map(|f| f.unwrap().seq).collect();
        assert_eq!(seqs, vec![Some(0), Some(1)]);
        let diags = lenient.into_summary().diagnostics;
        assert_eq!(diags[0].kind, DiagnosticKind::Corrupt);
        assert!(diags[0].skipped);

        let strict: Vec<_> =
            LogStream::open([&path], FrameFilter::default(), ReadMode::Strict, false).collect();
        assert_eq!(strict.len(), 2);
        assert!(strict[0].is_ok());
        match &strict[1] {
            Err(LogError::Corrupt { offset, .. }) => assert_eq!(*offset, corrupt_offset),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncated_tail_per_mode() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("t.log");
        let mut bytes = encode(&seq_frame(Some(0))).unwrap();
        let tail_offset = bytes.len() as u64;
        let second = encode(&seq_frame(Some(1))).unwrap();
        bytes.extend_from_slice(&second[..second.len() - 1]);
        fs::write(&path, &bytes).unwrap();

        for mode in [ReadMode::Stop, ReadMode::Lenient] {
            let mut stream = LogStream::open([&path], FrameFilter::default(), mode, false);
            let frames: Vec<_> = stream.by_ref().collect::<LogResult<_>>().unwrap();
            assert_eq!(frames.len(), 1);
            let diags = stream.into_summary().diagnostics;
            assert_eq!(diags[0].kind, DiagnosticKind::Truncated);
            assert_eq!(diags[0].offset, tail_offset);
        }

        let strict: Vec<_> =
            LogStream::open([&path], FrameFilter::default(), ReadMode::Strict, false).collect();
        assert!(matches!(
            strict.last(),
            Some(Err(LogError::Truncated { offset, .. })) if *offset == tail_offset
        ));
    }

    #[test]
    fn test_missing_file_yields_error_then_continues() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.log");
        let present = temp_dir.path().join("present.log");
        write_segment(&present, &[seq_frame(Some(0))]);

        let items: Vec<_> =
            LogStream::open([&missing, &present], FrameFilter::default(), ReadMode::Stop, false)
                .collect();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Err(LogError::Io { .. })));
        assert_eq!(items[1].as_ref().unwrap().seq, Some(0));
    }

    #[test]
    fn test_segment_reader_over_memory() {
        let mut bytes = encode(&seq_frame(Some(4))).unwrap();
        bytes.extend_from_slice(&[0, 0, 1]);

        let mut reader = SegmentReader::new("mem", bytes.as_slice(), ReadMode::Stop);
        assert_eq!(reader.next().unwrap().unwrap().seq, Some(4));
        assert!(reader.next().is_none());
        assert!(reader.diagnostics().is_empty());
        assert_eq!(reader.path(), Path::new("mem"));
    }
}
