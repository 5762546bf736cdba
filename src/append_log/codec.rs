//! Frame codec
//!
//! Wire format, repeated until end of file:
//!
//! ```text
//! [length: u32 big-endian][payload: CBOR map, `length` bytes]
//! ```
//!
//! Decoding never fails on a damaged tail. It reports one of four outcomes:
//! a frame, a clean end (including a partial length header left by a writer
//! that crashed mid-append), a truncated payload, or a corrupt payload.
//! Because the header of a corrupt frame is intact, the decoder has already
//! moved past it and the next call starts at the following frame.

use std::io::{self, Cursor, Read};

use thiserror::Error;

use super::frame::Frame;

/// Size of the length prefix
pub const HEADER_LEN: usize = 4;

/// Frame codec errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("payload of {0} bytes exceeds the 4-byte length prefix")]
    TooLarge(usize),

    #[error("serialize failed: {0}")]
    Serialize(String),

    #[error("deserialize failed: {0}")]
    Deserialize(String),

    #[error("{0} trailing bytes after frame object")]
    TrailingBytes(u64),
}

pub type FrameResult<T> = Result<T, FrameError>;

/// Serializes a frame without the length prefix.
pub fn encode_payload(frame: &Frame) -> FrameResult<Vec<u8>> {
    let mut payload = Vec::with_capacity(128 + frame.content.len());
    ciborium::ser::into_writer(frame, &mut payload)
        .map_err(|e| FrameError::Serialize(e.to_string()))?;
    Ok(payload)
}

/// Serializes a frame as `[length][payload]`, ready for a single append.
pub fn encode(frame: &Frame) -> FrameResult<Vec<u8>> {
    let payload = encode_payload(frame)?;
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge(payload.len()))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Deserializes one payload. The whole slice must be a single frame object.
pub fn decode_payload(payload: &[u8]) -> FrameResult<Frame> {
    let mut cursor = Cursor::new(payload);
    let frame: Frame = ciborium::de::from_reader(&mut cursor)
        .map_err(|e| FrameError::Deserialize(e.to_string()))?;

    let consumed = cursor.position();
    let total = payload.len() as u64;
    if consumed != total {
        return Err(FrameError::TrailingBytes(total - consumed));
    }
    Ok(frame)
}

/// Result of one decode step
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A complete, valid frame starting at `offset` with a `len`-byte payload
    Frame { frame: Frame, offset: u64, len: u64 },
    /// No further frames. `partial_header` counts stray bytes (< 4) at the tail.
    Eof { partial_header: usize },
    /// The header at `offset` declares more bytes than remain
    Truncated {
        offset: u64,
        declared: u64,
        available: u64,
    },
    /// The payload at `offset` is complete but not a valid frame
    Corrupt { offset: u64, len: u64, reason: String },
}

/// Resumable frame decoder over any byte source.
pub struct FrameDecoder<R> {
    reader: R,
    offset: u64,
    finished: bool,
}

impl<R: Read> FrameDecoder<R> {
    /// Decoder positioned at the start of a segment.
    pub fn new(reader: R) -> Self {
        Self::with_offset(reader, 0)
    }

    /// Decoder whose `reader` is already positioned at byte `offset`.
    pub fn with_offset(reader: R, offset: u64) -> Self {
        Self {
            reader,
            offset,
            finished: false,
        }
    }

    /// Byte offset of the next frame header.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Decodes the next frame.
    ///
    /// After `Eof` or `Truncated` every further call returns `Eof`.
    /// Only genuine read failures are returned as `Err`.
    pub fn next_frame(&mut self) -> io::Result<Decoded> {
        if self.finished {
            return Ok(Decoded::Eof { partial_header: 0 });
        }

        let mut header = [0u8; HEADER_LEN];
        let got = read_up_to(&mut self.reader, &mut header)?;
        if got < HEADER_LEN {
            self.finished = true;
            return Ok(Decoded::Eof {
                partial_header: got,
            });
        }

        let start = self.offset;
        let declared = u64::from(u32::from_be_bytes(header));

        let mut payload = Vec::new();
        let available = (&mut self.reader).take(declared).read_to_end(&mut payload)? as u64;
        if available < declared {
            self.finished = true;
            return Ok(Decoded::Truncated {
                offset: start,
                declared,
                available,
            });
        }

        self.offset += HEADER_LEN as u64 + declared;

        Ok(match decode_payload(&payload) {
            Ok(frame) => Decoded::Frame {
                frame,
                offset: start,
                len: declared,
            },
            Err(e) => Decoded::Corrupt {
                offset: start,
                len: declared,
                reason: e.to_string(),
            },
        })
    }
}

/// Decodes the frame starting at `offset` within an in-memory segment.
pub fn decode_at(buf: &[u8], offset: u64) -> Decoded {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(buf.len());
    let mut decoder = FrameDecoder::with_offset(&buf[start..], offset);
    // Reading from a slice cannot fail
    decoder
        .next_frame()
        .unwrap_or(Decoded::Eof { partial_header: 0 })
}

/// Fills `buf` until it is full or the source is exhausted.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
