//! Frame re-emission for the read command

use std::io::Write;

use super::codec::encode;
use super::errors::{LogError, LogResult};
use super::frame::Frame;

/// Output encoding for frames that passed a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One compact JSON object per line
    #[default]
    Jsonl,
    /// Indented JSON, one object after another
    Pretty,
    /// Length-prefixed frames; the output is itself a valid segment
    Binary,
}

/// Writes frames to `out` in one format.
pub struct FrameEmitter<W: Write> {
    out: W,
    format: OutputFormat,
}

impl<W: Write> FrameEmitter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    pub fn emit(&mut self, frame: &Frame) -> LogResult<()> {
        let bytes = match self.format {
            OutputFormat::Jsonl => {
                let mut line =
                    serde_json::to_vec(frame).map_err(|e| LogError::Encode(e.to_string()))?;
                line.push(b'\n');
                line
            }
            OutputFormat::Pretty => {
                let mut doc =
                    serde_json::to_vec_pretty(frame).map_err(|e| LogError::Encode(e.to_string()))?;
                doc.push(b'\n');
                doc
            }
            OutputFormat::Binary => encode(frame).map_err(|e| LogError::Encode(e.to_string()))?,
        };
        self.out
            .write_all(&bytes)
            .map_err(|e| LogError::io("failed to write frame output", e))
    }

    /// Flushes and hands back the writer.
    pub fn finish(mut self) -> LogResult<W> {
        self.out
            .flush()
            .map_err(|e| LogError::io("failed to flush frame output", e))?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::append_log::codec::{Decoded, FrameDecoder};
    use crate::append_log::frame::FrameFields;

    fn frames() -> Vec<Frame> {
        vec![
            Frame::new("s1", FrameFields::new("alice", "hi"), Some(0)),
            Frame::new("s1", FrameFields::new("bob", "yo"), None),
        ]
    }

    #[test]
    fn test_jsonl_one_object_per_line() {
        let mut emitter = FrameEmitter::new(Vec::new(), OutputFormat::Jsonl);
        for f in frames() {
            emitter.emit(&f).unwrap();
        }
        let out = String::from_utf8(emitter.finish().unwrap()).unwrap();
        let lines: Vec<serde_json::Value> =
            out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["seq"], 0);
        assert!(lines[1]["seq"].is_null());
        assert_eq!(lines[1]["user_id"], "bob");
    }

    #[test]
    fn test_pretty_is_indented() {
        let mut emitter = FrameEmitter::new(Vec::new(), OutputFormat::Pretty);
        emitter.emit(&frames()[0]).unwrap();
        let out = String::from_utf8(emitter.finish().unwrap()).unwrap();
        assert!(out.contains("\n  \"content\": \"hi\""));
    }

    #[test]
    fn test_binary_output_is_a_segment() {
        let mut emitter = FrameEmitter::new(Vec::new(), OutputFormat::Binary);
        let input = frames();
        for f in &input {
            emitter.emit(f).unwrap();
        }
        let out = emitter.finish().unwrap();

        let mut decoder = FrameDecoder::new(out.as_slice());
        let mut decoded = Vec::new();
        while let Decoded::Frame { frame, .. } = decoder.next_frame().unwrap() {
            decoded.push(frame);
        }
        assert_eq!(decoded, input);
    }
}
