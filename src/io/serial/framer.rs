// src/io/serial/framer.rs
//
// Delimiter framing and record decoding for the sensor link.
// Bytes go in as they arrive from the port; complete delimiter-terminated
// frames come out in order, and each frame is parsed into a record
// according to the configured data type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Record;

/// Default cap on bytes buffered without seeing a delimiter.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4096;

// =============================================================================
// Types
// =============================================================================

/// How frame bytes are interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataType {
    /// One JSON object per frame
    #[default]
    JsonObject,
}

/// A complete frame extracted from the serial stream, delimiter removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub bytes: Vec<u8>,
}

impl RawFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Output of a single `feed()` call
#[derive(Debug, Default)]
pub struct FeedResult {
    /// Complete frames in arrival order
    pub frames: Vec<RawFrame>,
    /// Bytes thrown away because a frame grew past the cap
    pub discarded_bytes: usize,
    /// Set when the buffer overflowed during this call
    pub overflowed: bool,
}

/// Why a frame could not be turned into a record
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed JSON: {0}")]
    Json(String),
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

// =============================================================================
// Frame Decoder
// =============================================================================

/// Stateful delimiter framer with a bounded accumulator.
///
/// Partial frames are retained between calls. A delimiter split across two
/// chunks is still recognised. When the partial frame exceeds `max_frame_bytes`
/// it is dropped, and so is everything up to the next delimiter, since the
/// remainder of that line can never be a valid frame.
pub struct FrameDecoder {
    buffer: Vec<u8>,
    delimiter: Vec<u8>,
    max_frame_bytes: usize,
    /// Position in `buffer` from which the next delimiter search starts
    scan_from: usize,
    /// Dropping bytes until the next delimiter after an overflow
    discarding: bool,
}

impl FrameDecoder {
    pub fn new(delimiter: Vec<u8>, max_frame_bytes: usize) -> Self {
        let delimiter = if delimiter.is_empty() {
            b"\n".to_vec()
        } else {
            delimiter
        };
        FrameDecoder {
            buffer: Vec::with_capacity(256),
            delimiter,
            max_frame_bytes: max_frame_bytes.max(1),
            scan_from: 0,
            discarding: false,
        }
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// Bytes currently held as a partial frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame. Used when the physical stream changes.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scan_from = 0;
        self.discarding = false;
    }

    /// Feed raw bytes into the decoder.
    /// Returns every frame completed by these bytes.
    pub fn feed(&mut self, data: &[u8]) -> FeedResult {
        let mut result = FeedResult::default();
        self.buffer.extend_from_slice(data);

        let dlen = self.delimiter.len();
        let mut start = 0;
        let mut search = self.scan_from;

        while let Some(pos) = find(&self.buffer[search..], &self.delimiter) {
            let end = search + pos;
            if self.discarding {
                result.discarded_bytes += end - start + dlen;
                self.discarding = false;
            } else {
                result.frames.push(RawFrame {
                    bytes: self.buffer[start..end].to_vec(),
                });
            }
            start = end + dlen;
            search = start;
        }

        self.buffer.drain(..start);

        if self.discarding {
            result.discarded_bytes += self.drop_to_delimiter_prefix();
        } else if self.buffer.len() > self.max_frame_bytes {
            result.discarded_bytes += self.drop_to_delimiter_prefix();
            result.overflowed = true;
            self.discarding = true;
        }

        // A delimiter may straddle this chunk and the next one
        self.scan_from = self.buffer.len().saturating_sub(dlen - 1);
        result
    }
}

impl FrameDecoder {
    /// Drop the buffer except a trailing partial delimiter, which the next
    /// chunk may complete. Returns the number of bytes dropped.
    fn drop_to_delimiter_prefix(&mut self) -> usize {
        let dlen = self.delimiter.len();
        let keep = (1..dlen)
            .rev()
            .find(|&k| self.buffer.ends_with(&self.delimiter[..k]))
            .unwrap_or(0);
        let dropped = self.buffer.len() - keep;
        self.buffer.drain(..dropped);
        dropped
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

// =============================================================================
// Record Parsing
// =============================================================================

/// Parse one frame into a record.
///
/// Returns `Ok(None)` for blank frames (e.g. an empty line between records),
/// which are neither records nor failures.
pub fn parse_frame(frame: &RawFrame, data_type: DataType) -> Result<Option<Record>, DecodeError> {
    let text = std::str::from_utf8(frame.as_bytes()).map_err(|_| DecodeError::InvalidUtf8)?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    match data_type {
        DataType::JsonObject => {
            let value: Value =
                serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))?;
            match value {
                Value::Object(map) => Ok(Some(map)),
                other => Err(DecodeError::NotAnObject(json_type_name(&other))),
            }
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parse a delimiter as written in settings, understanding `\r`, `\n`,
/// `\t`, `\0` and `\xNN` escapes (e.g. `"\\r\\n"` typed in a text field).
pub fn parse_delimiter(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            match bytes[i + 1] {
                b'r' => {
                    out.push(b'\r');
                    i += 2;
                    continue;
                }
                b'n' => {
                    out.push(b'\n');
                    i += 2;
                    continue;
                }
                b't' => {
                    out.push(b'\t');
                    i += 2;
                    continue;
                }
                b'0' => {
                    out.push(0);
                    i += 2;
                    continue;
                }
                b'\\' => {
                    out.push(b'\\');
                    i += 2;
                    continue;
                }
                b'x' if i + 3 < bytes.len() => {
                    if let Ok(decoded) = hex::decode(&bytes[i + 2..i + 4]) {
                        out.extend_from_slice(&decoded);
                        i += 4;
                        continue;
                    }
                }
                _ => {}
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}
