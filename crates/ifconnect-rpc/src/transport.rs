//! Frame codec for the TCP command channel.
//!
//! Outgoing commands are framed with a single-byte length prefix:
//! ```text
//! +--------+-----------+------------------------------+
//! | 1 byte | 3 bytes   | L bytes                      |
//! | L      | reserved  | JSON, one byte per character |
//! +--------+-----------+------------------------------+
//! ```
//!
//! The prefix cannot describe payloads longer than 255 bytes. That is a
//! limitation of the host protocol, so longer commands are handled according
//! to [`OversizePolicy`] instead of being silently truncated.
//!
//! The host does not frame its replies. The decoder therefore scans the
//! stream for complete JSON objects by brace depth, buffering partial
//! objects across reads and skipping any bytes between objects.

use std::borrow::Cow;
use std::io;

use bytes::{Buf, BufMut, BytesMut};
use ifconnect_types::{Command, DataEnvelope, UNAVAILABLE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

/// Length prefix plus reserved bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload the one-byte prefix can describe
pub const MAX_FRAME_PAYLOAD: usize = 255;

/// Largest single inbound object kept in the buffer (1 MB)
const MAX_BUFFERED_BYTES: usize = 1024 * 1024;

/// What to do with a command whose JSON is longer than [`MAX_FRAME_PAYLOAD`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Refuse to encode it
    #[default]
    Reject,
    /// Write 255 as the prefix followed by the full payload
    Saturate,
}

#[derive(Debug, Default)]
struct ScanState {
    depth: usize,
    in_string: bool,
    escaped: bool,
    scanned: usize,
}

/// Outcome of scanning the buffered bytes.
#[derive(Debug, PartialEq, Eq)]
enum Scan {
    /// Object ends at this offset
    Complete(usize),
    /// A `}` inside a string is directly followed by what looks like a new
    /// object. The current one was probably cut off mid-string.
    Suspect { end: usize, restart: usize },
    Incomplete,
}

#[derive(Debug, PartialEq, Eq)]
enum Lookahead {
    Object(usize),
    NotObject,
    Pending,
}

/// Check whether `src[from..]` starts with `{"`, allowing whitespace.
fn next_object_start(src: &[u8], from: usize) -> Lookahead {
    let skip_whitespace = |mut i: usize| {
        while src.get(i).is_some_and(u8::is_ascii_whitespace) {
            i += 1;
        }
        i
    };

    let open = skip_whitespace(from);
    match src.get(open) {
        None => return Lookahead::Pending,
        Some(b'{') => {}
        Some(_) => return Lookahead::NotObject,
    }
    match src.get(skip_whitespace(open + 1)) {
        None => Lookahead::Pending,
        Some(b'"') => Lookahead::Object(open),
        Some(_) => Lookahead::NotObject,
    }
}

impl ScanState {
    /// Advance over `src` until the object closes or looks truncated.
    fn scan(&mut self, src: &[u8]) -> Scan {
        for (i, &byte) in src.iter().enumerate().skip(self.scanned) {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                } else if byte == b'}' {
                    match next_object_start(src, i + 1) {
                        Lookahead::Object(restart) => {
                            return Scan::Suspect {
                                end: i + 1,
                                restart,
                            };
                        }
                        Lookahead::Pending => {
                            self.scanned = i;
                            return Scan::Incomplete;
                        }
                        Lookahead::NotObject => {}
                    }
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Scan::Complete(i + 1);
                    }
                }
                _ => {}
            }
        }

        self.scanned = src.len();
        Scan::Incomplete
    }
}

/// Codec for the command channel: encodes [`Command`]s, decodes [`DataEnvelope`]s.
#[derive(Debug, Default)]
pub struct FrameCodec {
    oversize: OversizePolicy,
    scan: ScanState,
}

impl FrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_oversize_policy(oversize: OversizePolicy) -> Self {
        Self {
            oversize,
            scan: ScanState::default(),
        }
    }

    fn reset(&mut self) {
        self.scan = ScanState::default();
    }
}

impl Decoder for FrameCodec {
    type Item = DataEnvelope;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.scan.depth == 0 {
                let Some(start) = src.iter().position(|&b| b == b'{') else {
                    if !src.is_empty() {
                        trace!("Skipping {} bytes outside any object", src.len());
                        src.clear();
                    }
                    self.reset();
                    return Ok(None);
                };
                if start > 0 {
                    trace!("Skipping {} bytes before object", start);
                    src.advance(start);
                }
                self.reset();
            }

            match self.scan.scan(src) {
                Scan::Complete(end) => {
                    let raw = src.split_to(end);
                    self.reset();

                    if let Some(envelope) = parse_object(&raw) {
                        return Ok(Some(envelope));
                    }
                }
                Scan::Suspect { end, restart } => {
                    let raw = src.split_to(end);
                    self.reset();

                    if let Some(envelope) = parse_object(&raw) {
                        return Ok(Some(envelope));
                    }
                    trace!("Resynchronizing {} bytes later", restart - end);
                }
                Scan::Incomplete => {
                    if src.len() > MAX_BUFFERED_BYTES {
                        warn!(
                            "Discarding {} buffered bytes: object exceeds {} bytes",
                            src.len(),
                            MAX_BUFFERED_BYTES
                        );
                        src.clear();
                        self.reset();
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(envelope) = self.decode(buf)? {
            return Ok(Some(envelope));
        }

        if !buf.is_empty() {
            warn!(
                "Discarding {} bytes of incomplete message at end of stream",
                buf.len()
            );
            buf.clear();
            self.reset();
        }
        Ok(None)
    }
}

impl Encoder<Command> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = encode_payload(&item)?;

        let prefix = match u8::try_from(payload.len()) {
            Ok(len) => len,
            Err(_) => match self.oversize {
                OversizePolicy::Reject => return Err(CodecError::FrameTooLarge(payload.len())),
                OversizePolicy::Saturate => {
                    warn!(
                        "Command {} is {} bytes, prefix saturated at {}",
                        item.name,
                        payload.len(),
                        MAX_FRAME_PAYLOAD
                    );
                    u8::MAX
                }
            },
        };

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u8(prefix);
        dst.put_bytes(0, LENGTH_PREFIX_SIZE - 1);
        dst.put_slice(&payload);

        Ok(())
    }
}

/// Serialize a command to its compact JSON payload, one byte per character.
///
/// # Errors
///
/// Returns `CodecError::Json` if serialization fails and
/// `CodecError::Unencodable` for characters outside U+0000..=U+00FF.
pub fn encode_payload(command: &Command) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_string(command)?;
    json.chars()
        .map(|c| u8::try_from(u32::from(c)).map_err(|_| CodecError::Unencodable(c)))
        .collect()
}

/// Interpret bytes as one character per byte.
pub(crate) fn latin1(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Quote bare `NaN` tokens so the text parses as JSON.
///
/// Occurrences inside string literals are left alone.
pub(crate) fn normalize_nan(text: &str) -> Cow<'_, str> {
    if !text.contains(UNAVAILABLE) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 8);
    let mut in_string = false;
    let mut escaped = false;
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices();

    while let Some((i, c)) = chars.next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if text[i..].starts_with(UNAVAILABLE)
            && !prev.is_some_and(is_word)
            && !text[i + UNAVAILABLE.len()..]
                .chars()
                .next()
                .is_some_and(is_word)
        {
            out.push('"');
            out.push_str(UNAVAILABLE);
            out.push('"');
            chars.nth(UNAVAILABLE.len() - 2);
            prev = Some('"');
            continue;
        }

        out.push(c);
        prev = Some(c);
    }

    Cow::Owned(out)
}

fn parse_object(raw: &[u8]) -> Option<DataEnvelope> {
    let text = latin1(raw);
    match serde_json::from_str::<Value>(&normalize_nan(&text)) {
        Ok(value) => {
            let envelope = DataEnvelope::from_value(value);
            if envelope.is_none() {
                warn!("Dropping non-object message: {}", text);
            }
            envelope
        }
        Err(e) => {
            warn!("Dropping malformed message ({}): {}", e, text);
            None
        }
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_PAYLOAD})")]
    FrameTooLarge(usize),

    #[error("Character {0:?} cannot be sent one byte per character")]
    Unencodable(char),
}
