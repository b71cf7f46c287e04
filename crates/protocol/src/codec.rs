//! Newline-delimited JSON framing
//!
//! One message per line: a compact JSON object followed by `\n`. Lines that
//! fail to parse as a JSON object are logged and skipped; the stream itself
//! stays up. Overlong lines and I/O failures are fatal to the stream.
//!
//! # Usage
//!
//! ```
//! use nodelink_protocol::codec::JsonLineCodec;
//! use nodelink_protocol::Message;
//! use bytes::BytesMut;
//! use tokio_util::codec::{Decoder, Encoder};
//!
//! let mut codec = JsonLineCodec::new();
//! let mut buf = BytesMut::new();
//! codec.encode(Message::new().with("foo", "bar"), &mut buf).unwrap();
//! assert_eq!(&buf[..], b"{\"foo\":\"bar\"}\n");
//!
//! let decoded = codec.decode(&mut buf).unwrap().unwrap();
//! assert_eq!(decoded.get("foo").unwrap(), "bar");
//! ```

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};

use crate::error::{ProtocolError, Result};
use crate::Message;

/// Maximum accepted line length (16 MiB)
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Encodes a message as a single JSON line (without the trailing newline)
pub fn encode_line(message: &Message) -> Result<String> {
    serde_json::to_string(message)
        .map_err(|e| ProtocolError::Codec(format!("JSON encode failed: {}", e)))
}

/// Decodes a single line into a message
///
/// The line is taken as raw bytes; invalid UTF-8 is a decode error like any
/// other malformed JSON.
pub fn decode_line(line: &[u8]) -> Result<Message> {
    let value: serde_json::Value = serde_json::from_slice(line)
        .map_err(|e| ProtocolError::Codec(format!("JSON decode failed: {}", e)))?;
    Message::from_value(value)
}

/// `tokio_util` codec for newline-delimited JSON messages
#[derive(Debug, Clone)]
pub struct JsonLineCodec {
    lines: AnyDelimiterCodec,
}

impl JsonLineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                b"\n".to_vec(),
                max_length,
            ),
        }
    }

    fn parse(line: &[u8]) -> Option<Message> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        match decode_line(line) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed line");
                None
            }
        }
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn map_framing_error(err: AnyDelimiterCodecError) -> ProtocolError {
    match err {
        AnyDelimiterCodecError::MaxChunkLengthExceeded => {
            ProtocolError::Codec("maximum line length exceeded".to_string())
        }
        AnyDelimiterCodecError::Io(e) => e.into(),
    }
}

impl Decoder for JsonLineCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        loop {
            match self.lines.decode(src).map_err(map_framing_error)? {
                Some(line) => {
                    if let Some(message) = Self::parse(&line) {
                        return Ok(Some(message));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        loop {
            match self.lines.decode_eof(src).map_err(map_framing_error)? {
                Some(line) => {
                    if let Some(message) = Self::parse(&line) {
                        return Ok(Some(message));
                    }
                }
                None => return Ok(None),
            }
        }
    }
}

impl Encoder<Message> for JsonLineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<()> {
        let line = encode_line(&message)?;
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
