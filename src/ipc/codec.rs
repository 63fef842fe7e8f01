//! Newline-delimited JSON codec for the daemon channel.
//!
//! Outbound frames are `RequestEnvelope`s terminated by `\n`. Inbound lines
//! decode to `Inbound`: a well-formed response, or a note about a line that
//! had to be skipped. A bad line never becomes a stream error, so the read
//! loop keeps running past it.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{RemoteError, Result};
use crate::ipc::messages::{RequestEnvelope, ResponseEnvelope};

/// Default maximum line length (16 MB).
pub const DEFAULT_MAX_LINE: usize = 16 * 1024 * 1024;

/// One decoded inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A response with a recognizable id.
    Response(ResponseEnvelope),
    /// A line that was skipped, with the reason.
    Malformed(String),
}

/// Newline-delimited JSON codec.
#[derive(Debug, Clone)]
pub struct WireCodec {
    max_length: usize,
    discarding: bool,
}

impl WireCodec {
    /// Create a new codec with default max length.
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE)
    }

    /// Create a new codec with custom max length.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            discarding: false,
        }
    }

    /// Get the max line length.
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WireCodec {
    type Item = Inbound;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == b'\n') else {
                if src.len() > self.max_length && !self.discarding {
                    let len = src.len();
                    src.clear();
                    self.discarding = true;
                    return Ok(Some(Inbound::Malformed(format!(
                        "line exceeds {} bytes ({} buffered)",
                        self.max_length, len
                    ))));
                }
                if self.discarding {
                    src.clear();
                }
                return Ok(None);
            };

            let line = src.split_to(pos);
            src.advance(1);

            if self.discarding {
                // Tail of an oversized line
                self.discarding = false;
                continue;
            }

            if line.len() > self.max_length {
                return Ok(Some(Inbound::Malformed(format!(
                    "line exceeds {} bytes ({} received)",
                    self.max_length,
                    line.len()
                ))));
            }

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Ok(Some(decode_line(&line)));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        // Final line without a trailing newline
        if src.is_empty() || self.discarding {
            src.clear();
            return Ok(None);
        }
        let line = src.split_to(src.len());
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        if line.len() > self.max_length {
            return Ok(Some(Inbound::Malformed(format!("final line exceeds {} bytes", self.max_length))));
        }
        Ok(Some(decode_line(&line)))
    }
}

impl Encoder<RequestEnvelope> for WireCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: RequestEnvelope, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("JSON error: {}", e)))?;

        if json.len() > self.max_length {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Message too large: {} > {}", json.len(), self.max_length),
            ));
        }

        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');

        Ok(())
    }
}

/// Decode one line (without its newline) into an `Inbound` frame.
pub fn decode_line(line: &[u8]) -> Inbound {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    match serde_json::from_slice::<serde_json::Value>(line) {
        Ok(value) => match ResponseEnvelope::from_value(value) {
            Ok(response) => Inbound::Response(response),
            Err(e) => Inbound::Malformed(e.to_string()),
        },
        Err(e) => Inbound::Malformed(format!("invalid JSON: {}", e)),
    }
}

/// Encode a request to a single newline-terminated line.
pub fn encode_request(request: &RequestEnvelope) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(request)?;
    line.push(b'\n');
    Ok(line)
}

/// Parse a single request line, as the daemon side sees it.
pub fn decode_request(line: &str) -> Result<RequestEnvelope> {
    serde_json::from_str(line.trim_end()).map_err(|e| RemoteError::MalformedResponse(e.to_string()))
}
