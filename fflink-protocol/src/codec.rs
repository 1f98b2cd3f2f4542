//! Command framing and response-unit decoding.
//!
//! Wire format:
//!
//! ```text
//! ~<COMMAND> [PARAM...]\r\n                      (to the printer)
//! <free text payload>\r\n
//! ok\r\n                                         (from the printer)
//! ```
//!
//! Responses are free text closed by a line reading `ok` (case-insensitive).
//! TCP delivers that text in arbitrary slices, so the [`Decoder`] buffers
//! partial reads and hands back one complete unit at a time, retaining
//! whatever follows the marker for the next unit.

use crate::command::Command;
use crate::error::ProtocolError;
use crate::{ACK_TOKEN, FRAME_PREFIX, FRAME_TERMINATOR};
use bytes::{BufMut, Bytes, BytesMut};

/// Encodes a command into its wire frame.
///
/// Pure and total for well-formed commands; parameter tokens carrying the
/// prefix marker or line breaks are rejected here, before any transmission.
pub fn encode(command: &Command) -> Result<BytesMut, ProtocolError> {
    let params = command.params()?;
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u8(FRAME_PREFIX);
    buf.put_slice(command.keyword().as_bytes());
    for param in &params {
        buf.put_u8(b' ');
        buf.put_slice(param.as_bytes());
    }
    buf.put_slice(FRAME_TERMINATOR.as_bytes());
    Ok(buf)
}

/// The raw bytes of one complete response, up to and including the `ok` line.
#[derive(Debug, Clone)]
pub struct ResponseUnit {
    raw: Bytes,
    /// Byte offset of the `ok` line within `raw`.
    ack_start: usize,
}

impl ResponseUnit {
    /// The full unit including the completion line.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The payload text preceding the `ok` line, lossily decoded.
    pub fn payload(&self) -> String {
        String::from_utf8_lossy(&self.raw[..self.ack_start]).into_owned()
    }

    /// Payload lines with firmware echo (`CMD ... Received.`) and blank
    /// lines filtered out.
    pub fn data_lines(&self) -> Vec<String> {
        self.payload()
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty() && !l.starts_with("CMD "))
            .collect()
    }
}

/// Incremental decoder over a growing byte buffer.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Appends freshly read bytes to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete response unit.
    ///
    /// Returns `None` if the completion marker has not arrived yet; the
    /// buffered bytes are kept for the next call. Bytes after the marker
    /// stay buffered and belong to the following unit.
    ///
    /// The firmware usually puts the marker on its own line, but some
    /// replies append it to the last data line (`T0:200/210 ok`); a line
    /// ending in a whitespace-separated `ok` token also closes the unit.
    pub fn decode_unit(&mut self) -> Option<ResponseUnit> {
        let mut line_start = 0;
        for i in 0..self.buffer.len() {
            if self.buffer[i] != b'\n' {
                continue;
            }
            if let Some(offset) = ack_offset(&self.buffer[line_start..i]) {
                let ack_start = line_start + offset;
                let raw = self.buffer.split_to(i + 1).freeze();
                return Some(ResponseUnit { raw, ack_start });
            }
            line_start = i + 1;
        }
        None
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte offset of the completion token within `line` (terminator excluded),
/// or `None` when the line does not close a unit.
fn ack_offset(line: &[u8]) -> Option<usize> {
    let token = ACK_TOKEN.as_bytes();
    // Trailing whitespace only after the token
    let mut end = line.len();
    while end > 0 && line[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    if end < token.len() || !line[end - token.len()..end].eq_ignore_ascii_case(token) {
        return None;
    }
    let start = end - token.len();
    // The token must be the whole line or its own trailing word
    if start == 0 || line[start - 1].is_ascii_whitespace() {
        if trim_ascii(&line[..start]).is_empty() && start != 0 {
            // Line of bare whitespace then `ok`: same as own-line marker
            return Some(0);
        }
        return Some(start);
    }
    None
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}
