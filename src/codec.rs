//! Wire Codecs
//!
//! The protocol moves binary data as uppercase hex (SASL tokens) or as
//! length-prefixed base64 (`{<len>}<base64>`, RSAVALIDATE). Responses are
//! assembled in a bounded buffer so the 1024-byte response cap is an
//! enforced invariant rather than a silent truncation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::fmt;

/// Maximum size of a single read or response buffer.
pub const BUFFER_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid base64 payload")]
    InvalidBase64,
    #[error("length prefix does not match payload")]
    LengthMismatch,
}

// ─── Hex ────────────────────────────────────────────────────────────────────

/// Encode binary data as uppercase hex with no prefix.
pub fn binary_to_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for &byte in data {
        let h = byte >> 4;
        let l = byte & 0x0F;
        out.push(nibble_to_hex(h));
        out.push(nibble_to_hex(l));
    }
    out
}

fn nibble_to_hex(n: u8) -> char {
    if n >= 0x0A {
        (n - 0x0A + b'A') as char
    } else {
        (n + b'0') as char
    }
}

/// Decode a hex string into bytes. Accepts upper and lower case digits,
/// does no validation beyond pairing, and drops a trailing odd character.
pub fn hex_to_binary(hex: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(hex.len() / 2);
    for pair in hex.chunks_exact(2) {
        out.push(((hex_nibble(pair[0]) & 0x0F) << 4) | (hex_nibble(pair[1]) & 0x0F));
    }
    out
}

fn hex_nibble(c: u8) -> u8 {
    if c >= b'a' {
        c.wrapping_sub(b'a').wrapping_add(0x0A)
    } else if c >= b'A' {
        c.wrapping_sub(b'A').wrapping_add(0x0A)
    } else {
        c.wrapping_sub(b'0')
    }
}

// ─── Length-prefixed base64 ─────────────────────────────────────────────────

/// Encode binary data as `{<decimal byte length>}<base64>`.
pub fn binary_to_base64(data: &[u8]) -> String {
    format!("{{{}}}{}", data.len(), BASE64.encode(data))
}

/// Decode a `{<len>}<base64>` token. The prefix is optional; when present
/// it must match the decoded length. An empty payload is an error.
pub fn base64_to_binary(token: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut attached_len: Option<usize> = None;
    let mut body = token;

    if body.first() == Some(&b'{') {
        let close = body
            .iter()
            .position(|&b| b == b'}')
            .ok_or(CodecError::InvalidBase64)?;
        let digits = &body[1..close];
        if digits.iter().all(|b| b.is_ascii_digit()) && !digits.is_empty() {
            let len = std::str::from_utf8(digits)
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or(CodecError::InvalidBase64)?;
            attached_len = Some(len);
        }
        body = &body[close + 1..];
    }

    let decoded = BASE64
        .decode(body)
        .map_err(|_| CodecError::InvalidBase64)?;
    if decoded.is_empty() {
        return Err(CodecError::InvalidBase64);
    }
    if let Some(expected) = attached_len
        && expected != 0
        && expected != decoded.len()
    {
        return Err(CodecError::LengthMismatch);
    }

    Ok(decoded)
}

// ─── Bounded response writer ────────────────────────────────────────────────

/// Append-only response buffer with a hard byte cap. Writes past the cap
/// are dropped and recorded so the connection can log the overflow.
#[derive(Debug)]
pub struct ResponseBuffer {
    buf: Vec<u8>,
    limit: usize,
    overflowed: bool,
}

impl ResponseBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(limit.min(BUFFER_SIZE)),
            limit,
            overflowed: false,
        }
    }

    /// Formatted append. Truncates at the cap; check [`Self::overflowed`].
    pub fn append(&mut self, args: fmt::Arguments<'_>) {
        let _ = fmt::Write::write_fmt(self, args);
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl fmt::Write for ResponseBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.limit.saturating_sub(self.buf.len());
        if s.len() <= room {
            self.buf.extend_from_slice(s.as_bytes());
            Ok(())
        } else {
            self.buf.extend_from_slice(&s.as_bytes()[..room]);
            self.overflowed = true;
            Err(fmt::Error)
        }
    }
}
