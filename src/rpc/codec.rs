/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Newline-delimited JSON-RPC encoding and decoding.
//!
//! One JSON object per line, UTF-8, `\n` terminated. Lines that do not
//! decode are reported as [`ProbeError::Parse`] so the caller can skip them;
//! servers routinely interleave log noise with protocol output.

use bytes::{Buf, BytesMut};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use super::types::{Request, RequestId, Response};
use crate::error::ProbeError;

/// Encodes a request as a single newline-terminated line.
///
/// # Errors
///
/// Returns [`ProbeError::Encode`] if the params cannot be serialized.
pub fn encode(request: &Request) -> Result<String, ProbeError> {
    encode_message(request)
}

/// Encodes any JSON-RPC message (request, notification, reply) as one line.
///
/// # Errors
///
/// Returns [`ProbeError::Encode`] if the message cannot be serialized.
pub fn encode_message<T: Serialize>(message: &T) -> Result<String, ProbeError> {
    // serde_json escapes control characters inside strings, so the compact
    // form never contains a raw newline.
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// A decoded line from the server's output stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// A response to one of our requests.
    Response(Response),
    /// A server-to-client request that expects a reply.
    Request {
        /// The id to reply to.
        id: RequestId,
        /// The requested method.
        method: String,
    },
    /// A server-to-client notification.
    Notification {
        /// The notification method.
        method: String,
    },
}

/// Decodes a line into a response.
///
/// # Errors
///
/// Returns [`ProbeError::Parse`] if the line is not JSON, not a JSON-RPC
/// message, or is a request/notification rather than a response.
pub fn decode(line: &str) -> Result<Response, ProbeError> {
    match decode_message(line)? {
        Incoming::Response(response) => Ok(response),
        Incoming::Request { method, .. } | Incoming::Notification { method } => Err(
            ProbeError::Parse(format!("expected a response, got '{method}'")),
        ),
    }
}

/// Decodes a line into any incoming JSON-RPC message.
///
/// # Errors
///
/// Returns [`ProbeError::Parse`] if the line is not a JSON-RPC message.
pub fn decode_message(line: &str) -> Result<Incoming, ProbeError> {
    let value: Value = serde_json::from_str(line.trim())
        .map_err(|e| ProbeError::Parse(format!("{e}: {}", preview(line))))?;

    let Some(object) = value.as_object() else {
        return Err(ProbeError::Parse(format!("not an object: {}", preview(line))));
    };

    if let Some(method) = object.get("method").and_then(Value::as_str) {
        let method = method.to_string();
        return match object.get("id").filter(|id| !id.is_null()) {
            Some(id) => {
                let id = serde_json::from_value(id.clone())
                    .map_err(|e| ProbeError::Parse(format!("bad request id: {e}")))?;
                Ok(Incoming::Request { id, method })
            }
            None => Ok(Incoming::Notification { method }),
        };
    }

    if object.get("id").is_none_or(Value::is_null) {
        return Err(ProbeError::Parse(format!(
            "message without usable id: {}",
            preview(line)
        )));
    }

    serde_json::from_value::<Response>(value)
        .map(Incoming::Response)
        .map_err(|e| ProbeError::Parse(format!("bad response: {e}")))
}

fn preview(line: &str) -> String {
    const MAX: usize = 80;
    let line = line.trim();
    if line.chars().count() <= MAX {
        line.to_string()
    } else {
        let cut: String = line.chars().take(MAX).collect();
        format!("{cut}...")
    }
}

/// Longest line [`LineBuffer`] will hold before giving up on it.
pub const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// Accumulates raw bytes from a stream and yields complete lines.
///
/// Partial lines stay buffered until their terminating `\n` arrives. Each
/// byte is searched for a terminator once, however many reads a line spans.
/// A line longer than the limit is reported once as [`ProbeError::Parse`]
/// and the rest of it, up to its terminator, is dropped as it arrives.
#[derive(Debug)]
pub struct LineBuffer {
    buffer: BytesMut,
    /// Bytes at the front of `buffer` already known to hold no `\n`.
    scanned: usize,
    max_line: usize,
    /// Inside an over-long line whose terminator has not arrived yet.
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    /// Creates an empty buffer with the default line limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }

    /// Creates an empty buffer that rejects lines longer than `max_line` bytes.
    #[must_use]
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    /// Appends bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pops the next complete line, without its terminator.
    ///
    /// Returns `Some(Err(_))` for a complete line that is not valid UTF-8;
    /// the bytes are consumed either way.
    pub fn next_line(&mut self) -> Option<Result<String, ProbeError>> {
        loop {
            let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n')
            else {
                return self.hold_partial();
            };
            let newline = self.scanned + offset;
            self.scanned = 0;
            let mut line = self.buffer.split_to(newline);
            self.buffer.advance(1);

            if std::mem::take(&mut self.discarding) {
                // Tail of a line already reported as too long
                continue;
            }
            if line.len() > self.max_line {
                return Some(Err(self.overlong()));
            }

            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            return Some(
                String::from_utf8(line.to_vec())
                    .map_err(|e| ProbeError::Parse(format!("invalid UTF-8: {e}"))),
            );
        }
    }

    fn hold_partial(&mut self) -> Option<Result<String, ProbeError>> {
        self.scanned = self.buffer.len();
        if self.buffer.len() <= self.max_line {
            return None;
        }
        self.buffer.clear();
        self.scanned = 0;
        if std::mem::replace(&mut self.discarding, true) {
            None
        } else {
            Some(Err(self.overlong()))
        }
    }

    fn overlong(&self) -> ProbeError {
        warn!("Dropping line longer than {} bytes", self.max_line);
        ProbeError::Parse(format!("line exceeds {} bytes", self.max_line))
    }

    /// Drains whatever is left once the stream hits EOF.
    pub fn finish(&mut self) -> Option<Result<String, ProbeError>> {
        if std::mem::take(&mut self.discarding) {
            self.buffer.clear();
            self.scanned = 0;
            return None;
        }
        if self.buffer.is_empty() {
            return None;
        }
        self.buffer.extend_from_slice(b"\n");
        self.next_line()
    }

    /// Number of buffered bytes not yet returned as a line.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
