//! Shared server-sent-event helpers.
//!
//! Both dialects frame their payloads as `data:` lines.  This module turns raw
//! byte chunks into complete lines and pulls the payload out of a line; the
//! adapters take it from there.

use crate::error::LlmError;

/// Extract the payload of a `data:` line.
///
/// Returns `None` for blank lines, `:` comments (heartbeats) and any other
/// SSE field such as `event:` or `id:`.
pub fn sse_data(line: &str) -> Option<&str> {
    let line = line.trim_end();

    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let data = line.strip_prefix("data:")?;
    Some(data.trim_start())
}

/// Splits a byte stream into lines.
///
/// Chunks can end anywhere, including inside a multi-byte UTF-8 sequence, so
/// bytes are held until a `\n` arrives.  A trailing `\r` is stripped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            lines.push(decode_line(&self.pending[start..end]));
            start = end + 1;
        }
        self.pending.drain(..start);

        lines
    }

    /// Flush an unterminated final line when the transport closes.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = decode_line(&self.pending);
        self.pending.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Map an in-band error payload (`error.type` / `error.code` plus message) to
/// the client taxonomy.
pub(crate) fn classify_stream_error(kind: &str, message: &str) -> LlmError {
    let kind = kind.to_ascii_lowercase();
    let detail = if message.is_empty() {
        kind.clone()
    } else {
        message.to_owned()
    };

    if let Ok(code) = kind.parse::<u16>() {
        return match code {
            429 => LlmError::RateLimited { retry_after: None },
            401 | 403 => LlmError::AuthenticationFailed,
            500..=599 => LlmError::ServerError { code, detail },
            _ => LlmError::InvalidResponse { detail },
        };
    }

    if kind.contains("rate_limit") {
        LlmError::RateLimited { retry_after: None }
    } else if kind.contains("auth") || kind.contains("permission") || kind.contains("api_key") {
        LlmError::AuthenticationFailed
    } else if kind.contains("overloaded") {
        LlmError::ServerError { code: 529, detail }
    } else if kind.contains("api_error")
        || kind.contains("server")
        || kind.contains("internal")
        || kind.contains("unavailable")
    {
        LlmError::ServerError { code: 500, detail }
    } else {
        LlmError::InvalidResponse { detail }
    }
}
