//! Line and token scanning over growable byte buffers.

use bytes::{Buf, Bytes, BytesMut};

use crate::DecodeError;

/// Default longest line a `LineBuffer` holds before failing.
pub const DEFAULT_MAX_LINE: usize = 1024 * 1024;

/// Find the first `\r\n` in `buf` at or after `from`, returning the index of the `\r`.
pub fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }

    buf[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| i + from)
}

/// Find the end of a header block, returning the index just past the terminating blank line.
///
/// Bare `\n\n` terminators are accepted as well.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    let mut line_start = 0;

    for (i, byte) in buf.iter().enumerate() {
        if *byte != b'\n' {
            continue;
        }

        // Line content without the terminator
        let mut line = &buf[line_start..i];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }

        if line.is_empty() {
            return Some(i + 1);
        }

        line_start = i + 1;
    }

    None
}

/// Split one line off the front of `buf`, without its terminator.
///
/// Accepts both `\r\n` and a bare `\n`. Returns `None` if no full line is buffered yet, leaving
/// `buf` untouched.
pub fn take_line(buf: &mut BytesMut) -> Option<Bytes> {
    let end = buf.iter().position(|b| *b == b'\n')?;

    let mut line = buf.split_to(end + 1);
    line.truncate(end);
    if line.last() == Some(&b'\r') {
        line.truncate(end - 1);
    }

    Some(line.freeze())
}

/// Split `line` once on the first `sep`, the separator itself is dropped.
///
/// If `sep` doesn't occur, the whole line is returned as the head.
pub fn split_token(line: &[u8], sep: u8) -> (&[u8], Option<&[u8]>) {
    match line.iter().position(|b| *b == sep) {
        Some(i) => (&line[..i], Some(&line[i + 1..])),
        None => (line, None),
    }
}

/// Trim ASCII whitespace from both ends.
pub fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
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

/// Accumulates partial input and yields complete lines across calls.
///
/// A `\r` at the very end of one chunk is remembered, so a `\r\n` split over two reads still
/// counts as one terminator. An unterminated line longer than the limit is an error.
pub struct LineBuffer {
    data: BytesMut,
    pending_cr: bool,
    max_line: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_LINE)
    }

    pub fn with_limit(max_line: usize) -> Self {
        Self {
            data: BytesMut::new(),
            pending_cr: false,
            max_line,
        }
    }

    /// Append raw input.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Take the next complete line, if available.
    ///
    /// Lines are terminated by `\r\n`, `\n`, or a lone `\r`.
    pub fn next_line(&mut self) -> Result<Option<Bytes>, DecodeError> {
        // Drop the `\n` half of a `\r\n` split over two chunks
        if self.pending_cr && !self.data.is_empty() {
            if self.data[0] == b'\n' {
                self.data.advance(1);
            }
            self.pending_cr = false;
        }

        let Some(end) = self.data.iter().position(|b| *b == b'\n' || *b == b'\r') else {
            if self.data.len() > self.max_line {
                return Err(DecodeError::TooLarge {
                    what: "line",
                    limit: self.max_line,
                });
            }
            return Ok(None);
        };
        let terminator = self.data[end];

        let mut line = self.data.split_to(end + 1);
        line.truncate(end);

        if terminator == b'\r' {
            if self.data.is_empty() {
                self.pending_cr = true;
            } else if self.data[0] == b'\n' {
                self.data.advance(1);
            }
        }

        Ok(Some(line.freeze()))
    }

    /// Take whatever partial line is left, if any.
    pub fn take_remaining(&mut self) -> Option<Bytes> {
        self.pending_cr = false;

        if self.data.is_empty() {
            return None;
        }

        Some(self.data.split().freeze())
    }

    /// Raw bytes buffered that don't form a complete line yet.
    pub fn buffered(&self) -> &[u8] {
        &self.data
    }

    /// Take `count` raw bytes off the front, regardless of line structure.
    pub fn take_bytes(&mut self, count: usize) -> Option<Bytes> {
        if self.pending_cr && !self.data.is_empty() {
            if self.data[0] == b'\n' {
                self.data.advance(1);
            }
            self.pending_cr = false;
        }

        if self.data.len() < count {
            return None;
        }

        Some(self.data.split_to(count).freeze())
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_end_found_after_blank_line() {
        let data = b"GET / HTTP/1.1\r\nHost: a\r\n\r\nbody";
        assert_eq!(find_header_end(data), Some(27));

        let bare = b"GET / HTTP/1.1\nHost: a\n\nbody";
        assert_eq!(find_header_end(bare), Some(24));

        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\nHost: a\r\n"), None);
    }

    #[test]
    fn take_line_leaves_partial_data() {
        let mut buf = BytesMut::from(&b"first\r\nsecond\nthi"[..]);

        assert_eq!(take_line(&mut buf).as_deref(), Some(&b"first"[..]));
        assert_eq!(take_line(&mut buf).as_deref(), Some(&b"second"[..]));
        assert_eq!(take_line(&mut buf), None);
        assert_eq!(&buf[..], b"thi");
    }

    #[test]
    fn split_token_splits_once() {
        let (head, rest) = split_token(b"Host: a:b", b':');
        assert_eq!(head, b"Host");
        assert_eq!(rest, Some(&b" a:b"[..]));

        let (head, rest) = split_token(b"novalue", b':');
        assert_eq!(head, b"novalue");
        assert_eq!(rest, None);
    }

    #[test]
    fn trim_ascii_both_ends() {
        assert_eq!(trim_ascii(b"  value \t"), b"value");
        assert_eq!(trim_ascii(b"   "), b"");
    }

    #[test]
    fn line_buffer_handles_split_crlf() {
        let mut lines = LineBuffer::new();

        lines.extend(b"data: a\r");
        assert_eq!(lines.next_line().unwrap().as_deref(), Some(&b"data: a"[..]));
        assert_eq!(lines.next_line().unwrap(), None);

        lines.extend(b"\ndata: b\n\n");
        assert_eq!(lines.next_line().unwrap().as_deref(), Some(&b"data: b"[..]));
        assert_eq!(lines.next_line().unwrap().as_deref(), Some(&b""[..]));
        assert_eq!(lines.next_line().unwrap(), None);
    }

    #[test]
    fn line_buffer_rejects_endless_line() {
        let mut lines = LineBuffer::with_limit(16);

        lines.extend(b"data: short\ndata: ");
        assert_eq!(lines.next_line().unwrap().as_deref(), Some(&b"data: short"[..]));
        assert_eq!(lines.next_line().unwrap(), None);

        lines.extend(&[b'x'; 32]);
        assert!(matches!(
            lines.next_line(),
            Err(DecodeError::TooLarge { what: "line", .. })
        ));
    }
}
