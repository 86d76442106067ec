use bytes::{BufMut, BytesMut};

use crate::{buffer::take_line, DecodeError};

/// Longest chunk size line accepted, extensions included.
pub const MAX_CHUNK_LINE: usize = 1024;

/// Default bound on the trailer section, matching the default header limit.
pub const DEFAULT_TRAILER_LIMIT: usize = 16 * 1024;

/// Incremental decoder for `Transfer-Encoding: chunked` framing.
///
/// Also used by the SSE parser, which supports chunk framed event streams.
pub struct ChunkedDecoder {
    state: ChunkState,
    limit: usize,
    total: usize,
    trailer_limit: usize,
    trailer_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(usize),
    DataEnd,
    Trailer,
    Done,
}

impl ChunkedDecoder {
    /// Create a decoder that fails once more than `limit` payload bytes were decoded.
    pub fn new(limit: usize) -> Self {
        Self {
            state: ChunkState::Size,
            limit,
            total: 0,
            trailer_limit: DEFAULT_TRAILER_LIMIT,
            trailer_size: 0,
        }
    }

    /// Bound the trailer section to `limit` bytes.
    pub fn trailer_limit(mut self, limit: usize) -> Self {
        self.trailer_limit = limit;
        self
    }

    /// Decode as much of `buf` as possible into `out`.
    ///
    /// Returns `true` once the terminating zero-size chunk and trailer section were consumed.
    pub fn decode(&mut self, buf: &mut BytesMut, out: &mut BytesMut) -> Result<bool, DecodeError> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let Some(line) = take_line(buf) else {
                        return check_partial_line(buf, "chunk size line", MAX_CHUNK_LINE);
                    };

                    let size = parse_chunk_size(&line)?;
                    self.state = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    if buf.is_empty() {
                        return Ok(false);
                    }

                    let count = remaining.min(buf.len());
                    self.total += count;
                    if self.total > self.limit {
                        return Err(DecodeError::TooLarge {
                            what: "chunked body",
                            limit: self.limit,
                        });
                    }

                    out.put(buf.split_to(count));
                    self.state = match remaining - count {
                        0 => ChunkState::DataEnd,
                        left => ChunkState::Data(left),
                    };
                }
                ChunkState::DataEnd => {
                    let Some(line) = take_line(buf) else {
                        return check_partial_line(buf, "chunk size line", MAX_CHUNK_LINE);
                    };

                    if !line.is_empty() {
                        return Err(DecodeError::ChunkSize(
                            String::from_utf8_lossy(&line).into_owned(),
                        ));
                    }
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailer => {
                    let remaining = self.trailer_limit.saturating_sub(self.trailer_size);
                    let Some(line) = take_line(buf) else {
                        return check_partial_line(buf, "trailer section", remaining);
                    };

                    // Trailer fields are accepted but not surfaced
                    if line.is_empty() {
                        self.state = ChunkState::Done;
                        continue;
                    }

                    self.trailer_size += line.len() + 2;
                    if self.trailer_size > self.trailer_limit {
                        return Err(DecodeError::TooLarge {
                            what: "trailer section",
                            limit: self.trailer_limit,
                        });
                    }
                }
                ChunkState::Done => return Ok(true),
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }
}

/// A line is still incomplete, fail if what's buffered of it already exceeds `limit`.
fn check_partial_line(
    buf: &BytesMut,
    what: &'static str,
    limit: usize,
) -> Result<bool, DecodeError> {
    if buf.len() > limit {
        return Err(DecodeError::TooLarge { what, limit });
    }

    Ok(false)
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, DecodeError> {
    let error = || DecodeError::ChunkSize(String::from_utf8_lossy(line).into_owned());

    // Chunk extensions follow a ';' and are ignored
    let size = line.split(|b| *b == b';').next().unwrap_or_default();
    let size = std::str::from_utf8(size).map_err(|_| error())?.trim();

    usize::from_str_radix(size, 16).map_err(|_| error())
}

/// Append one chunk holding `data` to `dst`.
pub fn encode_chunk(data: &[u8], dst: &mut BytesMut) {
    if data.is_empty() {
        return;
    }

    dst.put(format!("{:x}\r\n", data.len()).as_bytes());
    dst.put(data);
    dst.put(&b"\r\n"[..]);
}

/// Append the terminating zero-size chunk to `dst`.
pub fn encode_last_chunk(dst: &mut BytesMut) {
    dst.put(&b"0\r\n\r\n"[..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_chunks_split_anywhere() {
        let wire = b"4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\nTrailer: x\r\n\r\n";

        for split in 1..wire.len() {
            let mut decoder = ChunkedDecoder::new(1024);
            let mut out = BytesMut::new();

            let mut buf = BytesMut::from(&wire[..split]);
            let done = decoder.decode(&mut buf, &mut out).unwrap();
            assert!(!done);

            buf.extend_from_slice(&wire[split..]);
            let done = decoder.decode(&mut buf, &mut out).unwrap();
            assert!(done, "split at {}", split);
            assert_eq!(&out[..], b"Wikipedia");
        }
    }

    #[test]
    fn rejects_bad_size() {
        let mut decoder = ChunkedDecoder::new(1024);
        let mut buf = BytesMut::from(&b"zz\r\n"[..]);
        let mut out = BytesMut::new();

        assert!(decoder.decode(&mut buf, &mut out).is_err());
    }

    #[test]
    fn enforces_limit() {
        let mut decoder = ChunkedDecoder::new(3);
        let mut buf = BytesMut::from(&b"4\r\nWiki\r\n"[..]);
        let mut out = BytesMut::new();

        assert!(matches!(
            decoder.decode(&mut buf, &mut out),
            Err(DecodeError::TooLarge { .. })
        ));
    }

    #[test]
    fn rejects_endless_size_line() {
        let mut decoder = ChunkedDecoder::new(1024);
        let mut out = BytesMut::new();

        let mut buf = BytesMut::from(&[b'0'; 512][..]);
        assert!(!decoder.decode(&mut buf, &mut out).unwrap());

        buf.extend_from_slice(&[b'0'; MAX_CHUNK_LINE]);
        assert!(matches!(
            decoder.decode(&mut buf, &mut out),
            Err(DecodeError::TooLarge {
                what: "chunk size line",
                ..
            })
        ));
    }

    #[test]
    fn rejects_oversized_trailer() {
        let mut decoder = ChunkedDecoder::new(1024).trailer_limit(32);
        let mut out = BytesMut::new();

        let mut buf = BytesMut::from(&b"0\r\nX-Short: 1\r\n"[..]);
        assert!(!decoder.decode(&mut buf, &mut out).unwrap());

        buf.extend_from_slice(b"X-Long: ");
        buf.extend_from_slice(&[b'a'; 64]);
        assert!(matches!(
            decoder.decode(&mut buf, &mut out),
            Err(DecodeError::TooLarge {
                what: "trailer section",
                ..
            })
        ));

        // Many short complete lines add up as well
        let mut decoder = ChunkedDecoder::new(1024).trailer_limit(32);
        let mut buf =
            BytesMut::from(&b"0\r\nA: 1\r\nB: 2\r\nC: 3\r\nD: 4\r\nE: 5\r\nF: 6\r\n"[..]);
        assert!(matches!(
            decoder.decode(&mut buf, &mut out),
            Err(DecodeError::TooLarge { .. })
        ));
    }

    #[test]
    fn encode_matches_decode() {
        let mut wire = BytesMut::new();
        encode_chunk(b"hello", &mut wire);
        encode_chunk(b"", &mut wire);
        encode_last_chunk(&mut wire);
        assert_eq!(&wire[..], b"5\r\nhello\r\n0\r\n\r\n");
    }
}
