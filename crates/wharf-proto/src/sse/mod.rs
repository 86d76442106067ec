//! Server-sent events.

mod event;
mod parser;
mod reader;

use bytes::BytesMut;

pub use self::{event::SseEvent, parser::SseParser, reader::SseStreamReader};

use crate::{
    http::{encode_chunk, encode_last_chunk},
    DecodeError, DecodeStatus,
};

/// Media type of an event stream.
pub const CONTENT_TYPE: &str = "text/event-stream";

/// Event stream codec, optionally framing each event as one HTTP chunk.
pub struct SseCodec {
    parser: SseParser,
    chunked: bool,
}

impl SseCodec {
    /// Codec for a bare event stream.
    pub fn new() -> Self {
        Self {
            parser: SseParser::new(),
            chunked: false,
        }
    }

    /// Codec for an event stream sent with `Transfer-Encoding: chunked`.
    pub fn chunked(limit: usize) -> Self {
        Self {
            parser: SseParser::chunked(limit),
            chunked: true,
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeStatus<SseEvent>, DecodeError> {
        self.parser.decode(buf)
    }

    pub fn finish(&mut self) -> Result<Option<SseEvent>, DecodeError> {
        self.parser.finish()
    }

    pub fn encode(&mut self, event: &SseEvent, dst: &mut BytesMut) {
        if !self.chunked {
            event.encode(dst);
            return;
        }

        let mut body = BytesMut::new();
        event.encode(&mut body);
        encode_chunk(&body, dst);
    }

    /// Terminate the stream, a no-op without chunked framing.
    pub fn encode_end(&mut self, dst: &mut BytesMut) {
        if self.chunked {
            encode_last_chunk(dst);
        }
    }
}

impl Default for SseCodec {
    fn default() -> Self {
        Self::new()
    }
}
