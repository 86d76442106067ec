use bytes::{Bytes, BytesMut};
use tracing::{event, Level};

use crate::{
    buffer::{LineBuffer, DEFAULT_MAX_LINE},
    http::ChunkedDecoder,
    sse::SseEvent,
    DecodeError, DecodeStatus,
};

/// Incremental `text/event-stream` parser.
pub struct SseParser {
    lines: LineBuffer,
    chunked: Option<ChunkedDecoder>,
    pending: PendingEvent,
    max_event_size: usize,
    ended: bool,
}

#[derive(Default)]
struct PendingEvent {
    id: Option<String>,
    name: Option<String>,
    comments: Vec<String>,
    data: Vec<String>,
    retry: Option<u64>,
    size: usize,
}

impl PendingEvent {
    fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.name.is_none()
            && self.comments.is_empty()
            && self.data.is_empty()
            && self.retry.is_none()
    }

    fn grow(&mut self, bytes: usize, limit: usize) -> Result<(), DecodeError> {
        self.size += bytes;
        if self.size > limit {
            return Err(DecodeError::TooLarge { what: "event", limit });
        }
        Ok(())
    }

    fn take(&mut self) -> SseEvent {
        let pending = std::mem::take(self);

        let comment = if pending.comments.is_empty() {
            None
        } else {
            Some(pending.comments.join("\n"))
        };

        SseEvent {
            id: pending.id,
            name: pending.name,
            comment,
            data: pending.data.join("\n"),
            retry: pending.retry,
        }
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            lines: LineBuffer::new(),
            chunked: None,
            pending: PendingEvent::default(),
            max_event_size: DEFAULT_MAX_LINE,
            ended: false,
        }
    }

    /// Fail on any line or event larger than `size` bytes.
    pub fn max_event_size(mut self, size: usize) -> Self {
        self.lines = LineBuffer::with_limit(size);
        self.max_event_size = size;
        self
    }

    /// Parser for a stream framed with `Transfer-Encoding: chunked`.
    ///
    /// `limit` bounds the total payload of the stream.
    pub fn chunked(limit: usize) -> Self {
        Self {
            chunked: Some(ChunkedDecoder::new(limit)),
            ..Self::new()
        }
    }

    /// Consume all of `buf` and return the next complete event, if any.
    ///
    /// Call again with an empty buffer to drain further buffered events. With chunked framing,
    /// `Closed` is returned once the last chunk was seen and every event drained.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeStatus<SseEvent>, DecodeError> {
        match &mut self.chunked {
            Some(chunked) => {
                let mut payload = BytesMut::new();
                if chunked.decode(buf, &mut payload)? {
                    self.ended = true;
                }
                self.lines.extend(&payload);
            }
            None => {
                self.lines.extend(&buf[..]);
                buf.clear();
            }
        }

        while let Some(line) = self.lines.next_line()? {
            if let Some(event) = self.process_line(line)? {
                return Ok(DecodeStatus::FullyRead(event));
            }
        }

        if self.ended {
            return Ok(DecodeStatus::Closed);
        }

        Ok(DecodeStatus::NeedMoreData)
    }

    /// Flush the final event at end of stream.
    ///
    /// An unterminated event is only emitted if it carries data.
    pub fn finish(&mut self) -> Result<Option<SseEvent>, DecodeError> {
        if let Some(line) = self.lines.take_remaining() {
            if let Some(event) = self.process_line(line)? {
                return Ok(Some(event));
            }
        }

        if self.pending.data.is_empty() {
            self.pending = PendingEvent::default();
            return Ok(None);
        }

        Ok(Some(self.pending.take()))
    }

    fn process_line(&mut self, line: Bytes) -> Result<Option<SseEvent>, DecodeError> {
        if line.is_empty() {
            if self.pending.is_empty() {
                return Ok(None);
            }
            return Ok(Some(self.pending.take()));
        }

        let line = std::str::from_utf8(&line).map_err(|_| DecodeError::Utf8("event stream"))?;
        let (name, mut value) = line.split_once(':').unwrap_or((line, ""));
        if let Some(stripped) = value.strip_prefix(' ') {
            value = stripped;
        }
        self.pending.grow(line.len(), self.max_event_size)?;

        match name {
            "" => self.pending.comments.push(value.to_string()),
            "event" => self.pending.name = Some(value.to_string()),
            "data" => self.pending.data.push(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.pending.id = Some(value.to_string());
                }
            }
            "retry" => match value.parse() {
                Ok(retry) => self.pending.retry = Some(retry),
                Err(_) => event!(Level::DEBUG, value, "ignoring invalid retry field"),
            },
            other => event!(Level::TRACE, field = other, "ignoring unknown field"),
        }

        Ok(None)
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(parser: &mut SseParser, input: &[u8]) -> Vec<SseEvent> {
        let mut buf = BytesMut::from(input);
        let mut events = Vec::new();

        while let DecodeStatus::FullyRead(event) = parser.decode(&mut buf).unwrap() {
            events.push(event);
        }

        events
    }

    #[test]
    fn parses_fields() {
        let mut parser = SseParser::new();
        let events = decode_all(
            &mut parser,
            b": hello\nevent: tick\nid: 3\nretry: 250\ndata:a\ndata: b\nunknown: x\n\n",
        );

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.name.as_deref(), Some("tick"));
        assert_eq!(event.id.as_deref(), Some("3"));
        assert_eq!(event.comment.as_deref(), Some("hello"));
        assert_eq!(event.retry, Some(250));
        assert_eq!(event.data, "a\nb");
    }

    #[test]
    fn events_split_across_reads() {
        let wire = b"data: first\r\n\r\ndata: second\r\n\r\n";

        for split in 1..wire.len() {
            let mut parser = SseParser::new();
            let mut events = decode_all(&mut parser, &wire[..split]);
            events.extend(decode_all(&mut parser, &wire[split..]));

            let data: Vec<_> = events.iter().map(|e| e.data.as_str()).collect();
            assert_eq!(data, ["first", "second"], "split at {}", split);
        }
    }

    #[test]
    fn chunked_stream_closes_after_last_chunk() {
        let mut parser = SseParser::chunked(1024);
        let mut buf = BytesMut::from(&b"c\r\ndata: hello\n\r\n1\r\n\n\r\n0\r\n\r\n"[..]);

        match parser.decode(&mut buf).unwrap() {
            DecodeStatus::FullyRead(event) => assert_eq!(event.data, "hello"),
            _ => panic!("expected an event"),
        }
        assert!(matches!(
            parser.decode(&mut buf).unwrap(),
            DecodeStatus::Closed
        ));
    }

    #[test]
    fn oversized_input_is_rejected() {
        let mut parser = SseParser::new().max_event_size(32);
        let mut buf = BytesMut::from(&b"data: "[..]);
        buf.extend_from_slice(&[b'x'; 64]);
        assert!(matches!(
            parser.decode(&mut buf),
            Err(DecodeError::TooLarge { what: "line", .. })
        ));

        // Short lines that never end the event
        let mut parser = SseParser::new().max_event_size(32);
        let mut buf = BytesMut::from(&b"data: 0123456789\n"[..]);
        for _ in 0..3 {
            buf.extend_from_slice(b"data: 0123456789\n");
        }
        assert!(matches!(
            parser.decode(&mut buf),
            Err(DecodeError::TooLarge { what: "event", .. })
        ));
    }

    #[test]
    fn finish_emits_unterminated_event_with_data() {
        let mut parser = SseParser::new();
        assert!(decode_all(&mut parser, b"id: 1\ndata: tail").is_empty());

        let event = parser.finish().unwrap().unwrap();
        assert_eq!(event.data, "tail");
        assert_eq!(event.id.as_deref(), Some("1"));

        let mut parser = SseParser::new();
        decode_all(&mut parser, b"id: 1\n");
        assert!(parser.finish().unwrap().is_none());
    }
}
