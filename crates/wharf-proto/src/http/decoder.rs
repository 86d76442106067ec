use bytes::{BufMut, Bytes, BytesMut};
use tracing::{event, Level};

use crate::{
    buffer::{find_header_end, split_token, trim_ascii},
    http::chunked::ChunkedDecoder,
    DecodeError, DecodeStatus, Headers, HttpRequest, HttpResponse,
};

/// Size limits and framing options for decoding HTTP messages.
#[derive(Debug, Clone, Copy)]
pub struct HttpLimits {
    pub max_header_size: usize,
    pub max_body_size: usize,
    /// Treat a read that didn't fill the read buffer as the end of an unframed body.
    ///
    /// Messages with `Content-Length` or chunked framing are unaffected.
    pub short_read_heuristic: bool,
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            max_header_size: 16 * 1024,
            max_body_size: 8 * 1024 * 1024,
            short_read_heuristic: false,
        }
    }
}

/// How the end of a read compared to the size of the read buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadHint {
    /// The read filled the buffer, more data is likely pending.
    Full,
    /// The read returned less than the buffer could hold.
    Partial,
}

/// Head of an HTTP message, built once the header block is complete.
pub trait MessageHead: Sized {
    /// Build the head from the first line and the header fields.
    fn from_head(first_line: &str, headers: Headers) -> Result<Self, DecodeError>;

    fn headers(&self) -> &Headers;

    fn set_body(&mut self, body: Option<Bytes>);

    /// Framing used when the message declares neither a length nor chunked encoding.
    fn unframed_body(&self) -> Unframed;
}

/// Body handling for messages without explicit framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unframed {
    /// The message has no body.
    Empty,
    /// The body runs until the peer closes the connection.
    UntilClose,
}

impl MessageHead for HttpRequest {
    fn from_head(first_line: &str, headers: Headers) -> Result<Self, DecodeError> {
        HttpRequest::from_raw_line(first_line, headers)
    }

    fn headers(&self) -> &Headers {
        HttpRequest::headers(self)
    }

    fn set_body(&mut self, body: Option<Bytes>) {
        HttpRequest::set_body(self, body)
    }

    fn unframed_body(&self) -> Unframed {
        Unframed::Empty
    }
}

impl MessageHead for HttpResponse {
    fn from_head(first_line: &str, headers: Headers) -> Result<Self, DecodeError> {
        HttpResponse::from_status_line(first_line, headers)
    }

    fn headers(&self) -> &Headers {
        HttpResponse::headers(self)
    }

    fn set_body(&mut self, body: Option<Bytes>) {
        HttpResponse::set_body(self, body)
    }

    fn unframed_body(&self) -> Unframed {
        if self.is_bodyless() {
            Unframed::Empty
        } else {
            Unframed::UntilClose
        }
    }
}

enum Framing {
    Length(usize),
    Chunked(ChunkedDecoder),
    UntilClose,
    ShortRead,
}

enum State<M> {
    Head,
    Body {
        head: M,
        framing: Framing,
        body: BytesMut,
    },
}

/// Incremental HTTP/1.x message decoder.
///
/// Raw chunks are accumulated by the caller in one buffer; the decoder consumes exactly one
/// message from the front of it per `FullyRead`, leaving pipelined bytes in place.
pub struct HttpDecoder<M> {
    limits: HttpLimits,
    state: State<M>,
    last_read: ReadHint,
}

impl<M: MessageHead> HttpDecoder<M> {
    pub fn new(limits: HttpLimits) -> Self {
        Self {
            limits,
            state: State::Head,
            last_read: ReadHint::Full,
        }
    }

    /// Record how the most recent read compared to the read buffer size.
    pub fn set_read_hint(&mut self, hint: ReadHint) {
        self.last_read = hint;
    }

    /// True if no partial message is buffered in the decoder.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Head)
    }

    /// Decode the next message from the front of `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeStatus<M>, DecodeError> {
        if let State::Head = self.state {
            let Some(head) = self.decode_head(buf)? else {
                return Ok(DecodeStatus::NeedMoreData);
            };
            let framing = self.framing(&head)?;

            self.state = State::Body {
                head,
                framing,
                body: BytesMut::new(),
            };
        }

        self.decode_body(buf)
    }

    /// Complete a message at end of stream, for bodies that run until close.
    pub fn finish(&mut self, buf: &mut BytesMut) -> Result<DecodeStatus<M>, DecodeError> {
        let state = std::mem::replace(&mut self.state, State::Head);

        match state {
            State::Body {
                mut head,
                framing: Framing::UntilClose | Framing::ShortRead,
                mut body,
            } => {
                body.put(buf.split());
                head.set_body(non_empty(body));
                Ok(DecodeStatus::FullyRead(head))
            }
            _ => Ok(DecodeStatus::Closed),
        }
    }

    fn decode_head(&self, buf: &mut BytesMut) -> Result<Option<M>, DecodeError> {
        // Tolerate stray empty lines between pipelined messages
        while buf.starts_with(b"\r\n") {
            let _ = buf.split_to(2);
        }

        let Some(end) = find_header_end(buf) else {
            if buf.len() > self.limits.max_header_size {
                return Err(DecodeError::TooLarge {
                    what: "header block",
                    limit: self.limits.max_header_size,
                });
            }
            return Ok(None);
        };

        if end > self.limits.max_header_size {
            return Err(DecodeError::TooLarge {
                what: "header block",
                limit: self.limits.max_header_size,
            });
        }

        let block = buf.split_to(end);
        let text = std::str::from_utf8(&block).map_err(|_| DecodeError::Utf8("header block"))?;

        let mut lines = text.lines();
        let first_line = lines.next().unwrap_or_default();

        let mut headers = Headers::new();
        for line in lines {
            if line.is_empty() {
                break;
            }

            // Folded continuation lines aren't supported
            if line.starts_with([' ', '\t']) {
                return Err(DecodeError::InvalidHeader(line.to_string()));
            }

            let (name, value) = split_token(line.as_bytes(), b':');
            let (Some(value), false) = (value, name.is_empty()) else {
                return Err(DecodeError::InvalidHeader(line.to_string()));
            };

            let name = String::from_utf8_lossy(trim_ascii(name)).into_owned();
            let value = String::from_utf8_lossy(trim_ascii(value)).into_owned();
            headers.add(name, value);
        }

        let head = M::from_head(first_line, headers)?;
        Ok(Some(head))
    }

    fn framing(&self, head: &M) -> Result<Framing, DecodeError> {
        let headers = head.headers();

        if let Some(encoding) = headers.tokens("Transfer-Encoding").last() {
            if !encoding.eq_ignore_ascii_case("chunked") {
                return Err(DecodeError::InvalidFraming {
                    name: "Transfer-Encoding",
                    value: encoding.to_string(),
                });
            }

            let decoder = ChunkedDecoder::new(self.limits.max_body_size)
                .trailer_limit(self.limits.max_header_size);
            return Ok(Framing::Chunked(decoder));
        }

        if let Some(length) = headers.get("Content-Length") {
            let length: usize = length.parse().map_err(|_| DecodeError::InvalidFraming {
                name: "Content-Length",
                value: length.to_string(),
            })?;

            if length > self.limits.max_body_size {
                return Err(DecodeError::TooLarge {
                    what: "body",
                    limit: self.limits.max_body_size,
                });
            }

            return Ok(Framing::Length(length));
        }

        if self.limits.short_read_heuristic {
            return Ok(Framing::ShortRead);
        }

        let framing = match head.unframed_body() {
            Unframed::Empty => Framing::Length(0),
            Unframed::UntilClose => Framing::UntilClose,
        };
        Ok(framing)
    }

    fn decode_body(&mut self, buf: &mut BytesMut) -> Result<DecodeStatus<M>, DecodeError> {
        let State::Body { framing, body, .. } = &mut self.state else {
            return Ok(DecodeStatus::NeedMoreData);
        };

        let done = match framing {
            Framing::Length(length) => {
                let wanted = *length - body.len();
                let count = wanted.min(buf.len());
                body.put(buf.split_to(count));
                body.len() == *length
            }
            Framing::Chunked(decoder) => decoder.decode(buf, body)?,
            Framing::UntilClose | Framing::ShortRead => {
                body.put(buf.split());
                if body.len() > self.limits.max_body_size {
                    return Err(DecodeError::TooLarge {
                        what: "body",
                        limit: self.limits.max_body_size,
                    });
                }

                matches!(framing, Framing::ShortRead) && self.last_read == ReadHint::Partial
            }
        };

        if !done {
            return Ok(DecodeStatus::NeedMoreData);
        }

        let State::Body { mut head, body, .. } = std::mem::replace(&mut self.state, State::Head)
        else {
            return Ok(DecodeStatus::NeedMoreData);
        };

        event!(Level::TRACE, body = body.len(), "message decoded");
        head.set_body(non_empty(body));
        Ok(DecodeStatus::FullyRead(head))
    }
}

fn non_empty(body: BytesMut) -> Option<Bytes> {
    if body.is_empty() {
        None
    } else {
        Some(body.freeze())
    }
}
