use bytes::{BufMut, Bytes, BytesMut};
use wharf_proto::{
    http::{encode_response, HttpServerCodec, ReadHint},
    sse::{SseCodec, SseEvent},
    websocket::{Message, WebSocketCodec},
    DecodeError, DecodeStatus, EncodeError, HttpRequest, HttpResponse,
};

/// A decoded message arriving on a session.
#[derive(Debug)]
pub enum Inbound {
    Http(HttpRequest),
    WebSocket(Message),
    Raw(Bytes),
}

impl Inbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Http(_) => "http",
            Inbound::WebSocket(_) => "websocket",
            Inbound::Raw(_) => "raw",
        }
    }
}

/// A message a handler wants written to its session.
#[derive(Debug)]
pub enum Outbound {
    Http(HttpResponse),
    WebSocket(Message),
    Sse(SseEvent),
    /// Already encoded bytes, written as-is by every codec.
    Raw(Bytes),
}

impl Outbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Http(_) => "http",
            Outbound::WebSocket(_) => "websocket",
            Outbound::Sse(_) => "sse",
            Outbound::Raw(_) => "raw",
        }
    }
}

/// The protocol half of a session's encoder.
///
/// Exactly one codec is active per session at a time. Handlers replace it through
/// `SessionContext::switch_codec` when upgrading a connection.
pub trait ProtocolCodec: Send {
    fn name(&self) -> &'static str;

    /// Decode the next message from the front of `buf`.
    fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeStatus<Inbound>, DecodeError>;

    /// Called when the peer closed its side, to complete a message that runs until close.
    fn finish(&mut self, _buf: &mut BytesMut) -> Result<DecodeStatus<Inbound>, DecodeError> {
        Ok(DecodeStatus::Closed)
    }

    fn encode(&mut self, message: Outbound, dst: &mut BytesMut) -> Result<(), EncodeError>;

    /// Bytes that terminate the output stream, written before the session closes.
    fn encode_end(&mut self, _dst: &mut BytesMut) {}

    /// How the last read compared to the read buffer size.
    fn set_read_hint(&mut self, _hint: ReadHint) {}
}

fn unsupported(codec: &'static str, message: &Outbound) -> EncodeError {
    EncodeError::Unsupported {
        codec,
        message: message.kind(),
    }
}

impl ProtocolCodec for HttpServerCodec {
    fn name(&self) -> &'static str {
        "http"
    }

    fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeStatus<Inbound>, DecodeError> {
        Ok(HttpServerCodec::decode(self, buf)?.map(Inbound::Http))
    }

    fn encode(&mut self, message: Outbound, dst: &mut BytesMut) -> Result<(), EncodeError> {
        match message {
            Outbound::Http(response) => encode_response(&response, dst)?,
            Outbound::Raw(bytes) => dst.put(bytes),
            other => return Err(unsupported("http", &other)),
        }
        Ok(())
    }

    fn set_read_hint(&mut self, hint: ReadHint) {
        HttpServerCodec::set_read_hint(self, hint);
    }
}

impl ProtocolCodec for WebSocketCodec {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeStatus<Inbound>, DecodeError> {
        Ok(WebSocketCodec::decode(self, buf)?.map(Inbound::WebSocket))
    }

    fn encode(&mut self, message: Outbound, dst: &mut BytesMut) -> Result<(), EncodeError> {
        match message {
            Outbound::WebSocket(message) => WebSocketCodec::encode(self, &message, dst)?,
            Outbound::Raw(bytes) => dst.put(bytes),
            other => return Err(unsupported("websocket", &other)),
        }
        Ok(())
    }
}

/// Server side of an event stream, input is discarded.
impl ProtocolCodec for SseCodec {
    fn name(&self) -> &'static str {
        "sse"
    }

    fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeStatus<Inbound>, DecodeError> {
        buf.clear();
        Ok(DecodeStatus::NeedMoreData)
    }

    fn encode(&mut self, message: Outbound, dst: &mut BytesMut) -> Result<(), EncodeError> {
        match message {
            Outbound::Sse(event) => SseCodec::encode(self, &event, dst),
            Outbound::Raw(bytes) => dst.put(bytes),
            other => return Err(unsupported("sse", &other)),
        }
        Ok(())
    }

    fn encode_end(&mut self, dst: &mut BytesMut) {
        SseCodec::encode_end(self, dst);
    }
}

/// Passes bytes through untouched, for protocols handlers frame themselves.
#[derive(Default)]
pub struct RawCodec;

impl ProtocolCodec for RawCodec {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeStatus<Inbound>, DecodeError> {
        if buf.is_empty() {
            return Ok(DecodeStatus::NeedMoreData);
        }

        Ok(DecodeStatus::FullyRead(Inbound::Raw(buf.split().freeze())))
    }

    fn encode(&mut self, message: Outbound, dst: &mut BytesMut) -> Result<(), EncodeError> {
        match message {
            Outbound::Raw(bytes) => dst.put(bytes),
            other => return Err(unsupported("raw", &other)),
        }
        Ok(())
    }
}
