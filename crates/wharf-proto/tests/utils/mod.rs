use anyhow::{bail, Error};
use bytes::BytesMut;
use wharf_proto::{
    http::{HttpLimits, HttpServerCodec},
    sse::{SseEvent, SseParser},
    websocket::{Message, Role, WebSocketCodec},
    DecodeStatus, HttpRequest,
};

/// Two pipelined requests, the first with a chunked body, the second with a sized one.
pub fn given_pipelined_requests() -> &'static [u8] {
    b"POST /upload/ HTTP/1.1\r\n\
      Host: example.com:8080\r\n\
      Transfer-Encoding: chunked\r\n\
      X-Trace: a\r\n\
      X-Trace: b\r\n\
      \r\n\
      5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n\
      GET /status?verbose=1 HTTP/1.1\r\n\
      Host: example.com\r\n\
      Content-Length: 2\r\n\
      \r\n\
      ok"
}

/// Feed `wire` to a fresh server codec in pieces of at most `piece` bytes.
pub fn when_requests_decoded_in_pieces(
    wire: &[u8],
    piece: usize,
) -> Result<Vec<HttpRequest>, Error> {
    let mut codec = HttpServerCodec::new(HttpLimits::default(), false);
    let mut buf = BytesMut::new();
    let mut requests = Vec::new();

    for chunk in wire.chunks(piece) {
        buf.extend_from_slice(chunk);

        loop {
            match codec.decode(&mut buf)? {
                DecodeStatus::FullyRead(request) => requests.push(request),
                DecodeStatus::NeedMoreData => break,
                DecodeStatus::Closed => bail!("codec reported close"),
            }
        }
    }

    Ok(requests)
}

/// Parse `wire` as an event stream, split once at `split`.
pub fn when_events_decoded_split(wire: &[u8], split: usize) -> Result<Vec<SseEvent>, Error> {
    let mut parser = SseParser::new();
    let mut events = Vec::new();

    for part in [&wire[..split], &wire[split..]] {
        let mut buf = BytesMut::from(part);
        while let DecodeStatus::FullyRead(event) = parser.decode(&mut buf)? {
            events.push(event);
        }
    }

    events.extend(parser.finish()?);
    Ok(events)
}

/// Encode `messages` the way a client would, masked.
pub fn given_client_frames(messages: &[Message]) -> Result<BytesMut, Error> {
    let mut client = WebSocketCodec::new(Role::Client, Vec::new(), 1 << 20);
    let mut wire = BytesMut::new();

    for message in messages {
        client.encode(message, &mut wire)?;
    }

    Ok(wire)
}

pub fn then_request_matches(request: &HttpRequest, method: &str, path: &str, body: Option<&[u8]>) {
    assert_eq!(request.method(), method);
    assert_eq!(request.path(), path);
    assert_eq!(request.body().map(|b| &b[..]), body);
}
