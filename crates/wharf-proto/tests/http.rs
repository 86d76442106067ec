mod utils;

use anyhow::Error;
use bytes::BytesMut;
use tracing_test::traced_test;
use wharf_proto::{
    http::{encode_request, HttpLimits, HttpServerCodec},
    DecodeError, DecodeStatus, HttpRequest,
};

use crate::utils::{
    given_pipelined_requests, then_request_matches, when_requests_decoded_in_pieces,
};

#[test]
#[traced_test]
fn decoding_does_not_depend_on_read_boundaries() -> Result<(), Error> {
    let wire = given_pipelined_requests();

    for piece in 1..=wire.len() {
        let requests = when_requests_decoded_in_pieces(wire, piece)?;

        assert_eq!(requests.len(), 2, "piece size {}", piece);
        then_request_matches(&requests[0], "POST", "/upload", Some(b"hello world"));
        then_request_matches(&requests[1], "GET", "/status", Some(b"ok"));
        assert_eq!(requests[1].query_param("verbose"), Some("1"));
    }

    Ok(())
}

#[test]
#[traced_test]
fn headers_survive_decode_encode_decode() -> Result<(), Error> {
    let requests = when_requests_decoded_in_pieces(given_pipelined_requests(), 7)?;
    let original = &requests[0];

    // The body was de-chunked, so re-encoding frames it by length
    let mut reencoded = original.clone();
    reencoded.headers_mut().remove("Transfer-Encoding");
    let mut wire = BytesMut::new();
    encode_request(&reencoded, &mut wire)?;

    let decoded = when_requests_decoded_in_pieces(&wire, wire.len())?;
    let decoded = &decoded[0];

    assert_eq!(decoded.request_line(), original.request_line());
    assert_eq!(decoded.headers().get_all("x-trace"), ["a", "b"]);
    assert_eq!(decoded.host(), Some("example.com"));
    assert_eq!(decoded.port(), 8080);
    assert_eq!(decoded.body(), original.body());

    Ok(())
}

#[test]
#[traced_test]
fn oversized_header_block_is_rejected() -> Result<(), Error> {
    let limits = HttpLimits {
        max_header_size: 64,
        ..HttpLimits::default()
    };
    let mut codec = HttpServerCodec::new(limits, false);

    let request = HttpRequest::new("GET", "/").with_header("X-Filler", "x".repeat(128));
    let mut buf = BytesMut::new();
    encode_request(&request, &mut buf)?;

    let result = codec.decode(&mut buf);
    assert!(matches!(result, Err(DecodeError::TooLarge { .. })));

    Ok(())
}

#[test]
#[traced_test]
fn endless_chunk_size_line_is_rejected() -> Result<(), Error> {
    let limits = HttpLimits {
        max_header_size: 1024,
        max_body_size: 1024,
        ..HttpLimits::default()
    };
    let mut codec = HttpServerCodec::new(limits, false);
    let mut buf = BytesMut::from(
        &b"POST /upload HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n"[..],
    );

    let mut result = codec.decode(&mut buf);
    for _ in 0..64 {
        if !matches!(result, Ok(DecodeStatus::NeedMoreData)) {
            break;
        }

        buf.extend_from_slice(&[b'0'; 1024]);
        result = codec.decode(&mut buf);
    }

    assert!(matches!(result, Err(DecodeError::TooLarge { .. })));
    assert!(buf.len() <= 4096);

    Ok(())
}

#[test]
#[traced_test]
fn secure_codec_reports_https() -> Result<(), Error> {
    let mut codec = HttpServerCodec::new(HttpLimits::default(), true);
    let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n"[..]);

    let DecodeStatus::FullyRead(request) = codec.decode(&mut buf)? else {
        panic!("request not decoded");
    };
    assert_eq!(request.scheme(), "https");
    assert_eq!(request.port(), 443);

    Ok(())
}
