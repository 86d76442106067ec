use bytes::{BufMut, BytesMut};

use crate::{EncodeError, Headers, HttpRequest, HttpResponse};

/// Serialize a request: request line, one header line per value, blank line, body.
///
/// Fails without writing anything if a header would split the message.
pub fn encode_request(request: &HttpRequest, dst: &mut BytesMut) -> Result<(), EncodeError> {
    check_headers(request.headers())?;

    dst.put(request.request_line().as_bytes());
    dst.put(&b"\r\n"[..]);

    let body = request.body().map(|b| &b[..]).unwrap_or_default();
    let add_length = !body.is_empty() && !is_framed(request.headers());
    encode_headers(request.headers(), add_length.then_some(body.len()), dst);

    dst.put(body);
    Ok(())
}

/// Serialize a response: status line, one header line per value, blank line, body.
///
/// `Content-Length` is added unless the response declares its own framing or can't carry a body.
/// Header names and values holding CR or LF are rejected.
pub fn encode_response(response: &HttpResponse, dst: &mut BytesMut) -> Result<(), EncodeError> {
    check_headers(response.headers())?;

    dst.put(response.status_line().as_bytes());
    dst.put(&b"\r\n"[..]);

    let body = response.body().map(|b| &b[..]).unwrap_or_default();
    let add_length = !response.is_bodyless() && !is_framed(response.headers());
    encode_headers(response.headers(), add_length.then_some(body.len()), dst);

    if !response.is_bodyless() {
        dst.put(body);
    }
    Ok(())
}

fn check_headers(headers: &Headers) -> Result<(), EncodeError> {
    let breaks_line = |text: &str| text.bytes().any(|b| b == b'\r' || b == b'\n');

    for (name, value) in headers.iter() {
        if name.is_empty() || name.contains(':') || breaks_line(name) || breaks_line(value) {
            return Err(EncodeError::InvalidHeader(name.to_string()));
        }
    }

    Ok(())
}

fn is_framed(headers: &Headers) -> bool {
    headers.contains("Content-Length") || headers.contains("Transfer-Encoding")
}

fn encode_headers(headers: &Headers, content_length: Option<usize>, dst: &mut BytesMut) {
    for (name, value) in headers.iter() {
        dst.put(name.as_bytes());
        dst.put(&b": "[..]);
        dst.put(value.as_bytes());
        dst.put(&b"\r\n"[..]);
    }

    if let Some(length) = content_length {
        dst.put(format!("Content-Length: {}\r\n", length).as_bytes());
    }

    dst.put(&b"\r\n"[..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_gets_content_length() {
        let response = HttpResponse::new(404)
            .with_header("Content-Type", "text/plain")
            .with_body("missing");

        let mut wire = BytesMut::new();
        encode_response(&response, &mut wire).unwrap();

        assert_eq!(
            &wire[..],
            &b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 7\r\n\r\nmissing"[..]
        );
    }

    #[test]
    fn multi_value_headers_get_one_line_each() {
        let response = HttpResponse::new(204)
            .with_header("Set-Cookie", "a=1")
            .with_header("Set-Cookie", "b=2");

        let mut wire = BytesMut::new();
        encode_response(&response, &mut wire).unwrap();

        assert_eq!(
            &wire[..],
            &b"HTTP/1.1 204 No Content\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n"[..]
        );
    }

    #[test]
    fn request_round_trips_line() {
        let request = HttpRequest::new("POST", "/submit?x=1")
            .with_header("Host", "example.com")
            .with_body("data");

        let mut wire = BytesMut::new();
        encode_request(&request, &mut wire).unwrap();

        assert_eq!(
            &wire[..],
            &b"POST /submit?x=1 HTTP/1.1\r\nHost: example.com\r\nContent-Length: 4\r\n\r\ndata"[..]
        );
    }

    #[test]
    fn header_injection_is_rejected() {
        let mut wire = BytesMut::new();

        let response = HttpResponse::new(200).with_header("Location", "/a\r\nSet-Cookie: x=1");
        assert!(matches!(
            encode_response(&response, &mut wire),
            Err(EncodeError::InvalidHeader(_))
        ));

        let response = HttpResponse::new(200).with_header("X-Bad\nName", "v");
        assert!(encode_response(&response, &mut wire).is_err());

        let request = HttpRequest::new("GET", "/").with_header("X-Echo", "a\nb");
        assert!(encode_request(&request, &mut wire).is_err());

        assert!(wire.is_empty());
    }
}
