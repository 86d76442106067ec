//! HTTP/1.1 message types and codec.

mod chunked;
mod decoder;
mod encode;
mod request;
mod response;

use bytes::BytesMut;

pub use self::{
    chunked::{encode_chunk, encode_last_chunk, ChunkedDecoder},
    decoder::{HttpDecoder, HttpLimits, MessageHead, ReadHint, Unframed},
    encode::{encode_request, encode_response},
    request::{validate_request_line, HttpRequest, RequestLine},
    response::{status_reason, HttpResponse},
};

use crate::{DecodeError, DecodeStatus, EncodeError};

/// Server side HTTP codec, decoding requests and encoding responses.
pub struct HttpServerCodec {
    decoder: HttpDecoder<HttpRequest>,
    secure: bool,
}

impl HttpServerCodec {
    /// Create a codec, `secure` sets the scheme reported for origin-form requests.
    pub fn new(limits: HttpLimits, secure: bool) -> Self {
        Self {
            decoder: HttpDecoder::new(limits),
            secure,
        }
    }

    pub fn set_read_hint(&mut self, hint: ReadHint) {
        self.decoder.set_read_hint(hint);
    }

    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeStatus<HttpRequest>, DecodeError> {
        let status = self.decoder.decode(buf)?;

        let secure = self.secure;
        Ok(status.map(|mut request| {
            if secure {
                request.set_default_scheme("https");
            }
            request
        }))
    }

    pub fn encode(
        &mut self,
        response: &HttpResponse,
        dst: &mut BytesMut,
    ) -> Result<(), EncodeError> {
        encode_response(response, dst)
    }
}

/// Client side HTTP codec, decoding responses and encoding requests.
pub struct HttpClientCodec {
    decoder: HttpDecoder<HttpResponse>,
}

impl HttpClientCodec {
    pub fn new(limits: HttpLimits) -> Self {
        Self {
            decoder: HttpDecoder::new(limits),
        }
    }

    pub fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<DecodeStatus<HttpResponse>, DecodeError> {
        self.decoder.decode(buf)
    }

    /// Complete a response whose body runs until the connection closes.
    pub fn finish(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<DecodeStatus<HttpResponse>, DecodeError> {
        self.decoder.finish(buf)
    }

    pub fn encode(
        &mut self,
        request: &HttpRequest,
        dst: &mut BytesMut,
    ) -> Result<(), EncodeError> {
        encode_request(request, dst)
    }
}
