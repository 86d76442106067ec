//! Sans-IO protocol codecs: HTTP/1.1, WebSocket and server-sent events.
//!
//! Every decoder works on a growable `BytesMut` that the caller keeps appending reads to,
//! returning `DecodeStatus::NeedMoreData` until a whole message is buffered. Where a message
//! ends in the input never depends on how the input was split over reads.

pub mod buffer;
mod codec;
mod error;
mod headers;
pub mod http;
pub mod sse;
pub mod websocket;

pub use self::{
    codec::DecodeStatus,
    error::{DecodeError, EncodeError},
    headers::Headers,
    http::{HttpRequest, HttpResponse},
};
