//! WebSocket handshake, framing and extensions (RFC 6455, RFC 7692).

mod codec;
mod deflate;
mod extension;
mod frame;
mod handshake;
mod message;

pub use self::{
    codec::{Role, WebSocketCodec},
    deflate::PerMessageDeflate,
    extension::{parse_offers, DataFrame, Extension, ExtensionOffer, Transformation},
    frame::{decode_frame, encode_frame, Frame, Opcode, RSV1, RSV2, RSV3},
    handshake::{accept_key, Accepted, Handshake, HandshakeOutcome, SUPPORTED_VERSION, WEBSOCKET_GUID},
    message::{
        CloseFrame, Message, CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR, CLOSE_INVALID_PAYLOAD,
        CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR, CLOSE_TOO_BIG,
    },
};
