use bytes::{BufMut, Bytes, BytesMut};

use crate::DecodeError;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away, such as a server shutting down.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Protocol error.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Text frame payload that wasn't valid UTF-8.
pub const CLOSE_INVALID_PAYLOAD: u16 = 1007;
/// Message too big to process.
pub const CLOSE_TOO_BIG: u16 = 1009;
/// Unexpected condition on the server.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// A complete WebSocket message, after reassembly and extension processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseFrame>),
}

impl Message {
    pub fn text(value: impl Into<String>) -> Self {
        Message::Text(value.into())
    }

    pub fn binary(value: impl Into<Bytes>) -> Self {
        Message::Binary(value.into())
    }

    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        }))
    }

    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Message::Ping(_) | Message::Pong(_) | Message::Close(_)
        )
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Text(_) => "text",
            Message::Binary(_) => "binary",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Close(_) => "close",
        }
    }
}

/// Status code and reason of a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub(crate) fn decode(payload: &[u8]) -> Result<Option<Self>, DecodeError> {
        match payload.len() {
            0 => Ok(None),
            1 => Err(DecodeError::WebSocket("close payload of one byte")),
            _ => {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                if !is_valid_close_code(code) {
                    return Err(DecodeError::WebSocket("invalid close code"));
                }

                let reason = std::str::from_utf8(&payload[2..])
                    .map_err(|_| DecodeError::Utf8("close reason"))?;

                Ok(Some(CloseFrame {
                    code,
                    reason: reason.to_string(),
                }))
            }
        }
    }

    pub(crate) fn encode(frame: Option<&CloseFrame>) -> Bytes {
        let Some(frame) = frame else {
            return Bytes::new();
        };

        let mut payload = BytesMut::with_capacity(2 + frame.reason.len());
        payload.put_u16(frame.code);
        payload.put(frame.reason.as_bytes());
        payload.freeze()
    }
}

fn is_valid_close_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
}
