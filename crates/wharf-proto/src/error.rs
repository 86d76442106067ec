use thiserror::Error;

/// Failed to decode a message from the wire.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The request line could not be parsed.
    #[error("malformed request line: {0:?}")]
    RequestLine(String),

    /// The status line could not be parsed.
    #[error("malformed status line: {0:?}")]
    StatusLine(String),

    /// A header line could not be parsed.
    #[error("malformed header line: {0:?}")]
    InvalidHeader(String),

    /// A header that frames the body carried an unusable value.
    #[error("invalid {name} value {value:?}")]
    InvalidFraming { name: &'static str, value: String },

    /// A chunk size line in chunked transfer framing was not valid hex.
    #[error("invalid chunk size line: {0:?}")]
    ChunkSize(String),

    /// A message exceeded a configured size limit.
    #[error("{what} exceeds limit of {limit} bytes")]
    TooLarge { what: &'static str, limit: usize },

    /// The input wasn't valid UTF-8 where text was required.
    #[error("invalid utf-8 in {0}")]
    Utf8(&'static str),

    /// The peer violated the WebSocket framing rules.
    #[error("websocket protocol violation: {0}")]
    WebSocket(&'static str),

    /// A frame used reserved bits no negotiated extension accounts for.
    #[error("unsupported rsv bits {0:#05b}")]
    ReservedBits(u8),

    /// A negotiated extension failed to transform a payload.
    #[error("extension {name} failed: {reason}")]
    Extension { name: &'static str, reason: String },
}

/// Failed to encode a message onto the wire.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// The codec can't encode this kind of message.
    #[error("codec {codec} cannot encode {message}")]
    Unsupported {
        codec: &'static str,
        message: &'static str,
    },

    /// A header name or value would break the message framing.
    #[error("invalid header {0:?}")]
    InvalidHeader(String),

    /// A control frame payload was longer than 125 bytes.
    #[error("control frame payload of {0} bytes is too long")]
    ControlTooLong(usize),

    /// A negotiated extension failed to transform a payload.
    #[error("extension {name} failed: {reason}")]
    Extension { name: &'static str, reason: String },
}
