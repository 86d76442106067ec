use bytes::Bytes;

use crate::{websocket::Opcode, DecodeError, EncodeError, Headers};

/// Payload of a data message moving through the transformation pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// RSV bits of the first frame of the message.
    pub rsv: u8,
    pub opcode: Opcode,
    pub payload: Bytes,
}

/// A negotiated per-connection payload transformation, such as compression.
///
/// Outgoing messages pass through the pipeline in negotiation order, incoming messages in
/// reverse.
pub trait Transformation: Send {
    fn name(&self) -> &'static str;

    /// RSV bits this transformation may set, in `Frame::rsv` layout.
    fn reserved_bits(&self) -> u8;

    /// Undo this transformation on an incoming message.
    fn decode(&mut self, frame: DataFrame) -> Result<DataFrame, DecodeError>;

    /// Apply this transformation to an outgoing message.
    fn encode(&mut self, frame: DataFrame) -> Result<DataFrame, EncodeError>;
}

/// An installed extension the server is willing to negotiate.
pub trait Extension: Send + Sync {
    /// Registered extension token, such as `permessage-deflate`.
    fn name(&self) -> &'static str;

    /// Accept a client offer, returning the response parameters and the transformation.
    ///
    /// Returning `None` declines this offer, letting the next offer for the same extension be
    /// considered.
    fn negotiate(&self, offer: &ExtensionOffer) -> Option<(String, Box<dyn Transformation>)>;
}

/// One comma-separated element of a `Sec-WebSocket-Extensions` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    pub name: String,
    pub params: Vec<(String, Option<String>)>,
}

impl ExtensionOffer {
    pub fn param(&self, name: &str) -> Option<Option<&str>> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_deref())
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }
}

/// Parse all extension offers from the request headers, in order.
pub fn parse_offers(headers: &Headers) -> Vec<ExtensionOffer> {
    let mut offers = Vec::new();

    for element in headers.tokens("Sec-WebSocket-Extensions") {
        let mut parts = element.split(';').map(str::trim);
        let Some(name) = parts.next().filter(|n| !n.is_empty()) else {
            continue;
        };

        let params = parts
            .filter(|p| !p.is_empty())
            .map(|param| match param.split_once('=') {
                Some((key, value)) => (
                    key.trim().to_string(),
                    Some(value.trim().trim_matches('"').to_string()),
                ),
                None => (param.to_string(), None),
            })
            .collect();

        offers.push(ExtensionOffer {
            name: name.to_string(),
            params,
        });
    }

    offers
}
