use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};
use tracing::{event, Level};

use crate::{
    websocket::extension::{parse_offers, Extension, Transformation},
    HttpRequest, HttpResponse,
};

/// GUID appended to the client key before hashing, fixed by RFC 6455.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this implementation speaks.
pub const SUPPORTED_VERSION: &str = "13";

/// Compute `Sec-WebSocket-Accept` for a client's `Sec-WebSocket-Key`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

type OriginCheck = Arc<dyn Fn(Option<&str>) -> bool + Send + Sync>;

/// Server side opening handshake configuration.
#[derive(Clone, Default)]
pub struct Handshake {
    protocols: Vec<String>,
    extensions: Vec<Arc<dyn Extension>>,
    origin_check: Option<OriginCheck>,
}

/// A successful handshake, ready to switch the connection over.
pub struct Accepted {
    /// The `101 Switching Protocols` response.
    pub response: HttpResponse,
    pub protocol: Option<String>,
    /// Negotiated pipeline, in negotiation order.
    pub transformations: Vec<Box<dyn Transformation>>,
}

pub enum HandshakeOutcome {
    Accepted(Accepted),
    /// The request failed validation, send this error response and close.
    Rejected(HttpResponse),
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a supported sub-protocol, in server preference order.
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Install an extension that may be negotiated.
    pub fn extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Reject handshakes whose `Origin` this check returns false for, with `401`.
    pub fn origin_check<F>(mut self, check: F) -> Self
    where
        F: Fn(Option<&str>) -> bool + Send + Sync + 'static,
    {
        self.origin_check = Some(Arc::new(check));
        self
    }

    /// Check if `request` asks for a WebSocket upgrade at all.
    pub fn is_upgrade_request(request: &HttpRequest) -> bool {
        request.headers().contains_token("Upgrade", "websocket")
    }

    /// Validate an upgrade request and build the response.
    pub fn respond(&self, request: &HttpRequest) -> HandshakeOutcome {
        let headers = request.headers();

        if !request.method().eq_ignore_ascii_case("GET") {
            return reject(400, "websocket upgrade must use GET");
        }

        if !headers.contains_token("Upgrade", "websocket") {
            return reject(400, "missing Upgrade: websocket");
        }

        if !headers.contains_token("Connection", "upgrade") {
            return reject(400, "missing Connection: Upgrade");
        }

        if headers.get("Sec-WebSocket-Version") != Some(SUPPORTED_VERSION) {
            event!(Level::DEBUG, "unsupported websocket version");
            let response = HttpResponse::new(426)
                .with_header("Sec-WebSocket-Version", SUPPORTED_VERSION);
            return HandshakeOutcome::Rejected(response);
        }

        let Some(key) = headers.get("Sec-WebSocket-Key") else {
            return reject(400, "missing Sec-WebSocket-Key");
        };
        let valid_key = STANDARD.decode(key).map(|k| k.len() == 16).unwrap_or(false);
        if !valid_key {
            return reject(400, "invalid Sec-WebSocket-Key");
        }

        if let Some(check) = &self.origin_check {
            if !check(headers.get("Origin")) {
                return reject(401, "origin not allowed");
            }
        }

        let mut response = HttpResponse::new(101)
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "Upgrade")
            .with_header("Sec-WebSocket-Accept", accept_key(key));

        let protocol = self.select_protocol(request);
        if let Some(protocol) = &protocol {
            response
                .headers_mut()
                .add("Sec-WebSocket-Protocol", protocol.clone());
        }

        let (accepted, transformations) = self.negotiate_extensions(request);
        if !accepted.is_empty() {
            response
                .headers_mut()
                .add("Sec-WebSocket-Extensions", accepted.join(", "));
        }

        HandshakeOutcome::Accepted(Accepted {
            response,
            protocol,
            transformations,
        })
    }

    /// First client-requested sub-protocol the server supports.
    fn select_protocol(&self, request: &HttpRequest) -> Option<String> {
        request
            .headers()
            .tokens("Sec-WebSocket-Protocol")
            .find(|requested| self.protocols.iter().any(|p| p == requested))
            .map(str::to_string)
    }

    fn negotiate_extensions(
        &self,
        request: &HttpRequest,
    ) -> (Vec<String>, Vec<Box<dyn Transformation>>) {
        let mut accepted = Vec::new();
        let mut transformations: Vec<Box<dyn Transformation>> = Vec::new();
        let mut used_bits = 0;

        for offer in parse_offers(request.headers()) {
            let Some(extension) = self.extensions.iter().find(|e| e.name() == offer.name) else {
                continue;
            };

            // Only the first accepted offer per extension counts
            if transformations.iter().any(|t| t.name() == extension.name()) {
                continue;
            }

            let Some((params, transformation)) = extension.negotiate(&offer) else {
                continue;
            };

            // Two transformations can't share reserved bits
            if transformation.reserved_bits() & used_bits != 0 {
                continue;
            }

            used_bits |= transformation.reserved_bits();
            accepted.push(params);
            transformations.push(transformation);
        }

        (accepted, transformations)
    }
}

fn reject(status: u16, reason: &str) -> HandshakeOutcome {
    event!(Level::DEBUG, status, reason, "rejecting websocket handshake");

    let response = HttpResponse::new(status)
        .with_header("Content-Type", "text/plain")
        .with_body(reason.to_string());
    HandshakeOutcome::Rejected(response)
}
