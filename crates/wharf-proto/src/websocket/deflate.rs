use bytes::Bytes;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use tracing::{event, Level};

use crate::{
    websocket::{
        extension::{DataFrame, Extension, ExtensionOffer, Transformation},
        RSV1,
    },
    DecodeError, EncodeError,
};

const NAME: &str = "permessage-deflate";

/// Trailer removed from compressed messages, and added back before inflating.
const SYNC_TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// The `permessage-deflate` extension from RFC 7692.
#[derive(Debug, Clone)]
pub struct PerMessageDeflate {
    level: u32,
    max_message_size: usize,
}

impl PerMessageDeflate {
    pub fn new() -> Self {
        Self {
            level: Compression::default().level(),
            max_message_size: 16 * 1024 * 1024,
        }
    }

    pub fn level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Limit on the inflated size of a single message.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

impl Default for PerMessageDeflate {
    fn default() -> Self {
        Self::new()
    }
}

impl Extension for PerMessageDeflate {
    fn name(&self) -> &'static str {
        NAME
    }

    fn negotiate(&self, offer: &ExtensionOffer) -> Option<(String, Box<dyn Transformation>)> {
        // flate2 without zlib tuning only deflates with the full 15 bit window
        if let Some(Some(bits)) = offer.param("server_max_window_bits") {
            if bits != "15" {
                event!(Level::DEBUG, bits, "declining reduced server window");
                return None;
            }
        }

        let server_reset = offer.has_param("server_no_context_takeover");
        let client_reset = offer.has_param("client_no_context_takeover");

        let mut response = NAME.to_string();
        if server_reset {
            response.push_str("; server_no_context_takeover");
        }
        if client_reset {
            response.push_str("; client_no_context_takeover");
        }

        let transformation = DeflateTransformation {
            compress: Compress::new(Compression::new(self.level), false),
            decompress: Decompress::new(false),
            server_reset,
            client_reset,
            max_message_size: self.max_message_size,
        };
        Some((response, Box::new(transformation)))
    }
}

struct DeflateTransformation {
    compress: Compress,
    decompress: Decompress,
    server_reset: bool,
    client_reset: bool,
    max_message_size: usize,
}

impl Transformation for DeflateTransformation {
    fn name(&self) -> &'static str {
        NAME
    }

    fn reserved_bits(&self) -> u8 {
        RSV1
    }

    fn decode(&mut self, mut frame: DataFrame) -> Result<DataFrame, DecodeError> {
        if frame.rsv & RSV1 == 0 {
            return Ok(frame);
        }

        let inflated = self.inflate(&frame.payload)?;
        if self.client_reset {
            self.decompress.reset(false);
        }

        frame.rsv &= !RSV1;
        frame.payload = Bytes::from(inflated);
        Ok(frame)
    }

    fn encode(&mut self, mut frame: DataFrame) -> Result<DataFrame, EncodeError> {
        let deflated = self.deflate(&frame.payload)?;
        if self.server_reset {
            self.compress.reset();
        }

        frame.rsv |= RSV1;
        frame.payload = Bytes::from(deflated);
        Ok(frame)
    }
}

impl DeflateTransformation {
    fn deflate(&mut self, input: &[u8]) -> Result<Vec<u8>, EncodeError> {
        let error = |reason: String| EncodeError::Extension { name: NAME, reason };

        let mut out = Vec::with_capacity(input.len() / 2 + 64);
        let start = self.compress.total_in();

        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(64));
            }

            let consumed = (self.compress.total_in() - start) as usize;
            self.compress
                .compress_vec(&input[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| error(e.to_string()))?;

            // The sync flush is complete once all input is in and output space is left over
            let consumed = (self.compress.total_in() - start) as usize;
            if consumed == input.len() && out.len() < out.capacity() {
                break;
            }
        }

        if out.ends_with(&SYNC_TAIL) {
            out.truncate(out.len() - SYNC_TAIL.len());
        }

        Ok(out)
    }

    fn inflate(&mut self, input: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let error = |reason: String| DecodeError::Extension { name: NAME, reason };

        let mut data = Vec::with_capacity(input.len() + SYNC_TAIL.len());
        data.extend_from_slice(input);
        data.extend_from_slice(&SYNC_TAIL);

        let mut out = Vec::with_capacity(input.len() * 2 + 64);
        let start = self.decompress.total_in();

        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(64));
            }

            let consumed_before = (self.decompress.total_in() - start) as usize;
            let produced_before = out.len();
            self.decompress
                .decompress_vec(&data[consumed_before..], &mut out, FlushDecompress::Sync)
                .map_err(|e| error(e.to_string()))?;

            if out.len() > self.max_message_size {
                return Err(DecodeError::TooLarge {
                    what: "inflated message",
                    limit: self.max_message_size,
                });
            }

            let consumed = (self.decompress.total_in() - start) as usize;
            let finished = consumed == data.len() && out.len() < out.capacity();
            let stalled = consumed == consumed_before && out.len() == produced_before;
            if finished || (stalled && out.len() < out.capacity()) {
                break;
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::Opcode;

    fn negotiate(offer: &str) -> Option<(String, Box<dyn Transformation>)> {
        let mut headers = crate::Headers::new();
        headers.add("Sec-WebSocket-Extensions", offer);
        let offers = crate::websocket::parse_offers(&headers);

        PerMessageDeflate::new().negotiate(&offers[0])
    }

    #[test]
    fn compresses_and_inflates_across_messages() {
        let (response, mut transform) = negotiate("permessage-deflate").unwrap();
        assert_eq!(response, "permessage-deflate");

        // Context takeover means later messages reference earlier ones
        for _ in 0..3 {
            let frame = DataFrame {
                rsv: 0,
                opcode: Opcode::Text,
                payload: Bytes::from_static(b"Hello Hello Hello Hello"),
            };

            let encoded = transform.encode(frame.clone()).unwrap();
            assert_eq!(encoded.rsv, RSV1);
            assert!(!encoded.payload.ends_with(&SYNC_TAIL));

            let decoded = transform.decode(encoded).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn rfc_example_inflates() {
        // RFC 7692 section 7.2.3.1, "Hello" compressed
        let (_, mut transform) = negotiate("permessage-deflate").unwrap();
        let frame = DataFrame {
            rsv: RSV1,
            opcode: Opcode::Text,
            payload: Bytes::from_static(&[0xf2, 0x48, 0xcd, 0xc9, 0xc9, 0x07, 0x00]),
        };

        let decoded = transform.decode(frame).unwrap();
        assert_eq!(&decoded.payload[..], b"Hello");
        assert_eq!(decoded.rsv, 0);
    }

    #[test]
    fn echoes_no_context_takeover() {
        let (response, _) =
            negotiate("permessage-deflate; client_no_context_takeover; server_no_context_takeover")
                .unwrap();
        assert_eq!(
            response,
            "permessage-deflate; server_no_context_takeover; client_no_context_takeover"
        );
    }

    #[test]
    fn declines_small_server_window() {
        assert!(negotiate("permessage-deflate; server_max_window_bits=10").is_none());
    }
}
