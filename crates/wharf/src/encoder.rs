use bytes::{Bytes, BytesMut};
use tracing::{event, Level};
use wharf_proto::{http::ReadHint, DecodeStatus};
use wharf_tls::TlsEngine;

use crate::{
    codec::{Inbound, Outbound, ProtocolCodec},
    SessionError,
};

/// Composes a session's optional TLS layer with its current protocol codec.
///
/// Inbound bytes are decrypted, buffered as plaintext, then decoded. Outbound messages are
/// encoded, then encrypted.
pub struct ChannelEncoder {
    tls: Option<TlsEngine>,
    codec: Box<dyn ProtocolCodec>,
    plaintext: BytesMut,
    tls_output: BytesMut,
    peer_closed: bool,
    output_closed: bool,
}

impl ChannelEncoder {
    pub fn new(codec: Box<dyn ProtocolCodec>, tls: Option<TlsEngine>) -> Self {
        Self {
            tls,
            codec,
            plaintext: BytesMut::new(),
            tls_output: BytesMut::new(),
            peer_closed: false,
            output_closed: false,
        }
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    pub fn is_handshaking(&self) -> bool {
        self.tls.as_ref().map_or(false, TlsEngine::is_handshaking)
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    /// Decrypt `bytes` if secure and add the plaintext to the decode buffer.
    ///
    /// Returns false once the peer ended the TLS stream with close_notify.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<bool, SessionError> {
        let Some(tls) = &mut self.tls else {
            self.plaintext.extend_from_slice(bytes);
            return Ok(true);
        };

        let result = tls.unwrap(bytes);

        // Handshake responses and alerts go out even if unwrapping failed
        match tls.take_outgoing() {
            Ok(records) => self.tls_output.extend_from_slice(&records),
            Err(error) => event!(Level::DEBUG, ?error, "failed to take tls records"),
        }

        match result? {
            Some(plaintext) => {
                self.plaintext.extend_from_slice(&plaintext);
                Ok(true)
            }
            None => {
                self.peer_closed = true;
                Ok(false)
            }
        }
    }

    /// Feed `bytes` and decode the next message.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<DecodeStatus<Inbound>, SessionError> {
        if !self.feed(bytes)? {
            return Ok(DecodeStatus::Closed);
        }

        self.decode_buffered()
    }

    /// Decode the next message from plaintext already buffered.
    pub fn decode_buffered(&mut self) -> Result<DecodeStatus<Inbound>, SessionError> {
        let status = self.codec.decode(&mut self.plaintext)?;

        if status.is_need_more_data() && self.peer_closed {
            return Ok(DecodeStatus::Closed);
        }

        Ok(status)
    }

    /// Complete a message at end of input.
    pub fn finish(&mut self) -> Result<DecodeStatus<Inbound>, SessionError> {
        Ok(self.codec.finish(&mut self.plaintext)?)
    }

    /// The channel reached end of input, decoding returns `Closed` once the buffer runs dry.
    pub(crate) fn mark_peer_closed(&mut self) {
        self.peer_closed = true;
    }

    pub fn has_buffered(&self) -> bool {
        !self.plaintext.is_empty()
    }

    pub fn set_read_hint(&mut self, hint: ReadHint) {
        self.codec.set_read_hint(hint);
    }

    /// Encode `message` with the current codec, then encrypt it if secure.
    pub fn encode(&mut self, message: Outbound) -> Result<Bytes, SessionError> {
        let mut encoded = BytesMut::new();
        self.codec.encode(message, &mut encoded)?;

        match &mut self.tls {
            Some(tls) => Ok(tls.wrap(&encoded)?),
            None => Ok(encoded.freeze()),
        }
    }

    /// TLS records produced while decoding, such as handshake messages.
    pub fn take_tls_output(&mut self) -> Option<Bytes> {
        if self.tls_output.is_empty() {
            return None;
        }

        Some(self.tls_output.split().freeze())
    }

    /// Switch protocols, plaintext still buffered is decoded by the new codec.
    pub fn set_codec(&mut self, codec: Box<dyn ProtocolCodec>) {
        event!(Level::DEBUG, from = self.codec.name(), to = codec.name(), "switching codec");
        self.codec = codec;
    }

    /// End the output stream, returning the codec trailer and TLS close_notify to send.
    ///
    /// Only the first call produces anything.
    pub fn close(&mut self) -> Option<Bytes> {
        if self.output_closed {
            return None;
        }
        self.output_closed = true;

        let mut trailer = BytesMut::new();
        self.codec.encode_end(&mut trailer);

        let mut out = BytesMut::new();
        match &mut self.tls {
            Some(tls) => {
                if !trailer.is_empty() {
                    match tls.wrap(&trailer) {
                        Ok(records) => out.extend_from_slice(&records),
                        Err(error) => event!(Level::DEBUG, ?error, "failed to wrap trailer"),
                    }
                }
                out.extend_from_slice(&tls.close());
            }
            None => out = trailer,
        }

        if out.is_empty() {
            return None;
        }
        Some(out.freeze())
    }
}

#[cfg(test)]
mod tests {
    use wharf_proto::sse::{SseCodec, SseEvent};

    use super::*;
    use crate::codec::RawCodec;

    #[test]
    fn plain_encoder_passes_bytes() {
        let mut encoder = ChannelEncoder::new(Box::new(RawCodec), None);

        let status = encoder.decode(b"hello").unwrap();
        assert!(matches!(status, DecodeStatus::FullyRead(Inbound::Raw(b)) if &b[..] == b"hello"));

        let out = encoder
            .encode(Outbound::Raw(Bytes::from_static(b"bye")))
            .unwrap();
        assert_eq!(&out[..], b"bye");
        assert!(encoder.take_tls_output().is_none());
    }

    #[test]
    fn close_emits_codec_trailer_once() {
        let mut encoder = ChannelEncoder::new(Box::new(SseCodec::chunked(1024)), None);
        encoder
            .encode(Outbound::Sse(SseEvent::new("x")))
            .unwrap();

        assert_eq!(encoder.close().as_deref(), Some(&b"0\r\n\r\n"[..]));
        assert!(encoder.close().is_none());
    }

    #[test]
    fn wrong_message_kind_fails_encode() {
        let mut encoder = ChannelEncoder::new(Box::new(RawCodec), None);
        let result = encoder.encode(Outbound::Sse(SseEvent::new("x")));
        assert!(matches!(result, Err(SessionError::Encode(_))));
    }
}
