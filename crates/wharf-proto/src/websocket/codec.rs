use bytes::{BufMut, Bytes, BytesMut};
use tracing::{event, Level};

use crate::{
    websocket::{
        decode_frame, encode_frame, CloseFrame, DataFrame, Frame, Message, Opcode, Transformation,
    },
    DecodeError, DecodeStatus, EncodeError,
};

/// Which end of the connection this codec runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Expects masked frames, sends unmasked ones.
    Server,
    /// Expects unmasked frames, sends masked ones.
    Client,
}

/// WebSocket message codec, reassembling fragments and running the extension pipeline.
pub struct WebSocketCodec {
    role: Role,
    transformations: Vec<Box<dyn Transformation>>,
    allowed_rsv: u8,
    max_message_size: usize,
    partial: Option<PartialMessage>,
    mask_seed: u32,
}

struct PartialMessage {
    opcode: Opcode,
    rsv: u8,
    payload: BytesMut,
}

impl WebSocketCodec {
    pub fn new(
        role: Role,
        transformations: Vec<Box<dyn Transformation>>,
        max_message_size: usize,
    ) -> Self {
        let allowed_rsv = transformations
            .iter()
            .fold(0, |bits, t| bits | t.reserved_bits());

        Self {
            role,
            transformations,
            allowed_rsv,
            max_message_size,
            partial: None,
            mask_seed: 0x9e37_79b9,
        }
    }

    /// Decode the next complete message from the front of `buf`.
    ///
    /// Control frames interleaved with a fragmented message are returned as soon as they arrive.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<DecodeStatus<Message>, DecodeError> {
        loop {
            let Some(frame) = decode_frame(buf, self.max_message_size)? else {
                return Ok(DecodeStatus::NeedMoreData);
            };

            match (self.role, frame.masked) {
                (Role::Server, false) => {
                    return Err(DecodeError::WebSocket("client frame not masked"));
                }
                (Role::Client, true) => {
                    return Err(DecodeError::WebSocket("server frame masked"));
                }
                _ => {}
            }

            if frame.opcode.is_control() {
                return self.decode_control(frame).map(DecodeStatus::FullyRead);
            }

            if let Some(message) = self.decode_data(frame)? {
                return Ok(DecodeStatus::FullyRead(message));
            }
        }
    }

    fn decode_control(&mut self, frame: Frame) -> Result<Message, DecodeError> {
        if !frame.fin {
            return Err(DecodeError::WebSocket("fragmented control frame"));
        }
        if frame.payload.len() > 125 {
            return Err(DecodeError::WebSocket("control frame too long"));
        }
        if frame.rsv != 0 {
            return Err(DecodeError::ReservedBits(frame.rsv));
        }

        let message = match frame.opcode {
            Opcode::Ping => Message::Ping(frame.payload),
            Opcode::Pong => Message::Pong(frame.payload),
            _ => Message::Close(CloseFrame::decode(&frame.payload)?),
        };
        Ok(message)
    }

    fn decode_data(&mut self, frame: Frame) -> Result<Option<Message>, DecodeError> {
        let partial = match (frame.opcode, self.partial.take()) {
            (Opcode::Continuation, None) => {
                return Err(DecodeError::WebSocket("continuation without a message"));
            }
            (Opcode::Continuation, Some(mut partial)) => {
                // Only the first frame of a message may carry extension bits
                if frame.rsv != 0 {
                    return Err(DecodeError::ReservedBits(frame.rsv));
                }

                if partial.payload.len() + frame.payload.len() > self.max_message_size {
                    return Err(DecodeError::TooLarge {
                        what: "message",
                        limit: self.max_message_size,
                    });
                }

                partial.payload.put(frame.payload);
                partial
            }
            (_, Some(_)) => {
                return Err(DecodeError::WebSocket("new message before previous finished"));
            }
            (opcode, None) => {
                if frame.rsv & !self.allowed_rsv != 0 {
                    return Err(DecodeError::ReservedBits(frame.rsv));
                }

                PartialMessage {
                    opcode,
                    rsv: frame.rsv,
                    payload: BytesMut::from(&frame.payload[..]),
                }
            }
        };

        if !frame.fin {
            self.partial = Some(partial);
            return Ok(None);
        }

        let mut data = DataFrame {
            rsv: partial.rsv,
            opcode: partial.opcode,
            payload: partial.payload.freeze(),
        };
        for transformation in self.transformations.iter_mut().rev() {
            data = transformation.decode(data)?;
        }

        if data.rsv != 0 {
            return Err(DecodeError::ReservedBits(data.rsv));
        }

        let message = match data.opcode {
            Opcode::Text => {
                let text = String::from_utf8(data.payload.to_vec())
                    .map_err(|_| DecodeError::Utf8("text message"))?;
                Message::Text(text)
            }
            _ => Message::Binary(data.payload),
        };

        event!(Level::TRACE, kind = message.kind(), "message decoded");
        Ok(Some(message))
    }

    /// Encode `message` as a single unfragmented frame.
    pub fn encode(&mut self, message: &Message, dst: &mut BytesMut) -> Result<(), EncodeError> {
        let frame = match message {
            Message::Ping(payload) => control_frame(Opcode::Ping, payload.clone())?,
            Message::Pong(payload) => control_frame(Opcode::Pong, payload.clone())?,
            Message::Close(close) => control_frame(Opcode::Close, CloseFrame::encode(close.as_ref()))?,
            Message::Text(text) => self.data_frame(Opcode::Text, Bytes::from(text.clone()))?,
            Message::Binary(data) => self.data_frame(Opcode::Binary, data.clone())?,
        };

        let mask = match self.role {
            Role::Server => None,
            Role::Client => Some(self.next_mask()),
        };
        encode_frame(&frame, mask, dst);

        Ok(())
    }

    fn data_frame(&mut self, opcode: Opcode, payload: Bytes) -> Result<Frame, EncodeError> {
        let mut data = DataFrame {
            rsv: 0,
            opcode,
            payload,
        };
        for transformation in self.transformations.iter_mut() {
            data = transformation.encode(data)?;
        }

        Ok(Frame {
            fin: true,
            rsv: data.rsv,
            opcode: data.opcode,
            masked: false,
            payload: data.payload,
        })
    }

    /// Cheap xorshift mask generator, masking only needs to be unpredictable to intermediaries.
    fn next_mask(&mut self) -> [u8; 4] {
        let mut x = self.mask_seed;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.mask_seed = x;
        x.to_be_bytes()
    }
}

fn control_frame(opcode: Opcode, payload: Bytes) -> Result<Frame, EncodeError> {
    if payload.len() > 125 {
        return Err(EncodeError::ControlTooLong(payload.len()));
    }

    Ok(Frame::new(opcode, payload))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        websocket::{parse_offers, Extension, PerMessageDeflate, RSV1, RSV2},
        Headers,
    };

    fn client_frame(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_frame(&frame, Some([0x11, 0x22, 0x33, 0x44]), &mut buf);
        buf
    }

    fn server() -> WebSocketCodec {
        WebSocketCodec::new(Role::Server, Vec::new(), 1 << 20)
    }

    fn expect_message(status: DecodeStatus<Message>) -> Message {
        match status {
            DecodeStatus::FullyRead(message) => message,
            _ => panic!("expected a message"),
        }
    }

    #[test]
    fn reassembles_fragments_around_ping() {
        let mut codec = server();

        let mut first = Frame::new(Opcode::Text, "Hel");
        first.fin = false;
        let mut last = Frame::new(Opcode::Continuation, "lo");
        last.fin = true;

        let mut buf = client_frame(first);
        buf.put(client_frame(Frame::new(Opcode::Ping, "p")));
        buf.put(client_frame(last));

        let ping = expect_message(codec.decode(&mut buf).unwrap());
        assert_eq!(ping, Message::Ping(Bytes::from_static(b"p")));

        let text = expect_message(codec.decode(&mut buf).unwrap());
        assert_eq!(text, Message::text("Hello"));
    }

    #[test]
    fn rejects_unmasked_client_frames() {
        let mut codec = server();
        let mut buf = BytesMut::new();
        encode_frame(&Frame::new(Opcode::Text, "hi"), None, &mut buf);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn rejects_unnegotiated_rsv() {
        let mut codec = server();
        let mut frame = Frame::new(Opcode::Binary, "x");
        frame.rsv = RSV1;
        let mut buf = client_frame(frame);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(DecodeError::ReservedBits(_))
        ));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut codec = server();
        let mut buf = client_frame(Frame::new(Opcode::Text, vec![0xff, 0xfe]));

        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::Utf8(_))));
    }

    #[test]
    fn decodes_close_frame() {
        let mut codec = server();
        let payload = CloseFrame::encode(Some(&CloseFrame {
            code: 1000,
            reason: "bye".to_string(),
        }));
        let mut buf = client_frame(Frame::new(Opcode::Close, payload));

        let message = expect_message(codec.decode(&mut buf).unwrap());
        assert_eq!(message, Message::close(1000, "bye"));
    }

    #[test]
    fn server_encodes_unmasked() {
        let mut codec = server();
        let mut buf = BytesMut::new();
        codec.encode(&Message::text("Hello"), &mut buf).unwrap();

        assert_eq!(&buf[..], &[0x81, 0x05, b'H', b'e', b'l', b'l', b'o'][..]);
    }

    #[test]
    fn compressed_messages_round_trip_between_roles() {
        let mut headers = Headers::new();
        headers.add("Sec-WebSocket-Extensions", "permessage-deflate");
        let offer = &parse_offers(&headers)[0];

        let deflate = Arc::new(PerMessageDeflate::new());
        let (_, server_side) = deflate.negotiate(offer).unwrap();
        let (_, client_side) = deflate.negotiate(offer).unwrap();

        let mut server = WebSocketCodec::new(Role::Server, vec![server_side], 1 << 20);
        let mut client = WebSocketCodec::new(Role::Client, vec![client_side], 1 << 20);

        let mut wire = BytesMut::new();
        client.encode(&Message::text("compress me please"), &mut wire).unwrap();
        assert_eq!(wire[0] & 0x40, 0x40, "rsv1 set");

        let message = expect_message(server.decode(&mut wire).unwrap());
        assert_eq!(message, Message::text("compress me please"));

        // Frames using a bit no extension negotiated still fail
        let mut frame = Frame::new(Opcode::Binary, "x");
        frame.rsv = RSV2;
        let mut buf = client_frame(frame);
        assert!(server.decode(&mut buf).is_err());
    }
}
