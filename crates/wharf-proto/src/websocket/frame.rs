use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::DecodeError;

/// RSV1, as positioned in `Frame::rsv`.
pub const RSV1: u8 = 0b100;
/// RSV2, as positioned in `Frame::rsv`.
pub const RSV2: u8 = 0b010;
/// RSV3, as positioned in `Frame::rsv`.
pub const RSV3: u8 = 0b001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        let opcode = match value {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            _ => return None,
        };
        Some(opcode)
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// A single WebSocket frame, with an unmasked payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    /// RSV1-3 as the low three bits, RSV1 being the highest.
    pub rsv: u8,
    pub opcode: Opcode,
    /// Whether the frame arrived masked.
    pub masked: bool,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            rsv: 0,
            opcode,
            masked: false,
            payload: payload.into(),
        }
    }
}

/// Decode one frame from the front of `buf`, unmasking its payload.
///
/// Returns `None`, leaving `buf` untouched, if the frame isn't fully buffered yet.
pub fn decode_frame(buf: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>, DecodeError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let first = buf[0];
    let second = buf[1];

    let fin = first & 0x80 != 0;
    let rsv = (first >> 4) & 0b111;
    let opcode = Opcode::from_u8(first & 0x0F)
        .ok_or(DecodeError::WebSocket("reserved opcode"))?;
    let masked = second & 0x80 != 0;

    let (payload_len, mut header_len) = match second & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            let mut raw = [0; 8];
            raw.copy_from_slice(&buf[2..10]);
            let len = u64::from_be_bytes(raw);
            if len >> 63 != 0 {
                return Err(DecodeError::WebSocket("payload length high bit set"));
            }
            (len, 10)
        }
        len => (len as u64, 2),
    };

    if payload_len > max_payload as u64 {
        return Err(DecodeError::TooLarge {
            what: "frame payload",
            limit: max_payload,
        });
    }
    let payload_len = payload_len as usize;

    let mask_start = header_len;
    if masked {
        header_len += 4;
    }

    if buf.len() < header_len + payload_len {
        return Ok(None);
    }

    let mut mask = [0; 4];
    if masked {
        mask.copy_from_slice(&buf[mask_start..mask_start + 4]);
    }

    buf.advance(header_len);
    let mut payload = buf.split_to(payload_len);
    if masked {
        apply_mask(&mut payload, mask);
    }

    let frame = Frame {
        fin,
        rsv,
        opcode,
        masked,
        payload: payload.freeze(),
    };
    Ok(Some(frame))
}

/// Encode a frame, masking the payload with `mask` if given.
///
/// Servers never mask, clients always do.
pub fn encode_frame(frame: &Frame, mask: Option<[u8; 4]>, dst: &mut BytesMut) {
    let mut first = frame.opcode.as_u8() | (frame.rsv & 0b111) << 4;
    if frame.fin {
        first |= 0x80;
    }
    dst.put_u8(first);

    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    let len = frame.payload.len();
    if len < 126 {
        dst.put_u8(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(len as u64);
    }

    match mask {
        Some(mask) => {
            dst.put(&mask[..]);
            let start = dst.len();
            dst.put(&frame.payload[..]);
            apply_mask(&mut dst[start..], mask);
        }
        None => dst.put(&frame.payload[..]),
    }
}

fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_rfc_masked_hello() {
        // RFC 6455 section 5.7, a single-frame masked text message
        let wire = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let mut buf = BytesMut::from(&wire[..]);

        let frame = decode_frame(&mut buf, 1024).unwrap().unwrap();
        assert!(frame.fin);
        assert!(frame.masked);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(&frame.payload[..], b"Hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frames_wait_for_data() {
        let wire = [0x81, 0x85, 0x37, 0xfa, 0x21];
        let mut buf = BytesMut::from(&wire[..]);

        assert!(decode_frame(&mut buf, 1024).unwrap().is_none());
        assert_eq!(buf.len(), wire.len());
    }

    #[test]
    fn extended_lengths() {
        for len in [125, 126, 65535, 65536] {
            let frame = Frame::new(Opcode::Binary, vec![7u8; len]);
            let mut buf = BytesMut::new();
            encode_frame(&frame, Some([1, 2, 3, 4]), &mut buf);

            let decoded = decode_frame(&mut buf, 1 << 20).unwrap().unwrap();
            assert_eq!(decoded.payload.len(), len);
            assert!(decoded.payload.iter().all(|b| *b == 7));
        }
    }

    #[test]
    fn rejects_reserved_opcode() {
        let mut buf = BytesMut::from(&[0x83, 0x00][..]);
        assert!(decode_frame(&mut buf, 1024).is_err());
    }

    #[test]
    fn server_frames_unmasked() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::new(Opcode::Text, "Hello"), None, &mut buf);
        assert_eq!(&buf[..], &[0x81, 0x05, b'H', b'e', b'l', b'l', b'o'][..]);
    }
}
