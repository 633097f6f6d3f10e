//! Outer frame layout and the stream codec.
//!
//! Every wire message, in either direction, is one frame: an 8-byte clear
//! header followed by the encrypted envelope produced by
//! [`CryptoContext::seal`]. Multi-byte header fields are network byte order.
//!
//! Header layout:
//! - \[0\]:    version (currently 1)
//! - \[1\]:    message type
//! - \[2..4\]: reserved (zero on send, ignored on receive)
//! - \[4..8\]: envelope length (big-endian u32)

use bytes::{Buf, BytesMut};

use crate::crypto::CryptoContext;
use crate::error::FrameError;

/// Wire protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Clear header size: version(1) + type(1) + reserved(2) + length(4).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Upper bound on the encrypted envelope carried by one frame.
pub const MAX_ENCRYPTED_PAYLOAD: usize = 64 * 1024;

/// Message type byte carried in the clear frame header.
///
/// Unknown byte values are not a protocol error; the server ignores them so
/// the type space can grow without breaking old peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Set the sender's username
    Hello = 0,
    /// A chat line (or a system notice pushed by the server)
    Chat = 1,
    /// Move the sender into a named room
    Join = 2,
    /// Leave the service
    Disconnect = 3,
    /// Request / carry the room listing
    ListRooms = 4,
    /// Request / carry the user listing for the sender's room
    ListUsers = 5,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Hello),
            1 => Some(Self::Chat),
            2 => Some(Self::Join),
            3 => Some(Self::Disconnect),
            4 => Some(Self::ListRooms),
            5 => Some(Self::ListUsers),
            _ => None,
        }
    }
}

/// Parsed clear header of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub msg_type: u8,
    pub length: u32,
}

impl FrameHeader {
    /// Parse and validate a raw header.
    ///
    /// Version and length are checked here, before the rest of the frame has
    /// necessarily arrived, so a poisoned stream dies on its first header.
    pub fn parse(bytes: &[u8; FRAME_HEADER_SIZE]) -> Result<Self, FrameError> {
        let version = bytes[0];
        if version != PROTOCOL_VERSION {
            return Err(FrameError::BadVersion(version));
        }

        let length = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if length as usize > MAX_ENCRYPTED_PAYLOAD {
            return Err(FrameError::PayloadTooLarge(length as usize));
        }

        Ok(Self {
            version,
            msg_type: bytes[1],
            length,
        })
    }

    fn write(msg_type: u8, length: u32, out: &mut Vec<u8>) {
        out.push(PROTOCOL_VERSION);
        out.push(msg_type);
        out.extend_from_slice(&0u16.to_be_bytes()); // reserved
        out.extend_from_slice(&length.to_be_bytes());
    }
}

/// One fully decoded inbound frame.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u8,
    pub payload: Vec<u8>,
}

/// Encrypt `plaintext` under `ctx` and wrap it in a wire frame.
pub fn encode_message(
    msg_type: MessageType,
    plaintext: &[u8],
    ctx: &mut CryptoContext,
) -> Result<Vec<u8>, FrameError> {
    let envelope = ctx.seal(plaintext);
    if envelope.len() > MAX_ENCRYPTED_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(envelope.len()));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + envelope.len());
    FrameHeader::write(msg_type as u8, envelope.len() as u32, &mut frame);
    frame.extend_from_slice(&envelope);
    Ok(frame)
}

/// Try to pull one complete frame off the front of `buf`.
///
/// Three-valued result: `Ok(Some(frame))` consumes the frame's bytes from
/// the buffer, `Ok(None)` means the buffer holds only a frame prefix and
/// more bytes are needed, and any `Err` is a protocol violation after which
/// the stream cannot be resynchronized.
pub fn try_decode(
    buf: &mut BytesMut,
    ctx: &mut CryptoContext,
) -> Result<Option<Frame>, FrameError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
    header_bytes.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
    let header = FrameHeader::parse(&header_bytes)?;

    let total = FRAME_HEADER_SIZE + header.length as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let payload = ctx.open(&buf[FRAME_HEADER_SIZE..total])?;
    buf.advance(total);

    Ok(Some(Frame {
        msg_type: header.msg_type,
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"frame_codec_test_secret";

    fn pair() -> (CryptoContext, CryptoContext) {
        (
            CryptoContext::from_shared_secret(SECRET),
            CryptoContext::from_shared_secret(SECRET),
        )
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let (mut sender, mut receiver) = pair();

        let frame = encode_message(MessageType::Chat, b"hello room", &mut sender).unwrap();
        let mut buf = BytesMut::from(&frame[..]);

        let decoded = try_decode(&mut buf, &mut receiver).unwrap().unwrap();
        assert_eq!(decoded.msg_type, MessageType::Chat as u8);
        assert_eq!(decoded.payload, b"hello room");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incremental_decode() {
        let (mut sender, mut receiver) = pair();
        let frame = encode_message(MessageType::Hello, b"alice", &mut sender).unwrap();

        // Feed one byte at a time: no frame until the last byte lands.
        let mut buf = BytesMut::new();
        for &byte in &frame[..frame.len() - 1] {
            buf.extend_from_slice(&[byte]);
            assert!(try_decode(&mut buf, &mut receiver).unwrap().is_none());
        }

        buf.extend_from_slice(&frame[frame.len() - 1..]);
        let decoded = try_decode(&mut buf, &mut receiver).unwrap().unwrap();
        assert_eq!(decoded.payload, b"alice");
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let (mut sender, mut receiver) = pair();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_message(MessageType::Chat, b"one", &mut sender).unwrap());
        buf.extend_from_slice(&encode_message(MessageType::Chat, b"two", &mut sender).unwrap());

        assert_eq!(
            try_decode(&mut buf, &mut receiver).unwrap().unwrap().payload,
            b"one"
        );
        assert_eq!(
            try_decode(&mut buf, &mut receiver).unwrap().unwrap().payload,
            b"two"
        );
        assert!(try_decode(&mut buf, &mut receiver).unwrap().is_none());
    }

    #[test]
    fn test_bad_version_rejected() {
        let (mut sender, mut receiver) = pair();
        let mut frame = encode_message(MessageType::Chat, b"x", &mut sender).unwrap();
        frame[0] = 2;

        let mut buf = BytesMut::from(&frame[..]);
        assert!(matches!(
            try_decode(&mut buf, &mut receiver),
            Err(FrameError::BadVersion(2))
        ));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        header[0] = PROTOCOL_VERSION;
        header[4..8].copy_from_slice(&((MAX_ENCRYPTED_PAYLOAD as u32) + 1).to_be_bytes());

        // The length check fires off the header alone, with no body present.
        let mut buf = BytesMut::from(&header[..]);
        let mut receiver = CryptoContext::from_shared_secret(SECRET);
        assert!(matches!(
            try_decode(&mut buf, &mut receiver),
            Err(FrameError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let (mut sender, mut receiver) = pair();
        let mut frame = encode_message(MessageType::Chat, b"x", &mut sender).unwrap();
        frame[1] = 0x7f;

        let mut buf = BytesMut::from(&frame[..]);
        let decoded = try_decode(&mut buf, &mut receiver).unwrap().unwrap();
        assert_eq!(decoded.msg_type, 0x7f);
        assert!(MessageType::from_u8(decoded.msg_type).is_none());
    }

    #[test]
    fn test_trailing_bytes_preserved() {
        let (mut sender, mut receiver) = pair();
        let frame = encode_message(MessageType::Chat, b"full", &mut sender).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame);
        buf.extend_from_slice(&[1, 2, 3]);

        try_decode(&mut buf, &mut receiver).unwrap().unwrap();
        assert_eq!(&buf[..], &[1, 2, 3]);
    }

    #[test]
    fn test_tampered_envelope_rejected() {
        let (mut sender, mut receiver) = pair();
        let mut frame = encode_message(MessageType::Chat, b"payload", &mut sender).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x80;

        let mut buf = BytesMut::from(&frame[..]);
        assert!(matches!(
            try_decode(&mut buf, &mut receiver),
            Err(FrameError::Crypto(_))
        ));
    }
}
