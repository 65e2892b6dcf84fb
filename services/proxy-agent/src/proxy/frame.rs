//! Minecraft handshake and login-disconnect framing.
//!
//! Wire format:
//! - frame: VarInt length, then `length` bytes of packet
//! - packet: VarInt packet id, then fields
//! - string: VarInt byte length, then UTF-8
//!
//! Only the first client frame (the handshake) is parsed. Everything after it
//! is forwarded untouched.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::message::DisconnectMessage;

/// Longest VarInt encoding of an `i32`.
pub const MAX_VARINT_LEN: usize = 5;

/// Upper bound on a handshake frame.
pub const MAX_HANDSHAKE_LEN: usize = 1024;

/// Longest server address accepted in a handshake (255 chars of UTF-8).
const MAX_ADDRESS_LEN: usize = 255 * 4;

const HANDSHAKE_PACKET_ID: i32 = 0x00;
const LOGIN_DISCONNECT_PACKET_ID: i32 = 0x00;

/// Handshake `next_state` values.
pub const STATE_STATUS: i32 = 1;
pub const STATE_LOGIN: i32 = 2;
pub const STATE_TRANSFER: i32 = 3;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("varint is longer than {MAX_VARINT_LEN} bytes")]
    VarIntTooLong,

    #[error("frame is truncated")]
    Truncated,

    #[error("frame length {0} is out of bounds")]
    InvalidLength(i32),

    #[error("unexpected packet id {0:#04x}")]
    UnexpectedPacket(i32),

    #[error("string is not valid UTF-8")]
    InvalidString,
}

pub fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut v = value as u32;
    loop {
        if v & !0x7F == 0 {
            buf.push(v as u8);
            return;
        }
        buf.push((v & 0x7F) as u8 | 0x80);
        v >>= 7;
    }
}

/// Decode a VarInt from the front of `buf`. Returns the value and its length.
pub fn read_varint(buf: &[u8]) -> Result<(i32, usize), FrameError> {
    let mut value: u32 = 0;
    for (i, byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value as i32, i + 1));
        }
    }

    if buf.len() < MAX_VARINT_LEN {
        Err(FrameError::Truncated)
    } else {
        Err(FrameError::VarIntTooLong)
    }
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_varint(buf, value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

/// Wrap a packet body in a length-prefixed frame.
fn frame(packet: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(packet.len() + MAX_VARINT_LEN);
    write_varint(&mut out, packet.len() as i32);
    out.extend_from_slice(packet);
    out
}

/// Cursor over a packet body.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn varint(&mut self) -> Result<i32, FrameError> {
        let (value, len) = read_varint(self.buf)?;
        self.buf = &self.buf[len..];
        Ok(value)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], FrameError> {
        if self.buf.len() < len {
            return Err(FrameError::Truncated);
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn string(&mut self, max_len: usize) -> Result<String, FrameError> {
        let len = self.varint()?;
        if len < 0 || len as usize > max_len {
            return Err(FrameError::InvalidLength(len));
        }
        let bytes = self.bytes(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::InvalidString)
    }

    fn u16(&mut self) -> Result<u16, FrameError> {
        let bytes = self.bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}

/// A complete frame as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    raw: Vec<u8>,
    header_len: usize,
}

impl Frame {
    /// Packet body (without the length prefix).
    pub fn payload(&self) -> &[u8] {
        &self.raw[self.header_len..]
    }

    /// The frame exactly as received, for forwarding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

/// Read one frame of at most `max_len` bytes.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = Vec::with_capacity(MAX_VARINT_LEN);
    let length = loop {
        let byte = reader.read_u8().await?;
        raw.push(byte);
        if byte & 0x80 == 0 {
            break read_varint(&raw)?.0;
        }
        if raw.len() == MAX_VARINT_LEN {
            return Err(FrameError::VarIntTooLong);
        }
    };

    if length <= 0 || length as usize > max_len {
        return Err(FrameError::InvalidLength(length));
    }

    let header_len = raw.len();
    raw.resize(header_len + length as usize, 0);
    reader.read_exact(&mut raw[header_len..]).await?;

    Ok(Frame { raw, header_len })
}

/// The first packet a client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: i32,
}

impl Handshake {
    pub fn parse(payload: &[u8]) -> Result<Self, FrameError> {
        let mut reader = Reader { buf: payload };

        let packet_id = reader.varint()?;
        if packet_id != HANDSHAKE_PACKET_ID {
            return Err(FrameError::UnexpectedPacket(packet_id));
        }

        Ok(Self {
            protocol_version: reader.varint()?,
            server_address: reader.string(MAX_ADDRESS_LEN)?,
            server_port: reader.u16()?,
            next_state: reader.varint()?,
        })
    }

    /// Whether the client intends to log in (or transfer in).
    pub fn is_login(&self) -> bool {
        matches!(self.next_state, STATE_LOGIN | STATE_TRANSFER)
    }

    /// Encode as a complete frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::new();
        write_varint(&mut packet, HANDSHAKE_PACKET_ID);
        write_varint(&mut packet, self.protocol_version);
        write_string(&mut packet, &self.server_address);
        packet.extend_from_slice(&self.server_port.to_be_bytes());
        write_varint(&mut packet, self.next_state);
        frame(&packet)
    }
}

/// Login-state disconnect frame carrying `message` as a JSON chat component.
pub fn login_disconnect(message: &DisconnectMessage) -> Vec<u8> {
    let mut packet = Vec::new();
    write_varint(&mut packet, LOGIN_DISCONNECT_PACKET_ID);
    write_string(&mut packet, &message.to_json());
    frame(&packet)
}

/// Decode the JSON reason out of a login-disconnect frame.
pub fn parse_login_disconnect(payload: &[u8]) -> Result<String, FrameError> {
    let mut reader = Reader { buf: payload };
    let packet_id = reader.varint()?;
    if packet_id != LOGIN_DISCONNECT_PACKET_ID {
        return Err(FrameError::UnexpectedPacket(packet_id));
    }
    reader.string(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::NOT_ACCEPTING_PLAYERS;

    fn varint(value: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(&mut buf, value);
        buf
    }

    #[test]
    fn test_varint_known_encodings() {
        assert_eq!(varint(0), [0x00]);
        assert_eq!(varint(1), [0x01]);
        assert_eq!(varint(127), [0x7F]);
        assert_eq!(varint(128), [0x80, 0x01]);
        assert_eq!(varint(300), [0xAC, 0x02]);
        assert_eq!(varint(25565), [0xDD, 0xC7, 0x01]);
        assert_eq!(varint(-1), [0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);

        assert_eq!(read_varint(&[0xAC, 0x02, 0xFF]).unwrap(), (300, 2));
        assert_eq!(read_varint(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]).unwrap(), (-1, 5));
    }

    #[test]
    fn test_varint_errors() {
        assert!(matches!(read_varint(&[]), Err(FrameError::Truncated)));
        assert!(matches!(read_varint(&[0x80, 0x80]), Err(FrameError::Truncated)));
        assert!(matches!(
            read_varint(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]),
            Err(FrameError::VarIntTooLong)
        ));
    }

    #[tokio::test]
    async fn test_read_handshake_frame() {
        let handshake = Handshake {
            protocol_version: 767,
            server_address: "play.example.net".to_string(),
            server_port: 25565,
            next_state: STATE_LOGIN,
        };
        let mut wire = handshake.encode();
        wire.extend_from_slice(b"trailing login start");

        let mut reader = wire.as_slice();
        let frame = read_frame(&mut reader, MAX_HANDSHAKE_LEN).await.unwrap();

        assert_eq!(Handshake::parse(frame.payload()).unwrap(), handshake);
        assert_eq!(frame.as_bytes(), handshake.encode().as_slice());
        assert_eq!(reader, b"trailing login start");
        assert!(handshake.is_login());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized() {
        let mut wire = varint(4096);
        wire.extend(std::iter::repeat(0).take(4096));

        let mut reader = wire.as_slice();
        let err = read_frame(&mut reader, MAX_HANDSHAKE_LEN).await.unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength(4096)));
    }

    #[tokio::test]
    async fn test_read_frame_truncated_body() {
        let mut wire = varint(10);
        wire.extend_from_slice(&[0x00, 0x01]);

        let mut reader = wire.as_slice();
        let err = read_frame(&mut reader, MAX_HANDSHAKE_LEN).await.unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_parse_rejects_other_packets() {
        let err = Handshake::parse(&[0x01, 0x00]).unwrap_err();
        assert!(matches!(err, FrameError::UnexpectedPacket(1)));
    }

    #[test]
    fn test_status_handshake_is_not_login() {
        let handshake = Handshake {
            protocol_version: 767,
            server_address: "localhost".to_string(),
            server_port: 25577,
            next_state: STATE_STATUS,
        };
        assert!(!handshake.is_login());
    }

    #[test]
    fn test_login_disconnect_carries_json() {
        let bytes = login_disconnect(&NOT_ACCEPTING_PLAYERS);

        let (length, header_len) = read_varint(&bytes).unwrap();
        assert_eq!(length as usize, bytes.len() - header_len);

        let json = parse_login_disconnect(&bytes[header_len..]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["extra"][1]["text"], NOT_ACCEPTING_PLAYERS.text);
        assert_eq!(value["extra"][0]["color"], "light_purple");
    }
}
