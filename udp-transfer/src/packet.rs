//! Wire-format definitions for transfer frames.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (kind tag, offset, checksum, payload).
//! - Serialising a [`Packet`] into a fixed-length frame ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], reporting corrupt
//!   or malformed input as a [`PacketError`].
//!
//! Pure data transformation; nothing here touches a socket.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |             Kind tag (4 ASCII bytes, NUL padded)              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  Offset / sequence number                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     CRC-32 of payload                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |              Payload (capacity bytes, zero padded) ...        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 12 bytes.  Every frame of a session has
//! the same length, `HEADER_LEN + capacity`.
//!
//! ACK and NACK frames carry the tag of the frame they answer in the first four
//! payload bytes, so an acknowledgement for control sequence 34 can never be
//! mistaken for one covering data byte offset 34.

use std::fmt;

use thiserror::Error;

use crate::checksum;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 12;

/// Default maximum transmission unit for one frame.
pub const DEFAULT_MTU: usize = 1024;

/// Default payload capacity, `DEFAULT_MTU − HEADER_LEN`.
pub const DEFAULT_PAYLOAD_CAPACITY: usize = DEFAULT_MTU - HEADER_LEN;

/// Length of a kind tag on the wire.
pub const TAG_LEN: usize = 4;

// Byte offsets of each field within the serialised header.
const OFF_KIND: usize = 0;
const OFF_OFFSET: usize = 4;
const OFF_CHECKSUM: usize = 8;

/// The eight frame types of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// File name announcement.
    Name,
    /// Declared file length, ASCII decimal.
    Size,
    /// One byte of the whole-transfer digest.
    Hash,
    /// End of handshake; data follows.
    Start,
    /// File content at a byte offset.
    Data,
    /// End of data; offset encodes the data packet count.
    Stop,
    /// Positive acknowledgement.
    Ack,
    /// Negative acknowledgement (frame arrived corrupt).
    Nack,
}

impl PacketKind {
    /// On-wire tag for this kind.
    pub const fn tag(self) -> [u8; TAG_LEN] {
        match self {
            Self::Name => *b"NAME",
            Self::Size => *b"SIZE",
            Self::Hash => *b"HASH",
            Self::Start => *b"STRT",
            Self::Data => *b"DATA",
            Self::Stop => *b"STOP",
            Self::Ack => *b"ACK\0",
            Self::Nack => *b"NACK",
        }
    }

    /// Parse a tag; `None` for anything unrecognised.
    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        Some(match tag {
            b"NAME" => Self::Name,
            b"SIZE" => Self::Size,
            b"HASH" => Self::Hash,
            b"STRT" => Self::Start,
            b"DATA" => Self::Data,
            b"STOP" => Self::Stop,
            b"ACK\0" => Self::Ack,
            b"NACK" => Self::Nack,
            _ => return None,
        })
    }

    /// `true` for the kinds carried by the reliable single-packet exchange.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Self::Name | Self::Size | Self::Hash | Self::Start | Self::Stop
        )
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        let end = tag.iter().position(|&b| b == 0).unwrap_or(TAG_LEN);
        f.write_str(std::str::from_utf8(&tag[..end]).unwrap_or("????"))
    }
}

/// A protocol frame: kind, offset and payload.
///
/// The checksum is not stored: [`Packet::encode`] computes it and
/// [`Packet::decode`] verifies it.  A decoded payload always spans the full
/// capacity of the frame it came from, trailing zero padding included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    /// Byte offset for DATA, sequence discriminator for everything else.
    pub offset: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(kind: PacketKind, offset: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            offset,
            payload: payload.into(),
        }
    }

    /// Frame with an empty payload (START, STOP).
    pub fn empty(kind: PacketKind, offset: u32) -> Self {
        Self::new(kind, offset, Vec::<u8>::new())
    }

    /// ACK answering a frame of `kind` at `offset`.
    pub fn ack(kind: PacketKind, offset: u32) -> Self {
        Self::new(PacketKind::Ack, offset, kind.tag())
    }

    /// NACK answering a corrupt frame of `kind` at `offset`.
    pub fn nack(kind: PacketKind, offset: u32) -> Self {
        Self::new(PacketKind::Nack, offset, kind.tag())
    }

    /// For ACK / NACK frames: the kind of frame being answered.
    pub fn answered_kind(&self) -> Option<PacketKind> {
        match self.kind {
            PacketKind::Ack | PacketKind::Nack => self
                .payload
                .get(..TAG_LEN)
                .and_then(PacketKind::from_tag),
            _ => None,
        }
    }

    /// `true` when this is an ACK for a frame of `kind` at `offset`.
    pub fn acknowledges(&self, kind: PacketKind, offset: u32) -> bool {
        self.kind == PacketKind::Ack
            && self.offset == offset
            && self.answered_kind() == Some(kind)
    }

    /// Length of every frame for a given payload capacity.
    #[inline]
    pub const fn frame_len(capacity: usize) -> usize {
        HEADER_LEN + capacity
    }

    /// Serialise into a frame of exactly `HEADER_LEN + capacity` bytes.
    ///
    /// The payload is zero padded to `capacity`; the checksum covers the padded
    /// payload region.
    pub fn encode(&self, capacity: usize) -> Result<Vec<u8>, PacketError> {
        if self.payload.len() > capacity {
            return Err(PacketError::PayloadTooLarge {
                len: self.payload.len(),
                capacity,
            });
        }

        let mut buf = vec![0u8; Self::frame_len(capacity)];
        buf[OFF_KIND..OFF_KIND + TAG_LEN].copy_from_slice(&self.kind.tag());
        buf[OFF_OFFSET..OFF_OFFSET + 4].copy_from_slice(&self.offset.to_be_bytes());
        buf[HEADER_LEN..HEADER_LEN + self.payload.len()].copy_from_slice(&self.payload);

        let crc = checksum::checksum(&buf[HEADER_LEN..]);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&crc.to_be_bytes());

        Ok(buf)
    }

    /// Parse a [`Packet`] from a raw frame.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the kind tag is not one of the eight known tags, or
    /// - the payload checksum does not verify.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort(buf.len()));
        }

        let tag = &buf[OFF_KIND..OFF_KIND + TAG_LEN];
        let kind = PacketKind::from_tag(tag).ok_or_else(|| {
            let mut raw = [0u8; TAG_LEN];
            raw.copy_from_slice(tag);
            PacketError::UnknownKind(raw)
        })?;
        let offset = read_u32(buf, OFF_OFFSET);
        let crc = read_u32(buf, OFF_CHECKSUM);
        let payload = &buf[HEADER_LEN..];

        if !checksum::verify(payload, crc) {
            return Err(PacketError::ChecksumMismatch { kind, offset });
        }

        Ok(Self::new(kind, offset, payload))
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Errors that can arise when building or parsing a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Fewer bytes than the fixed header.
    #[error("frame of {0} bytes is shorter than the 12-byte header")]
    BufferTooShort(usize),
    /// Tag is not one of the known kinds.
    #[error("unknown frame tag {0:02x?}")]
    UnknownKind([u8; TAG_LEN]),
    /// Payload does not fit the configured capacity.
    #[error("payload of {len} bytes exceeds capacity {capacity}")]
    PayloadTooLarge { len: usize, capacity: usize },
    /// Payload CRC did not match; the header fields are reported as read.
    #[error("checksum mismatch on {kind} offset={offset}")]
    ChecksumMismatch { kind: PacketKind, offset: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: usize = 16;

    #[test]
    fn encode_decode_roundtrip() {
        let pkt = Packet::new(PacketKind::Data, 4096, &b"hello"[..]);
        let frame = pkt.encode(CAP).unwrap();
        let decoded = Packet::decode(&frame).unwrap();
        assert_eq!(decoded.kind, PacketKind::Data);
        assert_eq!(decoded.offset, 4096);
        assert_eq!(&decoded.payload[..5], b"hello");
        assert!(decoded.payload[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn frame_has_fixed_length() {
        let short = Packet::empty(PacketKind::Start, 34).encode(CAP).unwrap();
        let full = Packet::new(PacketKind::Data, 0, vec![7u8; CAP]).encode(CAP).unwrap();
        assert_eq!(short.len(), HEADER_LEN + CAP);
        assert_eq!(full.len(), HEADER_LEN + CAP);
    }

    #[test]
    fn header_is_big_endian_with_nul_padded_tag() {
        let frame = Packet::ack(PacketKind::Data, 0x0102_0304).encode(CAP).unwrap();
        assert_eq!(&frame[OFF_KIND..OFF_KIND + 4], b"ACK\0");
        assert_eq!(&frame[OFF_OFFSET..OFF_OFFSET + 4], &[0x01, 0x02, 0x03, 0x04]);
        let crc = checksum::checksum(&frame[HEADER_LEN..]);
        assert_eq!(&frame[OFF_CHECKSUM..OFF_CHECKSUM + 4], &crc.to_be_bytes());
    }

    #[test]
    fn oversized_payload_rejected() {
        let err = Packet::new(PacketKind::Data, 0, vec![0u8; CAP + 1])
            .encode(CAP)
            .unwrap_err();
        assert_eq!(
            err,
            PacketError::PayloadTooLarge {
                len: CAP + 1,
                capacity: CAP
            }
        );
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Packet::decode(&[0u8; HEADER_LEN - 1]),
            Err(PacketError::BufferTooShort(HEADER_LEN - 1))
        );
    }

    #[test]
    fn decode_unknown_tag_returns_error() {
        let mut frame = Packet::new(PacketKind::Name, 0, &b"f"[..]).encode(CAP).unwrap();
        frame[..4].copy_from_slice(b"RSND");
        assert_eq!(
            Packet::decode(&frame),
            Err(PacketError::UnknownKind(*b"RSND"))
        );
    }

    #[test]
    fn every_single_payload_bit_flip_is_detected() {
        let pkt = Packet::new(PacketKind::Data, 8, &b"ABCDEFGH"[..]);
        let frame = pkt.encode(CAP).unwrap();
        for byte in HEADER_LEN..frame.len() {
            for bit in 0..8 {
                let mut corrupt = frame.clone();
                corrupt[byte] ^= 1 << bit;
                assert_eq!(
                    Packet::decode(&corrupt),
                    Err(PacketError::ChecksumMismatch {
                        kind: PacketKind::Data,
                        offset: 8
                    }),
                    "flip of byte {byte} bit {bit} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn header_is_not_covered_by_checksum() {
        let mut frame = Packet::new(PacketKind::Data, 8, &b"x"[..]).encode(CAP).unwrap();
        frame[OFF_OFFSET + 3] = 12;
        assert_eq!(Packet::decode(&frame).unwrap().offset, 12);
    }

    #[test]
    fn ack_echoes_answered_kind() {
        let ack = Packet::decode(&Packet::ack(PacketKind::Hash, 5).encode(CAP).unwrap()).unwrap();
        assert_eq!(ack.answered_kind(), Some(PacketKind::Hash));
        assert!(ack.acknowledges(PacketKind::Hash, 5));
        assert!(!ack.acknowledges(PacketKind::Data, 5));
        assert!(!ack.acknowledges(PacketKind::Hash, 6));

        let nack = Packet::nack(PacketKind::Size, 1);
        assert_eq!(nack.answered_kind(), Some(PacketKind::Size));
        assert!(!nack.acknowledges(PacketKind::Size, 1));
    }

    #[test]
    fn tags_roundtrip_and_display() {
        for kind in [
            PacketKind::Name,
            PacketKind::Size,
            PacketKind::Hash,
            PacketKind::Start,
            PacketKind::Data,
            PacketKind::Stop,
            PacketKind::Ack,
            PacketKind::Nack,
        ] {
            assert_eq!(PacketKind::from_tag(&kind.tag()), Some(kind));
        }
        assert_eq!(PacketKind::Ack.to_string(), "ACK");
        assert_eq!(PacketKind::Start.to_string(), "STRT");
    }

    #[test]
    fn header_len_constant_is_correct() {
        // tag(4) + offset(4) + crc(4) = 12
        assert_eq!(HEADER_LEN, 12);
        assert_eq!(DEFAULT_PAYLOAD_CAPACITY, 1012);
    }
}
