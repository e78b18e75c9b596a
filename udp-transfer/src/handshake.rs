//! Control packets: sequence layout, payload encoding, receiver manifest.
//!
//! Control offsets come from one increasing counter so every control frame of
//! a session has a distinct offset.  NAME and SIZE are fields: the value is
//! prefixed with its length as a big-endian `u32` and cut into payload-sized
//! pieces, one control packet per piece.
//!
//! ```text
//!  NAME  0 .. n                      n = ceil((4 + name_len) / capacity)
//!  SIZE  n .. n+m                    m = ceil((4 + digits) / capacity)
//!  HASH  h .. h+DIGEST_LEN           h = n+m, digest byte i at h+i
//!  STRT  h+DIGEST_LEN
//!  STOP  h+DIGEST_LEN+1 + total_packets
//! ```
//!
//! At the default capacity both fields take one packet, so HASH starts at 2
//! and START sits at 34.  NAME carries the UTF-8 file name, SIZE the length in
//! ASCII decimal, HASH the raw digest byte in payload byte 0.

use std::collections::BTreeMap;

use crate::digest::{FileDigest, DIGEST_LEN};
use crate::error::TransferError;
use crate::packet::{Packet, PacketKind};
use crate::state::ReceiverPhase;

pub const NAME_OFFSET: u32 = 0;

/// Length prefix in front of a field's bytes.
pub const FIELD_LEN_BYTES: usize = 4;

/// Longest NAME or SIZE value either side accepts.
pub const MAX_FIELD_LEN: usize = 4096;

/// Monotonic control-sequence counter of a sending session.
#[derive(Debug, Default)]
pub struct ControlSequence {
    next: u32,
}

impl ControlSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next control offset.
    pub fn advance(&mut self) -> u32 {
        let seq = self.next;
        self.next += 1;
        seq
    }

    /// The value the next allocation would return.
    pub fn peek(&self) -> u32 {
        self.next
    }
}

/// The NAME pieces, SIZE pieces, HASH… and START packets, in send order.
pub fn handshake_packets(
    name: &str,
    len: u64,
    digest: &FileDigest,
    capacity: usize,
    seq: &mut ControlSequence,
) -> Result<Vec<Packet>, TransferError> {
    let names = field_pieces(name_value(name)?, capacity)?;
    let sizes = field_pieces(len.to_string().as_bytes(), capacity)?;

    let mut packets = Vec::with_capacity(names.len() + sizes.len() + DIGEST_LEN + 1);
    for piece in names {
        packets.push(Packet::new(PacketKind::Name, seq.advance(), piece));
    }
    for piece in sizes {
        packets.push(Packet::new(PacketKind::Size, seq.advance(), piece));
    }
    for &byte in digest {
        packets.push(Packet::new(PacketKind::Hash, seq.advance(), vec![byte]));
    }
    packets.push(Packet::empty(PacketKind::Start, seq.advance()));
    Ok(packets)
}

/// STOP packet announcing `total_packets` DATA packets.
pub fn stop_packet(seq: &ControlSequence, total_packets: u32) -> Result<Packet, TransferError> {
    let offset = seq.peek().checked_add(total_packets).ok_or_else(|| {
        TransferError::Argument(format!("{total_packets} data packets overflow the STOP offset"))
    })?;
    Ok(Packet::empty(PacketKind::Stop, offset))
}

/// Split `value` into the payloads of consecutive control packets, the
/// first of which starts with the value's length.
pub fn field_pieces(value: &[u8], capacity: usize) -> Result<Vec<Vec<u8>>, TransferError> {
    if capacity < FIELD_LEN_BYTES {
        return Err(TransferError::Argument(format!(
            "payload capacity {capacity} cannot hold a {FIELD_LEN_BYTES}-byte field length"
        )));
    }
    if value.len() > MAX_FIELD_LEN {
        return Err(TransferError::Argument(format!(
            "control field of {} bytes exceeds {MAX_FIELD_LEN}",
            value.len()
        )));
    }
    let mut stream = Vec::with_capacity(FIELD_LEN_BYTES + value.len());
    stream.extend_from_slice(&(value.len() as u32).to_be_bytes());
    stream.extend_from_slice(value);
    Ok(stream.chunks(capacity).map(<[u8]>::to_vec).collect())
}

fn name_value(name: &str) -> Result<&[u8], TransferError> {
    if name.is_empty() || name.contains('\0') {
        return Err(TransferError::Argument(format!("unusable file name {name:?}")));
    }
    Ok(name.as_bytes())
}

pub fn parse_name(value: &[u8]) -> Result<String, TransferError> {
    if value.is_empty() || value.contains(&0) {
        return Err(TransferError::Protocol("empty or NUL-bearing NAME".into()));
    }
    String::from_utf8(value.to_vec())
        .map_err(|_| TransferError::Protocol("NAME is not UTF-8".into()))
}

pub fn parse_size(value: &[u8]) -> Result<u64, TransferError> {
    if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
        return Err(TransferError::Protocol(format!(
            "SIZE {:?} is not a decimal length",
            String::from_utf8_lossy(value)
        )));
    }
    // All ASCII digits, so this is valid UTF-8; only overflow can fail.
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TransferError::Protocol("SIZE overflows 64 bits".into()))
}

/// What [`Manifest::record`] did with a control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// First time this value was seen.
    New,
    /// Same value as before (re-delivery).
    Duplicate,
    /// A different value replaced an earlier one.
    Changed,
}

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// Pieces of one NAME or SIZE field, by index from the field's first offset.
#[derive(Debug, Clone)]
struct Field {
    kind: PacketKind,
    base: u32,
    pieces: BTreeMap<u32, Vec<u8>>,
}

impl Field {
    fn new(kind: PacketKind, base: u32) -> Self {
        Self {
            kind,
            base,
            pieces: BTreeMap::new(),
        }
    }

    fn record(
        &mut self,
        offset: u32,
        payload: &[u8],
        capacity: usize,
    ) -> Result<Recorded, TransferError> {
        let index = offset.checked_sub(self.base).ok_or_else(|| {
            TransferError::Protocol(format!("{} offset {offset} before the field", self.kind))
        })?;
        if let Some(count) = self.piece_count(capacity) {
            if index >= count {
                return Err(TransferError::Protocol(format!(
                    "{} offset {offset} past the field's {count} pieces",
                    self.kind
                )));
            }
        }

        // Stored at full capacity so padded and unpadded copies compare equal.
        let mut piece = payload[..payload.len().min(capacity)].to_vec();
        piece.resize(capacity, 0);
        let outcome = match self.pieces.get(&index) {
            None => Recorded::New,
            Some(old) if *old == piece => Recorded::Duplicate,
            Some(_) => Recorded::Changed,
        };
        self.pieces.insert(index, piece);

        if let Some(len) = self.declared_len().filter(|&len| len > MAX_FIELD_LEN) {
            return Err(TransferError::Protocol(format!(
                "{} declares {len} bytes, limit is {MAX_FIELD_LEN}",
                self.kind
            )));
        }
        Ok(outcome)
    }

    /// Value length from the prefix, once the first piece is in.
    fn declared_len(&self) -> Option<usize> {
        let first = self.pieces.get(&0)?;
        let prefix: [u8; FIELD_LEN_BYTES] = first.get(..FIELD_LEN_BYTES)?.try_into().ok()?;
        Some(u32::from_be_bytes(prefix) as usize)
    }

    fn piece_count(&self, capacity: usize) -> Option<u32> {
        let len = self.declared_len()?;
        Some((FIELD_LEN_BYTES + len).div_ceil(capacity) as u32)
    }

    /// Offset just past the last piece.
    fn end(&self, capacity: usize) -> Option<u32> {
        Some(self.base + self.piece_count(capacity)?)
    }

    /// The value, once every piece is in.
    fn value(&self, capacity: usize) -> Option<Vec<u8>> {
        let len = self.declared_len()?;
        let mut stream = Vec::with_capacity(FIELD_LEN_BYTES + len + capacity);
        for index in 0..self.piece_count(capacity)? {
            stream.extend_from_slice(self.pieces.get(&index)?);
        }
        Some(stream[FIELD_LEN_BYTES..FIELD_LEN_BYTES + len].to_vec())
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Everything the receiver learns during the handshake, and the control
/// offsets that follow from it.
#[derive(Debug, Clone)]
pub struct Manifest {
    capacity: usize,
    name_field: Field,
    /// Exists once NAME is complete.
    size_field: Option<Field>,
    name: Option<String>,
    size: Option<u64>,
    /// First HASH offset, once SIZE is complete.
    hash_base: Option<u32>,
    digest: [Option<u8>; DIGEST_LEN],
}

impl Manifest {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            name_field: Field::new(PacketKind::Name, NAME_OFFSET),
            size_field: None,
            name: None,
            size: None,
            hash_base: None,
            digest: [None; DIGEST_LEN],
        }
    }

    /// Record a NAME, SIZE or HASH packet.
    pub fn record(&mut self, packet: &Packet) -> Result<Recorded, TransferError> {
        let cap = self.capacity;
        match packet.kind {
            PacketKind::Name => {
                let outcome = self.name_field.record(packet.offset, &packet.payload, cap)?;
                if let Some(value) = self.name_field.value(cap) {
                    self.name = Some(parse_name(&value)?);
                    if self.size_field.is_none() {
                        let base = self.name_field.end(cap).unwrap_or_default();
                        self.size_field = Some(Field::new(PacketKind::Size, base));
                    }
                }
                Ok(outcome)
            }
            PacketKind::Size => {
                let field = self.size_field.as_mut().ok_or_else(|| {
                    TransferError::Protocol(format!(
                        "SIZE offset {} before NAME is complete",
                        packet.offset
                    ))
                })?;
                let outcome = field.record(packet.offset, &packet.payload, cap)?;
                if let Some(value) = field.value(cap) {
                    self.size = Some(parse_size(&value)?);
                    if self.hash_base.is_none() {
                        self.hash_base = field.end(cap);
                    }
                }
                Ok(outcome)
            }
            PacketKind::Hash => {
                let i = self.hash_index(packet.offset).ok_or_else(|| {
                    TransferError::Protocol(format!(
                        "HASH offset {} outside the digest range",
                        packet.offset
                    ))
                })?;
                let byte = packet.payload.first().copied().unwrap_or(0);
                Ok(replace(&mut self.digest[i], byte))
            }
            other => Err(TransferError::Protocol(format!(
                "{other} is not a manifest field"
            ))),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Digest byte index of a HASH offset.
    pub fn hash_index(&self, offset: u32) -> Option<usize> {
        let i = offset.checked_sub(self.hash_base?)? as usize;
        (i < DIGEST_LEN).then_some(i)
    }

    /// Offset of START, once SIZE is complete.
    pub fn start_offset(&self) -> Option<u32> {
        Some(self.hash_base? + DIGEST_LEN as u32)
    }

    /// Data packet count encoded in a STOP offset.
    pub fn stop_count(&self, offset: u32) -> Option<u32> {
        offset.checked_sub(self.start_offset()? + 1)
    }

    pub fn digest_bytes(&self) -> usize {
        self.digest.iter().filter(|b| b.is_some()).count()
    }

    /// The announced digest, once every byte is known.
    pub fn digest(&self) -> Option<FileDigest> {
        let mut out = [0u8; DIGEST_LEN];
        for (dst, src) in out.iter_mut().zip(&self.digest) {
            *dst = (*src)?;
        }
        Some(out)
    }

    pub fn is_complete(&self) -> bool {
        self.name.is_some() && self.size.is_some() && self.digest().is_some()
    }

    /// Handshake phase implied by what has been recorded.
    pub fn phase(&self) -> ReceiverPhase {
        if self.name.is_none() {
            ReceiverPhase::AwaitName
        } else if self.size.is_none() {
            ReceiverPhase::AwaitSize
        } else if self.digest_bytes() < DIGEST_LEN {
            ReceiverPhase::AwaitHash(self.digest_bytes())
        } else {
            ReceiverPhase::AwaitStart
        }
    }
}

fn replace<T: PartialEq>(slot: &mut Option<T>, value: T) -> Recorded {
    let outcome = match slot {
        None => Recorded::New,
        Some(old) if *old == value => Recorded::Duplicate,
        Some(_) => Recorded::Changed,
    };
    *slot = Some(value);
    outcome
}
