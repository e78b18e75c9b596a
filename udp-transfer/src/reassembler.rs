//! Receive-side reassembly of DATA packets.
//!
//! [`Reassembler`] appends payloads to a buffer that grows towards the
//! declared file length, strictly in sequence order:
//!
//! - A packet whose sequence equals `expected_sequence` is written at its
//!   offset and the cursor advances.
//! - A packet ahead of a gap (but within the window) is held back unwritten
//!   and acknowledged, so the sender can clear that slot.  It is written the
//!   moment the gap closes.
//! - A packet behind the cursor is a duplicate: acknowledged, never rewritten.
//! - Anything else is rejected and must not be acknowledged.
//!
//! ACKs are always per offset, never cumulative.  `expected_sequence` only
//! moves forward.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility (same pattern as [`crate::window::SlidingWindow`]).

use std::collections::BTreeMap;

use crate::config::TransferConfig;
use crate::error::TransferError;

/// Most the buffer reserves before any DATA has arrived.
pub const MAX_PREALLOC: usize = 1 << 20;

/// What happened to one DATA packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOutcome {
    /// In sequence; `written` packets reached the buffer (this one plus any
    /// held packets it unblocked).
    Accepted { written: u32 },
    /// Ahead of a gap; held until the gap closes.
    Held,
    /// Already written or already held.
    Duplicate,
    /// Malformed or outside the window; not acknowledged.
    Rejected(&'static str),
}

impl DataOutcome {
    /// Whether the sender gets an ACK for this packet's offset.
    pub fn should_ack(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Receiver-side state for the data phase of one transfer.
#[derive(Debug)]
pub struct Reassembler {
    /// Written bytes; its length is the high-water mark.
    buffer: Vec<u8>,
    declared_len: usize,
    total_packets: u32,
    capacity: usize,
    window_size: usize,
    /// Next sequence to write.
    expected_seq: u32,
    /// Packets written so far.
    received: u32,
    held: BTreeMap<u32, Vec<u8>>,
}

impl Reassembler {
    /// Allocate for a file of `declared_len` bytes.
    pub fn new(declared_len: u64, config: &TransferConfig) -> Result<Self, TransferError> {
        let capacity = config.payload_capacity;
        let total = config.total_packets(declared_len);
        let total_packets = u32::try_from(total).map_err(|_| too_large(declared_len))?;
        let last_offset = total.saturating_sub(1) * capacity as u64;
        if last_offset > u64::from(u32::MAX) {
            return Err(too_large(declared_len));
        }
        let len = usize::try_from(declared_len).map_err(|_| too_large(declared_len))?;

        Ok(Self {
            buffer: Vec::with_capacity(len.min(MAX_PREALLOC)),
            declared_len: len,
            total_packets,
            capacity,
            window_size: config.window_size,
            expected_seq: 0,
            received: 0,
            held: BTreeMap::new(),
        })
    }

    pub fn declared_len(&self) -> usize {
        self.declared_len
    }

    pub fn total_packets(&self) -> u32 {
        self.total_packets
    }

    pub fn expected_sequence(&self) -> u32 {
        self.expected_seq
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn written_len(&self) -> usize {
        self.buffer.len()
    }

    /// Packets held ahead of a gap.
    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// `true` once every declared packet has been written.
    pub fn is_complete(&self) -> bool {
        self.received == self.total_packets
    }

    /// Process one checksum-valid DATA packet.
    pub fn on_data(&mut self, offset: u32, payload: &[u8]) -> DataOutcome {
        if offset as usize % self.capacity != 0 {
            return DataOutcome::Rejected("offset not aligned to payload capacity");
        }
        let seq = offset / self.capacity as u32;
        if seq >= self.total_packets {
            return DataOutcome::Rejected("sequence beyond declared length");
        }
        if payload.len() < self.chunk_len(seq) {
            return DataOutcome::Rejected("payload shorter than its chunk");
        }

        if seq < self.expected_seq {
            return DataOutcome::Duplicate;
        }
        if seq > self.expected_seq {
            if (seq - self.expected_seq) as usize >= self.window_size {
                return DataOutcome::Rejected("sequence beyond the window");
            }
            if self.held.contains_key(&seq) {
                return DataOutcome::Duplicate;
            }
            self.held.insert(seq, payload[..self.chunk_len(seq)].to_vec());
            return DataOutcome::Held;
        }

        self.write(seq, payload);
        let mut written = 1;
        while let Some(chunk) = self.held.remove(&self.expected_seq) {
            let seq = self.expected_seq;
            self.write(seq, &chunk);
            written += 1;
        }
        DataOutcome::Accepted { written }
    }

    /// Bytes of the file carried by sequence `seq`.
    fn chunk_len(&self, seq: u32) -> usize {
        let start = seq as usize * self.capacity;
        self.capacity.min(self.declared_len - start)
    }

    fn write(&mut self, seq: u32, payload: &[u8]) {
        debug_assert_eq!(seq, self.expected_seq);
        debug_assert_eq!(self.buffer.len(), seq as usize * self.capacity);
        let len = self.chunk_len(seq);
        self.buffer.extend_from_slice(&payload[..len]);
        self.expected_seq += 1;
        self.received += 1;
    }

    /// The assembled bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

fn too_large(len: u64) -> TransferError {
    TransferError::Protocol(format!("declared length {len} exceeds the 32-bit offset space"))
}
