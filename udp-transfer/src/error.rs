//! Session-level failure reasons.
//!
//! Per-frame corruption is handled inside the protocol (NACK, retransmit) and
//! only reaches this type when a retry budget runs out.  Every other variant
//! ends the session.  [`TransferError::exit_code`] maps each category onto the
//! process status the binary exits with.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::packet::PacketKind;

/// Every way a transfer session can fail.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Malformed invocation or configuration.
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Socket could not be created or bound.
    #[error("socket bind failed: {0}")]
    Bind(#[source] io::Error),

    #[error("socket send failed: {0}")]
    Send(#[source] io::Error),

    #[error("socket receive failed: {0}")]
    Receive(#[source] io::Error),

    /// Too many consecutive corrupt frames.
    #[error("{0} consecutive corrupt frames, giving up")]
    ChecksumMismatch(u32),

    /// A control packet was never acknowledged.
    #[error("no ACK for {kind} offset={offset} after {attempts} attempts")]
    HandshakeTimeout {
        kind: PacketKind,
        offset: u32,
        attempts: u32,
    },

    /// STOP arrived before every DATA packet was accounted for.
    #[error("transfer incomplete: {received} of {expected} data packets received")]
    IncompleteTransfer { received: u64, expected: u64 },

    /// Reassembled content does not hash to the announced digest.
    #[error("digest mismatch: announced {expected}, assembled {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Peer stopped answering during the data phase.
    #[error("peer unresponsive: {0}")]
    PeerUnresponsive(String),

    /// Peer sent something the protocol does not allow.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl TransferError {
    /// Process exit status for this failure category.
    ///
    /// The tens digit names the category: 1x argument and file errors, 2x
    /// socket errors, 3x protocol errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Argument(_) => 10,
            Self::FileNotFound(_) => 12,
            Self::FileRead { .. } => 13,
            Self::FileWrite { .. } => 14,
            Self::Bind(_) => 21,
            Self::Send(_) => 23,
            Self::Receive(_) => 24,
            Self::ChecksumMismatch(_) => 31,
            Self::DigestMismatch { .. } => 32,
            Self::HandshakeTimeout { .. } => 33,
            Self::IncompleteTransfer { .. } => 34,
            Self::PeerUnresponsive(_) => 35,
            Self::Protocol(_) => 36,
        }
    }
}
