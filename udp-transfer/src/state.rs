//! Session phase types.
//!
//! The sender drives the protocol; the receiver mirrors it, advancing on what
//! it has recorded rather than on packet order, so re-delivered control frames
//! never move it backwards.
//!
//! ```text
//!  sender:   SendName → SendSize → SendHash → SendStart → Data → SendStop → Done
//!  receiver: AwaitName → AwaitSize → AwaitHash → AwaitStart → Data → Lingering → Verifying
//! ```

use std::fmt;

/// Where a sending session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderPhase {
    #[default]
    SendName,
    SendSize,
    /// Sending digest byte `n`.
    SendHash(usize),
    SendStart,
    /// Sliding-window data transfer.
    Data,
    SendStop,
    Done,
}

/// Where a receiving session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverPhase {
    #[default]
    AwaitName,
    AwaitSize,
    /// Waiting for more digest bytes; `n` of them are recorded.
    AwaitHash(usize),
    AwaitStart,
    /// Reassembling DATA until STOP.
    Data,
    /// STOP answered; re-answering duplicates before verification.
    Lingering,
    /// Checking the assembled bytes against the announced digest.
    Verifying,
}

impl ReceiverPhase {
    /// `true` while control packets are still being collected.
    pub fn in_handshake(self) -> bool {
        matches!(
            self,
            Self::AwaitName | Self::AwaitSize | Self::AwaitHash(_) | Self::AwaitStart
        )
    }
}

impl fmt::Display for SenderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendHash(n) => write!(f, "SendHash[{n}]"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl fmt::Display for ReceiverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitHash(n) => write!(f, "AwaitHash[{n}]"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_initial_phases() {
        assert_eq!(SenderPhase::default(), SenderPhase::SendName);
        assert_eq!(ReceiverPhase::default(), ReceiverPhase::AwaitName);
    }

    #[test]
    fn handshake_phases() {
        assert!(ReceiverPhase::AwaitHash(3).in_handshake());
        assert!(!ReceiverPhase::Data.in_handshake());
        assert!(!ReceiverPhase::Verifying.in_handshake());
        assert_eq!(ReceiverPhase::AwaitHash(3).to_string(), "AwaitHash[3]");
        assert_eq!(SenderPhase::SendStop.to_string(), "SendStop");
    }
}
