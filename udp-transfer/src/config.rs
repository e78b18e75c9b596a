//! Tunable transfer parameters.
//!
//! Both peers must agree on `payload_capacity` (it fixes the frame length and
//! the DATA offset → sequence mapping) and should agree on `window_size`, which
//! also bounds the receiver's reorder stash.  Everything else is local.

use std::time::Duration;

use crate::error::TransferError;
use crate::packet::{DEFAULT_PAYLOAD_CAPACITY, HEADER_LEN, TAG_LEN};

/// Default number of DATA packets in flight.
pub const DEFAULT_WINDOW: usize = 4;

/// Adjustable protocol parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Payload bytes per frame (`MTU − 12`).
    pub payload_capacity: usize,
    /// Maximum DATA packets in flight.
    pub window_size: usize,
    /// First wait of the control exchange; doubles on every further attempt.
    pub base_timeout: Duration,
    /// Age after which an unacknowledged DATA packet is resent.
    pub retransmit_timeout: Duration,
    /// Attempts per control packet, and the receiver's budget of consecutive
    /// corrupt frames during the handshake.
    pub max_attempts: u32,
    /// Transmissions of a single DATA packet before the peer is given up on.
    pub max_retransmits: u32,
    /// Receiver gives up after this long without any datagram.
    pub idle_timeout: Duration,
    /// Receiver keeps answering duplicate STOPs this long after the first.
    pub linger: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            payload_capacity: DEFAULT_PAYLOAD_CAPACITY,
            window_size: DEFAULT_WINDOW,
            base_timeout: Duration::from_secs(1),
            retransmit_timeout: Duration::from_millis(1000),
            max_attempts: 5,
            max_retransmits: 32,
            idle_timeout: Duration::from_secs(30),
            linger: Duration::from_secs(2),
        }
    }
}

impl TransferConfig {
    /// Defaults with the payload capacity derived from a frame MTU.
    pub fn with_mtu(mtu: usize) -> Result<Self, TransferError> {
        let payload_capacity = mtu.checked_sub(HEADER_LEN).ok_or_else(|| {
            TransferError::Argument(format!("MTU {mtu} is smaller than the {HEADER_LEN}-byte header"))
        })?;
        let config = Self {
            payload_capacity,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject parameter combinations the protocol cannot run with.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.payload_capacity < TAG_LEN {
            return Err(TransferError::Argument(format!(
                "payload capacity {} cannot hold a {TAG_LEN}-byte ACK tag",
                self.payload_capacity
            )));
        }
        if self.payload_capacity > u16::MAX as usize {
            return Err(TransferError::Argument(format!(
                "payload capacity {} does not fit a UDP datagram",
                self.payload_capacity
            )));
        }
        if self.window_size == 0 {
            return Err(TransferError::Argument("window size must be at least 1".into()));
        }
        if self.max_attempts == 0 || self.max_retransmits == 0 {
            return Err(TransferError::Argument("retry budgets must be at least 1".into()));
        }
        if self.base_timeout.is_zero()
            || self.retransmit_timeout.is_zero()
            || self.idle_timeout.is_zero()
        {
            return Err(TransferError::Argument("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// Frame length on the wire.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload_capacity
    }

    /// Number of DATA packets needed for `len` bytes.
    pub fn total_packets(&self, len: u64) -> u64 {
        len.div_ceil(self.payload_capacity as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = TransferConfig::default();
        c.validate().unwrap();
        assert_eq!(c.payload_capacity, 1012);
        assert_eq!(c.frame_len(), 1024);
        assert_eq!(c.window_size, 4);
    }

    #[test]
    fn mtu_sets_capacity() {
        assert_eq!(TransferConfig::with_mtu(16).unwrap().payload_capacity, 4);
        assert!(TransferConfig::with_mtu(15).is_err());
        assert!(TransferConfig::with_mtu(4).is_err());
    }

    #[test]
    fn zero_window_rejected() {
        let c = TransferConfig {
            window_size: 0,
            ..TransferConfig::default()
        };
        assert!(matches!(c.validate(), Err(TransferError::Argument(_))));
    }

    #[test]
    fn zero_timeout_rejected() {
        let c = TransferConfig {
            retransmit_timeout: Duration::ZERO,
            ..TransferConfig::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn total_packets_rounds_up() {
        let c = TransferConfig {
            payload_capacity: 4,
            ..TransferConfig::default()
        };
        assert_eq!(c.total_packets(0), 0);
        assert_eq!(c.total_packets(4), 1);
        assert_eq!(c.total_packets(10), 3);
    }
}
