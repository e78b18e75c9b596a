//! Timeout arithmetic shared by both phases.
//!
//! - [`ExchangeBackoff`] yields the wait of each attempt of the control
//!   exchange: `base · 2^attempt`, capped at [`MAX_EXCHANGE_WAIT`].
//! - [`next_deadline`] finds the earliest retransmission deadline among the
//!   in-flight DATA packets so the data loop can sleep exactly until then.

use std::time::{Duration, Instant};

/// Upper bound on a single exchange wait, however many attempts are allowed.
pub const MAX_EXCHANGE_WAIT: Duration = Duration::from_secs(60);

/// Exponential back-off for one control packet.
#[derive(Debug, Clone)]
pub struct ExchangeBackoff {
    base: Duration,
    attempt: u32,
    max_attempts: u32,
}

impl ExchangeBackoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            attempt: 0,
            max_attempts,
        }
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Iterator for ExchangeBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let wait = self
            .base
            .checked_mul(1u32.checked_shl(self.attempt).unwrap_or(u32::MAX))
            .unwrap_or(MAX_EXCHANGE_WAIT)
            .min(MAX_EXCHANGE_WAIT);
        self.attempt += 1;
        Some(wait)
    }
}

/// Earliest `sent_at + rto` over `sent`, or `None` when nothing is in flight.
pub fn next_deadline<I>(sent: I, rto: Duration) -> Option<Instant>
where
    I: IntoIterator<Item = Instant>,
{
    sent.into_iter().min().map(|t| t + rto)
}
