//! Sliding-window send-side state machine.
//!
//! [`SlidingWindow`] keeps up to `window_size` DATA packets in flight.  Every
//! slot is acknowledged individually; the lower edge only moves over a
//! contiguous run of acknowledged slots.
//!
//! # Protocol contract
//!
//! - `base ≤ next ≤ total_packets` and `next − base ≤ window_size`.
//! - An ACK for a sequence in `[base, next)` marks that slot.  An ACK ahead of
//!   an unacknowledged slot does not move `base` until the gap closes.
//! - Each unacknowledged slot has its own retransmission clock; only the
//!   expired slots are resent (not the whole window).
//!
//! This module only manages state; all socket I/O is the caller's responsibility.

use std::time::{Duration, Instant};

/// One in-flight DATA packet.
#[derive(Debug, Clone)]
pub struct WindowSlot {
    pub seq: u32,
    /// The encoded frame, resent byte for byte.
    pub frame: Vec<u8>,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
    /// Transmissions so far (1 = first send).
    pub tx_count: u32,
    pub acked: bool,
}

/// What an ACK did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Sequence outside `[base, next)`: stale or bogus.
    OutOfWindow,
    /// Slot was already acknowledged.
    Duplicate,
    /// Slot newly acknowledged; `base` moved by `advanced`.
    Marked { advanced: u32 },
}

/// Send-side window for one transfer.
///
/// ```text
///      base           next
///        │              │
///  ──────┼──────────────┼──────────────▶ sequence space
///  acked │<─ in flight ─>│<─ sendable ─▶ total_packets
/// ```
#[derive(Debug)]
pub struct SlidingWindow {
    /// Lowest unacknowledged sequence.
    pub base: u32,
    /// Lowest unsent sequence.
    pub next: u32,
    total_packets: u32,
    window_size: usize,
    slots: Vec<Option<WindowSlot>>,
    retransmissions: u64,
}

impl SlidingWindow {
    pub fn new(total_packets: u32, window_size: usize) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            base: 0,
            next: 0,
            total_packets,
            window_size,
            slots: vec![None; window_size],
            retransmissions: 0,
        }
    }

    pub fn total_packets(&self) -> u32 {
        self.total_packets
    }

    /// `true` when another new packet may be sent.
    pub fn can_send(&self) -> bool {
        self.next < self.total_packets && self.in_flight() < self.window_size
    }

    /// Packets sent but not yet passed by `base`.
    pub fn in_flight(&self) -> usize {
        (self.next - self.base) as usize
    }

    /// `true` once every packet has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.base == self.total_packets
    }

    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    #[inline]
    fn index(&self, seq: u32) -> usize {
        seq as usize % self.window_size
    }

    fn slot(&self, seq: u32) -> Option<&WindowSlot> {
        self.slots[self.index(seq)].as_ref().filter(|s| s.seq == seq)
    }

    /// Place the frame for sequence `next` into its slot and advance `next`.
    ///
    /// Returns the sequence the frame was recorded under.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if the window is full.  Check [`Self::can_send`]
    /// before calling.
    pub fn record_sent(&mut self, frame: Vec<u8>, now: Instant) -> u32 {
        debug_assert!(
            self.can_send(),
            "record_sent on a full window ({} / {})",
            self.in_flight(),
            self.window_size
        );
        let seq = self.next;
        let idx = self.index(seq);
        self.slots[idx] = Some(WindowSlot {
            seq,
            frame,
            sent_at: now,
            tx_count: 1,
            acked: false,
        });
        self.next += 1;
        seq
    }

    /// Process an ACK for sequence `seq`.
    pub fn on_ack(&mut self, seq: u32) -> AckOutcome {
        if seq < self.base || seq >= self.next {
            return AckOutcome::OutOfWindow;
        }
        let idx = self.index(seq);
        match self.slots[idx].as_mut() {
            Some(slot) if slot.seq == seq => {
                if slot.acked {
                    return AckOutcome::Duplicate;
                }
                slot.acked = true;
            }
            _ => return AckOutcome::OutOfWindow,
        }

        let before = self.base;
        while self.base < self.next && self.slot(self.base).is_some_and(|s| s.acked) {
            self.base += 1;
        }
        AckOutcome::Marked {
            advanced: self.base - before,
        }
    }

    /// Unacknowledged sequences whose last send is at least `rto` old.
    pub fn expired(&self, now: Instant, rto: Duration) -> Vec<u32> {
        (self.base..self.next)
            .filter(|&seq| {
                self.slot(seq)
                    .is_some_and(|s| !s.acked && now.saturating_duration_since(s.sent_at) >= rto)
            })
            .collect()
    }

    /// The frame stored for `seq`, if it is in flight.
    pub fn frame(&self, seq: u32) -> Option<&[u8]> {
        self.slot(seq).map(|s| s.frame.as_slice())
    }

    /// Refresh the clock of a resent slot; returns its transmission count.
    pub fn on_retransmit(&mut self, seq: u32, now: Instant) -> u32 {
        let idx = self.index(seq);
        match self.slots[idx].as_mut() {
            Some(slot) if slot.seq == seq => {
                slot.tx_count += 1;
                slot.sent_at = now;
                self.retransmissions += 1;
                slot.tx_count
            }
            _ => 0,
        }
    }

    /// Send times of every unacknowledged in-flight slot.
    pub fn pending_since(&self) -> impl Iterator<Item = Instant> + '_ {
        (self.base..self.next)
            .filter_map(|seq| self.slot(seq))
            .filter(|s| !s.acked)
            .map(|s| s.sent_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(w: &mut SlidingWindow, now: Instant) {
        while w.can_send() {
            let seq = w.next;
            w.record_sent(vec![seq as u8], now);
        }
    }

    #[test]
    fn initial_state() {
        let w = SlidingWindow::new(3, 2);
        assert_eq!(w.base, 0);
        assert_eq!(w.next, 0);
        assert!(w.can_send());
        assert!(!w.is_complete());
        assert_eq!(w.in_flight(), 0);
    }

    #[test]
    fn window_full_blocks_send() {
        let mut w = SlidingWindow::new(10, 4);
        fill(&mut w, Instant::now());
        assert_eq!(w.next, 4);
        assert_eq!(w.in_flight(), 4);
        assert!(!w.can_send());
    }

    #[test]
    fn never_sends_past_total() {
        let mut w = SlidingWindow::new(3, 8);
        fill(&mut w, Instant::now());
        assert_eq!(w.next, 3);
        assert!(!w.can_send());
    }

    #[test]
    fn in_order_ack_slides_window() {
        let mut w = SlidingWindow::new(10, 2);
        fill(&mut w, Instant::now());
        assert_eq!(w.on_ack(0), AckOutcome::Marked { advanced: 1 });
        assert_eq!(w.base, 1);
        assert!(w.can_send());
    }

    #[test]
    fn ack_ahead_of_gap_waits_for_gap() {
        let mut w = SlidingWindow::new(10, 4);
        fill(&mut w, Instant::now());

        assert_eq!(w.on_ack(2), AckOutcome::Marked { advanced: 0 });
        assert_eq!(w.on_ack(1), AckOutcome::Marked { advanced: 0 });
        assert_eq!(w.base, 0);
        // Closing the gap moves base over the whole acknowledged run.
        assert_eq!(w.on_ack(0), AckOutcome::Marked { advanced: 3 });
        assert_eq!(w.base, 3);
    }

    #[test]
    fn duplicate_and_stale_acks() {
        let mut w = SlidingWindow::new(10, 4);
        fill(&mut w, Instant::now());
        w.on_ack(1);
        assert_eq!(w.on_ack(1), AckOutcome::Duplicate);
        w.on_ack(0);
        assert_eq!(w.on_ack(0), AckOutcome::OutOfWindow); // behind base now
        assert_eq!(w.on_ack(9), AckOutcome::OutOfWindow); // never sent
    }

    #[test]
    fn only_expired_unacked_slots_are_resent() {
        let t0 = Instant::now();
        let rto = Duration::from_millis(100);
        let mut w = SlidingWindow::new(10, 3);
        fill(&mut w, t0);
        w.on_ack(1);

        assert!(w.expired(t0 + Duration::from_millis(50), rto).is_empty());
        let later = t0 + rto;
        assert_eq!(w.expired(later, rto), vec![0, 2]);

        assert_eq!(w.on_retransmit(0, later), 2);
        assert_eq!(w.expired(later, rto), vec![2]);
        assert_eq!(w.retransmissions(), 1);
        assert_eq!(w.frame(0), Some(&[0u8][..]));
    }

    #[test]
    fn slots_are_reused_after_sliding() {
        let mut w = SlidingWindow::new(5, 2);
        let now = Instant::now();
        fill(&mut w, now);
        w.on_ack(0);
        w.on_ack(1);
        fill(&mut w, now);
        assert_eq!(w.next, 4);
        assert_eq!(w.frame(2), Some(&[2u8][..]));
        assert_eq!(w.frame(0), None);
    }

    #[test]
    fn completes_when_all_acked() {
        let mut w = SlidingWindow::new(3, 2);
        let now = Instant::now();
        while !w.is_complete() {
            fill(&mut w, now);
            let base = w.base;
            w.on_ack(base);
        }
        assert_eq!(w.base, 3);
        assert_eq!(w.pending_since().count(), 0);
    }

    #[test]
    fn empty_transfer_is_complete_immediately() {
        let w = SlidingWindow::new(0, 4);
        assert!(w.is_complete());
        assert!(!w.can_send());
    }
}
