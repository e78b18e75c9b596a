//! Fault-injecting transport for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`Simulator`] wraps any [`Transport`] and applies a configurable fault model
//! to every datagram it sends:
//!
//! | Fault            | Description                                          |
//! |------------------|------------------------------------------------------|
//! | Packet loss      | Drop a datagram with probability `loss_rate`.        |
//! | Duplication      | Deliver a datagram twice.                            |
//! | Corruption       | Flip one random payload bit.                         |
//! | Reordering       | Hold a DATA frame back until after the next send.    |
//! | Scripted faults  | Drop / corrupt the first frame with a given header.  |
//!
//! Randomness comes from a seeded [`StdRng`], so a failing run is reproducible
//! from its seed.  Receiving is passed straight through.

use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packet::{PacketKind, HEADER_LEN, TAG_LEN};
use crate::socket::Transport;

/// Which frames the random faults apply to.  Scripted faults ignore this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultScope {
    /// Every frame.
    #[default]
    All,
    /// DATA frames and the ACK / NACK frames answering them.
    DataPath,
}

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is sent twice.
    pub duplicate_rate: f64,
    /// Probability that one payload bit is flipped.
    pub corrupt_rate: f64,
    /// Probability that a DATA frame is held back behind the next datagram.
    pub reorder_rate: f64,
    pub scope: FaultScope,
    pub seed: u64,
    /// Frames (kind, offset) dropped the first time they are sent.
    pub drop_once: Vec<(PacketKind, u32)>,
    /// Frames (kind, offset) corrupted the first time they are sent.
    pub corrupt_once: Vec<(PacketKind, u32)>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            corrupt_rate: 0.0,
            reorder_rate: 0.0,
            scope: FaultScope::All,
            seed: 0,
            drop_once: Vec::new(),
            corrupt_once: Vec::new(),
        }
    }
}

/// Counters of what the simulator did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub corrupted: u64,
    pub reordered: u64,
}

#[derive(Debug)]
struct FaultState {
    rng: StdRng,
    drop_once: Vec<(PacketKind, u32)>,
    corrupt_once: Vec<(PacketKind, u32)>,
    held: Option<(Vec<u8>, SocketAddr)>,
    stats: SimulatorStats,
}

/// A fault-injecting wrapper around another transport.
#[derive(Debug)]
pub struct Simulator<T> {
    inner: T,
    config: SimulatorConfig,
    state: Mutex<FaultState>,
}

impl<T: Transport> Simulator<T> {
    /// Wrap `inner`.  Rates outside `[0, 1]` are rejected.
    pub fn new(inner: T, config: SimulatorConfig) -> io::Result<Self> {
        let rates = [
            config.loss_rate,
            config.duplicate_rate,
            config.corrupt_rate,
            config.reorder_rate,
        ];
        if rates.iter().any(|r| !(0.0..=1.0).contains(r)) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "fault probabilities must lie in [0, 1]",
            ));
        }
        let state = FaultState {
            rng: StdRng::seed_from_u64(config.seed),
            drop_once: config.drop_once.clone(),
            corrupt_once: config.corrupt_once.clone(),
            held: None,
            stats: SimulatorStats::default(),
        };
        Ok(Self {
            inner,
            config,
            state: Mutex::new(state),
        })
    }

    pub fn stats(&self) -> SimulatorStats {
        self.lock().stats
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FaultState> {
        // A panic while holding the lock cannot leave the counters torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decide what actually goes on the wire for one outbound datagram.
    fn plan(&self, buf: &[u8], dest: SocketAddr) -> Vec<(Vec<u8>, SocketAddr)> {
        let header = frame_header(buf);
        let cfg = &self.config;
        let mut st = self.lock();
        st.stats.sent += 1;

        let mut frame = buf.to_vec();
        let mut out = Vec::with_capacity(3);

        if let Some(h) = header {
            if take_scripted(&mut st.drop_once, h) {
                st.stats.dropped += 1;
                log::debug!("[sim] scripted drop {} offset={}", h.0, h.1);
                return release_held(&mut st, out);
            }
            if take_scripted(&mut st.corrupt_once, h) {
                flip_payload_bit(&mut st.rng, &mut frame);
                st.stats.corrupted += 1;
                log::debug!("[sim] scripted corruption {} offset={}", h.0, h.1);
            }
        }

        let in_scope = match cfg.scope {
            FaultScope::All => true,
            FaultScope::DataPath => is_data_path(buf),
        };
        if in_scope {
            if st.rng.random_bool(cfg.loss_rate) {
                st.stats.dropped += 1;
                return release_held(&mut st, out);
            }
            if st.rng.random_bool(cfg.corrupt_rate) {
                flip_payload_bit(&mut st.rng, &mut frame);
                st.stats.corrupted += 1;
            }
            let is_data = matches!(header, Some((PacketKind::Data, _)));
            if is_data && st.held.is_none() && st.rng.random_bool(cfg.reorder_rate) {
                st.stats.reordered += 1;
                st.held = Some((frame, dest));
                return out;
            }
            if st.rng.random_bool(cfg.duplicate_rate) {
                st.stats.duplicated += 1;
                out.push((frame.clone(), dest));
            }
        }

        out.push((frame, dest));
        release_held(&mut st, out)
    }
}

impl<T: Transport> Transport for Simulator<T> {
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        let outgoing = self.plan(buf, dest);
        for (frame, to) in outgoing {
            self.inner.send_to(&frame, to).await?;
        }
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.try_recv_from(buf)
    }

    async fn readable(&self) -> io::Result<()> {
        self.inner.readable().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Append the held-back frame, if any, after the frames of this send.
fn release_held(
    st: &mut FaultState,
    mut out: Vec<(Vec<u8>, SocketAddr)>,
) -> Vec<(Vec<u8>, SocketAddr)> {
    if let Some(held) = st.held.take() {
        out.push(held);
    }
    out
}

fn take_scripted(list: &mut Vec<(PacketKind, u32)>, header: (PacketKind, u32)) -> bool {
    match list.iter().position(|&h| h == header) {
        Some(i) => {
            list.swap_remove(i);
            true
        }
        None => false,
    }
}

/// Kind and offset read straight off the wire, without checksum validation.
fn frame_header(buf: &[u8]) -> Option<(PacketKind, u32)> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let kind = PacketKind::from_tag(&buf[..TAG_LEN])?;
    let offset = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    Some((kind, offset))
}

fn is_data_path(buf: &[u8]) -> bool {
    match frame_header(buf) {
        Some((PacketKind::Data, _)) => true,
        Some((PacketKind::Ack | PacketKind::Nack, _)) => buf
            .get(HEADER_LEN..HEADER_LEN + TAG_LEN)
            .and_then(PacketKind::from_tag)
            == Some(PacketKind::Data),
        _ => false,
    }
}

fn flip_payload_bit(rng: &mut StdRng, frame: &mut [u8]) {
    if frame.is_empty() {
        return;
    }
    let start = if frame.len() > HEADER_LEN { HEADER_LEN } else { 0 };
    let byte = rng.random_range(start..frame.len());
    let bit = rng.random_range(0..8u32);
    frame[byte] ^= 1 << bit;
}
