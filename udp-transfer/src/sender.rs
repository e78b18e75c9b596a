//! Sending side of a transfer.
//!
//! ```text
//!  SendName ─▶ SendSize ─▶ SendHash[0..32] ─▶ SendStart      (one at a time)
//!                                                 │
//!                                                 ▼
//!                        Data: fill ─▶ drain ─▶ sweep ─▶ wait ─┐
//!                               ▲                              │
//!                               └──────────────────────────────┘
//!                                                 │ base == total
//!                                                 ▼
//!                                      SendStop ─▶ Done
//! ```
//!
//! Control packets go through [`send_and_confirm`].  DATA is pipelined through
//! a [`SlidingWindow`]; every tick fills the window first, then drains every
//! reply already queued, then resends expired slots.  The task only parks when
//! a tick found nothing to read, and then only until the socket is readable or
//! the oldest in-flight packet is due.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::config::TransferConfig;
use crate::digest::{digest, FileDigest};
use crate::error::TransferError;
use crate::exchange::send_and_confirm;
use crate::handshake::{handshake_packets, stop_packet, ControlSequence};
use crate::packet::{Packet, PacketError, PacketKind};
use crate::socket::{is_transient_io_error, send_frame, Transport, MAX_DATAGRAM};
use crate::state::SenderPhase;
use crate::timer::next_deadline;
use crate::window::{AckOutcome, SlidingWindow};

/// A file ready to be sent.
#[derive(Debug, Clone)]
pub struct Outgoing {
    /// Name announced in the NAME packet.
    pub name: String,
    pub data: Vec<u8>,
    /// Announced in the HASH packets.  Normally `digest(&data)`.
    pub digest: FileDigest,
}

impl Outgoing {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        let digest = digest(&data);
        Self {
            name: name.into(),
            data,
            digest,
        }
    }
}

/// Counters describing a finished send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    pub bytes: u64,
    pub data_packets: u32,
    /// DATA resends, timer driven or NACK driven.
    pub retransmissions: u64,
    /// Transmissions of control packets, first sends included.
    pub control_transmissions: u32,
    pub elapsed: Duration,
}

/// Send `file` to `peer` and return once the peer has acknowledged STOP.
pub async fn send_file<T: Transport>(
    transport: &T,
    peer: SocketAddr,
    file: &Outgoing,
    config: &TransferConfig,
) -> Result<SendReport, TransferError> {
    config.validate()?;
    SenderSession::new(transport, peer, file, config).run().await
}

// ---------------------------------------------------------------------------
// SenderSession
// ---------------------------------------------------------------------------

/// State of one sending session.  Owned by the task that drives it.
struct SenderSession<'a, T> {
    transport: &'a T,
    peer: SocketAddr,
    file: &'a Outgoing,
    config: &'a TransferConfig,
    seq: ControlSequence,
    phase: SenderPhase,
    report: SendReport,
}

impl<'a, T: Transport> SenderSession<'a, T> {
    fn new(
        transport: &'a T,
        peer: SocketAddr,
        file: &'a Outgoing,
        config: &'a TransferConfig,
    ) -> Self {
        Self {
            transport,
            peer,
            file,
            config,
            seq: ControlSequence::new(),
            phase: SenderPhase::default(),
            report: SendReport::default(),
        }
    }

    async fn run(mut self) -> Result<SendReport, TransferError> {
        let started = Instant::now();
        let len = self.file.data.len() as u64;
        let total = self.total_packets(len)?;
        log::info!(
            "[send] {:?} ({len} bytes, {total} packets) → {}",
            self.file.name,
            self.peer
        );

        let packets = handshake_packets(
            &self.file.name,
            len,
            &self.file.digest,
            self.config.payload_capacity,
            &mut self.seq,
        )?;
        for packet in &packets {
            self.phase = match packet.kind {
                PacketKind::Name => SenderPhase::SendName,
                PacketKind::Size => SenderPhase::SendSize,
                PacketKind::Hash => SenderPhase::SendHash(self.hash_position()),
                _ => SenderPhase::SendStart,
            };
            self.confirm(packet).await?;
        }
        log::info!("[send] handshake complete");

        self.phase = SenderPhase::Data;
        self.data_phase(total).await?;

        self.phase = SenderPhase::SendStop;
        let stop = stop_packet(&self.seq, total)?;
        self.confirm(&stop).await?;

        self.phase = SenderPhase::Done;
        self.report.bytes = len;
        self.report.data_packets = total;
        self.report.elapsed = started.elapsed();
        log::info!(
            "[send] done: {} bytes in {:?}, {} data packets, {} retransmissions",
            self.report.bytes,
            self.report.elapsed,
            self.report.data_packets,
            self.report.retransmissions
        );
        Ok(self.report)
    }

    /// Number of DATA packets, provided every offset fits 32 bits.
    fn total_packets(&self, len: u64) -> Result<u32, TransferError> {
        let cap = self.config.payload_capacity as u64;
        let total = self.config.total_packets(len);
        let last_offset = total.saturating_sub(1) * cap;
        match u32::try_from(total) {
            Ok(n) if last_offset <= u64::from(u32::MAX) => Ok(n),
            _ => Err(TransferError::Argument(format!(
                "file of {len} bytes exceeds the 32-bit offset space"
            ))),
        }
    }

    /// Digest byte the HASH packet about to be sent carries.
    fn hash_position(&self) -> usize {
        match self.phase {
            SenderPhase::SendHash(i) => i + 1,
            _ => 0,
        }
    }

    async fn confirm(&mut self, packet: &Packet) -> Result<(), TransferError> {
        log::debug!("[send] phase {} offset={}", self.phase, packet.offset);
        let tx = send_and_confirm(self.transport, packet, self.peer, self.config).await?;
        self.report.control_transmissions += tx;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Data phase
    // -----------------------------------------------------------------------

    async fn data_phase(&mut self, total: u32) -> Result<(), TransferError> {
        let rto = self.config.retransmit_timeout;
        let mut window = SlidingWindow::new(total, self.config.window_size);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        while !window.is_complete() {
            // 1. Fill.
            while window.can_send() {
                let seq = window.next;
                let frame = self.data_frame(seq)?;
                send_frame(self.transport, &frame, self.peer).await?;
                window.record_sent(frame, Instant::now());
                log::debug!(
                    "[send] → DATA seq={seq} in_flight={}",
                    window.in_flight()
                );
            }

            // 2. Drain.
            let mut drained = 0usize;
            loop {
                match self.transport.try_recv_from(&mut buf) {
                    Ok((n, from)) => {
                        drained += 1;
                        self.on_reply(&mut window, &buf[..n], from).await?;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if is_transient_io_error(&e) => {
                        log::debug!("[send] transient receive error: {e}");
                        break;
                    }
                    Err(e) => return Err(TransferError::Receive(e)),
                }
            }

            // 3. Sweep.
            let now = Instant::now();
            for seq in window.expired(now, rto) {
                log::warn!("[send] timeout on DATA seq={seq}, resending");
                self.retransmit(&mut window, seq, now).await?;
            }

            // 4. Wait.
            if drained == 0 && !window.is_complete() && !window.can_send() {
                self.wait(next_deadline(window.pending_since(), rto)).await?;
            }
        }
        Ok(())
    }

    /// Encoded DATA frame for sequence `seq`.
    fn data_frame(&self, seq: u32) -> Result<Vec<u8>, TransferError> {
        let cap = self.config.payload_capacity;
        let start = seq as usize * cap;
        let end = (start + cap).min(self.file.data.len());
        // total_packets() guarantees the offset fits.
        let offset = start as u32;
        Packet::new(PacketKind::Data, offset, &self.file.data[start..end])
            .encode(cap)
            .map_err(|e| TransferError::Argument(e.to_string()))
    }

    async fn on_reply(
        &mut self,
        window: &mut SlidingWindow,
        bytes: &[u8],
        from: SocketAddr,
    ) -> Result<(), TransferError> {
        if from != self.peer {
            log::warn!("[send] ignoring datagram from stranger {from}");
            return Ok(());
        }
        let reply = match Packet::decode(bytes) {
            Ok(p) => p,
            Err(PacketError::ChecksumMismatch { kind, offset }) => {
                log::warn!("[send] corrupt {kind} offset={offset}, ignored");
                return Ok(());
            }
            Err(e) => {
                log::debug!("[send] ignoring bad frame: {e}");
                return Ok(());
            }
        };
        if reply.answered_kind() != Some(PacketKind::Data) {
            // Late control ACKs from the handshake.
            log::debug!("[send] ignoring {} offset={}", reply.kind, reply.offset);
            return Ok(());
        }
        let cap = self.config.payload_capacity as u32;
        if reply.offset % cap != 0 {
            log::debug!("[send] ignoring unaligned {} offset={}", reply.kind, reply.offset);
            return Ok(());
        }
        let seq = reply.offset / cap;

        match reply.kind {
            PacketKind::Ack => match window.on_ack(seq) {
                AckOutcome::Marked { advanced } => log::debug!(
                    "[send] ← ACK seq={seq} base={} (+{advanced})",
                    window.base
                ),
                AckOutcome::Duplicate => log::debug!("[send] ← duplicate ACK seq={seq}"),
                AckOutcome::OutOfWindow => log::debug!("[send] ← stale ACK seq={seq}"),
            },
            PacketKind::Nack if window.frame(seq).is_some() => {
                log::warn!("[send] ← NACK seq={seq}, resending");
                self.retransmit(window, seq, Instant::now()).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn retransmit(
        &mut self,
        window: &mut SlidingWindow,
        seq: u32,
        now: Instant,
    ) -> Result<(), TransferError> {
        let tx = window.on_retransmit(seq, now);
        if tx > self.config.max_retransmits {
            return Err(TransferError::PeerUnresponsive(format!(
                "DATA seq {seq} unacknowledged after {} transmissions",
                tx - 1
            )));
        }
        if let Some(frame) = window.frame(seq) {
            send_frame(self.transport, frame, self.peer).await?;
            self.report.retransmissions += 1;
        }
        Ok(())
    }

    /// Park until the socket is readable or `deadline` passes.
    async fn wait(&self, deadline: Option<Instant>) -> Result<(), TransferError> {
        let Some(deadline) = deadline else {
            return self.transport.readable().await.map_err(TransferError::Receive);
        };
        tokio::select! {
            ready = self.transport.readable() => ready.map_err(TransferError::Receive),
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::Socket;

    #[test]
    fn outgoing_digest_covers_data() {
        let f = Outgoing::new("a.txt", b"ABCDEFGHIJ".to_vec());
        assert_eq!(f.digest, digest(b"ABCDEFGHIJ"));
        assert_eq!(f.name, "a.txt");
    }

    #[tokio::test]
    async fn data_frames_are_chunked_by_capacity() {
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let file = Outgoing::new("f", b"ABCDEFGHIJ".to_vec());
        let config = TransferConfig {
            payload_capacity: 4,
            ..TransferConfig::default()
        };
        let session = SenderSession::new(&socket, socket.local_addr, &file, &config);

        assert_eq!(session.total_packets(10).unwrap(), 3);
        let last = Packet::decode(&session.data_frame(2).unwrap()).unwrap();
        assert_eq!(last.kind, PacketKind::Data);
        assert_eq!(last.offset, 8);
        assert_eq!(last.payload, b"IJ\0\0");
    }

    #[tokio::test]
    async fn oversized_file_is_rejected() {
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let file = Outgoing::new("f", Vec::new());
        let config = TransferConfig {
            payload_capacity: 4,
            ..TransferConfig::default()
        };
        let session = SenderSession::new(&socket, socket.local_addr, &file, &config);
        assert!(matches!(
            session.total_packets(u64::from(u32::MAX) + 8),
            Err(TransferError::Argument(_))
        ));
    }
}
