//! Receiving side of a transfer.
//!
//! The receiver never initiates anything: it answers every valid frame with an
//! ACK (or a NACK when the checksum fails) and derives its phase from what it
//! has recorded.
//!
//! ```text
//!  AwaitName ─▶ AwaitSize ─▶ AwaitHash[n] ─▶ AwaitStart ─▶ Data ─▶ Lingering ─▶ Verifying
//!       │                                                                          │
//!       └── peer locked on the first valid control frame           digest checked ─┘
//! ```
//!
//! During the handshake the receiver blocks on `recv_from` bounded by the idle
//! timeout.  Once DATA flows it drains queued datagrams with `try_recv_from`
//! and parks on `readable()` only when the queue is empty.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};

use crate::config::TransferConfig;
use crate::digest::{digest, FileDigest};
use crate::error::TransferError;
use crate::handshake::{Manifest, Recorded};
use crate::packet::{Packet, PacketError, PacketKind};
use crate::reassembler::{DataOutcome, Reassembler};
use crate::socket::{is_transient_io_error, send_frame, Transport, MAX_DATAGRAM};
use crate::state::ReceiverPhase;

/// A verified file.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    /// Name as announced by the sender, unsanitised.
    pub name: String,
    pub data: Vec<u8>,
    pub digest: FileDigest,
    pub peer: SocketAddr,
    pub report: ReceiveReport,
}

/// Counters describing a finished receive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    pub bytes: u64,
    pub data_packets: u32,
    /// DATA packets that had already been written or held.
    pub duplicates: u64,
    /// DATA packets that arrived ahead of a gap.
    pub held: u64,
    /// DATA packets dropped without an ACK.
    pub rejected: u64,
    pub corrupt_frames: u64,
    pub elapsed: Duration,
}

/// Receive one file on `transport`.
///
/// The first peer to send a valid control frame owns the session; traffic
/// from anyone else is ignored.  `expected_peer` is only used to warn when a
/// different address turns up.
pub async fn receive_file<T: Transport>(
    transport: &T,
    expected_peer: Option<SocketAddr>,
    config: &TransferConfig,
) -> Result<ReceivedFile, TransferError> {
    config.validate()?;
    ReceiverSession::new(transport, expected_peer, config)
        .run()
        .await
}

// ---------------------------------------------------------------------------
// ReceiverSession
// ---------------------------------------------------------------------------

struct ReceiverSession<'a, T> {
    transport: &'a T,
    config: &'a TransferConfig,
    expected_peer: Option<SocketAddr>,
    peer: Option<SocketAddr>,
    phase: ReceiverPhase,
    manifest: Manifest,
    /// Allocated when SIZE is accepted.
    reassembler: Option<Reassembler>,
    /// Consecutive corrupt frames from the locked peer while in the handshake.
    corrupt_streak: u32,
    /// Offset of the acknowledged STOP.
    stop_offset: Option<u32>,
    report: ReceiveReport,
}

impl<'a, T: Transport> ReceiverSession<'a, T> {
    fn new(
        transport: &'a T,
        expected_peer: Option<SocketAddr>,
        config: &'a TransferConfig,
    ) -> Self {
        Self {
            transport,
            config,
            expected_peer,
            peer: None,
            phase: ReceiverPhase::default(),
            manifest: Manifest::new(config.payload_capacity),
            reassembler: None,
            corrupt_streak: 0,
            stop_offset: None,
            report: ReceiveReport::default(),
        }
    }

    async fn run(mut self) -> Result<ReceivedFile, TransferError> {
        let started = std::time::Instant::now();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        while self.phase != ReceiverPhase::Lingering {
            let (n, from) = self.next_datagram(&mut buf).await?;
            self.handle_frame(&buf[..n], from).await?;
        }

        self.linger(&mut buf).await?;
        self.phase = ReceiverPhase::Verifying;
        self.report.elapsed = started.elapsed();
        self.verify()
    }

    /// Next datagram, or `PeerUnresponsive` after `idle_timeout` of silence.
    async fn next_datagram(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransferError> {
        let deadline = Instant::now() + self.config.idle_timeout;
        loop {
            let waited = if self.phase.in_handshake() {
                match timeout_at(deadline, self.transport.recv_from(buf)).await {
                    Ok(Ok(v)) => return Ok(v),
                    Ok(Err(e)) => Err(e),
                    Err(_elapsed) => break,
                }
            } else {
                match self.transport.try_recv_from(buf) {
                    Ok(v) => return Ok(v),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        match timeout_at(deadline, self.transport.readable()).await {
                            Ok(ready) => ready,
                            Err(_elapsed) => break,
                        }
                    }
                    Err(e) => Err(e),
                }
            };
            match waited {
                Ok(()) => {}
                Err(e) if is_transient_io_error(&e) => {
                    log::debug!("[recv] transient receive error: {e}");
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                Err(e) => return Err(TransferError::Receive(e)),
            }
        }
        Err(TransferError::PeerUnresponsive(format!(
            "nothing received for {:?} in phase {}",
            self.config.idle_timeout, self.phase
        )))
    }

    /// Decode and dispatch one datagram.
    async fn handle_frame(&mut self, bytes: &[u8], from: SocketAddr) -> Result<(), TransferError> {
        if self.peer.is_some_and(|peer| peer != from) {
            log::warn!("[recv] ignoring datagram from stranger {from}");
            return Ok(());
        }

        let packet = match Packet::decode(bytes) {
            Ok(p) => p,
            Err(PacketError::ChecksumMismatch { kind, offset }) => {
                return self.on_corrupt(kind, offset, from).await;
            }
            Err(e) => {
                log::debug!("[recv] ignoring bad frame from {from}: {e}");
                return Ok(());
            }
        };
        self.corrupt_streak = 0;

        if self.peer.is_none() {
            // A stray STOP must not claim the session.
            if !packet.kind.is_control() || packet.kind == PacketKind::Stop {
                log::debug!("[recv] ignoring stray {} from {from}", packet.kind);
                return Ok(());
            }
            self.lock_peer(from);
        }

        match packet.kind {
            PacketKind::Name | PacketKind::Size | PacketKind::Hash => {
                self.on_manifest(&packet, from).await
            }
            PacketKind::Start => self.on_start(&packet, from).await,
            PacketKind::Data => self.on_data(&packet, from).await,
            PacketKind::Stop => self.on_stop(&packet, from).await,
            PacketKind::Ack | PacketKind::Nack => {
                log::debug!("[recv] ignoring {} offset={}", packet.kind, packet.offset);
                Ok(())
            }
        }
    }

    fn lock_peer(&mut self, from: SocketAddr) {
        log::info!("[recv] session with {from}");
        if let Some(expected) = self.expected_peer.filter(|&e| e != from) {
            log::warn!("[recv] expected peer {expected}, accepting {from}");
        }
        self.peer = Some(from);
    }

    async fn on_corrupt(
        &mut self,
        kind: PacketKind,
        offset: u32,
        from: SocketAddr,
    ) -> Result<(), TransferError> {
        self.report.corrupt_frames += 1;
        log::warn!("[recv] corrupt {kind} offset={offset}, NACK");
        self.reply(Packet::nack(kind, offset), from).await?;

        // Garbage from before the lock may be anyone's; only the peer's counts.
        if self.peer.is_some() && self.phase.in_handshake() {
            self.corrupt_streak += 1;
            if self.corrupt_streak > self.config.max_attempts {
                return Err(TransferError::ChecksumMismatch(self.corrupt_streak));
            }
        }
        Ok(())
    }

    async fn on_manifest(&mut self, packet: &Packet, from: SocketAddr) -> Result<(), TransferError> {
        if self.phase.in_handshake() {
            match self.manifest.record(packet)? {
                Recorded::New => log::debug!("[recv] ← {} offset={}", packet.kind, packet.offset),
                Recorded::Duplicate => {
                    log::debug!("[recv] ← duplicate {} offset={}", packet.kind, packet.offset)
                }
                Recorded::Changed => {
                    log::warn!("[recv] {} offset={} changed value", packet.kind, packet.offset)
                }
            }
            if packet.kind == PacketKind::Size {
                if let Some(size) = self.manifest.size() {
                    let fits = self
                        .reassembler
                        .as_ref()
                        .is_some_and(|r| r.declared_len() as u64 == size);
                    if !fits {
                        self.reassembler = Some(Reassembler::new(size, self.config)?);
                    }
                }
            }
            self.phase = self.manifest.phase();
        } else {
            log::debug!("[recv] re-ACK late {} offset={}", packet.kind, packet.offset);
        }
        self.reply(Packet::ack(packet.kind, packet.offset), from).await
    }

    async fn on_start(&mut self, packet: &Packet, from: SocketAddr) -> Result<(), TransferError> {
        if self.phase.in_handshake() && !self.manifest.is_complete() {
            log::warn!("[recv] START before the manifest is complete ({}), not ACKed", self.phase);
            return Ok(());
        }
        if self.manifest.start_offset() != Some(packet.offset) {
            log::warn!("[recv] START at unexpected offset {}, ignored", packet.offset);
            return Ok(());
        }
        if self.phase.in_handshake() {
            let total = self.reassembler.as_ref().map_or(0, Reassembler::total_packets);
            log::info!(
                "[recv] handshake complete: {:?}, {} bytes, {total} packets",
                self.manifest.name().unwrap_or_default(),
                self.manifest.size().unwrap_or_default()
            );
            self.phase = ReceiverPhase::Data;
        }
        self.reply(Packet::ack(PacketKind::Start, packet.offset), from).await
    }

    async fn on_data(&mut self, packet: &Packet, from: SocketAddr) -> Result<(), TransferError> {
        let reassembler = match self.reassembler.as_mut() {
            Some(r) if !self.phase.in_handshake() => r,
            _ => {
                log::debug!("[recv] ignoring DATA offset={} before START", packet.offset);
                return Ok(());
            }
        };

        let outcome = reassembler.on_data(packet.offset, &packet.payload);
        match outcome {
            DataOutcome::Accepted { written } => log::debug!(
                "[recv] ← DATA offset={} written={written} expected={}",
                packet.offset,
                reassembler.expected_sequence()
            ),
            DataOutcome::Held => {
                self.report.held += 1;
                log::debug!("[recv] ← DATA offset={} held", packet.offset);
            }
            DataOutcome::Duplicate => {
                self.report.duplicates += 1;
                log::debug!("[recv] ← duplicate DATA offset={}", packet.offset);
            }
            DataOutcome::Rejected(why) => {
                self.report.rejected += 1;
                log::warn!("[recv] DATA offset={} rejected: {why}", packet.offset);
            }
        }
        if outcome.should_ack() {
            self.reply(Packet::ack(PacketKind::Data, packet.offset), from).await?;
        }
        Ok(())
    }

    async fn on_stop(&mut self, packet: &Packet, from: SocketAddr) -> Result<(), TransferError> {
        match self.phase {
            ReceiverPhase::Data => {}
            ReceiverPhase::Lingering if self.stop_offset == Some(packet.offset) => {
                log::debug!("[recv] re-ACK duplicate STOP");
                return self.reply(Packet::ack(PacketKind::Stop, packet.offset), from).await;
            }
            _ => {
                log::debug!("[recv] ignoring STOP offset={} in {}", packet.offset, self.phase);
                return Ok(());
            }
        }

        let count = self.manifest.stop_count(packet.offset).ok_or_else(|| {
            TransferError::Protocol(format!("STOP offset {} below the data range", packet.offset))
        })?;
        let (received, total) = self
            .reassembler
            .as_ref()
            .map_or((0, 0), |r| (r.received(), r.total_packets()));
        if count != total {
            return Err(TransferError::Protocol(format!(
                "STOP announces {count} data packets, SIZE implies {total}"
            )));
        }
        if received != total {
            return Err(TransferError::IncompleteTransfer {
                received: u64::from(received),
                expected: u64::from(total),
            });
        }

        log::info!("[recv] STOP: all {total} data packets received");
        self.stop_offset = Some(packet.offset);
        self.phase = ReceiverPhase::Lingering;
        self.reply(Packet::ack(PacketKind::Stop, packet.offset), from).await
    }

    /// Keep answering duplicate STOPs until `linger` passes.
    async fn linger(&mut self, buf: &mut [u8]) -> Result<(), TransferError> {
        let deadline = Instant::now() + self.config.linger;
        while Instant::now() < deadline {
            let (n, from) = match timeout_at(deadline, self.transport.recv_from(buf)).await {
                Err(_elapsed) => break,
                Ok(Ok(v)) => v,
                Ok(Err(e)) if is_transient_io_error(&e) => continue,
                Ok(Err(e)) => return Err(TransferError::Receive(e)),
            };
            self.handle_frame(&buf[..n], from).await?;
        }
        Ok(())
    }

    fn verify(self) -> Result<ReceivedFile, TransferError> {
        let expected = self
            .manifest
            .digest()
            .ok_or_else(|| TransferError::Protocol("digest never announced".into()))?;
        let name = self.manifest.name().unwrap_or_default().to_owned();
        let data = self.reassembler.map(Reassembler::into_bytes).unwrap_or_default();
        let actual = digest(&data);
        if actual != expected {
            log::warn!("[recv] digest mismatch, discarding {} bytes", data.len());
            return Err(TransferError::DigestMismatch {
                expected: hex::encode(expected),
                actual: hex::encode(actual),
            });
        }

        let mut report = self.report;
        report.bytes = data.len() as u64;
        report.data_packets = self
            .stop_offset
            .and_then(|offset| self.manifest.stop_count(offset))
            .unwrap_or_default();
        log::info!(
            "[recv] verified {name:?}: {} bytes in {:?} ({} duplicates, {} held, {} corrupt)",
            report.bytes,
            report.elapsed,
            report.duplicates,
            report.held,
            report.corrupt_frames
        );
        Ok(ReceivedFile {
            name,
            data,
            digest: actual,
            peer: self.peer.ok_or_else(|| TransferError::Protocol("no peer".into()))?,
            report,
        })
    }

    async fn reply(&self, packet: Packet, to: SocketAddr) -> Result<(), TransferError> {
        let frame = packet
            .encode(self.config.payload_capacity)
            .map_err(|e| TransferError::Argument(e.to_string()))?;
        send_frame(self.transport, &frame, to).await
    }
}
