//! Reliable single-packet exchange used for every control packet.
//!
//! One packet at a time: send, wait for the matching ACK, resend with a
//! doubled wait, give up after `max_attempts`.  A response only counts when it
//! is an ACK from the peer whose offset and echoed tag both match the packet;
//! NACKs, late ACKs for DATA, undecodable frames and strangers are skipped
//! without ending the current attempt early.

use std::net::SocketAddr;

use tokio::time::{timeout_at, Instant};

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::packet::Packet;
use crate::socket::{is_transient_io_error, send_frame, Transport, MAX_DATAGRAM};
use crate::timer::ExchangeBackoff;

/// Send `packet` to `peer` until it is acknowledged.
///
/// Returns the number of transmissions it took.
pub async fn send_and_confirm<T: Transport>(
    transport: &T,
    packet: &Packet,
    peer: SocketAddr,
    config: &TransferConfig,
) -> Result<u32, TransferError> {
    let frame = packet
        .encode(config.payload_capacity)
        .map_err(|e| TransferError::Argument(e.to_string()))?;
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut backoff = ExchangeBackoff::new(config.base_timeout, config.max_attempts);

    while let Some(wait) = backoff.next() {
        send_frame(transport, &frame, peer).await?;
        log::debug!(
            "[xchg] → {} offset={} attempt={} wait={wait:?}",
            packet.kind,
            packet.offset,
            backoff.attempts()
        );

        let deadline = Instant::now() + wait;
        while Instant::now() < deadline {
            let (n, from) = match timeout_at(deadline, transport.recv_from(&mut buf)).await {
                Err(_elapsed) => break,
                Ok(Ok(v)) => v,
                Ok(Err(e)) if is_transient_io_error(&e) => continue,
                Ok(Err(e)) => return Err(TransferError::Receive(e)),
            };
            if from != peer {
                log::debug!("[xchg] ignoring datagram from stranger {from}");
                continue;
            }
            match Packet::decode(&buf[..n]) {
                Ok(reply) if reply.acknowledges(packet.kind, packet.offset) => {
                    log::debug!("[xchg] ← ACK {} offset={}", packet.kind, packet.offset);
                    return Ok(backoff.attempts());
                }
                Ok(reply) => log::debug!(
                    "[xchg] ignoring {} offset={} while awaiting {} offset={}",
                    reply.kind,
                    reply.offset,
                    packet.kind,
                    packet.offset
                ),
                Err(e) => log::debug!("[xchg] ignoring bad frame: {e}"),
            }
        }

        log::warn!(
            "[xchg] no ACK for {} offset={} within {wait:?}",
            packet.kind,
            packet.offset
        );
    }

    Err(TransferError::HandshakeTimeout {
        kind: packet.kind,
        offset: packet.offset,
        attempts: backoff.attempts(),
    })
}
