//! Datagram transport abstraction.
//!
//! [`Transport`] is the seam between the protocol and the network: the
//! sessions only ever see whole datagrams.  [`Socket`] implements it over
//! `tokio::net::UdpSocket`; [`crate::simulator::Simulator`] wraps any other
//! transport and injects faults for testing.
//!
//! The handshake waits on [`Transport::recv_from`] under a timeout.  The data
//! phases instead drain with [`Transport::try_recv_from`], which never blocks,
//! and park on [`Transport::readable`] only when nothing is queued.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::error::TransferError;

/// Receive buffer size; any frame the protocol produces fits.
pub const MAX_DATAGRAM: usize = 65_535;

/// Datagram I/O used by the sender and receiver sessions.
pub trait Transport: Send + Sync {
    /// Send one datagram to `dest`.
    fn send_to(
        &self,
        buf: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    /// Wait for the next datagram.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    /// Take a queued datagram without waiting; `WouldBlock` when none is ready.
    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Resolve once a datagram may be ready.  Spurious wake-ups are allowed.
    fn readable(&self) -> impl Future<Output = io::Result<()>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Returns true if the error is likely transient (retry may succeed).
///
/// ICMP port-unreachable surfaces as `ConnectionRefused` / `ConnectionReset`
/// on some platforms while the peer is not yet bound; that is not fatal here.
pub fn is_transient_io_error(e: &io::Error) -> bool {
    use io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
    )
}

/// Send one frame, treating transient failures as a lost datagram.
pub async fn send_frame<T: Transport>(
    transport: &T,
    frame: &[u8],
    dest: SocketAddr,
) -> Result<(), TransferError> {
    match transport.send_to(frame, dest).await {
        Ok(_) => Ok(()),
        Err(e) if is_transient_io_error(&e) => {
            log::warn!("transient send failure to {dest}: {e}");
            Ok(())
        }
        Err(e) => Err(TransferError::Send(e)),
    }
}

/// A UDP socket speaking raw datagrams.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }
}

impl Transport for Socket {
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, dest).await
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
        Ok(self.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn datagram_roundtrip_over_loopback() {
        let a = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        a.send_to(b"frame", b.local_addr).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"frame");
        assert_eq!(from, a.local_addr);
    }

    #[tokio::test]
    async fn try_recv_on_empty_socket_would_block() {
        let a = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mut buf = [0u8; 16];
        let err = a.try_recv_from(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(is_transient_io_error(&err));
    }

    #[test]
    fn permission_denied_is_not_transient() {
        let e = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(!is_transient_io_error(&e));
    }
}
