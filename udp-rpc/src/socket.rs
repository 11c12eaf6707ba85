//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that moves
//! whole datagrams as opaque byte vectors.  Envelope parsing lives in
//! [`crate::envelope`]; this module owns only byte I/O, the receive-size
//! bound, and optional fault injection through [`crate::simulator`].

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::simulator::{SendFate, Simulator, SimulatorConfig};

/// Largest datagram either side will accept.
pub const MAX_DATAGRAM: usize = 1400;

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The datagram did not fit in [`MAX_DATAGRAM`] bytes.
    #[error("datagram from {from} exceeds {MAX_DATAGRAM} bytes")]
    Oversize { from: SocketAddr },
    /// Refused to send a datagram larger than [`MAX_DATAGRAM`].
    #[error("refusing to send {len}-byte datagram (limit {MAX_DATAGRAM})")]
    TooLarge { len: usize },
}

/// An async, datagram-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    faults: Option<Simulator>,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        Self::bind_with(local_addr, SimulatorConfig::default()).await
    }

    /// Bind with a fault model applied to every send and receive.
    pub async fn bind_with(
        local_addr: SocketAddr,
        faults: SimulatorConfig,
    ) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        let faults = (!faults.is_transparent()).then(|| Simulator::new(faults));
        Ok(Self {
            local_addr,
            inner,
            faults,
        })
    }

    /// Send `bytes` as a single datagram to `dest`.
    ///
    /// A datagram dropped by the simulator still reports success, exactly
    /// like a datagram lost on the wire.
    pub async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        if bytes.len() > MAX_DATAGRAM {
            return Err(SocketError::TooLarge { len: bytes.len() });
        }
        let fate = self
            .faults
            .as_ref()
            .map_or(SendFate::Deliver, Simulator::on_send);
        match fate {
            SendFate::Drop => {
                log::debug!("[sim] dropped {} bytes to {dest}", bytes.len());
            }
            SendFate::Deliver => {
                self.inner.send_to(bytes, dest).await?;
                log::trace!("→ {} bytes to {dest}", bytes.len());
            }
            SendFate::Duplicate => {
                self.inner.send_to(bytes, dest).await?;
                self.inner.send_to(bytes, dest).await?;
                log::debug!("[sim] duplicated {} bytes to {dest}", bytes.len());
            }
        }
        Ok(())
    }

    /// Receive the next datagram.
    ///
    /// Returns `(bytes, sender_address)`.  Datagrams larger than
    /// [`MAX_DATAGRAM`] are reported as [`SocketError::Oversize`]; the caller
    /// decides whether to keep reading.
    pub async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr), SocketError> {
        // One spare byte so an oversize datagram is detectable after the OS
        // truncates it.
        let mut buf = vec![0u8; MAX_DATAGRAM + 1];
        loop {
            let (n, from) = self.inner.recv_from(&mut buf).await?;
            if self.faults.as_ref().is_some_and(Simulator::drop_incoming) {
                log::debug!("[sim] dropped {n} incoming bytes from {from}");
                continue;
            }
            if n > MAX_DATAGRAM {
                return Err(SocketError::Oversize { from });
            }
            log::trace!("← {n} bytes from {from}");
            buf.truncate(n);
            return Ok((buf, from));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn datagram_crosses_loopback() {
        let a = loopback().await;
        let b = loopback().await;
        a.send_to(b"ping", b.local_addr).await.unwrap();
        let (bytes, from) = b.recv_from().await.unwrap();
        assert_eq!(bytes, b"ping");
        assert_eq!(from, a.local_addr);
    }

    #[tokio::test]
    async fn oversize_send_is_refused() {
        let a = loopback().await;
        let big = vec![0u8; MAX_DATAGRAM + 1];
        assert!(matches!(
            a.send_to(&big, a.local_addr).await,
            Err(SocketError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn oversize_receive_is_a_framing_error() {
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = loopback().await;
        raw.send_to(&vec![1u8; MAX_DATAGRAM + 100], b.local_addr)
            .await
            .unwrap();
        assert!(matches!(
            b.recv_from().await,
            Err(SocketError::Oversize { .. })
        ));
    }

    #[tokio::test]
    async fn lossy_socket_drops_outgoing() {
        let a = Socket::bind_with("127.0.0.1:0".parse().unwrap(), SimulatorConfig::lossy(1.0))
            .await
            .unwrap();
        let b = loopback().await;
        a.send_to(b"lost", b.local_addr).await.unwrap();
        let got = tokio::time::timeout(Duration::from_millis(200), b.recv_from()).await;
        assert!(got.is_err(), "datagram should have been dropped");
    }

    #[tokio::test]
    async fn duplicating_socket_sends_twice() {
        let a = Socket::bind_with(
            "127.0.0.1:0".parse().unwrap(),
            SimulatorConfig {
                duplicate_rate: 1.0,
                ..SimulatorConfig::default()
            },
        )
        .await
        .unwrap();
        let b = loopback().await;
        a.send_to(b"twice", b.local_addr).await.unwrap();
        assert_eq!(b.recv_from().await.unwrap().0, b"twice");
        assert_eq!(b.recv_from().await.unwrap().0, b"twice");
    }
}
