// ── Command transports ──
//
// How a single command datagram leaves the process. The dispatcher
// holds one of each and picks per send from the shared mode.

use std::fmt::Debug;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::trace;

use crate::error::TransportError;

/// Sends one datagram per command. No reply is read.
#[async_trait::async_trait]
pub trait CommandTransport: Send + Sync + Debug {
    /// Deliver `payload` to `target`, returning the bytes written.
    async fn send(&self, target: SocketAddr, payload: &[u8]) -> Result<usize, TransportError>;
}

// ── Mock ─────────────────────────────────────────────────────────

/// Succeeds after a short delay without touching the network.
#[derive(Debug, Clone)]
pub struct MockTransport {
    delay: Duration,
}

impl MockTransport {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait::async_trait]
impl CommandTransport for MockTransport {
    async fn send(&self, target: SocketAddr, payload: &[u8]) -> Result<usize, TransportError> {
        tokio::time::sleep(self.delay).await;
        trace!(%target, bytes = payload.len(), "mock send");
        Ok(payload.len())
    }
}

// ── UDP ──────────────────────────────────────────────────────────

/// Opens a fresh ephemeral socket for every send and drops it after.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    timeout: Duration,
}

impl UdpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn ephemeral_for(target: SocketAddr) -> SocketAddr {
    let ip = match target {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

#[async_trait::async_trait]
impl CommandTransport for UdpTransport {
    async fn send(&self, target: SocketAddr, payload: &[u8]) -> Result<usize, TransportError> {
        let attempt = async {
            let socket = UdpSocket::bind(ephemeral_for(target)).await?;
            socket.send_to(payload, target).await
        };

        let sent = tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| TransportError::Timeout {
                timeout_ms: self.timeout.as_millis(),
            })??;

        if sent == payload.len() {
            Ok(sent)
        } else {
            Err(TransportError::ShortSend {
                sent,
                expected: payload.len(),
            })
        }
    }
}
