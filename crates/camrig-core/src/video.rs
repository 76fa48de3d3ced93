// ── Video frame receiver ──
//
// Two UDP listeners (general and local) carrying one JPEG frame per
// datagram. Frames are forwarded as bytes; decoding is the consumer's
// business so it can never stall the receive loop.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::address_book::{AddressBook, CameraId};
use crate::config::TransportMode;
use crate::event::{EventSink, VideoFrame};
use crate::net;

/// Largest UDP payload.
const DATAGRAM_BUFFER: usize = 65_536;

/// What happens to one received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramRoute {
    /// Forward as a frame from this camera.
    Frame(CameraId),
    /// Consumed without surfacing, because the fleet is simulated.
    Discard,
    /// Sender is not part of the fleet.
    Unknown,
    Empty,
}

/// Decide the fate of a datagram from `from` under `mode`.
pub fn route_datagram(
    book: &AddressBook,
    mode: TransportMode,
    from: SocketAddr,
    data: &[u8],
) -> DatagramRoute {
    if mode.is_mock() {
        return DatagramRoute::Discard;
    }
    if data.is_empty() {
        return DatagramRoute::Empty;
    }
    book.resolve(from.ip())
        .map_or(DatagramRoute::Unknown, DatagramRoute::Frame)
}

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    unknown: AtomicU64,
    discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoStats {
    pub frames: u64,
    pub unknown_sender: u64,
    pub discarded: u64,
}

#[derive(Debug, Clone)]
pub struct VideoFrameReceiver {
    inner: Arc<VideoInner>,
}

#[derive(Debug)]
struct VideoInner {
    book: Arc<AddressBook>,
    mode: watch::Receiver<TransportMode>,
    events: EventSink,
    general: SocketAddr,
    local: SocketAddr,
    recv_buffer: usize,
    counters: Counters,
    bound: Mutex<Vec<SocketAddr>>,
}

impl VideoFrameReceiver {
    pub fn new(
        book: Arc<AddressBook>,
        mode: watch::Receiver<TransportMode>,
        events: EventSink,
        general: SocketAddr,
        local: SocketAddr,
        recv_buffer: usize,
    ) -> Self {
        Self {
            inner: Arc::new(VideoInner {
                book,
                mode,
                events,
                general,
                local,
                recv_buffer,
                counters: Counters::default(),
                bound: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn stats(&self) -> VideoStats {
        let c = &self.inner.counters;
        VideoStats {
            frames: c.frames.load(Ordering::Relaxed),
            unknown_sender: c.unknown.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
        }
    }

    /// Addresses actually bound, general first.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.inner
            .bound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn bind(&self, address: SocketAddr) -> Option<UdpSocket> {
        match net::bind_udp(address, Some(self.inner.recv_buffer)) {
            Ok(socket) => {
                let local = socket.local_addr().unwrap_or(address);
                info!(address = %local, "listening for video frames");
                self.inner
                    .bound
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(local);
                Some(socket)
            }
            Err(e) => {
                error!(%address, error = %e, "video listener unavailable");
                None
            }
        }
    }

    /// Receive on both sockets until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let general = self.bind(self.inner.general);
        let local = self.bind(self.inner.local);
        if general.is_none() && local.is_none() {
            error!("no video listener could be bound, video is unavailable");
            cancel.cancelled().await;
            return;
        }

        let mut general_buf = vec![0u8; DATAGRAM_BUFFER];
        let mut local_buf = vec![0u8; DATAGRAM_BUFFER];

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                received = recv_on(general.as_ref(), &mut general_buf) => {
                    self.on_receive(received, &general_buf);
                }
                received = recv_on(local.as_ref(), &mut local_buf) => {
                    self.on_receive(received, &local_buf);
                }
            }
        }

        let stats = self.stats();
        debug!(
            frames = stats.frames,
            unknown = stats.unknown_sender,
            discarded = stats.discarded,
            "video receiver stopped"
        );
    }

    fn on_receive(&self, received: io::Result<(usize, SocketAddr)>, buf: &[u8]) {
        match received {
            Ok((len, from)) => self.on_datagram(from, &buf[..len]),
            Err(e) => warn!(error = %e, "video receive failed"),
        }
    }

    fn on_datagram(&self, from: SocketAddr, data: &[u8]) {
        let mode = *self.inner.mode.borrow();
        let counters = &self.inner.counters;
        match route_datagram(&self.inner.book, mode, from, data) {
            DatagramRoute::Frame(camera) => {
                counters.frames.fetch_add(1, Ordering::Relaxed);
                trace!(%camera, bytes = data.len(), "frame");
                self.inner.events.emit_frame(VideoFrame {
                    camera,
                    data: Bytes::copy_from_slice(data),
                    received_at: Instant::now(),
                });
            }
            DatagramRoute::Discard => {
                counters.discarded.fetch_add(1, Ordering::Relaxed);
            }
            DatagramRoute::Unknown => {
                counters.unknown.fetch_add(1, Ordering::Relaxed);
                debug!(%from, bytes = data.len(), "video datagram from unknown address dropped");
            }
            DatagramRoute::Empty => trace!(%from, "empty video datagram"),
        }
    }
}

/// Receive on an optional socket; a missing socket never becomes ready.
async fn recv_on(socket: Option<&UdpSocket>, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;

    fn book() -> AddressBook {
        AddressBook::new(&FleetConfig::default()).unwrap()
    }

    fn from(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn known_sender_becomes_a_frame() {
        let book = book();
        assert_eq!(
            route_datagram(&book, TransportMode::Real, from("192.168.0.205:40000"), b"\xff\xd8"),
            DatagramRoute::Frame(CameraId::new(5).unwrap())
        );
        assert_eq!(
            route_datagram(&book, TransportMode::Real, from("127.0.0.1:40000"), b"\xff\xd8"),
            DatagramRoute::Frame(CameraId::LOCAL)
        );
    }

    #[test]
    fn controller_address_is_the_local_camera() {
        let book = book();
        assert_eq!(
            route_datagram(&book, TransportMode::Real, from("192.168.0.200:40000"), b"jpeg"),
            DatagramRoute::Frame(CameraId::LOCAL)
        );
    }

    #[test]
    fn unknown_sender_is_never_guessed() {
        let book = book();
        assert_eq!(
            route_datagram(&book, TransportMode::Real, from("192.168.0.99:40000"), b"jpeg"),
            DatagramRoute::Unknown
        );
    }

    #[test]
    fn mock_mode_discards_everything() {
        let book = book();
        for sender in ["192.168.0.201:1", "127.0.0.1:1", "10.0.0.1:1"] {
            assert_eq!(
                route_datagram(&book, TransportMode::Mock, from(sender), b"jpeg"),
                DatagramRoute::Discard
            );
        }
    }
}
