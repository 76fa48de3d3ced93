// ── Still image receiver ──
//
// Two TCP listeners accepting one connection per capture. The first
// four bytes pick the protocol:
//
//   RAW1 | u32 jpeg_len (BE) | jpeg | u32 dng_len (BE) | dng
//   anything else            | jpeg bytes until the peer closes
//
// Each connection is received on its own task; a failed transfer ends
// that connection only.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::address_book::{AddressBook, CameraId};
use crate::error::StillError;
use crate::event::{EventSink, FleetEvent, StillCapture};
use crate::net;

pub const RAW_MARKER: &[u8; 4] = b"RAW1";

/// Upper bound on a single RAW section.
pub const MAX_SECTION_LEN: usize = 512 * 1024 * 1024;

const LISTEN_BACKLOG: u32 = 8;

/// Read size for the plain protocol given how many transfers are
/// running. Smaller chunks under load keep every transfer moving.
pub fn adaptive_chunk_size(active: usize) -> usize {
    const KIB: usize = 1024;
    match active {
        0 | 1 => 64 * KIB,
        2 | 3 => 32 * KIB,
        4 | 5 => 16 * KIB,
        _ => 8 * KIB,
    }
}

// ── Wire parsing ─────────────────────────────────────────────────

/// The image data of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePayload {
    pub jpeg: Bytes,
    pub dng: Option<Bytes>,
}

/// Read one capture from `reader`.
///
/// `chunk_size` is consulted before every plain-protocol read so the
/// size follows the current load. Any read that stalls longer than
/// `idle` ends the transfer.
pub async fn read_capture<R, F>(
    reader: &mut R,
    chunk_size: F,
    idle: Duration,
) -> Result<CapturePayload, StillError>
where
    R: AsyncRead + Unpin,
    F: Fn() -> usize,
{
    let mut tag = [0u8; 4];
    let tagged = fill(reader, &mut tag, idle).await?;

    if tagged == tag.len() && &tag == RAW_MARKER {
        let jpeg = read_section(reader, "jpeg", idle).await?;
        let dng = read_section(reader, "dng", idle).await?;
        return Ok(CapturePayload {
            jpeg,
            dng: Some(dng),
        });
    }

    let mut jpeg = BytesMut::from(&tag[..tagged]);
    if tagged == tag.len() {
        let mut chunk = Vec::new();
        loop {
            chunk.resize(chunk_size(), 0);
            let n = read_some(reader, &mut chunk, idle).await?;
            if n == 0 {
                break;
            }
            jpeg.extend_from_slice(&chunk[..n]);
        }
    }

    if jpeg.is_empty() {
        return Err(StillError::Empty);
    }
    Ok(CapturePayload {
        jpeg: jpeg.freeze(),
        dng: None,
    })
}

async fn read_section<R>(
    reader: &mut R,
    section: &'static str,
    idle: Duration,
) -> Result<Bytes, StillError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    read_exact(reader, &mut header, section, idle).await?;
    let len = usize::try_from(u32::from_be_bytes(header)).unwrap_or(usize::MAX);
    if len > MAX_SECTION_LEN {
        return Err(StillError::Oversized {
            section,
            length: len,
            limit: MAX_SECTION_LEN,
        });
    }

    let mut body = vec![0u8; len];
    read_exact(reader, &mut body, section, idle).await?;
    Ok(Bytes::from(body))
}

/// Fill `buf` completely; closing early is a truncation.
async fn read_exact<R>(
    reader: &mut R,
    buf: &mut [u8],
    section: &'static str,
    idle: Duration,
) -> Result<(), StillError>
where
    R: AsyncRead + Unpin,
{
    let received = fill(reader, buf, idle).await?;
    if received == buf.len() {
        Ok(())
    } else {
        Err(StillError::Truncated {
            section,
            received,
            expected: buf.len(),
        })
    }
}

/// Read until `buf` is full or the peer closes; returns bytes read.
async fn fill<R>(reader: &mut R, buf: &mut [u8], idle: Duration) -> Result<usize, StillError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = read_some(reader, &mut buf[filled..], idle).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn read_some<R>(reader: &mut R, buf: &mut [u8], idle: Duration) -> Result<usize, StillError>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(idle, reader.read(buf))
        .await
        .map_err(|_| StillError::Idle {
            timeout_secs: idle.as_secs(),
        })?
        .map_err(StillError::from)
}

// ── Receiver ─────────────────────────────────────────────────────

/// Counts a transfer as active for as long as it lives.
struct ActiveTransfer(Arc<AtomicUsize>);

impl ActiveTransfer {
    fn begin(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(active))
    }
}

impl Drop for ActiveTransfer {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StillStats {
    pub completed: u64,
    pub failed: u64,
    pub unknown_sender: u64,
    pub active: usize,
}

#[derive(Debug, Clone)]
pub struct StillImageReceiver {
    inner: Arc<StillInner>,
}

#[derive(Debug)]
struct StillInner {
    book: Arc<AddressBook>,
    events: EventSink,
    general: SocketAddr,
    local: SocketAddr,
    read_timeout: Duration,
    active: Arc<AtomicUsize>,
    counters: Counters,
    bound: Mutex<Vec<SocketAddr>>,
}

impl StillImageReceiver {
    pub fn new(
        book: Arc<AddressBook>,
        events: EventSink,
        general: SocketAddr,
        local: SocketAddr,
        read_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(StillInner {
                book,
                events,
                general,
                local,
                read_timeout,
                active: Arc::new(AtomicUsize::new(0)),
                counters: Counters::default(),
                bound: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn active_transfers(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> StillStats {
        let c = &self.inner.counters;
        StillStats {
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            unknown_sender: c.rejected.load(Ordering::Relaxed),
            active: self.active_transfers(),
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

    fn bind(&self, address: SocketAddr) -> Option<TcpListener> {
        match net::bind_tcp(address, LISTEN_BACKLOG) {
            Ok(listener) => {
                let local = listener.local_addr().unwrap_or(address);
                info!(address = %local, "listening for still captures");
                self.inner
                    .bound
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(local);
                Some(listener)
            }
            Err(e) => {
                error!(%address, error = %e, "still listener unavailable");
                None
            }
        }
    }

    /// Accept on both listeners until cancelled. In-flight transfers are
    /// aborted on the way out.
    pub async fn run(self, cancel: CancellationToken) {
        let general = self.bind(self.inner.general);
        let local = self.bind(self.inner.local);
        if general.is_none() && local.is_none() {
            error!("no still listener could be bound, captures cannot be received");
            cancel.cancelled().await;
            return;
        }

        let mut transfers = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                accepted = accept_on(general.as_ref()) => self.on_accept(accepted, &mut transfers),
                accepted = accept_on(local.as_ref()) => self.on_accept(accepted, &mut transfers),
                Some(_) = transfers.join_next(), if !transfers.is_empty() => {}
            }
        }

        if !transfers.is_empty() {
            debug!(count = transfers.len(), "aborting in-flight still transfers");
        }
        transfers.shutdown().await;
        debug!("still receiver stopped");
    }

    fn on_accept(
        &self,
        accepted: std::io::Result<(TcpStream, SocketAddr)>,
        transfers: &mut JoinSet<()>,
    ) {
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "still accept failed");
                return;
            }
        };
        let Some(camera) = self.inner.book.resolve(peer.ip()) else {
            self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(%peer, "still connection from unknown address refused");
            return;
        };
        debug!(%camera, %peer, "still connection accepted");
        transfers.spawn(self.clone().receive(stream, camera));
    }

    async fn receive(self, mut stream: TcpStream, camera: CameraId) {
        let _active = ActiveTransfer::begin(&self.inner.active);
        let started = Instant::now();
        let active = Arc::clone(&self.inner.active);
        let chunk_size = move || adaptive_chunk_size(active.load(Ordering::Relaxed));

        match read_capture(&mut stream, chunk_size, self.inner.read_timeout).await {
            Ok(payload) => self.complete(camera, payload, started),
            Err(StillError::Empty) => {
                warn!(%camera, "still connection closed without data, nothing emitted");
            }
            Err(e) => {
                self.inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(%camera, error = %e, "still transfer failed");
            }
        }
    }

    fn complete(&self, camera: CameraId, payload: CapturePayload, started: Instant) {
        let capture = StillCapture {
            camera,
            jpeg: payload.jpeg,
            dng: payload.dng,
            completed_at: Utc::now(),
        };

        let book = &self.inner.book;
        if capture.is_raw() && !book.raw_capable(camera) {
            warn!(%camera, "RAW capture from a camera not configured as RAW-capable");
        } else if !capture.is_raw() && book.raw_enabled(camera) {
            debug!(%camera, "RAW enabled but camera sent a plain capture");
        }

        self.inner.counters.completed.fetch_add(1, Ordering::Relaxed);
        info!(
            %camera,
            jpeg_bytes = capture.jpeg.len(),
            dng_bytes = capture.dng.as_ref().map_or(0, Bytes::len),
            elapsed_ms = started.elapsed().as_millis(),
            "still capture received"
        );
        self.inner.events.emit(FleetEvent::Still(Arc::new(capture)));
    }
}

async fn accept_on(listener: Option<&TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncWriteExt;

    use super::*;

    const IDLE: Duration = Duration::from_secs(5);

    fn raw_frame(jpeg: &[u8], dng: &[u8]) -> Vec<u8> {
        let mut wire = RAW_MARKER.to_vec();
        wire.extend_from_slice(&u32::try_from(jpeg.len()).unwrap().to_be_bytes());
        wire.extend_from_slice(jpeg);
        wire.extend_from_slice(&u32::try_from(dng.len()).unwrap().to_be_bytes());
        wire.extend_from_slice(dng);
        wire
    }

    async fn parse(wire: &[u8]) -> Result<CapturePayload, StillError> {
        let mut reader = wire;
        read_capture(&mut reader, || 64, IDLE).await
    }

    #[tokio::test]
    async fn raw_protocol_yields_both_sections() {
        let payload = parse(&raw_frame(&[0xAA; 100], &[0xBB; 200])).await.unwrap();
        assert_eq!(payload.jpeg.len(), 100);
        assert_eq!(payload.dng.map(|d| d.len()), Some(200));
    }

    #[tokio::test]
    async fn plain_protocol_reads_until_close() {
        let wire: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        let payload = parse(&wire).await.unwrap();
        assert_eq!(payload.jpeg.len(), 500);
        assert_eq!(payload.jpeg.as_ref(), wire.as_slice());
        assert!(payload.dng.is_none());
    }

    #[tokio::test]
    async fn near_miss_marker_is_plain_data() {
        let payload = parse(b"RAW2 not a raw frame").await.unwrap();
        assert_eq!(payload.jpeg.as_ref(), b"RAW2 not a raw frame");
        assert!(payload.dng.is_none());
    }

    #[tokio::test]
    async fn tiny_plain_payload_is_kept() {
        let payload = parse(b"ab").await.unwrap();
        assert_eq!(payload.jpeg.as_ref(), b"ab");
    }

    #[tokio::test]
    async fn truncated_jpeg_body_is_an_error() {
        let mut wire = RAW_MARKER.to_vec();
        wire.extend_from_slice(&100u32.to_be_bytes());
        wire.extend_from_slice(&[0u8; 40]);
        match parse(&wire).await {
            Err(StillError::Truncated {
                section,
                received,
                expected,
            }) => {
                assert_eq!(section, "jpeg");
                assert_eq!(received, 40);
                assert_eq!(expected, 100);
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_dng_section_is_an_error() {
        let mut wire = raw_frame(&[1u8; 10], &[]);
        wire.truncate(wire.len() - 4);
        assert!(matches!(
            parse(&wire).await,
            Err(StillError::Truncated { section: "dng", .. })
        ));
    }

    #[tokio::test]
    async fn oversized_section_is_rejected_before_allocating() {
        let mut wire = RAW_MARKER.to_vec();
        wire.extend_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            parse(&wire).await,
            Err(StillError::Oversized { section: "jpeg", .. })
        ));
    }

    #[tokio::test]
    async fn empty_connection_is_not_a_capture() {
        assert!(matches!(parse(b"").await, Err(StillError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_peer_times_out() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(b"\xff\xd8\xff\xe0").await.unwrap();

        let result = read_capture(&mut server, || 1024, Duration::from_secs(30)).await;
        assert!(matches!(result, Err(StillError::Idle { timeout_secs: 30 })));
        drop(client);
    }

    #[tokio::test]
    async fn chunk_size_follows_load_between_reads() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&sizes);
        let active = Arc::new(AtomicUsize::new(1));
        let load = Arc::clone(&active);

        let writer = tokio::spawn(async move {
            client.write_all(&[7u8; 4096]).await.unwrap();
        });
        let chunk = move || {
            let size = adaptive_chunk_size(load.fetch_add(2, Ordering::Relaxed));
            seen.lock().unwrap().push(size);
            size
        };
        let payload = read_capture(&mut server, chunk, IDLE).await.unwrap();
        writer.await.unwrap();

        assert_eq!(payload.jpeg.len(), 4096);
        let sizes = sizes.lock().unwrap();
        assert_eq!(sizes.first(), Some(&(64 * 1024)));
        assert!(sizes.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn chunk_policy_steps_down_with_concurrency() {
        assert_eq!(adaptive_chunk_size(0), 65_536);
        assert_eq!(adaptive_chunk_size(1), 65_536);
        assert_eq!(adaptive_chunk_size(2), 32_768);
        assert_eq!(adaptive_chunk_size(5), 16_384);
        assert_eq!(adaptive_chunk_size(6), 8_192);
        assert_eq!(adaptive_chunk_size(40), 8_192);
    }

    #[test]
    fn active_transfer_guard_balances() {
        let active = Arc::new(AtomicUsize::new(0));
        {
            let _a = ActiveTransfer::begin(&active);
            let _b = ActiveTransfer::begin(&active);
            assert_eq!(active.load(Ordering::Relaxed), 2);
        }
        assert_eq!(active.load(Ordering::Relaxed), 0);
    }
}
