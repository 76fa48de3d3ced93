// ── Heartbeat monitor ──
//
// Tracks camera liveness from periodic `HEARTBEAT` beacons. The state
// machine lives in `LivenessTable` and only reports edges; the monitor
// loop feeds it beacons and sweeps, and publishes what changed.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::address_book::{AddressBook, CameraId};
use crate::config::{FleetTiming, TransportMode};
use crate::event::{EventSink, FleetEvent};
use crate::net;
use crate::stream::{LivenessMap, StatusStream};

pub const BEACON: &[u8] = b"HEARTBEAT";
const BEACON_BUFFER: usize = 1024;

// ── Liveness state ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Liveness {
    pub last_beacon: Option<Instant>,
    pub online: bool,
}

/// A state change worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessEdge {
    Online(CameraId),
    Offline(CameraId),
}

/// Per-camera liveness. Every camera starts offline.
#[derive(Debug, Clone, Default)]
pub struct LivenessTable {
    cameras: BTreeMap<CameraId, Liveness>,
}

impl LivenessTable {
    pub fn new(cameras: impl IntoIterator<Item = CameraId>) -> Self {
        Self {
            cameras: cameras
                .into_iter()
                .map(|id| (id, Liveness::default()))
                .collect(),
        }
    }

    /// Refresh a camera's timestamp; reports an edge only when it was offline.
    pub fn record_beacon(&mut self, camera: CameraId, now: Instant) -> Option<LivenessEdge> {
        let state = self.cameras.entry(camera).or_default();
        state.last_beacon = Some(now);
        if state.online {
            None
        } else {
            state.online = true;
            Some(LivenessEdge::Online(camera))
        }
    }

    /// Demote online cameras silent for longer than `timeout`.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<LivenessEdge> {
        self.cameras
            .iter_mut()
            .filter_map(|(id, state)| {
                let last = state.last_beacon?;
                if state.online && now.saturating_duration_since(last) > timeout {
                    state.online = false;
                    Some(LivenessEdge::Offline(*id))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Bring every camera online at once, reporting those that changed.
    pub fn mark_all_online(&mut self, now: Instant) -> Vec<LivenessEdge> {
        let ids: Vec<CameraId> = self.cameras.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.record_beacon(id, now))
            .collect()
    }

    /// Refresh timestamps of online cameras without reporting anything.
    pub fn refresh_online(&mut self, now: Instant) {
        for state in self.cameras.values_mut().filter(|s| s.online) {
            state.last_beacon = Some(now);
        }
    }

    pub fn get(&self, camera: CameraId) -> Liveness {
        self.cameras.get(&camera).copied().unwrap_or_default()
    }

    pub fn is_online(&self, camera: CameraId) -> bool {
        self.get(camera).online
    }

    pub fn statuses(&self) -> LivenessMap {
        self.cameras.iter().map(|(id, s)| (*id, s.online)).collect()
    }

    pub fn online(&self) -> Vec<CameraId> {
        self.cameras
            .iter()
            .filter(|(_, s)| s.online)
            .map(|(id, _)| *id)
            .collect()
    }
}

// ── Monitor ──────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum LoopExit {
    Cancelled,
    ModeChanged,
}

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    inner: Arc<HeartbeatInner>,
}

#[derive(Debug)]
struct HeartbeatInner {
    book: Arc<AddressBook>,
    table: Mutex<LivenessTable>,
    snapshot: watch::Sender<Arc<LivenessMap>>,
    events: EventSink,
    mode: watch::Receiver<TransportMode>,
    bind: SocketAddr,
    bound: Mutex<Option<SocketAddr>>,
    timing: FleetTiming,
}

impl HeartbeatMonitor {
    pub fn new(
        book: Arc<AddressBook>,
        mode: watch::Receiver<TransportMode>,
        events: EventSink,
        bind: SocketAddr,
        timing: FleetTiming,
    ) -> Self {
        let table = LivenessTable::new(book.cameras().iter().map(|e| e.id));
        let (snapshot, _) = watch::channel(Arc::new(table.statuses()));
        Self {
            inner: Arc::new(HeartbeatInner {
                book,
                table: Mutex::new(table),
                snapshot,
                events,
                mode,
                bind,
                bound: Mutex::new(None),
                timing,
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, LivenessTable> {
        self.inner
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn status(&self, camera: CameraId) -> bool {
        self.table().is_online(camera)
    }

    pub fn all_statuses(&self) -> LivenessMap {
        self.table().statuses()
    }

    pub fn online_cameras(&self) -> Vec<CameraId> {
        self.table().online()
    }

    pub fn subscribe(&self) -> StatusStream {
        StatusStream::new(self.inner.snapshot.subscribe())
    }

    /// Address of the beacon socket while listening in real mode.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .inner
            .bound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ── Loop ─────────────────────────────────────────────────────

    /// Run until cancelled, following mode switches as they happen.
    pub async fn run(self, cancel: CancellationToken) {
        let mut mode = self.inner.mode.clone();
        loop {
            let current = *mode.borrow_and_update();
            debug!(mode = %current, "heartbeat monitor running");
            let exit = match current {
                TransportMode::Mock => self.simulate(&cancel, &mut mode).await,
                TransportMode::Real => self.listen(&cancel, &mut mode).await,
            };
            if exit == LoopExit::Cancelled {
                break;
            }
        }
        debug!("heartbeat monitor stopped");
    }

    /// Mock mode: the whole fleet comes online once, then stays fresh.
    async fn simulate(
        &self,
        cancel: &CancellationToken,
        mode: &mut watch::Receiver<TransportMode>,
    ) -> LoopExit {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return LoopExit::Cancelled,
            () = mode_changed(mode) => return LoopExit::ModeChanged,
            () = tokio::time::sleep(self.inner.timing.mock_startup_delay) => {}
        }

        let edges = self.table().mark_all_online(Instant::now());
        self.publish(&edges);

        let mut refresh = tokio::time::interval(self.inner.timing.mock_refresh);
        refresh.tick().await;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return LoopExit::Cancelled,
                () = mode_changed(mode) => return LoopExit::ModeChanged,
                _ = refresh.tick() => self.table().refresh_online(Instant::now()),
            }
        }
    }

    /// Real mode: receive beacons with a short timeout and sweep after
    /// every attempt.
    async fn listen(
        &self,
        cancel: &CancellationToken,
        mode: &mut watch::Receiver<TransportMode>,
    ) -> LoopExit {
        let socket = match net::bind_udp(self.inner.bind, None) {
            Ok(socket) => socket,
            Err(e) => {
                error!(address = %self.inner.bind, error = %e, "heartbeat listener unavailable, liveness will not update");
                return tokio::select! {
                    () = cancel.cancelled() => LoopExit::Cancelled,
                    () = mode_changed(mode) => LoopExit::ModeChanged,
                };
            }
        };
        let local = socket.local_addr().ok();
        info!(address = ?local, "listening for heartbeats");
        self.set_bound(local);

        let mut buf = [0u8; BEACON_BUFFER];
        let exit = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break LoopExit::Cancelled,
                () = mode_changed(mode) => break LoopExit::ModeChanged,
                received = tokio::time::timeout(self.inner.timing.heartbeat_poll, socket.recv_from(&mut buf)) => {
                    match received {
                        Ok(Ok((len, from))) => self.on_datagram(&buf[..len], from),
                        Ok(Err(e)) => warn!(error = %e, "heartbeat receive failed"),
                        Err(_) => trace!("heartbeat poll timeout"),
                    }
                }
            }
            let edges = self
                .table()
                .sweep(Instant::now(), self.inner.timing.heartbeat_timeout);
            self.publish(&edges);
        };

        self.set_bound(None);
        exit
    }

    fn on_datagram(&self, data: &[u8], from: SocketAddr) {
        if data.trim_ascii() != BEACON {
            trace!(%from, len = data.len(), "ignoring non-beacon datagram");
            return;
        }
        let Some(camera) = self.inner.book.resolve(from.ip()) else {
            warn!(%from, "beacon from unknown address dropped");
            return;
        };
        trace!(%camera, "beacon");
        let edge = self.table().record_beacon(camera, Instant::now());
        if let Some(edge) = edge {
            self.publish(&[edge]);
        }
    }

    fn publish(&self, edges: &[LivenessEdge]) {
        if edges.is_empty() {
            return;
        }
        for edge in edges {
            let event = match *edge {
                LivenessEdge::Online(camera) => {
                    info!(%camera, "camera online");
                    FleetEvent::CameraOnline { camera }
                }
                LivenessEdge::Offline(camera) => {
                    warn!(%camera, "camera offline");
                    FleetEvent::CameraOffline { camera }
                }
            };
            self.inner.events.emit(event);
        }
        let snapshot = Arc::new(self.all_statuses());
        self.inner.snapshot.send_replace(snapshot);
    }

    fn set_bound(&self, address: Option<SocketAddr>) {
        *self
            .inner
            .bound
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = address;
    }
}

/// Resolves when the mode changes; never resolves once the owner is gone.
pub(crate) async fn mode_changed(mode: &mut watch::Receiver<TransportMode>) {
    if mode.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn cam(n: u8) -> CameraId {
        CameraId::new(n).unwrap()
    }

    #[test]
    fn never_seen_camera_starts_offline_and_is_not_swept() {
        let mut table = LivenessTable::new(CameraId::all());
        let t0 = Instant::now();
        assert!(!table.is_online(cam(3)));
        assert!(table.sweep(t0 + Duration::from_secs(60), TIMEOUT).is_empty());
    }

    #[test]
    fn beacon_then_silence_produces_one_edge_each_way() {
        let mut table = LivenessTable::new(CameraId::all());
        let t0 = Instant::now();

        assert_eq!(
            table.record_beacon(cam(3), t0),
            Some(LivenessEdge::Online(cam(3)))
        );
        assert!(table.is_online(cam(3)));

        // Still fresh at exactly the timeout.
        assert!(table.sweep(t0 + TIMEOUT, TIMEOUT).is_empty());

        let late = t0 + TIMEOUT + Duration::from_millis(1);
        assert_eq!(table.sweep(late, TIMEOUT), vec![LivenessEdge::Offline(cam(3))]);
        assert!(!table.is_online(cam(3)));

        // Subsequent sweeps stay silent.
        assert!(table.sweep(late + TIMEOUT, TIMEOUT).is_empty());
        assert!(table.sweep(late + TIMEOUT * 4, TIMEOUT).is_empty());
    }

    #[test]
    fn repeated_beacons_do_not_re_emit() {
        let mut table = LivenessTable::new(CameraId::all());
        let t0 = Instant::now();
        assert!(table.record_beacon(cam(1), t0).is_some());
        assert!(table.record_beacon(cam(1), t0 + Duration::from_secs(1)).is_none());
        assert!(table.record_beacon(cam(1), t0 + Duration::from_secs(2)).is_none());
        // The refreshed timestamp keeps it alive past the first beacon's deadline.
        assert!(table.sweep(t0 + Duration::from_secs(6), TIMEOUT).is_empty());
    }

    #[test]
    fn mock_fleet_comes_online_once() {
        let mut table = LivenessTable::new(CameraId::all());
        let t0 = Instant::now();
        assert_eq!(table.mark_all_online(t0).len(), 8);
        assert!(table.mark_all_online(t0).is_empty());
        table.refresh_online(t0 + Duration::from_secs(10));
        assert!(table.sweep(t0 + Duration::from_secs(12), TIMEOUT).is_empty());
        assert_eq!(table.online().len(), 8);
    }

    #[test]
    fn statuses_cover_every_camera() {
        let mut table = LivenessTable::new(CameraId::all());
        table.record_beacon(CameraId::LOCAL, Instant::now());
        let statuses = table.statuses();
        assert_eq!(statuses.len(), 8);
        assert!(statuses[&CameraId::LOCAL]);
        assert!(!statuses[&cam(1)]);
        assert_eq!(table.online(), vec![CameraId::LOCAL]);
    }
}
