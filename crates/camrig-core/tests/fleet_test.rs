#![allow(clippy::unwrap_used)]
// Integration tests over real loopback sockets.
//
// Remote cameras are placed at 127.0.0.1..=7 so senders can bind the
// address of the camera they impersonate; 127.0.0.9 is never a camera.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, UdpSocket};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use camrig_core::{
    AddressBook, CameraId, CommandTransport, EventSink, FleetConfig, FleetController, FleetEvent,
    FleetTiming, HeartbeatMonitor, PortSet, StillImageReceiver, TransportError, TransportMode,
    VideoFrameReceiver,
};

const WAIT: Duration = Duration::from_secs(5);
const ANY_PORT: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);

// ── Helpers ─────────────────────────────────────────────────────────

fn loopback_config() -> FleetConfig {
    let ephemeral = PortSet {
        control: 0,
        video: 0,
        video_control: 0,
        still: 0,
        heartbeat: 0,
    };
    FleetConfig {
        base_network: Ipv4Addr::new(127, 0, 0, 0),
        host_offset: 0,
        local_address: Ipv4Addr::new(127, 0, 0, 8),
        controller_alias: None,
        remote_ports: ephemeral,
        local_ports: ephemeral,
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        timing: FleetTiming {
            heartbeat_timeout: Duration::from_millis(300),
            heartbeat_poll: Duration::from_millis(50),
            mock_startup_delay: Duration::from_millis(20),
            mock_refresh: Duration::from_millis(50),
            dispatch_idle: Duration::from_millis(2),
            mock_send_delay: Duration::ZERO,
            ..FleetTiming::default()
        },
        ..FleetConfig::default()
    }
}

fn book() -> Arc<AddressBook> {
    Arc::new(AddressBook::new(&loopback_config()).unwrap())
}

fn cam(n: u8) -> CameraId {
    CameraId::new(n).unwrap()
}

fn camera_ip(n: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, n))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

async fn next_matching<T: Clone>(
    events: &mut broadcast::Receiver<T>,
    mut wanted: impl FnMut(&T) -> bool,
) -> T {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap()
}

fn drain_now<T: Clone>(events: &mut broadcast::Receiver<T>) -> Vec<T> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

async fn udp_from(camera: u8) -> UdpSocket {
    UdpSocket::bind(SocketAddr::new(camera_ip(camera), 0))
        .await
        .unwrap()
}

async fn tcp_from(camera: u8, to: SocketAddr) -> tokio::net::TcpStream {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind(SocketAddr::new(camera_ip(camera), 0)).unwrap();
    socket.connect(to).await.unwrap()
}

fn raw_frame(jpeg_len: usize, dng_len: usize) -> Vec<u8> {
    let mut wire = b"RAW1".to_vec();
    wire.extend_from_slice(&u32::try_from(jpeg_len).unwrap().to_be_bytes());
    wire.extend(std::iter::repeat_n(0xD8, jpeg_len));
    wire.extend_from_slice(&u32::try_from(dng_len).unwrap().to_be_bytes());
    wire.extend(std::iter::repeat_n(0x4E, dng_len));
    wire
}

// ── Heartbeat ───────────────────────────────────────────────────────

#[tokio::test]
async fn beacon_brings_camera_online_and_silence_takes_it_offline() {
    let sink = EventSink::new();
    let mut events = sink.subscribe();
    let (_mode, mode_rx) = watch::channel(TransportMode::Real);
    let monitor = HeartbeatMonitor::new(
        book(),
        mode_rx,
        sink,
        ANY_PORT,
        loopback_config().timing,
    );
    let mut statuses = monitor.subscribe();

    let cancel = CancellationToken::new();
    let task = tokio::spawn(monitor.clone().run(cancel.clone()));
    wait_until(|| monitor.local_addr().is_some()).await;
    let target = monitor.local_addr().unwrap();

    assert!(!monitor.status(cam(3)));
    let sender = udp_from(3).await;
    sender.send_to(b"HEARTBEAT", target).await.unwrap();

    let online = next_matching(&mut events, |e| matches!(e, FleetEvent::CameraOnline { .. })).await;
    assert!(matches!(online, FleetEvent::CameraOnline { camera } if camera == cam(3)));
    assert!(monitor.status(cam(3)));
    let snapshot = statuses.changed().await.unwrap();
    assert_eq!(snapshot.get(&cam(3)), Some(&true));

    let offline = next_matching(&mut events, |e| matches!(e, FleetEvent::CameraOffline { .. })).await;
    assert!(matches!(offline, FleetEvent::CameraOffline { camera } if camera == cam(3)));

    // Further sweeps must not repeat the edge.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let repeats = drain_now(&mut events)
        .into_iter()
        .filter(|e| matches!(e, FleetEvent::CameraOffline { .. }))
        .count();
    assert_eq!(repeats, 0);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn non_beacon_payloads_and_strangers_are_ignored() {
    let sink = EventSink::new();
    let mut events = sink.subscribe();
    let (_mode, mode_rx) = watch::channel(TransportMode::Real);
    let monitor = HeartbeatMonitor::new(book(), mode_rx, sink, ANY_PORT, loopback_config().timing);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(monitor.clone().run(cancel.clone()));
    wait_until(|| monitor.local_addr().is_some()).await;
    let target = monitor.local_addr().unwrap();

    udp_from(4).await.send_to(b"HELLO", target).await.unwrap();
    udp_from(9).await.send_to(b"HEARTBEAT", target).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(monitor.online_cameras().is_empty());
    assert!(drain_now(&mut events).is_empty());

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn mock_mode_brings_the_whole_fleet_online() {
    let sink = EventSink::new();
    let (_mode, mode_rx) = watch::channel(TransportMode::Mock);
    let monitor = HeartbeatMonitor::new(book(), mode_rx, sink, ANY_PORT, loopback_config().timing);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(monitor.clone().run(cancel.clone()));
    wait_until(|| monitor.online_cameras().len() == 8).await;
    assert!(monitor.local_addr().is_none());

    cancel.cancel();
    task.await.unwrap();
}

// ── Video ───────────────────────────────────────────────────────────

fn video_receiver(mode: TransportMode) -> (VideoFrameReceiver, watch::Sender<TransportMode>, EventSink) {
    let sink = EventSink::new();
    let (mode, mode_rx) = watch::channel(mode);
    let receiver = VideoFrameReceiver::new(book(), mode_rx, sink.clone(), ANY_PORT, ANY_PORT, 1 << 20);
    (receiver, mode, sink)
}

#[tokio::test]
async fn each_known_datagram_becomes_one_frame() {
    let (receiver, _mode, sink) = video_receiver(TransportMode::Real);
    let mut frames = sink.subscribe_frames();
    let mut events = sink.subscribe();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(receiver.clone().run(cancel.clone()));
    wait_until(|| receiver.local_addrs().len() == 2).await;
    let addrs = receiver.local_addrs();

    let sender = udp_from(2).await;
    sender.send_to(b"\xff\xd8frame-one\xff\xd9", addrs[0]).await.unwrap();
    sender.send_to(b"\xff\xd8frame-two\xff\xd9", addrs[1]).await.unwrap();

    for expected in [&b"\xff\xd8frame-one\xff\xd9"[..], &b"\xff\xd8frame-two\xff\xd9"[..]] {
        let frame = next_matching(&mut frames, |_| true).await;
        assert_eq!(frame.camera, cam(2));
        assert_eq!(frame.data.as_ref(), expected);
    }
    assert_eq!(receiver.stats().frames, 2);
    assert!(drain_now(&mut events).is_empty());

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn unknown_sender_yields_no_frame() {
    let (receiver, _mode, sink) = video_receiver(TransportMode::Real);
    let mut frames = sink.subscribe_frames();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(receiver.clone().run(cancel.clone()));
    wait_until(|| receiver.local_addrs().len() == 2).await;

    let stranger = udp_from(9).await;
    stranger.send_to(b"\xff\xd8", receiver.local_addrs()[0]).await.unwrap();
    wait_until(|| receiver.stats().unknown_sender == 1).await;

    assert!(drain_now(&mut frames).is_empty());
    assert_eq!(receiver.stats().frames, 0);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn mock_mode_consumes_but_never_surfaces_frames() {
    let (receiver, mode, sink) = video_receiver(TransportMode::Mock);
    let mut frames = sink.subscribe_frames();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(receiver.clone().run(cancel.clone()));
    wait_until(|| receiver.local_addrs().len() == 2).await;
    let target = receiver.local_addrs()[0];

    let sender = udp_from(5).await;
    for _ in 0..3 {
        sender.send_to(b"\xff\xd8", target).await.unwrap();
    }
    wait_until(|| receiver.stats().discarded == 3).await;
    assert!(drain_now(&mut frames).is_empty());

    mode.send_replace(TransportMode::Real);
    sender.send_to(b"\xff\xd8", target).await.unwrap();
    next_matching(&mut frames, |_| true).await;

    cancel.cancel();
    task.await.unwrap();
}

// ── Stills ──────────────────────────────────────────────────────────

fn still_receiver() -> (StillImageReceiver, EventSink) {
    let sink = EventSink::new();
    let receiver = StillImageReceiver::new(book(), sink.clone(), ANY_PORT, ANY_PORT, WAIT);
    (receiver, sink)
}

async fn started_still() -> (
    StillImageReceiver,
    broadcast::Receiver<FleetEvent>,
    CancellationToken,
    tokio::task::JoinHandle<()>,
) {
    let (receiver, sink) = still_receiver();
    let events = sink.subscribe();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(receiver.clone().run(cancel.clone()));
    wait_until(|| receiver.local_addrs().len() == 2).await;
    (receiver, events, cancel, task)
}

#[tokio::test]
async fn raw_connection_yields_one_combined_capture() {
    let (receiver, mut events, cancel, task) = started_still().await;

    let mut conn = tcp_from(2, receiver.local_addrs()[0]).await;
    conn.write_all(&raw_frame(100, 200)).await.unwrap();
    conn.shutdown().await.unwrap();

    let FleetEvent::Still(capture) =
        next_matching(&mut events, |e| matches!(e, FleetEvent::Still(_))).await
    else {
        unreachable!()
    };
    assert_eq!(capture.camera, cam(2));
    assert_eq!(capture.jpeg.len(), 100);
    assert_eq!(capture.dng.as_ref().map(|d| d.len()), Some(200));

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn plain_connection_yields_bytes_until_close() {
    let (receiver, mut events, cancel, task) = started_still().await;

    let payload: Vec<u8> = (0..500u32).map(|i| (i % 200) as u8 + 1).collect();
    let mut conn = tcp_from(5, receiver.local_addrs()[1]).await;
    conn.write_all(&payload).await.unwrap();
    conn.shutdown().await.unwrap();

    let FleetEvent::Still(capture) =
        next_matching(&mut events, |e| matches!(e, FleetEvent::Still(_))).await
    else {
        unreachable!()
    };
    assert_eq!(capture.camera, cam(5));
    assert_eq!(capture.jpeg.as_ref(), payload.as_slice());
    assert!(capture.dng.is_none());

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn truncated_raw_transfer_emits_nothing() {
    let (receiver, mut events, cancel, task) = started_still().await;

    let mut wire = b"RAW1".to_vec();
    wire.extend_from_slice(&100u32.to_be_bytes());
    wire.extend_from_slice(&[0xD8; 40]);
    let mut conn = tcp_from(2, receiver.local_addrs()[0]).await;
    conn.write_all(&wire).await.unwrap();
    conn.shutdown().await.unwrap();
    drop(conn);

    wait_until(|| receiver.stats().failed == 1).await;
    assert!(drain_now(&mut events).is_empty());

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn one_broken_transfer_does_not_disturb_the_others() {
    let (receiver, mut events, cancel, task) = started_still().await;
    let target = receiver.local_addrs()[0];

    let mut broken = tcp_from(1, target).await;
    broken.write_all(b"RAW1\x00\x00\x10\x00").await.unwrap();

    let mut senders = Vec::new();
    for camera in 2..=6u8 {
        senders.push(tokio::spawn(async move {
            let mut conn = tcp_from(camera, target).await;
            conn.write_all(&vec![camera; 50_000]).await.unwrap();
            conn.shutdown().await.unwrap();
        }));
    }
    for sender in senders {
        sender.await.unwrap();
    }
    drop(broken);

    let mut cameras = Vec::new();
    while cameras.len() < 5 {
        if let FleetEvent::Still(capture) =
            next_matching(&mut events, |e| matches!(e, FleetEvent::Still(_))).await
        {
            assert_eq!(capture.jpeg.len(), 50_000);
            cameras.push(capture.camera.get());
        }
    }
    cameras.sort_unstable();
    assert_eq!(cameras, vec![2, 3, 4, 5, 6]);
    wait_until(|| receiver.stats().failed == 1).await;

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn stranger_connections_are_refused() {
    let (receiver, mut events, cancel, task) = started_still().await;

    let mut conn = tcp_from(9, receiver.local_addrs()[0]).await;
    let _ = conn.write_all(b"\xff\xd8\xff\xe0").await;
    drop(conn);

    wait_until(|| receiver.stats().unknown_sender == 1).await;
    assert!(drain_now(&mut events).is_empty());

    cancel.cancel();
    task.await.unwrap();
}

// ── Facade ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CountingTransport {
    sends: AtomicU32,
}

impl CountingTransport {
    fn count(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CommandTransport for CountingTransport {
    async fn send(&self, _target: SocketAddr, payload: &[u8]) -> Result<usize, TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(payload.len())
    }
}

#[tokio::test]
async fn mock_mode_keeps_every_command_off_the_network() {
    let mock = Arc::new(CountingTransport::default());
    let real = Arc::new(CountingTransport::default());
    let fleet =
        FleetController::with_transports(loopback_config(), mock.clone(), real.clone()).unwrap();
    fleet.start().await.unwrap();

    fleet.set_mock_mode(true);
    assert_eq!(fleet.capture_all(), 8);
    assert!(fleet.drain(WAIT).await);
    assert_eq!(mock.count(), 8);
    assert_eq!(real.count(), 0);

    fleet.set_mock_mode(false);
    fleet.capture(cam(3));
    assert!(fleet.drain(WAIT).await);
    assert_eq!(real.count(), 1);
    assert_eq!(mock.count(), 8);

    fleet.shutdown().await;
}

#[tokio::test]
async fn mock_mode_applies_to_receivers_at_the_same_time() {
    let mock = Arc::new(CountingTransport::default());
    let real = Arc::new(CountingTransport::default());
    let fleet = FleetController::with_transports(loopback_config(), mock, real).unwrap();
    let mut frames = fleet.subscribe_frames();
    fleet.start().await.unwrap();
    wait_until(|| fleet.video_addrs().len() == 2).await;

    fleet.set_mock_mode(true);
    let sender = udp_from(4).await;
    sender.send_to(b"\xff\xd8", fleet.video_addrs()[0]).await.unwrap();
    wait_until(|| fleet.video_stats().discarded == 1).await;

    assert!(drain_now(&mut frames).is_empty());
    wait_until(|| fleet.online_cameras().len() == 8).await;

    fleet.shutdown().await;
    assert_eq!(fleet.stats().commands_sent, 0);
}

#[tokio::test]
async fn captured_still_arrives_through_the_facade() {
    let quiet = Arc::new(CountingTransport::default());
    let fleet = FleetController::with_transports(loopback_config(), quiet.clone(), quiet).unwrap();
    let mut events = fleet.subscribe();
    fleet.start().await.unwrap();
    wait_until(|| fleet.still_addrs().len() == 2).await;

    fleet.capture(cam(8));
    let mut conn = tcp_from(8, fleet.still_addrs()[1]).await;
    conn.write_all(&raw_frame(10, 20)).await.unwrap();
    conn.shutdown().await.unwrap();

    let FleetEvent::Still(capture) =
        next_matching(&mut events, |e| matches!(e, FleetEvent::Still(_))).await
    else {
        unreachable!()
    };
    assert!(capture.is_raw());
    assert_eq!(capture.camera, CameraId::LOCAL);
    assert_eq!(capture.total_bytes(), 30);

    fleet.shutdown().await;
}

#[derive(Debug, Default)]
struct UnreachableTransport {
    attempts: AtomicU32,
}

#[async_trait::async_trait]
impl CommandTransport for UnreachableTransport {
    async fn send(&self, _target: SocketAddr, _payload: &[u8]) -> Result<usize, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "no route to camera",
        )))
    }
}

#[tokio::test]
async fn system_commands_are_attempted_twice_then_fail_once() {
    let mock = Arc::new(CountingTransport::default());
    let real = Arc::new(UnreachableTransport::default());
    let fleet =
        FleetController::with_transports(loopback_config(), mock.clone(), real.clone()).unwrap();
    let mut events = fleet.subscribe();
    fleet.start().await.unwrap();

    fleet.shutdown_camera(cam(2));
    fleet.reboot_camera(cam(3));
    fleet.factory_reset(cam(4));
    assert!(fleet.drain(WAIT).await);
    fleet.shutdown().await;

    let mut failed: Vec<(u8, u32)> = drain_now(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            FleetEvent::CommandFailed {
                camera, attempts, ..
            } => Some((camera.get(), attempts)),
            _ => None,
        })
        .collect();
    failed.sort_unstable();

    assert_eq!(failed, vec![(2, 2), (3, 2), (4, 2)]);
    assert_eq!(real.attempts.load(Ordering::SeqCst), 6);
    assert_eq!(mock.count(), 0);
    assert_eq!(fleet.stats().commands_failed, 3);
}
