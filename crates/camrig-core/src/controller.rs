// ── Fleet controller ──
//
// The facade over the whole subsystem. Owns the address book, the
// transport mode and the event sink, wires them into the dispatcher and
// the three receivers, and runs the four loops for its lifetime.
// Outbound calls only enqueue; results come back as `FleetEvent`s.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::address_book::{AddressBook, CameraId};
use crate::command::{
    CameraSettings, Command, CropRegion, FieldSetting, Instruction, SettingField, SettingValue,
    SettingsMap,
};
use crate::config::{FleetConfig, TransportMode};
use crate::dispatcher::{CommandDispatcher, DispatchStats};
use crate::error::CoreError;
use crate::event::{EventSink, FleetEvent, VideoFrame};
use crate::heartbeat::HeartbeatMonitor;
use crate::still::{StillImageReceiver, StillStats};
use crate::stream::{LivenessMap, StatusStream};
use crate::transport::CommandTransport;
use crate::video::{VideoFrameReceiver, VideoStats};

/// The main entry point for consumers.
///
/// Cheaply cloneable. Every component shares the one mode channel owned
/// here, so a mode switch is seen by all of them at the same instant.
#[derive(Debug, Clone)]
pub struct FleetController {
    inner: Arc<FleetInner>,
}

#[derive(Debug)]
struct FleetInner {
    config: FleetConfig,
    book: Arc<AddressBook>,
    mode: watch::Sender<TransportMode>,
    events: EventSink,
    dispatcher: CommandDispatcher,
    heartbeat: HeartbeatMonitor,
    video: VideoFrameReceiver,
    still: StillImageReceiver,
    cancel: CancellationToken,
    started: AtomicBool,
    task_handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl FleetController {
    /// Build the fleet with the standard mock and UDP transports.
    /// Nothing is bound or spawned until [`start()`](Self::start).
    pub fn new(config: FleetConfig) -> Result<Self, CoreError> {
        let (mode, _) = watch::channel(config.mode);
        let events = EventSink::new();
        let dispatcher = CommandDispatcher::new(mode.subscribe(), events.clone(), &config.timing);
        Self::assemble(config, mode, events, dispatcher)
    }

    /// Build the fleet with caller-supplied command transports.
    pub fn with_transports(
        config: FleetConfig,
        mock: Arc<dyn CommandTransport>,
        real: Arc<dyn CommandTransport>,
    ) -> Result<Self, CoreError> {
        let (mode, _) = watch::channel(config.mode);
        let events = EventSink::new();
        let dispatcher = CommandDispatcher::with_transports(
            mode.subscribe(),
            events.clone(),
            config.timing.dispatch_idle,
            mock,
            real,
        );
        Self::assemble(config, mode, events, dispatcher)
    }

    fn assemble(
        config: FleetConfig,
        mode: watch::Sender<TransportMode>,
        events: EventSink,
        dispatcher: CommandDispatcher,
    ) -> Result<Self, CoreError> {
        let book = Arc::new(AddressBook::new(&config)?);
        let bind = config.bind_address;
        let local = std::net::IpAddr::V4(config.local_address);
        let remote_ports = book.remote_ports();
        let local_ports = book.local_ports();

        let heartbeat = HeartbeatMonitor::new(
            Arc::clone(&book),
            mode.subscribe(),
            events.clone(),
            SocketAddr::new(bind, remote_ports.heartbeat),
            config.timing.clone(),
        );
        let video = VideoFrameReceiver::new(
            Arc::clone(&book),
            mode.subscribe(),
            events.clone(),
            SocketAddr::new(bind, remote_ports.video),
            SocketAddr::new(local, local_ports.video),
            config.video_recv_buffer,
        );
        let still = StillImageReceiver::new(
            Arc::clone(&book),
            events.clone(),
            SocketAddr::new(bind, remote_ports.still),
            SocketAddr::new(local, local_ports.still),
            config.timing.still_read_timeout,
        );

        Ok(Self {
            inner: Arc::new(FleetInner {
                config,
                book,
                mode,
                events,
                dispatcher,
                heartbeat,
                video,
                still,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &FleetConfig {
        &self.inner.config
    }

    pub fn address_book(&self) -> &Arc<AddressBook> {
        &self.inner.book
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the dispatch, heartbeat, video and still loops.
    ///
    /// Listener bind failures do not fail the call: the affected
    /// channel logs and stays down while the rest keeps running.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyStarted);
        }

        let cancel = &self.inner.cancel;
        let mut handles = self.inner.task_handles.lock().await;
        handles.push((
            "dispatcher",
            tokio::spawn(self.inner.dispatcher.clone().run(cancel.child_token())),
        ));
        handles.push((
            "heartbeat",
            tokio::spawn(self.inner.heartbeat.clone().run(cancel.child_token())),
        ));
        handles.push((
            "video",
            tokio::spawn(self.inner.video.clone().run(cancel.child_token())),
        ));
        handles.push((
            "still",
            tokio::spawn(self.inner.still.clone().run(cancel.child_token())),
        ));

        info!(mode = %self.mode(), cameras = self.inner.book.cameras().len(), "fleet started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && !self.inner.cancel.is_cancelled()
    }

    /// Stop every loop. Each gets the configured grace period to wind
    /// down before it is aborted. Queued commands are abandoned.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<_> = self.inner.task_handles.lock().await.drain(..).collect();
        let grace = self.inner.config.timing.shutdown_grace;

        for (name, mut handle) in handles {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => debug!(task = name, "loop stopped"),
                Ok(Err(e)) => warn!(task = name, error = %e, "loop ended abnormally"),
                Err(_) => {
                    warn!(task = name, grace_ms = grace.as_millis(), "loop did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        let stats = self.stats();
        let video = self.video_stats();
        let still = self.still_stats();
        info!(
            commands_sent = stats.commands_sent,
            commands_failed = stats.commands_failed,
            retries = stats.retries,
            bytes_sent = stats.bytes_sent,
            frames = video.frames,
            stills = still.completed,
            still_failures = still.failed,
            "fleet stopped"
        );
    }

    /// Wait until the dispatcher has nothing queued or in flight.
    /// Returns `false` if `limit` elapsed first.
    pub async fn drain(&self, limit: Duration) -> bool {
        let poll = self.inner.config.timing.dispatch_idle.max(Duration::from_millis(1));
        tokio::time::timeout(limit, async {
            while !self.inner.dispatcher.is_idle() {
                tokio::time::sleep(poll).await;
            }
        })
        .await
        .is_ok()
    }

    // ── Mode ─────────────────────────────────────────────────────

    pub fn mode(&self) -> TransportMode {
        *self.inner.mode.borrow()
    }

    /// Switch every component between simulation and the network.
    pub fn set_mode(&self, mode: TransportMode) {
        let previous = self.inner.mode.send_replace(mode);
        if previous != mode {
            info!(from = %previous, to = %mode, "transport mode changed");
            self.inner.events.emit(FleetEvent::ModeChanged { mode });
        }
    }

    pub fn set_mock_mode(&self, mock: bool) {
        self.set_mode(if mock {
            TransportMode::Mock
        } else {
            TransportMode::Real
        });
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.inner.events.subscribe()
    }

    /// Video frames as they arrive. A subscriber that falls behind loses
    /// frames only; [`subscribe`](Self::subscribe) is unaffected.
    pub fn subscribe_frames(&self) -> broadcast::Receiver<Arc<VideoFrame>> {
        self.inner.events.subscribe_frames()
    }

    /// Watch-backed liveness map, updated on every online/offline edge.
    pub fn statuses(&self) -> StatusStream {
        self.inner.heartbeat.subscribe()
    }

    pub fn camera_status(&self, camera: CameraId) -> bool {
        self.inner.heartbeat.status(camera)
    }

    pub fn all_statuses(&self) -> LivenessMap {
        self.inner.heartbeat.all_statuses()
    }

    pub fn online_cameras(&self) -> Vec<CameraId> {
        self.inner.heartbeat.online_cameras()
    }

    pub fn stats(&self) -> DispatchStats {
        self.inner.dispatcher.stats()
    }

    pub fn video_stats(&self) -> VideoStats {
        self.inner.video.stats()
    }

    pub fn still_stats(&self) -> StillStats {
        self.inner.still.stats()
    }

    /// Bound receiver addresses, useful when ports were configured as 0.
    pub fn heartbeat_addr(&self) -> Option<SocketAddr> {
        self.inner.heartbeat.local_addr()
    }

    pub fn video_addrs(&self) -> Vec<SocketAddr> {
        self.inner.video.local_addrs()
    }

    pub fn still_addrs(&self) -> Vec<SocketAddr> {
        self.inner.still.local_addrs()
    }

    // ── Queue ────────────────────────────────────────────────────

    pub fn queue_len(&self) -> usize {
        self.inner.dispatcher.queue_len()
    }

    pub fn clear_queue(&self) -> usize {
        self.inner.dispatcher.clear()
    }

    /// Queue one instruction with the retry bound its class calls for.
    /// Returns the dispatch position.
    pub fn submit(&self, camera: CameraId, instruction: Instruction) -> usize {
        let retries = if instruction.is_destructive() {
            self.inner.config.critical_max_retries
        } else {
            self.inner.config.max_retries
        };
        let command = Command::new(&self.inner.book, camera, instruction).with_max_retries(retries);
        self.inner.dispatcher.enqueue(command)
    }

    fn submit_each(
        &self,
        cameras: impl IntoIterator<Item = CameraId>,
        instruction: &Instruction,
    ) -> usize {
        let mut queued = 0;
        for camera in cameras {
            self.submit(camera, instruction.clone());
            queued += 1;
        }
        queued
    }

    fn all_cameras(&self) -> Vec<CameraId> {
        self.inner.book.cameras().iter().map(|e| e.id).collect()
    }

    fn remote_cameras(&self) -> Vec<CameraId> {
        self.inner.book.remote_cameras().map(|e| e.id).collect()
    }

    // ── Capture and streaming ────────────────────────────────────

    pub fn capture(&self, camera: CameraId) -> usize {
        self.submit(camera, Instruction::CaptureStill)
    }

    /// Trigger every configured camera. Returns how many were queued.
    pub fn capture_all(&self) -> usize {
        self.submit_each(self.all_cameras(), &Instruction::CaptureStill)
    }

    pub fn start_stream(&self, camera: CameraId) -> usize {
        self.submit(camera, Instruction::StartStream)
    }

    pub fn stop_stream(&self, camera: CameraId) -> usize {
        self.submit(camera, Instruction::StopStream)
    }

    pub fn restart_stream_with_settings(&self, camera: CameraId) -> usize {
        self.submit(camera, Instruction::RestartStreamWithSettings)
    }

    pub fn start_all_streams(&self) -> usize {
        self.submit_each(self.all_cameras(), &Instruction::StartStream)
    }

    pub fn stop_all_streams(&self) -> usize {
        self.submit_each(self.all_cameras(), &Instruction::StopStream)
    }

    pub fn restart_all_streams(&self) -> usize {
        self.submit_each(self.all_cameras(), &Instruction::RestartStreamWithSettings)
    }

    // ── Settings ─────────────────────────────────────────────────

    /// Send the whole map as one command so a camera never ends up
    /// with half of it applied.
    pub fn apply_settings(&self, camera: CameraId, mut settings: SettingsMap) -> usize {
        let wants_raw = settings
            .get("raw_enabled")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if wants_raw && !self.inner.book.raw_capable(camera) {
            warn!(%camera, "camera is not RAW-capable, sending raw_enabled=false");
            settings.insert("raw_enabled".into(), false.into());
        }
        self.submit(camera, Instruction::ApplySettings(settings))
    }

    pub fn apply_camera_settings(
        &self,
        camera: CameraId,
        settings: &CameraSettings,
    ) -> Result<usize, CoreError> {
        Ok(self.apply_settings(camera, settings.to_map()?))
    }

    /// A resolution change only takes effect after the stream restarts,
    /// so the settings command is followed by a restart.
    pub fn set_resolution(&self, camera: CameraId, width: u32, height: u32) -> Result<(), CoreError> {
        if width == 0 || height == 0 {
            return Err(CoreError::ValidationFailed {
                message: format!("resolution {width}x{height} must be non-zero"),
            });
        }
        let mut settings = SettingsMap::new();
        settings.insert("resolution".into(), format!("{width}x{height}").into());
        self.submit(camera, Instruction::ApplySettings(settings));
        self.restart_stream_with_settings(camera);
        Ok(())
    }

    pub fn set_crop(&self, camera: CameraId, region: CropRegion) -> usize {
        self.apply_settings(camera, region.clamped().to_settings())
    }

    /// Record the RAW flag and push it to the camera.
    pub fn set_raw_enabled(&self, camera: CameraId, enabled: bool) -> Result<usize, CoreError> {
        self.inner.book.set_raw_enabled(camera, enabled)?;
        let mut settings = SettingsMap::new();
        settings.insert("raw_enabled".into(), enabled.into());
        Ok(self.submit(camera, Instruction::ApplySettings(settings)))
    }

    /// Send one field. Values are clamped to the field's range first.
    pub fn set_field(&self, camera: CameraId, setting: FieldSetting) -> usize {
        self.submit(camera, Instruction::SetField(setting))
    }

    fn set_value(
        &self,
        camera: CameraId,
        field: SettingField,
        value: SettingValue,
    ) -> Result<usize, CoreError> {
        Ok(self.set_field(camera, FieldSetting::new(field, value)?))
    }

    pub fn set_brightness(&self, camera: CameraId, value: i64) -> Result<usize, CoreError> {
        self.set_value(camera, SettingField::Brightness, SettingValue::Int(value))
    }

    pub fn set_contrast(&self, camera: CameraId, value: i64) -> Result<usize, CoreError> {
        self.set_value(camera, SettingField::Contrast, SettingValue::Int(value))
    }

    pub fn set_saturation(&self, camera: CameraId, value: i64) -> Result<usize, CoreError> {
        self.set_value(camera, SettingField::Saturation, SettingValue::Int(value))
    }

    pub fn set_iso(&self, camera: CameraId, value: i64) -> Result<usize, CoreError> {
        self.set_value(camera, SettingField::Iso, SettingValue::Int(value))
    }

    pub fn set_quality(&self, camera: CameraId, value: i64) -> Result<usize, CoreError> {
        self.set_value(camera, SettingField::Quality, SettingValue::Int(value))
    }

    pub fn set_flip_horizontal(&self, camera: CameraId, on: bool) -> Result<usize, CoreError> {
        self.set_value(camera, SettingField::FlipHorizontal, SettingValue::Flag(on))
    }

    pub fn set_flip_vertical(&self, camera: CameraId, on: bool) -> Result<usize, CoreError> {
        self.set_value(camera, SettingField::FlipVertical, SettingValue::Flag(on))
    }

    /// Anything but 0, 90, 180 or 270 is sent as 0.
    pub fn set_rotation(&self, camera: CameraId, degrees: i64) -> Result<usize, CoreError> {
        self.set_value(camera, SettingField::Rotation, SettingValue::Int(degrees))
    }

    pub fn set_grayscale(&self, camera: CameraId, on: bool) -> Result<usize, CoreError> {
        self.set_value(camera, SettingField::Grayscale, SettingValue::Flag(on))
    }

    // ── System ───────────────────────────────────────────────────

    pub fn shutdown_camera(&self, camera: CameraId) -> usize {
        self.submit(camera, Instruction::Shutdown)
    }

    pub fn reboot_camera(&self, camera: CameraId) -> usize {
        self.submit(camera, Instruction::Reboot)
    }

    pub fn factory_reset(&self, camera: CameraId) -> usize {
        self.submit(camera, Instruction::FactoryReset)
    }

    /// Remote cameras only; the local camera runs on the controller host.
    pub fn shutdown_all(&self) -> usize {
        self.submit_each(self.remote_cameras(), &Instruction::Shutdown)
    }

    /// Remote cameras only.
    pub fn reboot_all(&self) -> usize {
        self.submit_each(self.remote_cameras(), &Instruction::Reboot)
    }
}

// ── Tests ────────────────────────────────────────────────────────
