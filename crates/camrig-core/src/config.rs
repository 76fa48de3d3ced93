// ── Fleet configuration ──
//
// Everything the core needs to address the fleet and pace its loops.
// Constructed by the caller (usually from `camrig-config`) and injected
// into every component; there is no ambient global lookup.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::address_book::{CameraId, PortSet};

/// Whether commands and inbound media use the network or a simulation.
///
/// Owned by the fleet controller and shared with every component
/// through a single `watch` channel, so all of them observe the same
/// value at any instant.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TransportMode {
    Mock,
    #[default]
    Real,
}

impl TransportMode {
    pub const fn is_mock(self) -> bool {
        matches!(self, Self::Mock)
    }
}

/// Loop pacing and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetTiming {
    /// Silence after which an online camera is demoted.
    pub heartbeat_timeout: Duration,
    /// Receive timeout of the heartbeat loop, bounding stop latency.
    pub heartbeat_poll: Duration,
    /// Delay before the simulated fleet comes online in mock mode.
    pub mock_startup_delay: Duration,
    pub mock_refresh: Duration,
    /// Sleep of the dispatch loop when the queue is empty.
    pub dispatch_idle: Duration,
    pub send_timeout: Duration,
    pub mock_send_delay: Duration,
    /// Longest a still connection may sit without delivering bytes.
    pub still_read_timeout: Duration,
    /// How long shutdown waits for each loop before aborting it.
    pub shutdown_grace: Duration,
}

impl Default for FleetTiming {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(5),
            heartbeat_poll: Duration::from_secs(1),
            mock_startup_delay: Duration::from_millis(500),
            mock_refresh: Duration::from_secs(1),
            dispatch_idle: Duration::from_millis(10),
            send_timeout: Duration::from_secs(2),
            mock_send_delay: Duration::from_millis(10),
            still_read_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// Configuration for one camera fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Network whose first three octets prefix every remote camera.
    pub base_network: Ipv4Addr,
    /// Remote camera `n` lives at host `host_offset + n`.
    pub host_offset: u8,
    /// Address of the local camera (camera 8).
    pub local_address: Ipv4Addr,
    /// The controller's LAN-facing address. Inbound traffic from it is
    /// attributed to the local camera.
    pub controller_alias: Option<Ipv4Addr>,
    /// Identity reported by `camera_id_for` for unknown addresses.
    pub fallback_camera: CameraId,
    pub remote_ports: PortSet,
    pub local_ports: PortSet,
    /// Cameras able to deliver DNG alongside JPEG.
    pub raw_capable: Vec<CameraId>,
    /// Interface the receivers listen on.
    pub bind_address: IpAddr,
    pub max_retries: u32,
    /// Retry bound for shutdown, reboot and factory reset.
    pub critical_max_retries: u32,
    /// Requested SO_RCVBUF for the video sockets.
    pub video_recv_buffer: usize,
    pub mode: TransportMode,
    pub timing: FleetTiming,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            base_network: Ipv4Addr::new(192, 168, 0, 0),
            host_offset: 200,
            local_address: Ipv4Addr::LOCALHOST,
            controller_alias: Some(Ipv4Addr::new(192, 168, 0, 200)),
            fallback_camera: CameraId::LOCAL,
            remote_ports: PortSet::REMOTE,
            local_ports: PortSet::LOCAL,
            raw_capable: vec![CameraId::known(2), CameraId::LOCAL],
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_retries: crate::command::DEFAULT_MAX_RETRIES,
            critical_max_retries: crate::command::CRITICAL_MAX_RETRIES,
            video_recv_buffer: 4 * 1024 * 1024,
            mode: TransportMode::Real,
            timing: FleetTiming::default(),
        }
    }
}
