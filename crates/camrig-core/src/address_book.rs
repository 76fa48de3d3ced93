// ── Address book ──
//
// Bidirectional mapping between camera identities and network
// addresses, plus the per-camera port blocks. Built once from a
// `FleetConfig` and shared read-only; the RAW-enabled flags are the
// only runtime-mutable state.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, warn};

use crate::config::FleetConfig;
use crate::error::CoreError;

// ── CameraId ─────────────────────────────────────────────────────

/// Logical camera identity, always in `1..=8`.
///
/// Cameras 1 through 7 are remote devices; camera 8 is the local
/// device running on the controller host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct CameraId(u8);

impl CameraId {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 8;

    /// The loopback camera.
    pub const LOCAL: Self = Self(Self::MAX);

    pub fn new(value: u8) -> Result<Self, CoreError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::InvalidCameraId {
                value: u16::from(value),
            })
        }
    }

    /// For ids known in range at compile time.
    pub(crate) const fn known(value: u8) -> Self {
        assert!(value >= Self::MIN && value <= Self::MAX);
        Self(value)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    pub const fn is_local(self) -> bool {
        self.0 == Self::MAX
    }

    /// Every camera id in ascending order.
    pub fn all() -> impl Iterator<Item = Self> {
        (Self::MIN..=Self::MAX).map(Self)
    }

    /// Cameras 1..=7.
    pub fn remote() -> impl Iterator<Item = Self> {
        (Self::MIN..Self::MAX).map(Self)
    }

    fn index(self) -> usize {
        usize::from(self.0 - Self::MIN)
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rep{}", self.0)
    }
}

impl TryFrom<u8> for CameraId {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CameraId> for u8 {
    fn from(id: CameraId) -> Self {
        id.0
    }
}

/// Accepts either a bare number (`"3"`) or a device name (`"rep3"`).
impl FromStr for CameraId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches("rep");
        let value: u16 = digits.parse().map_err(|_| CoreError::ValidationFailed {
            message: format!("'{s}' is not a camera id"),
        })?;
        u8::try_from(value)
            .map_err(|_| CoreError::InvalidCameraId { value })
            .and_then(Self::new)
    }
}

// ── Ports ────────────────────────────────────────────────────────

/// The five logical channels each camera exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PortKind {
    Control,
    Video,
    VideoControl,
    Still,
    Heartbeat,
}

/// One block of port numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSet {
    pub control: u16,
    pub video: u16,
    pub video_control: u16,
    pub still: u16,
    pub heartbeat: u16,
}

impl PortSet {
    /// Port block used by cameras 1..=7.
    pub const REMOTE: Self = Self {
        control: 5001,
        video: 5002,
        video_control: 5004,
        still: 6000,
        heartbeat: 5003,
    };

    /// Port block used by the local camera, offset so a controller that
    /// colocates a camera service does not collide with the remote block.
    pub const LOCAL: Self = Self {
        control: 5011,
        video: 5012,
        video_control: 5011,
        still: 6010,
        heartbeat: 5013,
    };

    pub const fn port(self, kind: PortKind) -> u16 {
        match kind {
            PortKind::Control => self.control,
            PortKind::Video => self.video,
            PortKind::VideoControl => self.video_control,
            PortKind::Still => self.still,
            PortKind::Heartbeat => self.heartbeat,
        }
    }
}

// ── CameraEntry ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraEntry {
    pub id: CameraId,
    pub address: IpAddr,
    pub local: bool,
    pub raw_capable: bool,
}

// ── AddressBook ──────────────────────────────────────────────────

#[derive(Debug)]
pub struct AddressBook {
    entries: Vec<CameraEntry>,
    inbound: HashMap<IpAddr, CameraId>,
    local_address: IpAddr,
    controller_alias: Option<IpAddr>,
    remote_ports: PortSet,
    local_ports: PortSet,
    fallback: CameraId,
    raw_enabled: DashMap<CameraId, bool>,
}

impl AddressBook {
    /// Build the book from configuration, checking that every camera
    /// has its own address and that the controller alias does not
    /// shadow a camera.
    pub fn new(config: &FleetConfig) -> Result<Self, CoreError> {
        let base = config.base_network.octets();
        let mut entries = Vec::with_capacity(usize::from(CameraId::MAX));
        let mut inbound = HashMap::new();

        for id in CameraId::all() {
            let address = if id.is_local() {
                IpAddr::V4(config.local_address)
            } else {
                let host = config.host_offset.checked_add(id.get()).ok_or_else(|| {
                    CoreError::Config {
                        message: format!(
                            "host offset {} leaves no room for camera {}",
                            config.host_offset,
                            id.get()
                        ),
                    }
                })?;
                IpAddr::V4(Ipv4Addr::new(base[0], base[1], base[2], host))
            };

            if let Some(existing) = inbound.insert(address, id) {
                return Err(CoreError::Config {
                    message: format!("{existing} and {id} share address {address}"),
                });
            }

            entries.push(CameraEntry {
                id,
                address,
                local: id.is_local(),
                raw_capable: config.raw_capable.contains(&id),
            });
        }

        let controller_alias = config.controller_alias.map(IpAddr::V4);
        if let Some(alias) = controller_alias {
            if let Some(owner) = inbound.get(&alias) {
                return Err(CoreError::Config {
                    message: format!("controller alias {alias} is already the address of {owner}"),
                });
            }
            inbound.insert(alias, CameraId::LOCAL);
        }

        let raw_enabled = entries
            .iter()
            .filter(|e| e.raw_capable)
            .map(|e| (e.id, false))
            .collect();

        Ok(Self {
            entries,
            inbound,
            local_address: IpAddr::V4(config.local_address),
            controller_alias,
            remote_ports: config.remote_ports,
            local_ports: config.local_ports,
            fallback: config.fallback_camera,
            raw_enabled,
        })
    }

    // ── Lookups ──────────────────────────────────────────────────

    /// Port block for an address: the local block for the local camera,
    /// loopback and the controller alias, the remote block otherwise.
    pub fn ports_for(&self, address: IpAddr) -> PortSet {
        if self.is_local(address) {
            self.local_ports
        } else {
            self.remote_ports
        }
    }

    /// Camera identity for an address, falling back to the configured
    /// default (and logging) when the address is unknown.
    ///
    /// Receivers must use [`resolve`](Self::resolve) instead so unknown
    /// senders are dropped rather than attributed to the fallback.
    pub fn camera_id_for(&self, address: IpAddr) -> CameraId {
        self.resolve(address).unwrap_or_else(|| {
            warn!(%address, fallback = %self.fallback, "unknown camera address, using fallback id");
            self.fallback
        })
    }

    /// Strict inbound lookup. Honors the controller alias for the local
    /// camera and never guesses.
    pub fn resolve(&self, address: IpAddr) -> Option<CameraId> {
        let address = address.to_canonical();
        let id = self.inbound.get(&address).copied();
        if id.is_none() {
            debug!(%address, "address does not belong to any camera");
        }
        id
    }

    pub fn address_for(&self, id: CameraId) -> IpAddr {
        self.entry(id).address
    }

    pub fn is_local(&self, address: IpAddr) -> bool {
        let address = address.to_canonical();
        address == self.local_address
            || address.is_loopback()
            || self.controller_alias == Some(address)
    }

    /// Destination for a given channel of a camera.
    pub fn socket_addr(&self, id: CameraId, kind: PortKind) -> SocketAddr {
        let address = self.address_for(id);
        SocketAddr::new(address, self.ports_for(address).port(kind))
    }

    pub fn entry(&self, id: CameraId) -> &CameraEntry {
        &self.entries[id.index()]
    }

    pub fn cameras(&self) -> &[CameraEntry] {
        &self.entries
    }

    pub fn remote_cameras(&self) -> impl Iterator<Item = &CameraEntry> {
        self.entries.iter().filter(|e| !e.local)
    }

    pub fn controller_alias(&self) -> Option<IpAddr> {
        self.controller_alias
    }

    pub fn fallback_camera(&self) -> CameraId {
        self.fallback
    }

    pub fn remote_ports(&self) -> PortSet {
        self.remote_ports
    }

    pub fn local_ports(&self) -> PortSet {
        self.local_ports
    }

    // ── RAW capture flags ────────────────────────────────────────

    pub fn raw_capable(&self, id: CameraId) -> bool {
        self.entry(id).raw_capable
    }

    pub fn raw_capable_cameras(&self) -> Vec<CameraId> {
        self.entries
            .iter()
            .filter(|e| e.raw_capable)
            .map(|e| e.id)
            .collect()
    }

    pub fn raw_enabled(&self, id: CameraId) -> bool {
        self.raw_enabled.get(&id).is_some_and(|flag| *flag)
    }

    /// Toggle RAW capture for a camera. Fails for cameras whose sensor
    /// cannot produce DNG output.
    pub fn set_raw_enabled(&self, id: CameraId, enabled: bool) -> Result<(), CoreError> {
        if !self.raw_capable(id) {
            return Err(CoreError::RawNotSupported { camera: id });
        }
        self.raw_enabled.insert(id, enabled);
        debug!(camera = %id, enabled, "RAW capture flag updated");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn book() -> AddressBook {
        AddressBook::new(&FleetConfig::default()).unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn remote_ids_round_trip() {
        let book = book();
        for id in CameraId::remote() {
            let address = book.address_for(id);
            assert_eq!(address, ip(&format!("192.168.0.{}", 200 + id.get())));
            assert_eq!(book.camera_id_for(address), id);
        }
    }

    #[test]
    fn local_camera_round_trips_via_loopback() {
        let book = book();
        assert_eq!(book.address_for(CameraId::LOCAL), ip("127.0.0.1"));
        assert_eq!(book.camera_id_for(ip("127.0.0.1")), CameraId::LOCAL);
    }

    #[test]
    fn unknown_address_falls_back_but_never_resolves() {
        let book = book();
        let stranger = ip("10.1.2.3");
        assert_eq!(book.camera_id_for(stranger), book.fallback_camera());
        assert_eq!(book.resolve(stranger), None);
        // A neighbour of the fleet range is still unknown.
        assert_eq!(book.resolve(ip("192.168.0.208")), None);
    }

    #[test]
    fn controller_alias_maps_to_local_camera_inbound_only() {
        let book = book();
        assert_eq!(book.resolve(ip("192.168.0.200")), Some(CameraId::LOCAL));
        assert_eq!(book.address_for(CameraId::LOCAL), ip("127.0.0.1"));
        assert!(book.is_local(ip("192.168.0.200")));
    }

    #[test]
    fn mapped_ipv6_sender_is_canonicalised() {
        let book = book();
        let mapped = IpAddr::V6(Ipv4Addr::new(192, 168, 0, 203).to_ipv6_mapped());
        assert_eq!(book.resolve(mapped), Some(CameraId::new(3).unwrap()));
    }

    #[test]
    fn ports_follow_locality() {
        let book = book();
        assert_eq!(book.ports_for(ip("127.0.0.1")), PortSet::LOCAL);
        assert_eq!(book.ports_for(ip("192.168.0.205")), PortSet::REMOTE);
        assert_eq!(
            book.socket_addr(CameraId::LOCAL, PortKind::VideoControl),
            "127.0.0.1:5011".parse().unwrap()
        );
        assert_eq!(
            book.socket_addr(CameraId::new(1).unwrap(), PortKind::Still),
            "192.168.0.201:6000".parse().unwrap()
        );
    }

    #[test]
    fn local_camera_on_a_lan_address_keeps_the_local_ports() {
        let config = FleetConfig {
            local_address: Ipv4Addr::new(192, 168, 0, 50),
            ..FleetConfig::default()
        };
        let book = AddressBook::new(&config).unwrap();
        assert!(book.is_local(ip("192.168.0.50")));
        assert_eq!(book.ports_for(ip("192.168.0.50")), PortSet::LOCAL);
        assert_eq!(
            book.socket_addr(CameraId::LOCAL, PortKind::Control),
            SocketAddr::new(ip("192.168.0.50"), PortSet::LOCAL.control)
        );
        assert!(!book.is_local(ip("192.168.0.201")));
    }

    #[test]
    fn duplicate_addresses_are_rejected() {
        let config = FleetConfig {
            local_address: Ipv4Addr::new(192, 168, 0, 203),
            ..FleetConfig::default()
        };
        assert!(matches!(
            AddressBook::new(&config),
            Err(CoreError::Config { .. })
        ));
    }

    #[test]
    fn alias_may_not_shadow_a_camera() {
        let config = FleetConfig {
            controller_alias: Some(Ipv4Addr::new(192, 168, 0, 201)),
            ..FleetConfig::default()
        };
        assert!(AddressBook::new(&config).is_err());
    }

    #[test]
    fn raw_flag_only_for_capable_cameras() {
        let book = book();
        let two = CameraId::new(2).unwrap();
        let three = CameraId::new(3).unwrap();

        assert_eq!(book.raw_capable_cameras(), vec![two, CameraId::LOCAL]);
        assert!(!book.raw_enabled(two));
        book.set_raw_enabled(two, true).unwrap();
        assert!(book.raw_enabled(two));

        assert!(matches!(
            book.set_raw_enabled(three, true),
            Err(CoreError::RawNotSupported { .. })
        ));
        assert!(!book.raw_enabled(three));
    }

    #[test]
    fn camera_id_parsing() {
        assert_eq!("3".parse::<CameraId>().unwrap().get(), 3);
        assert_eq!("rep8".parse::<CameraId>().unwrap(), CameraId::LOCAL);
        assert!("0".parse::<CameraId>().is_err());
        assert!("9".parse::<CameraId>().is_err());
        assert!("300".parse::<CameraId>().is_err());
        assert!("cam".parse::<CameraId>().is_err());
    }
}
