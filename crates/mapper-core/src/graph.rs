//! Graph library boundary.
//!
//! The signal graph (devices, signals and maps) is owned by an external
//! library that keeps it consistent across a network of peers. This module
//! describes the live objects that library exposes and the [`Graph`] trait the
//! mirror reads and mutates it through:
//! - Read side: entity tables, per-device signal lists, per-signal map lists
//! - Write side: map creation/release, staged property writes, push
//! - Poll: the single suspension point where change notifications are delivered
//!
//! All methods are synchronous. The graph is expected to live on one thread
//! and to be polled periodically from it.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::bus::ChangeBus;
use crate::props::PropValue;

/// Raw property bag for library-specific properties not modeled explicitly.
pub type Properties = std::collections::BTreeMap<String, Value>;

/// Opaque device identifier assigned by the graph library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

/// Opaque signal identifier assigned by the graph library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(pub u64);

/// Opaque map identifier assigned by the graph library.
///
/// Map ids use the full 64-bit range, so they are transmitted as strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MapId(pub u64);

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

/// Scalar type of a signal, transmitted as a single-letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    #[serde(rename = "i")]
    Int32,
    #[serde(rename = "f")]
    Float32,
    #[serde(rename = "d")]
    Float64,
}

/// End of a map: the source side or the destination side.
///
/// Used both for a map's processing location and to address its slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    #[serde(rename = "src")]
    Source,
    #[serde(rename = "dst")]
    Destination,
}

impl Location {
    /// Parse a `src`/`dst` token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "src" => Some(Location::Source),
            "dst" => Some(Location::Destination),
            _ => None,
        }
    }

    /// Prefix used for mirrored slot properties (`src_min`, `dst_max`, ...).
    pub fn prefix(&self) -> &'static str {
        match self {
            Location::Source => "src",
            Location::Destination => "dst",
        }
    }
}

/// Map transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "TCP")]
    Tcp,
}

impl Protocol {
    /// Parse one of the recognized protocol tokens (`udp`, `UDP`, `tcp`, `TCP`).
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "udp" | "UDP" => Some(Protocol::Udp),
            "tcp" | "TCP" => Some(Protocol::Tcp),
            _ => None,
        }
    }
}

/// Network timestamp: NTP-era seconds plus a 2^-32 fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timetag {
    pub sec: u32,
    pub frac: u32,
}

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

impl Timetag {
    /// Convert to plain floating-point seconds.
    pub fn as_f64(&self) -> f64 {
        self.sec as f64 + self.frac as f64 / 4_294_967_296.0
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self::from_unix(now.timestamp(), now.timestamp_subsec_nanos())
    }

    /// Convert Unix seconds and nanoseconds.
    pub fn from_unix(secs: i64, nanos: u32) -> Self {
        let frac = (u64::from(nanos) * (1u64 << 32) / 1_000_000_000) as u32;
        // NTP seconds wrap at each era; the truncation is the wire format.
        let sec = (secs + NTP_UNIX_OFFSET).rem_euclid(1 << 32) as u32;
        Self { sec, frac }
    }
}

/// A live device.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub synced: Option<Timetag>,
    pub is_local: bool,
    pub properties: Properties,
}

/// A live signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub id: SignalId,
    /// Owning device (non-owning reference).
    pub device: DeviceId,
    pub name: String,
    pub direction: Direction,
    pub signal_type: SignalType,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub is_local: bool,
    pub properties: Properties,
}

/// One end of a map, carrying per-endpoint bounds and calibration state.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub signal: SignalId,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub calibrating: Option<bool>,
}

impl Slot {
    pub fn new(signal: SignalId) -> Self {
        Self {
            signal,
            min: None,
            max: None,
            calibrating: None,
        }
    }
}

/// A live map: one or more source slots routed to one destination slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    pub id: MapId,
    /// Source slots, in the order the library reports them.
    pub sources: Vec<Slot>,
    pub destination: Slot,
    pub process_loc: Location,
    pub protocol: Option<Protocol>,
    pub expression: Option<String>,
    pub muted: bool,
    pub is_local: bool,
    pub properties: Properties,
}

impl Map {
    /// The slot at the given end. For the source end this is the first source.
    pub fn slot(&self, location: Location) -> &Slot {
        match location {
            Location::Source => self.sources.first().unwrap_or(&self.destination),
            Location::Destination => &self.destination,
        }
    }

    /// Check if a signal takes part in this map on either end.
    pub fn involves(&self, signal: SignalId) -> bool {
        self.destination.signal == signal || self.sources.iter().any(|s| s.signal == signal)
    }
}

/// A typed property write on a map.
#[derive(Debug, Clone, PartialEq)]
pub enum MapProperty {
    /// Set (`Some`) or clear (`None`) the processing expression.
    Expression(Option<String>),
    Muted(bool),
    Protocol(Protocol),
    ProcessLocation(Location),
    SlotMin(Location, Option<Value>),
    SlotMax(Location, Option<Value>),
    SlotCalibrating(Location, bool),
    /// Library-specific property assigned verbatim. `Absent` removes it.
    Extension(String, PropValue),
}

/// Subscription scope for change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionScope {
    AllDevices,
    Device(DeviceId),
}

/// Errors reported by the graph library.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("Failed to create map: {0}")]
    CreationFailed(String),

    #[error("Unknown map {0}")]
    UnknownMap(MapId),

    #[error("Unknown signal {0:?}")]
    UnknownSignal(SignalId),

    #[error("Unknown device {0:?}")]
    UnknownDevice(DeviceId),

    #[error("Interface error: {0}")]
    Interface(String),
}

/// The graph library as seen by the mirror.
///
/// Implementations own the live object table. The mirror never caches what it
/// reads here: every normalization or resolution re-reads current state.
pub trait Graph: Send {
    /// All live devices.
    fn devices(&self) -> Vec<&Device>;

    /// All live signals.
    fn signals(&self) -> Vec<&Signal>;

    /// All live (pushed, not released) maps.
    fn maps(&self) -> Vec<&Map>;

    fn device(&self, id: DeviceId) -> Option<&Device>;

    fn signal(&self, id: SignalId) -> Option<&Signal>;

    fn map(&self, id: MapId) -> Option<&Map>;

    /// Signals owned by a device.
    fn device_signals(&self, id: DeviceId) -> Vec<&Signal>;

    /// Ids of the live maps referencing a signal on either end.
    fn signal_maps(&self, id: SignalId) -> Vec<MapId>;

    /// Name of the network interface the graph is bound to.
    fn interface(&self) -> Option<&str>;

    /// Request a new map. The map is staged until [`Graph::push_map`].
    fn create_map(&mut self, sources: &[SignalId], destination: SignalId) -> Result<MapId, GraphError>;

    /// Stage a property write on a map.
    fn set_map_property(&mut self, id: MapId, property: MapProperty) -> Result<(), GraphError>;

    /// Publish all staged changes of a map as one atomic update.
    fn push_map(&mut self, id: MapId) -> Result<(), GraphError>;

    /// Request removal of a map.
    fn release_map(&mut self, id: MapId) -> Result<(), GraphError>;

    /// Subscribe to change notifications.
    fn subscribe(&mut self, scope: SubscriptionScope);

    /// Rebind the graph to a network interface.
    fn set_interface(&mut self, name: &str) -> Result<(), GraphError>;

    /// Service pending network input for up to `timeout`, delivering every
    /// change notification to `bus` synchronously and in order.
    ///
    /// Returns the number of notifications delivered.
    fn poll(&mut self, timeout: Duration, bus: &mut ChangeBus) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_tokens() {
        assert_eq!(serde_json::to_value(SignalType::Float32).unwrap(), "f");
        assert_eq!(serde_json::to_value(SignalType::Int32).unwrap(), "i");
        assert_eq!(serde_json::to_value(Direction::Input).unwrap(), "input");
        assert_eq!(serde_json::to_value(Location::Destination).unwrap(), "dst");
        assert_eq!(serde_json::to_value(Protocol::Tcp).unwrap(), "TCP");
    }

    #[test]
    fn test_protocol_tokens() {
        assert_eq!(Protocol::from_token("udp"), Some(Protocol::Udp));
        assert_eq!(Protocol::from_token("TCP"), Some(Protocol::Tcp));
        assert_eq!(Protocol::from_token("Udp"), None);
        assert_eq!(Protocol::from_token("quic"), None);
    }

    #[test]
    fn test_timetag_as_f64() {
        let tt = Timetag {
            sec: 10,
            frac: 1 << 31,
        };
        assert_eq!(tt.as_f64(), 10.5);
        assert!(Timetag::now().sec > 3_900_000_000);
    }

    #[test]
    fn test_timetag_wraps_at_ntp_era() {
        // 2036-02-07T06:28:16Z is second zero of NTP era 1.
        let rollover = (1i64 << 32) - NTP_UNIX_OFFSET;
        assert_eq!(Timetag::from_unix(rollover - 1, 0).sec, u32::MAX);
        assert_eq!(Timetag::from_unix(rollover + 5, 500_000_000), Timetag { sec: 5, frac: 1 << 31 });
    }

    #[test]
    fn test_map_id_display() {
        assert_eq!(MapId(u64::MAX).to_string(), "18446744073709551615");
    }
}
