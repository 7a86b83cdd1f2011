//! Protocol message types for WebSocket communication.
//!
//! Every message is a named command with a JSON payload:
//!
//! ```json
//! {"cmd": "add_maps", "args": [{"key": "synth/freq->filter/cutoff", "status": "active"}]}
//! ```
//!
//! - Server → Client: [`OutboundEvent`] (entity changes, snapshots, interface state)
//! - Client → Server: [`InboundCommand`] (snapshots, map edits, subscriptions, storage)

use mapper_core::{DeviceRecord, MapRecord, SignalRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

/// Argument of `subscribe`: everything, or a single device.
pub const ALL_DEVICES: &str = "all_devices";

// ============================================================================
// Server → Client
// ============================================================================

/// Events sent from the mirror to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "args", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Devices created or modified, or a device snapshot.
    AddDevices(Vec<DeviceRecord>),
    DelDevice(DeviceRecord),

    AddSignals(Vec<SignalRecord>),
    DelSignal(SignalRecord),

    AddMaps(Vec<MapRecord>),
    DelMap(MapRecord),

    AvailableInterfaces(Vec<String>),
    ActiveInterface(String),

    /// Echo of a newly selected interface.
    SetIface(String),

    /// A saved map configuration with its suggested file name.
    Save { filename: String, document: Value },
}

impl OutboundEvent {
    /// The command name carried on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::AddDevices(_) => "add_devices",
            OutboundEvent::DelDevice(_) => "del_device",
            OutboundEvent::AddSignals(_) => "add_signals",
            OutboundEvent::DelSignal(_) => "del_signal",
            OutboundEvent::AddMaps(_) => "add_maps",
            OutboundEvent::DelMap(_) => "del_map",
            OutboundEvent::AvailableInterfaces(_) => "available_interfaces",
            OutboundEvent::ActiveInterface(_) => "active_interface",
            OutboundEvent::SetIface(_) => "set_iface",
            OutboundEvent::Save { .. } => "save",
        }
    }
}

// ============================================================================
// Client → Server
// ============================================================================

/// Target of a `subscribe` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeTarget {
    AllDevices,
    Device(String),
}

impl SubscribeTarget {
    pub fn from_arg(arg: &str) -> Self {
        if arg == ALL_DEVICES {
            SubscribeTarget::AllDevices
        } else {
            SubscribeTarget::Device(arg.to_string())
        }
    }
}

/// Arguments of `map` and `unmap`.
#[derive(Debug, Clone, PartialEq)]
pub struct MapRequest {
    pub sources: Vec<String>,
    pub destination: String,
    /// Properties to apply after creation (`map` only).
    pub properties: Option<JsonMap<String, Value>>,
}

/// Arguments of `load`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadRequest {
    /// Device names replacing the stored source devices, positionally.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Device names replacing the stored destination devices, positionally.
    #[serde(default)]
    pub destinations: Vec<String>,
    /// The saved document.
    pub loading: Value,
}

/// Arguments of `save`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveRequest {
    pub dev: String,
}

/// Commands received from clients.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
    /// Request a snapshot of all devices.
    AddDevices,
    AddSignals,
    AddMaps,
    Subscribe(SubscribeTarget),
    /// Update a map addressed by the routing keys inside the payload.
    SetMap(JsonMap<String, Value>),
    Map(MapRequest),
    Unmap(MapRequest),
    Refresh,
    Save(SaveRequest),
    Load(LoadRequest),
    SelectInterface(String),
    GetInterfaces,
}

impl InboundCommand {
    pub fn name(&self) -> &'static str {
        match self {
            InboundCommand::AddDevices => "add_devices",
            InboundCommand::AddSignals => "add_signals",
            InboundCommand::AddMaps => "add_maps",
            InboundCommand::Subscribe(_) => "subscribe",
            InboundCommand::SetMap(_) => "set_map",
            InboundCommand::Map(_) => "map",
            InboundCommand::Unmap(_) => "unmap",
            InboundCommand::Refresh => "refresh",
            InboundCommand::Save(_) => "save",
            InboundCommand::Load(_) => "load",
            InboundCommand::SelectInterface(_) => "select_interface",
            InboundCommand::GetInterfaces => "get_interfaces",
        }
    }
}

// ============================================================================
// Discovery Endpoint
// ============================================================================

/// Discovery response for the `/mapper` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub name: String,
    pub version: String,
    pub ws: String,
    pub http: String,
}

impl DiscoveryResponse {
    pub fn new(name: &str, host: &str, ws_port: u16, http_port: u16) -> Self {
        Self {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ws: format!("ws://{}:{}", host, ws_port),
            http: format!("http://{}:{}/mapper", host, http_port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapper_core::{Direction, SignalType, Status};
    use serde_json::json;

    fn device(name: &str) -> DeviceRecord {
        DeviceRecord {
            key: name.to_string(),
            name: name.to_string(),
            synced: None,
            status: Status::Active,
            extensions: Default::default(),
        }
    }

    #[test]
    fn test_add_devices_shape() {
        let event = OutboundEvent::AddDevices(vec![device("synth")]);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["cmd"], "add_devices");
        assert!(value["args"].is_array());
        assert_eq!(value["args"][0]["key"], "synth");
        assert_eq!(value["args"][0]["status"], "active");
    }

    #[test]
    fn test_delete_carries_single_record() {
        let record = SignalRecord {
            key: "synth/freq".to_string(),
            name: "freq".to_string(),
            device: "synth".to_string(),
            direction: Direction::Output,
            signal_type: SignalType::Float32,
            num_maps: 0,
            min: None,
            max: None,
            status: Status::Active,
            extensions: Default::default(),
        };
        let value = serde_json::to_value(OutboundEvent::DelSignal(record)).unwrap();

        assert_eq!(value["cmd"], "del_signal");
        assert!(value["args"].is_object());
        assert_eq!(value["args"]["key"], "synth/freq");
    }

    #[test]
    fn test_interface_events() {
        let value = serde_json::to_value(OutboundEvent::SetIface("en0".into())).unwrap();
        assert_eq!(value, json!({"cmd": "set_iface", "args": "en0"}));

        let value =
            serde_json::to_value(OutboundEvent::AvailableInterfaces(vec!["lo".into(), "eth0".into()]))
                .unwrap();
        assert_eq!(value, json!({"cmd": "available_interfaces", "args": ["lo", "eth0"]}));
    }

    #[test]
    fn test_event_names_match_wire() {
        let events = [
            OutboundEvent::AddDevices(vec![]),
            OutboundEvent::DelDevice(device("x")),
            OutboundEvent::ActiveInterface("lo".into()),
            OutboundEvent::Save {
                filename: "x.json".into(),
                document: json!({}),
            },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["cmd"], event.name());
        }
    }

    #[test]
    fn test_subscribe_target() {
        assert_eq!(SubscribeTarget::from_arg("all_devices"), SubscribeTarget::AllDevices);
        assert_eq!(
            SubscribeTarget::from_arg("synth"),
            SubscribeTarget::Device("synth".to_string())
        );
    }

    #[test]
    fn test_discovery() {
        let discovery = DiscoveryResponse::new("webmapper", "localhost", 50000, 50001);
        assert_eq!(discovery.ws, "ws://localhost:50000");
        assert_eq!(discovery.http, "http://localhost:50001/mapper");
    }
}
