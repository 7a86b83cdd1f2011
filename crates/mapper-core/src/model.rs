//! Transmissible entity records.
//!
//! These are the flat, JSON-ready shapes the UI receives for devices, signals
//! and maps. Each record has a fixed set of known fields plus a bounded
//! [`Extensions`] map for library-specific properties, flattened into the
//! same JSON object.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::graph::{Direction, Location, Protocol, SignalType};

/// Maximum number of extension properties carried by one record.
pub const MAX_EXTENSIONS: usize = 64;

/// Liveness status of a mirrored entity.
///
/// Removal and expiry are signaled by the event type, so every record
/// produced from a live handle is `active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
}

/// Library-specific properties not modeled as record fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extensions(BTreeMap<String, Value>);

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy raw properties, skipping names reserved by the record's own fields.
    ///
    /// Entries beyond [`MAX_EXTENSIONS`] are dropped.
    pub fn from_properties<'a, I>(properties: I, reserved: &[&str]) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        let mut extensions = Self::new();
        for (key, value) in properties {
            if reserved.contains(&key.as_str()) {
                continue;
            }
            if !extensions.insert(key.clone(), value.clone()) {
                tracing::warn!("Dropping extension property {:?}: limit of {} reached", key, MAX_EXTENSIONS);
            }
        }
        extensions
    }

    /// Insert a property. Returns false if the map is full.
    pub fn insert(&mut self, key: String, value: Value) -> bool {
        if self.0.len() >= MAX_EXTENSIONS && !self.0.contains_key(&key) {
            return false;
        }
        self.0.insert(key, value);
        true
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// Normalized device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Device name; devices are addressed by name.
    pub key: String,
    pub name: String,
    /// Last sync time in plain floating-point seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced: Option<f64>,
    pub status: Status,
    #[serde(flatten)]
    pub extensions: Extensions,
}

impl DeviceRecord {
    pub const FIELDS: &'static [&'static str] = &["key", "name", "synced", "status", "id", "is_local"];
}

/// Normalized signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    /// `device/signal`
    pub key: String,
    pub name: String,
    /// Owning device name.
    pub device: String,
    pub direction: Direction,
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub num_maps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    pub status: Status,
    #[serde(flatten)]
    pub extensions: Extensions,
}

impl SignalRecord {
    pub const FIELDS: &'static [&'static str] = &[
        "key", "name", "device", "direction", "type", "num_maps", "min", "max", "status", "id",
        "is_local",
    ];
}

/// Normalized map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapRecord {
    /// Graph id as a string; 64-bit ids do not survive float-backed numbers.
    pub id: String,
    /// Canonical key, see [`MapKey`](crate::key::MapKey).
    pub key: String,
    /// First source full name.
    pub src: String,
    pub dst: String,
    /// All source full names, sorted.
    pub srcs: Vec<String>,
    pub process_loc: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    pub muted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_min: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_max: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_calibrating: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_min: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_max: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_calibrating: Option<bool>,
    pub status: Status,
    #[serde(flatten)]
    pub extensions: Extensions,
}

impl MapRecord {
    pub const FIELDS: &'static [&'static str] = &[
        "id", "key", "src", "dst", "srcs", "process_loc", "protocol", "expr", "muted", "src_min",
        "src_max", "src_calibrating", "dst_min", "dst_max", "dst_calibrating", "status",
        "is_local",
    ];
}
