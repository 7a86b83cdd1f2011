//! Map configuration storage.
//!
//! A device's maps can be saved as a JSON document and later loaded back,
//! optionally onto differently named devices. The [`MapStorage`] trait keeps
//! the document format replaceable; [`JsonMapStorage`] is the default.
//!
//! # Document
//!
//! ```json
//! {
//!   "fileversion": "2.4",
//!   "mapping": {
//!     "maps": [
//!       {
//!         "sources": ["synth/freq"],
//!         "destination": "filter/cutoff",
//!         "expression": "y=x*2",
//!         "muted": false,
//!         "process_loc": "src",
//!         "protocol": "UDP",
//!         "dst_min": 20.0
//!       }
//!     ]
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::graph::{Graph, Location, MapProperty, Protocol, SignalId};
use crate::key::SignalKey;
use crate::model::MapRecord;
use crate::normalize::map_record;
use crate::props::PropValue;
use crate::resolve::{resolve_device, resolve_endpoints};

/// Version written into saved documents.
pub const FILE_VERSION: &str = "2.4";

/// Errors that can occur while saving or loading map configurations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    /// The device to save does not exist.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The document could not be parsed.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// The document was written by an incompatible version.
    #[error("Unsupported file version: {0}")]
    UnsupportedVersion(String),
}

/// Abstract map configuration storage.
///
/// All methods are synchronous and operate on in-memory documents; moving
/// documents to and from disk is the caller's concern.
pub trait MapStorage: Send {
    /// Serialize every map touching `device`.
    fn serialise(&self, graph: &dyn Graph, device: &str) -> Result<Value, StorageError>;

    /// Recreate the maps of a document, renaming source devices positionally
    /// onto `sources` and destination devices onto `destinations`.
    ///
    /// Returns the number of maps created.
    fn deserialise(
        &self,
        graph: &mut dyn Graph,
        sources: &[String],
        destinations: &[String],
        document: &Value,
    ) -> Result<usize, StorageError>;
}

/// Saved map configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingDocument {
    pub fileversion: String,
    pub mapping: MappingSection,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MappingSection {
    #[serde(default)]
    pub maps: Vec<StoredMap>,
}

/// One saved map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMap {
    pub sources: Vec<String>,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_loc: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_min: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_max: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_min: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_max: Option<Value>,
    /// Extension properties of the map.
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

impl From<&MapRecord> for StoredMap {
    fn from(record: &MapRecord) -> Self {
        Self {
            sources: record.srcs.clone(),
            destination: record.dst.clone(),
            expression: record.expr.clone(),
            muted: Some(record.muted),
            process_loc: Some(record.process_loc),
            protocol: record.protocol,
            src_min: record.src_min.clone(),
            src_max: record.src_max.clone(),
            dst_min: record.dst_min.clone(),
            dst_max: record.dst_max.clone(),
            properties: record
                .extensions
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl StoredMap {
    /// Property writes that restore this map's saved state.
    pub fn writes(&self) -> Vec<MapProperty> {
        let mut writes = Vec::new();
        if let Some(expr) = &self.expression {
            writes.push(MapProperty::Expression(Some(expr.clone())));
        }
        if let Some(muted) = self.muted {
            writes.push(MapProperty::Muted(muted));
        }
        if let Some(location) = self.process_loc {
            writes.push(MapProperty::ProcessLocation(location));
        }
        if let Some(protocol) = self.protocol {
            writes.push(MapProperty::Protocol(protocol));
        }
        let slots = [
            (&self.src_min, &self.src_max, Location::Source),
            (&self.dst_min, &self.dst_max, Location::Destination),
        ];
        for (min, max, location) in slots {
            if min.is_some() {
                writes.push(MapProperty::SlotMin(location, min.clone()));
            }
            if max.is_some() {
                writes.push(MapProperty::SlotMax(location, max.clone()));
            }
        }
        for (key, value) in &self.properties {
            writes.push(MapProperty::Extension(key.clone(), PropValue::parse(value)));
        }
        writes
    }
}

/// Positional device renaming used while loading.
#[derive(Debug, Default)]
struct Renames(BTreeMap<String, String>);

impl Renames {
    /// Map the distinct device names of `names` (first-appearance order)
    /// onto `targets`. Devices without a target keep their name.
    fn build<'a>(names: impl Iterator<Item = &'a String>, targets: &[String]) -> Self {
        let mut seen: Vec<String> = Vec::new();
        for name in names {
            if let Ok(key) = SignalKey::parse(name) {
                if !seen.contains(&key.device) {
                    seen.push(key.device);
                }
            }
        }
        Self(seen.into_iter().zip(targets.iter().cloned()).collect())
    }

    fn apply(&self, full_name: &str) -> String {
        match SignalKey::parse(full_name) {
            Ok(key) => match self.0.get(&key.device) {
                Some(device) => SignalKey::new(device.clone(), key.signal).to_string(),
                None => full_name.to_string(),
            },
            Err(_) => full_name.to_string(),
        }
    }
}

/// JSON document storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMapStorage;

impl JsonMapStorage {
    pub fn new() -> Self {
        Self
    }

    fn parse(document: &Value) -> Result<MappingDocument, StorageError> {
        let doc: MappingDocument = serde_json::from_value(document.clone())
            .map_err(|e| StorageError::InvalidDocument(e.to_string()))?;
        if !doc.fileversion.starts_with("2.") {
            return Err(StorageError::UnsupportedVersion(doc.fileversion));
        }
        Ok(doc)
    }
}

impl MapStorage for JsonMapStorage {
    fn serialise(&self, graph: &dyn Graph, device: &str) -> Result<Value, StorageError> {
        let dev = resolve_device(graph, device)
            .map_err(|_| StorageError::DeviceNotFound(device.to_string()))?;

        let touches_device = |signal: SignalId| graph.signal(signal).is_some_and(|s| s.device == dev.id);
        let maps = graph
            .maps()
            .into_iter()
            .filter(|m| {
                touches_device(m.destination.signal)
                    || m.sources.iter().any(|slot| touches_device(slot.signal))
            })
            .map(|m| StoredMap::from(&map_record(graph, m)))
            .collect();

        let doc = MappingDocument {
            fileversion: FILE_VERSION.to_string(),
            mapping: MappingSection { maps },
        };
        serde_json::to_value(doc).map_err(|e| StorageError::InvalidDocument(e.to_string()))
    }

    fn deserialise(
        &self,
        graph: &mut dyn Graph,
        sources: &[String],
        destinations: &[String],
        document: &Value,
    ) -> Result<usize, StorageError> {
        let doc = Self::parse(document)?;
        let src_renames = Renames::build(doc.mapping.maps.iter().flat_map(|m| m.sources.iter()), sources);
        let dst_renames = Renames::build(doc.mapping.maps.iter().map(|m| &m.destination), destinations);

        let mut created = 0;
        for stored in &doc.mapping.maps {
            let srcs: Vec<String> = stored.sources.iter().map(|s| src_renames.apply(s)).collect();
            let dst = dst_renames.apply(&stored.destination);

            let (src_ids, dst_id) = match resolve_endpoints(&*graph, &srcs, &dst) {
                Ok((s, d)) => (s.iter().map(|sig| sig.id).collect::<Vec<_>>(), d.id),
                Err(e) => {
                    tracing::warn!("Skipping stored map: {}", e);
                    continue;
                }
            };

            let id = match graph.create_map(&src_ids, dst_id) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("Skipping stored map {:?} -> {}: {}", srcs, dst, e);
                    continue;
                }
            };
            for write in stored.writes() {
                if let Err(e) = graph.set_map_property(id, write) {
                    tracing::warn!("Failed to restore property on map {}: {}", id, e);
                }
            }
            if let Err(e) = graph.push_map(id) {
                tracing::warn!("Failed to push restored map {}: {}", id, e);
                continue;
            }
            created += 1;
        }

        tracing::debug!("Loaded {} of {} stored maps", created, doc.mapping.maps.len());
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Direction, SignalType};
    use crate::memory::MemoryGraph;
    use crate::normalize::map_snapshot;
    use crate::resolve::resolve_map;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn studio() -> MemoryGraph {
        let mut graph = MemoryGraph::new();
        for (device, output, input) in [("synth", "freq", "gate"), ("synth2", "freq", "gate")] {
            let id = graph.add_device(device);
            graph.add_signal(id, output, Direction::Output, SignalType::Float32);
            graph.add_signal(id, input, Direction::Input, SignalType::Int32);
        }
        for device in ["filter", "filter2"] {
            let id = graph.add_device(device);
            graph.add_signal(id, "cutoff", Direction::Input, SignalType::Float64);
        }
        graph
    }

    fn connect(graph: &mut MemoryGraph, src: &str, dst: &str, writes: Vec<MapProperty>) {
        let (s, d) = resolve_endpoints(&*graph, &[src], dst).unwrap();
        let (s, d) = (s[0].id, d.id);
        let id = graph.create_map(&[s], d).unwrap();
        for w in writes {
            graph.set_map_property(id, w).unwrap();
        }
        graph.push_map(id).unwrap();
    }

    #[test]
    fn test_serialise_collects_device_maps() {
        let mut graph = studio();
        connect(&mut graph, "synth/freq", "filter/cutoff", vec![MapProperty::Expression(Some("y=x*2".into()))]);
        connect(&mut graph, "synth2/freq", "filter2/cutoff", vec![]);

        let doc = JsonMapStorage.serialise(&graph, "synth").unwrap();
        assert_eq!(doc["fileversion"], FILE_VERSION);
        let maps = doc["mapping"]["maps"].as_array().unwrap();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0]["sources"], json!(["synth/freq"]));
        assert_eq!(maps[0]["destination"], "filter/cutoff");
        assert_eq!(maps[0]["expression"], "y=x*2");
        assert_eq!(maps[0]["protocol"], "UDP");
    }

    #[test]
    fn test_serialise_unknown_device() {
        let graph = studio();
        assert_eq!(
            JsonMapStorage.serialise(&graph, "nope").unwrap_err(),
            StorageError::DeviceNotFound("nope".to_string())
        );
    }

    #[test]
    fn test_save_release_load_round_trip() {
        let mut graph = studio();
        connect(
            &mut graph,
            "synth/freq",
            "filter/cutoff",
            vec![
                MapProperty::Expression(Some("y=x*2".into())),
                MapProperty::Muted(true),
                MapProperty::Protocol(Protocol::Tcp),
                MapProperty::SlotMax(Location::Destination, Some(json!(8000.0))),
            ],
        );
        let before = map_snapshot(&graph);
        let doc = JsonMapStorage.serialise(&graph, "synth").unwrap();

        let id = resolve_map(&graph, &["synth/freq"], "filter/cutoff").unwrap().id;
        graph.release_map(id).unwrap();
        graph.poll(Duration::ZERO, &mut crate::bus::ChangeBus::new());
        assert!(graph.maps().is_empty());

        let created = JsonMapStorage.deserialise(&mut graph, &[], &[], &doc).unwrap();
        assert_eq!(created, 1);

        let after = map_snapshot(&graph);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].key, before[0].key);
        assert_eq!(after[0].expr, before[0].expr);
        assert_eq!(after[0].muted, before[0].muted);
        assert_eq!(after[0].protocol, before[0].protocol);
        assert_eq!(after[0].dst_max, before[0].dst_max);
    }

    #[test]
    fn test_load_renames_devices() {
        let mut graph = studio();
        connect(&mut graph, "synth/freq", "filter/cutoff", vec![]);
        let doc = JsonMapStorage.serialise(&graph, "synth").unwrap();

        let created = JsonMapStorage
            .deserialise(&mut graph, &["synth2".to_string()], &["filter2".to_string()], &doc)
            .unwrap();
        assert_eq!(created, 1);
        assert!(resolve_map(&graph, &["synth2/freq"], "filter2/cutoff").is_ok());
    }

    #[test]
    fn test_load_skips_unresolvable_maps() {
        let mut graph = studio();
        let doc = json!({
            "fileversion": "2.4",
            "mapping": {"maps": [
                {"sources": ["ghost/out"], "destination": "filter/cutoff"},
                {"sources": ["synth/freq"], "destination": "filter/cutoff", "expression": "y=x"}
            ]}
        });

        let created = JsonMapStorage.deserialise(&mut graph, &[], &[], &doc).unwrap();
        assert_eq!(created, 1);
    }

    #[test]
    fn test_load_keeps_integer_extensions() {
        let mut graph = studio();
        let doc = json!({
            "fileversion": "2.4",
            "mapping": {"maps": [
                {"sources": ["synth/freq"], "destination": "filter/cutoff", "scope": 9_007_199_254_740_993u64}
            ]}
        });

        JsonMapStorage.deserialise(&mut graph, &[], &[], &doc).unwrap();
        let map = resolve_map(&graph, &["synth/freq"], "filter/cutoff").unwrap();
        assert_eq!(map.properties.get("scope"), Some(&json!(9_007_199_254_740_993u64)));
    }

    #[test]
    fn test_load_rejects_bad_documents() {
        let mut graph = studio();
        assert!(matches!(
            JsonMapStorage.deserialise(&mut graph, &[], &[], &json!({"maps": []})),
            Err(StorageError::InvalidDocument(_))
        ));
        assert_eq!(
            JsonMapStorage
                .deserialise(&mut graph, &[], &[], &json!({"fileversion": "1.0", "mapping": {}}))
                .unwrap_err(),
            StorageError::UnsupportedVersion("1.0".to_string())
        );
    }
}
