//! Property normalizer.
//!
//! Converts live graph handles into transmissible records. Normalization is a
//! pure read-and-reshape of current graph state and never fails for a valid
//! handle; nothing is cached between calls.

use crate::graph::{Device, Graph, Location, Map, Signal, SignalId};
use crate::key::MapKey;
use crate::model::{DeviceRecord, Extensions, MapRecord, SignalRecord, Status};

/// Full `device/signal` name of a signal.
///
/// A signal whose device is no longer in the table keeps an empty device part.
pub fn full_signal_name(graph: &dyn Graph, signal: &Signal) -> String {
    let device = graph
        .device(signal.device)
        .map(|d| d.name.as_str())
        .unwrap_or_default();
    format!("{}/{}", device, signal.name)
}

fn full_name_of(graph: &dyn Graph, id: SignalId) -> String {
    graph
        .signal(id)
        .map(|s| full_signal_name(graph, s))
        .unwrap_or_default()
}

pub fn device_record(device: &Device) -> DeviceRecord {
    DeviceRecord {
        key: device.name.clone(),
        name: device.name.clone(),
        synced: device.synced.map(|tt| tt.as_f64()),
        status: Status::Active,
        extensions: Extensions::from_properties(&device.properties, DeviceRecord::FIELDS),
    }
}

pub fn signal_record(graph: &dyn Graph, signal: &Signal) -> SignalRecord {
    let device = graph
        .device(signal.device)
        .map(|d| d.name.clone())
        .unwrap_or_default();

    SignalRecord {
        key: format!("{}/{}", device, signal.name),
        name: signal.name.clone(),
        device,
        direction: signal.direction,
        signal_type: signal.signal_type,
        num_maps: graph.signal_maps(signal.id).len(),
        min: signal.min.clone(),
        max: signal.max.clone(),
        status: Status::Active,
        extensions: Extensions::from_properties(&signal.properties, SignalRecord::FIELDS),
    }
}

pub fn map_record(graph: &dyn Graph, map: &Map) -> MapRecord {
    let src_slot = map.slot(Location::Source);
    let dst_slot = map.slot(Location::Destination);

    let src = full_name_of(graph, src_slot.signal);
    let dst = full_name_of(graph, dst_slot.signal);
    let key = MapKey::new(
        &map.sources
            .iter()
            .map(|slot| full_name_of(graph, slot.signal))
            .collect::<Vec<_>>(),
        &dst,
    );

    MapRecord {
        id: map.id.to_string(),
        key: key.to_string(),
        src,
        dst,
        srcs: key.sources().to_vec(),
        process_loc: map.process_loc,
        protocol: map.protocol,
        expr: map.expression.clone(),
        muted: map.muted,
        src_min: src_slot.min.clone(),
        src_max: src_slot.max.clone(),
        src_calibrating: src_slot.calibrating,
        dst_min: dst_slot.min.clone(),
        dst_max: dst_slot.max.clone(),
        dst_calibrating: dst_slot.calibrating,
        status: Status::Active,
        extensions: Extensions::from_properties(&map.properties, MapRecord::FIELDS),
    }
}

/// Current state of every device.
pub fn device_snapshot(graph: &dyn Graph) -> Vec<DeviceRecord> {
    graph.devices().into_iter().map(device_record).collect()
}

/// Current state of every signal.
pub fn signal_snapshot(graph: &dyn Graph) -> Vec<SignalRecord> {
    graph
        .signals()
        .into_iter()
        .map(|s| signal_record(graph, s))
        .collect()
}

/// Current state of every map.
pub fn map_snapshot(graph: &dyn Graph) -> Vec<MapRecord> {
    graph
        .maps()
        .into_iter()
        .map(|m| map_record(graph, m))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Direction, MapProperty, Protocol, SignalType};
    use crate::memory::MemoryGraph;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_graph() -> MemoryGraph {
        let mut graph = MemoryGraph::new();
        let synth = graph.add_device("synth");
        let filter = graph.add_device("filter");
        let lfo = graph.add_device("lfo");
        graph.add_signal(synth, "freq", Direction::Output, SignalType::Float32);
        graph.add_signal(lfo, "rate", Direction::Output, SignalType::Float64);
        graph.add_signal(filter, "cutoff", Direction::Input, SignalType::Int32);
        graph
    }

    fn signal(graph: &MemoryGraph, full: &str) -> SignalId {
        let (dev, sig) = full.split_once('/').unwrap();
        let dev = graph.device_by_name(dev).unwrap().id;
        graph
            .device_signals(dev)
            .into_iter()
            .find(|s| s.name == sig)
            .unwrap()
            .id
    }

    #[test]
    fn test_device_record() {
        let mut graph = sample_graph();
        let synth = graph.device_by_name("synth").unwrap().id;
        graph.set_device_property(synth, "host", json!("10.0.0.2"));
        graph.set_device_property(synth, "is_local", json!(false));

        let record = device_record(graph.device(synth).unwrap());
        assert_eq!(record.key, "synth");
        assert_eq!(record.status, Status::Active);
        assert!(record.synced.is_some());
        assert_eq!(record.extensions.get("host"), Some(&json!("10.0.0.2")));
        assert_eq!(record.extensions.get("is_local"), None);

        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("id").is_none());
        assert!(value["synced"].is_f64());
    }

    #[test]
    fn test_signal_record() {
        let graph = sample_graph();
        let freq = signal(&graph, "synth/freq");
        let record = signal_record(&graph, graph.signal(freq).unwrap());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["key"], "synth/freq");
        assert_eq!(value["device"], "synth");
        assert_eq!(value["direction"], "output");
        assert_eq!(value["type"], "f");
        assert_eq!(value["num_maps"], 0);
        assert_eq!(value["status"], "active");
    }

    #[test]
    fn test_single_source_map_record() {
        let mut graph = sample_graph();
        let src = signal(&graph, "synth/freq");
        let dst = signal(&graph, "filter/cutoff");
        let id = graph.create_map(&[src], dst).unwrap();
        graph
            .set_map_property(id, MapProperty::Protocol(Protocol::Tcp))
            .unwrap();
        graph
            .set_map_property(id, MapProperty::SlotMin(Location::Destination, Some(json!(20))))
            .unwrap();
        graph.push_map(id).unwrap();

        let record = map_record(&graph, graph.map(id).unwrap());
        assert_eq!(record.key, "synth/freq->filter/cutoff");
        assert_eq!(record.src, "synth/freq");
        assert_eq!(record.dst, "filter/cutoff");
        assert_eq!(record.srcs, vec!["synth/freq".to_string()]);
        assert_eq!(record.id, id.to_string());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["protocol"], "TCP");
        assert_eq!(value["process_loc"], "src");
        assert_eq!(value["dst_min"], 20);
        assert!(value["id"].is_string());
        assert!(value.get("src_min").is_none());
        assert!(value.get("dst_calibrating").is_none());
        assert!(value.get("is_local").is_none());
    }

    #[test]
    fn test_convergent_map_record_sorted() {
        let mut graph = sample_graph();
        let lfo = signal(&graph, "lfo/rate");
        let synth = signal(&graph, "synth/freq");
        let dst = signal(&graph, "filter/cutoff");
        let id = graph.create_map(&[synth, lfo], dst).unwrap();
        graph.push_map(id).unwrap();

        let record = map_record(&graph, graph.map(id).unwrap());
        assert_eq!(record.key, "[lfo/rate,synth/freq]->[filter/cutoff]");
        assert_eq!(record.src, "synth/freq");
        assert_eq!(record.srcs, vec!["lfo/rate".to_string(), "synth/freq".to_string()]);
    }

    #[test]
    fn test_protocol_omitted_when_absent() {
        let mut graph = sample_graph();
        let src = signal(&graph, "synth/freq");
        let dst = signal(&graph, "filter/cutoff");
        let id = graph.create_map(&[src], dst).unwrap();
        graph.push_map(id).unwrap();

        let mut map = graph.map(id).unwrap().clone();
        let value = serde_json::to_value(map_record(&graph, &map)).unwrap();
        assert_eq!(value["protocol"], "UDP");

        map.protocol = None;
        let value = serde_json::to_value(map_record(&graph, &map)).unwrap();
        assert!(value.get("protocol").is_none());
    }

    #[test]
    fn test_num_maps_counts_live_maps() {
        let mut graph = sample_graph();
        let src = signal(&graph, "synth/freq");
        let dst = signal(&graph, "filter/cutoff");
        let id = graph.create_map(&[src], dst).unwrap();
        graph.push_map(id).unwrap();

        let snapshot = signal_snapshot(&graph);
        let freq = snapshot.iter().find(|s| s.key == "synth/freq").unwrap();
        assert_eq!(freq.num_maps, 1);
        assert_eq!(map_snapshot(&graph).len(), 1);
        assert_eq!(device_snapshot(&graph).len(), 3);
    }
}
