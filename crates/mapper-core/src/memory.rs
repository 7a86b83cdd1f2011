//! In-memory graph implementation.
//!
//! Holds the whole device/signal/map table in process and behaves like the
//! networked graph library from the mirror's point of view: entity changes
//! are queued as notifications and delivered in order by [`Graph::poll`],
//! maps are staged until pushed, and property writes apply atomically.
//!
//! The "network side" (devices appearing, signals being declared, devices
//! expiring) is driven through the inherent methods.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use serde_json::Value;

use crate::bus::{Action, ChangeBus, EntityRef};
use crate::graph::{
    Device, DeviceId, Direction, Graph, GraphError, Location, Map, MapId, MapProperty, Properties,
    Protocol, Signal, SignalId, SignalType, Slot, SubscriptionScope, Timetag,
};

/// Maximum number of sources a map may have.
pub const MAX_MAP_SOURCES: usize = 8;

/// Map ids are allocated from the top of the 64-bit range, like network ids.
const MAP_ID_BASE: u64 = 0x7d3a_0000_0000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    /// Created but not yet pushed; invisible to readers.
    Staged,
    Live,
    /// Reported removed; readable until the poll that reports it returns.
    Removed,
}

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    state: EntryState,
}

impl<T> Entry<T> {
    fn live(value: T) -> Self {
        Self {
            value,
            state: EntryState::Live,
        }
    }

    fn is_live(&self) -> bool {
        self.state == EntryState::Live
    }

    fn is_readable(&self) -> bool {
        self.state != EntryState::Staged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Device(DeviceId),
    Signal(SignalId),
    Map(MapId),
}

#[derive(Debug, Clone, Copy)]
struct Notice {
    action: Action,
    target: Target,
}

/// In-memory signal graph.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    next_id: u64,
    devices: BTreeMap<DeviceId, Entry<Device>>,
    signals: BTreeMap<SignalId, Entry<Signal>>,
    maps: BTreeMap<MapId, Entry<Map>>,
    /// Property writes waiting for the next push, per map.
    staged: BTreeMap<MapId, Vec<MapProperty>>,
    pending: VecDeque<Notice>,
    subscriptions: Vec<SubscriptionScope>,
    interface: Option<String>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn queue(&mut self, action: Action, target: Target) {
        // A modification folds into any notice still waiting for the same entity.
        if action == Action::Modified
            && self
                .pending
                .iter()
                .any(|n| n.target == target && !n.action.is_removal())
        {
            return;
        }
        self.pending.push_back(Notice { action, target });
    }

    // ========================================================================
    // Network side
    // ========================================================================

    /// Announce a device. An existing live device with the same name is
    /// refreshed instead.
    pub fn add_device(&mut self, name: &str) -> DeviceId {
        if let Some(id) = self.device_by_name(name).map(|d| d.id) {
            self.touch_device(id);
            return id;
        }

        let id = DeviceId(self.allocate());
        let device = Device {
            id,
            name: name.to_string(),
            synced: Some(Timetag::now()),
            is_local: false,
            properties: Properties::new(),
        };
        self.devices.insert(id, Entry::live(device));
        self.queue(Action::New, Target::Device(id));
        id
    }

    /// Refresh a device's sync time.
    pub fn touch_device(&mut self, id: DeviceId) {
        if let Some(entry) = self.devices.get_mut(&id).filter(|e| e.is_live()) {
            entry.value.synced = Some(Timetag::now());
            self.queue(Action::Modified, Target::Device(id));
        }
    }

    pub fn set_device_property(&mut self, id: DeviceId, key: &str, value: Value) {
        if let Some(entry) = self.devices.get_mut(&id).filter(|e| e.is_live()) {
            entry.value.properties.insert(key.to_string(), value);
            self.queue(Action::Modified, Target::Device(id));
        }
    }

    /// Declare a signal on a device. An existing live signal with the same
    /// name on that device is returned instead.
    pub fn add_signal(
        &mut self,
        device: DeviceId,
        name: &str,
        direction: Direction,
        signal_type: SignalType,
    ) -> SignalId {
        if let Some(existing) = self
            .device_signals(device)
            .into_iter()
            .find(|s| s.name == name)
        {
            return existing.id;
        }

        let id = SignalId(self.allocate());
        let signal = Signal {
            id,
            device,
            name: name.to_string(),
            direction,
            signal_type,
            min: None,
            max: None,
            is_local: false,
            properties: Properties::new(),
        };
        self.signals.insert(id, Entry::live(signal));
        self.queue(Action::New, Target::Signal(id));
        id
    }

    /// Set a signal property; `min` and `max` update the signal's bounds.
    pub fn set_signal_property(&mut self, id: SignalId, key: &str, value: Value) {
        if let Some(entry) = self.signals.get_mut(&id).filter(|e| e.is_live()) {
            match key {
                "min" => entry.value.min = Some(value),
                "max" => entry.value.max = Some(value),
                _ => {
                    entry.value.properties.insert(key.to_string(), value);
                }
            }
            self.queue(Action::Modified, Target::Signal(id));
        }
    }

    /// Remove a signal and every map attached to it.
    pub fn remove_signal(&mut self, id: SignalId) {
        self.drop_signal(id, Action::Removed);
    }

    /// Remove a device, its signals and their maps.
    pub fn remove_device(&mut self, id: DeviceId) {
        self.drop_device(id, Action::Removed);
    }

    /// Report a device as expired (stopped responding), cascading like removal.
    pub fn expire_device(&mut self, id: DeviceId) {
        self.drop_device(id, Action::Expired);
    }

    fn drop_device(&mut self, id: DeviceId, action: Action) {
        if !self.devices.get(&id).is_some_and(Entry::is_live) {
            return;
        }
        let signals: Vec<SignalId> = self.device_signals(id).iter().map(|s| s.id).collect();
        for signal in signals {
            self.drop_signal(signal, action);
        }
        if let Some(entry) = self.devices.get_mut(&id) {
            entry.state = EntryState::Removed;
        }
        self.queue(action, Target::Device(id));
    }

    fn drop_signal(&mut self, id: SignalId, action: Action) {
        if !self.signals.get(&id).is_some_and(Entry::is_live) {
            return;
        }
        for map in self.signal_maps(id) {
            self.drop_map(map, action);
        }
        if let Some(entry) = self.signals.get_mut(&id) {
            entry.state = EntryState::Removed;
        }
        self.queue(action, Target::Signal(id));
    }

    fn drop_map(&mut self, id: MapId, action: Action) {
        if let Some(entry) = self.maps.get_mut(&id).filter(|e| e.is_live()) {
            entry.state = EntryState::Removed;
            self.staged.remove(&id);
            self.queue(action, Target::Map(id));
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Live device with an exact name.
    pub fn device_by_name(&self, name: &str) -> Option<&Device> {
        self.devices
            .values()
            .find(|e| e.is_live() && e.value.name == name)
            .map(|e| &e.value)
    }

    /// Scopes subscribed so far, in subscription order.
    pub fn subscriptions(&self) -> &[SubscriptionScope] {
        &self.subscriptions
    }

    /// Number of notifications waiting for the next poll.
    pub fn pending_notifications(&self) -> usize {
        self.pending.len()
    }

    fn find_map(&self, sources: &[SignalId], destination: SignalId) -> Option<MapId> {
        let mut wanted = sources.to_vec();
        wanted.sort();
        self.maps
            .values()
            .filter(|e| e.is_live() && e.value.destination.signal == destination)
            .find(|e| {
                let mut have: Vec<SignalId> = e.value.sources.iter().map(|s| s.signal).collect();
                have.sort();
                have == wanted
            })
            .map(|e| e.value.id)
    }

    fn slot_for(&self, id: SignalId) -> Slot {
        let mut slot = Slot::new(id);
        if let Some(signal) = self.signal(id) {
            slot.min = signal.min.clone();
            slot.max = signal.max.clone();
        }
        slot
    }
}

fn apply_property(map: &mut Map, property: MapProperty) {
    fn slot_mut(map: &mut Map, location: Location) -> &mut Slot {
        match location {
            Location::Source if !map.sources.is_empty() => &mut map.sources[0],
            _ => &mut map.destination,
        }
    }

    match property {
        MapProperty::Expression(expr) => map.expression = expr,
        MapProperty::Muted(muted) => map.muted = muted,
        MapProperty::Protocol(protocol) => map.protocol = Some(protocol),
        MapProperty::ProcessLocation(location) => map.process_loc = location,
        MapProperty::SlotMin(location, value) => slot_mut(map, location).min = value,
        MapProperty::SlotMax(location, value) => slot_mut(map, location).max = value,
        MapProperty::SlotCalibrating(location, calib) => {
            slot_mut(map, location).calibrating = Some(calib)
        }
        MapProperty::Extension(key, value) => match value.into_json() {
            Some(value) => {
                map.properties.insert(key, value);
            }
            None => {
                map.properties.remove(&key);
            }
        },
    }
}

impl Graph for MemoryGraph {
    fn devices(&self) -> Vec<&Device> {
        self.devices
            .values()
            .filter(|e| e.is_live())
            .map(|e| &e.value)
            .collect()
    }

    fn signals(&self) -> Vec<&Signal> {
        self.signals
            .values()
            .filter(|e| e.is_live())
            .map(|e| &e.value)
            .collect()
    }

    fn maps(&self) -> Vec<&Map> {
        self.maps
            .values()
            .filter(|e| e.is_live())
            .map(|e| &e.value)
            .collect()
    }

    fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices
            .get(&id)
            .filter(|e| e.is_readable())
            .map(|e| &e.value)
    }

    fn signal(&self, id: SignalId) -> Option<&Signal> {
        self.signals
            .get(&id)
            .filter(|e| e.is_readable())
            .map(|e| &e.value)
    }

    fn map(&self, id: MapId) -> Option<&Map> {
        self.maps
            .get(&id)
            .filter(|e| e.is_readable())
            .map(|e| &e.value)
    }

    fn device_signals(&self, id: DeviceId) -> Vec<&Signal> {
        self.signals
            .values()
            .filter(|e| e.is_live() && e.value.device == id)
            .map(|e| &e.value)
            .collect()
    }

    fn signal_maps(&self, id: SignalId) -> Vec<MapId> {
        self.maps
            .values()
            .filter(|e| e.is_live() && e.value.involves(id))
            .map(|e| e.value.id)
            .collect()
    }

    fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    fn create_map(&mut self, sources: &[SignalId], destination: SignalId) -> Result<MapId, GraphError> {
        if sources.is_empty() {
            return Err(GraphError::CreationFailed("map needs at least one source".into()));
        }
        if sources.len() > MAX_MAP_SOURCES {
            return Err(GraphError::CreationFailed(format!(
                "map has {} sources, at most {} allowed",
                sources.len(),
                MAX_MAP_SOURCES
            )));
        }
        let mut unique = sources.to_vec();
        unique.sort();
        unique.dedup();
        if unique.len() != sources.len() {
            return Err(GraphError::CreationFailed("duplicate source signal".into()));
        }
        if sources.contains(&destination) {
            return Err(GraphError::CreationFailed("destination is also a source".into()));
        }
        for id in sources.iter().chain(std::iter::once(&destination)) {
            if !self.signals.get(id).is_some_and(Entry::is_live) {
                return Err(GraphError::CreationFailed(format!("unknown signal {:?}", id)));
            }
        }
        if let Some(existing) = self.find_map(sources, destination) {
            return Err(GraphError::CreationFailed(format!(
                "map {} already connects these signals",
                existing
            )));
        }

        let id = MapId(MAP_ID_BASE | self.allocate());
        let map = Map {
            id,
            sources: sources.iter().map(|s| self.slot_for(*s)).collect(),
            destination: self.slot_for(destination),
            process_loc: Location::Source,
            protocol: Some(Protocol::Udp),
            expression: Some("y=x".to_string()),
            muted: false,
            is_local: true,
            properties: Properties::new(),
        };
        self.maps.insert(
            id,
            Entry {
                value: map,
                state: EntryState::Staged,
            },
        );
        Ok(id)
    }

    fn set_map_property(&mut self, id: MapId, property: MapProperty) -> Result<(), GraphError> {
        match self.maps.get(&id) {
            Some(entry) if entry.state != EntryState::Removed => {
                self.staged.entry(id).or_default().push(property);
                Ok(())
            }
            _ => Err(GraphError::UnknownMap(id)),
        }
    }

    fn push_map(&mut self, id: MapId) -> Result<(), GraphError> {
        let staged = self.staged.remove(&id).unwrap_or_default();
        let entry = match self.maps.get_mut(&id) {
            Some(entry) if entry.state != EntryState::Removed => entry,
            _ => return Err(GraphError::UnknownMap(id)),
        };

        let changed = !staged.is_empty();
        for property in staged {
            apply_property(&mut entry.value, property);
        }

        if entry.state == EntryState::Staged {
            entry.state = EntryState::Live;
            self.queue(Action::New, Target::Map(id));
        } else if changed {
            self.queue(Action::Modified, Target::Map(id));
        }
        Ok(())
    }

    fn release_map(&mut self, id: MapId) -> Result<(), GraphError> {
        match self.maps.get(&id).map(|e| e.state) {
            Some(EntryState::Live) => {
                self.drop_map(id, Action::Removed);
                Ok(())
            }
            Some(EntryState::Staged) => {
                self.maps.remove(&id);
                self.staged.remove(&id);
                Ok(())
            }
            _ => Err(GraphError::UnknownMap(id)),
        }
    }

    fn subscribe(&mut self, scope: SubscriptionScope) {
        if !self.subscriptions.contains(&scope) {
            self.subscriptions.push(scope);
        }
    }

    fn set_interface(&mut self, name: &str) -> Result<(), GraphError> {
        if name.trim().is_empty() {
            return Err(GraphError::Interface("empty interface name".into()));
        }
        self.interface = Some(name.to_string());
        Ok(())
    }

    fn poll(&mut self, timeout: Duration, bus: &mut ChangeBus) -> usize {
        let notices: Vec<Notice> = self.pending.drain(..).collect();
        if notices.is_empty() {
            if !timeout.is_zero() {
                std::thread::sleep(timeout);
            }
            return 0;
        }

        let graph: &MemoryGraph = self;
        for notice in &notices {
            match notice.target {
                Target::Device(id) => {
                    if let Some(entry) = graph.devices.get(&id) {
                        bus.publish(graph, notice.action, EntityRef::Device(&entry.value));
                    }
                }
                Target::Signal(id) => {
                    if let Some(entry) = graph.signals.get(&id) {
                        bus.publish(graph, notice.action, EntityRef::Signal(&entry.value));
                    }
                }
                Target::Map(id) => {
                    if let Some(entry) = graph.maps.get(&id) {
                        bus.publish(graph, notice.action, EntityRef::Map(&entry.value));
                    }
                }
            }
        }

        self.devices.retain(|_, e| e.state != EntryState::Removed);
        self.signals.retain(|_, e| e.state != EntryState::Removed);
        self.maps.retain(|_, e| e.state != EntryState::Removed);
        notices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{ChangeListener, EntityKind};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<(Action, String)>>>;

    struct Recorder(Log);

    impl ChangeListener for Recorder {
        fn on_change(&mut self, graph: &dyn Graph, action: Action, entity: EntityRef<'_>) {
            let label = match entity {
                EntityRef::Device(d) => format!("device:{}", d.name),
                EntityRef::Signal(s) => format!("signal:{}", s.name),
                EntityRef::Map(m) => format!("map:{}", graph.signal(m.destination.signal).unwrap().name),
            };
            self.0.lock().unwrap().push((action, label));
        }
    }

    fn recording_bus() -> (ChangeBus, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = ChangeBus::new();
        for kind in [EntityKind::Device, EntityKind::Signal, EntityKind::Map] {
            bus.register(kind, "recorder", Box::new(Recorder(log.clone())));
        }
        (bus, log)
    }

    fn two_devices() -> (MemoryGraph, SignalId, SignalId) {
        let mut graph = MemoryGraph::new();
        let synth = graph.add_device("synth");
        let filter = graph.add_device("filter");
        let freq = graph.add_signal(synth, "freq", Direction::Output, SignalType::Float32);
        let cutoff = graph.add_signal(filter, "cutoff", Direction::Input, SignalType::Float32);
        (graph, freq, cutoff)
    }

    #[test]
    fn test_poll_delivers_in_order() {
        let (mut graph, _, _) = two_devices();
        let (mut bus, log) = recording_bus();

        assert_eq!(graph.poll(Duration::ZERO, &mut bus), 4);
        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                (Action::New, "device:synth".to_string()),
                (Action::New, "device:filter".to_string()),
                (Action::New, "signal:freq".to_string()),
                (Action::New, "signal:cutoff".to_string()),
            ]
        );
    }

    #[test]
    fn test_modification_coalesced_while_pending() {
        let mut graph = MemoryGraph::new();
        let synth = graph.add_device("synth");
        graph.set_device_property(synth, "host", json!("a"));
        graph.set_device_property(synth, "host", json!("b"));
        assert_eq!(graph.pending_notifications(), 1);
    }

    #[test]
    fn test_staged_map_invisible_until_push() {
        let (mut graph, freq, cutoff) = two_devices();
        let id = graph.create_map(&[freq], cutoff).unwrap();
        assert!(graph.map(id).is_none());
        assert!(graph.signal_maps(freq).is_empty());

        graph
            .set_map_property(id, MapProperty::Expression(Some("y=x*2".into())))
            .unwrap();
        graph.push_map(id).unwrap();

        let map = graph.map(id).unwrap();
        assert_eq!(map.expression.as_deref(), Some("y=x*2"));
        assert_eq!(graph.signal_maps(freq), vec![id]);
    }

    #[test]
    fn test_create_then_push_yields_single_notice() {
        let (mut graph, freq, cutoff) = two_devices();
        let (mut bus, log) = recording_bus();
        graph.poll(Duration::ZERO, &mut bus);
        log.lock().unwrap().clear();

        let id = graph.create_map(&[freq], cutoff).unwrap();
        graph.set_map_property(id, MapProperty::Muted(true)).unwrap();
        graph.push_map(id).unwrap();
        graph.set_map_property(id, MapProperty::Muted(false)).unwrap();
        graph.push_map(id).unwrap();

        graph.poll(Duration::ZERO, &mut bus);
        assert_eq!(*log.lock().unwrap(), vec![(Action::New, "map:cutoff".to_string())]);
    }

    #[test]
    fn test_create_map_validation() {
        let (mut graph, freq, cutoff) = two_devices();
        assert!(matches!(graph.create_map(&[], cutoff), Err(GraphError::CreationFailed(_))));
        assert!(matches!(graph.create_map(&[freq, freq], cutoff), Err(GraphError::CreationFailed(_))));
        assert!(matches!(graph.create_map(&[freq], freq), Err(GraphError::CreationFailed(_))));
        assert!(matches!(
            graph.create_map(&[SignalId(999)], cutoff),
            Err(GraphError::CreationFailed(_))
        ));

        let id = graph.create_map(&[freq], cutoff).unwrap();
        graph.push_map(id).unwrap();
        assert!(matches!(graph.create_map(&[freq], cutoff), Err(GraphError::CreationFailed(_))));
    }

    #[test]
    fn test_remove_device_cascades() {
        let (mut graph, freq, cutoff) = two_devices();
        let id = graph.create_map(&[freq], cutoff).unwrap();
        graph.push_map(id).unwrap();

        let (mut bus, log) = recording_bus();
        graph.poll(Duration::ZERO, &mut bus);
        log.lock().unwrap().clear();

        let synth = graph.device_by_name("synth").unwrap().id;
        graph.expire_device(synth);
        graph.poll(Duration::ZERO, &mut bus);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                (Action::Expired, "map:cutoff".to_string()),
                (Action::Expired, "signal:freq".to_string()),
                (Action::Expired, "device:synth".to_string()),
            ]
        );
        assert!(graph.device(synth).is_none());
        assert!(graph.map(id).is_none());
        assert_eq!(graph.devices().len(), 1);
    }

    #[test]
    fn test_release_map() {
        let (mut graph, freq, cutoff) = two_devices();
        let id = graph.create_map(&[freq], cutoff).unwrap();
        graph.push_map(id).unwrap();

        graph.release_map(id).unwrap();
        assert!(graph.maps().is_empty());
        assert!(graph.signal_maps(cutoff).is_empty());
        // Still readable until reported.
        assert!(graph.map(id).is_some());

        let mut bus = ChangeBus::new();
        graph.poll(Duration::ZERO, &mut bus);
        assert!(graph.map(id).is_none());
        assert_eq!(graph.release_map(id), Err(GraphError::UnknownMap(id)));
    }

    #[test]
    fn test_slots_inherit_signal_bounds() {
        let (mut graph, freq, cutoff) = two_devices();
        graph.set_signal_property(cutoff, "min", json!(20.0));
        graph.set_signal_property(cutoff, "max", json!(20000.0));
        let id = graph.create_map(&[freq], cutoff).unwrap();
        graph.push_map(id).unwrap();

        let map = graph.map(id).unwrap();
        assert_eq!(map.destination.min, Some(json!(20.0)));
        assert_eq!(map.destination.max, Some(json!(20000.0)));
        assert_eq!(map.sources[0].min, None);
    }

    #[test]
    fn test_subscribe_and_interface() {
        let mut graph = MemoryGraph::new();
        graph.subscribe(SubscriptionScope::AllDevices);
        graph.subscribe(SubscriptionScope::AllDevices);
        assert_eq!(graph.subscriptions(), &[SubscriptionScope::AllDevices]);

        assert!(graph.set_interface("").is_err());
        graph.set_interface("lo0").unwrap();
        assert_eq!(graph.interface(), Some("lo0"));
    }
}
