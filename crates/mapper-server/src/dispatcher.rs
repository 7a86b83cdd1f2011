//! Event dispatcher.
//!
//! Listens on the change bus and turns every graph notification into one
//! outbound event, fanned out to all connected clients. No buffering or
//! reordering happens here: events are sent in the order the graph delivers
//! them.

use tokio::sync::broadcast;
use tracing::trace;

use mapper_core::normalize::{device_record, map_record, signal_record};
use mapper_core::{Action, ChangeListener, EntityKind, EntityRef, Graph};
use mapper_protocol::OutboundEvent;

/// Name the dispatcher registers under on the change bus.
pub const DISPATCHER: &str = "event-dispatcher";

/// The outbound event for one graph notification.
///
/// `New` and `Modified` become an `add_*` event with a single-element list;
/// `Removed` and `Expired` become a `del_*` event with the bare record.
pub fn event_for(graph: &dyn Graph, action: Action, entity: EntityRef<'_>) -> OutboundEvent {
    let removal = action.is_removal();
    match entity {
        EntityRef::Device(device) => {
            let record = device_record(device);
            if removal {
                OutboundEvent::DelDevice(record)
            } else {
                OutboundEvent::AddDevices(vec![record])
            }
        }
        EntityRef::Signal(signal) => {
            let record = signal_record(graph, signal);
            if removal {
                OutboundEvent::DelSignal(record)
            } else {
                OutboundEvent::AddSignals(vec![record])
            }
        }
        EntityRef::Map(map) => {
            let record = map_record(graph, map);
            if removal {
                OutboundEvent::DelMap(record)
            } else {
                OutboundEvent::AddMaps(vec![record])
            }
        }
    }
}

/// Change listener forwarding normalized events to a broadcast channel.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    events: broadcast::Sender<OutboundEvent>,
}

impl EventDispatcher {
    pub fn new(events: broadcast::Sender<OutboundEvent>) -> Self {
        Self { events }
    }

    /// Entity kinds the dispatcher listens to.
    pub fn kinds() -> [EntityKind; 3] {
        [EntityKind::Device, EntityKind::Signal, EntityKind::Map]
    }
}

impl ChangeListener for EventDispatcher {
    fn on_change(&mut self, graph: &dyn Graph, action: Action, entity: EntityRef<'_>) {
        let event = event_for(graph, action, entity);
        trace!("{:?} {:?} -> {}", action, entity.kind(), event.name());
        // Sending only fails when no client is connected.
        let _ = self.events.send(event);
    }
}
