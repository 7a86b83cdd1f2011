//! Mirror context.
//!
//! Everything the mirror needs to serve commands and relay changes, passed
//! explicitly instead of living in globals: the graph handle, the change bus,
//! the interface selector and the storage/enumeration collaborators.
//!
//! A context is owned by exactly one thread, the one that polls the graph.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use mapper_core::{
    ChangeBus, Graph, InterfaceEnumerator, InterfaceSelector, JsonMapStorage, MapStorage,
    SubscriptionScope,
};
use mapper_protocol::OutboundEvent;

use crate::dispatcher::{EventDispatcher, DISPATCHER};
use crate::host::HostInterfaces;

/// Graph handle plus the state and collaborators around it.
pub struct MirrorContext<G: Graph> {
    pub(crate) graph: G,
    bus: ChangeBus,
    pub(crate) interfaces: InterfaceSelector,
    pub(crate) enumerator: Box<dyn InterfaceEnumerator>,
    pub(crate) storage: Box<dyn MapStorage>,
    pub(crate) events: broadcast::Sender<OutboundEvent>,
}

impl<G: Graph> MirrorContext<G> {
    /// Create a context with host interface enumeration and JSON storage.
    pub fn new(graph: G, events: broadcast::Sender<OutboundEvent>) -> Self {
        Self {
            graph,
            bus: ChangeBus::new(),
            interfaces: InterfaceSelector::new(),
            enumerator: Box::new(HostInterfaces),
            storage: Box::new(JsonMapStorage::new()),
            events,
        }
    }

    pub fn with_enumerator(mut self, enumerator: impl InterfaceEnumerator + 'static) -> Self {
        self.enumerator = Box::new(enumerator);
        self
    }

    pub fn with_storage(mut self, storage: impl MapStorage + 'static) -> Self {
        self.storage = Box::new(storage);
        self
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    /// Mutable access to the graph, for driving its network side.
    pub fn graph_mut(&mut self) -> &mut G {
        &mut self.graph
    }

    pub fn interfaces(&self) -> &InterfaceSelector {
        &self.interfaces
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// A new receiver for outbound events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<OutboundEvent> {
        self.events.subscribe()
    }

    /// Subscribe to all devices and (re-)register the dispatcher for every
    /// entity kind. Safe to call repeatedly.
    pub fn refresh(&mut self) {
        self.graph.subscribe(SubscriptionScope::AllDevices);
        for kind in EventDispatcher::kinds() {
            self.bus
                .register(kind, DISPATCHER, Box::new(EventDispatcher::new(self.events.clone())));
        }
        debug!("Change listeners armed ({} registered)", self.bus.len());
    }

    /// Read the host interfaces and bind the graph to `preferred`, or to the
    /// default choice when no preference is given.
    pub fn init_interfaces(&mut self, preferred: Option<&str>) {
        if let Err(e) = self.interfaces.refresh(self.enumerator.as_ref()) {
            warn!("{}", e);
        }

        let chosen = match preferred {
            Some(name) => {
                if !self.interfaces.available().iter().any(|a| a == name) {
                    warn!("Interface {} has no IPv4 address", name);
                }
                self.interfaces.set_active(name);
                Some(name.to_string())
            }
            None => self.interfaces.choose_default().map(str::to_string),
        };

        match chosen {
            Some(name) => match self.graph.set_interface(&name) {
                Ok(()) => info!("Using network interface {}", name),
                Err(e) => warn!("Failed to bind interface {}: {}", name, e),
            },
            None => warn!("No network interface available"),
        }
    }

    /// Service the graph for up to `timeout`, dispatching its notifications.
    pub fn poll(&mut self, timeout: Duration) -> usize {
        self.graph.poll(timeout, &mut self.bus)
    }

    /// Send an event to every connected client.
    pub(crate) fn broadcast(&self, event: OutboundEvent) {
        let _ = self.events.send(event);
    }
}

impl<G: Graph> std::fmt::Debug for MirrorContext<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorContext")
            .field("bus", &self.bus)
            .field("interfaces", &self.interfaces)
            .finish_non_exhaustive()
    }
}
