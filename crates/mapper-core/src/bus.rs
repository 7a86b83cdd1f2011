//! Change notification bus.
//!
//! The graph library reports changes as coarse add/modify/remove/expire
//! notifications. Instead of raw callbacks, the graph publishes them into a
//! [`ChangeBus`] during [`Graph::poll`](crate::graph::Graph::poll), and typed
//! listeners subscribe to the entity kinds they care about.

use crate::graph::{Device, Graph, Map, Signal};

/// Kind of graph entity a notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Device,
    Signal,
    Map,
}

/// What happened to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    New,
    Modified,
    Removed,
    Expired,
}

impl Action {
    /// True for notifications that mean the entity is gone.
    pub fn is_removal(&self) -> bool {
        matches!(self, Action::Removed | Action::Expired)
    }
}

/// Borrowed view of the entity a notification refers to.
///
/// Removed entities are still readable while their notification is delivered.
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Device(&'a Device),
    Signal(&'a Signal),
    Map(&'a Map),
}

impl EntityRef<'_> {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Device(_) => EntityKind::Device,
            EntityRef::Signal(_) => EntityKind::Signal,
            EntityRef::Map(_) => EntityKind::Map,
        }
    }
}

/// A typed listener for graph changes.
pub trait ChangeListener: Send {
    /// Called synchronously from within the graph's poll, in notification order.
    fn on_change(&mut self, graph: &dyn Graph, action: Action, entity: EntityRef<'_>);
}

struct Registration {
    kind: EntityKind,
    name: &'static str,
    listener: Box<dyn ChangeListener>,
}

/// Routes change notifications to listeners registered per entity kind.
#[derive(Default)]
pub struct ChangeBus {
    registrations: Vec<Registration>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one entity kind.
    ///
    /// Registering again under the same kind and name replaces the previous
    /// listener, so re-arming after a reconnect never duplicates events.
    pub fn register(
        &mut self,
        kind: EntityKind,
        name: &'static str,
        listener: Box<dyn ChangeListener>,
    ) {
        if let Some(existing) = self
            .registrations
            .iter_mut()
            .find(|r| r.kind == kind && r.name == name)
        {
            existing.listener = listener;
        } else {
            self.registrations.push(Registration {
                kind,
                name,
                listener,
            });
        }
    }

    /// Remove every listener registered under `name`.
    pub fn unregister(&mut self, name: &str) {
        self.registrations.retain(|r| r.name != name);
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Deliver one notification to every listener of the entity's kind,
    /// in registration order.
    pub fn publish(&mut self, graph: &dyn Graph, action: Action, entity: EntityRef<'_>) {
        let kind = entity.kind();
        for registration in self.registrations.iter_mut().filter(|r| r.kind == kind) {
            registration.listener.on_change(graph, action, entity);
        }
    }
}

impl std::fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.registrations.iter().map(|r| (r.kind, r.name)))
            .finish()
    }
}
