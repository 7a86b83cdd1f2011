//! Command processor.
//!
//! Validates and applies inbound commands against the graph. Every command
//! is resolved before anything is mutated, so a failing command leaves the
//! graph untouched. Failures are terminal for that command only and produce
//! no event; the caller logs them.
//!
//! Effects of graph mutations reach clients through the event dispatcher on
//! the next poll, not through the command's reply.

use serde_json::{Map as JsonMap, Value};
use thiserror::Error;
use tracing::{debug, info};

use mapper_core::normalize::{device_snapshot, map_snapshot, signal_snapshot};
use mapper_core::props::translate_all;
use mapper_core::resolve::{resolve_device, resolve_endpoints, resolve_map};
use mapper_core::{
    Graph, GraphError, InterfaceError, MapId, ResolveError, StorageError, SubscriptionScope,
};
use mapper_protocol::{InboundCommand, LoadRequest, MapRequest, OutboundEvent, SubscribeTarget};

use crate::context::MirrorContext;

/// Errors that can occur while processing a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Interface(#[from] InterfaceError),

    /// A `set_map` payload without `srcs`/`src` or `dst`.
    #[error("Map properties carry no {0} field")]
    MissingRouting(&'static str),

    /// A `set_map` routing field holding something other than signal names.
    #[error("Map properties carry a malformed {0} field")]
    InvalidRouting(&'static str),
}

/// Replies for the requesting client.
pub type Reply = Vec<OutboundEvent>;

impl<G: Graph> MirrorContext<G> {
    /// Apply one inbound command.
    pub fn execute(&mut self, command: InboundCommand) -> Result<Reply, CommandError> {
        debug!("Executing {}", command.name());
        match command {
            InboundCommand::AddDevices => Ok(vec![OutboundEvent::AddDevices(device_snapshot(&self.graph))]),
            InboundCommand::AddSignals => Ok(vec![OutboundEvent::AddSignals(signal_snapshot(&self.graph))]),
            InboundCommand::AddMaps => Ok(vec![OutboundEvent::AddMaps(map_snapshot(&self.graph))]),
            InboundCommand::Subscribe(target) => self.subscribe(target),
            InboundCommand::SetMap(properties) => self.set_map(properties),
            InboundCommand::Map(request) => self.create_map(request),
            InboundCommand::Unmap(request) => self.release_map(request),
            InboundCommand::Refresh => {
                self.refresh();
                Ok(Vec::new())
            }
            InboundCommand::Save(request) => self.save(&request.dev),
            InboundCommand::Load(request) => self.load(request),
            InboundCommand::SelectInterface(name) => self.select_interface(&name),
            InboundCommand::GetInterfaces => self.get_interfaces(),
        }
    }

    fn subscribe(&mut self, target: SubscribeTarget) -> Result<Reply, CommandError> {
        let scope = match target {
            SubscribeTarget::AllDevices => SubscriptionScope::AllDevices,
            SubscribeTarget::Device(name) => SubscriptionScope::Device(resolve_device(&self.graph, &name)?.id),
        };
        self.graph.subscribe(scope);
        Ok(Vec::new())
    }

    fn create_map(&mut self, request: MapRequest) -> Result<Reply, CommandError> {
        let (srcs, dst) = resolve_endpoints(&self.graph, &request.sources, &request.destination)?;
        let srcs: Vec<_> = srcs.iter().map(|s| s.id).collect();
        let dst = dst.id;

        let id = self.graph.create_map(&srcs, dst)?;
        info!("Created map {:?} -> {}", request.sources, request.destination);

        if let Some(properties) = &request.properties {
            self.write_properties(id, properties)?;
        }
        self.graph.push_map(id)?;
        Ok(Vec::new())
    }

    fn release_map(&mut self, request: MapRequest) -> Result<Reply, CommandError> {
        // Releasing a map that is not there is a no-op.
        let id = match resolve_map(&self.graph, &request.sources, &request.destination) {
            Ok(map) => map.id,
            Err(e) => {
                debug!("Nothing to release: {}", e);
                return Ok(Vec::new());
            }
        };
        self.graph.release_map(id)?;
        info!("Released map {:?} -> {}", request.sources, request.destination);
        Ok(Vec::new())
    }

    fn set_map(&mut self, properties: JsonMap<String, Value>) -> Result<Reply, CommandError> {
        let sources: Vec<String> = match (properties.get("srcs"), properties.get("src")) {
            (Some(Value::Array(srcs)), _) => srcs
                .iter()
                .map(|s| s.as_str().map(str::to_string))
                .collect::<Option<_>>()
                .ok_or(CommandError::InvalidRouting("srcs"))?,
            (_, Some(Value::String(src))) => vec![src.clone()],
            _ => return Err(CommandError::MissingRouting("srcs")),
        };
        let destination = properties
            .get("dst")
            .and_then(Value::as_str)
            .ok_or(CommandError::MissingRouting("dst"))?;

        let id = resolve_map(&self.graph, &sources, destination)?.id;
        self.write_properties(id, &properties)?;
        self.graph.push_map(id)?;
        Ok(Vec::new())
    }

    /// Stage the translated writes of a payload. Routing keys are skipped.
    fn write_properties(&mut self, id: MapId, properties: &JsonMap<String, Value>) -> Result<(), CommandError> {
        for property in translate_all(properties) {
            self.graph.set_map_property(id, property)?;
        }
        Ok(())
    }

    fn save(&mut self, device: &str) -> Result<Reply, CommandError> {
        let document = self.storage.serialise(&self.graph, device)?;
        info!("Saved maps of {}", device);
        Ok(vec![OutboundEvent::Save {
            filename: format!("{}.json", device),
            document,
        }])
    }

    fn load(&mut self, request: LoadRequest) -> Result<Reply, CommandError> {
        let created = self.storage.deserialise(
            &mut self.graph,
            &request.sources,
            &request.destinations,
            &request.loading,
        )?;
        info!("Loaded {} maps", created);
        Ok(Vec::new())
    }

    fn select_interface(&mut self, name: &str) -> Result<Reply, CommandError> {
        self.graph.set_interface(name)?;
        self.interfaces.set_active(name);
        info!("Switched to network interface {}", name);
        self.broadcast(OutboundEvent::SetIface(name.to_string()));
        Ok(Vec::new())
    }

    fn get_interfaces(&mut self) -> Result<Reply, CommandError> {
        let available = self.interfaces.refresh(self.enumerator.as_ref())?.to_vec();
        self.broadcast(OutboundEvent::AvailableInterfaces(available));
        self.broadcast(OutboundEvent::ActiveInterface(self.interfaces.active().to_string()));
        Ok(Vec::new())
    }
}
