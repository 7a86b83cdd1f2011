//! # mapper-server
//!
//! Webmapper graph mirror server.
//!
//! The server owns a graph on a dedicated poll thread, relays every graph
//! change to connected WebSocket clients as normalized events, and applies
//! the clients' commands back onto the graph.

pub mod commands;
pub mod context;
pub mod dispatcher;
pub mod host;
pub mod server;

pub use commands::CommandError;
pub use context::MirrorContext;
pub use dispatcher::EventDispatcher;
pub use host::HostInterfaces;
pub use server::{CommandHandle, MapperServer, ServerConfig, ServerError};

pub use mapper_core::{Graph, MemoryGraph};
pub use mapper_protocol::{InboundCommand, OutboundEvent};
