//! # mapper-core
//!
//! Core model of the signal-graph mirror.
//!
//! This crate provides:
//! - The graph library boundary ([`Graph`]) and its live entity types
//! - A change bus delivering graph notifications to named listeners
//! - Canonical signal and map keys
//! - The property normalizer (live entity to transmissible record)
//! - The entity resolver (key to live entity)
//! - The property write translator (UI payload to typed map writes)
//! - Map configuration storage and interface selection state
//! - An in-memory graph implementation
//!
//! This crate is intentionally runtime-agnostic and contains no async code.

pub mod bus;
pub mod graph;
pub mod iface;
pub mod key;
pub mod memory;
pub mod model;
pub mod normalize;
pub mod props;
pub mod resolve;
pub mod storage;

pub use bus::{Action, ChangeBus, ChangeListener, EntityKind, EntityRef};
pub use graph::*;
pub use iface::{InterfaceEnumerator, InterfaceError, InterfaceSelector, StaticInterfaces};
pub use key::{KeyError, MapKey, SignalKey};
pub use memory::MemoryGraph;
pub use model::{DeviceRecord, MapRecord, SignalRecord, Status};
pub use props::PropValue;
pub use resolve::ResolveError;
pub use storage::{JsonMapStorage, MapStorage, StorageError};
