//! Entity resolution.
//!
//! Turns the keys the UI speaks in back into live graph handles. Maps have no
//! direct multi-key index in the graph, so a map is found by intersecting the
//! per-signal map lists of all its endpoints and then requiring an exact
//! match of the endpoint set.

use thiserror::Error;

use crate::graph::{Device, Graph, Map, MapId, Signal};
use crate::key::{MapKey, SignalKey};

/// Errors that can occur when resolving keys to live entities.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("Malformed signal key {0:?}")]
    Malformed(String),

    #[error("Could not find device {0:?}")]
    DeviceNotFound(String),

    #[error("Could not find signal {signal:?} on device {device:?}")]
    SignalNotFound { device: String, signal: String },

    #[error("{sources:?} and {destination:?} not found on network: {cause}")]
    Endpoints {
        sources: Vec<String>,
        destination: String,
        cause: Box<ResolveError>,
    },

    #[error("No map from {sources:?} to {destination:?}")]
    MapNotFound {
        sources: Vec<String>,
        destination: String,
    },
}

/// Find a live device by exact name.
pub fn resolve_device<'g>(graph: &'g dyn Graph, name: &str) -> Result<&'g Device, ResolveError> {
    graph
        .devices()
        .into_iter()
        .find(|d| d.name == name)
        .ok_or_else(|| ResolveError::DeviceNotFound(name.to_string()))
}

/// Find a live signal by its `device/signal` full name.
pub fn resolve_signal<'g>(graph: &'g dyn Graph, full_name: &str) -> Result<&'g Signal, ResolveError> {
    let key = SignalKey::parse(full_name).map_err(|_| ResolveError::Malformed(full_name.to_string()))?;
    let device = resolve_device(graph, &key.device)?;

    graph
        .device_signals(device.id)
        .into_iter()
        .find(|s| s.name == key.signal)
        .ok_or(ResolveError::SignalNotFound {
            device: key.device,
            signal: key.signal,
        })
}

/// Resolve all map endpoints, failing on the first key that does not resolve.
pub fn resolve_endpoints<'g, S: AsRef<str>>(
    graph: &'g dyn Graph,
    sources: &[S],
    destination: &str,
) -> Result<(Vec<&'g Signal>, &'g Signal), ResolveError> {
    let endpoints_error = |cause: ResolveError| ResolveError::Endpoints {
        sources: sources.iter().map(|s| s.as_ref().to_string()).collect(),
        destination: destination.to_string(),
        cause: Box::new(cause),
    };

    let srcs = sources
        .iter()
        .map(|k| resolve_signal(graph, k.as_ref()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(endpoints_error)?;
    let dst = resolve_signal(graph, destination).map_err(endpoints_error)?;
    Ok((srcs, dst))
}

/// Find the map connecting exactly `sources` (in any order) to `destination`.
///
/// If the graph ever holds two maps with the same endpoint set, the first
/// one in the destination's map order is returned and a warning is logged.
pub fn resolve_map<'g, S: AsRef<str>>(
    graph: &'g dyn Graph,
    sources: &[S],
    destination: &str,
) -> Result<&'g Map, ResolveError> {
    let (srcs, dst) = resolve_endpoints(graph, sources, destination)?;

    let mut candidates: Vec<MapId> = graph.signal_maps(dst.id);
    for src in &srcs {
        let src_maps = graph.signal_maps(src.id);
        candidates.retain(|id| src_maps.contains(id));
    }

    let mut wanted: Vec<_> = srcs.iter().map(|s| s.id).collect();
    wanted.sort();
    wanted.dedup();

    let mut matches = candidates.into_iter().filter_map(|id| graph.map(id)).filter(|map| {
        let mut have: Vec<_> = map.sources.iter().map(|slot| slot.signal).collect();
        have.sort();
        have.dedup();
        map.destination.signal == dst.id && have == wanted
    });

    let found = matches.next().ok_or_else(|| ResolveError::MapNotFound {
        sources: sources.iter().map(|s| s.as_ref().to_string()).collect(),
        destination: destination.to_string(),
    })?;

    if let Some(other) = matches.next() {
        tracing::warn!(
            "Ambiguous map {}: maps {} and {} share endpoints, using {}",
            MapKey::new(sources, destination),
            found.id,
            other.id,
            found.id
        );
    }

    Ok(found)
}
