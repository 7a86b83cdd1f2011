//! Canonical entity keys.
//!
//! The UI never sees graph ids for devices and signals; it addresses them by
//! human-readable keys:
//! - Signal: `"device/signal"`, split on the first `/`
//! - Map: `"src->dst"` for one source, `"[src1,src2]->[dst]"` for several
//!
//! Map keys sort their sources, so a key is reconstructible purely from the
//! unordered source set plus the destination.

use std::fmt;
use std::str::FromStr;

/// A parsed `device/signal` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalKey {
    pub device: String,
    pub signal: String,
}

impl SignalKey {
    pub fn new(device: impl Into<String>, signal: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            signal: signal.into(),
        }
    }

    /// Parse a full signal name.
    ///
    /// Only the first `/` separates device from signal; signal names may
    /// themselves contain `/`.
    pub fn parse(full_name: &str) -> Result<Self, KeyError> {
        match full_name.split_once('/') {
            Some((device, signal)) if !device.is_empty() && !signal.is_empty() => {
                Ok(Self::new(device, signal))
            }
            _ => Err(KeyError::Malformed(full_name.to_string())),
        }
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.signal)
    }
}

impl FromStr for SignalKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A map addressed by its endpoint set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MapKey {
    /// Source full names, lexicographically sorted.
    sources: Vec<String>,
    destination: String,
}

impl MapKey {
    /// Build a key from sources in any order.
    pub fn new<S: AsRef<str>>(sources: &[S], destination: &str) -> Self {
        let mut sources: Vec<String> = sources.iter().map(|s| s.as_ref().to_string()).collect();
        sources.sort();
        Self {
            sources,
            destination: destination.to_string(),
        }
    }

    /// Sorted source full names.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// True if the key uses the bracketed multi-source form.
    pub fn is_convergent(&self) -> bool {
        self.sources.len() > 1
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_convergent() {
            write!(f, "[{}]->[{}]", self.sources.join(","), self.destination)
        } else {
            let src = self.sources.first().map(String::as_str).unwrap_or_default();
            write!(f, "{}->{}", src, self.destination)
        }
    }
}

impl FromStr for MapKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lhs, rhs) = s
            .split_once("->")
            .ok_or_else(|| KeyError::Malformed(s.to_string()))?;

        let unbracket = |part: &str| -> Option<String> {
            part.strip_prefix('[')
                .and_then(|p| p.strip_suffix(']'))
                .map(String::from)
        };

        let (sources, destination) = match (unbracket(lhs), unbracket(rhs)) {
            (Some(srcs), Some(dst)) => (
                srcs.split(',').map(String::from).collect::<Vec<_>>(),
                dst,
            ),
            (None, None) => (vec![lhs.to_string()], rhs.to_string()),
            _ => return Err(KeyError::Malformed(s.to_string())),
        };

        for name in sources.iter().chain(std::iter::once(&destination)) {
            SignalKey::parse(name).map_err(|_| KeyError::Malformed(s.to_string()))?;
        }

        Ok(MapKey::new(&sources, &destination))
    }
}

/// Errors that can occur when parsing a key.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KeyError {
    #[error("Malformed key: {0:?}")]
    Malformed(String),
}
