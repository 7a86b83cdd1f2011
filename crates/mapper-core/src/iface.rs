//! Network interface selection state.
//!
//! Tracks which host interface the graph talks through and which interfaces
//! are available. Enumerating host interfaces is platform work and lives
//! behind [`InterfaceEnumerator`].

use serde::{Deserialize, Serialize};

/// Interface names tried in order when choosing a default.
///
/// This is a naming heuristic, not a guarantee: macOS names the secondary
/// (often wireless) port `en1`, the primary `en0` and loopback `lo0`; the
/// linux-style names cover the same roles elsewhere.
pub const DEFAULT_PREFERENCES: &[&str] = &["en1", "en0", "lo0", "wlan0", "eth0", "lo"];

/// Errors that can occur while enumerating host interfaces.
#[derive(Debug, thiserror::Error)]
pub enum InterfaceError {
    #[error("Failed to enumerate interfaces: {0}")]
    Enumeration(#[from] std::io::Error),
}

/// Source of host network interfaces.
pub trait InterfaceEnumerator: Send {
    /// Names of interfaces with IPv4 connectivity, without duplicates.
    fn ipv4_interfaces(&self) -> Result<Vec<String>, InterfaceError>;
}

/// A fixed interface list, for tests and hosts without enumeration.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces(pub Vec<String>);

impl InterfaceEnumerator for StaticInterfaces {
    fn ipv4_interfaces(&self) -> Result<Vec<String>, InterfaceError> {
        Ok(self.0.clone())
    }
}

/// Active and available interface state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceSelector {
    active: String,
    available: Vec<String>,
    #[serde(skip)]
    preferences: Vec<String>,
}

impl Default for InterfaceSelector {
    fn default() -> Self {
        Self::with_preferences(DEFAULT_PREFERENCES)
    }
}

impl InterfaceSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preferences(preferences: &[&str]) -> Self {
        Self {
            active: String::new(),
            available: Vec::new(),
            preferences: preferences.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// The active interface name; empty until one is chosen.
    pub fn active(&self) -> &str {
        &self.active
    }

    pub fn available(&self) -> &[String] {
        &self.available
    }

    pub fn set_available(&mut self, interfaces: Vec<String>) {
        self.available = interfaces;
    }

    pub fn set_active(&mut self, name: &str) {
        self.active = name.to_string();
    }

    /// Pick the first preferred interface that is available, else the first
    /// available one. Keeps the current choice when nothing is available.
    ///
    /// Returns the chosen interface, if any.
    pub fn choose_default(&mut self) -> Option<&str> {
        let chosen = self
            .preferences
            .iter()
            .find(|p| self.available.contains(p))
            .or_else(|| self.available.first())
            .cloned();

        if let Some(name) = chosen {
            self.active = name;
        }
        if self.active.is_empty() {
            None
        } else {
            Some(&self.active)
        }
    }

    /// Refresh the available list from an enumerator.
    pub fn refresh(&mut self, enumerator: &dyn InterfaceEnumerator) -> Result<&[String], InterfaceError> {
        self.available = enumerator.ipv4_interfaces()?;
        Ok(&self.available)
    }
}
