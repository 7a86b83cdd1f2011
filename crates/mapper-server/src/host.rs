//! Host network interface enumeration.

use if_addrs::IfAddr;

use mapper_core::{InterfaceEnumerator, InterfaceError};

/// Interfaces of the running host, read with `getifaddrs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostInterfaces;

impl InterfaceEnumerator for HostInterfaces {
    fn ipv4_interfaces(&self) -> Result<Vec<String>, InterfaceError> {
        let mut names: Vec<String> = Vec::new();
        for iface in if_addrs::get_if_addrs()? {
            if matches!(iface.addr, IfAddr::V4(_)) && !names.contains(&iface.name) {
                names.push(iface.name);
            }
        }
        Ok(names)
    }
}
