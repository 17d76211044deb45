//! Local address resolution: which IPv4 address do we announce from?

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::{bail, Context, Result};

/// Interfaces never used for discovery, even when named explicitly.
const DENIED_INTERFACES: [&str; 2] = ["lo", "docker0"];

/// Find this node's externally reachable IPv4 address.
///
/// An empty `interface` means the first usable interface.
pub fn local_ipv4(interface: &str) -> Result<Ipv4Addr> {
    let mut names = HashSet::new();
    let mut candidates = Vec::new();
    for ifa in nix::ifaddrs::getifaddrs().context("failed to list interfaces")? {
        names.insert(ifa.interface_name.clone());
        let Some(sin) = ifa.address.as_ref().and_then(|a| a.as_sockaddr_in()) else {
            continue;
        };
        candidates.push((ifa.interface_name, *SocketAddrV4::from(*sin).ip()));
    }

    if !interface.is_empty() && !names.contains(interface) {
        bail!("interface '{}' not found", interface);
    }
    select_ipv4(candidates, interface).context("no external interface")
}

/// Pick the first IPv4 address on an allowed interface.
pub fn select_ipv4(
    candidates: impl IntoIterator<Item = (String, Ipv4Addr)>,
    interface: &str,
) -> Option<Ipv4Addr> {
    candidates
        .into_iter()
        .filter(|(name, _)| interface.is_empty() || name == interface)
        .filter(|(name, _)| !DENIED_INTERFACES.contains(&name.as_str()))
        .map(|(_, ip)| ip)
        .find(|ip| !ip.is_loopback() && !ip.is_unspecified())
}
