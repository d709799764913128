//! Route lookup
//!
//! The IP layer only reads routes. `RouteLookup` is the seam a routing table
//! manager plugs into; `RouteTable` is a small longest-prefix-match table.

use std::net::Ipv4Addr;

use crate::iface::interface::{DeviceId, NetworkInterface};

/// A rule mapping destinations to an egress device and next hop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub device: DeviceId,
    /// Gateway to relay through; `None` for directly attached networks
    pub gateway: Option<Ipv4Addr>,
}

impl RouteEntry {
    /// Route to the network a local interface is attached to
    pub fn on_link(iface: &NetworkInterface) -> Self {
        RouteEntry {
            destination: iface.network_address(),
            netmask: iface.netmask,
            device: iface.id,
            gateway: None,
        }
    }

    /// Default route through `gateway`
    pub fn default_via(device: DeviceId, gateway: Ipv4Addr) -> Self {
        RouteEntry {
            destination: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
            device,
            gateway: Some(gateway),
        }
    }

    pub fn matches(&self, dst: &Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(*dst) & mask == u32::from(self.destination) & mask
    }

    pub fn prefix_len(&self) -> u32 {
        u32::from(self.netmask).count_ones()
    }

    /// The protocol address whose hardware address the frame is sent to
    pub fn next_hop(&self, dst: Ipv4Addr) -> Ipv4Addr {
        self.gateway.unwrap_or(dst)
    }
}

/// Maps a destination address to at most one route
pub trait RouteLookup {
    fn lookup(&self, dst: Ipv4Addr) -> Option<RouteEntry>;
}

/// Static routing table with longest-prefix matching
#[derive(Debug, Default, Clone)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: RouteEntry) {
        self.entries.push(entry);
    }

    /// Remove every route for the given destination network
    pub fn remove(&mut self, destination: Ipv4Addr, netmask: Ipv4Addr) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.destination == destination && e.netmask == netmask));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RouteLookup for RouteTable {
    fn lookup(&self, dst: Ipv4Addr) -> Option<RouteEntry> {
        self.entries
            .iter()
            .filter(|e| e.matches(&dst))
            .max_by_key(|e| e.prefix_len())
            .copied()
    }
}
