//! Network interface configuration
//!
//! A `NetworkInterface` describes one attached device as the IP layer sees
//! it: its local address and netmask, its hardware address and its MTU.

use std::fmt;
use std::net::Ipv4Addr;

pub const DEFAULT_MTU: usize = 1500;

/// Identifier of an attached link-layer device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Link-layer (Ethernet) hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HwAddr(pub [u8; 6]);

impl fmt::Display for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Network interface as seen by the IP layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub id: DeviceId,
    /// Local IPv4 address
    pub local_addr: Ipv4Addr,
    /// Network mask
    pub netmask: Ipv4Addr,
    pub hw_addr: HwAddr,
    /// Largest datagram the link carries, IP header included
    pub mtu: usize,
}

impl NetworkInterface {
    /// Create a new network interface with the specified IP address and netmask
    pub fn new(id: DeviceId, local_addr: Ipv4Addr, netmask: Ipv4Addr, hw_addr: HwAddr) -> Self {
        NetworkInterface {
            id,
            local_addr,
            netmask,
            hw_addr,
            mtu: DEFAULT_MTU,
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Check whether a destination address designates this host
    ///
    /// Only the configured local address matches; broadcasts for the
    /// attached network are relayed like any other remote destination.
    pub fn is_for_us(&self, dst_addr: &Ipv4Addr) -> bool {
        *dst_addr == self.local_addr
    }

    /// Get network address
    pub fn network_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.local_addr) & u32::from(self.netmask))
    }
}
