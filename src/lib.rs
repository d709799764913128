//! IPv4 network-layer core for a small TCP/IP stack
//!
//! This library provides the IP processing pipeline:
//! - IPv4 header validation and checksum handling
//! - Fragment reassembly and outbound fragmentation
//! - Forwarding with next-hop hardware address resolution
//! - Protocol dispatch to upper-layer handlers

pub mod error;
pub mod iface;
pub mod network;
pub mod transport;

// Re-export commonly used types
pub use error::IpError;
pub use iface::arp::ArpCache;
pub use iface::interface::{DeviceId, HwAddr, NetworkInterface};
pub use iface::ip::{Disposition, IpConfig, IpLayer, IpStats, LinkLayer, Output};
pub use iface::route::{RouteEntry, RouteLookup, RouteTable};
pub use network::buffer::PacketBuffer;
pub use network::fragment::{FragmentKey, FragmentReassembler, Reassemble, Reassembly};
pub use network::ipv4::{Datagram, Ipv4Header};
pub use transport::{ProtocolDemux, ProtocolHandler};
