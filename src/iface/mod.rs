//! IP layer processing
//!
//! This module ties the wire formats to the rest of the stack:
//! - Interface configuration
//! - Route lookup
//! - Next-hop resolution cache with pending queues
//! - Input path: validation, reassembly, delivery and forwarding
//! - Output path: fragmentation, resolution and transmission

pub mod arp;
pub mod interface;
pub mod ip;
pub mod ipv4;
pub mod route;

// Re-export commonly used items
pub use interface::{DeviceId, HwAddr, NetworkInterface};
pub use ip::{Disposition, IpConfig, IpLayer, IpStats, LinkLayer, Output};
pub use ipv4::validate;
pub use route::{RouteEntry, RouteLookup, RouteTable};
