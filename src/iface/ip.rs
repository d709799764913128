//! The IP layer and its output path
//!
//! `IpLayer` owns the state the pipeline needs (interfaces, resolution
//! cache, reassembly store, protocol table) and reaches the rest of the
//! stack through two seams: a `RouteLookup` for routing decisions and a
//! `LinkLayer` for transmission and address-resolution requests. All calls
//! run to completion; events from the link layer (a learned address, a
//! failed resolution, a reassembly timer) come back in as fresh calls.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::IpError;
use crate::iface::arp::{ArpCache, Lookup, DEFAULT_QUEUE_LIMIT};
use crate::iface::interface::{DeviceId, HwAddr, NetworkInterface};
use crate::iface::route::{RouteEntry, RouteLookup};
use crate::network::buffer::{PacketBuffer, ETH_P_IP};
use crate::network::fragment::{
    self, FragmentReassembler, Reassemble, DEFAULT_MAX_FRAGMENTS, DEFAULT_MAX_REASSEMBLIES,
    DEFAULT_REASSEMBLY_TIMEOUT,
};
use crate::network::ipv4::{Datagram, Ipv4Header, DEFAULT_TTL, IPV4_HEADER_LEN, MAX_DATAGRAM_LEN};
use crate::transport::{ProtocolDemux, ProtocolHandler};

/// Link-layer capabilities the IP layer drives
pub trait LinkLayer {
    /// Emit one frame. `payload_len` counts the bytes after the link header.
    fn transmit(
        &mut self,
        iface: &NetworkInterface,
        frame: PacketBuffer,
        payload_len: usize,
        ethertype: u16,
        hw_addr: HwAddr,
    );

    /// Ask the resolver for the hardware address of `target` on `iface`
    fn request_resolution(&mut self, iface: &NetworkInterface, target: Ipv4Addr);
}

/// Tunables of the IP layer
#[derive(Debug, Clone)]
pub struct IpConfig {
    /// TTL of locally originated datagrams
    pub default_ttl: u8,
    pub reassembly_timeout: Duration,
    pub max_reassemblies: usize,
    pub max_fragments: usize,
    /// Frames held per unresolved next hop
    pub arp_queue_limit: usize,
}

impl Default for IpConfig {
    fn default() -> Self {
        IpConfig {
            default_ttl: DEFAULT_TTL,
            reassembly_timeout: DEFAULT_REASSEMBLY_TIMEOUT,
            max_reassemblies: DEFAULT_MAX_REASSEMBLIES,
            max_fragments: DEFAULT_MAX_FRAGMENTS,
            arp_queue_limit: DEFAULT_QUEUE_LIMIT,
        }
    }
}

/// Packet counters, after the RFC 1213 ip group
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IpStats {
    pub in_receives: u64,
    pub in_header_errors: u64,
    pub in_addr_errors: u64,
    pub in_unknown_protos: u64,
    pub in_delivers: u64,
    pub forwarded: u64,
    pub reasm_reqds: u64,
    pub reasm_oks: u64,
    pub frag_fails: u64,
    pub frag_creates: u64,
    pub out_requests: u64,
    pub out_discards: u64,
    pub out_no_routes: u64,
}

/// What happened to an inbound datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handed to the handler registered for this protocol
    Delivered(u8),
    /// No handler for this protocol; discarded
    Unsupported(u8),
    /// Held by the reassembly store
    Reassembling,
    /// Relayed toward its next hop
    Forwarded(Output),
}

/// What the output path did with a datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// Frames emitted right away
    Transmitted(usize),
    /// Frames queued until the next hop resolves
    AwaitingResolution { frames: usize, requested: bool },
}

pub struct IpLayer<L, R, F = FragmentReassembler> {
    pub(crate) config: IpConfig,
    pub(crate) interfaces: HashMap<DeviceId, NetworkInterface>,
    pub(crate) arp: ArpCache,
    pub(crate) routes: R,
    pub(crate) link: L,
    pub(crate) reassembler: F,
    pub(crate) demux: ProtocolDemux,
    pub(crate) next_id: u16,
    pub(crate) stats: IpStats,
}

impl<L: LinkLayer, R: RouteLookup> IpLayer<L, R> {
    pub fn new(config: IpConfig, routes: R, link: L) -> Self {
        let reassembler = FragmentReassembler::new(
            config.reassembly_timeout,
            config.max_reassemblies,
            config.max_fragments,
        );
        Self::with_reassembler(config, routes, link, reassembler)
    }
}

impl<L: LinkLayer, R: RouteLookup, F: Reassemble> IpLayer<L, R, F> {
    pub fn with_reassembler(config: IpConfig, routes: R, link: L, reassembler: F) -> Self {
        IpLayer {
            arp: ArpCache::new(config.arp_queue_limit),
            config,
            interfaces: HashMap::new(),
            routes,
            link,
            reassembler,
            demux: ProtocolDemux::new(),
            next_id: 0,
            stats: IpStats::default(),
        }
    }

    pub fn add_interface(&mut self, iface: NetworkInterface) -> Option<NetworkInterface> {
        debug!(
            "ip: interface {} {}/{} mtu {}",
            iface.id, iface.local_addr, iface.netmask, iface.mtu
        );
        self.interfaces.insert(iface.id, iface)
    }

    pub fn interface(&self, id: DeviceId) -> Option<&NetworkInterface> {
        self.interfaces.get(&id)
    }

    pub fn register_protocol(
        &mut self,
        protocol: u8,
        handler: Box<dyn ProtocolHandler>,
    ) -> Option<Box<dyn ProtocolHandler>> {
        self.demux.register(protocol, handler)
    }

    pub fn stats(&self) -> &IpStats {
        &self.stats
    }

    pub fn arp_cache(&self) -> &ArpCache {
        &self.arp
    }

    pub fn arp_cache_mut(&mut self) -> &mut ArpCache {
        &mut self.arp
    }

    pub fn routes(&self) -> &R {
        &self.routes
    }

    pub fn routes_mut(&mut self) -> &mut R {
        &mut self.routes
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn reassembler(&self) -> &F {
        &self.reassembler
    }

    /// Send a locally originated datagram
    ///
    /// Looks up the route, takes the egress interface's address as source
    /// and hands the datagram to the output path.
    pub fn send(&mut self, dst: Ipv4Addr, protocol: u8, payload: &[u8]) -> Result<Output, IpError> {
        self.stats.out_requests += 1;
        let route = match self.routes.lookup(dst) {
            Some(route) => route,
            None => {
                self.stats.out_no_routes += 1;
                debug!("ip: no route to {}", dst);
                return Err(IpError::NoRoute(dst));
            }
        };
        let src = match self.interfaces.get(&route.device) {
            Some(iface) => iface.local_addr,
            None => {
                let e = IpError::UnknownDevice(route.device);
                return Err(output_error(&mut self.stats, e));
            }
        };

        let len = IPV4_HEADER_LEN + payload.len();
        if len > MAX_DATAGRAM_LEN {
            let e = IpError::MtuExceeded {
                len,
                mtu: MAX_DATAGRAM_LEN,
            };
            return Err(output_error(&mut self.stats, e));
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let header = Ipv4Header::new(protocol, id, self.config.default_ttl, src, dst);
        trace!("ip: send {} -> {} proto {} ({} bytes)", src, dst, protocol, len);
        self.ip_send(&route, Datagram::build(&header, payload))
    }

    /// Output path for a datagram with a chosen route
    ///
    /// Applies to locally originated and forwarded datagrams alike. The
    /// datagram is fragmented to the egress MTU, then each frame is either
    /// transmitted to the resolved next hop or queued behind a resolution
    /// request.
    pub fn ip_send(&mut self, route: &RouteEntry, datagram: Datagram) -> Result<Output, IpError> {
        let iface = match self.interfaces.get(&route.device) {
            Some(iface) => iface,
            None => {
                let e = IpError::UnknownDevice(route.device);
                return Err(output_error(&mut self.stats, e));
            }
        };
        let next_hop = route.next_hop(datagram.header.dst_addr);

        let frames = match fragment::fragment(datagram, iface.mtu) {
            Ok(frames) => frames,
            Err(e) => {
                self.stats.frag_fails += 1;
                return Err(output_error(&mut self.stats, e));
            }
        };
        if frames.len() > 1 {
            self.stats.frag_creates += frames.len() as u64;
            trace!("ip: fragmented into {} pieces for mtu {}", frames.len(), iface.mtu);
        }

        // All fragments of a datagram are queued or none are
        if self.arp.room(route.device, next_hop) < frames.len() {
            warn!("ip: resolution queue for {} is full", next_hop);
            self.stats.out_discards += frames.len() as u64;
            return Err(IpError::ResolutionQueueFull(next_hop));
        }

        let mut transmitted = 0;
        let mut queued = 0;
        let mut requested = false;
        for frame in frames {
            match self.arp.resolve_or_queue(route.device, next_hop, frame.into_buffer()) {
                Lookup::Resolved(hw, frame) => {
                    let payload_len = frame.ip_len();
                    self.link.transmit(iface, frame, payload_len, ETH_P_IP, hw);
                    transmitted += 1;
                }
                Lookup::NewPending => {
                    debug!("ip: resolving {} on {}", next_hop, route.device);
                    self.link.request_resolution(iface, next_hop);
                    requested = true;
                    queued += 1;
                }
                Lookup::Queued => queued += 1,
                Lookup::QueueFull(_) => {
                    warn!("ip: resolution queue for {} is full", next_hop);
                    self.stats.out_discards += 1;
                }
            }
        }

        if queued == 0 {
            Ok(Output::Transmitted(transmitted))
        } else {
            Ok(Output::AwaitingResolution {
                frames: queued,
                requested,
            })
        }
    }

    /// The resolver learned `hw` for `addr` on `device`
    ///
    /// Every frame waiting on the address is transmitted in the order it was
    /// queued. Returns how many frames went out.
    pub fn resolution_complete(&mut self, device: DeviceId, addr: Ipv4Addr, hw: HwAddr) -> usize {
        let queue = self.arp.complete(device, addr, hw);
        let iface = match self.interfaces.get(&device) {
            Some(iface) => iface,
            None => {
                self.stats.out_discards += queue.len() as u64;
                return 0;
            }
        };
        debug!("ip: {} is at {}, flushing {} frames", addr, hw, queue.len());

        let count = queue.len();
        for frame in queue {
            let payload_len = frame.ip_len();
            self.link.transmit(iface, frame, payload_len, ETH_P_IP, hw);
        }
        count
    }

    /// The resolver gave up on `addr`; release the frames waiting for it
    pub fn resolution_failed(&mut self, device: DeviceId, addr: Ipv4Addr) -> usize {
        let dropped = self.arp.fail(device, addr).len();
        if dropped > 0 {
            debug!("ip: resolution of {} failed, dropping {} frames", addr, dropped);
        }
        self.stats.out_discards += dropped as u64;
        dropped
    }

    /// Retire reassemblies older than the configured timeout
    pub fn expire_fragments(&mut self, now: Instant) -> usize {
        self.reassembler.expire(now)
    }
}

fn output_error(stats: &mut IpStats, e: IpError) -> IpError {
    debug!("ip: dropping outbound packet: {}", e);
    stats.out_discards += 1;
    e
}
