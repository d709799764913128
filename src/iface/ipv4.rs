//! IPv4 input path
//!
//! Every inbound frame is validated, checked for a contradictory
//! fragmentation header, then either delivered on this host (after
//! reassembly when it is a fragment) or forwarded toward its next hop.

use log::{debug, trace};

use crate::error::IpError;
use crate::iface::interface::DeviceId;
use crate::iface::ip::{Disposition, IpLayer, LinkLayer, Output};
use crate::iface::route::RouteLookup;
use crate::network::buffer::{PacketBuffer, LINK_HEADER_LEN};
use crate::network::fragment::{FragmentKey, Reassemble, Reassembly};
use crate::network::ipv4::{Datagram, IPV4_HEADER_LEN};

/// Validate the datagram carried by an inbound frame
///
/// `min_header` is the smallest IP header the frame must be able to hold.
/// On success the header has been read into host byte order and the buffer
/// trimmed to the datagram's total length.
pub fn validate(frame: PacketBuffer, min_header: usize) -> Result<Datagram, IpError> {
    if frame.len() < LINK_HEADER_LEN + min_header {
        return Err(IpError::TooSmall { len: frame.len() });
    }
    Datagram::parse(frame)
}

impl<L: LinkLayer, R: RouteLookup, F: Reassemble> IpLayer<L, R, F> {
    /// Entry point for every inbound frame believed to carry IPv4
    ///
    /// The frame is consumed: it is delivered, forwarded, held for
    /// reassembly, or discarded with the returned error.
    pub fn ip_in(&mut self, device: DeviceId, frame: PacketBuffer) -> Result<Disposition, IpError> {
        self.stats.in_receives += 1;
        let result = self.input(device, frame);
        if let Err(e) = &result {
            debug!("ip: dropping packet on {}: {}", device, e);
            if e.is_header_error() {
                self.stats.in_header_errors += 1;
            }
        }
        result
    }

    fn input(&mut self, device: DeviceId, frame: PacketBuffer) -> Result<Disposition, IpError> {
        let datagram = validate(frame, IPV4_HEADER_LEN)?;
        let header = &datagram.header;
        trace!(
            "ip: {} -> {} ({}/{} bytes)",
            header.src_addr,
            header.dst_addr,
            header.header_len(),
            header.total_len
        );

        if header.is_fragment() && header.dont_fragment() {
            return Err(IpError::FragmentationForbidden);
        }

        let for_us = match self.interfaces.get(&device) {
            Some(iface) => iface.is_for_us(&header.dst_addr),
            None => return Err(IpError::UnknownDevice(device)),
        };
        if for_us {
            Ok(self.ip_recv(datagram))
        } else {
            self.forward(datagram).map(Disposition::Forwarded)
        }
    }

    /// Deliver a datagram addressed to this host
    fn ip_recv(&mut self, datagram: Datagram) -> Disposition {
        let datagram = if datagram.header.is_fragment() {
            self.stats.reasm_reqds += 1;
            let key = FragmentKey::of(&datagram.header);
            match self.reassembler.reassemble(key, datagram) {
                Reassembly::Complete(datagram) => {
                    self.stats.reasm_oks += 1;
                    datagram
                }
                Reassembly::Pending => return Disposition::Reassembling,
            }
        } else {
            datagram
        };

        let protocol = datagram.header.protocol;
        if self.demux.dispatch(&datagram) {
            self.stats.in_delivers += 1;
            Disposition::Delivered(protocol)
        } else {
            self.stats.in_unknown_protos += 1;
            Disposition::Unsupported(protocol)
        }
    }

    /// Relay a datagram addressed to another host
    fn forward(&mut self, mut datagram: Datagram) -> Result<Output, IpError> {
        let dst = datagram.header.dst_addr;
        let route = match self.routes.lookup(dst) {
            Some(route) => route,
            None => {
                self.stats.in_addr_errors += 1;
                return Err(IpError::NoRoute(dst));
            }
        };

        if datagram.header.ttl <= 1 {
            self.stats.in_header_errors += 1;
            return Err(IpError::TtlExpired);
        }
        datagram.header.ttl -= 1;
        datagram.commit_header();

        trace!("ip: forward to {} via {}", dst, route.next_hop(dst));
        let output = self.ip_send(&route, datagram)?;
        self.stats.forwarded += 1;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::interface::HwAddr;
    use crate::iface::ip::tests::{layer, FakeLink, ETH0, LOCAL, PEER, PEER_HW};
    use crate::iface::route::RouteTable;
    use crate::network::checksum;
    use crate::network::ipv4::{flags, protocol, Ipv4Header, DEFAULT_TTL};
    use std::cell::RefCell;
    use std::net::Ipv4Addr;
    use std::rc::Rc;

    const REMOTE: Ipv4Addr = Ipv4Addr::new(192, 168, 9, 9);

    type Seen = Rc<RefCell<Vec<Vec<u8>>>>;

    fn with_udp_handler(layer: &mut IpLayer<FakeLink, RouteTable>) -> Seen {
        let seen: Seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        layer.register_protocol(
            protocol::UDP,
            Box::new(move |d: &Datagram| sink.borrow_mut().push(d.payload().to_vec())),
        );
        seen
    }

    fn header(dst: Ipv4Addr, proto: u8) -> Ipv4Header {
        Ipv4Header::new(proto, 0x4242, DEFAULT_TTL, REMOTE, dst)
    }

    fn frame(header: &Ipv4Header, payload: &[u8]) -> PacketBuffer {
        Datagram::build(header, payload).into_buffer()
    }

    fn fragment_frame(offset: usize, data: &[u8], more: bool) -> PacketBuffer {
        let mut h = header(LOCAL, protocol::UDP);
        h.set_fragment((offset / 8) as u16, more);
        frame(&h, data)
    }

    #[test]
    fn test_udp_delivered_locally() {
        let mut layer = layer();
        let seen = with_udp_handler(&mut layer);
        let payload = [0x30, 0x39, 0x00, 0x35, 0x00, 0x08, 0x00, 0x00];

        let frame = frame(&header(LOCAL, protocol::UDP), &payload);
        assert_eq!(frame.ip_len(), 28);
        assert_eq!(layer.ip_in(ETH0, frame), Ok(Disposition::Delivered(protocol::UDP)));

        assert_eq!(*seen.borrow(), vec![payload.to_vec()]);
        assert_eq!(layer.stats().in_delivers, 1);
        assert!(layer.link().sent.is_empty());
    }

    #[test]
    fn test_link_padding_not_delivered() {
        let mut layer = layer();
        let seen = with_udp_handler(&mut layer);
        let mut bytes = frame(&header(LOCAL, protocol::UDP), &[7u8; 8]).into_inner();
        bytes.extend_from_slice(&[0u8; 18]);

        layer.ip_in(ETH0, PacketBuffer::from_frame(bytes)).unwrap();
        assert_eq!(*seen.borrow(), vec![vec![7u8; 8]]);
    }

    #[test]
    fn test_corrupted_checksum_dropped() {
        let mut layer = layer();
        let seen = with_udp_handler(&mut layer);
        let mut bytes = fragment_frame(0, &[1u8; 8], true).into_inner();
        bytes[LINK_HEADER_LEN + 11] ^= 0x01;

        assert_eq!(
            layer.ip_in(ETH0, PacketBuffer::from_frame(bytes)),
            Err(IpError::ChecksumMismatch)
        );
        assert!(seen.borrow().is_empty());
        assert!(layer.reassembler().is_empty());
        assert_eq!(layer.stats().in_header_errors, 1);
    }

    #[test]
    fn test_no_route_dropped() {
        let mut layer = layer();
        let dst = Ipv4Addr::new(172, 16, 0, 1);
        assert_eq!(
            layer.ip_in(ETH0, frame(&header(dst, protocol::UDP), &[0u8; 8])),
            Err(IpError::NoRoute(dst))
        );
        assert_eq!(layer.stats().in_addr_errors, 1);
        assert!(layer.link().sent.is_empty());
        assert!(layer.link().requests.is_empty());
    }

    #[test]
    fn test_reverse_order_fragments_reassembled() {
        let mut layer = layer();
        let seen = with_udp_handler(&mut layer);
        let data: Vec<u8> = (0..24u8).collect();

        assert_eq!(
            layer.ip_in(ETH0, fragment_frame(16, &data[16..], false)),
            Ok(Disposition::Reassembling)
        );
        assert!(seen.borrow().is_empty());
        assert_eq!(
            layer.ip_in(ETH0, fragment_frame(0, &data[..16], true)),
            Ok(Disposition::Delivered(protocol::UDP))
        );

        assert_eq!(*seen.borrow(), vec![data]);
        assert_eq!(layer.stats().reasm_reqds, 2);
        assert_eq!(layer.stats().reasm_oks, 1);
        assert!(layer.reassembler().is_empty());
    }

    #[test]
    fn test_fragment_with_dont_fragment_rejected() {
        let mut layer = layer();
        for dst in [LOCAL, PEER] {
            let mut h = header(dst, protocol::UDP);
            h.flags_frag_offset = flags::DONT_FRAGMENT | flags::MORE_FRAGMENTS;
            assert_eq!(
                layer.ip_in(ETH0, frame(&h, &[0u8; 8])),
                Err(IpError::FragmentationForbidden)
            );

            h.flags_frag_offset = flags::DONT_FRAGMENT | 2;
            assert_eq!(
                layer.ip_in(ETH0, frame(&h, &[0u8; 8])),
                Err(IpError::FragmentationForbidden)
            );
        }
        assert!(layer.reassembler().is_empty());
        assert_eq!(layer.stats().reasm_reqds, 0);
    }

    #[test]
    fn test_forwarded_with_ttl_decrement() {
        let mut layer = layer();
        let seen = with_udp_handler(&mut layer);
        layer.arp_cache_mut().insert_static(ETH0, PEER, PEER_HW);
        let original = frame(&header(PEER, protocol::UDP), &[5u8; 12]).into_inner();

        assert_eq!(
            layer.ip_in(ETH0, PacketBuffer::from_frame(original.clone())),
            Ok(Disposition::Forwarded(Output::Transmitted(1)))
        );
        assert!(seen.borrow().is_empty());

        let (_, sent, payload_len, _, hw) = &layer.link().sent[0];
        assert_eq!(*hw, PEER_HW);
        assert_eq!(*payload_len, 32);
        let ip = &sent[LINK_HEADER_LEN..];
        assert_eq!(ip[8], DEFAULT_TTL - 1);
        assert_eq!(checksum(&ip[..20]), 0);
        // Everything except TTL and checksum leaves as it arrived
        let before = &original[LINK_HEADER_LEN..];
        assert_eq!(ip[..8], before[..8]);
        assert_eq!(ip[9..10], before[9..10]);
        assert_eq!(ip[12..], before[12..]);
        assert_eq!(layer.stats().forwarded, 1);
    }

    #[test]
    fn test_forward_waits_for_resolution() {
        let mut layer = layer();
        let out = layer.ip_in(ETH0, frame(&header(PEER, protocol::TCP), &[0u8; 20]));
        assert_eq!(
            out,
            Ok(Disposition::Forwarded(Output::AwaitingResolution {
                frames: 1,
                requested: true
            }))
        );
        assert_eq!(layer.link().requests, vec![(ETH0, PEER)]);
        assert_eq!(layer.resolution_complete(ETH0, PEER, PEER_HW), 1);
    }

    #[test]
    fn test_expired_ttl_not_forwarded() {
        let mut layer = layer();
        layer.arp_cache_mut().insert_static(ETH0, PEER, PEER_HW);
        let mut h = header(PEER, protocol::UDP);
        h.ttl = 1;

        assert_eq!(layer.ip_in(ETH0, frame(&h, &[0u8; 8])), Err(IpError::TtlExpired));
        assert!(layer.link().sent.is_empty());
    }

    #[test]
    fn test_local_destination_never_forwarded() {
        let mut layer = layer();
        layer.arp_cache_mut().insert_static(ETH0, LOCAL, HwAddr([0x02, 0, 0, 0, 0, 1]));
        assert_eq!(
            layer.ip_in(ETH0, frame(&header(LOCAL, protocol::TCP), &[0u8; 20])),
            Ok(Disposition::Unsupported(protocol::TCP))
        );
        assert!(layer.link().sent.is_empty());
        assert_eq!(layer.stats().in_unknown_protos, 1);
    }

    #[test]
    fn test_routed_broadcast_not_delivered_locally() {
        let mut layer = layer();
        let seen = with_udp_handler(&mut layer);
        let dst = Ipv4Addr::new(10, 0, 0, 255);
        assert!(layer.routes().lookup(dst).is_some());

        let h = header(dst, protocol::UDP);
        assert_eq!(
            layer.ip_in(ETH0, frame(&h, &[1u8; 8])),
            Ok(Disposition::Forwarded(Output::AwaitingResolution {
                frames: 1,
                requested: true
            }))
        );
        assert!(seen.borrow().is_empty());
        assert_eq!(layer.stats().in_delivers, 0);
        assert_eq!(layer.link().requests, vec![(ETH0, dst)]);
    }

    #[test]
    fn test_too_small_frame() {
        let mut layer = layer();
        let frame = PacketBuffer::from_frame(vec![0x45; LINK_HEADER_LEN + 10]);
        assert_eq!(
            layer.ip_in(ETH0, frame),
            Err(IpError::TooSmall { len: LINK_HEADER_LEN + 10 })
        );
    }

    #[test]
    fn test_unknown_device() {
        let mut layer = layer();
        assert_eq!(
            layer.ip_in(DeviceId(7), frame(&header(LOCAL, protocol::UDP), &[])),
            Err(IpError::UnknownDevice(DeviceId(7)))
        );
    }

    #[test]
    fn test_oversized_forward_with_dont_fragment() {
        let mut layer = layer();
        layer.arp_cache_mut().insert_static(ETH0, PEER, PEER_HW);
        let mut h = header(PEER, protocol::UDP);
        h.flags_frag_offset = flags::DONT_FRAGMENT;

        assert_eq!(
            layer.ip_in(ETH0, frame(&h, &vec![0u8; 1600])),
            Err(IpError::MtuExceeded { len: 1620, mtu: 1500 })
        );
        assert_eq!(layer.stats().frag_fails, 1);
    }

    #[test]
    fn test_stale_reassembly_expires() {
        let mut layer = layer();
        layer.ip_in(ETH0, fragment_frame(0, &[0u8; 8], true)).unwrap();
        let later = std::time::Instant::now()
            + layer.config.reassembly_timeout
            + std::time::Duration::from_secs(1);
        assert_eq!(layer.expire_fragments(later), 1);
        assert!(layer.reassembler().is_empty());
    }
}
