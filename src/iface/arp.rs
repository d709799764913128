//! Next-hop resolution cache
//!
//! Maps (device, protocol address) to a hardware address. An entry is
//! created either resolved or pending; a pending entry owns the frames
//! waiting for the address, in the order they were queued. Request timeouts
//! and retries belong to the resolver, which reports back through
//! `complete` or `fail`.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

use crate::iface::interface::{DeviceId, HwAddr};
use crate::network::buffer::PacketBuffer;

pub const DEFAULT_QUEUE_LIMIT: usize = 64;

#[derive(Debug)]
pub enum ArpState {
    Resolved(HwAddr),
    Pending(VecDeque<PacketBuffer>),
}

/// Result of looking up the next hop for one outgoing frame
#[derive(Debug)]
pub enum Lookup {
    /// The address is known; the frame comes back for transmission
    Resolved(HwAddr, PacketBuffer),
    /// A new pending entry was created with the frame as its first element.
    /// The caller must issue a resolution request.
    NewPending,
    /// The frame joined an outstanding request's queue
    Queued,
    /// The pending queue is at its limit; the frame comes back for discard
    QueueFull(PacketBuffer),
}

#[derive(Debug)]
pub struct ArpCache {
    entries: HashMap<(DeviceId, Ipv4Addr), ArpState>,
    queue_limit: usize,
}

impl ArpCache {
    pub fn new(queue_limit: usize) -> Self {
        ArpCache {
            entries: HashMap::new(),
            queue_limit,
        }
    }

    pub fn lookup(&self, device: DeviceId, addr: Ipv4Addr) -> Option<HwAddr> {
        match self.entries.get(&(device, addr)) {
            Some(ArpState::Resolved(hw)) => Some(*hw),
            _ => None,
        }
    }

    pub fn is_pending(&self, device: DeviceId, addr: Ipv4Addr) -> bool {
        matches!(self.entries.get(&(device, addr)), Some(ArpState::Pending(_)))
    }

    /// Number of frames waiting on the address
    pub fn queued(&self, device: DeviceId, addr: Ipv4Addr) -> usize {
        match self.entries.get(&(device, addr)) {
            Some(ArpState::Pending(queue)) => queue.len(),
            _ => 0,
        }
    }

    /// How many more frames the address can take
    ///
    /// Unbounded once resolved; otherwise what is left of the queue limit.
    pub fn room(&self, device: DeviceId, addr: Ipv4Addr) -> usize {
        match self.entries.get(&(device, addr)) {
            Some(ArpState::Resolved(_)) => usize::MAX,
            Some(ArpState::Pending(queue)) => self.queue_limit.saturating_sub(queue.len()),
            None => self.queue_limit,
        }
    }

    /// Find the hardware address for a frame, queueing it if unknown
    pub fn resolve_or_queue(
        &mut self,
        device: DeviceId,
        addr: Ipv4Addr,
        frame: PacketBuffer,
    ) -> Lookup {
        match self.entries.get_mut(&(device, addr)) {
            Some(ArpState::Resolved(hw)) => Lookup::Resolved(*hw, frame),
            Some(ArpState::Pending(queue)) => {
                if queue.len() >= self.queue_limit {
                    return Lookup::QueueFull(frame);
                }
                queue.push_back(frame);
                Lookup::Queued
            }
            None => {
                let mut queue = VecDeque::new();
                queue.push_back(frame);
                self.entries.insert((device, addr), ArpState::Pending(queue));
                Lookup::NewPending
            }
        }
    }

    /// Record a learned hardware address
    ///
    /// Returns the frames that were waiting for it, oldest first. The queue
    /// is handed out once; a repeated completion returns nothing and only
    /// refreshes the address.
    pub fn complete(
        &mut self,
        device: DeviceId,
        addr: Ipv4Addr,
        hw: HwAddr,
    ) -> VecDeque<PacketBuffer> {
        match self.entries.insert((device, addr), ArpState::Resolved(hw)) {
            Some(ArpState::Pending(queue)) => queue,
            _ => VecDeque::new(),
        }
    }

    /// Drop a pending entry whose resolution failed, returning its frames
    pub fn fail(&mut self, device: DeviceId, addr: Ipv4Addr) -> VecDeque<PacketBuffer> {
        if !self.is_pending(device, addr) {
            return VecDeque::new();
        }
        match self.entries.remove(&(device, addr)) {
            Some(ArpState::Pending(queue)) => queue,
            _ => VecDeque::new(),
        }
    }

    /// Add a resolved entry directly
    pub fn insert_static(&mut self, device: DeviceId, addr: Ipv4Addr, hw: HwAddr) {
        self.entries.insert((device, addr), ArpState::Resolved(hw));
    }

    pub fn remove(&mut self, device: DeviceId, addr: Ipv4Addr) -> Option<ArpState> {
        self.entries.remove(&(device, addr))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV: DeviceId = DeviceId(0);
    const HW: HwAddr = HwAddr([0x02, 0, 0, 0, 0, 9]);

    fn addr() -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, 9)
    }

    fn frame(tag: u8) -> PacketBuffer {
        PacketBuffer::from_frame(vec![tag; 20])
    }

    #[test]
    fn test_first_miss_creates_pending() {
        let mut cache = ArpCache::default();
        assert!(matches!(cache.resolve_or_queue(DEV, addr(), frame(1)), Lookup::NewPending));
        assert!(matches!(cache.resolve_or_queue(DEV, addr(), frame(2)), Lookup::Queued));
        assert!(cache.is_pending(DEV, addr()));
        assert_eq!(cache.queued(DEV, addr()), 2);
        assert_eq!(cache.lookup(DEV, addr()), None);
    }

    #[test]
    fn test_complete_drains_in_order() {
        let mut cache = ArpCache::default();
        for tag in 1..=3 {
            cache.resolve_or_queue(DEV, addr(), frame(tag));
        }
        let drained: Vec<u8> = cache
            .complete(DEV, addr(), HW)
            .into_iter()
            .map(|f| f.as_bytes()[0])
            .collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert_eq!(cache.lookup(DEV, addr()), Some(HW));
        assert!(cache.complete(DEV, addr(), HW).is_empty());
    }

    #[test]
    fn test_resolved_hands_frame_back() {
        let mut cache = ArpCache::default();
        cache.insert_static(DEV, addr(), HW);
        match cache.resolve_or_queue(DEV, addr(), frame(7)) {
            Lookup::Resolved(hw, f) => {
                assert_eq!(hw, HW);
                assert_eq!(f.as_bytes()[0], 7);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_entries_are_per_device() {
        let mut cache = ArpCache::default();
        cache.insert_static(DEV, addr(), HW);
        assert_eq!(cache.lookup(DeviceId(1), addr()), None);
    }

    #[test]
    fn test_queue_limit() {
        let mut cache = ArpCache::new(1);
        cache.resolve_or_queue(DEV, addr(), frame(1));
        assert!(matches!(
            cache.resolve_or_queue(DEV, addr(), frame(2)),
            Lookup::QueueFull(_)
        ));
    }

    #[test]
    fn test_room() {
        let mut cache = ArpCache::new(3);
        assert_eq!(cache.room(DEV, addr()), 3);
        cache.resolve_or_queue(DEV, addr(), frame(1));
        assert_eq!(cache.room(DEV, addr()), 2);
        cache.complete(DEV, addr(), HW);
        assert_eq!(cache.room(DEV, addr()), usize::MAX);
    }

    #[test]
    fn test_fail_returns_queue() {
        let mut cache = ArpCache::default();
        cache.resolve_or_queue(DEV, addr(), frame(1));
        assert_eq!(cache.fail(DEV, addr()).len(), 1);
        assert!(cache.is_empty());

        cache.insert_static(DEV, addr(), HW);
        assert!(cache.fail(DEV, addr()).is_empty());
        assert_eq!(cache.lookup(DEV, addr()), Some(HW));
    }
}
