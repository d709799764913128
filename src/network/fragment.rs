//! IPv4 fragment reassembly and fragmentation
//!
//! Fragments are grouped by `FragmentKey` and held, with their buffers,
//! until the set covers the datagram without gaps. Overlapping fragments,
//! exact duplicates included, are ignored: the first copy of any byte range
//! wins. Reassembly state is bounded by a per-datagram timeout, a limit on
//! concurrent datagrams (oldest evicted first) and a limit on fragments per
//! datagram.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::IpError;
use crate::network::buffer::PacketBuffer;
use crate::network::ipv4::{Datagram, Ipv4Header, IPV4_HEADER_LEN, MAX_DATAGRAM_LEN};

pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_REASSEMBLIES: usize = 64;
pub const DEFAULT_MAX_FRAGMENTS: usize = 64;

/// Identifies the datagram a fragment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub protocol: u8,
    pub id: u16,
}

impl FragmentKey {
    pub fn of(header: &Ipv4Header) -> Self {
        FragmentKey {
            src_addr: header.src_addr,
            dst_addr: header.dst_addr,
            protocol: header.protocol,
            id: header.id,
        }
    }
}

/// Outcome of submitting one fragment
#[derive(Debug)]
pub enum Reassembly {
    /// Every fragment arrived; the rebuilt datagram is handed back
    Complete(Datagram),
    /// The fragment is held (or was dropped) by the reassembly store
    Pending,
}

/// A fragment reassembly engine
pub trait Reassemble {
    fn reassemble(&mut self, key: FragmentKey, fragment: Datagram) -> Reassembly;

    /// Retire reassemblies that started before `now - timeout`.
    /// Returns how many were discarded.
    fn expire(&mut self, now: Instant) -> usize;
}

struct Reassembler {
    started: Instant,
    /// Fragments indexed by byte offset
    fragments: BTreeMap<usize, Datagram>,
    /// Payload length, known once the final fragment arrives
    total_len: Option<usize>,
    received: usize,
}

impl Reassembler {
    fn new(started: Instant) -> Self {
        Reassembler {
            started,
            fragments: BTreeMap::new(),
            total_len: None,
            received: 0,
        }
    }

    fn overlaps(&self, start: usize, end: usize) -> bool {
        // The fragment starting at or before `start` is the only earlier one
        // that can reach into the range.
        if let Some((&offset, prev)) = self.fragments.range(..=start).next_back() {
            if offset + prev.header.payload_len() > start {
                return true;
            }
        }
        self.fragments.range(start..end).next().is_some()
    }

    fn is_complete(&self) -> bool {
        self.total_len == Some(self.received)
    }

    /// Stitch the held fragments into one datagram
    fn assemble(self) -> Option<Datagram> {
        let first = self.fragments.get(&0)?;
        let mut header = first.header.clone();
        let header_len = header.header_len();
        let total_len = header_len + self.received;

        let mut buffer = PacketBuffer::with_ip_len(total_len);
        let ip = buffer.ip_mut();
        ip[..header_len].copy_from_slice(first.header_bytes());
        let mut pos = header_len;
        for fragment in self.fragments.values() {
            let payload = fragment.payload();
            ip[pos..pos + payload.len()].copy_from_slice(payload);
            pos += payload.len();
        }

        header.total_len = total_len as u16;
        header.set_fragment(0, false);
        header.write_with_checksum(ip);

        Datagram::parse(buffer)
            .map_err(|e| warn!("fragment: reassembled datagram is invalid: {}", e))
            .ok()
    }
}

/// In-memory reassembly store
pub struct FragmentReassembler {
    reassemblies: HashMap<FragmentKey, Reassembler>,
    timeout: Duration,
    max_reassemblies: usize,
    max_fragments: usize,
}

impl FragmentReassembler {
    pub fn new(timeout: Duration, max_reassemblies: usize, max_fragments: usize) -> Self {
        FragmentReassembler {
            reassemblies: HashMap::new(),
            timeout,
            max_reassemblies,
            max_fragments,
        }
    }

    /// Number of datagrams currently being reassembled
    pub fn len(&self) -> usize {
        self.reassemblies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reassemblies.is_empty()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .reassemblies
            .iter()
            .min_by_key(|(_, r)| r.started)
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            warn!("fragment: reassembly table full, evicting {:?}", key);
            self.reassemblies.remove(&key);
        }
    }

    fn insert(&mut self, key: FragmentKey, fragment: Datagram) -> Reassembly {
        let header = &fragment.header;
        let start = header.frag_byte_offset();
        let len = header.payload_len();
        let end = start + len;
        let more = header.more_fragments();

        if more && len % 8 != 0 {
            debug!("fragment: non-final fragment of {} bytes is not 8-byte aligned", len);
            return Reassembly::Pending;
        }
        if len == 0 && more {
            debug!("fragment: ignoring empty non-final fragment at offset {}", start);
            return Reassembly::Pending;
        }
        if header.header_len() + end > MAX_DATAGRAM_LEN {
            debug!("fragment: fragment ends past the maximum datagram size");
            return Reassembly::Pending;
        }

        if !self.reassemblies.contains_key(&key) && self.reassemblies.len() >= self.max_reassemblies
        {
            self.evict_oldest();
        }
        let max_fragments = self.max_fragments;
        let entry = self
            .reassemblies
            .entry(key)
            .or_insert_with(|| Reassembler::new(Instant::now()));

        if entry.fragments.len() >= max_fragments {
            debug!("fragment: too many fragments for {:?}", key);
            return Reassembly::Pending;
        }
        if entry.overlaps(start, end) {
            trace!("fragment: ignoring overlapping fragment at offset {}", start);
            return Reassembly::Pending;
        }
        if !more {
            if entry.total_len.is_some() {
                trace!("fragment: ignoring second final fragment");
                return Reassembly::Pending;
            }
            if entry.fragments.range(end..).next().is_some() {
                debug!("fragment: final fragment ends before data already held");
                return Reassembly::Pending;
            }
            entry.total_len = Some(end);
        } else if entry.total_len.map_or(false, |total| end > total) {
            debug!("fragment: fragment reaches past the final fragment");
            return Reassembly::Pending;
        }

        entry.received += len;
        entry.fragments.insert(start, fragment);

        if !entry.is_complete() {
            return Reassembly::Pending;
        }

        let reassembler = match self.reassemblies.remove(&key) {
            Some(reassembler) => reassembler,
            None => return Reassembly::Pending,
        };
        match reassembler.assemble() {
            Some(datagram) => Reassembly::Complete(datagram),
            None => Reassembly::Pending,
        }
    }
}

impl Default for FragmentReassembler {
    fn default() -> Self {
        Self::new(
            DEFAULT_REASSEMBLY_TIMEOUT,
            DEFAULT_MAX_REASSEMBLIES,
            DEFAULT_MAX_FRAGMENTS,
        )
    }
}

impl Reassemble for FragmentReassembler {
    fn reassemble(&mut self, key: FragmentKey, fragment: Datagram) -> Reassembly {
        self.insert(key, fragment)
    }

    fn expire(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.reassemblies.len();
        self.reassemblies.retain(|key, r| {
            let alive = now.saturating_duration_since(r.started) < timeout;
            if !alive {
                warn!("fragment: reassembly of {:?} timed out", key);
            }
            alive
        });
        before - self.reassemblies.len()
    }
}

/// Split a datagram so that every piece fits in `mtu` bytes
///
/// Fragments after the first carry only the base header. A datagram that
/// already fits is returned unchanged.
pub fn fragment(datagram: Datagram, mtu: usize) -> Result<Vec<Datagram>, IpError> {
    let len = datagram.header.total_len as usize;
    if len <= mtu {
        return Ok(vec![datagram]);
    }
    if datagram.header.dont_fragment() {
        return Err(IpError::MtuExceeded { len, mtu });
    }

    let payload = datagram.payload();
    let end = datagram.header.header_len() + datagram.header.frag_byte_offset() + payload.len();
    if end > MAX_DATAGRAM_LEN {
        return Err(IpError::MtuExceeded {
            len: end,
            mtu: MAX_DATAGRAM_LEN,
        });
    }
    let base_offset = datagram.header.frag_offset();
    let last_more = datagram.header.more_fragments();
    let mut fragments = Vec::new();
    let mut pos = 0;

    while pos < payload.len() {
        let mut header = datagram.header.clone();
        let header_bytes: &[u8] = if pos == 0 {
            datagram.header_bytes()
        } else {
            header.ihl = (IPV4_HEADER_LEN / 4) as u8;
            &datagram.header_bytes()[..IPV4_HEADER_LEN]
        };
        let header_len = header_bytes.len();

        // All but the last fragment carry a multiple of 8 bytes
        let room = mtu.saturating_sub(header_len) & !7;
        if room == 0 {
            return Err(IpError::MtuExceeded { len, mtu });
        }
        let chunk = room.min(payload.len() - pos);
        let more = pos + chunk < payload.len() || last_more;

        header.total_len = (header_len + chunk) as u16;
        header.set_fragment(base_offset + (pos / 8) as u16, more);

        let mut buffer = PacketBuffer::with_ip_len(header_len + chunk);
        let ip = buffer.ip_mut();
        ip[..header_len].copy_from_slice(header_bytes);
        ip[header_len..].copy_from_slice(&payload[pos..pos + chunk]);
        header.write_with_checksum(ip);

        fragments.push(Datagram::parse(buffer)?);
        pos += chunk;
    }

    Ok(fragments)
}
