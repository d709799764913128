//! IPv4 protocol implementation
//!
//! This module provides IPv4 header parsing, validation and serialization.
//!
//! Parsing a header out of wire bytes is the only place where fields are
//! converted from network to host byte order; `write_with_checksum` is the
//! only place where they go back. A `Datagram` couples a validated header
//! with the buffer it was read from so the two travel between stages as a
//! single owned value.

use std::net::Ipv4Addr;

use crate::error::IpError;
use crate::network::buffer::PacketBuffer;
use crate::network::checksum;
use byteorder::{BigEndian, ByteOrder};

pub const IPV4_HEADER_LEN: usize = 20;
pub const IPV4_VERSION: u8 = 4;
pub const MAX_DATAGRAM_LEN: usize = 65_535;
const DEFAULT_IHL: u8 = 5; // 5 * 4 = 20 bytes (standard header length)
pub const DEFAULT_TTL: u8 = 64;

/// IPv4 packet header structure
///
/// Represents the standard 20-byte IPv4 header as defined in RFC 791.
/// All fields are held in host byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8, // Internet Header Length
    pub tos: u8, // Type of Service
    pub total_len: u16,
    pub id: u16,
    pub flags_frag_offset: u16, // Flags and Fragment Offset
    pub ttl: u8,                // Time to Live
    pub protocol: u8,           // Next Protocol
    pub checksum: u16,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
}

impl Ipv4Header {
    /// Create a new IPv4 header for a locally originated datagram
    ///
    /// The header length (IHL) is set to 5 (20 bytes); the total length and
    /// checksum are filled in when the datagram is built.
    pub fn new(protocol: u8, id: u16, ttl: u8, src_addr: Ipv4Addr, dst_addr: Ipv4Addr) -> Self {
        Ipv4Header {
            version: IPV4_VERSION,
            ihl: DEFAULT_IHL,
            tos: 0,
            total_len: IPV4_HEADER_LEN as u16,
            id,
            flags_frag_offset: 0,
            ttl,
            protocol,
            checksum: 0,
            src_addr,
            dst_addr,
        }
    }

    /// Read the header fields without any validation
    ///
    /// Returns None if the data is too short to hold a base header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < IPV4_HEADER_LEN {
            return None;
        }

        Some(Ipv4Header {
            version: data[0] >> 4,
            ihl: data[0] & 0x0F,
            tos: data[1],
            total_len: BigEndian::read_u16(&data[2..4]),
            id: BigEndian::read_u16(&data[4..6]),
            flags_frag_offset: BigEndian::read_u16(&data[6..8]),
            ttl: data[8],
            protocol: data[9],
            checksum: BigEndian::read_u16(&data[10..12]),
            src_addr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            dst_addr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        })
    }

    /// Parse and validate the header at the start of `data`
    ///
    /// Checks, in order: version, declared header length, checksum over the
    /// declared header, and that the total length covers the header and fits
    /// in the bytes available.
    pub fn parse(data: &[u8]) -> Result<Self, IpError> {
        let header = Self::from_bytes(data).ok_or(IpError::TooSmall { len: data.len() })?;

        if header.version != IPV4_VERSION {
            return Err(IpError::BadVersion(header.version));
        }

        let header_len = header.header_len();
        if header_len < IPV4_HEADER_LEN {
            return Err(IpError::HeaderTooSmall(header_len));
        }
        if header_len > data.len() {
            return Err(IpError::TruncatedPacket {
                total_len: header.total_len as usize,
                header_len,
                available: data.len(),
            });
        }

        if checksum(&data[..header_len]) != 0 {
            return Err(IpError::ChecksumMismatch);
        }

        let total_len = header.total_len as usize;
        if total_len < header_len || total_len > data.len() {
            return Err(IpError::TruncatedPacket {
                total_len,
                header_len,
                available: data.len(),
            });
        }

        Ok(header)
    }

    /// Convert the base IPv4 header to wire bytes
    pub fn to_bytes(&self) -> [u8; IPV4_HEADER_LEN] {
        let mut bytes = [0u8; IPV4_HEADER_LEN];
        bytes[0] = (self.version << 4) | self.ihl;
        bytes[1] = self.tos;
        BigEndian::write_u16(&mut bytes[2..4], self.total_len);
        BigEndian::write_u16(&mut bytes[4..6], self.id);
        BigEndian::write_u16(&mut bytes[6..8], self.flags_frag_offset);
        bytes[8] = self.ttl;
        bytes[9] = self.protocol;
        BigEndian::write_u16(&mut bytes[10..12], self.checksum);
        bytes[12..16].copy_from_slice(&self.src_addr.octets());
        bytes[16..20].copy_from_slice(&self.dst_addr.octets());

        bytes
    }

    /// Write the header into `buf` in wire order and refresh its checksum
    ///
    /// Option bytes between the base header and `header_len()` are left in
    /// place and covered by the checksum.
    pub fn write_with_checksum(&mut self, buf: &mut [u8]) {
        self.checksum = 0;
        buf[..IPV4_HEADER_LEN].copy_from_slice(&self.to_bytes());
        self.checksum = checksum(&buf[..self.header_len()]);
        BigEndian::write_u16(&mut buf[10..12], self.checksum);
    }

    /// Get the header length in bytes
    pub fn header_len(&self) -> usize {
        (self.ihl as usize) * 4
    }

    /// Get payload length
    ///
    /// Returns the length of the payload (total length - header length)
    pub fn payload_len(&self) -> usize {
        (self.total_len as usize).saturating_sub(self.header_len())
    }

    pub fn dont_fragment(&self) -> bool {
        self.flags_frag_offset & flags::DONT_FRAGMENT != 0
    }

    pub fn more_fragments(&self) -> bool {
        self.flags_frag_offset & flags::MORE_FRAGMENTS != 0
    }

    /// Fragment offset in 8-byte units
    pub fn frag_offset(&self) -> u16 {
        self.flags_frag_offset & flags::FRAGMENT_OFFSET_MASK
    }

    /// Fragment offset in bytes
    pub fn frag_byte_offset(&self) -> usize {
        self.frag_offset() as usize * 8
    }

    /// Whether this datagram is a piece of a larger one
    pub fn is_fragment(&self) -> bool {
        self.frag_offset() != 0 || self.more_fragments()
    }

    /// Set offset (8-byte units) and the more-fragments flag, keeping DF
    pub fn set_fragment(&mut self, offset: u16, more: bool) {
        let mut value = self.flags_frag_offset & flags::DONT_FRAGMENT;
        value |= offset & flags::FRAGMENT_OFFSET_MASK;
        if more {
            value |= flags::MORE_FRAGMENTS;
        }
        self.flags_frag_offset = value;
    }
}

/// IPv4 protocol constants
pub mod protocol {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// IPv4 flags constants
pub mod flags {
    pub const DONT_FRAGMENT: u16 = 0x4000;
    pub const MORE_FRAGMENTS: u16 = 0x2000;
    pub const FRAGMENT_OFFSET_MASK: u16 = 0x1FFF;
}

/// A validated IPv4 datagram and the buffer that carries it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub header: Ipv4Header,
    buffer: PacketBuffer,
}

impl Datagram {
    /// Validate the datagram carried in `buffer`
    ///
    /// Link-layer padding past the total length is trimmed.
    pub fn parse(mut buffer: PacketBuffer) -> Result<Self, IpError> {
        let header = Ipv4Header::parse(buffer.ip())?;
        buffer.truncate_ip(header.total_len as usize);
        Ok(Datagram { header, buffer })
    }

    /// Create a complete datagram from a header and payload
    ///
    /// The total length and checksum are computed from the payload. The
    /// caller must keep the payload within `MAX_DATAGRAM_LEN`.
    pub fn build(header: &Ipv4Header, payload: &[u8]) -> Self {
        let mut header = header.clone();
        let header_len = header.header_len();
        let total_len = header_len + payload.len();
        debug_assert!(total_len <= MAX_DATAGRAM_LEN);
        header.total_len = total_len as u16;

        let mut buffer = PacketBuffer::with_ip_len(total_len);
        let ip = buffer.ip_mut();
        ip[header_len..].copy_from_slice(payload);
        header.write_with_checksum(ip);

        Datagram { header, buffer }
    }

    /// The datagram bytes: header, options and payload
    pub fn bytes(&self) -> &[u8] {
        self.buffer.ip()
    }

    /// Header bytes including options
    pub fn header_bytes(&self) -> &[u8] {
        &self.buffer.ip()[..self.header.header_len()]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.ip()[self.header.header_len()..]
    }

    pub fn buffer(&self) -> &PacketBuffer {
        &self.buffer
    }

    /// Write the (possibly modified) header back to the buffer
    pub fn commit_header(&mut self) {
        self.header.write_with_checksum(self.buffer.ip_mut());
    }

    pub fn into_buffer(self) -> PacketBuffer {
        self.buffer
    }
}
