//! Packet buffers
//!
//! A `PacketBuffer` owns one link-layer frame. The first `LINK_HEADER_LEN`
//! bytes are reserved for the link header; the IP datagram follows. Buffers
//! are moved between pipeline stages and released by dropping them.

/// Ethernet header length in bytes
pub const LINK_HEADER_LEN: usize = 14;

/// EtherType for IPv4 payloads
pub const ETH_P_IP: u16 = 0x0800;

/// An exclusively owned frame buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketBuffer {
    data: Vec<u8>,
}

impl PacketBuffer {
    /// Wrap a frame received from the link layer
    pub fn from_frame(data: Vec<u8>) -> Self {
        PacketBuffer { data }
    }

    /// Allocate a zeroed buffer able to carry `ip_len` bytes of datagram
    pub fn with_ip_len(ip_len: usize) -> Self {
        PacketBuffer {
            data: vec![0u8; LINK_HEADER_LEN + ip_len],
        }
    }

    /// Total frame length, link header included
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Length of the bytes following the link header
    pub fn ip_len(&self) -> usize {
        self.data.len().saturating_sub(LINK_HEADER_LEN)
    }

    /// The whole frame
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The network-layer part of the frame
    pub fn ip(&self) -> &[u8] {
        let start = LINK_HEADER_LEN.min(self.data.len());
        &self.data[start..]
    }

    pub fn ip_mut(&mut self) -> &mut [u8] {
        let start = LINK_HEADER_LEN.min(self.data.len());
        &mut self.data[start..]
    }

    /// Drop link-layer padding beyond the datagram's total length
    pub fn truncate_ip(&mut self, ip_len: usize) {
        self.data.truncate(LINK_HEADER_LEN + ip_len);
    }

    /// Give the frame bytes back to the caller
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headroom() {
        let mut buf = PacketBuffer::with_ip_len(20);
        assert_eq!(buf.len(), LINK_HEADER_LEN + 20);
        assert_eq!(buf.ip_len(), 20);
        buf.ip_mut()[0] = 0x45;
        assert_eq!(buf.as_bytes()[LINK_HEADER_LEN], 0x45);
    }

    #[test]
    fn test_short_frame() {
        let buf = PacketBuffer::from_frame(vec![0u8; 4]);
        assert_eq!(buf.ip_len(), 0);
        assert!(buf.ip().is_empty());
    }

    #[test]
    fn test_truncate_padding() {
        let mut buf = PacketBuffer::with_ip_len(46);
        buf.truncate_ip(28);
        assert_eq!(buf.ip_len(), 28);
    }
}
