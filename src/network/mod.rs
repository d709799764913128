//! Network layer wire formats
//!
//! This module contains the IPv4 datagram machinery:
//! - Internet checksum
//! - Packet buffers with link-layer headroom
//! - IPv4 header parsing and serialization
//! - Fragment reassembly and fragmentation

pub mod buffer;
pub mod fragment;
pub mod ipv4;

// Re-export commonly used items
pub use buffer::{PacketBuffer, LINK_HEADER_LEN};
pub use ipv4::{flags, protocol, Datagram, Ipv4Header};

/// Calculate Internet checksum
///
/// Algorithm: Sum data in 16-bit big-endian chunks, fold the carry bits back
/// into the low 16 bits, and return the one's complement of the result.
/// Summing a header that already carries its checksum yields 0.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;

    // Process data in 2-byte chunks
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }

    // Odd trailing byte is padded with zero
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    // The second fold absorbs a carry produced by the first
    sum = (sum & 0xFFFF) + (sum >> 16);
    sum = (sum & 0xFFFF) + (sum >> 16);

    !sum as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    // Example header from RFC 1071 style walkthroughs
    const HEADER: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8, 0x00,
        0x01, 0xc0, 0xa8, 0x00, 0xc7,
    ];

    #[test]
    fn test_valid_header_sums_to_zero() {
        assert_eq!(checksum(&HEADER), 0);
    }

    #[test]
    fn test_checksum_computation() {
        let mut header = HEADER;
        header[10] = 0;
        header[11] = 0;
        assert_eq!(checksum(&header), 0xb861);
    }

    #[test]
    fn test_single_bit_flip_detected() {
        for byte in 0..HEADER.len() {
            for bit in 0..8 {
                let mut header = HEADER;
                header[byte] ^= 1 << bit;
                assert_ne!(checksum(&header), 0, "flip at byte {} bit {}", byte, bit);
            }
        }
    }

    #[test]
    fn test_odd_length_padding() {
        assert_eq!(checksum(&[0x12, 0x34, 0x56]), checksum(&[0x12, 0x34, 0x56, 0x00]));
    }

    #[test]
    fn test_carry_folding() {
        // 0xffff + 0xffff = 0x1fffe, folds to 0xffff
        assert_eq!(checksum(&[0xff, 0xff, 0xff, 0xff]), 0);
        assert_eq!(checksum(&[]), 0xffff);
    }
}
