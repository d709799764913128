//! Errors raised while processing a datagram
//!
//! Every variant is local to one buffer: the datagram is discarded, the
//! failure is logged and counted, and processing continues with the next
//! frame.

use std::net::Ipv4Addr;

use crate::iface::interface::DeviceId;

/// Reason a datagram was discarded by the IP layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IpError {
    #[error("ip packet is too small ({len} bytes)")]
    TooSmall { len: usize },

    #[error("ip packet is not version 4 (version {0})")]
    BadVersion(u8),

    #[error("ip header is too small ({0} bytes)")]
    HeaderTooSmall(usize),

    #[error("ip header checksum mismatch")]
    ChecksumMismatch,

    #[error("ip packet is truncated (total length {total_len}, header {header_len}, available {available})")]
    TruncatedPacket {
        total_len: usize,
        header_len: usize,
        available: usize,
    },

    #[error("fragment carries the don't-fragment flag")]
    FragmentationForbidden,

    #[error("no route to {0}")]
    NoRoute(Ipv4Addr),

    #[error("time to live expired in transit")]
    TtlExpired,

    #[error("datagram of {len} bytes exceeds mtu {mtu} and may not be fragmented")]
    MtuExceeded { len: usize, mtu: usize },

    #[error("resolution queue for {0} is full")]
    ResolutionQueueFull(Ipv4Addr),

    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),
}

impl IpError {
    /// Whether the failure was caused by a malformed header.
    pub fn is_header_error(&self) -> bool {
        matches!(
            self,
            IpError::TooSmall { .. }
                | IpError::BadVersion(_)
                | IpError::HeaderTooSmall(_)
                | IpError::ChecksumMismatch
                | IpError::TruncatedPacket { .. }
                | IpError::FragmentationForbidden
        )
    }
}
