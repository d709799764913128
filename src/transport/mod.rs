//! Upper-layer protocol dispatch
//!
//! Transport protocols (ICMP, TCP, UDP, ...) live outside the IP layer and
//! register a `ProtocolHandler` under their protocol number. Handlers borrow
//! the datagram; the IP layer releases it once dispatch returns.

use std::collections::HashMap;

use log::debug;

use crate::network::ipv4::Datagram;

// Re-export protocol numbers for registration
pub use crate::network::ipv4::protocol;

/// Receives locally addressed, fully reassembled datagrams
pub trait ProtocolHandler {
    fn deliver(&mut self, datagram: &Datagram);
}

impl<F> ProtocolHandler for F
where
    F: FnMut(&Datagram),
{
    fn deliver(&mut self, datagram: &Datagram) {
        self(datagram)
    }
}

/// Protocol number to handler table
#[derive(Default)]
pub struct ProtocolDemux {
    handlers: HashMap<u8, Box<dyn ProtocolHandler>>,
}

impl ProtocolDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, returning the one it replaces
    pub fn register(
        &mut self,
        protocol: u8,
        handler: Box<dyn ProtocolHandler>,
    ) -> Option<Box<dyn ProtocolHandler>> {
        self.handlers.insert(protocol, handler)
    }

    pub fn unregister(&mut self, protocol: u8) -> Option<Box<dyn ProtocolHandler>> {
        self.handlers.remove(&protocol)
    }

    pub fn is_registered(&self, protocol: u8) -> bool {
        self.handlers.contains_key(&protocol)
    }

    /// Hand the datagram to its protocol's handler
    ///
    /// Returns false when no handler is registered for the protocol.
    pub fn dispatch(&mut self, datagram: &Datagram) -> bool {
        let protocol = datagram.header.protocol;
        match self.handlers.get_mut(&protocol) {
            Some(handler) => {
                debug!(
                    "ip: deliver protocol {} from {} ({} bytes)",
                    protocol,
                    datagram.header.src_addr,
                    datagram.payload().len()
                );
                handler.deliver(datagram);
                true
            }
            None => {
                debug!("ip: unsupported protocol {}", protocol);
                false
            }
        }
    }
}
