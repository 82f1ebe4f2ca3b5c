//! Outbound message builders
//!
//! The dispatcher turns a queued `(kind, param)` item into message bytes
//! by asking a chain of builders. The first builder that recognises the
//! kind wins; an item nobody recognises is dropped.

use homenode_protocol::Kind;

/// Result of asking a builder for one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Built {
    /// This builder does not know the kind
    NotHandled,
    /// Nothing to send for this item (empty list, index out of range)
    Exhausted,
    /// `len` message bytes were written; `last` marks the final list item
    Packet { len: usize, last: bool },
}

/// Builds outbound message bytes for queued kinds
pub trait PacketBuilder {
    /// Build the message for `kind`
    ///
    /// `param` is the queued parameter. For list kinds queued without a
    /// parameter, `index` is the next item to send.
    fn build(&mut self, kind: Kind, param: Option<u8>, index: u8, out: &mut [u8]) -> Built;
}

/// Empty chain
impl PacketBuilder for () {
    fn build(&mut self, _kind: Kind, _param: Option<u8>, _index: u8, _out: &mut [u8]) -> Built {
        Built::NotHandled
    }
}

impl<T: PacketBuilder + ?Sized> PacketBuilder for &mut T {
    fn build(&mut self, kind: Kind, param: Option<u8>, index: u8, out: &mut [u8]) -> Built {
        (**self).build(kind, param, index, out)
    }
}

/// Two builders tried in order
impl<A: PacketBuilder, B: PacketBuilder> PacketBuilder for (A, B) {
    fn build(&mut self, kind: Kind, param: Option<u8>, index: u8, out: &mut [u8]) -> Built {
        match self.0.build(kind, param, index, out) {
            Built::NotHandled => self.1.build(kind, param, index, out),
            built => built,
        }
    }
}
