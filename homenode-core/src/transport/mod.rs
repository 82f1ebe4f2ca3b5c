//! Reliable message transport
//!
//! Each channel carries at most one committed message at a time. The peer
//! acknowledges a message by echoing its additive checksum; an unechoed
//! message is retransmitted on timeout until the retry budget runs out,
//! after which it is abandoned (best-effort delivery).

pub mod channel;
pub mod reliable;

pub use channel::{ChannelId, Link, CHANNEL_COUNT};
pub use reliable::{Delivery, OutstandingMessage, Transport, TransportConfig, TransportError};
